//! Read-time derived fields. Nothing here is persisted; every value is
//! recomputed from the stored record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Campground, Geometry, Image};

pub const DEFAULT_IMAGE_URL: &str = "/images/default-campground.jpg";
pub const DEFAULT_IMAGE_FILENAME: &str = "default";

/// Continental US, used for the map camera and for campgrounds submitted
/// without coordinates.
pub const DEFAULT_CENTER: [f64; 2] = [-103.5917, 40.6699];

const UPLOAD_MARKER: &str = "/upload";
const THUMBNAIL_PARAMS: &str = "w_200,h_200,c_fill,q_auto:low";
const SMALL_PARAMS: &str = "w_400,q_auto:good";
const MEDIUM_PARAMS: &str = "w_800,q_auto:good";

fn with_transform(url: &str, params: &str) -> String {
    url.replacen(UPLOAD_MARKER, &format!("{UPLOAD_MARKER}/{params}"), 1)
}

pub fn thumbnail(url: &str) -> String {
    with_transform(url, THUMBNAIL_PARAMS)
}

pub fn small(url: &str) -> String {
    with_transform(url, SMALL_PARAMS)
}

pub fn medium(url: &str) -> String {
    with_transform(url, MEDIUM_PARAMS)
}

pub fn default_image() -> Image {
    Image {
        url: DEFAULT_IMAGE_URL.to_string(),
        filename: DEFAULT_IMAGE_FILENAME.to_string(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageView {
    pub url: String,
    pub filename: String,
    pub thumbnail: String,
    pub small: String,
    pub medium: String,
}

impl From<&Image> for ImageView {
    fn from(image: &Image) -> Self {
        Self {
            thumbnail: thumbnail(&image.url),
            small: small(&image.url),
            medium: medium(&image.url),
            url: image.url.clone(),
            filename: image.filename.clone(),
        }
    }
}

/// Escapes text for use inside element content and quoted attributes.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Map popup for a campground: first image (or the placeholder), title,
/// location, nightly price and a link to the detail page.
pub fn popup_markup(campground: &Campground) -> String {
    let image_url = campground
        .images
        .first()
        .map_or(DEFAULT_IMAGE_URL, |image| image.url.as_str());
    let title = escape_html(&campground.title);
    let location = escape_html(&campground.location);

    format!(
        r#"<div class="map-popup" style="max-width: 250px;">
    <div class="popup-image" style="height: 120px; overflow: hidden; border-radius: 8px 8px 0 0;">
        <img src="{image}" alt="{title}" style="width: 100%; height: 100%; object-fit: cover;">
    </div>
    <div class="popup-content" style="padding: 12px;">
        <h6 style="margin: 0 0 5px 0; font-size: 14px; font-weight: bold;">{title}</h6>
        <p style="margin: 0 0 5px 0; color: #666; font-size: 12px;">📍 {location}</p>
        <p style="margin: 0 0 10px 0; font-weight: bold; color: #198754;">${price}/night</p>
        <a href="/campgrounds/{id}" class="btn-view" style="display: inline-block; padding: 6px 12px; background: #198754; color: white; text-decoration: none; border-radius: 4px; font-size: 12px;">View Details</a>
    </div>
</div>"#,
        image = escape_html(image_url),
        price = campground.price,
        id = campground.id,
    )
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureProperties {
    #[serde(default)]
    pub id: Uuid,
    #[serde(default)]
    pub title: String,
    pub pop_up_markup: String,
}

/// GeoJSON feature as consumed by the cluster map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type", default = "feature_type")]
    pub kind: String,
    pub geometry: Geometry,
    pub properties: FeatureProperties,
}

fn feature_type() -> String {
    "Feature".to_string()
}

fn properties(campground: &Campground) -> FeatureProperties {
    FeatureProperties {
        id: campground.id,
        title: campground.title.clone(),
        pop_up_markup: popup_markup(campground),
    }
}

pub fn feature(campground: &Campground) -> Feature {
    Feature {
        kind: feature_type(),
        geometry: campground.geometry,
        properties: properties(campground),
    }
}

/// A campground as returned to clients, with every derived field attached.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampgroundView {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub location: String,
    pub price: f64,
    pub geometry: Geometry,
    pub images: Vec<ImageView>,
    pub author: Uuid,
    pub reviews: Vec<Uuid>,
    pub properties: FeatureProperties,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Campground> for CampgroundView {
    fn from(campground: &Campground) -> Self {
        Self {
            id: campground.id,
            title: campground.title.clone(),
            description: campground.description.clone(),
            location: campground.location.clone(),
            price: campground.price,
            geometry: campground.geometry,
            images: campground.images.iter().map(ImageView::from).collect(),
            author: campground.author_id,
            reviews: campground.reviews.clone(),
            properties: properties(campground),
            created_at: campground.created_at,
            updated_at: campground.updated_at,
        }
    }
}

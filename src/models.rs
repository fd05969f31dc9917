use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
}

/// An image embedded in a campground. `filename` identifies it for removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub url: String,
    pub filename: String,
}

/// GeoJSON point, `[longitude, latitude]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: [f64; 2] },
}

impl Geometry {
    pub fn point(longitude: f64, latitude: f64) -> Self {
        Geometry::Point {
            coordinates: [longitude, latitude],
        }
    }

    pub fn coordinates(&self) -> [f64; 2] {
        match self {
            Geometry::Point { coordinates } => *coordinates,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Campground {
    pub id: Uuid,
    pub author_id: Uuid,
    pub title: String,
    pub description: String,
    pub location: String,
    pub price: f64,
    pub geometry: Geometry,
    pub images: Vec<Image>,
    pub reviews: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated campground fields, ready to be stored. A `None` geometry keeps
/// the stored position on edit and places a new campground at the default
/// center.
#[derive(Debug, Clone, PartialEq)]
pub struct CampgroundInput {
    pub title: String,
    pub description: String,
    pub location: String,
    pub price: f64,
    pub geometry: Option<Geometry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: Uuid,
    pub campground_id: Uuid,
    pub author_id: Uuid,
    pub rating: u8,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewInput {
    pub rating: u8,
    pub body: String,
}

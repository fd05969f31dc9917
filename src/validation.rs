//! Request-body validation for campground, review and registration
//! submissions.
//!
//! Every violation is collected and reported at once. Free-text fields go
//! through [`escape_html`], which rejects any value the HTML sanitizer would
//! have to rewrite instead of storing the rewritten value.

use std::borrow::Cow;
use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::models::{CampgroundInput, Geometry, Image, ReviewInput};

const DANGEROUS_HTML: &str =
    "contains potentially dangerous HTML content. Please remove any HTML tags.";

/// References the sanitizer writes back unchanged.
const KEPT_REFERENCES: [&str; 3] = ["&amp;", "&lt;", "&gt;"];

#[derive(Debug, Default, Validate)]
pub struct CampgroundFields {
    #[validate(
        required(message = "is required"),
        length(min = 1, message = "is not allowed to be empty"),
        custom = "escape_html"
    )]
    pub title: Option<String>,

    #[validate(
        required(message = "is required"),
        range(min = 0.0, message = "must be greater than or equal to 0")
    )]
    pub price: Option<f64>,

    #[validate(
        required(message = "is required"),
        length(min = 1, message = "is not allowed to be empty"),
        custom = "escape_html"
    )]
    pub location: Option<String>,

    #[validate(
        required(message = "is required"),
        length(min = 1, message = "is not allowed to be empty"),
        custom = "escape_html"
    )]
    pub description: Option<String>,

    /// `[longitude, latitude]`.
    pub geometry: Option<[f64; 2]>,
}

/// Raw campground body. Field types are checked during validation so a
/// wrongly typed value is reported next to every other violation.
#[derive(Debug, Default, Deserialize)]
#[serde(transparent)]
pub struct CampgroundSubmission(pub Map<String, Value>);

#[derive(Debug, Default, Validate)]
pub struct ReviewFields {
    #[validate(
        required(message = "is required"),
        range(min = 1.0, max = 5.0, message = "must be between 1 and 5")
    )]
    pub rating: Option<f64>,

    #[validate(
        required(message = "is required"),
        length(min = 1, message = "is not allowed to be empty"),
        custom = "escape_html"
    )]
    pub body: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(transparent)]
pub struct ReviewSubmission(pub Map<String, Value>);

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterForm {
    #[validate(
        length(min = 1, message = "is not allowed to be empty"),
        custom = "escape_html"
    )]
    pub username: String,

    #[validate(email(message = "must be a valid email"))]
    pub email: String,

    #[validate(length(min = 6, message = "length must be at least 6 characters long"))]
    pub password: String,
}

/// Validated campground submission.
#[derive(Debug, Clone, PartialEq)]
pub struct CampgroundUpdate {
    pub campground: CampgroundInput,
    pub images: Vec<Image>,
    pub delete_images: Vec<String>,
}

/// The text the sanitizer produces for `value` when no tags are allowed and
/// disallowed markup is escaped rather than stripped. Entities are decoded
/// before escaping, so only `&amp;`, `&lt;` and `&gt;` come back as written;
/// every other `&` is rewritten.
pub fn sanitize_text(value: &str) -> Cow<'_, str> {
    if !value.contains(['<', '>', '&']) {
        return Cow::Borrowed(value);
    }

    let mut out = String::with_capacity(value.len() + 8);
    for (i, c) in value.char_indices() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' if KEPT_REFERENCES.iter().any(|r| value[i..].starts_with(r)) => out.push('&'),
            '&' => out.push_str("&amp;"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

fn escape_html(value: &str) -> Result<(), ValidationError> {
    if sanitize_text(value) == value {
        return Ok(());
    }
    let mut err = ValidationError::new("string.escapeHTML");
    err.message = Some(Cow::Borrowed(DANGEROUS_HTML));
    Err(err)
}

/// Hosted images must be absolute `http`/`https` URLs. Local files only
/// enter a campground through the upload endpoint.
fn is_remote_image_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    (lower.starts_with("http://") || lower.starts_with("https://")) && validator::validate_url(url)
}

/// Typed access to the fields of a JSON object. A value of the wrong type
/// is recorded as a violation and read as absent.
struct FieldReader {
    object: Map<String, Value>,
    mistyped: HashSet<&'static str>,
    violations: Vec<String>,
}

impl FieldReader {
    fn new(object: Map<String, Value>) -> Self {
        Self {
            object,
            mistyped: HashSet::new(),
            violations: Vec::new(),
        }
    }

    fn take<T: DeserializeOwned>(&mut self, name: &'static str, expected: &str) -> Option<T> {
        let value = self.object.remove(name).filter(|value| !value.is_null())?;
        match serde_json::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                self.mistyped.insert(name);
                self.violations.push(format!("\"{name}\" must be {expected}"));
                None
            }
        }
    }

    /// Reads a nested object, or records it as missing.
    fn object(&mut self, name: &'static str) -> Option<FieldReader> {
        let object = self.take::<Map<String, Value>>(name, "an object");
        if object.is_none() && !self.mistyped.contains(name) {
            self.violations.push(format!("\"{name}\" is required"));
        }
        object.map(FieldReader::new)
    }

    /// Merges derived-rule output with the type violations. Rules on a
    /// mistyped field are dropped; its type error already covers it.
    fn finish<T: Validate>(self, fields: &T, extra: impl IntoIterator<Item = String>) -> Result<(), Vec<String>> {
        let mut lines = match fields.validate() {
            Ok(()) => Vec::new(),
            Err(errors) => describe(&errors, &self.mistyped),
        };
        lines.extend(self.violations);
        lines.extend(extra);
        report(lines)
    }
}

/// Flattens validator output into `"field" message` lines.
fn describe(errors: &ValidationErrors, skip: &HashSet<&'static str>) -> Vec<String> {
    errors
        .field_errors()
        .into_iter()
        .filter(|(field, _)| !skip.contains(field))
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| match &e.message {
                Some(message) => format!("\"{field}\" {message}"),
                None => format!("\"{field}\" is invalid ({})", e.code),
            })
        })
        .collect()
}

/// Every violation, sorted for stable output.
fn report(mut lines: Vec<String>) -> Result<(), Vec<String>> {
    if lines.is_empty() {
        return Ok(());
    }
    lines.sort();
    Err(lines)
}

/// Validates a create or edit body. `geometry` stays `None` when omitted;
/// callers decide what an absent position means.
pub fn validate_campground(submission: CampgroundSubmission) -> Result<CampgroundUpdate, Vec<String>> {
    let mut body = FieldReader::new(submission.0);
    let images: Vec<Image> = body.take("images", "a list of {url, filename} objects").unwrap_or_default();
    let delete_images: Vec<String> = body.take("deleteImages", "a list of strings").unwrap_or_default();

    let mut extra: Vec<String> = images
        .iter()
        .enumerate()
        .filter(|(_, image)| !is_remote_image_url(&image.url))
        .map(|(i, _)| format!("\"images[{i}].url\" must be an http or https URL"))
        .collect();

    let Some(mut reader) = body.object("campground") else {
        extra.append(&mut body.violations);
        extra.sort();
        return Err(extra);
    };
    extra.append(&mut body.violations);

    let fields = CampgroundFields {
        title: reader.take("title", "a string"),
        price: reader.take("price", "a number"),
        location: reader.take("location", "a string"),
        description: reader.take("description", "a string"),
        geometry: reader.take("geometry", "a [longitude, latitude] pair"),
    };
    if let Some([longitude, latitude]) = fields.geometry {
        if !(-180.0..=180.0).contains(&longitude) || !(-90.0..=90.0).contains(&latitude) {
            extra.push(
                "\"geometry\" must be [longitude, latitude] within [-180, 180] and [-90, 90]".to_string(),
            );
        }
    }
    reader.finish(&fields, extra)?;

    Ok(CampgroundUpdate {
        campground: CampgroundInput {
            title: fields.title.unwrap_or_default(),
            description: fields.description.unwrap_or_default(),
            location: fields.location.unwrap_or_default(),
            price: fields.price.unwrap_or_default(),
            geometry: fields
                .geometry
                .map(|[longitude, latitude]| Geometry::point(longitude, latitude)),
        },
        images,
        delete_images,
    })
}

pub fn validate_review(submission: ReviewSubmission) -> Result<ReviewInput, Vec<String>> {
    let mut body = FieldReader::new(submission.0);
    let Some(mut reader) = body.object("review") else {
        return Err(body.violations);
    };

    let fields = ReviewFields {
        rating: reader.take("rating", "a number"),
        body: reader.take("body", "a string"),
    };
    let fractional = fields
        .rating
        .filter(|rating| rating.fract() != 0.0)
        .map(|_| "\"rating\" must be an integer".to_string());
    reader.finish(&fields, fractional)?;

    Ok(ReviewInput {
        // Range and integrality are checked above.
        rating: fields.rating.unwrap_or_default() as u8,
        body: fields.body.unwrap_or_default(),
    })
}

pub fn validate_registration(form: &RegisterForm) -> Result<(), Vec<String>> {
    let lines = match form.validate() {
        Ok(()) => Vec::new(),
        Err(errors) => describe(&errors, &HashSet::new()),
    };
    report(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn campground(body: serde_json::Value) -> Result<CampgroundUpdate, Vec<String>> {
        validate_campground(serde_json::from_value(body).unwrap())
    }

    fn review(body: serde_json::Value) -> Result<ReviewInput, Vec<String>> {
        validate_review(serde_json::from_value(body).unwrap())
    }

    #[test]
    fn accepts_plain_campground() {
        let update = campground(json!({
            "campground": {
                "title": "Redwood Grove Retreat",
                "price": 18,
                "location": "Eureka, California",
                "description": "Tall trees, cold nights and warm fires",
                "geometry": [-124.1637, 40.8021]
            },
            "deleteImages": ["ReCamp/forest/forest1"]
        }))
        .unwrap();

        assert_eq!(update.campground.title, "Redwood Grove Retreat");
        assert_eq!(update.campground.price, 18.0);
        assert_eq!(
            update.campground.geometry.map(|g| g.coordinates()),
            Some([-124.1637, 40.8021])
        );
        assert_eq!(update.delete_images, vec!["ReCamp/forest/forest1"]);
    }

    #[test]
    fn html_in_title_is_rejected_not_sanitized() {
        for title in ["<b>Camp</b>", "Camp <script>alert(1)</script>", "<img src=x onerror=alert(1)>"] {
            let errors = campground(json!({
                "campground": {
                    "title": title,
                    "price": 10,
                    "location": "Moab, Utah",
                    "description": "Red rock"
                }
            }))
            .unwrap_err();
            assert_eq!(errors, vec![format!("\"title\" {DANGEROUS_HTML}")]);
        }
    }

    #[test]
    fn collects_every_violation() {
        let errors = campground(json!({
            "campground": {
                "title": "",
                "price": -1,
                "description": "<i>x</i>"
            }
        }))
        .unwrap_err();

        assert_eq!(
            errors,
            vec![
                format!("\"description\" {DANGEROUS_HTML}"),
                "\"location\" is required".to_string(),
                "\"price\" must be greater than or equal to 0".to_string(),
                "\"title\" is not allowed to be empty".to_string(),
            ]
        );
    }

    #[test]
    fn missing_campground_key_is_rejected() {
        let errors = campground(json!({ "deleteImages": [] })).unwrap_err();
        assert_eq!(errors, vec!["\"campground\" is required"]);
    }

    #[test]
    fn omitted_geometry_is_left_unset() {
        let update = campground(json!({
            "campground": {
                "title": "Alpine Lookout",
                "price": 0,
                "location": "Aspen, Colorado",
                "description": "Thin air"
            }
        }))
        .unwrap();
        assert_eq!(update.campground.geometry, None);
    }

    #[test]
    fn type_errors_are_reported_with_other_violations() {
        let errors = campground(json!({
            "campground": { "title": 5, "price": "abc", "location": "" }
        }))
        .unwrap_err();

        assert_eq!(
            errors,
            vec![
                "\"description\" is required",
                "\"location\" is not allowed to be empty",
                "\"price\" must be a number",
                "\"title\" must be a string",
            ]
        );

        let errors = campground(json!({ "campground": "Moab", "deleteImages": "all" })).unwrap_err();
        assert_eq!(
            errors,
            vec!["\"campground\" must be an object", "\"deleteImages\" must be a list of strings"]
        );

        let errors = review(json!({ "review": { "rating": "five", "body": "" } })).unwrap_err();
        assert_eq!(
            errors,
            vec!["\"body\" is not allowed to be empty", "\"rating\" must be a number"]
        );
    }

    #[test]
    fn image_urls_must_be_remote_http() {
        let errors = campground(json!({
            "campground": {
                "title": "Canyon Rim",
                "price": 30,
                "location": "Page, Arizona",
                "description": "Sunrise over the gorge"
            },
            "images": [
                { "url": "https://res.cloudinary.com/demo/image/upload/rim.jpg", "filename": "rim" },
                { "url": "javascript:alert(1)", "filename": "x" },
                { "url": "/upload/3f2b8c1e-0000-4000-8000-000000000000/tent.png", "filename": "y" },
                { "url": "ftp://files.example.com/rim.jpg", "filename": "z" }
            ]
        }))
        .unwrap_err();

        assert_eq!(
            errors,
            vec![
                "\"images[1].url\" must be an http or https URL",
                "\"images[2].url\" must be an http or https URL",
                "\"images[3].url\" must be an http or https URL",
            ]
        );
    }

    #[test]
    fn out_of_range_geometry_is_rejected() {
        let errors = campground(json!({
            "campground": {
                "title": "Nowhere",
                "price": 1,
                "location": "Nowhere",
                "description": "Off the map",
                "geometry": [200.0, 10.0]
            }
        }))
        .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("\"geometry\""));
    }

    #[test]
    fn rating_must_be_integer_between_one_and_five() {
        for rating in [json!(0), json!(6), json!(-3), json!(2.5), json!(5.01)] {
            let result = review(json!({ "review": { "rating": rating, "body": "ok" } }));
            assert!(result.is_err(), "rating {rating} should be rejected");
        }

        for rating in 1..=5 {
            let input = review(json!({ "review": { "rating": rating, "body": "ok" } })).unwrap();
            assert_eq!(input.rating, rating as u8);
        }
    }

    #[test]
    fn review_body_is_escape_checked() {
        let errors = review(json!({ "review": { "rating": 4, "body": "<a href='javascript:x'>hi</a>" } }))
            .unwrap_err();
        assert_eq!(errors, vec![format!("\"body\" {DANGEROUS_HTML}")]);
    }

    #[test]
    fn sanitizer_escapes_markup_and_bare_ampersands() {
        assert_eq!(sanitize_text("plain text"), "plain text");
        assert_eq!(sanitize_text("<b>"), "&lt;b&gt;");
        assert_eq!(sanitize_text("fish & chips"), "fish &amp; chips");
        assert_eq!(sanitize_text("fish &amp; chips"), "fish &amp; chips");
        assert_eq!(sanitize_text("1 &lt; 2 &gt; 0"), "1 &lt; 2 &gt; 0");
    }

    #[test]
    fn only_amp_lt_gt_references_pass() {
        for text in ["&#169; 2024", "Cabin&nbsp;A", "&copy; Parks", "&quot;hi&quot;", "&foo;", "&AMP;"] {
            assert!(escape_html(text).is_err(), "{text} should be rejected");
        }
        for text in ["Salt &amp; Pepper Flats", "a &lt; b", "b &gt; a"] {
            assert!(escape_html(text).is_ok(), "{text} should be accepted");
        }
    }

    #[test]
    fn registration_requires_email_and_password_length() {
        let form = RegisterForm {
            username: "camper".to_string(),
            email: "not-an-email".to_string(),
            password: "123".to_string(),
        };
        let errors = validate_registration(&form).unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}

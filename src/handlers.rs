use crate::auth::{authenticate, bearer_token, create_auth_token, hash_password, revoke_auth_token, verify_password};
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::home::{home_summary, HomeSummary};
use crate::map::MapConfig;
use crate::models::{Campground, Image, Review, UserSummary};
use crate::store;
use crate::validation::{
    validate_campground, validate_registration, validate_review, CampgroundSubmission, RegisterForm,
    ReviewSubmission,
};
use crate::views::{feature, CampgroundView};
use crate::AppState;
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Multipart, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Component, Path as FsPath, PathBuf};
use tokio::fs;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Deserialize)]
pub struct LoginUser {
    username: String,
    password: String,
}

#[derive(Serialize)]
pub struct AuthToken {
    token: String,
    user: UserSummary,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewView {
    id: Uuid,
    rating: u8,
    body: String,
    author: Option<UserSummary>,
    created_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampgroundDetail {
    #[serde(flatten)]
    campground: CampgroundView,
    owner: Option<UserSummary>,
    review_details: Vec<ReviewView>,
}

pub async fn home(State(state): State<AppState>) -> Json<HomeSummary> {
    Json(home_summary(&state.db).await)
}

pub async fn register_user(
    State(state): State<AppState>,
    payload: std::result::Result<Json<RegisterForm>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(form) = payload?;
    validate_registration(&form).map_err(AppError::Validation)?;

    let password_hash = hash_password(&form.password)?;
    let user = store::insert_user(&state.db, &form.username, &form.email, &password_hash).await?;
    let token = create_auth_token(&state.db, &user.id).await?;

    Ok((
        StatusCode::CREATED,
        Json(AuthToken {
            token,
            user: UserSummary {
                id: user.id,
                username: user.username,
            },
        }),
    ))
}

pub async fn login_user(
    State(state): State<AppState>,
    payload: std::result::Result<Json<LoginUser>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(login) = payload?;

    let user = store::find_user_by_username(&state.db, &login.username)
        .await?
        .filter(|user| verify_password(&login.password, &user.password_hash))
        .ok_or_else(|| AppError::Unauthorized(format!("Invalid credentials for {}", login.username)))?;

    let token = create_auth_token(&state.db, &user.id).await?;
    info!(user_id = %user.id, "user logged in");

    Ok(Json(AuthToken {
        token,
        user: UserSummary {
            id: user.id,
            username: user.username,
        },
    }))
}

pub async fn logout_user(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode> {
    let token = bearer_token(&headers).ok_or_else(|| AppError::Unauthorized("Missing token".to_string()))?;
    if !revoke_auth_token(&state.db, token).await? {
        return Err(AppError::Unauthorized("Invalid token".to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_campgrounds(State(state): State<AppState>) -> Result<Json<Vec<CampgroundView>>> {
    let campgrounds = store::list_campgrounds(&state.db).await?;
    Ok(Json(campgrounds.iter().map(CampgroundView::from).collect()))
}

pub async fn map_config(State(state): State<AppState>) -> Result<Json<MapConfig>> {
    let campgrounds = store::list_campgrounds(&state.db).await?;
    Ok(Json(MapConfig {
        map_token: state.config.map_token.clone(),
        campgrounds: campgrounds.iter().map(feature).collect(),
    }))
}

pub async fn create_campground(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: std::result::Result<Json<CampgroundSubmission>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let user_id = authenticate(&state.db, &headers).await?;
    let Json(submission) = payload?;
    let update = validate_campground(submission).map_err(AppError::Validation)?;

    let campground = store::insert_campground(&state.db, user_id, &update.campground, &update.images).await?;
    Ok((StatusCode::CREATED, Json(CampgroundView::from(&campground))))
}

pub async fn show_campground(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CampgroundDetail>> {
    let campground = find_campground(&state.db, id).await?;
    let owner = store::find_user_summary(&state.db, campground.author_id).await?;

    let mut review_details = Vec::new();
    for review in store::list_reviews(&state.db, id).await? {
        review_details.push(ReviewView {
            author: store::find_user_summary(&state.db, review.author_id).await?,
            id: review.id,
            rating: review.rating,
            body: review.body,
            created_at: review.created_at,
        });
    }

    Ok(Json(CampgroundDetail {
        campground: CampgroundView::from(&campground),
        owner,
        review_details,
    }))
}

pub async fn update_campground(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    payload: std::result::Result<Json<CampgroundSubmission>, JsonRejection>,
) -> Result<Json<CampgroundView>> {
    let user_id = authenticate(&state.db, &headers).await?;
    owned_campground(&state.db, id, user_id).await?;
    let Json(submission) = payload?;
    let update = validate_campground(submission).map_err(AppError::Validation)?;

    let edit = store::update_campground(
        &state.db,
        id,
        &update.campground,
        &update.images,
        &update.delete_images,
    )
    .await?
    .ok_or_else(|| AppError::NotFound(format!("campground {id}")))?;
    remove_local_files(&state.config.upload_dir, id, &edit.removed).await;

    Ok(Json(CampgroundView::from(&edit.campground)))
}

pub async fn delete_campground(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let user_id = authenticate(&state.db, &headers).await?;
    owned_campground(&state.db, id, user_id).await?;

    let deleted = store::delete_campground_cascade(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("campground {id}")))?;
    remove_local_files(&state.config.upload_dir, id, &deleted.images).await;

    Ok(Json(json!({
        "deleted": deleted.id,
        "reviewsDeleted": deleted.reviews.len(),
    })))
}

pub async fn upload_images(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    let user_id = authenticate(&state.db, &headers).await?;
    owned_campground(&state.db, id, user_id).await?;

    let dir = state.config.upload_dir.join(id.to_string());
    let mut images = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?
    {
        let Some(name) = field.file_name().and_then(safe_file_name) else {
            continue;
        };
        let mime = mime_guess::from_path(&name).first_or_octet_stream();
        if mime.type_() != mime_guess::mime::IMAGE {
            return Err(AppError::BadRequest(format!("{name} is not an image")));
        }
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;

        let stored = format!("{}-{}", Uuid::new_v4().simple(), name);
        fs::create_dir_all(&dir).await?;
        fs::write(dir.join(&stored), &data).await?;
        debug!(campground_id = %id, file = %stored, bytes = data.len(), "image stored");

        images.push(Image {
            url: format!("/upload/{id}/{stored}"),
            filename: format!("{id}/{stored}"),
        });
    }

    if images.is_empty() {
        return Err(AppError::BadRequest("No image uploaded".to_string()));
    }

    store::append_images(&state.db, id, &images).await?;
    let campground = find_campground(&state.db, id).await?;
    Ok((StatusCode::CREATED, Json(CampgroundView::from(&campground))))
}

pub async fn create_review(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    payload: std::result::Result<Json<ReviewSubmission>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let user_id = authenticate(&state.db, &headers).await?;
    find_campground(&state.db, id).await?;
    let Json(submission) = payload?;
    let input = validate_review(submission).map_err(AppError::Validation)?;

    let review: Review = store::insert_review(&state.db, id, user_id, &input).await?;
    Ok((StatusCode::CREATED, Json(review)))
}

pub async fn delete_review(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, review_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode> {
    let user_id = authenticate(&state.db, &headers).await?;

    let review = store::find_review(&state.db, review_id)
        .await?
        .filter(|review| review.campground_id == id)
        .ok_or_else(|| AppError::NotFound(format!("review {review_id}")))?;
    if review.author_id != user_id {
        return Err(AppError::Forbidden(format!("{user_id} is not the author of review {review_id}")));
    }

    store::delete_review(&state.db, id, review_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Serves an uploaded image. A leading transformation segment such as
/// `w_200,h_200,c_fill` is accepted and ignored, so derived image URLs
/// resolve to the stored original.
pub async fn serve_upload(State(state): State<AppState>, Path(path): Path<String>) -> Result<Response> {
    let mut segments: Vec<&str> = path.split('/').collect();
    if segments
        .iter()
        .any(|segment| segment.is_empty() || *segment == "." || *segment == "..")
    {
        return Err(AppError::NotFound(format!("upload {path}")));
    }
    if segments.len() > 1 && is_transformation(segments[0]) {
        segments.remove(0);
    }

    let file_path: PathBuf = segments
        .iter()
        .fold(state.config.upload_dir.clone(), |acc, segment| acc.join(segment));
    let file = fs::File::open(&file_path)
        .await
        .map_err(|_| AppError::NotFound(format!("upload {path}")))?;

    let mime_type = mime_guess::from_path(&file_path).first_or_octet_stream();
    let body = Body::from_stream(ReaderStream::new(file));

    Ok((
        [
            (header::CONTENT_TYPE, mime_type.to_string()),
            (header::CACHE_CONTROL, "public, max-age=31536000".to_string()),
        ],
        body,
    )
        .into_response())
}

async fn find_campground(db: &Database, id: Uuid) -> Result<Campground> {
    store::find_campground(db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("campground {id}")))
}

async fn owned_campground(db: &Database, id: Uuid, user_id: Uuid) -> Result<Campground> {
    let campground = find_campground(db, id).await?;
    if campground.author_id != user_id {
        return Err(AppError::Forbidden(format!("{user_id} does not own campground {id}")));
    }
    Ok(campground)
}

/// Last path component of an uploaded file name, with anything outside
/// `[A-Za-z0-9._-]` replaced.
fn safe_file_name(original: &str) -> Option<String> {
    let name = FsPath::new(original).file_name()?.to_str()?;
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    (!cleaned.trim_matches('.').is_empty()).then_some(cleaned)
}

fn is_transformation(segment: &str) -> bool {
    segment.split(',').all(|part| {
        part.split_once('_').is_some_and(|(key, value)| {
            !key.is_empty() && key.chars().all(|c| c.is_ascii_lowercase()) && !value.is_empty()
        })
    })
}

/// Deletes the files behind a campground's locally stored images. Only
/// paths inside that campground's own upload directory are touched; remote
/// images are left alone.
async fn remove_local_files(upload_dir: &FsPath, campground_id: Uuid, images: &[Image]) {
    let dir = campground_id.to_string();
    for image in images {
        let Some(relative) = image.url.strip_prefix("/upload/") else {
            continue;
        };
        let Ok(name) = FsPath::new(relative).strip_prefix(&dir) else {
            warn!(%campground_id, url = %image.url, "image outside campground upload dir, not removed");
            continue;
        };
        if name.as_os_str().is_empty() || !name.components().all(|c| matches!(c, Component::Normal(_))) {
            continue;
        }
        let path = upload_dir.join(&dir).join(name);
        if let Err(err) = fs::remove_file(&path).await {
            warn!(path = %path.display(), "failed to remove image file: {err}");
        }
    }
}

use crate::db::Database;
use crate::error::{AppError, StoreError};
use axum::http::{header, HeaderMap};
use bcrypt::{hash, verify, BcryptError, DEFAULT_COST};
use chrono::Utc;
use rand::Rng;
use rusqlite::{params, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

pub fn hash_password(password: &str) -> Result<String, BcryptError> {
    hash(password, DEFAULT_COST)
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    verify(password, hash).unwrap_or(false)
}

pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

pub async fn create_auth_token(db: &Database, user_id: &Uuid) -> Result<String, StoreError> {
    let token = generate_token();
    let now = Utc::now();

    db.lock().await.execute(
        "INSERT INTO auth_tokens (token, user_id, created_at) VALUES (?, ?, ?)",
        params![token, user_id.to_string(), now.to_rfc3339()],
    )?;

    Ok(token)
}

pub async fn verify_auth_token(db: &Database, token: &str) -> Result<Option<Uuid>, StoreError> {
    let user_id: Option<String> = db
        .lock()
        .await
        .query_row(
            "SELECT user_id FROM auth_tokens WHERE token = ?",
            [token],
            |row| row.get(0),
        )
        .optional()?;

    Ok(user_id.and_then(|id| Uuid::parse_str(&id).ok()))
}

pub async fn revoke_auth_token(db: &Database, token: &str) -> Result<bool, StoreError> {
    let removed = db
        .lock()
        .await
        .execute("DELETE FROM auth_tokens WHERE token = ?", [token])?;
    Ok(removed > 0)
}

/// Token from the `Authorization` header, with or without a `Bearer ` prefix.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    (!token.is_empty()).then_some(token)
}

/// Resolves the calling user from the request headers.
pub async fn authenticate(db: &Database, headers: &HeaderMap) -> Result<Uuid, AppError> {
    let token = bearer_token(headers).ok_or_else(|| AppError::Unauthorized("Missing token".to_string()))?;

    match verify_auth_token(db, token).await? {
        Some(user_id) => {
            debug!(%user_id, "request authenticated");
            Ok(user_id)
        }
        None => Err(AppError::Unauthorized("Invalid token".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store;
    use axum::http::HeaderValue;

    #[test]
    fn tokens_are_32_alphanumeric_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn password_hash_verifies() {
        let hashed = hash_password("password123").unwrap();
        assert!(verify_password("password123", &hashed));
        assert!(!verify_password("password124", &hashed));
        assert!(!verify_password("password123", "not-a-hash"));
    }

    #[test]
    fn bearer_prefix_is_optional() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));
    }

    #[tokio::test]
    async fn revoked_token_no_longer_authenticates() {
        let db = Database::open_in_memory().unwrap();
        let user = store::insert_user(&db, "seeduser", "seed@example.com", "hash")
            .await
            .unwrap();
        let token = create_auth_token(&db, &user.id).await.unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&token).unwrap());
        assert_eq!(authenticate(&db, &headers).await.unwrap(), user.id);

        assert!(revoke_auth_token(&db, &token).await.unwrap());
        assert!(matches!(
            authenticate(&db, &headers).await,
            Err(AppError::Unauthorized(_))
        ));
    }
}

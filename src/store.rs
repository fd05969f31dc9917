use crate::db::Database;
use crate::error::StoreError;
use crate::models::{Campground, CampgroundInput, Geometry, Image, Review, ReviewInput, User, UserSummary};
use chrono::{DateTime, Utc};
use rusqlite::{params, types::Type, Connection, ErrorCode, OptionalExtension, Params, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::views::DEFAULT_CENTER;

const CAMPGROUND_COLUMNS: &str =
    "id, author_id, title, description, location, price, longitude, latitude, created_at, updated_at";

const REVIEW_COLUMNS: &str = "id, campground_id, author_id, rating, body, created_at";

fn uuid_at(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn time_at(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

// Users

pub async fn insert_user(
    db: &Database,
    username: &str,
    email: &str,
    password_hash: &str,
) -> Result<User, StoreError> {
    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        username: username.to_string(),
        email: email.to_string(),
        password_hash: password_hash.to_string(),
        created_at: now,
        updated_at: now,
    };

    let result = db.lock().await.execute(
        "INSERT INTO users (id, username, email, password_hash, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        params![
            user.id.to_string(),
            user.username,
            user.email,
            user.password_hash,
            now.to_rfc3339(),
            now.to_rfc3339()
        ],
    );

    match result {
        Ok(_) => {
            info!(user_id = %user.id, username = %user.username, "user registered");
            Ok(user)
        }
        Err(e) if is_constraint_violation(&e) => Err(StoreError::Conflict(
            "A user with the given username or email".to_string(),
        )),
        Err(e) => Err(e.into()),
    }
}

pub async fn find_user_by_username(db: &Database, username: &str) -> Result<Option<User>, StoreError> {
    let user = db
        .lock()
        .await
        .query_row(
            "SELECT id, username, email, password_hash, created_at, updated_at FROM users WHERE username = ?",
            [username],
            |row| {
                Ok(User {
                    id: uuid_at(row, 0)?,
                    username: row.get(1)?,
                    email: row.get(2)?,
                    password_hash: row.get(3)?,
                    created_at: time_at(row, 4)?,
                    updated_at: time_at(row, 5)?,
                })
            },
        )
        .optional()?;
    Ok(user)
}

pub async fn find_user_summary(db: &Database, id: Uuid) -> Result<Option<UserSummary>, StoreError> {
    let user = db
        .lock()
        .await
        .query_row(
            "SELECT id, username FROM users WHERE id = ?",
            [id.to_string()],
            |row| {
                Ok(UserSummary {
                    id: uuid_at(row, 0)?,
                    username: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(user)
}

// Campgrounds

fn campground_from_row(row: &Row) -> rusqlite::Result<Campground> {
    Ok(Campground {
        id: uuid_at(row, 0)?,
        author_id: uuid_at(row, 1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        location: row.get(4)?,
        price: row.get(5)?,
        geometry: Geometry::point(row.get(6)?, row.get(7)?),
        images: Vec::new(),
        reviews: Vec::new(),
        created_at: time_at(row, 8)?,
        updated_at: time_at(row, 9)?,
    })
}

fn attach_children(conn: &Connection, campground: &mut Campground) -> rusqlite::Result<()> {
    let id = campground.id.to_string();

    let mut stmt = conn.prepare(
        "SELECT url, filename FROM campground_images WHERE campground_id = ? ORDER BY position",
    )?;
    campground.images = stmt
        .query_map([&id], |row| {
            Ok(Image {
                url: row.get(0)?,
                filename: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt =
        conn.prepare("SELECT id FROM reviews WHERE campground_id = ? ORDER BY created_at, rowid")?;
    campground.reviews = stmt
        .query_map([&id], |row| uuid_at(row, 0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(())
}

fn load_campgrounds<P: Params>(conn: &Connection, sql: &str, params: P) -> rusqlite::Result<Vec<Campground>> {
    let mut stmt = conn.prepare(sql)?;
    let mut campgrounds = stmt
        .query_map(params, campground_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for campground in &mut campgrounds {
        attach_children(conn, campground)?;
    }
    Ok(campgrounds)
}

fn find_campground_in(conn: &Connection, id: Uuid) -> rusqlite::Result<Option<Campground>> {
    let sql = format!("SELECT {CAMPGROUND_COLUMNS} FROM campgrounds WHERE id = ?");
    let mut campground = conn
        .query_row(&sql, [id.to_string()], campground_from_row)
        .optional()?;
    if let Some(campground) = campground.as_mut() {
        attach_children(conn, campground)?;
    }
    Ok(campground)
}

fn insert_images(conn: &Connection, campground_id: Uuid, images: &[Image]) -> rusqlite::Result<()> {
    let next: i64 = conn.query_row(
        "SELECT COALESCE(MAX(position) + 1, 0) FROM campground_images WHERE campground_id = ?",
        [campground_id.to_string()],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(
        "INSERT INTO campground_images (campground_id, position, url, filename) VALUES (?, ?, ?, ?)",
    )?;
    for (offset, image) in images.iter().enumerate() {
        stmt.execute(params![
            campground_id.to_string(),
            next + offset as i64,
            image.url,
            image.filename
        ])?;
    }
    Ok(())
}

pub async fn insert_campground(
    db: &Database,
    author_id: Uuid,
    input: &CampgroundInput,
    images: &[Image],
) -> Result<Campground, StoreError> {
    let now = Utc::now();
    let geometry = input
        .geometry
        .unwrap_or(Geometry::point(DEFAULT_CENTER[0], DEFAULT_CENTER[1]));
    let [longitude, latitude] = geometry.coordinates();
    let campground = Campground {
        id: Uuid::new_v4(),
        author_id,
        title: input.title.clone(),
        description: input.description.clone(),
        location: input.location.clone(),
        price: input.price,
        geometry,
        images: images.to_vec(),
        reviews: Vec::new(),
        created_at: now,
        updated_at: now,
    };

    let mut conn = db.lock().await;
    let tx = conn.transaction()?;
    tx.execute(
        &format!("INSERT INTO campgrounds ({CAMPGROUND_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
        params![
            campground.id.to_string(),
            author_id.to_string(),
            campground.title,
            campground.description,
            campground.location,
            campground.price,
            longitude,
            latitude,
            now.to_rfc3339(),
            now.to_rfc3339()
        ],
    )?;
    insert_images(&tx, campground.id, images)?;
    tx.commit()?;

    info!(campground_id = %campground.id, %author_id, "campground created");
    Ok(campground)
}

pub async fn find_campground(db: &Database, id: Uuid) -> Result<Option<Campground>, StoreError> {
    let conn = db.lock().await;
    Ok(find_campground_in(&conn, id)?)
}

pub async fn list_campgrounds(db: &Database) -> Result<Vec<Campground>, StoreError> {
    let conn = db.lock().await;
    let sql = format!("SELECT {CAMPGROUND_COLUMNS} FROM campgrounds ORDER BY created_at DESC, rowid DESC");
    Ok(load_campgrounds(&conn, &sql, [])?)
}

/// Up to `limit` campgrounds in storage order.
pub async fn featured_campgrounds(db: &Database, limit: usize) -> Result<Vec<Campground>, StoreError> {
    let conn = db.lock().await;
    let sql = format!("SELECT {CAMPGROUND_COLUMNS} FROM campgrounds LIMIT ?");
    Ok(load_campgrounds(&conn, &sql, [limit as i64])?)
}

/// Result of [`update_campground`].
#[derive(Debug)]
pub struct CampgroundEdit {
    pub campground: Campground,
    /// Image records dropped by the edit.
    pub removed: Vec<Image>,
}

fn remove_images_in(conn: &Connection, id: Uuid, filenames: &[String]) -> rusqlite::Result<Vec<Image>> {
    let mut select =
        conn.prepare("SELECT url, filename FROM campground_images WHERE campground_id = ? AND filename = ?")?;
    let mut delete = conn.prepare("DELETE FROM campground_images WHERE campground_id = ? AND filename = ?")?;

    let mut removed = Vec::new();
    for filename in filenames {
        let matched = select
            .query_map(params![id.to_string(), filename], |row| {
                Ok(Image {
                    url: row.get(0)?,
                    filename: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        delete.execute(params![id.to_string(), filename])?;
        removed.extend(matched);
    }
    Ok(removed)
}

/// Applies an edit: new field values, then appended images, then removal of
/// the images whose filename is listed. A `None` geometry keeps the stored
/// position. Everything commits together or not at all. Returns `None` for
/// a missing id.
pub async fn update_campground(
    db: &Database,
    id: Uuid,
    input: &CampgroundInput,
    images: &[Image],
    delete_images: &[String],
) -> Result<Option<CampgroundEdit>, StoreError> {
    let (longitude, latitude) = match input.geometry {
        Some(geometry) => {
            let [longitude, latitude] = geometry.coordinates();
            (Some(longitude), Some(latitude))
        }
        None => (None, None),
    };

    let mut conn = db.lock().await;
    let tx = conn.transaction()?;
    let updated = tx.execute(
        "UPDATE campgrounds SET title = ?, description = ?, location = ?, price = ?,
            longitude = COALESCE(?, longitude), latitude = COALESCE(?, latitude), updated_at = ?
         WHERE id = ?",
        params![
            input.title,
            input.description,
            input.location,
            input.price,
            longitude,
            latitude,
            Utc::now().to_rfc3339(),
            id.to_string()
        ],
    )?;
    if updated == 0 {
        return Ok(None);
    }

    insert_images(&tx, id, images)?;
    let removed = remove_images_in(&tx, id, delete_images)?;
    let campground = find_campground_in(&tx, id)?;
    tx.commit()?;

    debug!(
        campground_id = %id,
        added = images.len(),
        removed = removed.len(),
        "campground updated"
    );
    Ok(campground.map(|campground| CampgroundEdit { campground, removed }))
}

pub async fn append_images(db: &Database, id: Uuid, images: &[Image]) -> Result<(), StoreError> {
    let mut conn = db.lock().await;
    let tx = conn.transaction()?;
    insert_images(&tx, id, images)?;
    tx.commit()?;
    debug!(campground_id = %id, count = images.len(), "images attached");
    Ok(())
}

/// Deletes a campground and every review in its `reviews` list.
///
/// Both deletes run in one transaction: if the review step fails the
/// campground is kept and the error is returned. A missing id is a no-op and
/// yields `None`.
pub async fn delete_campground_cascade(db: &Database, id: Uuid) -> Result<Option<Campground>, StoreError> {
    let mut conn = db.lock().await;
    let tx = conn.transaction()?;

    let Some(campground) = find_campground_in(&tx, id)? else {
        debug!(campground_id = %id, "delete of missing campground");
        return Ok(None);
    };

    let deleted = tx.execute("DELETE FROM campgrounds WHERE id = ?", [id.to_string()])?;
    if deleted == 0 {
        return Ok(None);
    }

    let mut reviews_deleted = 0;
    {
        let mut delete_review = tx.prepare("DELETE FROM reviews WHERE id = ?")?;
        for review_id in &campground.reviews {
            reviews_deleted += delete_review.execute([review_id.to_string()])?;
        }
    }
    tx.commit()?;

    info!(campground_id = %id, reviews_deleted, "campground deleted");
    Ok(Some(campground))
}

// Reviews

fn review_from_row(row: &Row) -> rusqlite::Result<Review> {
    Ok(Review {
        id: uuid_at(row, 0)?,
        campground_id: uuid_at(row, 1)?,
        author_id: uuid_at(row, 2)?,
        rating: row.get(3)?,
        body: row.get(4)?,
        created_at: time_at(row, 5)?,
    })
}

pub async fn insert_review(
    db: &Database,
    campground_id: Uuid,
    author_id: Uuid,
    input: &ReviewInput,
) -> Result<Review, StoreError> {
    let review = Review {
        id: Uuid::new_v4(),
        campground_id,
        author_id,
        rating: input.rating,
        body: input.body.clone(),
        created_at: Utc::now(),
    };

    db.lock().await.execute(
        &format!("INSERT INTO reviews ({REVIEW_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)"),
        params![
            review.id.to_string(),
            campground_id.to_string(),
            author_id.to_string(),
            review.rating,
            review.body,
            review.created_at.to_rfc3339()
        ],
    )?;

    info!(review_id = %review.id, %campground_id, "review created");
    Ok(review)
}

pub async fn find_review(db: &Database, id: Uuid) -> Result<Option<Review>, StoreError> {
    let review = db
        .lock()
        .await
        .query_row(
            &format!("SELECT {REVIEW_COLUMNS} FROM reviews WHERE id = ?"),
            [id.to_string()],
            review_from_row,
        )
        .optional()?;
    Ok(review)
}

pub async fn list_reviews(db: &Database, campground_id: Uuid) -> Result<Vec<Review>, StoreError> {
    let conn = db.lock().await;
    let mut stmt = conn.prepare(&format!(
        "SELECT {REVIEW_COLUMNS} FROM reviews WHERE campground_id = ? ORDER BY created_at, rowid"
    ))?;
    let reviews = stmt
        .query_map([campground_id.to_string()], review_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(reviews)
}

pub async fn delete_review(db: &Database, campground_id: Uuid, review_id: Uuid) -> Result<bool, StoreError> {
    let deleted = db.lock().await.execute(
        "DELETE FROM reviews WHERE id = ? AND campground_id = ?",
        params![review_id.to_string(), campground_id.to_string()],
    )?;
    if deleted > 0 {
        info!(%review_id, %campground_id, "review deleted");
    }
    Ok(deleted > 0)
}

// Counts

async fn count_rows(db: &Database, table: &'static str) -> Result<u64, StoreError> {
    let count: i64 = db
        .lock()
        .await
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    Ok(count as u64)
}

pub async fn count_campgrounds(db: &Database) -> Result<u64, StoreError> {
    count_rows(db, "campgrounds").await
}

pub async fn count_reviews(db: &Database) -> Result<u64, StoreError> {
    count_rows(db, "reviews").await
}

pub async fn count_users(db: &Database) -> Result<u64, StoreError> {
    count_rows(db, "users").await
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) async fn seed_user(db: &Database, name: &str) -> User {
        insert_user(db, name, &format!("{name}@example.com"), "not-a-real-hash")
            .await
            .unwrap()
    }

    pub(crate) fn sample_input(title: &str) -> CampgroundInput {
        CampgroundInput {
            title: title.to_string(),
            description: "Quiet pines by the water".to_string(),
            location: "Bend, Oregon".to_string(),
            price: 24.5,
            geometry: Some(Geometry::point(-121.3153, 44.0582)),
        }
    }

    fn image(name: &str) -> Image {
        Image {
            url: format!("https://res.cloudinary.com/demo/image/upload/{name}.jpg"),
            filename: format!("ReCamp/{name}"),
        }
    }

    async fn reviews_referencing(db: &Database, campground_id: Uuid) -> i64 {
        db.lock()
            .await
            .query_row(
                "SELECT COUNT(*) FROM reviews WHERE campground_id = ?",
                [campground_id.to_string()],
                |row| row.get(0),
            )
            .unwrap()
    }

    async fn campground_with_reviews(db: &Database, n: usize) -> Campground {
        let owner = seed_user(db, &format!("owner{n}")).await;
        let reviewer = seed_user(db, &format!("reviewer{n}")).await;
        let campground = insert_campground(db, owner.id, &sample_input("Misty Pines Camp"), &[])
            .await
            .unwrap();
        for i in 0..n {
            let input = ReviewInput {
                rating: (i % 5 + 1) as u8,
                body: format!("visit {i}"),
            };
            insert_review(db, campground.id, reviewer.id, &input).await.unwrap();
        }
        campground
    }

    #[tokio::test]
    async fn duplicate_username_is_a_conflict() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "ana").await;

        let err = insert_user(&db, "ana", "other@example.com", "hash").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn campground_round_trips_with_images_and_reviews() {
        let db = Database::open_in_memory().unwrap();
        let campground = campground_with_reviews(&db, 2).await;
        append_images(&db, campground.id, &[image("a"), image("b")]).await.unwrap();

        let loaded = find_campground(&db, campground.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Misty Pines Camp");
        assert_eq!(loaded.geometry.coordinates(), [-121.3153, 44.0582]);
        assert_eq!(loaded.images, vec![image("a"), image("b")]);
        assert_eq!(loaded.reviews.len(), 2);
    }

    #[tokio::test]
    async fn cascade_delete_leaves_no_reviews() {
        for n in [0, 1, 7] {
            let db = Database::open_in_memory().unwrap();
            let campground = campground_with_reviews(&db, n).await;
            assert_eq!(reviews_referencing(&db, campground.id).await, n as i64);

            let deleted = delete_campground_cascade(&db, campground.id).await.unwrap().unwrap();
            assert_eq!(deleted.reviews.len(), n);
            assert_eq!(reviews_referencing(&db, campground.id).await, 0);
            assert!(find_campground(&db, campground.id).await.unwrap().is_none());
            assert_eq!(count_reviews(&db).await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn cascade_delete_keeps_other_campgrounds_reviews() {
        let db = Database::open_in_memory().unwrap();
        let doomed = campground_with_reviews(&db, 3).await;
        let kept = campground_with_reviews(&db, 2).await;

        delete_campground_cascade(&db, doomed.id).await.unwrap();
        assert_eq!(reviews_referencing(&db, kept.id).await, 2);
    }

    #[tokio::test]
    async fn cascade_delete_of_missing_id_is_a_noop() {
        let db = Database::open_in_memory().unwrap();
        let campground = campground_with_reviews(&db, 1).await;

        let result = delete_campground_cascade(&db, Uuid::new_v4()).await.unwrap();
        assert!(result.is_none());
        assert_eq!(count_campgrounds(&db).await.unwrap(), 1);
        assert_eq!(reviews_referencing(&db, campground.id).await, 1);
    }

    #[tokio::test]
    async fn failed_review_step_rolls_back_campground_delete() {
        let db = Database::open_in_memory().unwrap();
        let campground = campground_with_reviews(&db, 2).await;
        db.lock()
            .await
            .execute_batch(
                "CREATE TRIGGER block_review_delete BEFORE DELETE ON reviews
                 BEGIN SELECT RAISE(ABORT, 'reviews are locked'); END;",
            )
            .unwrap();

        assert!(delete_campground_cascade(&db, campground.id).await.is_err());
        assert!(find_campground(&db, campground.id).await.unwrap().is_some());
        assert_eq!(reviews_referencing(&db, campground.id).await, 2);
    }

    #[tokio::test]
    async fn edit_removes_only_named_images() {
        let db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "owner").await;
        let campground = insert_campground(
            &db,
            owner.id,
            &sample_input("Crystal Lake Shore"),
            &[image("a"), image("b"), image("c")],
        )
        .await
        .unwrap();

        let edit = update_campground(
            &db,
            campground.id,
            &sample_input("Crystal Lake Shore"),
            &[image("d")],
            &["ReCamp/b".to_string(), "ReCamp/missing".to_string()],
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(edit.removed, vec![image("b")]);
        assert_eq!(edit.campground.images, vec![image("a"), image("c"), image("d")]);
    }

    #[tokio::test]
    async fn edit_without_geometry_keeps_position() {
        let db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "owner").await;
        let campground = insert_campground(&db, owner.id, &sample_input("Juniper Flat"), &[])
            .await
            .unwrap();

        let mut input = sample_input("Juniper Flat North");
        input.geometry = None;
        let edit = update_campground(&db, campground.id, &input, &[], &[])
            .await
            .unwrap()
            .unwrap();

        assert_eq!(edit.campground.title, "Juniper Flat North");
        assert_eq!(edit.campground.geometry.coordinates(), [-121.3153, 44.0582]);
    }

    #[tokio::test]
    async fn new_campground_without_geometry_uses_default_center() {
        let db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "owner").await;
        let mut input = sample_input("Prairie Wind");
        input.geometry = None;

        let campground = insert_campground(&db, owner.id, &input, &[]).await.unwrap();
        let loaded = find_campground(&db, campground.id).await.unwrap().unwrap();
        assert_eq!(loaded.geometry.coordinates(), DEFAULT_CENTER);
    }

    #[tokio::test]
    async fn failed_edit_leaves_campground_untouched() {
        let db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "owner").await;
        let campground = insert_campground(&db, owner.id, &sample_input("Lone Pine"), &[image("a")])
            .await
            .unwrap();
        db.lock()
            .await
            .execute_batch(
                "CREATE TRIGGER block_image_delete BEFORE DELETE ON campground_images
                 BEGIN SELECT RAISE(ABORT, 'images are locked'); END;",
            )
            .unwrap();

        let result = update_campground(
            &db,
            campground.id,
            &sample_input("Lone Pine Renamed"),
            &[image("b")],
            &["ReCamp/a".to_string()],
        )
        .await;
        assert!(result.is_err());

        let loaded = find_campground(&db, campground.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Lone Pine");
        assert_eq!(loaded.images, vec![image("a")]);
    }

    #[tokio::test]
    async fn update_missing_campground_returns_none() {
        let db = Database::open_in_memory().unwrap();
        let result = update_campground(&db, Uuid::new_v4(), &sample_input("Nowhere"), &[], &[])
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn featured_respects_limit() {
        let db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "owner").await;
        for i in 0..5 {
            insert_campground(&db, owner.id, &sample_input(&format!("Camp {i}")), &[])
                .await
                .unwrap();
        }

        assert_eq!(featured_campgrounds(&db, 3).await.unwrap().len(), 3);
        assert_eq!(list_campgrounds(&db).await.unwrap().len(), 5);
        assert_eq!(count_users(&db).await.unwrap(), 1);
    }
}

use serde::Serialize;
use tracing::error;

use crate::db::Database;
use crate::error::StoreError;
use crate::store;
use crate::views::{default_image, CampgroundView};

const FEATURED_LIMIT: usize = 3;

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct Stats {
    pub campgrounds: u64,
    pub reviews: u64,
    pub users: u64,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeSummary {
    pub featured_campgrounds: Vec<CampgroundView>,
    pub stats: Stats,
}

/// Landing page data. Never fails: any read error is logged and an empty
/// summary with zeroed counts is returned instead.
pub async fn home_summary(db: &Database) -> HomeSummary {
    match load(db).await {
        Ok(summary) => summary,
        Err(err) => {
            error!("home aggregation failed, serving empty summary: {err}");
            HomeSummary::default()
        }
    }
}

async fn load(db: &Database) -> Result<HomeSummary, StoreError> {
    let mut featured = store::featured_campgrounds(db, FEATURED_LIMIT).await?;
    let stats = Stats {
        campgrounds: store::count_campgrounds(db).await?,
        reviews: store::count_reviews(db).await?,
        users: store::count_users(db).await?,
    };

    for campground in &mut featured {
        if campground.images.is_empty() {
            campground.images.push(default_image());
        }
    }

    Ok(HomeSummary {
        featured_campgrounds: featured.iter().map(CampgroundView::from).collect(),
        stats,
    })
}

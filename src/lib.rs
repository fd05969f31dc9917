//! Campground listings: users register and log in, list campgrounds with
//! images and coordinates, and review each other's campgrounds. A landing
//! endpoint summarizes the catalogue and a cluster map shows every listing.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod home;
pub mod map;
pub mod middleware;
pub mod models;
pub mod store;
pub mod validation;
pub mod views;


use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use tokio::{net::TcpListener, signal};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use config::Config;
use db::Database;

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
}

pub fn build_router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/", get(handlers::home))
        .route("/register", post(handlers::register_user))
        .route("/login", post(handlers::login_user))
        .route("/logout", post(handlers::logout_user))
        .route(
            "/campgrounds",
            get(handlers::list_campgrounds).post(handlers::create_campground),
        )
        .route("/campgrounds/map-config", get(handlers::map_config))
        .route(
            "/campgrounds/:id",
            get(handlers::show_campground)
                .put(handlers::update_campground)
                .delete(handlers::delete_campground),
        )
        .route(
            "/campgrounds/:id/images",
            post(handlers::upload_images).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/campgrounds/:id/reviews", post(handlers::create_review))
        .route(
            "/campgrounds/:id/reviews/:review_id",
            delete(handlers::delete_review),
        )
        .route("/upload/*path", get(handlers::serve_upload))
        .layer(TraceLayer::new_for_http());

    if state.config.secure_headers {
        app = app.layer(axum::middleware::from_fn(middleware::security_headers));
    }

    app.with_state(state)
}

pub async fn start_server() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("recamp=info,tower_http=info")),
        )
        .init();

    let config = Config::load()?;
    let db = Database::open(&config.database_path)?;
    tokio::fs::create_dir_all(&config.upload_dir).await?;

    let address = format!("0.0.0.0:{}", config.port);
    let app = build_router(AppState {
        db: db.clone(),
        config: Arc::new(config),
    });

    let listener = TcpListener::bind(&address).await?;
    info!("Server running on http://{address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutting down...");
    db.close().await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(err) => {
                warn!("Failed to install Ctrl+C handler: {err}");
                std::future::pending::<()>().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(err) => {
                warn!("Failed to install signal handler: {err}");
                std::future::pending::<()>().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

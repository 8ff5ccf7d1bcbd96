//! Route modules for VidVault Server

pub mod health;
pub mod upload;
pub mod videos;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue},
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full application router
pub fn router(state: AppState) -> Router {
    let server = &state.config().server;
    let public_dir = server.public_dir.clone();

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Videos are large; only cap bodies when configured to
    let body_limit = match server.max_upload_bytes {
        Some(limit) => DefaultBodyLimit::max(limit),
        None => DefaultBodyLimit::disable(),
    };

    Router::new()
        .route("/health", get(health::health_check))
        .route("/upload", post(upload::upload_video))
        .route("/videos", get(videos::list_videos))
        .route("/videos/:id", get(videos::stream_video))
        .fallback_service(ServeDir::new(public_dir))
        .layer(body_limit)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("SAMEORIGIN"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub mod auth;
pub mod cases;
pub mod error;
pub mod matching;
pub mod middleware;
pub mod photos;
pub mod registration;
pub mod storage;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use finder_db::Database;

use crate::error::ApiError;
use crate::matching::{CaseMatcher, RandomMatcher};
use crate::storage::PhotoStore;

/// 10 MB default photo limit
pub const DEFAULT_MAX_PHOTO_BYTES: usize = 10 * 1024 * 1024;

/// Room for the text fields of a registration form on top of the photo.
const FORM_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Body limit for `/face-match`, whose photo arrives base64-encoded inside
/// JSON and so takes 4 bytes per 3 of image.
pub fn match_body_limit(max_photo_bytes: usize) -> usize {
    max_photo_bytes.div_ceil(3) * 4 + FORM_OVERHEAD_BYTES
}

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    pub photos: PhotoStore,
    pub matcher: Box<dyn CaseMatcher>,
    pub max_photo_bytes: usize,
}

impl AppStateInner {
    pub fn new(db: Database, jwt_secret: String, photos: PhotoStore) -> Self {
        Self {
            db,
            jwt_secret,
            token_ttl: chrono::Duration::days(30),
            photos,
            matcher: Box::new(RandomMatcher),
            max_photo_bytes: DEFAULT_MAX_PHOTO_BYTES,
        }
    }
}

/// Run a blocking database call off the async runtime.
pub(crate) async fn run_db<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    let result = tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))?;
    Ok(result?)
}

/// All routes, with auth applied where needed. Transport layers (CORS,
/// tracing) are added by the binary.
pub fn router(state: AppState) -> Router {
    let body_limit = state.max_photo_bytes + FORM_OVERHEAD_BYTES;

    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/cases", get(cases::list_cases))
        .route("/cases/stats", get(cases::case_stats))
        .route("/cases/{case_id}", get(cases::get_case))
        .route("/photos/{user_id}/{file_name}", get(photos::serve_photo))
        .route("/health", get(health));

    let protected_routes = Router::new()
        .route("/auth/session", get(auth::session))
        .route("/cases", post(registration::register_case))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_auth));

    // Credentials are optional here but must be valid when present
    let match_routes = Router::new()
        .route("/face-match", post(matching::face_match))
        .route_layer(from_fn_with_state(state.clone(), middleware::optional_auth))
        .layer(DefaultBodyLimit::max(match_body_limit(state.max_photo_bytes)));

    Router::new()
        .merge(public_routes.layer(DefaultBodyLimit::max(body_limit)))
        .merge(protected_routes.layer(DefaultBodyLimit::max(body_limit)))
        .merge(match_routes)
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

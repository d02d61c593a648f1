//! HTTP API over the store and the running processor.
//!
//! All routes are served under `/api` and speak JSON.

pub mod dto;
pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::{delete, get};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::processor::ProcessorHandle;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub processor: ProcessorHandle,
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(handlers::status))
        .route("/urls", get(handlers::list_urls).post(handlers::add_url))
        .route("/urls/{id}", delete(handlers::delete_url))
        .route("/files", get(handlers::list_files))
        .route("/files/{id}", get(handlers::get_file))
        .route(
            "/categories",
            get(handlers::list_categories).post(handlers::create_category),
        )
}

/// Build the application router. `cors_origin` allows one extra origin.
pub fn router(state: AppState, cors_origin: Option<HeaderValue>) -> Router {
    let mut app = Router::new()
        .nest("/api", api_routes().with_state(state))
        .layer(TraceLayer::new_for_http());

    if let Some(origin) = cors_origin {
        app = app.layer(
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }
    app
}

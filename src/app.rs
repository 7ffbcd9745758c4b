use axum::{middleware, routing::get, Router};
use tower_http::services::ServeDir;

use crate::cancellable_sse::cancel_stream;
use crate::handlers::{generate, health};
use crate::middleware::tracing::trace_requests;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let static_files = ServeDir::new(&state.config.static_dir);

    Router::new()
        .route("/generate", get(health).post(generate))
        .route("/api/generate", get(health).post(generate))
        .route("/api/cancel-stream", get(cancel_stream))
        .fallback_service(static_files)
        .layer(middleware::from_fn(trace_requests))
        .with_state(state)
}

// API module - HTTP endpoints

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::jobs::pass_update_processor::PassUpdateProcessor;
use crate::services::card_source::CardSource;
use crate::services::pass_pipeline::PassPipeline;

pub mod outbox;
pub mod passes;

/// Shared handles for every handler
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<PassPipeline>,
    pub cards: Arc<dyn CardSource>,
    pub processor: Arc<PassUpdateProcessor>,
    pub outbox_batch_size: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .merge(passes::router())
        .merge(outbox::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

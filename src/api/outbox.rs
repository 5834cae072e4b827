use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::api::AppState;
use crate::error::Result;
use crate::jobs::outbox_store::OutboxStore;
use crate::jobs::pass_update_processor::{DrainReport, TracingEventSink};
use crate::models::outbox::OutboxStatus;

#[derive(Debug, Deserialize)]
pub struct DrainParams {
    pub batch_size: Option<usize>,
}

/// Drains one batch now instead of waiting for the schedule
async fn drain(
    State(state): State<AppState>,
    Query(params): Query<DrainParams>,
) -> Result<Json<DrainReport>> {
    let batch_size = params.batch_size.unwrap_or(state.outbox_batch_size);
    let report = state.processor.drain(batch_size, &TracingEventSink).await?;
    Ok(Json(report))
}

async fn status(State(state): State<AppState>) -> Result<Json<OutboxStatus>> {
    let status = state.processor.store().status().await?;
    Ok(Json(status))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/outbox/drain", post(drain))
        .route("/outbox/status", get(status))
}

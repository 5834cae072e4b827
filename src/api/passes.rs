use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::models::{pass_metadata::IssuedCardSnapshot, platform::Platform};
use crate::services::apple_pass::PKPASS_MIME_TYPE;
use crate::services::card_source::CardSource;
use crate::services::google_pass::GoogleWalletPass;
use crate::services::pass_pipeline::PassArtifact;
use crate::services::qr_generator;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleSaveResponse {
    #[serde(flatten)]
    pub pass: GoogleWalletPass,
    pub save_url: String,
}

async fn load_card(state: &AppState, card_id: Uuid) -> Result<Arc<IssuedCardSnapshot>> {
    state
        .cards
        .load_snapshot(card_id)
        .await?
        .map(Arc::new)
        .ok_or_else(|| AppError::NotFound(format!("Issued card {} not found", card_id)))
}

async fn build(state: &AppState, card_id: Uuid, platform: Platform) -> Result<PassArtifact> {
    let snapshot = load_card(state, card_id).await?;
    let artifact = state.pipeline.build_blocking(snapshot, platform).await?;

    tracing::info!(card_id = %card_id, %platform, bytes = artifact.size(), "Pass built on request");
    Ok(artifact)
}

fn unexpected(platform: Platform) -> AppError {
    AppError::Internal(anyhow::anyhow!("pipeline returned a non-{} artifact", platform))
}

async fn apple_pass(State(state): State<AppState>, Path(card_id): Path<Uuid>) -> Result<Response> {
    let PassArtifact::Apple(archive) = build(&state, card_id, Platform::Apple).await? else {
        return Err(unexpected(Platform::Apple));
    };

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, PKPASS_MIME_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.pkpass\"", card_id),
            ),
        ],
        archive,
    )
        .into_response())
}

async fn google_pass(
    State(state): State<AppState>,
    Path(card_id): Path<Uuid>,
) -> Result<Json<GoogleSaveResponse>> {
    let PassArtifact::Google(pass) = build(&state, card_id, Platform::Google).await? else {
        return Err(unexpected(Platform::Google));
    };

    let save_url = pass.save_url();
    Ok(Json(GoogleSaveResponse { pass, save_url }))
}

async fn pwa_card(
    State(state): State<AppState>,
    Path(card_id): Path<Uuid>,
) -> Result<Html<String>> {
    let PassArtifact::Pwa(html) = build(&state, card_id, Platform::Pwa).await? else {
        return Err(unexpected(Platform::Pwa));
    };

    Ok(Html(html))
}

async fn card_qr(State(state): State<AppState>, Path(card_id): Path<Uuid>) -> Result<Response> {
    let snapshot = load_card(&state, card_id).await?;
    let svg = qr_generator::generate_qr_svg(&snapshot.issued_card_id.to_string())
        .map_err(|e| AppError::Internal(e.into()))?;

    Ok((StatusCode::OK, [(header::CONTENT_TYPE, "image/svg+xml")], svg).into_response())
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/passes/:card_id/apple", get(apple_pass))
        .route("/passes/:card_id/google", get(google_pass))
        .route("/passes/:card_id/card", get(pwa_card))
        .route("/passes/:card_id/qr", get(card_qr))
}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::platform::Platform;

/// Pipeline step a platform build failed in, reported alongside build errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStep {
    Descriptor,
    Manifest,
    Signature,
    Packaging,
    Assertion,
    Render,
    /// Blocking build task panicked or was cancelled
    Worker,
}

impl std::fmt::Display for BuildStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let step = match self {
            BuildStep::Descriptor => "descriptor",
            BuildStep::Manifest => "manifest",
            BuildStep::Signature => "signature",
            BuildStep::Packaging => "packaging",
            BuildStep::Assertion => "assertion",
            BuildStep::Render => "render",
            BuildStep::Worker => "worker",
        };
        f.write_str(step)
    }
}

/// Failures raised while turning a progress snapshot into a pass artifact
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PassError {
    #[error("Invalid progress: {0}")]
    InvalidProgress(String),

    #[error("{platform} signing unavailable: {reason}")]
    SigningUnavailable { platform: Platform, reason: String },

    #[error("{platform} asset missing: {asset}")]
    AssetMissing { platform: Platform, asset: String },

    #[error("{platform} barcode validation failed: {}", issues.join("; "))]
    PlatformValidationFailed {
        platform: Platform,
        issues: Vec<String>,
    },

    #[error("{platform} build failed at {step} step: {reason}")]
    BuildFailed {
        platform: Platform,
        step: BuildStep,
        reason: String,
    },

    #[error("Outbox record {0} is already terminal")]
    QueueRecordTerminal(Uuid),
}

impl PassError {
    pub fn signing_unavailable(platform: Platform, reason: impl Into<String>) -> Self {
        PassError::SigningUnavailable {
            platform,
            reason: reason.into(),
        }
    }

    pub fn build_failed(platform: Platform, step: BuildStep, reason: impl ToString) -> Self {
        PassError::BuildFailed {
            platform,
            step,
            reason: reason.to_string(),
        }
    }

    /// Platform the failure belongs to, if it is platform specific
    pub fn platform(&self) -> Option<Platform> {
        match self {
            PassError::SigningUnavailable { platform, .. }
            | PassError::AssetMissing { platform, .. }
            | PassError::PlatformValidationFailed { platform, .. }
            | PassError::BuildFailed { platform, .. } => Some(*platform),
            PassError::InvalidProgress(_) | PassError::QueueRecordTerminal(_) => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Pass(#[from] PassError),

    #[error("Outbox error: {0}")]
    Outbox(#[from] crate::jobs::outbox_store::OutboxError),

    #[error("Card source error: {0}")]
    CardSource(#[from] crate::services::card_source::CardSourceError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let error_debug = format!("{:?}", self);

        let (status, error_message) = match self {
            AppError::Pass(e) => {
                let status = match e {
                    PassError::InvalidProgress(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    PassError::SigningUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                    PassError::QueueRecordTerminal(_) => StatusCode::CONFLICT,
                    PassError::AssetMissing { .. }
                    | PassError::PlatformValidationFailed { .. }
                    | PassError::BuildFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
            AppError::Outbox(_) | AppError::CardSource(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
            ),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": error_debug,
            "message": error_message,
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

use std::sync::Arc;

use crate::error::{BuildStep, PassError};
use crate::models::{pass_metadata::IssuedCardSnapshot, platform::Platform};
use crate::services::apple_pass::ApplePassBuilder;
use crate::services::credentials::CredentialProvider;
use crate::services::google_pass::{GooglePassBuilder, GoogleWalletPass};
use crate::services::{pwa_card, qr_generator};

/// Finished pass for one platform
#[derive(Debug, Clone)]
pub enum PassArtifact {
    /// Signed `.pkpass` archive
    Apple(Vec<u8>),
    Google(GoogleWalletPass),
    /// Standalone HTML card
    Pwa(String),
}

impl PassArtifact {
    pub fn platform(&self) -> Platform {
        match self {
            PassArtifact::Apple(_) => Platform::Apple,
            PassArtifact::Google(_) => Platform::Google,
            PassArtifact::Pwa(_) => Platform::Pwa,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            PassArtifact::Apple(bytes) => bytes.len(),
            PassArtifact::Google(pass) => pass.save_assertion.len(),
            PassArtifact::Pwa(html) => html.len(),
        }
    }
}

/// Routes a card snapshot to the builder for a platform, pulling signing
/// material for the card's business on every build.
pub struct PassPipeline {
    apple: Option<ApplePassBuilder>,
    google: Option<GooglePassBuilder>,
    credentials: Arc<dyn CredentialProvider>,
}

impl PassPipeline {
    pub fn new(
        apple: Option<ApplePassBuilder>,
        google: Option<GooglePassBuilder>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            apple,
            google,
            credentials,
        }
    }

    /// Builds one platform's artifact from freshly derived progress
    #[tracing::instrument(skip(self, snapshot), fields(card_id = %snapshot.issued_card_id))]
    pub fn build_for(
        &self,
        snapshot: &IssuedCardSnapshot,
        platform: Platform,
    ) -> Result<PassArtifact, PassError> {
        let progress = snapshot.progress()?;
        let card_id = snapshot.issued_card_id.to_string();
        let metadata = &snapshot.metadata;

        match platform {
            Platform::Apple => {
                let builder = self.apple.as_ref().ok_or_else(|| {
                    PassError::signing_unavailable(Platform::Apple, "pass type not configured")
                })?;
                let signer = self.credentials.apple_signer(snapshot.business_id)?;
                builder
                    .build(&progress, metadata, &card_id, &signer)
                    .map(PassArtifact::Apple)
            }
            Platform::Google => {
                let builder = self.google.as_ref().ok_or_else(|| {
                    PassError::signing_unavailable(Platform::Google, "issuer id not configured")
                })?;
                let account = self.credentials.google_service_account(snapshot.business_id)?;
                builder
                    .build(&progress, metadata, &card_id, &account)
                    .map(PassArtifact::Google)
            }
            Platform::Pwa => {
                let image = qr_generator::qr_data_uri(&card_id).map_err(|e| {
                    PassError::build_failed(Platform::Pwa, BuildStep::Render, e)
                })?;
                pwa_card::render(&progress, metadata, &card_id, &image).map(PassArtifact::Pwa)
            }
        }
    }

    /// Runs [`Self::build_for`] on the blocking pool; signing and zipping are
    /// CPU bound.
    pub async fn build_blocking(
        self: &Arc<Self>,
        snapshot: Arc<IssuedCardSnapshot>,
        platform: Platform,
    ) -> Result<PassArtifact, PassError> {
        let pipeline = Arc::clone(self);
        tokio::task::spawn_blocking(move || pipeline.build_for(&snapshot, platform))
            .await
            .map_err(|e| PassError::build_failed(platform, BuildStep::Worker, e))?
    }
}

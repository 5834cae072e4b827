use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use secrecy::ExposeSecret;
use uuid::Uuid;

use crate::config::Config;
use crate::error::PassError;
use crate::models::platform::Platform;
use crate::services::google_pass::ServiceAccountKey;
use crate::services::signature::PassSigner;

/// Source of per-business signing material. A platform whose material is
/// missing reports `SigningUnavailable` instead of failing the whole build.
pub trait CredentialProvider: Send + Sync {
    fn apple_signer(&self, business_id: Uuid) -> Result<Arc<PassSigner>, PassError>;

    fn google_service_account(&self, business_id: Uuid)
        -> Result<Arc<ServiceAccountKey>, PassError>;
}

/// Either loaded material or the reason it is unavailable
type Slot<T> = Result<Arc<T>, String>;

/// Credentials loaded once at startup, shared by every business unless a
/// business has its own entry.
pub struct StaticCredentials {
    apple: Slot<PassSigner>,
    google: Slot<ServiceAccountKey>,
    per_business: HashMap<Uuid, (Slot<PassSigner>, Slot<ServiceAccountKey>)>,
}

impl StaticCredentials {
    pub fn new(apple: Option<PassSigner>, google: Option<ServiceAccountKey>) -> Self {
        Self {
            apple: apple.map(Arc::new).ok_or_else(|| "certificate not configured".to_string()),
            google: google
                .map(Arc::new)
                .ok_or_else(|| "service account not configured".to_string()),
            per_business: HashMap::new(),
        }
    }

    /// Loads signing material from the configured paths. Load failures are
    /// kept as the unavailability reason so the service still starts.
    pub fn from_config(config: &Config) -> Self {
        let apple = load_apple(config).map(Arc::new).map_err(|e| {
            tracing::warn!(error = %e, "Apple Wallet passes unavailable");
            reason(e)
        });
        let google = load_google(config).map(Arc::new).map_err(|e| {
            tracing::warn!(error = %e, "Google Wallet passes unavailable");
            reason(e)
        });

        Self {
            apple,
            google,
            per_business: HashMap::new(),
        }
    }

    /// Overrides the material for one business; `None` marks it unavailable.
    pub fn with_business(
        mut self,
        business_id: Uuid,
        apple: Option<Arc<PassSigner>>,
        google: Option<Arc<ServiceAccountKey>>,
    ) -> Self {
        let missing = |what: &str| format!("{} not configured for business {}", what, business_id);
        self.per_business.insert(
            business_id,
            (
                apple.ok_or_else(|| missing("certificate")),
                google.ok_or_else(|| missing("service account")),
            ),
        );
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn apple_signer(&self, business_id: Uuid) -> Result<Arc<PassSigner>, PassError> {
        let slot = self
            .per_business
            .get(&business_id)
            .map(|(apple, _)| apple)
            .unwrap_or(&self.apple);

        slot.clone()
            .map_err(|reason| PassError::signing_unavailable(Platform::Apple, reason))
    }

    fn google_service_account(
        &self,
        business_id: Uuid,
    ) -> Result<Arc<ServiceAccountKey>, PassError> {
        let slot = self
            .per_business
            .get(&business_id)
            .map(|(_, google)| google)
            .unwrap_or(&self.google);

        slot.clone()
            .map_err(|reason| PassError::signing_unavailable(Platform::Google, reason))
    }
}

fn reason(error: PassError) -> String {
    match error {
        PassError::SigningUnavailable { reason, .. } => reason,
        other => other.to_string(),
    }
}

fn load_apple(config: &Config) -> Result<PassSigner, PassError> {
    let (Some(certificate), Some(key), Some(wwdr)) = (
        config.apple_certificate_path.as_deref(),
        config.apple_private_key_path.as_deref(),
        config.apple_wwdr_path.as_deref(),
    ) else {
        return Err(PassError::signing_unavailable(
            Platform::Apple,
            "certificate not configured",
        ));
    };

    PassSigner::from_files(
        Path::new(certificate),
        Path::new(key),
        config
            .apple_private_key_password
            .as_ref()
            .map(|p| p.expose_secret().as_str()),
        Path::new(wwdr),
    )
}

fn load_google(config: &Config) -> Result<ServiceAccountKey, PassError> {
    let path = config.google_service_account_path.as_deref().ok_or_else(|| {
        PassError::signing_unavailable(Platform::Google, "service account not configured")
    })?;

    ServiceAccountKey::from_file(Path::new(path))
}

use secrecy::Secret;
use serde::Deserialize;

use crate::jobs::pass_update_processor::MAX_BATCH_SIZE;
use crate::services::apple_pass::{ApplePassSettings, DEFAULT_EXPIRY_URGENCY_DAYS};
use crate::services::google_pass::GooglePassSettings;

const DEFAULT_OUTBOX_CRON: &str = "0 * * * * *";
const DEFAULT_CLASS_NAMESPACE: &str = "passforge";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,

    // Apple Wallet signing identity
    pub apple_pass_type_identifier: Option<String>,
    pub apple_team_identifier: Option<String>,
    pub apple_certificate_path: Option<String>,
    pub apple_private_key_path: Option<String>,
    pub apple_private_key_password: Option<Secret<String>>,
    pub apple_wwdr_path: Option<String>,
    pub apple_web_service_url: Option<String>,
    pub apple_auth_secret: Option<Secret<String>>,
    pub pass_assets_dir: String,

    // Google Wallet issuer
    pub google_issuer_id: Option<String>,
    pub google_service_account_path: Option<String>,
    pub google_class_namespace: String,
    pub google_origins: Vec<String>,
    pub google_program_logo_url: Option<String>,

    // Update outbox
    pub outbox_batch_size: usize,
    pub outbox_cron: String,
    pub pass_expiry_urgency_days: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        let secret = |key: &str| config.get::<String>(key).ok().map(Secret::new);

        Ok(Self {
            database_url: config.get("database_url")?,
            host: config.get("host").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: config.get("port")?,

            apple_pass_type_identifier: config.get("apple_pass_type_identifier").ok(),
            apple_team_identifier: config.get("apple_team_identifier").ok(),
            apple_certificate_path: config.get("apple_certificate_path").ok(),
            apple_private_key_path: config.get("apple_private_key_path").ok(),
            apple_private_key_password: secret("apple_private_key_password"),
            apple_wwdr_path: config.get("apple_wwdr_path").ok(),
            apple_web_service_url: config.get("apple_web_service_url").ok(),
            apple_auth_secret: secret("apple_auth_secret"),
            pass_assets_dir: config
                .get("pass_assets_dir")
                .unwrap_or_else(|_| "assets/pass".to_string()),

            google_issuer_id: config.get("google_issuer_id").ok(),
            google_service_account_path: config.get("google_service_account_path").ok(),
            google_class_namespace: config
                .get("google_class_namespace")
                .unwrap_or_else(|_| DEFAULT_CLASS_NAMESPACE.to_string()),
            google_origins: config
                .get::<String>("google_origins")
                .map(|raw| parse_origins(&raw))
                .unwrap_or_default(),
            google_program_logo_url: config.get("google_program_logo_url").ok(),

            outbox_batch_size: config
                .get::<usize>("outbox_batch_size")
                .unwrap_or(MAX_BATCH_SIZE)
                .clamp(1, MAX_BATCH_SIZE),
            outbox_cron: config
                .get("outbox_cron")
                .unwrap_or_else(|_| DEFAULT_OUTBOX_CRON.to_string()),
            pass_expiry_urgency_days: config
                .get("pass_expiry_urgency_days")
                .unwrap_or(DEFAULT_EXPIRY_URGENCY_DAYS),
        })
    }

    /// Apple builder settings, if the pass type and team are configured
    pub fn apple_settings(&self) -> Option<ApplePassSettings> {
        Some(ApplePassSettings {
            pass_type_identifier: non_empty(self.apple_pass_type_identifier.as_deref())?,
            team_identifier: non_empty(self.apple_team_identifier.as_deref())?,
            web_service_url: self.apple_web_service_url.clone(),
            auth_secret: self.apple_auth_secret.clone(),
            expiry_urgency_days: self.pass_expiry_urgency_days,
        })
    }

    /// Google builder settings, if an issuer id is configured
    pub fn google_settings(&self) -> Option<GooglePassSettings> {
        Some(GooglePassSettings {
            issuer_id: non_empty(self.google_issuer_id.as_deref())?,
            class_namespace: self.google_class_namespace.clone(),
            origins: self.google_origins.clone(),
            program_logo_url: self.google_program_logo_url.clone(),
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Splits a comma separated origin list, dropping blanks
pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(|origin| origin.trim_end_matches('/').to_string())
        .collect()
}

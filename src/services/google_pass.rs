use std::path::Path;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};

use crate::error::{BuildStep, PassError};
use crate::models::{
    pass_metadata::{parse_hex_color, PassMetadata},
    platform::Platform,
    progress::ProgressModel,
};
use crate::services::barcode_policy::{self, ContentDensity, SizeClass};

pub const SAVE_URL_BASE: &str = "https://pay.google.com/gp/v/save/";
const ASSERTION_TTL_SECS: i64 = 3600;

/// Service account credentials as found in the downloaded JSON key file
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: Secret<String>,
    #[serde(default)]
    pub private_key_id: Option<String>,
}

fn unavailable(reason: impl Into<String>) -> PassError {
    PassError::signing_unavailable(Platform::Google, reason)
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> Result<Self, PassError> {
        let key: Self = serde_json::from_str(json)
            .map_err(|e| unavailable(format!("malformed service account key: {}", e)))?;

        if key.client_email.trim().is_empty() {
            return Err(unavailable("service account key has no client_email"));
        }
        // Fail at load time rather than on the first build
        EncodingKey::from_rsa_pem(key.private_key.expose_secret().as_bytes())
            .map_err(|e| unavailable(format!("invalid service account private key: {}", e)))?;

        Ok(key)
    }

    pub fn from_file(path: &Path) -> Result<Self, PassError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| unavailable(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }
}

#[derive(Debug, Clone)]
pub struct GooglePassSettings {
    pub issuer_id: String,
    pub class_namespace: String,
    pub origins: Vec<String>,
    pub program_logo_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalizedString {
    pub string: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoyaltyPoints {
    pub label: String,
    pub balance: LocalizedString,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextModule {
    pub id: String,
    pub header: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectBarcode {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternate_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageUri {
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramLogo {
    pub source_uri: ImageUri,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoyaltyClass {
    pub id: String,
    pub issuer_name: String,
    pub program_name: String,
    pub review_status: String,
    pub hex_background_color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program_logo: Option<ProgramLogo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoyaltyObject {
    pub id: String,
    pub class_id: String,
    pub state: String,
    pub account_id: String,
    pub account_name: String,
    pub loyalty_points: LoyaltyPoints,
    pub secondary_loyalty_points: LoyaltyPoints,
    pub barcode: ObjectBarcode,
    pub text_modules_data: Vec<TextModule>,
    pub hex_background_color: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SavePayload<'a> {
    loyalty_classes: [&'a LoyaltyClass; 1],
    loyalty_objects: [&'a LoyaltyObject; 1],
}

#[derive(Debug, Serialize)]
struct SaveClaims<'a> {
    iss: &'a str,
    aud: &'static str,
    typ: &'static str,
    iat: i64,
    exp: i64,
    #[serde(skip_serializing_if = "no_origins")]
    origins: &'a [String],
    payload: SavePayload<'a>,
}

fn no_origins(origins: &&[String]) -> bool {
    origins.is_empty()
}

/// What a client needs to add the object to the wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleWalletPass {
    pub class_id: String,
    pub object_id: String,
    pub save_assertion: String,
}

impl GoogleWalletPass {
    pub fn save_url(&self) -> String {
        format!("{}{}", SAVE_URL_BASE, self.save_assertion)
    }
}

/// Keeps the characters wallet identifiers accept
fn sanitize_id(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn hex_background(metadata: &PassMetadata) -> String {
    metadata
        .brand_color
        .as_deref()
        .and_then(parse_hex_color)
        .map(|(r, g, b)| format!("#{:02x}{:02x}{:02x}", r, g, b))
        .unwrap_or_else(|| "#111827".to_string())
}

pub struct GooglePassBuilder {
    settings: GooglePassSettings,
}

impl GooglePassBuilder {
    pub fn new(settings: GooglePassSettings) -> Self {
        Self { settings }
    }

    pub fn class_id(&self, progress: &ProgressModel) -> String {
        format!(
            "{}.{}_{}",
            self.settings.issuer_id,
            sanitize_id(&self.settings.class_namespace),
            progress.card_kind.as_str()
        )
    }

    pub fn object_id(&self, issued_card_id: &str) -> String {
        format!("{}.{}", self.settings.issuer_id, sanitize_id(issued_card_id))
    }

    pub fn loyalty_class(&self, progress: &ProgressModel, metadata: &PassMetadata) -> LoyaltyClass {
        LoyaltyClass {
            id: self.class_id(progress),
            issuer_name: metadata.business_name.clone(),
            program_name: metadata.card_name.clone(),
            review_status: "UNDER_REVIEW".to_string(),
            hex_background_color: hex_background(metadata),
            program_logo: self.settings.program_logo_url.as_ref().map(|uri| ProgramLogo {
                source_uri: ImageUri { uri: uri.clone() },
            }),
        }
    }

    /// Loyalty object document; identical inputs give identical documents.
    pub fn loyalty_object(
        &self,
        progress: &ProgressModel,
        metadata: &PassMetadata,
        issued_card_id: &str,
    ) -> Result<LoyaltyObject, PassError> {
        let density = ContentDensity::classify(metadata);
        let config = barcode_policy::select_config(Platform::Google, progress.card_kind, density);
        barcode_policy::ensure_valid(Platform::Google, &config)?;

        let mut text_modules = vec![
            TextModule {
                id: "business".to_string(),
                header: "Business".to_string(),
                body: metadata.business_name.clone(),
            },
            TextModule {
                id: "reward".to_string(),
                header: "Reward".to_string(),
                body: metadata.reward_description.clone(),
            },
        ];
        if let Some(description) = &metadata.description {
            text_modules.push(TextModule {
                id: "about".to_string(),
                header: "About".to_string(),
                body: description.clone(),
            });
        }

        let state = if progress.expired { "EXPIRED" } else { "ACTIVE" };

        Ok(LoyaltyObject {
            id: self.object_id(issued_card_id),
            class_id: self.class_id(progress),
            state: state.to_string(),
            account_id: issued_card_id.to_string(),
            account_name: metadata
                .holder_name
                .clone()
                .unwrap_or_else(|| metadata.card_name.clone()),
            loyalty_points: LoyaltyPoints {
                label: progress.card_kind.unit_label().to_string(),
                balance: LocalizedString {
                    string: progress.fraction_label(),
                },
            },
            secondary_loyalty_points: LoyaltyPoints {
                label: "Progress".to_string(),
                balance: LocalizedString {
                    string: format!("{}% · {}", progress.whole_percent(), progress.status_label()),
                },
            },
            barcode: ObjectBarcode {
                kind: config.symbology.google_type().to_string(),
                value: issued_card_id.to_string(),
                alternate_text: (config.size != SizeClass::Small)
                    .then(|| issued_card_id.to_string()),
            },
            text_modules_data: text_modules,
            hex_background_color: hex_background(metadata),
        })
    }

    pub fn build(
        &self,
        progress: &ProgressModel,
        metadata: &PassMetadata,
        issued_card_id: &str,
        service_account: &ServiceAccountKey,
    ) -> Result<GoogleWalletPass, PassError> {
        self.build_at(progress, metadata, issued_card_id, service_account, Utc::now())
    }

    /// Builds the documents and signs the save assertion with RS256.
    #[tracing::instrument(
        skip(self, progress, metadata, service_account, now),
        fields(platform = "google")
    )]
    pub fn build_at(
        &self,
        progress: &ProgressModel,
        metadata: &PassMetadata,
        issued_card_id: &str,
        service_account: &ServiceAccountKey,
        now: DateTime<Utc>,
    ) -> Result<GoogleWalletPass, PassError> {
        if self.settings.issuer_id.trim().is_empty() {
            return Err(unavailable("issuer id not configured"));
        }

        let class = self.loyalty_class(progress, metadata);
        let object = self.loyalty_object(progress, metadata, issued_card_id)?;

        let key = EncodingKey::from_rsa_pem(service_account.private_key.expose_secret().as_bytes())
            .map_err(|e| unavailable(format!("invalid service account private key: {}", e)))?;

        let mut header = Header::new(Algorithm::RS256);
        header.kid = service_account.private_key_id.clone();

        let claims = SaveClaims {
            iss: &service_account.client_email,
            aud: "google",
            typ: "savetowallet",
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_TTL_SECS,
            origins: &self.settings.origins,
            payload: SavePayload {
                loyalty_classes: [&class],
                loyalty_objects: [&object],
            },
        };

        let save_assertion = jsonwebtoken::encode(&header, &claims, &key)
            .map_err(|e| PassError::build_failed(Platform::Google, BuildStep::Assertion, e))?;

        tracing::debug!(object_id = %object.id, "Signed save assertion");

        Ok(GoogleWalletPass {
            class_id: class.id,
            object_id: object.id,
            save_assertion,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::progress::CardKind;
    use chrono::TimeZone;
    use jsonwebtoken::{DecodingKey, Validation};
    use openssl::rsa::Rsa;

    const CARD_ID: &str = "5f0c1f7e-2a41-4b7e-9d55-0c7f3b9a1e20";

    fn keypair() -> (String, String) {
        let rsa = Rsa::generate(2048).unwrap();
        let private_pem = String::from_utf8(rsa.private_key_to_pem().unwrap()).unwrap();
        let public_pem = String::from_utf8(rsa.public_key_to_pem().unwrap()).unwrap();
        (private_pem, public_pem)
    }

    fn service_account(private_pem: &str) -> ServiceAccountKey {
        let json = serde_json::json!({
            "type": "service_account",
            "client_email": "wallet@test-project.iam.gserviceaccount.com",
            "private_key": private_pem,
            "private_key_id": "key-1",
        });
        ServiceAccountKey::from_json(&json.to_string()).unwrap()
    }

    fn builder() -> GooglePassBuilder {
        GooglePassBuilder::new(GooglePassSettings {
            issuer_id: "3388000000012345678".to_string(),
            class_namespace: "bean there".to_string(),
            origins: vec!["https://passes.example.com".to_string()],
            program_logo_url: None,
        })
    }

    fn metadata() -> PassMetadata {
        PassMetadata {
            business_name: "Bean There".to_string(),
            card_name: "Coffee Club".to_string(),
            reward_description: "Free flat white".to_string(),
            brand_color: Some("#1A2B3C".to_string()),
            icon_glyph: None,
            description: None,
            holder_name: Some("Ada".to_string()),
        }
    }

    fn progress() -> ProgressModel {
        let now = Utc.with_ymd_and_hms(2026, 5, 4, 9, 30, 0).unwrap();
        ProgressModel::derive_at(CardKind::Stamp, 7, 10, None, now).unwrap()
    }

    #[test]
    fn test_identifiers_are_stable() {
        let builder = builder();

        assert_eq!(
            builder.class_id(&progress()),
            "3388000000012345678.bean_there_stamp"
        );
        assert_eq!(
            builder.object_id(CARD_ID),
            format!("3388000000012345678.{}", CARD_ID)
        );
    }

    #[test]
    fn test_loyalty_object_document() {
        let object = builder()
            .loyalty_object(&progress(), &metadata(), CARD_ID)
            .unwrap();

        assert_eq!(object.account_name, "Ada");
        assert_eq!(object.loyalty_points.label, "Stamps");
        assert_eq!(object.loyalty_points.balance.string, "7/10");
        assert_eq!(object.barcode.kind, "QR_CODE");
        assert_eq!(object.barcode.value, CARD_ID);
        assert_eq!(object.hex_background_color, "#1a2b3c");
        assert_eq!(object.text_modules_data[0].body, "Bean There");
        assert_eq!(object.text_modules_data[1].body, "Free flat white");
        assert_eq!(object.state, "ACTIVE");
    }

    #[test]
    fn test_documents_are_byte_identical_on_rebuild() {
        let builder = builder();
        let first = serde_json::to_vec(
            &builder
                .loyalty_object(&progress(), &metadata(), CARD_ID)
                .unwrap(),
        )
        .unwrap();
        let second = serde_json::to_vec(
            &builder
                .loyalty_object(&progress(), &metadata(), CARD_ID)
                .unwrap(),
        )
        .unwrap();
        assert_eq!(first, second);

        let class_a = serde_json::to_vec(&builder.loyalty_class(&progress(), &metadata())).unwrap();
        let class_b = serde_json::to_vec(&builder.loyalty_class(&progress(), &metadata())).unwrap();
        assert_eq!(class_a, class_b);
    }

    #[test]
    fn test_save_assertion_verifies() {
        let (private_pem, public_pem) = keypair();
        let account = service_account(&private_pem);

        let pass = builder()
            .build(&progress(), &metadata(), CARD_ID, &account)
            .unwrap();

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&["google"]);
        validation.set_issuer(&["wallet@test-project.iam.gserviceaccount.com"]);
        let decoded = jsonwebtoken::decode::<serde_json::Value>(
            &pass.save_assertion,
            &DecodingKey::from_rsa_pem(public_pem.as_bytes()).unwrap(),
            &validation,
        )
        .unwrap();

        assert_eq!(decoded.header.kid.as_deref(), Some("key-1"));
        assert_eq!(decoded.claims["typ"], "savetowallet");
        assert_eq!(
            decoded.claims["payload"]["loyaltyObjects"][0]["id"],
            pass.object_id
        );
        assert_eq!(
            decoded.claims["payload"]["loyaltyClasses"][0]["id"],
            pass.class_id
        );
        assert!(pass.save_url().starts_with(SAVE_URL_BASE));
        assert!(pass.save_url().ends_with(&pass.save_assertion));
    }

    #[test]
    fn test_invalid_credentials_are_signing_unavailable() {
        let json = serde_json::json!({
            "client_email": "wallet@test-project.iam.gserviceaccount.com",
            "private_key": "not a pem key",
        });
        let result = ServiceAccountKey::from_json(&json.to_string());
        assert!(matches!(
            result,
            Err(PassError::SigningUnavailable {
                platform: Platform::Google,
                ..
            })
        ));

        assert!(matches!(
            ServiceAccountKey::from_json("{}"),
            Err(PassError::SigningUnavailable { .. })
        ));
    }

    #[test]
    fn test_missing_issuer_id_is_signing_unavailable() {
        let (private_pem, _) = keypair();
        let account = service_account(&private_pem);
        let builder = GooglePassBuilder::new(GooglePassSettings {
            issuer_id: String::new(),
            class_namespace: "loyalty".to_string(),
            origins: Vec::new(),
            program_logo_url: None,
        });

        let result = builder.build(&progress(), &metadata(), CARD_ID, &account);
        assert!(matches!(result, Err(PassError::SigningUnavailable { .. })));
    }
}

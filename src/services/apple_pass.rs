use std::collections::BTreeMap;
use std::io::Write;

use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{BuildStep, PassError};
use crate::models::{
    pass_metadata::{parse_hex_color, PassMetadata},
    platform::Platform,
    progress::{CardKind, ProgressModel},
};
use crate::services::barcode_policy::{self, BarcodeConfig, ContentDensity, Placement, SizeClass};
use crate::services::pass_assets::{PassAsset, PassAssets};
use crate::services::signature::{self, PassSigner};

pub const PKPASS_MIME_TYPE: &str = "application/vnd.apple.pkpass";
pub const DEFAULT_EXPIRY_URGENCY_DAYS: i64 = 14;

const PASS_JSON: &str = "pass.json";
const MANIFEST_JSON: &str = "manifest.json";
const SIGNATURE: &str = "signature";

const STAMP_BACKGROUND: &str = "rgb(79, 70, 229)";
const MEMBERSHIP_BACKGROUND: &str = "rgb(17, 24, 39)";
const FOREGROUND: &str = "rgb(255, 255, 255)";
const LABEL: &str = "rgb(229, 231, 235)";

#[derive(Debug, Clone)]
pub struct ApplePassSettings {
    pub pass_type_identifier: String,
    pub team_identifier: String,
    pub web_service_url: Option<String>,
    pub auth_secret: Option<Secret<String>>,
    pub expiry_urgency_days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassField {
    pub key: String,
    pub label: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_message: Option<String>,
}

impl PassField {
    fn new(key: &str, label: &str, value: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            value: value.into(),
            change_message: None,
        }
    }

    fn announce(mut self, message: &str) -> Self {
        self.change_message = Some(message.to_string());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassStructure {
    pub header_fields: Vec<PassField>,
    pub primary_fields: Vec<PassField>,
    pub secondary_fields: Vec<PassField>,
    pub auxiliary_fields: Vec<PassField>,
    pub back_fields: Vec<PassField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassBarcode {
    pub message: String,
    pub format: String,
    pub message_encoding: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
}

/// `pass.json` for a store card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassDescriptor {
    pub format_version: u8,
    pub pass_type_identifier: String,
    pub serial_number: String,
    pub team_identifier: String,
    pub organization_name: String,
    pub description: String,
    pub logo_text: String,
    pub foreground_color: String,
    pub background_color: String,
    pub label_color: String,
    #[serde(rename = "webServiceURL", skip_serializing_if = "Option::is_none")]
    pub web_service_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<String>,
    /// Single-barcode key read by older wallet versions
    pub barcode: PassBarcode,
    pub barcodes: Vec<PassBarcode>,
    pub store_card: PassStructure,
}

/// Everything that goes into the archive except the signature
#[derive(Debug, Clone, PartialEq)]
pub struct PassBundle {
    pub pass_json: Vec<u8>,
    pub assets: Vec<PassAsset>,
    pub manifest: Vec<u8>,
}

impl PassBundle {
    /// Files covered by the manifest, in archive order
    pub fn files(&self) -> Vec<(&str, &[u8])> {
        let mut files = vec![(PASS_JSON, self.pass_json.as_slice())];
        files.extend(
            self.assets
                .iter()
                .map(|a| (a.filename.as_str(), a.bytes.as_slice())),
        );
        files
    }
}

/// Converts brand hex to the descriptor's `rgb(r, g, b)` notation, falling
/// back to the card kind default.
pub fn background_color(metadata: &PassMetadata, card_kind: CardKind) -> String {
    metadata
        .brand_color
        .as_deref()
        .and_then(parse_hex_color)
        .map(|(r, g, b)| format!("rgb({}, {}, {})", r, g, b))
        .unwrap_or_else(|| match card_kind {
            CardKind::Stamp => STAMP_BACKGROUND.to_string(),
            CardKind::Membership => MEMBERSHIP_BACKGROUND.to_string(),
        })
}

fn countdown_label(days: i64) -> String {
    match days {
        0 => "Expires today".to_string(),
        1 => "1 day".to_string(),
        n => format!("{} days", n),
    }
}

fn short_code(issued_card_id: &str) -> String {
    issued_card_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect::<String>()
        .to_uppercase()
}

pub struct ApplePassBuilder {
    settings: ApplePassSettings,
    assets: PassAssets,
}

impl ApplePassBuilder {
    pub fn new(settings: ApplePassSettings, assets: PassAssets) -> Self {
        Self { settings, assets }
    }

    fn barcode(&self, config: &BarcodeConfig, issued_card_id: &str) -> PassBarcode {
        let show_alt_text = config.placement == Placement::Front && config.size != SizeClass::Small;

        PassBarcode {
            message: issued_card_id.to_string(),
            format: config.symbology.apple_format().to_string(),
            message_encoding: "iso-8859-1".to_string(),
            alt_text: show_alt_text.then(|| short_code(issued_card_id)),
        }
    }

    fn structure(
        &self,
        progress: &ProgressModel,
        metadata: &PassMetadata,
        config: &BarcodeConfig,
        issued_card_id: &str,
    ) -> PassStructure {
        let mut structure = PassStructure::default();

        structure
            .header_fields
            .push(PassField::new("card", "CARD", metadata.card_name.clone()));

        structure.primary_fields.push(
            PassField::new(
                "progress",
                &progress.card_kind.unit_label().to_uppercase(),
                progress.fraction_label(),
            )
            .announce("Progress updated: %@"),
        );

        structure.secondary_fields.push(PassField::new(
            "percent",
            "PROGRESS",
            format!("{}%", progress.whole_percent()),
        ));
        structure.secondary_fields.push(
            PassField::new("status", "STATUS", progress.status_label()).announce("%@"),
        );

        match progress.card_kind {
            CardKind::Stamp => structure.auxiliary_fields.push(PassField::new(
                "reward",
                "REWARD",
                metadata.reward_description.clone(),
            )),
            CardKind::Membership => {
                structure.auxiliary_fields.push(PassField::new(
                    "benefit",
                    "MEMBERSHIP",
                    metadata.reward_description.clone(),
                ));
                if let Some(expires_at) = progress.expires_at {
                    structure.auxiliary_fields.push(PassField::new(
                        "expires",
                        "EXPIRES",
                        expires_at.format("%Y-%m-%d").to_string(),
                    ));
                }
            }
        }

        if let Some(description) = &metadata.description {
            structure
                .back_fields
                .push(PassField::new("about", "About", description.clone()));
        }
        structure.back_fields.push(PassField::new(
            "business",
            "Issued by",
            metadata.business_name.clone(),
        ));

        if progress.card_kind == CardKind::Membership
            && progress.is_expiring_within(self.settings.expiry_urgency_days)
        {
            if let Some(days) = progress.days_until_expiry() {
                structure.back_fields.push(
                    PassField::new("expiry_countdown", "Expires in", countdown_label(days))
                        .announce("Membership expires in %@"),
                );
            }
        }

        if config.placement == Placement::Back {
            structure.back_fields.push(PassField::new(
                "card_code",
                "Card code",
                issued_card_id.to_string(),
            ));
        }

        structure
    }

    /// Composes `pass.json` with a validated barcode configuration.
    pub fn descriptor(
        &self,
        progress: &ProgressModel,
        metadata: &PassMetadata,
        issued_card_id: &str,
    ) -> Result<PassDescriptor, PassError> {
        let density = ContentDensity::classify(metadata);
        let config = barcode_policy::select_config(Platform::Apple, progress.card_kind, density);
        barcode_policy::ensure_valid(Platform::Apple, &config)?;

        let barcode = self.barcode(&config, issued_card_id);

        let (web_service_url, authentication_token) =
            match (&self.settings.web_service_url, &self.settings.auth_secret) {
                (Some(url), Some(secret)) => (
                    Some(url.clone()),
                    Some(signature::authentication_token(
                        issued_card_id,
                        secret.expose_secret().as_bytes(),
                    )),
                ),
                (Some(_), None) => {
                    tracing::warn!("Web service URL configured without auth secret, omitting");
                    (None, None)
                }
                _ => (None, None),
            };

        Ok(PassDescriptor {
            format_version: 1,
            pass_type_identifier: self.settings.pass_type_identifier.clone(),
            serial_number: issued_card_id.to_string(),
            team_identifier: self.settings.team_identifier.clone(),
            organization_name: metadata.business_name.clone(),
            description: metadata.card_name.clone(),
            logo_text: metadata.business_name.clone(),
            foreground_color: FOREGROUND.to_string(),
            background_color: background_color(metadata, progress.card_kind),
            label_color: LABEL.to_string(),
            web_service_url,
            authentication_token,
            expiration_date: progress.expires_at.map(|at| at.to_rfc3339()),
            barcode: barcode.clone(),
            barcodes: vec![barcode],
            store_card: self.structure(progress, metadata, &config, issued_card_id),
        })
    }

    /// Serializes the descriptor, loads assets and computes the manifest.
    pub fn bundle(
        &self,
        progress: &ProgressModel,
        metadata: &PassMetadata,
        issued_card_id: &str,
    ) -> Result<PassBundle, PassError> {
        let descriptor = self.descriptor(progress, metadata, issued_card_id)?;
        let pass_json = serde_json::to_vec(&descriptor)
            .map_err(|e| PassError::build_failed(Platform::Apple, BuildStep::Descriptor, e))?;

        let assets = self.assets.load()?;

        let mut digests = BTreeMap::new();
        digests.insert(PASS_JSON.to_string(), signature::sha1_hex(&pass_json));
        for asset in &assets {
            digests.insert(asset.filename.clone(), signature::sha1_hex(&asset.bytes));
        }
        let manifest = serde_json::to_vec(&digests)
            .map_err(|e| PassError::build_failed(Platform::Apple, BuildStep::Manifest, e))?;

        Ok(PassBundle {
            pass_json,
            assets,
            manifest,
        })
    }

    /// Builds the signed `.pkpass` archive. Nothing is returned unless every
    /// step succeeded.
    #[tracing::instrument(skip(self, progress, metadata, signer), fields(platform = "apple"))]
    pub fn build(
        &self,
        progress: &ProgressModel,
        metadata: &PassMetadata,
        issued_card_id: &str,
        signer: &PassSigner,
    ) -> Result<Vec<u8>, PassError> {
        let bundle = self.bundle(progress, metadata, issued_card_id)?;
        let signature = signer.sign_detached(&bundle.manifest)?;
        let archive = package(&bundle, &signature)?;

        tracing::debug!(
            files = bundle.assets.len() + 3,
            archive_bytes = archive.len(),
            "Built pkpass archive"
        );

        Ok(archive)
    }
}

fn file_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
}

/// Zips the bundle with its signature and nothing else.
fn package(bundle: &PassBundle, signature: &[u8]) -> Result<Vec<u8>, PassError> {
    let packaging_error = |e: &dyn std::fmt::Display| {
        PassError::build_failed(Platform::Apple, BuildStep::Packaging, e)
    };

    let mut entries = bundle.files();
    entries.push((MANIFEST_JSON, bundle.manifest.as_slice()));
    entries.push((SIGNATURE, signature));

    let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, bytes) in entries {
        writer
            .start_file(name, file_options())
            .map_err(|e| packaging_error(&e))?;
        writer.write_all(bytes).map_err(|e| packaging_error(&e))?;
    }

    let cursor = writer.finish().map_err(|e| packaging_error(&e))?;
    Ok(cursor.into_inner())
}

use serde::{Deserialize, Serialize};

use crate::error::PassError;
use crate::models::{pass_metadata::PassMetadata, platform::Platform, progress::CardKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Symbology {
    Qr,
    Pdf417,
    Aztec,
    Code128,
}

impl Symbology {
    /// Format name used in `pass.json`
    pub fn apple_format(&self) -> &'static str {
        match self {
            Symbology::Qr => "PKBarcodeFormatQR",
            Symbology::Pdf417 => "PKBarcodeFormatPDF417",
            Symbology::Aztec => "PKBarcodeFormatAztec",
            Symbology::Code128 => "PKBarcodeFormatCode128",
        }
    }

    /// Barcode type used in loyalty objects
    pub fn google_type(&self) -> &'static str {
        match self {
            Symbology::Qr => "QR_CODE",
            Symbology::Pdf417 => "PDF_417",
            Symbology::Aztec => "AZTEC",
            Symbology::Code128 => "CODE_128",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSlot {
    Top,
    Center,
    Bottom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeClass {
    Small,
    Medium,
    Large,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    Left,
    Center,
    Right,
}

/// Coarse measure of how much text a pass carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentDensity {
    Low,
    Medium,
    High,
}

const LOW_DENSITY_MAX_CHARS: usize = 80;
const MEDIUM_DENSITY_MAX_CHARS: usize = 200;

impl ContentDensity {
    pub const ALL: [ContentDensity; 3] = [
        ContentDensity::Low,
        ContentDensity::Medium,
        ContentDensity::High,
    ];

    /// Classifies by the amount of descriptive text shown on the pass.
    pub fn classify(metadata: &PassMetadata) -> Self {
        let chars = metadata.card_name.chars().count()
            + metadata.reward_description.chars().count()
            + metadata
                .description
                .as_deref()
                .map(|d| d.chars().count())
                .unwrap_or(0);

        if chars <= LOW_DENSITY_MAX_CHARS {
            ContentDensity::Low
        } else if chars <= MEDIUM_DENSITY_MAX_CHARS {
            ContentDensity::Medium
        } else {
            ContentDensity::High
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarcodeConfig {
    pub symbology: Symbology,
    pub placement: Placement,
    pub position: PositionSlot,
    pub size: SizeClass,
    pub alignment: Alignment,
}

/// Manual adjustments applied on top of a policy selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarcodeOverride {
    pub symbology: Option<Symbology>,
    pub placement: Option<Placement>,
    pub position: Option<PositionSlot>,
    pub size: Option<SizeClass>,
    pub alignment: Option<Alignment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub issues: Vec<String>,
}

/// What a platform can render
#[derive(Debug)]
pub struct PlatformCapabilities {
    pub supported: &'static [Symbology],
    pub preferred: Symbology,
    /// Addressable slots, most central/standard first
    pub slots: &'static [PositionSlot],
}

const APPLE_CAPABILITIES: PlatformCapabilities = PlatformCapabilities {
    supported: &[
        Symbology::Qr,
        Symbology::Pdf417,
        Symbology::Aztec,
        Symbology::Code128,
    ],
    preferred: Symbology::Qr,
    slots: &[PositionSlot::Bottom, PositionSlot::Center, PositionSlot::Top],
};

const GOOGLE_CAPABILITIES: PlatformCapabilities = PlatformCapabilities {
    supported: &[
        Symbology::Qr,
        Symbology::Pdf417,
        Symbology::Aztec,
        Symbology::Code128,
    ],
    preferred: Symbology::Qr,
    slots: &[PositionSlot::Center, PositionSlot::Bottom],
};

const PWA_CAPABILITIES: PlatformCapabilities = PlatformCapabilities {
    supported: &[Symbology::Qr],
    preferred: Symbology::Qr,
    slots: &[PositionSlot::Center, PositionSlot::Bottom, PositionSlot::Top],
};

pub fn capabilities(platform: Platform) -> &'static PlatformCapabilities {
    match platform {
        Platform::Apple => &APPLE_CAPABILITIES,
        Platform::Google => &GOOGLE_CAPABILITIES,
        Platform::Pwa => &PWA_CAPABILITIES,
    }
}

fn select_placement(platform: Platform, card_kind: CardKind, density: ContentDensity) -> Placement {
    if density == ContentDensity::High {
        return Placement::Back;
    }

    match platform {
        Platform::Apple => match (card_kind, density) {
            (CardKind::Membership, _) => Placement::Back,
            (CardKind::Stamp, ContentDensity::Low) => Placement::Front,
            (CardKind::Stamp, _) => Placement::Back,
        },
        // No flip interaction on these surfaces
        Platform::Google | Platform::Pwa => Placement::Front,
    }
}

/// Secondary layout table. `None` means the platform's standard slot.
fn layout(
    platform: Platform,
    placement: Placement,
    density: ContentDensity,
) -> (Option<PositionSlot>, SizeClass, Alignment) {
    use Alignment as Align;
    use ContentDensity::*;
    use Placement::*;
    use PositionSlot as Slot;

    match (platform, placement, density) {
        (Platform::Apple, Front, Low) => (None, SizeClass::Large, Align::Center),
        (Platform::Apple, Front, Medium) => (None, SizeClass::Medium, Align::Center),
        (Platform::Apple, Front, High) => (None, SizeClass::Small, Align::Center),
        (Platform::Apple, Back, Low) => (Some(Slot::Center), SizeClass::Large, Align::Center),
        (Platform::Apple, Back, Medium) => (Some(Slot::Center), SizeClass::Medium, Align::Center),
        (Platform::Apple, Back, High) => (None, SizeClass::Small, Align::Center),

        (Platform::Google, Front, Low) => (None, SizeClass::Large, Align::Center),
        (Platform::Google, Front, Medium) => (None, SizeClass::Medium, Align::Center),
        (Platform::Google, Front, High) => (Some(Slot::Bottom), SizeClass::Small, Align::Center),
        (Platform::Google, Back, _) => (Some(Slot::Bottom), SizeClass::Small, Align::Center),

        (Platform::Pwa, Front, Low) => (None, SizeClass::Large, Align::Center),
        (Platform::Pwa, Front, Medium) => (None, SizeClass::Medium, Align::Center),
        (Platform::Pwa, Front, High) => (Some(Slot::Bottom), SizeClass::Small, Align::Center),
        (Platform::Pwa, Back, _) => (Some(Slot::Bottom), SizeClass::Small, Align::Right),
    }
}

/// Picks a barcode configuration for a platform. Pure and deterministic.
pub fn select_config(
    platform: Platform,
    card_kind: CardKind,
    density: ContentDensity,
) -> BarcodeConfig {
    let caps = capabilities(platform);
    let placement = select_placement(platform, card_kind, density);
    let (position, size, alignment) = layout(platform, placement, density);

    BarcodeConfig {
        symbology: caps.preferred,
        placement,
        position: position.unwrap_or(caps.slots[0]),
        size,
        alignment,
    }
}

/// Checks a configuration against the platform capability table.
pub fn validate(platform: Platform, config: &BarcodeConfig) -> ValidationResult {
    let caps = capabilities(platform);
    let mut issues = Vec::new();

    if !caps.supported.contains(&config.symbology) {
        issues.push(format!(
            "symbology {:?} is not supported on {}",
            config.symbology, platform
        ));
    }
    if !caps.slots.contains(&config.position) {
        issues.push(format!(
            "position {:?} is not addressable on {}",
            config.position, platform
        ));
    }

    ValidationResult {
        valid: issues.is_empty(),
        issues,
    }
}

/// Validates and turns an invalid result into a build error
pub fn ensure_valid(platform: Platform, config: &BarcodeConfig) -> Result<(), PassError> {
    let result = validate(platform, config);
    if result.valid {
        Ok(())
    } else {
        Err(PassError::PlatformValidationFailed {
            platform,
            issues: result.issues,
        })
    }
}

/// Selects, applies a manual override, then re-validates the result.
pub fn select_with_override(
    platform: Platform,
    card_kind: CardKind,
    density: ContentDensity,
    overrides: &BarcodeOverride,
) -> Result<BarcodeConfig, PassError> {
    let base = select_config(platform, card_kind, density);
    let config = BarcodeConfig {
        symbology: overrides.symbology.unwrap_or(base.symbology),
        placement: overrides.placement.unwrap_or(base.placement),
        position: overrides.position.unwrap_or(base.position),
        size: overrides.size.unwrap_or(base.size),
        alignment: overrides.alignment.unwrap_or(base.alignment),
    };

    ensure_valid(platform, &config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata_with_text(len: usize) -> PassMetadata {
        PassMetadata {
            business_name: "Bean There".to_string(),
            card_name: String::new(),
            reward_description: "x".repeat(len),
            brand_color: None,
            icon_glyph: None,
            description: None,
            holder_name: None,
        }
    }

    #[test]
    fn test_every_selection_validates() {
        for platform in Platform::ALL {
            for kind in [CardKind::Stamp, CardKind::Membership] {
                for density in ContentDensity::ALL {
                    let config = select_config(platform, kind, density);
                    let result = validate(platform, &config);
                    assert!(
                        result.valid,
                        "{:?}/{:?}/{:?}: {:?}",
                        platform, kind, density, result.issues
                    );
                }
            }
        }
    }

    #[test]
    fn test_high_density_forces_back() {
        for platform in Platform::ALL {
            for kind in [CardKind::Stamp, CardKind::Membership] {
                let config = select_config(platform, kind, ContentDensity::High);
                assert_eq!(config.placement, Placement::Back);
            }
        }
        let apple = select_config(Platform::Apple, CardKind::Membership, ContentDensity::High);
        assert_eq!(apple.placement, Placement::Back);
    }

    #[test]
    fn test_apple_defaults() {
        let membership = select_config(Platform::Apple, CardKind::Membership, ContentDensity::Low);
        assert_eq!(membership.placement, Placement::Back);

        let stamp = select_config(Platform::Apple, CardKind::Stamp, ContentDensity::Low);
        assert_eq!(stamp.placement, Placement::Front);
        assert_eq!(stamp.position, PositionSlot::Bottom);
        assert_eq!(stamp.size, SizeClass::Large);
        assert_eq!(stamp.symbology, Symbology::Qr);

        let busy_stamp = select_config(Platform::Apple, CardKind::Stamp, ContentDensity::Medium);
        assert_eq!(busy_stamp.placement, Placement::Back);
    }

    #[test]
    fn test_flipless_platforms_prefer_front() {
        for platform in [Platform::Google, Platform::Pwa] {
            for kind in [CardKind::Stamp, CardKind::Membership] {
                for density in [ContentDensity::Low, ContentDensity::Medium] {
                    let config = select_config(platform, kind, density);
                    assert_eq!(config.placement, Placement::Front);
                    assert_eq!(config.position, PositionSlot::Center);
                }
            }
        }
    }

    #[test]
    fn test_selection_is_deterministic() {
        let a = select_config(Platform::Google, CardKind::Stamp, ContentDensity::Medium);
        let b = select_config(Platform::Google, CardKind::Stamp, ContentDensity::Medium);
        assert_eq!(a, b);
    }

    #[test]
    fn test_validate_reports_unsupported_symbology_and_slot() {
        let config = BarcodeConfig {
            symbology: Symbology::Pdf417,
            placement: Placement::Front,
            position: PositionSlot::Top,
            size: SizeClass::Medium,
            alignment: Alignment::Center,
        };

        let result = validate(Platform::Google, &config);
        assert!(!result.valid);
        assert_eq!(result.issues.len(), 1);

        let result = validate(Platform::Pwa, &config);
        assert!(!result.valid);
        assert!(result.issues[0].contains("Pdf417"));

        assert!(validate(Platform::Apple, &config).valid);
    }

    #[test]
    fn test_override_is_revalidated() {
        let overrides = BarcodeOverride {
            symbology: Some(Symbology::Aztec),
            ..Default::default()
        };

        let apple = select_with_override(
            Platform::Apple,
            CardKind::Stamp,
            ContentDensity::Low,
            &overrides,
        )
        .unwrap();
        assert_eq!(apple.symbology, Symbology::Aztec);

        let pwa = select_with_override(
            Platform::Pwa,
            CardKind::Stamp,
            ContentDensity::Low,
            &overrides,
        );
        assert!(matches!(
            pwa,
            Err(PassError::PlatformValidationFailed {
                platform: Platform::Pwa,
                ..
            })
        ));
    }

    #[test]
    fn test_density_classification() {
        assert_eq!(
            ContentDensity::classify(&metadata_with_text(20)),
            ContentDensity::Low
        );
        assert_eq!(
            ContentDensity::classify(&metadata_with_text(150)),
            ContentDensity::Medium
        );
        assert_eq!(
            ContentDensity::classify(&metadata_with_text(400)),
            ContentDensity::High
        );
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PassError;
use crate::models::platform::Platform;
use crate::models::progress::{CardKind, ProgressModel};

/// Descriptive snapshot of the business and card, read-only at build time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassMetadata {
    pub business_name: String,
    pub card_name: String,
    /// Reward for stamp cards, session/benefit description for memberships
    pub reward_description: String,
    /// Brand color as `#rrggbb` or `#rgb`
    pub brand_color: Option<String>,
    pub icon_glyph: Option<String>,
    pub description: Option<String>,
    pub holder_name: Option<String>,
}

/// Normalized view of an issued card as handed over by the data layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedCardSnapshot {
    pub issued_card_id: Uuid,
    pub business_id: Uuid,
    pub card_kind: CardKind,
    pub current: i64,
    pub total: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: PassMetadata,
    /// Platforms the customer actually installed this card on
    pub platforms: Vec<Platform>,
}

impl IssuedCardSnapshot {
    pub fn progress(&self) -> Result<ProgressModel, PassError> {
        ProgressModel::derive(self.card_kind, self.current, self.total, self.expires_at)
    }

    pub fn uses(&self, platform: Platform) -> bool {
        self.platforms.contains(&platform)
    }
}

/// Parses `#rrggbb` / `#rgb` (leading `#` optional) into RGB components.
pub fn parse_hex_color(value: &str) -> Option<(u8, u8, u8)> {
    let hex = value.trim().trim_start_matches('#');
    if !hex.is_ascii() {
        return None;
    }
    let channel = |s: &str| u8::from_str_radix(s, 16).ok();

    match hex.len() {
        6 => Some((
            channel(&hex[0..2])?,
            channel(&hex[2..4])?,
            channel(&hex[4..6])?,
        )),
        3 => {
            let expand = |c: &str| channel(&c.repeat(2));
            Some((
                expand(&hex[0..1])?,
                expand(&hex[1..2])?,
                expand(&hex[2..3])?,
            ))
        }
        _ => None,
    }
}

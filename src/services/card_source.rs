#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::models::{
    pass_metadata::{IssuedCardSnapshot, PassMetadata},
    platform::Platform,
};

#[derive(thiserror::Error, Debug)]
pub enum CardSourceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid snapshot for card {card_id}: {reason}")]
    InvalidSnapshot { card_id: Uuid, reason: String },
}

/// Read-only access to issued cards as the pass builders need them
#[async_trait]
pub trait CardSource: Send + Sync {
    async fn load_snapshot(
        &self,
        issued_card_id: Uuid,
    ) -> Result<Option<IssuedCardSnapshot>, CardSourceError>;
}

/// Row of the `issued_card_pass_snapshots` view
#[derive(Debug, Clone, FromRow)]
struct SnapshotRow {
    issued_card_id: Uuid,
    business_id: Uuid,
    card_kind: String,
    current_progress: i64,
    total_required: i64,
    expires_at: Option<DateTime<Utc>>,
    business_name: String,
    card_name: String,
    reward_description: String,
    brand_color: Option<String>,
    icon_glyph: Option<String>,
    description: Option<String>,
    holder_name: Option<String>,
    has_apple_pass: bool,
    has_google_pass: bool,
    has_pwa_card: bool,
}

impl TryFrom<SnapshotRow> for IssuedCardSnapshot {
    type Error = CardSourceError;

    fn try_from(row: SnapshotRow) -> Result<Self, Self::Error> {
        let card_kind = row
            .card_kind
            .parse()
            .map_err(|e: crate::error::PassError| CardSourceError::InvalidSnapshot {
                card_id: row.issued_card_id,
                reason: e.to_string(),
            })?;

        let platforms = [
            (row.has_apple_pass, Platform::Apple),
            (row.has_google_pass, Platform::Google),
            (row.has_pwa_card, Platform::Pwa),
        ]
        .into_iter()
        .filter_map(|(installed, platform)| installed.then_some(platform))
        .collect();

        Ok(IssuedCardSnapshot {
            issued_card_id: row.issued_card_id,
            business_id: row.business_id,
            card_kind,
            current: row.current_progress,
            total: row.total_required,
            expires_at: row.expires_at,
            metadata: PassMetadata {
                business_name: row.business_name,
                card_name: row.card_name,
                reward_description: row.reward_description,
                brand_color: row.brand_color,
                icon_glyph: row.icon_glyph,
                description: row.description,
                holder_name: row.holder_name,
            },
            platforms,
        })
    }
}

/// Reads snapshots from the view maintained alongside the card tables
#[derive(Clone)]
pub struct PgCardSource {
    pool: PgPool,
}

impl PgCardSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CardSource for PgCardSource {
    async fn load_snapshot(
        &self,
        issued_card_id: Uuid,
    ) -> Result<Option<IssuedCardSnapshot>, CardSourceError> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT issued_card_id, business_id, card_kind,
                   current_progress, total_required, expires_at,
                   business_name, card_name, reward_description,
                   brand_color, icon_glyph, description, holder_name,
                   has_apple_pass, has_google_pass, has_pwa_card
            FROM issued_card_pass_snapshots
            WHERE issued_card_id = $1
            "#,
        )
        .bind(issued_card_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(IssuedCardSnapshot::try_from).transpose()
    }
}

/// In-process card store backing the handler and processor tests
#[cfg(test)]
#[derive(Default)]
pub struct MemoryCardSource {
    cards: RwLock<HashMap<Uuid, IssuedCardSnapshot>>,
}

#[cfg(test)]
impl MemoryCardSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, snapshot: IssuedCardSnapshot) {
        if let Ok(mut cards) = self.cards.write() {
            cards.insert(snapshot.issued_card_id, snapshot);
        }
    }

    pub fn remove(&self, issued_card_id: Uuid) {
        if let Ok(mut cards) = self.cards.write() {
            cards.remove(&issued_card_id);
        }
    }
}

#[cfg(test)]
#[async_trait]
impl CardSource for MemoryCardSource {
    async fn load_snapshot(
        &self,
        issued_card_id: Uuid,
    ) -> Result<Option<IssuedCardSnapshot>, CardSourceError> {
        Ok(self
            .cards
            .read()
            .ok()
            .and_then(|cards| cards.get(&issued_card_id).cloned()))
    }
}

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Claims older than this are considered abandoned and may be reclaimed
pub const CLAIM_LEASE_SECS: i64 = 300;

/// Mutation that made a card's installed passes stale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    StampUpdate,
    RewardComplete,
    CardUpdate,
}

#[derive(thiserror::Error, Debug)]
#[error("unknown update kind '{0}'")]
pub struct UnknownUpdateKind(pub String);

impl UpdateKind {
    pub const ALL: [UpdateKind; 3] = [
        UpdateKind::StampUpdate,
        UpdateKind::RewardComplete,
        UpdateKind::CardUpdate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateKind::StampUpdate => "stamp_update",
            UpdateKind::RewardComplete => "reward_complete",
            UpdateKind::CardUpdate => "card_update",
        }
    }
}

impl std::fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UpdateKind {
    type Err = UnknownUpdateKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UpdateKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownUpdateKind(s.to_string()))
    }
}

impl TryFrom<String> for UpdateKind {
    type Error = UnknownUpdateKind;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One queued request to rebuild an issued card's passes.
///
/// Starts pending (`processed` and `failed` both false) and ends in exactly
/// one terminal state; there is no retry state.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UpdateOutboxRecord {
    pub id: Uuid,
    pub issued_card_id: Uuid,
    #[sqlx(try_from = "String")]
    pub update_kind: UpdateKind,
    pub processed: bool,
    pub failed: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    /// Set while a drain run holds the record
    pub claimed_at: Option<DateTime<Utc>>,
}

impl UpdateOutboxRecord {
    pub fn new(issued_card_id: Uuid, update_kind: UpdateKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            issued_card_id,
            update_kind,
            processed: false,
            failed: false,
            error_message: None,
            created_at: Utc::now(),
            processed_at: None,
            claimed_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        !self.processed && !self.failed
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutboxCounts {
    pub total: i64,
    pub pending: i64,
    pub processed: i64,
    pub failed: i64,
}

impl OutboxCounts {
    pub fn record(&mut self, record: &UpdateOutboxRecord) {
        self.total += 1;
        if record.processed {
            self.processed += 1;
        } else if record.failed {
            self.failed += 1;
        } else {
            self.pending += 1;
        }
    }

    fn add(&mut self, other: &OutboxCounts) {
        self.total += other.total;
        self.pending += other.pending;
        self.processed += other.processed;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OutboxStatus {
    #[serde(flatten)]
    pub counts: OutboxCounts,
    pub by_kind: BTreeMap<String, OutboxCounts>,
}

impl OutboxStatus {
    pub fn from_kinds(by_kind: BTreeMap<String, OutboxCounts>) -> Self {
        let mut counts = OutboxCounts::default();
        for kind_counts in by_kind.values() {
            counts.add(kind_counts);
        }
        Self { counts, by_kind }
    }
}

#[derive(Debug, FromRow)]
struct KindCountsRow {
    update_kind: String,
    total: i64,
    pending: i64,
    processed: i64,
    failed: i64,
}

impl UpdateOutboxRecord {
    /// Queue a rebuild for an issued card
    pub async fn enqueue(
        pool: &PgPool,
        issued_card_id: Uuid,
        update_kind: UpdateKind,
    ) -> Result<Self, sqlx::Error> {
        let record = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO pass_update_outbox (issued_card_id, update_kind)
            VALUES ($1, $2)
            RETURNING *
            "#,
        )
        .bind(issued_card_id)
        .bind(update_kind.as_str())
        .fetch_one(pool)
        .await?;

        Ok(record)
    }

    /// Claim up to `limit` pending records, oldest first. Rows locked by a
    /// concurrent claim are skipped; stale claims past the lease are taken over.
    pub async fn claim_pending(pool: &PgPool, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        let mut records = sqlx::query_as::<_, Self>(
            r#"
            UPDATE pass_update_outbox
            SET claimed_at = NOW()
            WHERE id IN (
                SELECT id FROM pass_update_outbox
                WHERE processed = FALSE
                  AND failed = FALSE
                  AND (claimed_at IS NULL OR claimed_at < NOW() - make_interval(secs => $2))
                ORDER BY created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(limit)
        .bind(CLAIM_LEASE_SECS as f64)
        .fetch_all(pool)
        .await?;

        // RETURNING does not preserve the subquery order
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    /// Returns false when the record was already terminal
    pub async fn mark_processed(
        pool: &PgPool,
        id: Uuid,
        note: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE pass_update_outbox
            SET processed = TRUE, processed_at = NOW(), claimed_at = NULL, error_message = $2
            WHERE id = $1 AND processed = FALSE AND failed = FALSE
            "#,
        )
        .bind(id)
        .bind(note)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Returns false when the record was already terminal
    pub async fn mark_failed(pool: &PgPool, id: Uuid, message: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE pass_update_outbox
            SET failed = TRUE, processed_at = NOW(), claimed_at = NULL, error_message = $2
            WHERE id = $1 AND processed = FALSE AND failed = FALSE
            "#,
        )
        .bind(id)
        .bind(message)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn status(pool: &PgPool) -> Result<OutboxStatus, sqlx::Error> {
        let rows = sqlx::query_as::<_, KindCountsRow>(
            r#"
            SELECT update_kind,
                   COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE processed = FALSE AND failed = FALSE) AS pending,
                   COUNT(*) FILTER (WHERE processed) AS processed,
                   COUNT(*) FILTER (WHERE failed) AS failed
            FROM pass_update_outbox
            GROUP BY update_kind
            "#,
        )
        .fetch_all(pool)
        .await?;

        let by_kind = rows
            .into_iter()
            .map(|row| {
                (
                    row.update_kind,
                    OutboxCounts {
                        total: row.total,
                        pending: row.pending,
                        processed: row.processed,
                        failed: row.failed,
                    },
                )
            })
            .collect();

        Ok(OutboxStatus::from_kinds(by_kind))
    }
}

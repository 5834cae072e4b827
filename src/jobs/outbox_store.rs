#[cfg(test)]
use std::collections::BTreeMap;
#[cfg(test)]
use std::sync::Mutex;

use async_trait::async_trait;
#[cfg(test)]
use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::outbox::{OutboxStatus, UpdateKind, UpdateOutboxRecord};
#[cfg(test)]
use crate::models::outbox::{OutboxCounts, CLAIM_LEASE_SECS};

#[derive(thiserror::Error, Debug)]
pub enum OutboxError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Durable queue of pass rebuild requests.
///
/// `mark_*` return `false` when the record was no longer pending, which the
/// caller treats as a no-op.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn enqueue(
        &self,
        issued_card_id: Uuid,
        update_kind: UpdateKind,
    ) -> Result<UpdateOutboxRecord, OutboxError>;

    async fn claim_pending(&self, limit: usize) -> Result<Vec<UpdateOutboxRecord>, OutboxError>;

    async fn mark_processed(&self, id: Uuid, note: Option<&str>) -> Result<bool, OutboxError>;

    async fn mark_failed(&self, id: Uuid, message: &str) -> Result<bool, OutboxError>;

    async fn status(&self) -> Result<OutboxStatus, OutboxError>;
}

#[derive(Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn enqueue(
        &self,
        issued_card_id: Uuid,
        update_kind: UpdateKind,
    ) -> Result<UpdateOutboxRecord, OutboxError> {
        Ok(UpdateOutboxRecord::enqueue(&self.pool, issued_card_id, update_kind).await?)
    }

    async fn claim_pending(&self, limit: usize) -> Result<Vec<UpdateOutboxRecord>, OutboxError> {
        Ok(UpdateOutboxRecord::claim_pending(&self.pool, limit as i64).await?)
    }

    async fn mark_processed(&self, id: Uuid, note: Option<&str>) -> Result<bool, OutboxError> {
        Ok(UpdateOutboxRecord::mark_processed(&self.pool, id, note).await?)
    }

    async fn mark_failed(&self, id: Uuid, message: &str) -> Result<bool, OutboxError> {
        Ok(UpdateOutboxRecord::mark_failed(&self.pool, id, message).await?)
    }

    async fn status(&self) -> Result<OutboxStatus, OutboxError> {
        Ok(UpdateOutboxRecord::status(&self.pool).await?)
    }
}

/// Process-local outbox with the same claim and terminal-write rules as the
/// Postgres store, backing the processor and handler tests
#[cfg(test)]
#[derive(Default)]
pub struct MemoryOutboxStore {
    records: Mutex<Vec<UpdateOutboxRecord>>,
}

#[cfg(test)]
impl MemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every record, in insertion order
    pub fn records(&self) -> Vec<UpdateOutboxRecord> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<UpdateOutboxRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn finish(&self, id: Uuid, failed: bool, message: Option<&str>) -> bool {
        let mut records = self.lock();
        match records.iter_mut().find(|r| r.id == id && r.is_pending()) {
            Some(record) => {
                record.processed = !failed;
                record.failed = failed;
                record.error_message = message.map(str::to_string);
                record.processed_at = Some(Utc::now());
                record.claimed_at = None;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
#[async_trait]
impl OutboxStore for MemoryOutboxStore {
    async fn enqueue(
        &self,
        issued_card_id: Uuid,
        update_kind: UpdateKind,
    ) -> Result<UpdateOutboxRecord, OutboxError> {
        let mut records = self.lock();
        let mut record = UpdateOutboxRecord::new(issued_card_id, update_kind);
        // Keep creation order strict even within one clock tick
        if let Some(last) = records.last() {
            if record.created_at <= last.created_at {
                record.created_at = last.created_at + Duration::microseconds(1);
            }
        }
        records.push(record.clone());
        Ok(record)
    }

    async fn claim_pending(&self, limit: usize) -> Result<Vec<UpdateOutboxRecord>, OutboxError> {
        let now = Utc::now();
        let stale_before = now - Duration::seconds(CLAIM_LEASE_SECS);
        let mut records = self.lock();

        let mut claimable: Vec<&mut UpdateOutboxRecord> = records
            .iter_mut()
            .filter(|r| r.is_pending() && r.claimed_at.map_or(true, |at| at < stale_before))
            .collect();
        claimable.sort_by_key(|r| r.created_at);

        Ok(claimable
            .into_iter()
            .take(limit)
            .map(|record| {
                record.claimed_at = Some(now);
                record.clone()
            })
            .collect())
    }

    async fn mark_processed(&self, id: Uuid, note: Option<&str>) -> Result<bool, OutboxError> {
        Ok(self.finish(id, false, note))
    }

    async fn mark_failed(&self, id: Uuid, message: &str) -> Result<bool, OutboxError> {
        Ok(self.finish(id, true, Some(message)))
    }

    async fn status(&self) -> Result<OutboxStatus, OutboxError> {
        let mut by_kind: BTreeMap<String, OutboxCounts> = BTreeMap::new();
        for record in self.lock().iter() {
            by_kind
                .entry(record.update_kind.as_str().to_string())
                .or_default()
                .record(record);
        }
        Ok(OutboxStatus::from_kinds(by_kind))
    }
}

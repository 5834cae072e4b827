use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::error::PassError;
use crate::jobs::outbox_store::{OutboxError, OutboxStore};
use crate::models::{outbox::UpdateOutboxRecord, platform::Platform};
use crate::services::card_source::CardSource;
use crate::services::pass_pipeline::{PassArtifact, PassPipeline};

pub const MAX_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub processed_count: usize,
    pub failed_count: usize,
    /// Claimed records another writer had already finished
    pub skipped_count: usize,
    /// Records whose terminal write errored; they stay leased until the
    /// claim expires
    pub unrecorded_count: usize,
}

/// Lifecycle notifications emitted while draining the outbox
#[derive(Debug, Clone, PartialEq)]
pub enum PassUpdateEvent {
    PlatformRebuilt {
        record_id: Uuid,
        issued_card_id: Uuid,
        platform: Platform,
    },
    PlatformFailed {
        record_id: Uuid,
        issued_card_id: Uuid,
        platform: Platform,
        error: String,
    },
    RecordProcessed {
        record_id: Uuid,
        issued_card_id: Uuid,
    },
    RecordFailed {
        record_id: Uuid,
        issued_card_id: Uuid,
        error: String,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: PassUpdateEvent);
}

/// Writes every event to the tracing subscriber
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: PassUpdateEvent) {
        match event {
            PassUpdateEvent::PlatformRebuilt {
                record_id,
                issued_card_id,
                platform,
            } => {
                tracing::debug!(%record_id, card_id = %issued_card_id, %platform, "Pass rebuilt")
            }
            PassUpdateEvent::PlatformFailed {
                record_id,
                issued_card_id,
                platform,
                error,
            } => tracing::warn!(
                %record_id,
                card_id = %issued_card_id,
                %platform,
                %error,
                "Pass rebuild failed"
            ),
            PassUpdateEvent::RecordProcessed {
                record_id,
                issued_card_id,
            } => {
                tracing::info!(%record_id, card_id = %issued_card_id, "Outbox record processed")
            }
            PassUpdateEvent::RecordFailed {
                record_id,
                issued_card_id,
                error,
            } => tracing::error!(
                %record_id,
                card_id = %issued_card_id,
                %error,
                "Outbox record failed"
            ),
        }
    }
}

/// Receives rebuilt artifacts for delivery to installed passes
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn deliver(&self, issued_card_id: Uuid, artifact: PassArtifact);
}

/// Drops artifacts after logging them; used until a push channel is attached
pub struct LoggingArtifactSink;

#[async_trait]
impl ArtifactSink for LoggingArtifactSink {
    async fn deliver(&self, issued_card_id: Uuid, artifact: PassArtifact) {
        tracing::debug!(
            card_id = %issued_card_id,
            platform = %artifact.platform(),
            bytes = artifact.size(),
            "Artifact ready for delivery"
        );
    }
}

enum RecordOutcome {
    /// At least one platform rebuilt; `note` lists the platforms that did not
    Processed { note: Option<String> },
    Failed(String),
}

/// Drains the update outbox: rebuilds every installed pass of each claimed
/// card and records a terminal state per record.
pub struct PassUpdateProcessor {
    store: Arc<dyn OutboxStore>,
    cards: Arc<dyn CardSource>,
    pipeline: Arc<PassPipeline>,
    artifacts: Arc<dyn ArtifactSink>,
}

impl PassUpdateProcessor {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        cards: Arc<dyn CardSource>,
        pipeline: Arc<PassPipeline>,
        artifacts: Arc<dyn ArtifactSink>,
    ) -> Self {
        Self {
            store,
            cards,
            pipeline,
            artifacts,
        }
    }

    pub fn store(&self) -> &Arc<dyn OutboxStore> {
        &self.store
    }

    /// Processes up to `batch_size` (clamped to 1..=50) pending records,
    /// oldest first. A failing record never stops the rest of the batch.
    #[tracing::instrument(skip(self, events))]
    pub async fn drain(
        &self,
        batch_size: usize,
        events: &dyn EventSink,
    ) -> Result<DrainReport, OutboxError> {
        let limit = batch_size.clamp(1, MAX_BATCH_SIZE);
        let records = self.store.claim_pending(limit).await?;
        let mut report = DrainReport::default();

        if records.is_empty() {
            tracing::debug!("No pending pass updates");
            return Ok(report);
        }
        tracing::info!(claimed = records.len(), "Draining pass update outbox");

        for record in records {
            let outcome = self.process_record(&record, events).await;

            let (written, event) = match outcome {
                RecordOutcome::Processed { note } => (
                    self.store.mark_processed(record.id, note.as_deref()).await,
                    PassUpdateEvent::RecordProcessed {
                        record_id: record.id,
                        issued_card_id: record.issued_card_id,
                    },
                ),
                RecordOutcome::Failed(error) => (
                    self.store.mark_failed(record.id, &error).await,
                    PassUpdateEvent::RecordFailed {
                        record_id: record.id,
                        issued_card_id: record.issued_card_id,
                        error,
                    },
                ),
            };

            let written = match written {
                Ok(written) => written,
                Err(e) => {
                    tracing::error!(
                        record_id = %record.id,
                        card_id = %record.issued_card_id,
                        error = %e,
                        "Failed to record outbox outcome"
                    );
                    report.unrecorded_count += 1;
                    continue;
                }
            };

            if !written {
                let terminal = PassError::QueueRecordTerminal(record.id);
                tracing::warn!(error = %terminal, "Skipping terminal write");
                report.skipped_count += 1;
                continue;
            }

            match &event {
                PassUpdateEvent::RecordFailed { .. } => report.failed_count += 1,
                _ => report.processed_count += 1,
            }
            events.emit(event);
        }

        tracing::info!(?report, "Pass update drain completed");
        Ok(report)
    }

    async fn process_record(
        &self,
        record: &UpdateOutboxRecord,
        events: &dyn EventSink,
    ) -> RecordOutcome {
        let snapshot = match self.cards.load_snapshot(record.issued_card_id).await {
            Ok(Some(snapshot)) => Arc::new(snapshot),
            Ok(None) => {
                return RecordOutcome::Failed(format!(
                    "issued card {} not found",
                    record.issued_card_id
                ))
            }
            Err(e) => return RecordOutcome::Failed(e.to_string()),
        };

        if let Err(e) = snapshot.progress() {
            return RecordOutcome::Failed(e.to_string());
        }

        let mut platforms = snapshot.platforms.clone();
        platforms.sort();
        platforms.dedup();
        if platforms.is_empty() {
            tracing::debug!(card_id = %snapshot.issued_card_id, "Card has no installed passes");
            return RecordOutcome::Processed { note: None };
        }

        let mut rebuilt = 0usize;
        let mut errors = Vec::new();
        for platform in platforms {
            match self.pipeline.build_blocking(Arc::clone(&snapshot), platform).await {
                Ok(artifact) => {
                    self.artifacts
                        .deliver(snapshot.issued_card_id, artifact)
                        .await;
                    rebuilt += 1;
                    events.emit(PassUpdateEvent::PlatformRebuilt {
                        record_id: record.id,
                        issued_card_id: record.issued_card_id,
                        platform,
                    });
                }
                Err(e) => {
                    let error = e.to_string();
                    events.emit(PassUpdateEvent::PlatformFailed {
                        record_id: record.id,
                        issued_card_id: record.issued_card_id,
                        platform,
                        error: error.clone(),
                    });
                    errors.push(error);
                }
            }
        }

        if rebuilt > 0 {
            RecordOutcome::Processed {
                note: (!errors.is_empty()).then(|| errors.join("; ")),
            }
        } else {
            RecordOutcome::Failed(errors.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::outbox_store::MemoryOutboxStore;
    use crate::models::outbox::{OutboxStatus, UpdateKind};
    use crate::models::pass_metadata::IssuedCardSnapshot;
    use crate::services::card_source::MemoryCardSource;
    use crate::services::credentials::{CredentialProvider, StaticCredentials};
    use crate::services::pass_pipeline::test_support::{asset_dir, pipeline, snapshot};
    use crate::services::signature::test_support::test_signer;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<PassUpdateEvent>>);

    impl EventSink for RecordingSink {
        fn emit(&self, event: PassUpdateEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    impl RecordingSink {
        fn events(&self) -> Vec<PassUpdateEvent> {
            self.0.lock().unwrap().clone()
        }
    }

    #[derive(Default)]
    struct CollectingArtifacts(Mutex<Vec<(Uuid, Platform)>>);

    #[async_trait]
    impl ArtifactSink for CollectingArtifacts {
        async fn deliver(&self, issued_card_id: Uuid, artifact: PassArtifact) {
            self.0.lock().unwrap().push((issued_card_id, artifact.platform()));
        }
    }

    struct Harness {
        _assets: tempfile::TempDir,
        store: Arc<MemoryOutboxStore>,
        cards: Arc<MemoryCardSource>,
        artifacts: Arc<CollectingArtifacts>,
        processor: PassUpdateProcessor,
    }

    fn harness(credentials: Arc<dyn CredentialProvider>) -> Harness {
        let assets = asset_dir();
        let store = Arc::new(MemoryOutboxStore::new());
        let cards = Arc::new(MemoryCardSource::new());
        let artifacts = Arc::new(CollectingArtifacts::default());
        let processor = PassUpdateProcessor::new(
            store.clone(),
            cards.clone(),
            Arc::new(pipeline(&assets, credentials)),
            artifacts.clone(),
        );

        Harness {
            _assets: assets,
            store,
            cards,
            artifacts,
            processor,
        }
    }

    async fn enqueue_card(h: &Harness, card: IssuedCardSnapshot) -> Uuid {
        let record = h
            .store
            .enqueue(card.issued_card_id, UpdateKind::StampUpdate)
            .await
            .unwrap();
        h.cards.insert(card);
        record.id
    }

    #[tokio::test]
    async fn test_drain_isolates_record_without_credentials() {
        let unsigned = snapshot(vec![Platform::Apple]);
        let credentials = StaticCredentials::new(Some(test_signer()), None).with_business(
            unsigned.business_id,
            None,
            None,
        );
        let h = harness(Arc::new(credentials));

        enqueue_card(&h, snapshot(vec![Platform::Apple])).await;
        let second = enqueue_card(&h, unsigned).await;
        enqueue_card(&h, snapshot(vec![Platform::Apple])).await;

        let sink = RecordingSink::default();
        let report = h.processor.drain(10, &sink).await.unwrap();

        assert_eq!(
            report,
            DrainReport {
                processed_count: 2,
                failed_count: 1,
                skipped_count: 0,
                unrecorded_count: 0,
            }
        );

        let records = h.store.records();
        let failed = records.iter().find(|r| r.id == second).unwrap();
        assert!(failed.failed && !failed.processed);
        assert!(failed
            .error_message
            .as_deref()
            .unwrap()
            .contains("apple signing unavailable"));
        assert!(records.iter().all(|r| !(r.processed && r.failed)));
        assert_eq!(h.artifacts.0.lock().unwrap().len(), 2);

        let failures = sink
            .events()
            .into_iter()
            .filter(|e| matches!(e, PassUpdateEvent::RecordFailed { .. }))
            .count();
        assert_eq!(failures, 1);
    }

    #[tokio::test]
    async fn test_partial_platform_success_is_processed() {
        let h = harness(Arc::new(StaticCredentials::new(Some(test_signer()), None)));
        let id = enqueue_card(&h, snapshot(vec![Platform::Apple, Platform::Google])).await;

        let report = h.processor.drain(5, &RecordingSink::default()).await.unwrap();
        assert_eq!(report.processed_count, 1);

        let record = h.store.records().into_iter().find(|r| r.id == id).unwrap();
        assert!(record.processed);
        assert!(record
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("google signing unavailable"));
    }

    #[tokio::test]
    async fn test_all_platforms_failing_concatenates_errors() {
        let h = harness(Arc::new(StaticCredentials::new(None, None)));
        enqueue_card(&h, snapshot(vec![Platform::Apple, Platform::Google])).await;

        let report = h.processor.drain(5, &RecordingSink::default()).await.unwrap();
        assert_eq!(report.failed_count, 1);

        let message = h.store.records()[0].error_message.clone().unwrap();
        assert_eq!(
            message,
            "apple signing unavailable: certificate not configured; \
             google signing unavailable: service account not configured"
        );
    }

    #[tokio::test]
    async fn test_missing_card_and_invalid_progress_fail() {
        let h = harness(Arc::new(StaticCredentials::new(None, None)));
        h.store
            .enqueue(Uuid::new_v4(), UpdateKind::CardUpdate)
            .await
            .unwrap();
        let mut broken = snapshot(vec![Platform::Pwa]);
        broken.total = 0;
        enqueue_card(&h, broken).await;

        let report = h.processor.drain(5, &RecordingSink::default()).await.unwrap();
        assert_eq!(report.failed_count, 2);

        let records = h.store.records();
        assert!(records[0].error_message.as_deref().unwrap().ends_with("not found"));
        assert!(records[1]
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("Invalid progress"));
    }

    #[tokio::test]
    async fn test_card_without_platforms_is_processed() {
        let h = harness(Arc::new(StaticCredentials::new(None, None)));
        enqueue_card(&h, snapshot(Vec::new())).await;

        let report = h.processor.drain(5, &RecordingSink::default()).await.unwrap();
        assert_eq!(report.processed_count, 1);
        assert!(h.artifacts.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_size_is_clamped_and_records_run_once() {
        let h = harness(Arc::new(StaticCredentials::new(None, None)));
        for _ in 0..MAX_BATCH_SIZE + 5 {
            enqueue_card(&h, snapshot(Vec::new())).await;
        }

        let first = h.processor.drain(500, &RecordingSink::default()).await.unwrap();
        assert_eq!(first.processed_count, MAX_BATCH_SIZE);

        let second = h.processor.drain(0, &RecordingSink::default()).await.unwrap();
        assert_eq!(second.processed_count, 1);

        let rest = h.processor.drain(50, &RecordingSink::default()).await.unwrap();
        assert_eq!(rest.processed_count, 4);
        assert_eq!(
            h.processor.drain(50, &RecordingSink::default()).await.unwrap(),
            DrainReport::default()
        );

        let OutboxStatus { counts, .. } = h.store.status().await.unwrap();
        assert_eq!(counts.processed, (MAX_BATCH_SIZE + 5) as i64);
        assert_eq!(counts.pending, 0);
    }

    /// Store whose terminal writes always find the record already finished
    struct FinishedElsewhere(MemoryOutboxStore);

    #[async_trait]
    impl OutboxStore for FinishedElsewhere {
        async fn enqueue(
            &self,
            issued_card_id: Uuid,
            update_kind: UpdateKind,
        ) -> Result<UpdateOutboxRecord, OutboxError> {
            self.0.enqueue(issued_card_id, update_kind).await
        }

        async fn claim_pending(
            &self,
            limit: usize,
        ) -> Result<Vec<UpdateOutboxRecord>, OutboxError> {
            self.0.claim_pending(limit).await
        }

        async fn mark_processed(&self, _: Uuid, _: Option<&str>) -> Result<bool, OutboxError> {
            Ok(false)
        }

        async fn mark_failed(&self, _: Uuid, _: &str) -> Result<bool, OutboxError> {
            Ok(false)
        }

        async fn status(&self) -> Result<OutboxStatus, OutboxError> {
            self.0.status().await
        }
    }

    #[tokio::test]
    async fn test_terminal_records_are_skipped() {
        let assets = asset_dir();
        let store = Arc::new(FinishedElsewhere(MemoryOutboxStore::new()));
        let cards = Arc::new(MemoryCardSource::new());
        let card = snapshot(Vec::new());
        store
            .enqueue(card.issued_card_id, UpdateKind::RewardComplete)
            .await
            .unwrap();
        cards.insert(card);

        let processor = PassUpdateProcessor::new(
            store,
            cards,
            Arc::new(pipeline(&assets, Arc::new(StaticCredentials::new(None, None)))),
            Arc::new(LoggingArtifactSink),
        );

        let sink = RecordingSink::default();
        let report = processor.drain(5, &sink).await.unwrap();
        assert_eq!(report.skipped_count, 1);
        assert_eq!(report.processed_count, 0);
        assert!(sink.events().is_empty());
    }

    /// Store whose first terminal write hits a pool timeout
    struct FirstWriteTimesOut {
        inner: MemoryOutboxStore,
        tripped: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl OutboxStore for FirstWriteTimesOut {
        async fn enqueue(
            &self,
            issued_card_id: Uuid,
            update_kind: UpdateKind,
        ) -> Result<UpdateOutboxRecord, OutboxError> {
            self.inner.enqueue(issued_card_id, update_kind).await
        }

        async fn claim_pending(
            &self,
            limit: usize,
        ) -> Result<Vec<UpdateOutboxRecord>, OutboxError> {
            self.inner.claim_pending(limit).await
        }

        async fn mark_processed(&self, id: Uuid, note: Option<&str>) -> Result<bool, OutboxError> {
            if !self.tripped.swap(true, std::sync::atomic::Ordering::SeqCst) {
                return Err(OutboxError::Database(sqlx::Error::PoolTimedOut));
            }
            self.inner.mark_processed(id, note).await
        }

        async fn mark_failed(&self, id: Uuid, message: &str) -> Result<bool, OutboxError> {
            self.inner.mark_failed(id, message).await
        }

        async fn status(&self) -> Result<OutboxStatus, OutboxError> {
            self.inner.status().await
        }
    }

    #[tokio::test]
    async fn test_store_error_on_one_record_does_not_abort_batch() {
        let assets = asset_dir();
        let store = Arc::new(FirstWriteTimesOut {
            inner: MemoryOutboxStore::new(),
            tripped: std::sync::atomic::AtomicBool::new(false),
        });
        let cards = Arc::new(MemoryCardSource::new());
        for _ in 0..3 {
            let card = snapshot(Vec::new());
            store
                .enqueue(card.issued_card_id, UpdateKind::StampUpdate)
                .await
                .unwrap();
            cards.insert(card);
        }

        let processor = PassUpdateProcessor::new(
            store.clone(),
            cards,
            Arc::new(pipeline(&assets, Arc::new(StaticCredentials::new(None, None)))),
            Arc::new(LoggingArtifactSink),
        );

        let report = processor.drain(10, &RecordingSink::default()).await.unwrap();
        assert_eq!(
            report,
            DrainReport {
                processed_count: 2,
                failed_count: 0,
                skipped_count: 0,
                unrecorded_count: 1,
            }
        );

        let status = store.status().await.unwrap();
        assert_eq!(status.counts.processed, 2);
        assert_eq!(status.counts.pending, 1);

        let records = store.inner.records();
        assert!(records[0].is_pending());
        assert!(records[0].claimed_at.is_some());
        assert!(records[1].processed && records[2].processed);
    }
}

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::jobs::pass_update_processor::{PassUpdateProcessor, TracingEventSink};

/// Starts the recurring outbox drain on `cron` (six-field, seconds first).
pub async fn start_outbox_drain(
    processor: Arc<PassUpdateProcessor>,
    cron: &str,
    batch_size: usize,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    let job = Job::new_async(cron, move |_job_id, _scheduler| {
        let processor = Arc::clone(&processor);
        Box::pin(async move {
            if let Err(e) = processor.drain(batch_size, &TracingEventSink).await {
                tracing::error!(error = %e, "Scheduled outbox drain failed");
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;
    tracing::info!(cron, batch_size, "Outbox drain scheduled");

    Ok(scheduler)
}

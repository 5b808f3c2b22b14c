//! Background queue consumers.
//!
//! Each worker claims one item at a time, runs it to completion, and
//! acknowledges it. An empty queue parks the worker on the queue's notifier;
//! the poll interval bounds how long items enqueued by another process wait.
//! Orchestrator items are never rescheduled: a pipeline run that cannot
//! record its outcome fails the job and the item.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::infrastructure::ports::{EnvQueueTask, PipelineTask, QueueError, QueueItem, QueuePort};
use crate::infrastructure::resilient::RetryConfig;
use crate::use_cases::{ProcessEnvTask, RunPipeline, SubmitBatchJob, SubmitOutcome};

/// Finished queue items are kept this long for inspection.
const RETENTION: Duration = Duration::from_secs(24 * 60 * 60);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Handle an infrastructure failure on a claimed item: reschedule it, or
/// fail it once its attempts are used up.
async fn retry_or_fail<T>(
    queue: &dyn QueuePort<T>,
    item: &QueueItem<T>,
    error: &str,
) -> Result<(), QueueError> {
    if item.attempts_exhausted() {
        tracing::error!(queue = queue.queue_name(), item_id = %item.id, attempts = item.attempts, error, "Queue item failed permanently");
        return queue.fail(item.id, error).await;
    }

    let delay = RetryConfig::default().calculate_delay(item.attempts);
    let until = Utc::now()
        + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(1));
    tracing::warn!(
        queue = queue.queue_name(),
        item_id = %item.id,
        attempt = item.attempts,
        delay_ms = delay.as_millis() as u64,
        error,
        "Queue item failed, rescheduling"
    );
    queue.delay(item.id, until).await
}

/// Run the pipeline for the next orchestrator item. Returns `false` when the
/// queue was empty.
pub async fn process_next_pipeline_task(
    queue: &dyn QueuePort<PipelineTask>,
    pipeline: &RunPipeline,
) -> Result<bool, QueueError> {
    let Some(item) = queue.dequeue().await? else {
        return Ok(false);
    };

    match pipeline.execute(&item.payload).await {
        Ok(outcome) => {
            tracing::debug!(job_id = %item.payload.job_id, ?outcome, "Pipeline run finished");
            queue.complete(item.id).await?;
        }
        Err(e) => {
            pipeline.abandon(&item.payload.job_id, &e).await;
            queue.fail(item.id, &e.to_string()).await?;
        }
    }
    Ok(true)
}

/// Run the next `env` item: local generation or a batch submission.
pub async fn process_next_env_task(
    queue: &dyn QueuePort<EnvQueueTask>,
    env_stage: &ProcessEnvTask,
    submit: &SubmitBatchJob,
) -> Result<bool, QueueError> {
    let Some(item) = queue.dequeue().await? else {
        return Ok(false);
    };

    match &item.payload {
        EnvQueueTask::Generate(task) => match env_stage.execute(task).await {
            Ok(state) => {
                tracing::debug!(job_id = %task.job_id, status = %state.status, "Env task finished");
                queue.complete(item.id).await?;
            }
            Err(e) => retry_or_fail(queue, &item, &e.to_string()).await?,
        },
        EnvQueueTask::SubmitBatch(task) => match submit.execute(task, item.attempts).await {
            SubmitOutcome::Submitted | SubmitOutcome::AlreadySubmitted => {
                queue.complete(item.id).await?;
            }
            SubmitOutcome::Retry { delay, .. } => {
                let until = Utc::now()
                    + chrono::Duration::from_std(delay)
                        .unwrap_or_else(|_| chrono::Duration::seconds(1));
                queue.delay(item.id, until).await?;
            }
            SubmitOutcome::Failed(e) => queue.fail(item.id, &e.to_string()).await?,
        },
    }
    Ok(true)
}

pub async fn run_pipeline_worker(
    worker: usize,
    queue: Arc<dyn QueuePort<PipelineTask>>,
    pipeline: Arc<RunPipeline>,
    poll_interval: Duration,
) {
    tracing::info!(worker, queue = queue.queue_name(), "Pipeline worker started");
    loop {
        match process_next_pipeline_task(queue.as_ref(), &pipeline).await {
            Ok(true) => {}
            Ok(false) => {
                queue.wait_for_work(poll_interval).await;
            }
            Err(e) => {
                tracing::warn!(worker, error = %e, "Pipeline worker queue error");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}

pub async fn run_env_worker(
    worker: usize,
    queue: Arc<dyn QueuePort<EnvQueueTask>>,
    env_stage: Arc<ProcessEnvTask>,
    submit: Arc<SubmitBatchJob>,
    poll_interval: Duration,
) {
    tracing::info!(worker, queue = queue.queue_name(), "Env worker started");
    loop {
        match process_next_env_task(queue.as_ref(), &env_stage, &submit).await {
            Ok(true) => {}
            Ok(false) => {
                queue.wait_for_work(poll_interval).await;
            }
            Err(e) => {
                tracing::warn!(worker, error = %e, "Env worker queue error");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}

/// Periodically drop finished items from both queues.
pub async fn run_queue_cleanup(
    orchestrator: Arc<dyn QueuePort<PipelineTask>>,
    env: Arc<dyn QueuePort<EnvQueueTask>>,
) {
    let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
    loop {
        interval.tick().await;
        for result in [
            orchestrator.cleanup(RETENTION).await,
            env.cleanup(RETENTION).await,
        ] {
            match result {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "Cleaned up finished queue items"),
                Err(e) => tracing::warn!(error = %e, "Queue cleanup failed"),
            }
        }
    }
}

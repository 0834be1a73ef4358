// ABOUTME: Durable step runner: memoizes step outputs by (run_id, step) and retries transient failures
// ABOUTME: A step with a recorded success is never executed again for the same run

use std::future::Future;
use std::sync::Arc;

use kiln_core::Classify;
use kiln_storage::StepStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Result, WorkflowError};
use crate::retry::RetryPolicy;

#[derive(Clone)]
pub struct StepRunner {
    store: Arc<dyn StepStore>,
    retry: RetryPolicy,
}

impl StepRunner {
    pub fn new(store: Arc<dyn StepStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &Arc<dyn StepStore> {
        &self.store
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    /// Execute `step` for `run_id`, or replay its recorded output.
    ///
    /// Every failed attempt is recorded. Transient failures are retried with backoff
    /// until the attempt budget is spent; anything else is returned immediately.
    pub async fn run<T, F, Fut>(&self, run_id: &str, step: &str, mut operation: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(record) = self.store.load(run_id, step).await? {
            if record.succeeded() {
                debug!(run_id, step, "Step already completed, replaying recorded output");
                let output = record.output.unwrap_or(Value::Null);
                return serde_json::from_value(output).map_err(|source| {
                    WorkflowError::Checkpoint {
                        step: step.to_string(),
                        source,
                    }
                });
            }
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation().await {
                Ok(output) => {
                    let value = serde_json::to_value(&output).map_err(|source| {
                        WorkflowError::Checkpoint {
                            step: step.to_string(),
                            source,
                        }
                    })?;
                    self.store.record_success(run_id, step, &value).await?;
                    info!(run_id, step, attempt, "Step completed");
                    return Ok(output);
                }
                Err(err) => {
                    let recorded = self
                        .store
                        .record_failure(run_id, step, &err.to_string())
                        .await?;

                    if !err.is_retryable() || attempt >= self.retry.max_attempts {
                        warn!(
                            run_id,
                            step,
                            attempt,
                            recorded_attempts = recorded,
                            class = %err.class(),
                            "Step failed: {}",
                            err
                        );
                        return Err(err);
                    }

                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        run_id,
                        step,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Step failed with a transient error, retrying: {}",
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

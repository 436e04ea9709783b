use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use migrate_logging::{migrate_debug, migrate_info, migrate_warn};
use migrator_core::{ErrorClass, RawError};
use tokio_util::sync::CancellationToken;

use crate::{ClassifiedError, ExecError};

#[derive(Debug, Clone)]
pub struct RetrySettings {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Retry `n` waits `n * backoff_multiplier`, capped at `max_backoff`.
    pub backoff_multiplier: Duration,
    /// Pacing delay before every first attempt.
    pub base_delay: Duration,
    pub max_backoff: Duration,
    /// Upper bound on a single rate-limit wait.
    pub rate_limit_ceiling: Duration,
    pub dry_run: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_multiplier: Duration::from_secs(2),
            base_delay: Duration::from_millis(1000),
            max_backoff: Duration::from_secs(300),
            rate_limit_ceiling: Duration::from_secs(2 * 60 * 60),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryStats {
    pub operations: u64,
    pub rate_limit_hits: u64,
}

/// Runs remote operations under the classification-driven retry policy.
///
/// Every wait is a cancellation point, and so is every attempt in flight.
/// A cancelled run always ends in [`ExecError::Cancelled`], never in a
/// classified failure.
#[derive(Debug, Default)]
pub struct RetryExecutor {
    settings: RetrySettings,
    operations: AtomicU64,
    rate_limit_hits: AtomicU64,
}

impl RetryExecutor {
    pub fn new(settings: RetrySettings) -> Self {
        Self {
            settings,
            operations: AtomicU64::new(0),
            rate_limit_hits: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    pub fn is_dry_run(&self) -> bool {
        self.settings.dry_run
    }

    pub fn stats(&self) -> RetryStats {
        RetryStats {
            operations: self.operations.load(Ordering::Relaxed),
            rate_limit_hits: self.rate_limit_hits.load(Ordering::Relaxed),
        }
    }

    /// Wait before retry number `retry` (1 for the second attempt).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        self.settings
            .backoff_multiplier
            .saturating_mul(retry)
            .min(self.settings.max_backoff)
    }

    pub async fn execute<T, F, Fut, C>(
        &self,
        label: &str,
        mut operation: F,
        classify: C,
        cancel: &CancellationToken,
    ) -> Result<T, ExecError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RawError>>,
        C: Fn(&RawError) -> ErrorClass,
    {
        let max_attempts = self.settings.max_attempts.max(1);
        let operation_number = self.operations.fetch_add(1, Ordering::Relaxed) + 1;
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(ExecError::Cancelled);
            }
            let wait = if attempt == 0 {
                self.settings.base_delay
            } else {
                self.backoff_for(attempt)
            };
            pause(wait, cancel).await?;

            attempt += 1;
            migrate_debug!("{label}: attempt {attempt}/{max_attempts} (operation #{operation_number})");
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ExecError::Cancelled),
                result = operation() => result,
            };

            let raw = match result {
                Ok(value) => {
                    if attempt > 1 {
                        migrate_info!("{label}: succeeded after {attempt} attempts");
                    }
                    return Ok(value);
                }
                Err(raw) => raw,
            };

            let class = classify(&raw);
            let give_up = |class: ErrorClass| {
                ExecError::Failed(ClassifiedError {
                    operation: label.to_string(),
                    class,
                    message: raw.to_string(),
                    attempts: attempt,
                })
            };

            match class {
                ErrorClass::Permanent => {
                    migrate_warn!("{label}: permanent failure, not retrying: {raw}");
                    return Err(give_up(class));
                }
                ErrorClass::RateLimited { reset_after } => {
                    let hits = self.rate_limit_hits.fetch_add(1, Ordering::Relaxed) + 1;
                    if attempt >= max_attempts {
                        migrate_warn!("{label}: rate limited with no attempts left (rate-limit hits: {hits})");
                        return Err(give_up(class));
                    }
                    let wait = reset_after.min(self.settings.rate_limit_ceiling);
                    migrate_warn!(
                        "{label}: rate limited, waiting {}s before retrying (rate-limit hits: {hits}, operations: {})",
                        wait.as_secs(),
                        self.operations.load(Ordering::Relaxed)
                    );
                    pause(wait, cancel).await?;
                }
                ErrorClass::Retryable => {
                    if attempt >= max_attempts {
                        migrate_warn!("{label}: giving up after {attempt} attempts: {raw}");
                        return Err(give_up(class));
                    }
                    migrate_warn!(
                        "{label}: attempt {attempt}/{max_attempts} failed, retrying in {}s: {raw}",
                        self.backoff_for(attempt).as_secs()
                    );
                }
            }
        }
    }

    /// Like [`execute`](Self::execute) for operations that write to a remote.
    /// In dry-run mode the intent is logged and `Ok(None)` returned without
    /// touching the operation.
    pub async fn submit<T, F, Fut, C>(
        &self,
        intent: &str,
        operation: F,
        classify: C,
        cancel: &CancellationToken,
    ) -> Result<Option<T>, ExecError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RawError>>,
        C: Fn(&RawError) -> ErrorClass,
    {
        if self.settings.dry_run {
            if cancel.is_cancelled() {
                return Err(ExecError::Cancelled);
            }
            migrate_info!("[dry-run] would {intent}");
            return Ok(None);
        }
        self.execute(intent, operation, classify, cancel)
            .await
            .map(Some)
    }
}

/// Sleeps for `wait` unless the token fires first.
pub async fn pause(wait: Duration, cancel: &CancellationToken) -> Result<(), ExecError> {
    if wait.is_zero() {
        return Ok(());
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ExecError::Cancelled),
        _ = tokio::time::sleep(wait) => Ok(()),
    }
}

use crate::metrics::recorder::record_transfer_retry;
use crate::progress::{percent, LocalFile};
use crate::transfer::error::{TransferError, TransferResult};
use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Additional attempts after the first one
pub const MAX_RETRIES: u32 = 3;

/// First retry delay; each following retry doubles it
pub const RETRY_DELAY_BASE: Duration = Duration::from_millis(1000);

/// One whole-file write to a pre-authorized destination.
///
/// Implementations publish the number of bytes handed to the wire on
/// `progress`. Dropping the returned future must abort the request.
#[async_trait]
pub trait PutTransport: Send + Sync {
    async fn put(
        &self,
        url: &str,
        file: &LocalFile,
        progress: watch::Sender<u64>,
    ) -> TransferResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            base_delay: RETRY_DELAY_BASE,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Exponential schedule without jitter: base, 2·base, 4·base, ...
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.base_delay)
            .with_randomization_factor(0.0)
            .with_multiplier(2.0)
            .with_max_interval(Duration::from_secs(3600))
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Outcome of a successful transfer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferReport {
    pub attempts: u32,
    /// Delays slept between attempts, in order
    pub delays: Vec<Duration>,
}

/// Moves one file to its destination, retrying transient failures
pub struct TransferEngine<T> {
    transport: T,
    policy: RetryPolicy,
}

impl<T: PutTransport> TransferEngine<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Transfer `file` to `url`.
    ///
    /// `on_progress` receives whole percentages, never decreasing across
    /// retries, ending at 100 on success. Cancelling `cancel` drops the
    /// in-flight request and resolves with `TransferError::Aborted`.
    pub async fn transfer(
        &self,
        file: &LocalFile,
        url: &str,
        on_progress: &(dyn Fn(u8) + Send + Sync),
        cancel: &CancellationToken,
    ) -> TransferResult<TransferReport> {
        let total = file.size();
        let mut backoff = self.policy.backoff();
        let mut report = TransferReport::default();
        let mut reported = 0u8;

        loop {
            if cancel.is_cancelled() {
                return Err(TransferError::Aborted);
            }
            report.attempts += 1;

            let (tx, mut rx) = watch::channel(0u64);
            let outcome = {
                let put = self.transport.put(url, file, tx.clone());
                tokio::pin!(put);

                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break Err(TransferError::Aborted),
                        result = &mut put => break result,
                        changed = rx.changed() => {
                            if changed.is_ok() {
                                let sent = *rx.borrow_and_update();
                                // 100 is reserved for an acknowledged transfer
                                let pct = percent(sent, total).min(99);
                                if pct > reported {
                                    reported = pct;
                                    on_progress(pct);
                                }
                            }
                        }
                    }
                }
            };
            drop(tx);

            match outcome {
                Ok(()) => {
                    on_progress(100);
                    return Ok(report);
                }
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    if report.attempts > self.policy.max_retries {
                        return Err(TransferError::RetriesExhausted {
                            attempts: report.attempts,
                            last: Box::new(err),
                        });
                    }

                    let delay = backoff.next_backoff().unwrap_or(self.policy.base_delay);
                    tracing::warn!(
                        "Upload of {} failed (attempt {}/{}), retrying in {:?}: {}",
                        file.name,
                        report.attempts,
                        self.policy.max_attempts(),
                        delay,
                        err
                    );
                    record_transfer_retry();
                    report.delays.push(delay);

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(TransferError::Aborted),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

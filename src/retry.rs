use log::{debug, warn};
use rand::Rng;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::publisher::PublishOutcome;

/// Configuration for retry behavior
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts per batch, the first one included
    pub max_attempts: usize,

    /// Delay before the first retry in milliseconds
    pub initial_delay_ms: u64,

    /// Multiplier for exponential backoff
    pub backoff_factor: f64,

    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,

    /// Whether to randomize delays
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 100,
            backoff_factor: 2.0,
            max_delay_ms: 30_000, // 30 seconds
            jitter: true,
        }
    }
}

/// Builder for custom retry configurations
pub struct RetryBuilder {
    config: RetryConfig,
}

impl RetryBuilder {
    pub fn new() -> Self {
        Self {
            config: RetryConfig::default(),
        }
    }

    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn initial_delay(mut self, delay_ms: u64) -> Self {
        self.config.initial_delay_ms = delay_ms;
        self
    }

    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.config.backoff_factor = factor;
        self
    }

    pub fn max_delay(mut self, delay_ms: u64) -> Self {
        self.config.max_delay_ms = delay_ms;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.config.jitter = jitter;
        self
    }

    pub fn build(self) -> RetryConfig {
        self.config
    }
}

impl Default for RetryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Exponential backoff with an upper bound and optional jitter
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_ms: u64,
    factor: f64,
    max_ms: u64,
    jitter: bool,
}

impl Backoff {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            initial_ms: config.initial_delay_ms,
            factor: config.backoff_factor.max(1.0),
            max_ms: config.max_delay_ms.max(config.initial_delay_ms),
            jitter: config.jitter,
        }
    }

    /// Delay after the given failed attempt, before jitter
    pub fn base_delay(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let delay_ms = self.initial_ms as f64 * self.factor.powi(exponent);
        Duration::from_millis(delay_ms.min(self.max_ms as f64) as u64)
    }

    /// Delay after the given failed attempt.
    ///
    /// With jitter enabled the delay is drawn uniformly from the upper
    /// half of the base delay.
    pub fn delay(&self, attempt: usize) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter {
            return base;
        }
        let base_ms = base.as_millis() as u64;
        let half = base_ms / 2;
        Duration::from_millis(base_ms - half + rand::rng().random_range(0..=half))
    }
}

/// Why a batch was given up on
#[derive(Debug, Clone, PartialEq)]
pub enum AbandonReason {
    /// Retryable failures until the attempt budget ran out
    Exhausted(String),
    /// The backend rejected the batch
    Fatal(String),
    /// Shutdown while waiting for the next attempt
    Cancelled,
}

/// Per-batch retry state
#[derive(Debug, Clone, PartialEq)]
pub enum RetryState {
    Attempting { attempt: usize },
    Waiting { attempt: usize, delay: Duration },
    Succeeded { attempts: usize },
    Abandoned { attempts: usize, reason: AbandonReason },
}

impl RetryState {
    pub fn start() -> Self {
        RetryState::Attempting { attempt: 1 }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RetryState::Succeeded { .. } | RetryState::Abandoned { .. })
    }

    /// Apply the outcome of the current attempt
    pub fn on_outcome(self, outcome: PublishOutcome, max_attempts: usize, backoff: &Backoff) -> Self {
        let RetryState::Attempting { attempt } = self else {
            return self;
        };

        match outcome {
            PublishOutcome::Success => RetryState::Succeeded { attempts: attempt },
            PublishOutcome::Fatal(reason) => RetryState::Abandoned {
                attempts: attempt,
                reason: AbandonReason::Fatal(reason),
            },
            PublishOutcome::Retryable(reason) if attempt >= max_attempts => RetryState::Abandoned {
                attempts: attempt,
                reason: AbandonReason::Exhausted(reason),
            },
            PublishOutcome::Retryable(reason) => {
                let delay = backoff.delay(attempt);
                debug!("Attempt {} failed ({}), retrying after {:?}", attempt, reason, delay);
                RetryState::Waiting { attempt, delay }
            }
        }
    }

    /// The backoff delay has elapsed
    pub fn on_wait_elapsed(self) -> Self {
        match self {
            RetryState::Waiting { attempt, .. } => RetryState::Attempting {
                attempt: attempt + 1,
            },
            other => other,
        }
    }

    /// Shutdown was requested
    pub fn on_cancel(self) -> Self {
        match self {
            RetryState::Waiting { attempt, .. } => RetryState::Abandoned {
                attempts: attempt,
                reason: AbandonReason::Cancelled,
            },
            other => other,
        }
    }
}

/// What happened to one batch
#[derive(Debug, Clone)]
pub struct RetryReport {
    pub state: RetryState,
    /// Backoff delays actually waited
    pub waits: Vec<Duration>,
}

impl RetryReport {
    pub fn attempts(&self) -> usize {
        match &self.state {
            RetryState::Succeeded { attempts } | RetryState::Abandoned { attempts, .. } => *attempts,
            RetryState::Attempting { attempt } | RetryState::Waiting { attempt, .. } => *attempt,
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.state, RetryState::Succeeded { .. })
    }
}

/// Drives a publish operation through the retry state machine
#[derive(Debug, Clone)]
pub struct RetryController {
    max_attempts: usize,
    backoff: Backoff,
}

impl RetryController {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Backoff::new(config),
        }
    }

    /// Run `operation` until it succeeds, fails fatally, exhausts the
    /// attempt budget, or `cancel` fires while waiting.
    ///
    /// `operation` receives the 1-based attempt number.
    pub async fn run<F, Fut>(&self, mut operation: F, cancel: &CancellationToken, context: &str) -> RetryReport
    where
        F: FnMut(usize) -> Fut + Send,
        Fut: Future<Output = PublishOutcome> + Send,
    {
        let mut state = RetryState::start();
        let mut waits = Vec::new();

        loop {
            state = match state {
                RetryState::Attempting { attempt } => {
                    let outcome = operation(attempt).await;
                    if let PublishOutcome::Retryable(reason) = &outcome {
                        warn!(
                            "{} (attempt {}/{}): {}",
                            context, attempt, self.max_attempts, reason
                        );
                    }
                    RetryState::Attempting { attempt }.on_outcome(outcome, self.max_attempts, &self.backoff)
                }
                RetryState::Waiting { attempt, delay } => {
                    let waiting = RetryState::Waiting { attempt, delay };
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            debug!("{}: shutdown while waiting to retry", context);
                            waiting.on_cancel()
                        }
                        _ = sleep(delay) => {
                            waits.push(delay);
                            waiting.on_wait_elapsed()
                        }
                    }
                }
                terminal => return RetryReport { state: terminal, waits },
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(max_attempts: usize) -> RetryConfig {
        RetryBuilder::new()
            .max_attempts(max_attempts)
            .initial_delay(100)
            .backoff_factor(2.0)
            .max_delay(1_000)
            .with_jitter(false)
            .build()
    }

    /// Operation failing with a retryable error `failures` times, then succeeding
    fn flaky(failures: usize, calls: Arc<AtomicUsize>) -> impl FnMut(usize) -> std::future::Ready<PublishOutcome> {
        move |_attempt| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(if n < failures {
                PublishOutcome::Retryable("Throttling".to_string())
            } else {
                PublishOutcome::Success
            })
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let backoff = Backoff::new(&config(10));
        let delays: Vec<u64> = (1..=6).map(|a| backoff.base_delay(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
        assert_eq!(backoff.delay(3), Duration::from_millis(400));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let mut cfg = config(10);
        cfg.jitter = true;
        let backoff = Backoff::new(&cfg);
        for attempt in 1..=8 {
            let base = backoff.base_delay(attempt);
            for _ in 0..50 {
                let delay = backoff.delay(attempt);
                assert!(delay <= base);
                assert!(delay >= base / 2);
            }
        }
    }

    #[test]
    fn test_state_transitions() {
        let backoff = Backoff::new(&config(3));

        let state = RetryState::start().on_outcome(PublishOutcome::Retryable("x".into()), 3, &backoff);
        assert_eq!(
            state,
            RetryState::Waiting {
                attempt: 1,
                delay: Duration::from_millis(100)
            }
        );
        let state = state.on_wait_elapsed();
        assert_eq!(state, RetryState::Attempting { attempt: 2 });

        let state = RetryState::Attempting { attempt: 3 }
            .on_outcome(PublishOutcome::Retryable("x".into()), 3, &backoff);
        assert_eq!(
            state,
            RetryState::Abandoned {
                attempts: 3,
                reason: AbandonReason::Exhausted("x".into())
            }
        );

        let state = RetryState::start().on_outcome(PublishOutcome::Fatal("denied".into()), 3, &backoff);
        assert!(matches!(
            state,
            RetryState::Abandoned {
                attempts: 1,
                reason: AbandonReason::Fatal(_)
            }
        ));
        assert!(state.is_terminal());

        let cancelled = RetryState::Waiting {
            attempt: 2,
            delay: Duration::from_millis(5),
        }
        .on_cancel();
        assert_eq!(
            cancelled,
            RetryState::Abandoned {
                attempts: 2,
                reason: AbandonReason::Cancelled
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_k_retryable_failures() {
        let controller = RetryController::new(&config(5));
        let calls = Arc::new(AtomicUsize::new(0));
        let report = controller
            .run(flaky(3, calls.clone()), &CancellationToken::new(), "put_metric_data")
            .await;

        assert!(report.succeeded());
        assert_eq!(report.attempts(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(
            report.waits,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandons_after_max_attempts() {
        let controller = RetryController::new(&config(4));
        let calls = Arc::new(AtomicUsize::new(0));
        let report = controller
            .run(flaky(usize::MAX, calls.clone()), &CancellationToken::new(), "put_metric_data")
            .await;

        assert!(matches!(
            report.state,
            RetryState::Abandoned {
                attempts: 4,
                reason: AbandonReason::Exhausted(_)
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(report.waits.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_failure_is_not_retried() {
        let controller = RetryController::new(&config(5));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let report = controller
            .run(
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    std::future::ready(PublishOutcome::Fatal("AccessDenied".to_string()))
                },
                &CancellationToken::new(),
                "put_metric_data",
            )
            .await;

        assert!(matches!(
            report.state,
            RetryState::Abandoned {
                attempts: 1,
                reason: AbandonReason::Fatal(_)
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(report.waits.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_abandons_waiting_retry() {
        let controller = RetryController::new(
            &RetryBuilder::new()
                .max_attempts(5)
                .initial_delay(60_000)
                .max_delay(60_000)
                .with_jitter(false)
                .build(),
        );
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let report = controller
            .run(flaky(usize::MAX, calls.clone()), &cancel, "put_metric_data")
            .await;

        assert_eq!(
            report.state,
            RetryState::Abandoned {
                attempts: 1,
                reason: AbandonReason::Cancelled
            }
        );
        assert!(report.waits.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

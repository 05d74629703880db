//! Retry coordination for idempotent service calls
//!
//! A [`Retryer`] repeats an [`Attempt`] while its [`Classifier`] says the last
//! failure is transient, sleeping between attempts according to a
//! [`RetryPolicy`]. Cancellation is observed before each attempt, while an
//! attempt is in flight, and during backoff.

use crate::config::{millis, optional_millis};
use parcel_core::{ParcelError, Result, TransportError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default number of attempts, the first one included
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Default initial delay for exponential backoff (100ms)
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 100;

/// Default maximum delay for exponential backoff (10 seconds)
pub const DEFAULT_MAX_DELAY_SECS: u64 = 10;

/// Default multiplier for exponential backoff
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// How many times to try, and how long to wait in between
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Delay after the first failure
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    /// Cap on any single delay
    #[serde(with = "millis")]
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Randomize each delay between half and all of its nominal value
    pub jitter: bool,
    /// Overall time allowed for all attempts of one call
    #[serde(with = "optional_millis")]
    pub budget: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: true,
            budget: None,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, never retried
    pub fn none() -> Self {
        RetryPolicy {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Exponential backoff with default delays
    pub fn exponential(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Nominal delay before the retry that follows failed attempt `attempt`
    ///
    /// `attempt` is 1-based. Returns `None` once no attempts are left.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt >= self.max_attempts {
            return None;
        }
        let factor = self.multiplier.max(1.0).powi(attempt as i32 - 1);
        let delay_ms = (self.initial_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Some(Duration::from_millis(delay_ms as u64).min(self.max_delay))
    }

    /// Delay to actually sleep, jitter applied
    pub fn backoff(&self, attempt: u32) -> Option<Duration> {
        let delay = self.delay_for_attempt(attempt)?;
        if !self.jitter || delay.is_zero() {
            return Some(delay);
        }
        let half = delay / 2;
        let spread = rand::thread_rng().gen_range(0..=half.as_millis() as u64);
        Some(half + Duration::from_millis(spread))
    }
}

/// Which failures count as transient
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classifier {
    /// Server faults (5xx, 429) and connection failures where no request
    /// byte left the client
    ServerError,
    /// Everything `ServerError` retries plus 408, timeouts and connections
    /// broken mid-request
    StatusCode,
}

impl Classifier {
    /// Broad classification needs a body that can be rewound
    pub fn for_body(seekable: bool) -> Self {
        if seekable {
            Classifier::StatusCode
        } else {
            Classifier::ServerError
        }
    }

    pub fn should_retry(&self, err: &ParcelError) -> bool {
        match err {
            ParcelError::Server(e) => match self {
                Classifier::ServerError => e.is_server_fault(),
                Classifier::StatusCode => e.is_server_fault() || e.status == 408,
            },
            ParcelError::Transport(TransportError::Connect(_)) => true,
            ParcelError::Transport(TransportError::Timeout(_))
            | ParcelError::Transport(TransportError::Interrupted(_)) => {
                *self == Classifier::StatusCode
            }
            _ => false,
        }
    }
}

/// One repeatable unit of work
pub trait Attempt: Send {
    type Output: Send;

    fn run(&mut self) -> impl Future<Output = Result<Self::Output>> + Send;

    /// Restore state consumed by a failed attempt
    fn before_retry(&mut self) -> impl Future<Output = Result<()>> + Send {
        std::future::ready(Ok(()))
    }

    /// Whether another attempt could send the same request again
    fn can_replay(&self) -> bool {
        true
    }
}

/// An [`Attempt`] made of a closure producing a fresh future per try
pub struct FnAttempt<F>(pub F);

impl<F, Fut, T> Attempt for FnAttempt<F>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T>> + Send,
    T: Send,
{
    type Output = T;

    fn run(&mut self) -> impl Future<Output = Result<T>> + Send {
        (self.0)()
    }
}

/// Drives an [`Attempt`] to success or a final error
pub struct Retryer<'a> {
    policy: &'a RetryPolicy,
    classifier: Classifier,
    cancel: Option<&'a CancellationToken>,
    operation: &'static str,
}

impl<'a> Retryer<'a> {
    pub fn new(policy: &'a RetryPolicy, classifier: Classifier, operation: &'static str) -> Self {
        Retryer {
            policy,
            classifier,
            cancel: None,
            operation,
        }
    }

    pub fn with_cancellation(mut self, cancel: Option<&'a CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn classifier(&self) -> Classifier {
        self.classifier
    }

    /// Run `attempt` until it succeeds or fails for good
    ///
    /// Non-transient errors are returned as they are. A transient error that
    /// outlives the attempt count or the time budget is wrapped in
    /// [`ParcelError::RetryExhausted`].
    pub async fn run<A: Attempt>(&self, attempt: &mut A) -> Result<A::Output> {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            if self.is_cancelled() {
                return Err(ParcelError::Cancelled);
            }
            attempts += 1;
            debug!("{} attempt {}", self.operation, attempts);

            let result = match self.cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(ParcelError::Cancelled),
                    result = attempt.run() => result,
                },
                None => attempt.run().await,
            };

            let err = match result {
                Ok(output) => return Ok(output),
                Err(err) => err,
            };

            if !self.classifier.should_retry(&err) {
                return Err(err);
            }
            if !attempt.can_replay() {
                warn!(
                    "{} attempt {} failed after its body was partly sent; not retrying: {}",
                    self.operation, attempts, err
                );
                return Err(err);
            }

            let delay = match self.policy.backoff(attempts) {
                Some(delay) if self.within_budget(started, delay) => delay,
                _ => {
                    return Err(ParcelError::RetryExhausted {
                        attempts,
                        last: Box::new(err),
                    })
                }
            };

            warn!(
                "{} attempt {} failed, retrying in {:?}: {}",
                self.operation, attempts, delay, err
            );
            self.sleep(delay).await?;
            attempt.before_retry().await?;
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(|token| token.is_cancelled())
    }

    fn within_budget(&self, started: Instant, delay: Duration) -> bool {
        self.policy
            .budget
            .map_or(true, |budget| started.elapsed() + delay < budget)
    }

    async fn sleep(&self, delay: Duration) -> Result<()> {
        match self.cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(ParcelError::Cancelled),
                _ = tokio::time::sleep(delay) => Ok(()),
            },
            None => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parcel_core::ServerError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::exponential(max_attempts)
            .with_delays(Duration::from_millis(1), Duration::from_millis(4))
            .with_jitter(false)
    }

    fn server(status: u16) -> ParcelError {
        ParcelError::Server(ServerError::new(status, "req"))
    }

    #[test]
    fn test_delay_progression() {
        let policy = RetryPolicy::exponential(6)
            .with_delays(Duration::from_millis(100), Duration::from_millis(500))
            .with_jitter(false);

        assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.delay_for_attempt(3), Some(Duration::from_millis(400)));
        assert_eq!(policy.delay_for_attempt(4), Some(Duration::from_millis(500)));
        assert_eq!(policy.delay_for_attempt(6), None);
        assert_eq!(RetryPolicy::none().delay_for_attempt(1), None);
    }

    #[test]
    fn test_jitter_stays_in_upper_half() {
        let policy = RetryPolicy::exponential(3)
            .with_delays(Duration::from_millis(100), Duration::from_secs(1));
        for _ in 0..100 {
            let delay = policy.backoff(1).unwrap();
            assert!(delay >= Duration::from_millis(50) && delay <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_classifiers() {
        let narrow = Classifier::ServerError;
        let broad = Classifier::StatusCode;

        for err in [server(500), server(503), server(429)] {
            assert!(narrow.should_retry(&err));
            assert!(broad.should_retry(&err));
        }

        let connect = ParcelError::from(TransportError::Connect("refused".into()));
        assert!(narrow.should_retry(&connect));
        assert!(broad.should_retry(&connect));

        let timeout = ParcelError::from(TransportError::Timeout(Duration::from_secs(1)));
        let reset = ParcelError::from(TransportError::Interrupted("reset".into()));
        assert!(!narrow.should_retry(&timeout));
        assert!(!narrow.should_retry(&reset));
        assert!(broad.should_retry(&timeout));
        assert!(broad.should_retry(&reset));

        assert!(!narrow.should_retry(&server(408)));
        assert!(broad.should_retry(&server(408)));

        for err in [
            server(400),
            server(404),
            ParcelError::invalid_input("x"),
            ParcelError::Cancelled,
            ParcelError::from(TransportError::Body(std::io::Error::other("disk"))),
        ] {
            assert!(!narrow.should_retry(&err));
            assert!(!broad.should_retry(&err));
        }
    }

    #[test]
    fn test_classifier_for_body() {
        assert_eq!(Classifier::for_body(true), Classifier::StatusCode);
        assert_eq!(Classifier::for_body(false), Classifier::ServerError);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut attempt = FnAttempt(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(server(503))
                } else {
                    Ok(n)
                }
            }
        });

        let policy = fast_policy(4);
        let result = Retryer::new(&policy, Classifier::ServerError, "test")
            .run(&mut attempt)
            .await
            .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_wraps_last_error() {
        let mut attempt = FnAttempt(|| async { Err::<(), _>(server(500)) });
        let policy = fast_policy(3);
        let err = Retryer::new(&policy, Classifier::StatusCode, "test")
            .run(&mut attempt)
            .await
            .unwrap_err();

        match err {
            ParcelError::RetryExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert_eq!(last.status_code(), Some(500));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_returned_verbatim() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut attempt = FnAttempt(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(server(403)) }
        });

        let policy = fast_policy(4);
        let err = Retryer::new(&policy, Classifier::StatusCode, "test")
            .run(&mut attempt)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(403));
        assert!(matches!(err, ParcelError::Server(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct OneShot {
        calls: u32,
    }

    impl Attempt for OneShot {
        type Output = ();

        fn run(&mut self) -> impl Future<Output = Result<()>> + Send {
            self.calls += 1;
            std::future::ready(Err(server(503)))
        }

        fn can_replay(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_unreplayable_attempt_is_not_retried() {
        let mut attempt = OneShot { calls: 0 };
        let policy = fast_policy(4);
        let err = Retryer::new(&policy, Classifier::ServerError, "test")
            .run(&mut attempt)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(503));
        assert_eq!(attempt.calls, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let token = CancellationToken::new();
        token.cancel();

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut attempt = FnAttempt(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        });

        let policy = fast_policy(4);
        let err = Retryer::new(&policy, Classifier::ServerError, "test")
            .with_cancellation(Some(&token))
            .run(&mut attempt)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut attempt = FnAttempt(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let trigger = trigger.clone();
            async move {
                // Cancel only once the attempt has already failed
                trigger.cancel();
                Err::<(), _>(server(503))
            }
        });

        let policy = RetryPolicy::exponential(4)
            .with_delays(Duration::from_secs(30), Duration::from_secs(30))
            .with_jitter(false);
        let err = Retryer::new(&policy, Classifier::ServerError, "test")
            .with_cancellation(Some(&token))
            .run(&mut attempt)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_stops_retries() {
        let mut attempt = FnAttempt(|| async { Err::<(), _>(server(503)) });
        let policy = RetryPolicy::exponential(10)
            .with_delays(Duration::from_millis(50), Duration::from_millis(50))
            .with_jitter(false)
            .with_budget(Duration::from_millis(10));
        let err = Retryer::new(&policy, Classifier::ServerError, "test")
            .run(&mut attempt)
            .await
            .unwrap_err();
        assert!(matches!(err, ParcelError::RetryExhausted { attempts: 1, .. }));
    }
}

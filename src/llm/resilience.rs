//! LLM resilience wrapper with bounded retries and circuit breaking.
//!
//! The defaults perform no retries, so a single upstream failure fails the
//! request. Retries apply only to transient failures.

use super::{LlmProvider, env_parse};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Resilience configuration for LLM calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmResilienceConfig {
    /// Maximum number of retries for retryable failures.
    pub max_retries: u32,
    /// Backoff before the first retry in milliseconds; doubles per retry.
    pub retry_backoff_ms: u64,
    /// Consecutive failures before opening the circuit.
    pub breaker_failure_threshold: u32,
    /// How long to keep the circuit open before half-open.
    pub breaker_reset_timeout_ms: u64,
    /// Maximum trial calls while half-open.
    pub breaker_half_open_max_calls: u32,
    /// Latency budget in milliseconds for LLM calls.
    pub latency_slo_ms: u64,
}

impl Default for LlmResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_backoff_ms: 250,
            breaker_failure_threshold: 5,
            breaker_reset_timeout_ms: 30_000,
            breaker_half_open_max_calls: 1,
            latency_slo_ms: 10_000,
        }
    }
}

impl LlmResilienceConfig {
    /// Loads resilience configuration from config file settings.
    #[must_use]
    pub fn from_config(config: &crate::config::LlmConfig) -> Self {
        let mut settings = Self::default();
        if let Some(max_retries) = config.max_retries {
            settings.max_retries = max_retries;
        }
        if let Some(retry_backoff_ms) = config.retry_backoff_ms {
            settings.retry_backoff_ms = retry_backoff_ms;
        }
        if let Some(threshold) = config.breaker_failure_threshold {
            settings.breaker_failure_threshold = threshold.max(1);
        }
        if let Some(reset_ms) = config.breaker_reset_ms {
            settings.breaker_reset_timeout_ms = reset_ms;
        }
        if let Some(calls) = config.breaker_half_open_max_calls {
            settings.breaker_half_open_max_calls = calls.max(1);
        }
        if let Some(slo_ms) = config.latency_slo_ms {
            settings.latency_slo_ms = slo_ms;
        }
        settings
    }

    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(parsed) = env_parse::<u32>("VEIL_LLM_MAX_RETRIES") {
            self.max_retries = parsed;
        }
        if let Some(parsed) = env_parse::<u64>("VEIL_LLM_RETRY_BACKOFF_MS") {
            self.retry_backoff_ms = parsed;
        }
        if let Some(parsed) = env_parse::<u32>("VEIL_LLM_BREAKER_FAILURE_THRESHOLD") {
            self.breaker_failure_threshold = parsed.max(1);
        }
        if let Some(parsed) = env_parse::<u64>("VEIL_LLM_BREAKER_RESET_MS") {
            self.breaker_reset_timeout_ms = parsed;
        }
        if let Some(parsed) = env_parse::<u32>("VEIL_LLM_BREAKER_HALF_OPEN_MAX_CALLS") {
            self.breaker_half_open_max_calls = parsed.max(1);
        }
        if let Some(parsed) = env_parse::<u64>("VEIL_LLM_LATENCY_SLO_MS") {
            self.latency_slo_ms = parsed;
        }
        self
    }
}

/// Circuit breaker state machine.
#[derive(Debug)]
enum BreakerState {
    Closed { failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { attempts: u32 },
}

#[derive(Debug)]
struct CircuitBreaker {
    state: BreakerState,
    failure_threshold: u32,
    reset_timeout: Duration,
    half_open_max_calls: u32,
}

impl CircuitBreaker {
    fn new(config: &LlmResilienceConfig) -> Self {
        Self {
            state: BreakerState::Closed { failures: 0 },
            failure_threshold: config.breaker_failure_threshold.max(1),
            reset_timeout: Duration::from_millis(config.breaker_reset_timeout_ms),
            half_open_max_calls: config.breaker_half_open_max_calls.max(1),
        }
    }

    fn allow(&mut self) -> bool {
        match self.state {
            BreakerState::Closed { .. } => true,
            BreakerState::Open { opened_at } => {
                if opened_at.elapsed() >= self.reset_timeout {
                    self.state = BreakerState::HalfOpen { attempts: 1 };
                    true
                } else {
                    false
                }
            },
            BreakerState::HalfOpen { ref mut attempts } => {
                if *attempts >= self.half_open_max_calls {
                    false
                } else {
                    *attempts += 1;
                    true
                }
            },
        }
    }

    const fn on_success(&mut self) {
        self.state = BreakerState::Closed { failures: 0 };
    }

    fn on_failure(&mut self) -> bool {
        match self.state {
            BreakerState::Closed { ref mut failures } => {
                *failures += 1;
                if *failures >= self.failure_threshold {
                    self.state = BreakerState::Open {
                        opened_at: Instant::now(),
                    };
                    return true;
                }
            },
            BreakerState::HalfOpen { .. } => {
                self.state = BreakerState::Open {
                    opened_at: Instant::now(),
                };
                return true;
            },
            BreakerState::Open { .. } => {},
        }
        false
    }

    const fn state_value(&self) -> u8 {
        match self.state {
            BreakerState::Closed { .. } => 0,
            BreakerState::Open { .. } => 1,
            BreakerState::HalfOpen { .. } => 2,
        }
    }
}

/// LLM provider wrapper with retries and a circuit breaker.
pub struct ResilientLlmProvider<P: LlmProvider> {
    inner: P,
    config: LlmResilienceConfig,
    breaker: Mutex<CircuitBreaker>,
}

impl<P: LlmProvider> ResilientLlmProvider<P> {
    /// Creates a new resilient LLM provider wrapper.
    #[must_use]
    pub fn new(inner: P, config: LlmResilienceConfig) -> Self {
        let breaker = CircuitBreaker::new(&config);
        Self {
            inner,
            config,
            breaker: Mutex::new(breaker),
        }
    }

    /// Returns the wrapped provider.
    pub const fn inner(&self) -> &P {
        &self.inner
    }

    fn breaker(&self) -> std::sync::MutexGuard<'_, CircuitBreaker> {
        self.breaker
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Returns the breaker state if the call is rejected.
    fn breaker_rejects(&self) -> Option<u8> {
        let mut breaker = self.breaker();
        if breaker.allow() {
            None
        } else {
            Some(breaker.state_value())
        }
    }

    fn breaker_success(&self) -> u8 {
        let mut breaker = self.breaker();
        breaker.on_success();
        breaker.state_value()
    }

    fn breaker_failure(&self) -> (bool, u8) {
        let mut breaker = self.breaker();
        let tripped = breaker.on_failure();
        (tripped, breaker.state_value())
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1_u64 << attempt.saturating_sub(1).min(6);
        Duration::from_millis(self.config.retry_backoff_ms.saturating_mul(factor))
    }

    fn record_attempt(&self, provider: &'static str, elapsed: Duration, status: &'static str) {
        metrics::counter!(
            "llm_requests_total",
            "provider" => provider,
            "status" => status
        )
        .increment(1);
        metrics::histogram!(
            "llm_request_duration_ms",
            "provider" => provider,
            "status" => status
        )
        .record(elapsed.as_secs_f64() * 1000.0);

        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        if self.config.latency_slo_ms > 0 && elapsed_ms > self.config.latency_slo_ms {
            metrics::counter!("llm_latency_budget_exceeded_total", "provider" => provider)
                .increment(1);
        }
    }

    fn record_breaker_state(provider: &'static str, breaker_state: u8) {
        metrics::gauge!("llm_circuit_breaker_state", "provider" => provider)
            .set(f64::from(breaker_state));
    }
}

#[async_trait]
impl<P: LlmProvider> LlmProvider for ResilientLlmProvider<P> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn complete(&self, model: &str, prompt: &str) -> Result<String> {
        let provider = self.inner.name();

        if let Some(state) = self.breaker_rejects() {
            Self::record_breaker_state(provider, state);
            metrics::counter!(
                "llm_requests_total",
                "provider" => provider,
                "status" => "circuit_open"
            )
            .increment(1);
            return Err(Error::Upstream {
                operation: "chat_completion".to_string(),
                cause: "circuit breaker open".to_string(),
            });
        }

        let max_attempts = self.config.max_retries.saturating_add(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let start = Instant::now();
            let result = self.inner.complete(model, prompt).await;
            let elapsed = start.elapsed();

            let err = match result {
                Ok(value) => {
                    self.record_attempt(provider, elapsed, "success");
                    let state = self.breaker_success();
                    Self::record_breaker_state(provider, state);
                    return Ok(value);
                },
                Err(err) => err,
            };

            let status = if matches!(err, Error::Timeout { .. }) {
                "timeout"
            } else {
                "error"
            };
            self.record_attempt(provider, elapsed, status);

            let (tripped, state) = self.breaker_failure();
            Self::record_breaker_state(provider, state);
            if tripped {
                metrics::counter!("llm_circuit_breaker_trips_total", "provider" => provider)
                    .increment(1);
                tracing::warn!(provider, "LLM circuit breaker opened");
            }

            if tripped || attempt >= max_attempts || !is_retryable_error(&err) {
                return Err(err);
            }

            let delay = self.backoff(attempt);
            metrics::counter!("llm_retries_total", "provider" => provider).increment(1);
            tracing::warn!(
                provider,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Retrying LLM call after transient failure"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Timeouts, connection failures, rate limits and 5xx answers are transient.
fn is_retryable_error(err: &Error) -> bool {
    match err {
        Error::Timeout { .. } => true,
        Error::Upstream { cause, .. } => {
            let lower = cause.to_lowercase();
            lower.contains("status: 429")
                || lower.contains("status: 5")
                || lower.contains("error sending request")
                || lower.contains("connection")
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProvider {
        calls: AtomicU32,
        failures_before_success: u32,
        error: fn() -> Error,
    }

    impl FlakyProvider {
        fn new(failures_before_success: u32, error: fn() -> Error) -> Self {
            Self {
                calls: AtomicU32::new(0),
                failures_before_success,
                error,
            }
        }
    }

    #[async_trait]
    impl LlmProvider for FlakyProvider {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn complete(&self, _model: &str, prompt: &str) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                Err((self.error)())
            } else {
                Ok(prompt.to_string())
            }
        }
    }

    fn timeout() -> Error {
        Error::Timeout {
            operation: "chat_completion".to_string(),
            after_ms: 1,
        }
    }

    fn unauthorized() -> Error {
        Error::Upstream {
            operation: "chat_completion".to_string(),
            cause: "API returned status: 401 Unauthorized - bad key".to_string(),
        }
    }

    fn config(max_retries: u32) -> LlmResilienceConfig {
        LlmResilienceConfig {
            max_retries,
            retry_backoff_ms: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_default_does_not_retry() {
        let provider = ResilientLlmProvider::new(
            FlakyProvider::new(1, timeout),
            LlmResilienceConfig {
                retry_backoff_ms: 0,
                ..Default::default()
            },
        );
        assert!(provider.complete("m", "hi").await.is_err());
        assert_eq!(provider.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let provider = ResilientLlmProvider::new(FlakyProvider::new(2, timeout), config(2));
        assert_eq!(provider.complete("m", "hi").await.unwrap(), "hi");
        assert_eq!(provider.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_permanent_failures() {
        let provider = ResilientLlmProvider::new(FlakyProvider::new(5, unauthorized), config(3));
        assert!(provider.complete("m", "hi").await.is_err());
        assert_eq!(provider.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_circuit_opens_after_threshold() {
        let provider = ResilientLlmProvider::new(
            FlakyProvider::new(u32::MAX, unauthorized),
            LlmResilienceConfig {
                breaker_failure_threshold: 2,
                breaker_reset_timeout_ms: 60_000,
                ..config(0)
            },
        );

        assert!(provider.complete("m", "a").await.is_err());
        assert!(provider.complete("m", "b").await.is_err());
        let err = provider.complete("m", "c").await.unwrap_err();

        assert!(err.to_string().contains("circuit breaker open"));
        assert_eq!(provider.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_from_config_applies_every_field() {
        let llm = crate::config::LlmConfig {
            max_retries: Some(2),
            retry_backoff_ms: Some(10),
            breaker_failure_threshold: Some(0),
            breaker_reset_ms: Some(1_000),
            breaker_half_open_max_calls: Some(3),
            latency_slo_ms: Some(500),
            ..Default::default()
        };
        let config = LlmResilienceConfig::from_config(&llm);

        assert_eq!(config.max_retries, 2);
        assert_eq!(config.retry_backoff_ms, 10);
        assert_eq!(config.breaker_failure_threshold, 1);
        assert_eq!(config.breaker_reset_timeout_ms, 1_000);
        assert_eq!(config.breaker_half_open_max_calls, 3);
        assert_eq!(config.latency_slo_ms, 500);
    }

    #[test]
    fn test_from_config_keeps_defaults_when_unset() {
        let config = LlmResilienceConfig::from_config(&crate::config::LlmConfig::default());
        assert_eq!(config, LlmResilienceConfig::default());
    }

    #[test]
    fn test_breaker_half_open_recovers() {
        let mut breaker = CircuitBreaker::new(&LlmResilienceConfig {
            breaker_failure_threshold: 1,
            breaker_reset_timeout_ms: 0,
            ..Default::default()
        });

        assert!(breaker.on_failure());
        assert_eq!(breaker.state_value(), 1);
        assert!(breaker.allow());
        assert_eq!(breaker.state_value(), 2);
        assert!(!breaker.allow());
        breaker.on_success();
        assert_eq!(breaker.state_value(), 0);
    }

    #[test]
    fn test_is_retryable_error() {
        assert!(is_retryable_error(&timeout()));
        assert!(!is_retryable_error(&unauthorized()));
        assert!(is_retryable_error(&Error::Upstream {
            operation: "chat_completion".to_string(),
            cause: "API returned status: 503 Service Unavailable - overloaded".to_string(),
        }));
        assert!(is_retryable_error(&Error::Upstream {
            operation: "chat_completion".to_string(),
            cause: "API returned status: 429 Too Many Requests - slow down".to_string(),
        }));
        assert!(!is_retryable_error(&Error::Configuration("x".to_string())));
    }
}

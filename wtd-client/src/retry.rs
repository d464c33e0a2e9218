use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use wtd_core::{BackendError, CoreError, ErrorExt};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Base delay for exponential backoff (in milliseconds)
    pub base_delay_ms: u64,
    /// Maximum delay between retries (in milliseconds). A server asking
    /// for a longer wait ends the operation instead.
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Maximum jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
    /// Consecutive transiently failed operations before the breaker opens
    pub failure_threshold: u32,
    /// Seconds before an open breaker lets a trial request through
    pub recovery_timeout_s: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            failure_threshold: 5,
            recovery_timeout_s: 60,
        }
    }
}

impl RetryConfig {
    /// Tuned for interactive reads: a person is waiting on the answer.
    pub fn backend() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 300,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
            failure_threshold: 4,
            recovery_timeout_s: 30,
        }
    }

    /// A single attempt with no backoff.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::backend()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CircuitBreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitBreakerState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    config: RetryConfig,
}

impl CircuitBreaker {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            state: CircuitBreakerState::Closed,
            failure_count: 0,
            last_failure_time: None,
            config,
        }
    }

    pub fn allow_request(&mut self) -> bool {
        match self.state {
            CircuitBreakerState::Closed | CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Open => {
                let recovery = Duration::from_secs(self.config.recovery_timeout_s);
                match self.last_failure_time {
                    Some(last_failure) if last_failure.elapsed() >= recovery => {
                        debug!("Circuit breaker transitioning to half-open for recovery test");
                        self.state = CircuitBreakerState::HalfOpen;
                        true
                    }
                    _ => false,
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        if self.state == CircuitBreakerState::HalfOpen {
            info!("Circuit breaker recovery successful, returning to closed state");
            self.state = CircuitBreakerState::Closed;
            self.last_failure_time = None;
        }
        self.failure_count = 0;
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure_time = Some(Instant::now());

        match self.state {
            CircuitBreakerState::Closed => {
                if self.failure_count >= self.config.failure_threshold {
                    warn!(
                        "Circuit breaker opening due to {} consecutive failures",
                        self.failure_count
                    );
                    self.state = CircuitBreakerState::Open;
                }
            }
            CircuitBreakerState::HalfOpen => {
                warn!("Circuit breaker recovery failed, returning to open state");
                self.state = CircuitBreakerState::Open;
            }
            CircuitBreakerState::Open => {}
        }
    }

    pub fn get_state(&self) -> CircuitBreakerState {
        self.state.clone()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// Retry with exponential backoff
    Retry,
    /// Retry after the delay the server asked for
    RetryWithDelay(Duration),
    NoRetry,
}

pub fn get_retry_strategy(error: &CoreError) -> RetryStrategy {
    if !error.is_retryable() {
        return RetryStrategy::NoRetry;
    }
    match error.retry_after() {
        Some(delay) => RetryStrategy::RetryWithDelay(delay),
        None => RetryStrategy::Retry,
    }
}

/// Exponential backoff plus up to `jitter_factor` of random slack, capped at
/// `max_delay_ms`.
pub fn calculate_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let max_delay = Duration::from_millis(config.max_delay_ms);
    let multiplier = config.backoff_multiplier.powi(attempt as i32);
    let delay_ms = ((config.base_delay_ms as f64 * multiplier) as u64).min(config.max_delay_ms);
    let exponential_delay = Duration::from_millis(delay_ms);

    let jitter_range = (delay_ms as f64 * config.jitter_factor) as u64;
    let jitter = fastrand::u64(0..=jitter_range);

    (exponential_delay + Duration::from_millis(jitter)).min(max_delay)
}

#[derive(Debug, Clone, Default)]
pub struct RetryMetrics {
    pub total_retries: u64,
    pub successful_retries: u64,
    pub failed_operations: u64,
    pub circuit_breaker_trips: u64,
    pub average_retry_delay_ms: f64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wraps backend reads with backoff and one circuit breaker per operation.
#[derive(Debug)]
pub struct RetryExecutor {
    config: RetryConfig,
    circuit_breakers: Arc<Mutex<HashMap<String, CircuitBreaker>>>,
    metrics: Arc<Mutex<RetryMetrics>>,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            circuit_breakers: Arc::new(Mutex::new(HashMap::new())),
            metrics: Arc::new(Mutex::new(RetryMetrics::default())),
            config,
        }
    }

    fn with_breaker<R>(
        &self,
        operation_name: &str,
        f: impl FnOnce(&mut CircuitBreaker) -> R,
    ) -> R {
        let mut breakers = lock(&self.circuit_breakers);
        let breaker = breakers
            .entry(operation_name.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.config.clone()));
        f(breaker)
    }

    /// Runs `operation` until it succeeds, hits a permanent error, or runs
    /// out of attempts. The last error is returned unchanged. Only transient
    /// failures count against the operation's breaker.
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, operation: F) -> Result<T, CoreError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        if !self.with_breaker(operation_name, CircuitBreaker::allow_request) {
            lock(&self.metrics).circuit_breaker_trips += 1;
            warn!(
                "Circuit breaker is open, blocking request for {}",
                operation_name
            );
            return Err(CoreError::Backend(BackendError::CircuitOpen {
                operation: operation_name.to_string(),
            }));
        }

        let max_delay = Duration::from_millis(self.config.max_delay_ms);
        let mut total_delay_ms = 0u64;
        let mut attempt = 0u32;

        let last_error = loop {
            if attempt > 0 {
                debug!("Retry attempt {} for {}", attempt, operation_name);
            }

            let error = match operation().await {
                Ok(result) => {
                    self.with_breaker(operation_name, CircuitBreaker::record_success);
                    if attempt > 0 {
                        let mut metrics = lock(&self.metrics);
                        metrics.successful_retries += 1;
                        metrics.average_retry_delay_ms = (metrics.average_retry_delay_ms
                            * (metrics.successful_retries - 1) as f64
                            + total_delay_ms as f64)
                            / metrics.successful_retries as f64;
                        info!(
                            "Operation {} succeeded after {} retries (total delay: {}ms)",
                            operation_name, attempt, total_delay_ms
                        );
                    }
                    return Ok(result);
                }
                Err(error) => error,
            };

            debug!(
                "Attempt {} failed for {}: {}",
                attempt + 1,
                operation_name,
                error
            );

            if attempt + 1 >= self.config.max_attempts {
                break error;
            }

            let delay = match get_retry_strategy(&error) {
                RetryStrategy::NoRetry => {
                    debug!("Not retrying {} due to error type: {}", operation_name, error);
                    break error;
                }
                RetryStrategy::Retry => calculate_delay(attempt, &self.config),
                RetryStrategy::RetryWithDelay(delay) if delay > max_delay => {
                    warn!(
                        "Not retrying {}: server asked to wait {:?}, limit is {:?}",
                        operation_name, delay, max_delay
                    );
                    break error;
                }
                RetryStrategy::RetryWithDelay(delay) => delay,
            };

            total_delay_ms += delay.as_millis() as u64;
            info!("Retrying {} in {:?} due to: {}", operation_name, delay, error);
            lock(&self.metrics).total_retries += 1;
            sleep(delay).await;
            attempt += 1;
        };

        if last_error.is_retryable() {
            self.with_breaker(operation_name, CircuitBreaker::record_failure);
        }
        lock(&self.metrics).failed_operations += 1;

        error!(
            "Operation {} failed after {} attempts: {}",
            operation_name,
            attempt + 1,
            last_error
        );
        Err(last_error)
    }

    pub fn get_metrics(&self) -> RetryMetrics {
        lock(&self.metrics).clone()
    }

    /// State of the breaker guarding `operation_name`; operations never run
    /// are closed.
    pub fn get_circuit_breaker_state(&self, operation_name: &str) -> CircuitBreakerState {
        lock(&self.circuit_breakers)
            .get(operation_name)
            .map(CircuitBreaker::get_state)
            .unwrap_or(CircuitBreakerState::Closed)
    }
}

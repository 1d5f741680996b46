//! Configuration for the operation pipeline.

use rand::Rng;
use std::time::Duration;

/// Configuration shared by every card operation.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Name of the host application, stamped on every version.
    pub source_application: String,
    /// Message attached to created versions.
    pub version_message: String,
    /// Minimum time between two progress emissions of one operation.
    pub progress_interval: Duration,
    /// Upper bound on the payload size of one upload batch.
    pub upload_batch_bytes: usize,
    /// Maximum number of ids per download batch.
    pub download_batch_size: usize,
    /// Long per-object loops yield to the runtime after this many items.
    pub yield_every: usize,
    /// Length of the random suffix appended to flattened instance ids.
    pub id_suffix_len: usize,
    /// Retry configuration for transport calls.
    pub retry: RetryConfig,
}

impl EngineConfig {
    /// Creates a configuration for the given host application.
    pub fn new(source_application: impl Into<String>) -> Self {
        Self {
            source_application: source_application.into(),
            version_message: "Sent from connector".into(),
            progress_interval: Duration::from_millis(200),
            upload_batch_bytes: 1024 * 1024,
            download_batch_size: 500,
            yield_every: 100,
            id_suffix_len: 6,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the version message.
    pub fn with_version_message(mut self, message: impl Into<String>) -> Self {
        self.version_message = message.into();
        self
    }

    /// Sets the progress throttle interval.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Sets the upload batch size in bytes.
    pub fn with_upload_batch_bytes(mut self, bytes: usize) -> Self {
        self.upload_batch_bytes = bytes.max(1);
        self
    }

    /// Sets the download batch size.
    pub fn with_download_batch_size(mut self, size: usize) -> Self {
        self.download_batch_size = size.max(1);
        self
    }

    /// Sets how often long loops yield.
    pub fn with_yield_every(mut self, items: usize) -> Self {
        self.yield_every = items.max(1);
        self
    }

    /// Sets the flattened id suffix length.
    pub fn with_id_suffix_len(mut self, len: usize) -> Self {
        self.id_suffix_len = len;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new("conduit")
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Disables jitter.
    pub fn without_jitter(mut self) -> Self {
        self.add_jitter = false;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% jitter
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

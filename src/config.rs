//! Runtime configuration for development, production, and test environments
//!
//! Provides pre-configured settings optimized for different deployment
//! scenarios with validation and builder pattern support.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain_types::{
    ChannelCapacity, DedupCapacity, DedupTtlMs, IdleWindowMs, MaxSubscribeAttempts,
    ProduceTimeoutMs, RetryBackoffFactor, RetryBaseDelayMs, SnapshotEvery,
};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {field} - {reason}")]
    ValidationError { field: String, reason: String },
}

/// What a stream does when a subscriber queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OverflowPolicy {
    /// Block the producer until space frees up, failing only after the
    /// configured produce timeout
    #[default]
    Wait,
    /// Drop the newest envelope for that subscriber and count it
    DropNewest,
}

/// Complete runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // Streams
    pub stream_capacity: ChannelCapacity,
    pub mailbox_capacity: ChannelCapacity,
    pub produce_timeout_ms: ProduceTimeoutMs,
    pub overflow_policy: OverflowPolicy,

    // Subscription lifecycle
    pub max_subscribe_attempts: MaxSubscribeAttempts,
    pub retry_base_delay_ms: RetryBaseDelayMs,
    pub retry_backoff_factor: RetryBackoffFactor,
    pub subscription_idle_window_ms: IdleWindowMs,

    // Deduplication
    pub dedup_ttl_ms: DedupTtlMs,
    pub dedup_capacity: DedupCapacity,

    // Event sourcing
    pub snapshot_every: SnapshotEvery,

    // Observability
    pub enable_metrics: bool,
    pub enable_detailed_logs: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::development()
    }
}

impl RuntimeConfig {
    /// Creates a development configuration optimized for debugging
    ///
    /// # Panics
    /// Panics if any of the hardcoded values are out of range for their domain types
    #[must_use]
    pub fn development() -> Self {
        Self {
            stream_capacity: ChannelCapacity::try_new(100).unwrap(),
            mailbox_capacity: ChannelCapacity::try_new(128).unwrap(),
            produce_timeout_ms: ProduceTimeoutMs::try_new(5_000).unwrap(),
            overflow_policy: OverflowPolicy::Wait,

            max_subscribe_attempts: MaxSubscribeAttempts::try_new(5).unwrap(),
            retry_base_delay_ms: RetryBaseDelayMs::try_new(100).unwrap(),
            retry_backoff_factor: RetryBackoffFactor::try_new(2.0).unwrap(),
            subscription_idle_window_ms: IdleWindowMs::try_new(60_000).unwrap(),

            dedup_ttl_ms: DedupTtlMs::try_new(300_000).unwrap(),
            dedup_capacity: DedupCapacity::try_new(10_000).unwrap(),

            snapshot_every: SnapshotEvery::try_new(100).unwrap(),

            enable_metrics: true,
            enable_detailed_logs: true,
        }
    }

    /// Creates a production configuration optimized for throughput
    ///
    /// # Panics
    /// Panics if any of the hardcoded values are out of range for their domain types
    #[must_use]
    pub fn production() -> Self {
        Self {
            stream_capacity: ChannelCapacity::try_new(1_000).unwrap(),
            mailbox_capacity: ChannelCapacity::try_new(1_024).unwrap(),
            produce_timeout_ms: ProduceTimeoutMs::try_new(30_000).unwrap(),
            overflow_policy: OverflowPolicy::Wait,

            max_subscribe_attempts: MaxSubscribeAttempts::try_new(8).unwrap(),
            retry_base_delay_ms: RetryBaseDelayMs::try_new(200).unwrap(),
            retry_backoff_factor: RetryBackoffFactor::try_new(2.0).unwrap(),
            subscription_idle_window_ms: IdleWindowMs::try_new(120_000).unwrap(),

            dedup_ttl_ms: DedupTtlMs::try_new(300_000).unwrap(),
            dedup_capacity: DedupCapacity::try_new(100_000).unwrap(),

            snapshot_every: SnapshotEvery::try_new(100).unwrap(),

            enable_metrics: true,
            enable_detailed_logs: false,
        }
    }

    /// Creates a testing configuration with short timeouts for fast feedback
    ///
    /// # Panics
    /// Panics if any of the hardcoded values are out of range for their domain types
    #[must_use]
    pub fn testing() -> Self {
        Self {
            stream_capacity: ChannelCapacity::try_new(100).unwrap(),
            mailbox_capacity: ChannelCapacity::try_new(100).unwrap(),
            produce_timeout_ms: ProduceTimeoutMs::try_new(500).unwrap(),
            overflow_policy: OverflowPolicy::Wait,

            max_subscribe_attempts: MaxSubscribeAttempts::try_new(3).unwrap(),
            retry_base_delay_ms: RetryBaseDelayMs::try_new(10).unwrap(),
            retry_backoff_factor: RetryBackoffFactor::try_new(2.0).unwrap(),
            subscription_idle_window_ms: IdleWindowMs::try_new(200).unwrap(),

            dedup_ttl_ms: DedupTtlMs::try_new(60_000).unwrap(),
            dedup_capacity: DedupCapacity::try_new(1_000).unwrap(),

            snapshot_every: SnapshotEvery::try_new(5).unwrap(),

            enable_metrics: false,
            enable_detailed_logs: true,
        }
    }

    /// Creates a configuration builder starting from the development preset
    #[must_use]
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder {
            config: Self::development(),
        }
    }

    /// Validates cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.produce_timeout_ms.into_inner() >= self.subscription_idle_window_ms.into_inner() * 60
        {
            return Err(ConfigError::ValidationError {
                field: "produce_timeout_ms".to_string(),
                reason: "produce timeout dwarfs the subscription idle window".to_string(),
            });
        }
        Ok(())
    }
}

/// Builder for [`RuntimeConfig`]
#[derive(Debug)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    /// Sets the per-subscriber stream queue capacity
    #[must_use]
    pub fn stream_capacity(mut self, capacity: ChannelCapacity) -> Self {
        self.config.stream_capacity = capacity;
        self
    }

    /// Sets the per-actor mailbox capacity
    #[must_use]
    pub fn mailbox_capacity(mut self, capacity: ChannelCapacity) -> Self {
        self.config.mailbox_capacity = capacity;
        self
    }

    /// Sets the bound on how long a producer may block
    #[must_use]
    pub fn produce_timeout_ms(mut self, timeout: ProduceTimeoutMs) -> Self {
        self.config.produce_timeout_ms = timeout;
        self
    }

    /// Sets the full-queue policy
    #[must_use]
    pub fn overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.config.overflow_policy = policy;
        self
    }

    /// Sets the maximum subscription create/reconnect attempts
    #[must_use]
    pub fn max_subscribe_attempts(mut self, attempts: MaxSubscribeAttempts) -> Self {
        self.config.max_subscribe_attempts = attempts;
        self
    }

    /// Sets the base retry delay
    #[must_use]
    pub fn retry_base_delay_ms(mut self, delay: RetryBaseDelayMs) -> Self {
        self.config.retry_base_delay_ms = delay;
        self
    }

    /// Sets the retry backoff factor
    #[must_use]
    pub fn retry_backoff_factor(mut self, factor: RetryBackoffFactor) -> Self {
        self.config.retry_backoff_factor = factor;
        self
    }

    /// Sets the subscription idle window
    #[must_use]
    pub fn subscription_idle_window_ms(mut self, window: IdleWindowMs) -> Self {
        self.config.subscription_idle_window_ms = window;
        self
    }

    /// Sets the dedup cache TTL
    #[must_use]
    pub fn dedup_ttl_ms(mut self, ttl: DedupTtlMs) -> Self {
        self.config.dedup_ttl_ms = ttl;
        self
    }

    /// Sets the dedup cache entry cap
    #[must_use]
    pub fn dedup_capacity(mut self, capacity: DedupCapacity) -> Self {
        self.config.dedup_capacity = capacity;
        self
    }

    /// Sets the snapshot cadence for event-sourced agents
    #[must_use]
    pub fn snapshot_every(mut self, every: SnapshotEvery) -> Self {
        self.config.snapshot_every = every;
        self
    }

    /// Enables or disables metrics emission
    #[must_use]
    pub fn enable_metrics(mut self, enable: bool) -> Self {
        self.config.enable_metrics = enable;
        self
    }

    /// Enables or disables verbose per-event logging
    #[must_use]
    pub fn enable_detailed_logs(mut self, enable: bool) -> Self {
        self.config.enable_detailed_logs = enable;
        self
    }

    /// Validates and finishes the configuration
    pub fn build(self) -> Result<RuntimeConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

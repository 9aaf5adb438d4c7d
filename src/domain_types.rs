//! Domain types for the Arbor agent framework
//!
//! This module defines strongly-typed domain values to prevent primitive obsession
//! and improve type safety throughout the codebase.

use nutype::nutype;
use uuid::Uuid;

/// Unique identifier for an agent
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct AgentId(Uuid);

impl AgentId {
    /// Creates a new random agent ID
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }

    /// Derives a stable agent ID from a human-readable name
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        Self::new(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()))
    }
}

/// Unique identifier for a published event envelope
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Correlation identifier linking an envelope to the publish chain that caused it
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Creates a new random correlation ID
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Unique identifier for a stream subscription
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Creates a new random subscription ID
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Identifier of a per-agent message stream
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct StreamId(Uuid);

impl StreamId {
    /// The stream owned by the given agent. Every agent has exactly one.
    #[must_use]
    pub fn for_agent(agent_id: AgentId) -> Self {
        Self::new(agent_id.into_inner())
    }
}

/// Monotonically increasing, dense per-agent event-log version.
///
/// Version `0` means "no events"; the first appended event is version `1`.
#[nutype(
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Serialize,
        Deserialize,
        Display,
        Default,
        From,
        Into
    ),
    default = 0
)]
pub struct EventVersion(u64);

impl EventVersion {
    /// The version immediately following this one
    #[must_use]
    pub fn next(self) -> Self {
        Self::new(self.into_inner() + 1)
    }

    /// Gets the value as u64
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.into_inner()
    }
}

/// Number of hierarchy hops an envelope has taken (or is allowed to take).
///
/// As a limit, `0` means "unlimited": an unset limit places no bound on
/// propagation rather than forbidding all hops.
#[nutype(
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Serialize,
        Deserialize,
        Display,
        Default,
        From,
        Into
    ),
    default = 0
)]
pub struct HopCount(u32);

impl HopCount {
    /// The hop count after one more emission
    #[must_use]
    pub fn incremented(self) -> Self {
        Self::new(self.into_inner().saturating_add(1))
    }

    /// Gets the value as u32
    #[must_use]
    pub fn as_u32(&self) -> u32 {
        self.into_inner()
    }

    /// Whether this value, used as a limit, means "no limit"
    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.into_inner() == 0
    }
}

/// Dispatch priority of an event handler; lower values run first
#[nutype(
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Serialize,
        Deserialize,
        Display,
        Default,
        From,
        Into
    ),
    default = 0
)]
pub struct HandlerPriority(i32);

impl HandlerPriority {
    /// The lowest possible priority; all-event handlers default to this
    #[must_use]
    pub fn lowest() -> Self {
        Self::new(i32::MAX)
    }

    /// Gets the value as i32
    #[must_use]
    pub fn as_i32(&self) -> i32 {
        self.into_inner()
    }
}

/// Name of a registered event handler
#[nutype(
    validate(len_char_min = 1, len_char_max = 256),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        Deref,
        TryFrom,
        Into
    )
)]
pub struct HandlerName(String);

impl HandlerName {
    /// Gets the name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        self
    }
}

/// Stable string identifier of an event schema, used for payload tagging
#[nutype(
    validate(len_char_min = 1, len_char_max = 512),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        Deref,
        TryFrom,
        Into
    )
)]
pub struct EventTypeTag(String);

impl EventTypeTag {
    /// Gets the tag as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        self
    }
}

/// Channel capacity for bounded stream and mailbox queues
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 100
)]
pub struct ChannelCapacity(usize);

impl ChannelCapacity {
    /// Gets the value as usize for use with tokio channels
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// How long a producer may block on a full stream before failing
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 600_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 5_000
)]
pub struct ProduceTimeoutMs(u64);

impl ProduceTimeoutMs {
    /// Converts to Duration
    #[must_use]
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.into_inner())
    }
}

/// Maximum attempts when creating or reconnecting a subscription
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 20),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 5
)]
pub struct MaxSubscribeAttempts(u8);

impl MaxSubscribeAttempts {
    /// Gets the value as u8
    #[must_use]
    pub fn as_u8(&self) -> u8 {
        self.into_inner()
    }
}

/// Base delay between subscription retry attempts
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 60_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 100
)]
pub struct RetryBaseDelayMs(u64);

impl RetryBaseDelayMs {
    /// Gets the value as u64
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.into_inner()
    }
}

/// Multiplier applied to the retry delay after each failed attempt
#[nutype(
    validate(greater_or_equal = 1.0, less_or_equal = 10.0, finite),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        PartialOrd,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 2.0
)]
pub struct RetryBackoffFactor(f64);

impl RetryBackoffFactor {
    /// Gets the value as f64
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        self.into_inner()
    }
}

/// Idle window after which a subscription with no activity is considered unhealthy
#[nutype(
    validate(greater_or_equal = 10, less_or_equal = 3_600_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 60_000
)]
pub struct IdleWindowMs(u64);

impl IdleWindowMs {
    /// Converts to Duration
    #[must_use]
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.into_inner())
    }
}

/// Time-to-live of entries in the envelope deduplication caches
#[nutype(
    validate(greater_or_equal = 100, less_or_equal = 86_400_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 300_000
)]
pub struct DedupTtlMs(u64);

impl DedupTtlMs {
    /// Converts to Duration
    #[must_use]
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.into_inner())
    }
}

/// Maximum number of entries retained by a deduplication cache
#[nutype(
    validate(greater_or_equal = 16, less_or_equal = 1_000_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 10_000
)]
pub struct DedupCapacity(usize);

impl DedupCapacity {
    /// Gets the value as usize
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Number of confirmed events between automatic snapshots of event-sourced state
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 100
)]
pub struct SnapshotEvery(u64);

impl SnapshotEvery {
    /// Gets the value as u64
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.into_inner()
    }
}

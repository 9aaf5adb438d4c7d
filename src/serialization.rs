//! Tagged event payload codec
//!
//! Events cross agent boundaries as opaque bytes paired with a stable type
//! tag. The tag is what the receiver dispatches on; the bytes are only
//! decoded once a matching handler (or the event-sourced replay path) asks
//! for the concrete type. A small registry maps tags back to decoders for
//! diagnostics and introspection.

use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use thiserror::Error;

use crate::domain_types::EventTypeTag;

/// A typed event that can travel inside an [`EventPayload`].
///
/// The default tag is the Rust type path, which is stable within one build
/// but not across renames; events that cross process boundaries should pin
/// an explicit tag.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable string identifier of this event's schema
    #[must_use]
    fn event_type() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Errors raised while encoding or decoding payloads
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("payload type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("invalid event type tag {tag:?}: {reason}")]
    InvalidTag { tag: String, reason: String },

    #[error("serialization failed: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

/// An opaque, type-tagged event payload carried by an envelope
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EventPayload {
    type_tag: EventTypeTag,
    data: Bytes,
}

impl EventPayload {
    /// Encodes a typed event into a tagged payload
    pub fn encode<E: DomainEvent>(event: &E) -> Result<Self, CodecError> {
        let tag = validated_tag(E::event_type())?;
        let data = Bytes::from(serde_json::to_vec(event)?);
        Ok(Self {
            type_tag: tag,
            data,
        })
    }

    /// Builds a payload from a pre-validated tag and raw bytes
    #[must_use]
    pub fn from_parts(type_tag: EventTypeTag, data: Bytes) -> Self {
        Self { type_tag, data }
    }

    /// Decodes the payload into the given event type.
    ///
    /// Fails with [`CodecError::TypeMismatch`] when the tag does not match,
    /// so callers can dispatch on the tag without a trial decode.
    pub fn decode<E: DomainEvent>(&self) -> Result<E, CodecError> {
        if self.type_tag.as_str() != E::event_type() {
            return Err(CodecError::TypeMismatch {
                expected: E::event_type().to_string(),
                found: self.type_tag.as_str().to_string(),
            });
        }
        Ok(serde_json::from_slice(&self.data)?)
    }

    /// Whether this payload carries the given event type
    #[must_use]
    pub fn matches<E: DomainEvent>(&self) -> bool {
        self.type_tag.as_str() == E::event_type()
    }

    /// The schema tag of the carried event
    #[must_use]
    pub fn type_tag(&self) -> &EventTypeTag {
        &self.type_tag
    }

    /// The raw encoded bytes
    #[must_use]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Size of the encoded payload in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the encoded payload is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

pub(crate) fn validated_tag(raw: &str) -> Result<EventTypeTag, CodecError> {
    EventTypeTag::try_new(raw.to_string()).map_err(|e| CodecError::InvalidTag {
        tag: raw.to_string(),
        reason: e.to_string(),
    })
}

type DynDecoder =
    Arc<dyn Fn(&Bytes) -> Result<serde_json::Value, CodecError> + Send + Sync + 'static>;

/// A registered event schema: the Rust type behind a tag plus a decoder
/// producing a structured value for logs and tooling.
#[derive(Clone)]
pub struct RegisteredEventType {
    rust_name: &'static str,
    decode: DynDecoder,
}

impl RegisteredEventType {
    /// The Rust type path backing this tag
    #[must_use]
    pub fn rust_name(&self) -> &'static str {
        self.rust_name
    }

    /// Decodes raw payload bytes into a structured value
    pub fn decode(&self, data: &Bytes) -> Result<serde_json::Value, CodecError> {
        (self.decode)(data)
    }
}

impl std::fmt::Debug for RegisteredEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredEventType")
            .field("rust_name", &self.rust_name)
            .finish()
    }
}

/// Registry from event type tags to decoders.
///
/// Dispatch never consults this registry (handlers decode statically); it
/// exists so that operators and tests can turn an opaque payload back into
/// something readable.
#[derive(Debug, Default)]
pub struct EventTypeRegistry {
    entries: DashMap<EventTypeTag, RegisteredEventType>,
}

impl EventTypeRegistry {
    /// Creates an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an event type under its schema tag. Re-registration of the
    /// same tag replaces the previous entry.
    pub fn register<E: DomainEvent>(&self) -> Result<(), CodecError> {
        let tag = validated_tag(E::event_type())?;
        let entry = RegisteredEventType {
            rust_name: std::any::type_name::<E>(),
            decode: Arc::new(|data: &Bytes| {
                // Round-trip through the concrete type so malformed bytes are
                // rejected rather than echoed back as raw JSON.
                let event: E = serde_json::from_slice(data)?;
                Ok(serde_json::to_value(event)?)
            }),
        };
        self.entries.insert(tag, entry);
        Ok(())
    }

    /// Whether a decoder is registered for the tag
    #[must_use]
    pub fn contains(&self, tag: &EventTypeTag) -> bool {
        self.entries.contains_key(tag)
    }

    /// Looks up the registered schema for a tag
    #[must_use]
    pub fn get(&self, tag: &EventTypeTag) -> Option<RegisteredEventType> {
        self.entries.get(tag).map(|e| e.value().clone())
    }

    /// Decodes a payload via its registered decoder, `None` if unregistered
    pub fn describe(&self, payload: &EventPayload) -> Option<Result<serde_json::Value, CodecError>> {
        self.entries
            .get(payload.type_tag())
            .map(|e| e.value().decode(payload.data()))
    }

    /// Number of registered event types
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

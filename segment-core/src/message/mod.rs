//! Message model
//!
//! A [`Message`] is one immutable analytics event. Every message carries the
//! same set of common fields (id, timestamp, context, integrations and the
//! identity pair) plus a variant-specific [`Payload`].
//!
//! | Variant | Required | Optional |
//! |---------|----------|----------|
//! | Identify | - | `traits` |
//! | Group | `groupId` | `traits` (default empty) |
//! | Track | `event` | `properties` (default empty) |
//! | Screen | `name` | `properties` (default empty) |
//! | Alias | `previousId` | - |
//!
//! Messages are only created through the builders in [`builder`] (or by
//! decoding a wire payload) and expose read-only accessors afterwards. A stage
//! that wants to change a message calls [`Message::to_builder`] and builds a
//! new one.

pub mod builder;

use chrono::{DateTime, Utc};
use serde_json::Value;

pub use builder::{
    AliasBuilder, AnyBuilder, CommonBuilder, GroupBuilder, IdentifyBuilder, MessageBuilder,
    ScreenBuilder, TrackBuilder,
};

/// String-keyed map of arbitrary JSON values used for context, traits,
/// properties and integrations.
pub type Properties = serde_json::Map<String, Value>;

/// Wire discriminator for the five message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Identify,
    Group,
    Track,
    Screen,
    Alias,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Identify => "identify",
            MessageType::Group => "group",
            MessageType::Track => "track",
            MessageType::Screen => "screen",
            MessageType::Alias => "alias",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "identify" => Ok(MessageType::Identify),
            "group" => Ok(MessageType::Group),
            "track" => Ok(MessageType::Track),
            "screen" => Ok(MessageType::Screen),
            "alias" => Ok(MessageType::Alias),
            _ => Err(format!("unknown message type: {}", s)),
        }
    }
}

/// Fields shared by every message variant
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CommonFields {
    pub(crate) message_id: String,
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) context: Option<Properties>,
    pub(crate) integrations: Properties,
    pub(crate) user_id: Option<String>,
    pub(crate) anonymous_id: Option<String>,
}

/// Variant-specific fields
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Identify { traits: Option<Properties> },
    Group { group_id: String, traits: Properties },
    Track { event: String, properties: Properties },
    Screen { name: String, properties: Properties },
    Alias { previous_id: String },
}

impl Payload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::Identify { .. } => MessageType::Identify,
            Payload::Group { .. } => MessageType::Group,
            Payload::Track { .. } => MessageType::Track,
            Payload::Screen { .. } => MessageType::Screen,
            Payload::Alias { .. } => MessageType::Alias,
        }
    }
}

/// One immutable analytics event
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    common: CommonFields,
    payload: Payload,
}

impl Message {
    pub(crate) fn from_parts(common: CommonFields, payload: Payload) -> Self {
        Self { common, payload }
    }

    pub(crate) fn common(&self) -> &CommonFields {
        &self.common
    }

    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }

    /// Unique identifier assigned at build time, used for deduplication
    /// downstream.
    pub fn message_id(&self) -> &str {
        &self.common.message_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.common.timestamp
    }

    pub fn context(&self) -> Option<&Properties> {
        self.common.context.as_ref()
    }

    /// Per-integration enablement flags or option maps. Empty when the
    /// caller set none.
    pub fn integrations(&self) -> &Properties {
        &self.common.integrations
    }

    pub fn user_id(&self) -> Option<&str> {
        self.common.user_id.as_deref()
    }

    pub fn anonymous_id(&self) -> Option<&str> {
        self.common.anonymous_id.as_deref()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Returns a builder pre-populated with every field of this message,
    /// including its `messageId`.
    pub fn to_builder(&self) -> AnyBuilder {
        AnyBuilder::from_message(self)
    }
}

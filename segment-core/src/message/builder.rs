//! Validating builders for each message variant
//!
//! Each variant has its own builder holding the variant fields plus a shared
//! [`CommonBuilder`]. The common setters live on the [`MessageBuilder`] trait,
//! so `TrackBuilder::new().event("Login")?.user_id("u1")?.build()?` works the
//! same way for every variant.
//!
//! Setters validate eagerly and fail with [`Error::Validation`] on blank
//! strings. `build()` checks identity first ([`Error::Identity`]), then fills
//! in defaults, then checks the variant's required fields.

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::{CommonFields, Message, Payload, Properties};
use crate::error::{Error, Result};

/// Rejects empty or whitespace-only strings.
pub(crate) fn require_non_empty(value: String, name: &str) -> Result<String> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{} cannot be null or empty", name)));
    }
    Ok(value)
}

fn require_present(value: Option<String>, name: &str) -> Result<String> {
    value.ok_or_else(|| Error::Validation(format!("{} is required", name)))
}

/// Builder state for the fields every message shares
#[derive(Debug, Clone, Default)]
pub struct CommonBuilder {
    message_id: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    context: Option<Properties>,
    integrations: Option<Properties>,
    user_id: Option<String>,
    anonymous_id: Option<String>,
}

impl CommonBuilder {
    fn from_fields(fields: &CommonFields) -> Self {
        Self {
            message_id: Some(fields.message_id.clone()),
            timestamp: Some(fields.timestamp),
            context: fields.context.clone(),
            integrations: Some(fields.integrations.clone()),
            user_id: fields.user_id.clone(),
            anonymous_id: fields.anonymous_id.clone(),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn anonymous_id(&self) -> Option<&str> {
        self.anonymous_id.as_deref()
    }

    /// Checks identity and fills in defaults for id, timestamp and
    /// integrations.
    fn finish(self) -> Result<CommonFields> {
        if self.user_id.is_none() && self.anonymous_id.is_none() {
            return Err(Error::Identity);
        }

        let message_id = self
            .message_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        // The wire format carries milliseconds; truncating here keeps
        // decode(encode(m)) == m.
        let timestamp = self.timestamp.unwrap_or_else(Utc::now).trunc_subsecs(3);

        Ok(CommonFields {
            message_id,
            timestamp,
            context: self.context,
            integrations: self.integrations.unwrap_or_default(),
            user_id: self.user_id,
            anonymous_id: self.anonymous_id,
        })
    }
}

/// Fluent setters shared by every variant builder
pub trait MessageBuilder: Sized {
    fn common_mut(&mut self) -> &mut CommonBuilder;

    /// Validate and produce an immutable [`Message`].
    fn build(self) -> Result<Message>;

    /// Override the generated message id. Downstream systems may drop
    /// messages whose id they have already seen.
    fn message_id(mut self, message_id: impl Into<String>) -> Result<Self> {
        self.common_mut().message_id = Some(require_non_empty(message_id.into(), "messageId")?);
        Ok(self)
    }

    /// Override the event time, e.g. for historical imports.
    fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.common_mut().timestamp = Some(timestamp);
        self
    }

    /// Replace the context map.
    fn context(mut self, context: Properties) -> Self {
        self.common_mut().context = Some(context);
        self
    }

    /// Enable or disable delivery to one integration. `"All"` sets the
    /// default for integrations without their own key.
    fn integration(mut self, key: impl Into<String>, enabled: bool) -> Result<Self> {
        let key = require_non_empty(key.into(), "key")?;
        self.common_mut()
            .integrations
            .get_or_insert_with(Properties::new)
            .insert(key, Value::Bool(enabled));
        Ok(self)
    }

    /// Attach options for one integration, which implicitly enables it.
    fn integration_options(mut self, key: impl Into<String>, options: Properties) -> Result<Self> {
        let key = require_non_empty(key.into(), "key")?;
        self.common_mut()
            .integrations
            .get_or_insert_with(Properties::new)
            .insert(key, Value::Object(options));
        Ok(self)
    }

    fn user_id(mut self, user_id: impl Into<String>) -> Result<Self> {
        self.common_mut().user_id = Some(require_non_empty(user_id.into(), "userId")?);
        Ok(self)
    }

    fn anonymous_id(mut self, anonymous_id: impl Into<String>) -> Result<Self> {
        self.common_mut().anonymous_id =
            Some(require_non_empty(anonymous_id.into(), "anonymousId")?);
        Ok(self)
    }
}

// ============================================
// Identify
// ============================================

/// Ties a user to a recognizable id and optional traits.
#[derive(Debug, Clone, Default)]
pub struct IdentifyBuilder {
    common: CommonBuilder,
    traits: Option<Properties>,
}

impl IdentifyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn traits(mut self, traits: Properties) -> Self {
        self.traits = Some(traits);
        self
    }

    /// Set a single trait, creating the traits map if needed.
    pub fn with_trait(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.traits
            .get_or_insert_with(Properties::new)
            .insert(key.into(), value.into());
        self
    }
}

impl MessageBuilder for IdentifyBuilder {
    fn common_mut(&mut self) -> &mut CommonBuilder {
        &mut self.common
    }

    fn build(self) -> Result<Message> {
        let common = self.common.finish()?;
        Ok(Message::from_parts(
            common,
            Payload::Identify {
                traits: self.traits,
            },
        ))
    }
}

// ============================================
// Group
// ============================================

/// Associates a user with a group such as a company or team.
#[derive(Debug, Clone, Default)]
pub struct GroupBuilder {
    common: CommonBuilder,
    group_id: Option<String>,
    traits: Option<Properties>,
}

impl GroupBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group_id(mut self, group_id: impl Into<String>) -> Result<Self> {
        self.group_id = Some(require_non_empty(group_id.into(), "groupId")?);
        Ok(self)
    }

    pub fn traits(mut self, traits: Properties) -> Self {
        self.traits = Some(traits);
        self
    }

    pub fn with_trait(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.traits
            .get_or_insert_with(Properties::new)
            .insert(key.into(), value.into());
        self
    }
}

impl MessageBuilder for GroupBuilder {
    fn common_mut(&mut self) -> &mut CommonBuilder {
        &mut self.common
    }

    fn build(self) -> Result<Message> {
        let common = self.common.finish()?;
        let group_id = require_present(self.group_id, "groupId")?;
        Ok(Message::from_parts(
            common,
            Payload::Group {
                group_id,
                traits: self.traits.unwrap_or_default(),
            },
        ))
    }
}

// ============================================
// Track
// ============================================

/// Records an action the user performed.
#[derive(Debug, Clone, Default)]
pub struct TrackBuilder {
    common: CommonBuilder,
    event: Option<String>,
    properties: Option<Properties>,
}

impl TrackBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event(mut self, event: impl Into<String>) -> Result<Self> {
        self.event = Some(require_non_empty(event.into(), "event")?);
        Ok(self)
    }

    pub fn properties(mut self, properties: Properties) -> Self {
        self.properties = Some(properties);
        self
    }

    /// Set a single property, creating the properties map if needed.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties
            .get_or_insert_with(Properties::new)
            .insert(key.into(), value.into());
        self
    }
}

impl MessageBuilder for TrackBuilder {
    fn common_mut(&mut self) -> &mut CommonBuilder {
        &mut self.common
    }

    fn build(self) -> Result<Message> {
        let common = self.common.finish()?;
        let event = require_present(self.event, "event")?;
        Ok(Message::from_parts(
            common,
            Payload::Track {
                event,
                properties: self.properties.unwrap_or_default(),
            },
        ))
    }
}

// ============================================
// Screen
// ============================================

/// Records that the user viewed a screen.
#[derive(Debug, Clone, Default)]
pub struct ScreenBuilder {
    common: CommonBuilder,
    name: Option<String>,
    properties: Option<Properties>,
}

impl ScreenBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Result<Self> {
        self.name = Some(require_non_empty(name.into(), "name")?);
        Ok(self)
    }

    pub fn properties(mut self, properties: Properties) -> Self {
        self.properties = Some(properties);
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties
            .get_or_insert_with(Properties::new)
            .insert(key.into(), value.into());
        self
    }
}

impl MessageBuilder for ScreenBuilder {
    fn common_mut(&mut self) -> &mut CommonBuilder {
        &mut self.common
    }

    fn build(self) -> Result<Message> {
        let common = self.common.finish()?;
        let name = require_present(self.name, "name")?;
        Ok(Message::from_parts(
            common,
            Payload::Screen {
                name,
                properties: self.properties.unwrap_or_default(),
            },
        ))
    }
}

// ============================================
// Alias
// ============================================

/// Merges two user identities.
#[derive(Debug, Clone, Default)]
pub struct AliasBuilder {
    common: CommonBuilder,
    previous_id: Option<String>,
}

impl AliasBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn previous_id(mut self, previous_id: impl Into<String>) -> Result<Self> {
        self.previous_id = Some(require_non_empty(previous_id.into(), "previousId")?);
        Ok(self)
    }
}

impl MessageBuilder for AliasBuilder {
    fn common_mut(&mut self) -> &mut CommonBuilder {
        &mut self.common
    }

    fn build(self) -> Result<Message> {
        let common = self.common.finish()?;
        let previous_id = require_present(self.previous_id, "previousId")?;
        Ok(Message::from_parts(common, Payload::Alias { previous_id }))
    }
}

// ============================================
// Copy with overrides
// ============================================

/// Builder for a message of any variant, produced by
/// [`Message::to_builder`].
#[derive(Debug, Clone)]
pub enum AnyBuilder {
    Identify(IdentifyBuilder),
    Group(GroupBuilder),
    Track(TrackBuilder),
    Screen(ScreenBuilder),
    Alias(AliasBuilder),
}

impl AnyBuilder {
    pub(crate) fn from_message(message: &Message) -> Self {
        let common = CommonBuilder::from_fields(message.common());
        match message.payload() {
            Payload::Identify { traits } => AnyBuilder::Identify(IdentifyBuilder {
                common,
                traits: traits.clone(),
            }),
            Payload::Group { group_id, traits } => AnyBuilder::Group(GroupBuilder {
                common,
                group_id: Some(group_id.clone()),
                traits: Some(traits.clone()),
            }),
            Payload::Track { event, properties } => AnyBuilder::Track(TrackBuilder {
                common,
                event: Some(event.clone()),
                properties: Some(properties.clone()),
            }),
            Payload::Screen { name, properties } => AnyBuilder::Screen(ScreenBuilder {
                common,
                name: Some(name.clone()),
                properties: Some(properties.clone()),
            }),
            Payload::Alias { previous_id } => AnyBuilder::Alias(AliasBuilder {
                common,
                previous_id: Some(previous_id.clone()),
            }),
        }
    }
}

impl MessageBuilder for AnyBuilder {
    fn common_mut(&mut self) -> &mut CommonBuilder {
        match self {
            AnyBuilder::Identify(b) => b.common_mut(),
            AnyBuilder::Group(b) => b.common_mut(),
            AnyBuilder::Track(b) => b.common_mut(),
            AnyBuilder::Screen(b) => b.common_mut(),
            AnyBuilder::Alias(b) => b.common_mut(),
        }
    }

    fn build(self) -> Result<Message> {
        match self {
            AnyBuilder::Identify(b) => b.build(),
            AnyBuilder::Group(b) => b.build(),
            AnyBuilder::Track(b) => b.build(),
            AnyBuilder::Screen(b) => b.build(),
            AnyBuilder::Alias(b) => b.build(),
        }
    }
}

//! Wire codec for messages and batches
//!
//! Messages encode to the collector's JSON shape:
//!
//! ```text
//! {"type":"track","messageId":"...","timestamp":"2024-03-01T12:30:00.000Z",
//!  "context":{...},"integrations":{...},"userId":"...","anonymousId":"...",
//!  "event":"...","properties":{...}}
//! ```
//!
//! The discriminator is written first, then the common fields that carry a
//! value, then the variant fields. Decoding collects every field into a
//! scratch record first (field order does not matter, unknown fields and
//! explicit nulls are skipped) and only then dispatches on `type`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::message::{CommonFields, Message, MessageType, Payload, Properties};

/// Largest encoded size of a single message, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 15 << 10;

/// Largest encoded size of a batch upload, in bytes.
pub const MAX_BATCH_SIZE: usize = 500 << 10;

/// Messages per upload. Derived from the two size limits rather than from
/// observed sizes, so a batch of maximum-size messages still fits.
pub const MAX_BATCH_COUNT: usize = MAX_BATCH_SIZE / MAX_MESSAGE_SIZE;

/// Formats a timestamp the way the collector expects it.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Decode(format!("invalid timestamp {:?}: {}", value, e)))
}

/// Encode a message, rejecting it if it exceeds [`MAX_MESSAGE_SIZE`].
pub fn encode(message: &Message) -> Result<Vec<u8>> {
    let bytes = serde_json::to_vec(message)?;
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(Error::MessageTooLarge {
            size: bytes.len(),
            limit: MAX_MESSAGE_SIZE,
        });
    }
    Ok(bytes)
}

/// Decode a message previously produced by [`encode`] or sent by another
/// client.
pub fn decode(bytes: &[u8]) -> Result<Message> {
    let raw: RawMessage =
        serde_json::from_slice(bytes).map_err(|e| Error::Decode(e.to_string()))?;
    raw.into_message()
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let common = self.common();
        let mut map = serializer.serialize_map(None)?;

        map.serialize_entry("type", self.message_type().as_str())?;
        map.serialize_entry("messageId", &common.message_id)?;
        map.serialize_entry("timestamp", &format_timestamp(&common.timestamp))?;
        if let Some(context) = &common.context {
            map.serialize_entry("context", context)?;
        }
        if !common.integrations.is_empty() {
            map.serialize_entry("integrations", &common.integrations)?;
        }
        if let Some(user_id) = &common.user_id {
            map.serialize_entry("userId", user_id)?;
        }
        if let Some(anonymous_id) = &common.anonymous_id {
            map.serialize_entry("anonymousId", anonymous_id)?;
        }

        match self.payload() {
            Payload::Identify { traits } => {
                if let Some(traits) = traits {
                    map.serialize_entry("traits", traits)?;
                }
            }
            Payload::Group { group_id, traits } => {
                map.serialize_entry("groupId", group_id)?;
                if !traits.is_empty() {
                    map.serialize_entry("traits", traits)?;
                }
            }
            Payload::Track { event, properties } => {
                map.serialize_entry("event", event)?;
                if !properties.is_empty() {
                    map.serialize_entry("properties", properties)?;
                }
            }
            Payload::Screen { name, properties } => {
                map.serialize_entry("name", name)?;
                if !properties.is_empty() {
                    map.serialize_entry("properties", properties)?;
                }
            }
            Payload::Alias { previous_id } => {
                map.serialize_entry("previousId", previous_id)?;
            }
        }

        map.end()
    }
}

/// Scratch record holding every field any variant might carry
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    #[serde(rename = "type")]
    kind: Option<String>,
    message_id: Option<String>,
    timestamp: Option<String>,
    context: Option<Properties>,
    integrations: Option<Properties>,
    user_id: Option<String>,
    anonymous_id: Option<String>,
    previous_id: Option<String>,
    group_id: Option<String>,
    traits: Option<Properties>,
    name: Option<String>,
    event: Option<String>,
    properties: Option<Properties>,
}

fn required(value: Option<String>, field: &str, kind: MessageType) -> Result<String> {
    value.ok_or_else(|| Error::Decode(format!("{} message is missing {}", kind, field)))
}

impl RawMessage {
    fn into_message(self) -> Result<Message> {
        let kind_str = self
            .kind
            .ok_or_else(|| Error::Decode("message is missing type".to_string()))?;
        let kind: MessageType = kind_str.parse().map_err(Error::Decode)?;

        let timestamp = parse_timestamp(&required(self.timestamp, "timestamp", kind)?)?;
        let common = CommonFields {
            message_id: required(self.message_id, "messageId", kind)?,
            timestamp,
            context: self.context,
            integrations: self.integrations.unwrap_or_default(),
            user_id: self.user_id,
            anonymous_id: self.anonymous_id,
        };

        let payload = match kind {
            MessageType::Identify => Payload::Identify {
                traits: self.traits,
            },
            MessageType::Group => Payload::Group {
                group_id: required(self.group_id, "groupId", kind)?,
                traits: self.traits.unwrap_or_default(),
            },
            MessageType::Track => Payload::Track {
                event: required(self.event, "event", kind)?,
                properties: self.properties.unwrap_or_default(),
            },
            MessageType::Screen => Payload::Screen {
                name: required(self.name, "name", kind)?,
                properties: self.properties.unwrap_or_default(),
            },
            MessageType::Alias => Payload::Alias {
                previous_id: required(self.previous_id, "previousId", kind)?,
            },
        };

        Ok(Message::from_parts(common, payload))
    }
}

/// A non-empty group of messages uploaded in one request
#[derive(Debug, Clone)]
pub struct Batch {
    messages: Vec<Message>,
    sent_at: DateTime<Utc>,
}

impl Batch {
    /// Create a batch stamped with the current time.
    pub fn new(messages: Vec<Message>) -> Result<Self> {
        Self::with_sent_at(messages, Utc::now())
    }

    pub fn with_sent_at(messages: Vec<Message>, sent_at: DateTime<Utc>) -> Result<Self> {
        if messages.is_empty() {
            return Err(Error::Validation("batch cannot be null or empty".to_string()));
        }
        Ok(Self { messages, sent_at })
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn sent_at(&self) -> DateTime<Utc> {
        self.sent_at
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Serialize into the `/v1/batch` request body.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&BatchBody {
            batch: &self.messages,
            sent_at: format_timestamp(&self.sent_at),
        })?)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchBody<'a> {
    batch: &'a [Message],
    sent_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{
        AliasBuilder, GroupBuilder, IdentifyBuilder, MessageBuilder, ScreenBuilder, TrackBuilder,
    };
    use chrono::TimeZone;
    use serde_json::{json, Value};

    fn props(value: Value) -> Properties {
        value.as_object().cloned().unwrap()
    }

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()
    }

    #[test]
    fn test_constants() {
        assert_eq!(MAX_MESSAGE_SIZE, 15360);
        assert_eq!(MAX_BATCH_SIZE, 512000);
        assert_eq!(MAX_BATCH_COUNT, 33);
    }

    #[test]
    fn test_encode_track_shape() {
        let message = TrackBuilder::new()
            .event("Login")
            .unwrap()
            .user_id("u1")
            .unwrap()
            .message_id("m1")
            .unwrap()
            .timestamp(fixed_time())
            .property("method", "password")
            .build()
            .unwrap();

        let json: Value = serde_json::from_slice(&encode(&message).unwrap()).unwrap();
        assert_eq!(
            json,
            json!({
                "type": "track",
                "messageId": "m1",
                "timestamp": "2024-03-01T12:30:00.000Z",
                "userId": "u1",
                "event": "Login",
                "properties": {"method": "password"}
            })
        );
    }

    #[test]
    fn test_type_is_first_key() {
        let message = AliasBuilder::new()
            .previous_id("old")
            .unwrap()
            .user_id("new")
            .unwrap()
            .build()
            .unwrap();
        let text = String::from_utf8(encode(&message).unwrap()).unwrap();
        assert!(text.starts_with(r#"{"type":"alias""#), "got {}", text);
    }

    #[test]
    fn test_round_trip_every_variant() {
        let context = props(json!({"library": {"name": "segment-rs"}, "list": [1, 2.5, null]}));
        let messages = vec![
            IdentifyBuilder::new()
                .user_id("u1")
                .unwrap()
                .with_trait("email", "a@b.c")
                .build()
                .unwrap(),
            IdentifyBuilder::new().anonymous_id("a1").unwrap().build().unwrap(),
            GroupBuilder::new()
                .group_id("g1")
                .unwrap()
                .anonymous_id("a1")
                .unwrap()
                .with_trait("seats", 12)
                .integration("All", false)
                .unwrap()
                .build()
                .unwrap(),
            TrackBuilder::new()
                .event("Login")
                .unwrap()
                .user_id("u1")
                .unwrap()
                .anonymous_id("a1")
                .unwrap()
                .context(context)
                .build()
                .unwrap(),
            ScreenBuilder::new()
                .name("Home")
                .unwrap()
                .user_id("u1")
                .unwrap()
                .property("nested", json!({"deep": [true, false]}))
                .build()
                .unwrap(),
            AliasBuilder::new()
                .previous_id("old")
                .unwrap()
                .user_id("new")
                .unwrap()
                .message_id("explicit-id")
                .unwrap()
                .build()
                .unwrap(),
        ];

        for message in messages {
            let decoded = decode(&encode(&message).unwrap()).unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn test_decode_ignores_unknown_fields_and_nulls() {
        let bytes = br#"{
            "extra": {"anything": 1},
            "properties": null,
            "event": "Login",
            "userId": "u1",
            "anonymousId": null,
            "timestamp": "2024-03-01T12:30:00.000Z",
            "messageId": "m1",
            "type": "track"
        }"#;

        let message = decode(bytes).unwrap();
        assert_eq!(message.message_type(), MessageType::Track);
        assert_eq!(message.message_id(), "m1");
        assert_eq!(message.timestamp(), fixed_time());
        assert_eq!(message.anonymous_id(), None);
        assert!(message.integrations().is_empty());
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let bytes = br#"{"type":"page","messageId":"m1","timestamp":"2024-03-01T12:30:00.000Z"}"#;
        assert!(matches!(decode(bytes), Err(Error::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_missing_required_fields() {
        let bytes = br#"{"type":"screen","messageId":"m1","timestamp":"2024-03-01T12:30:00.000Z"}"#;
        assert!(matches!(decode(bytes), Err(Error::Decode(msg)) if msg.contains("name")));

        assert!(matches!(decode(b"not json"), Err(Error::Decode(_))));
        assert!(matches!(decode(br#"{"messageId":"m1"}"#), Err(Error::Decode(_))));
    }

    #[test]
    fn test_encode_rejects_oversized_message() {
        let message = TrackBuilder::new()
            .event("Big")
            .unwrap()
            .user_id("u1")
            .unwrap()
            .property("blob", "x".repeat(MAX_MESSAGE_SIZE))
            .build()
            .unwrap();

        match encode(&message) {
            Err(Error::MessageTooLarge { size, limit }) => {
                assert!(size > MAX_MESSAGE_SIZE);
                assert_eq!(limit, MAX_MESSAGE_SIZE);
            }
            other => panic!("expected MessageTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_batch_body() {
        let message = TrackBuilder::new()
            .event("Login")
            .unwrap()
            .user_id("u1")
            .unwrap()
            .build()
            .unwrap();
        let batch = Batch::with_sent_at(vec![message.clone()], fixed_time()).unwrap();

        let json: Value = serde_json::from_slice(&batch.to_json().unwrap()).unwrap();
        assert_eq!(json["sentAt"], "2024-03-01T12:30:00.000Z");
        assert_eq!(json["batch"].as_array().unwrap().len(), 1);
        assert_eq!(json["batch"][0]["messageId"], message.message_id());
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert!(matches!(Batch::new(Vec::new()), Err(Error::Validation(_))));
    }
}

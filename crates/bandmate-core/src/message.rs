//! Immutable message envelopes exchanged between agents.

use std::fmt;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{error::PayloadError, protocol::TypedPayload};

/// Message identifier, unique for the lifetime of a session.
pub type MessageId = Uuid;

/// Identity of an agent within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Sender id used for messages created by the session itself.
    pub const SESSION: &'static str = "session";

    /// Create an agent id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id of the session authority.
    #[must_use]
    pub fn session() -> Self {
        Self::new(Self::SESSION)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for AgentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl PartialEq<str> for AgentId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for AgentId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Message type tag.
///
/// Open-ended: anything not recognised round-trips as [`MessageType::Custom`],
/// so a receiver never fails to parse a tag it has no handler for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    IntentNotification,
    IntentCancelled,
    MusicalQuery,
    MusicalResponse,
    CoordinationRequest,
    MusicalEvent,
    Custom(String),
}

impl MessageType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::IntentNotification => "INTENT_NOTIFICATION",
            Self::IntentCancelled => "INTENT_CANCELLED",
            Self::MusicalQuery => "MUSICAL_QUERY",
            Self::MusicalResponse => "MUSICAL_RESPONSE",
            Self::CoordinationRequest => "COORDINATION_REQUEST",
            Self::MusicalEvent => "MUSICAL_EVENT",
            Self::Custom(tag) => tag,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for MessageType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "INTENT_NOTIFICATION" => Self::IntentNotification,
            "INTENT_CANCELLED" => Self::IntentCancelled,
            "MUSICAL_QUERY" => Self::MusicalQuery,
            "MUSICAL_RESPONSE" => Self::MusicalResponse,
            "COORDINATION_REQUEST" => Self::CoordinationRequest,
            "MUSICAL_EVENT" => Self::MusicalEvent,
            _ => Self::Custom(tag),
        }
    }
}

impl From<&str> for MessageType {
    fn from(tag: &str) -> Self {
        Self::from(tag.to_string())
    }
}

impl From<MessageType> for String {
    fn from(kind: MessageType) -> Self {
        match kind {
            MessageType::Custom(tag) => tag,
            other => other.as_str().to_string(),
        }
    }
}

/// String-keyed message body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an arbitrary JSON value; only objects are accepted.
    ///
    /// # Errors
    /// Returns [`PayloadError::NotAnObject`] for non-object values.
    pub fn from_value(value: Value) -> Result<Self, PayloadError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::default()),
            _ => Err(PayloadError::NotAnObject),
        }
    }

    /// Serialize a typed protocol payload.
    ///
    /// # Errors
    /// Returns error if the value does not serialize to a JSON object.
    pub fn from_typed<T: TypedPayload>(value: &T) -> Result<Self, PayloadError> {
        Self::from_value(serde_json::to_value(value)?)
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decode into any deserializable shape, ignoring the message kind.
    ///
    /// # Errors
    /// Returns error if the fields do not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, PayloadError> {
        Ok(serde_json::from_value(Value::Object(self.0.clone()))?)
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Where a message is headed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination<'a> {
    /// A single agent, looked up in the directory.
    Direct(&'a AgentId),
    /// Every subscriber of a topic.
    Topic(&'a str),
    /// Every registered agent except the sender.
    Broadcast,
}

/// Immutable message envelope.
///
/// Fields are only readable after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    sender_id: AgentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    recipient_id: Option<AgentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    topic: Option<String>,
    #[serde(rename = "type")]
    kind: MessageType,
    #[serde(default)]
    payload: Payload,
    timestamp: u64,
}

impl Message {
    fn build(
        sender_id: AgentId,
        recipient_id: Option<AgentId>,
        topic: Option<String>,
        kind: MessageType,
        payload: Payload,
        timestamp: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender_id,
            recipient_id,
            topic,
            kind,
            payload,
            timestamp,
        }
    }

    /// A message for exactly one recipient.
    #[must_use]
    pub fn direct(
        sender_id: AgentId,
        recipient_id: AgentId,
        kind: MessageType,
        payload: Payload,
        timestamp: u64,
    ) -> Self {
        Self::build(sender_id, Some(recipient_id), None, kind, payload, timestamp)
    }

    /// A message for every agent except the sender.
    #[must_use]
    pub fn broadcast(sender_id: AgentId, kind: MessageType, payload: Payload, timestamp: u64) -> Self {
        Self::build(sender_id, None, None, kind, payload, timestamp)
    }

    /// A message for the subscribers of `topic`.
    #[must_use]
    pub fn topic(
        sender_id: AgentId,
        topic: impl Into<String>,
        kind: MessageType,
        payload: Payload,
        timestamp: u64,
    ) -> Self {
        Self::build(sender_id, None, Some(topic.into()), kind, payload, timestamp)
    }

    #[must_use]
    pub const fn id(&self) -> MessageId {
        self.id
    }

    #[must_use]
    pub const fn sender_id(&self) -> &AgentId {
        &self.sender_id
    }

    #[must_use]
    pub const fn recipient_id(&self) -> Option<&AgentId> {
        self.recipient_id.as_ref()
    }

    #[must_use]
    pub fn topic_name(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    #[must_use]
    pub const fn kind(&self) -> &MessageType {
        &self.kind
    }

    #[must_use]
    pub const fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Logical tick at which the message was created.
    #[must_use]
    pub const fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Resolve the destination. A recipient wins over a topic.
    #[must_use]
    pub fn destination(&self) -> Destination<'_> {
        match (&self.recipient_id, &self.topic) {
            (Some(recipient), _) => Destination::Direct(recipient),
            (None, Some(topic)) => Destination::Topic(topic),
            (None, None) => Destination::Broadcast,
        }
    }

    /// Decode the payload as a typed protocol message, checking the tag.
    ///
    /// # Errors
    /// Returns [`PayloadError::KindMismatch`] if the tag differs, or a
    /// decode error if the payload fields do not match.
    pub fn decode<T: TypedPayload>(&self) -> Result<T, PayloadError> {
        if self.kind != T::KIND {
            return Err(PayloadError::KindMismatch {
                expected: T::KIND.to_string(),
                actual: self.kind.to_string(),
            });
        }
        self.payload.decode()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::protocol::IntentNotification;

    #[test]
    fn test_message_type_tags() {
        assert_eq!(MessageType::from("MUSICAL_QUERY"), MessageType::MusicalQuery);
        assert_eq!(
            MessageType::from("GROOVE_SHIFT"),
            MessageType::Custom("GROOVE_SHIFT".to_string())
        );
        assert_eq!(String::from(MessageType::IntentNotification), "INTENT_NOTIFICATION");
    }

    #[test]
    fn test_destination_resolution() {
        let direct = Message::direct(
            "a".into(),
            "b".into(),
            MessageType::MusicalEvent,
            Payload::new(),
            0,
        );
        assert_eq!(direct.destination(), Destination::Direct(&AgentId::from("b")));

        let topic = Message::topic("a".into(), "animation", MessageType::MusicalEvent, Payload::new(), 0);
        assert_eq!(topic.destination(), Destination::Topic("animation"));

        let broadcast = Message::broadcast("a".into(), MessageType::MusicalEvent, Payload::new(), 0);
        assert_eq!(broadcast.destination(), Destination::Broadcast);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Message::broadcast("a".into(), MessageType::MusicalEvent, Payload::new(), 0);
        let b = Message::broadcast("a".into(), MessageType::MusicalEvent, Payload::new(), 0);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_decode_checks_kind() {
        let payload = Payload::from_value(json!({
            "action": "fill",
            "target_bar": 11,
            "intensity": 0.8
        }))
        .unwrap();
        let msg = Message::broadcast("drummer".into(), MessageType::MusicalEvent, payload, 10);

        let err = msg.decode::<IntentNotification>().unwrap_err();
        assert!(matches!(err, PayloadError::KindMismatch { .. }));
    }

    #[test]
    fn test_wire_format_uses_type_tag() {
        let msg = Message::direct(
            "bassist".into(),
            "drummer".into(),
            MessageType::MusicalQuery,
            Payload::new().with("request_id", "q-1"),
            3,
        );
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "MUSICAL_QUERY");
        assert_eq!(json["recipient_id"], "drummer");
        assert!(json.get("topic").is_none());

        let parsed: Message = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_payload_rejects_scalars() {
        assert!(matches!(
            Payload::from_value(json!(42)),
            Err(PayloadError::NotAnObject)
        ));
    }
}

//! Typed payloads for the conversational protocols agents speak.
//!
//! Each struct is tagged with the [`MessageType`] it travels under, so
//! senders and receivers agree on both the tag and the field layout.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::message::MessageType;

/// A payload shape bound to one message type.
pub trait TypedPayload: Serialize + DeserializeOwned {
    const KIND: MessageType;
}

/// Announcement of a future action ("fill coming at bar N").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentNotification {
    pub action: String,
    pub target_bar: u64,
    /// Intensity in `[0, 1]`.
    pub intensity: f64,
}

impl TypedPayload for IntentNotification {
    const KIND: MessageType = MessageType::IntentNotification;
}

/// Withdraws a previously announced intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentCancelled {
    pub action: String,
    pub target_bar: u64,
}

impl TypedPayload for IntentCancelled {
    const KIND: MessageType = MessageType::IntentCancelled;
}

/// The action itself, emitted when the target bar arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicalEvent {
    pub action: String,
    pub bar: u64,
    pub intensity: f64,
}

impl TypedPayload for MusicalEvent {
    const KIND: MessageType = MessageType::MusicalEvent;
}

/// A direct question. `request_id` is echoed by the response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MusicalQuery {
    pub request_id: String,
    pub question: String,
}

impl TypedPayload for MusicalQuery {
    const KIND: MessageType = MessageType::MusicalQuery;
}

/// Answer to a [`MusicalQuery`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicalResponse {
    pub request_id: String,
    #[serde(default)]
    pub answer: Value,
}

impl TypedPayload for MusicalResponse {
    const KIND: MessageType = MessageType::MusicalResponse;
}

/// Ask peers to adjust their playing ("drop out", "follow me").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationRequest {
    pub request: String,
    #[serde(default)]
    pub detail: Value,
}

impl TypedPayload for CoordinationRequest {
    const KIND: MessageType = MessageType::CoordinationRequest;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::message::{Message, Payload};

    #[test]
    fn test_response_echoes_request_id() {
        let payload = Payload::from_typed(&MusicalResponse {
            request_id: "req-7".to_string(),
            answer: json!({ "next_fill": 11 }),
        })
        .unwrap();
        let msg = Message::direct(
            "drummer".into(),
            "bassist".into(),
            MusicalResponse::KIND,
            payload,
            4,
        );

        let response: MusicalResponse = msg.decode().unwrap();
        assert_eq!(response.request_id, "req-7");
        assert_eq!(response.answer["next_fill"], 11);
    }

    #[test]
    fn test_coordination_detail_defaults() {
        let payload = Payload::new().with("request", "drop_out");
        let msg = Message::broadcast("keys".into(), MessageType::CoordinationRequest, payload, 0);

        let request: CoordinationRequest = msg.decode().unwrap();
        assert_eq!(request.request, "drop_out");
        assert!(request.detail.is_null());
    }
}

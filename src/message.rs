use serde::{Deserialize, Serialize};

use crate::error::PusherError;

pub const CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
pub const ERROR: &str = "pusher:error";
pub const PING: &str = "pusher:ping";
pub const PONG: &str = "pusher:pong";
pub const SUBSCRIBE: &str = "pusher:subscribe";
pub const UNSUBSCRIBE: &str = "pusher:unsubscribe";

pub const INTERNAL_SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";
pub const INTERNAL_MEMBER_ADDED: &str = "pusher_internal:member_added";
pub const INTERNAL_MEMBER_REMOVED: &str = "pusher_internal:member_removed";

/// Public event names surfaced to bound callbacks.
pub const SUBSCRIPTION_SUCCEEDED: &str = "pusher:subscription_succeeded";
pub const SUBSCRIPTION_ERROR: &str = "pusher:subscription_error";
pub const MEMBER_ADDED: &str = "pusher:member_added";
pub const MEMBER_REMOVED: &str = "pusher:member_removed";

pub const CLIENT_EVENT_PREFIX: &str = "client-";

/// Pusher protocol message structure as it arrives on the wire
#[derive(Debug, Clone, Deserialize)]
struct PusherMessage {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    channel: Option<String>,
}

/// A decoded inbound envelope.
///
/// `data` is the string-encoded payload. Servers send most payloads as a JSON
/// string already; object payloads are re-serialized so callers always see
/// a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub event: String,
    pub channel: Option<String>,
    pub data: String,
}

/// Outbound envelope
#[derive(Debug, Serialize)]
struct OutboundMessage<'a, T: Serialize> {
    event: &'a str,
    data: &'a T,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<&'a str>,
}

/// Connection data received after establishing connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionData {
    pub socket_id: String,
    #[serde(default)]
    pub activity_timeout: Option<u64>,
}

/// Error data structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorData {
    #[serde(default)]
    pub code: Option<u32>,
    pub message: String,
}

/// Subscribe data structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SubscribeData {
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<String>,
}

/// Unsubscribe data structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct UnsubscribeData {
    pub channel: String,
}

/// Encode an outbound event into a text frame.
pub fn encode<T: Serialize>(
    event: &str,
    data: &T,
    channel: Option<&str>,
) -> Result<String, PusherError> {
    let message = OutboundMessage {
        event,
        data,
        channel,
    };
    Ok(serde_json::to_string(&message)?)
}

/// Decode an inbound text frame into an [`Event`].
pub fn decode(text: &str) -> Result<Event, PusherError> {
    let message = serde_json::from_str::<PusherMessage>(text)
        .map_err(|e| PusherError::DecodeError(e.to_string()))?;

    let data = match message.data {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    };

    Ok(Event {
        event: message.event,
        channel: message.channel.filter(|c| !c.is_empty()),
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_string_payload() {
        let text = r#"{"event":"pusher:connection_established","data":"{\"socket_id\":\"123.456\",\"activity_timeout\":120}"}"#;
        let event = decode(text).unwrap();

        assert_eq!(event.event, CONNECTION_ESTABLISHED);
        assert_eq!(event.channel, None);

        let conn: ConnectionData = serde_json::from_str(&event.data).unwrap();
        assert_eq!(conn.socket_id, "123.456");
        assert_eq!(conn.activity_timeout, Some(120));
    }

    #[test]
    fn decode_object_payload_is_reencoded() {
        let text = r#"{"event":"pusher:error","data":{"code":4001,"message":"App key not found"}}"#;
        let event = decode(text).unwrap();

        let err: ErrorData = serde_json::from_str(&event.data).unwrap();
        assert_eq!(err.code, Some(4001));
        assert_eq!(err.message, "App key not found");
    }

    #[test]
    fn decode_treats_empty_channel_as_absent() {
        let event = decode(r#"{"event":"tick","channel":"","data":"1"}"#).unwrap();
        assert_eq!(event.channel, None);

        let event = decode(r#"{"event":"tick","channel":"room","data":"1"}"#).unwrap();
        assert_eq!(event.channel.as_deref(), Some("room"));
    }

    #[test]
    fn decode_rejects_malformed_envelopes() {
        assert!(matches!(
            decode("not json"),
            Err(PusherError::DecodeError(_))
        ));
        assert!(matches!(
            decode(r#"{"data":"missing event"}"#),
            Err(PusherError::DecodeError(_))
        ));
    }

    #[test]
    fn encode_subscribe_without_auth_omits_field() {
        let data = SubscribeData {
            channel: "room".to_string(),
            auth: None,
            channel_data: None,
        };
        let text = encode(SUBSCRIBE, &data, None).unwrap();
        assert_eq!(text, r#"{"event":"pusher:subscribe","data":{"channel":"room"}}"#);
    }

    #[test]
    fn encode_client_event_carries_channel() {
        let data = serde_json::json!({"text": "hi"});
        let text = encode("client-typing", &data, Some("private-room")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["event"], "client-typing");
        assert_eq!(value["channel"], "private-room");
        assert_eq!(value["data"]["text"], "hi");
    }
}

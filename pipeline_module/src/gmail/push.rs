//! Pub/Sub push notification decoding.
//!
//! The provider posts a JSON envelope whose `message.data` field is a
//! base64-encoded JSON document: `{"emailAddress": ..., "historyId": ...}`.
//! Malformed payloads are rejected, never silently ignored.

use base64::Engine;
use serde::{Deserialize, Deserializer};

#[derive(Debug, thiserror::Error)]
pub enum PushDecodeError {
    #[error("envelope is not valid JSON: {0}")]
    Envelope(String),
    #[error("envelope has no message data")]
    MissingData,
    #[error("message data is not valid base64")]
    Base64,
    #[error("notification payload is not valid JSON: {0}")]
    Payload(String),
}

#[derive(Debug, Deserialize)]
struct PubSubEnvelope {
    message: Option<PubSubMessage>,
}

#[derive(Debug, Deserialize)]
struct PubSubMessage {
    data: Option<String>,
}

/// Decoded mailbox notification.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PushNotification {
    pub email_address: String,
    #[serde(deserialize_with = "u64_from_number_or_string")]
    pub history_id: u64,
}

pub fn decode_push(body: &[u8]) -> Result<PushNotification, PushDecodeError> {
    let envelope: PubSubEnvelope = serde_json::from_slice(body)
        .map_err(|err| PushDecodeError::Envelope(err.to_string()))?;
    let data = envelope
        .message
        .and_then(|message| message.data)
        .filter(|data| !data.trim().is_empty())
        .ok_or(PushDecodeError::MissingData)?;

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(data.trim()))
        .map_err(|_| PushDecodeError::Base64)?;

    serde_json::from_slice(&decoded).map_err(|err| PushDecodeError::Payload(err.to_string()))
}

/// The provider serializes history ids as numbers in push payloads but as
/// strings in REST responses; accept both.
fn u64_from_number_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Number(value) => Ok(value),
        Raw::Text(value) => value.parse::<u64>().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    fn envelope_for(payload: &str) -> Vec<u8> {
        let data = base64::engine::general_purpose::STANDARD.encode(payload);
        format!(
            r#"{{"message": {{"data": "{data}", "messageId": "m1"}}, "subscription": "sub"}}"#
        )
        .into_bytes()
    }

    #[test]
    fn decodes_valid_notification() {
        let body = envelope_for(r#"{"emailAddress": "user@example.com", "historyId": 123456}"#);
        let notification = decode_push(&body).unwrap();
        assert_eq!(notification.email_address, "user@example.com");
        assert_eq!(notification.history_id, 123456);
    }

    #[test]
    fn accepts_string_history_id() {
        let body = envelope_for(r#"{"emailAddress": "user@example.com", "historyId": "789"}"#);
        assert_eq!(decode_push(&body).unwrap().history_id, 789);
    }

    #[test]
    fn rejects_missing_data() {
        let err = decode_push(br#"{"message": {}, "subscription": "sub"}"#).unwrap_err();
        assert!(matches!(err, PushDecodeError::MissingData));
    }

    #[test]
    fn rejects_bad_base64() {
        let err =
            decode_push(br#"{"message": {"data": "!!not-base64!!"}}"#).unwrap_err();
        assert!(matches!(err, PushDecodeError::Base64));
    }

    #[test]
    fn rejects_non_json_envelope() {
        let err = decode_push(b"not json").unwrap_err();
        assert!(matches!(err, PushDecodeError::Envelope(_)));
    }

    #[test]
    fn rejects_payload_missing_fields() {
        let body = envelope_for(r#"{"historyId": 5}"#);
        let err = decode_push(&body).unwrap_err();
        assert!(matches!(err, PushDecodeError::Payload(_)));
    }
}

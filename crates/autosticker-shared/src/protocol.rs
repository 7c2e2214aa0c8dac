use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{ENVELOPE_THUMB_HEIGHT, ENVELOPE_THUMB_WIDTH};
use crate::crypto::{ContentHash, MediaKey};
use crate::types::RecipientIdentity;

/// Events delivered by a transport's receive loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportEvent {
    /// A chat message (from anyone, including our own devices)
    Message(InboundEvent),

    /// The session is online
    Connected,

    /// The connection dropped
    Disconnected { reason: Option<String> },

    /// The device was unlinked remotely; the stored session is dead
    LoggedOut,

    /// Delivery/read receipt for a message we sent
    Receipt { message_id: String },

    /// Anything the bridge knows about but we do not model
    #[serde(skip)]
    Other { kind: String },
}

impl TransportEvent {
    /// Decode a bridge event, mapping unknown kinds to [`TransportEvent::Other`]
    /// instead of failing.
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let kind = value
            .get("kind")
            .and_then(|k| k.as_str())
            .map(str::to_string);

        match kind.as_deref() {
            Some("message" | "connected" | "disconnected" | "logged_out" | "receipt") => {
                serde_json::from_value(value)
            }
            Some(other) => Ok(Self::Other {
                kind: other.to_string(),
            }),
            None => Ok(Self::Other {
                kind: "unknown".to_string(),
            }),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::Message(_) => "message",
            Self::Connected => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::LoggedOut => "logged_out",
            Self::Receipt { .. } => "receipt",
            Self::Other { kind } => kind,
        }
    }
}

/// A received chat message, as far as the dispatcher cares about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub message_id: String,
    /// Sender address exactly as the transport reported it
    pub sender: String,
    /// Device suffixes are dropped on decode
    #[serde(deserialize_with = "wire_identity")]
    pub chat: RecipientIdentity,
    /// Sender-side timestamp, milliseconds since the Unix epoch
    pub origin_timestamp_ms: i64,
    pub is_from_me: bool,
    /// Bridge handle to the undecoded payload, if it keeps one
    #[serde(default)]
    pub raw_payload_ref: Option<String>,
}

/// Everything needed to reference an uploaded blob from a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub remote_url: String,
    pub direct_path: String,
    #[serde(with = "b64_array")]
    pub content_hash: ContentHash,
    #[serde(with = "b64_array")]
    pub encrypted_content_hash: ContentHash,
    #[serde(with = "b64_array")]
    pub encryption_key: MediaKey,
    /// Length of the plaintext bytes given to the uploader
    pub byte_length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickerMessage {
    pub mimetype: String,
    pub url: String,
    pub direct_path: String,
    #[serde(with = "b64_array")]
    pub file_hash: ContentHash,
    #[serde(with = "b64_array")]
    pub file_enc_hash: ContentHash,
    #[serde(with = "b64_array")]
    pub media_key: MediaKey,
    pub file_length: u64,
    pub width: u32,
    pub height: u32,
    /// Seconds since the Unix epoch
    pub media_key_timestamp: i64,
    pub first_frame_length: u32,
    pub is_animated: bool,
}

/// A fully formed outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEnvelope {
    Sticker(StickerMessage),
}

impl OutboundEnvelope {
    /// Build a static sticker referencing `receipt`. Presentation metadata is
    /// fixed: 100x100, not animated.
    pub fn sticker(receipt: &UploadReceipt, mimetype: &str, media_key_timestamp: i64) -> Self {
        Self::Sticker(StickerMessage {
            mimetype: mimetype.to_string(),
            url: receipt.remote_url.clone(),
            direct_path: receipt.direct_path.clone(),
            file_hash: receipt.content_hash,
            file_enc_hash: receipt.encrypted_content_hash,
            media_key: receipt.encryption_key,
            file_length: receipt.byte_length,
            width: ENVELOPE_THUMB_WIDTH,
            height: ENVELOPE_THUMB_HEIGHT,
            media_key_timestamp,
            first_frame_length: 1,
            is_animated: false,
        })
    }
}

/// Transport acknowledgement for a sent envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendAck {
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Linked-device credentials. Opaque to everything except the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSession {
    pub device_id: String,
    #[serde(default)]
    pub push_name: Option<String>,
    pub token: String,
    pub paired_at: DateTime<Utc>,
}

/// Progress of a QR pairing flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingEvent {
    /// A QR payload to show the user; replaced periodically until scanned
    Code(String),
    Success(DeviceSession),
    Timeout,
    Error(String),
}

fn wire_identity<'de, D: serde::Deserializer<'de>>(d: D) -> Result<RecipientIdentity, D::Error> {
    let raw = String::deserialize(d)?;
    RecipientIdentity::from_wire(&raw).map_err(serde::de::Error::custom)
}

mod b64_array {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let encoded = String::deserialize(d)?;
        let decoded = STANDARD.decode(encoded).map_err(D::Error::custom)?;
        decoded
            .try_into()
            .map_err(|v: Vec<u8>| D::Error::custom(format!("expected 32 bytes, got {}", v.len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt() -> UploadReceipt {
        UploadReceipt {
            remote_url: "https://mmg.example/d/abc".into(),
            direct_path: "/d/abc".into(),
            content_hash: [1; 32],
            encrypted_content_hash: [2; 32],
            encryption_key: [3; 32],
            byte_length: 1234,
        }
    }

    #[test]
    fn test_sticker_envelope_references_receipt() {
        let r = receipt();
        let OutboundEnvelope::Sticker(msg) = OutboundEnvelope::sticker(&r, "image/webp", 1_700_000_000);

        assert_eq!(msg.url, r.remote_url);
        assert_eq!(msg.direct_path, r.direct_path);
        assert_eq!(msg.file_hash, r.content_hash);
        assert_eq!(msg.file_enc_hash, r.encrypted_content_hash);
        assert_eq!(msg.media_key, r.encryption_key);
        assert_eq!(msg.file_length, 1234);
        assert_eq!((msg.width, msg.height), (100, 100));
        assert!(!msg.is_animated);
        assert_eq!(msg.first_frame_length, 1);
    }

    #[test]
    fn test_message_event_from_json() {
        let value = serde_json::json!({
            "kind": "message",
            "message_id": "3EB0ABC",
            "sender": "31600000000@s.whatsapp.net",
            "chat": "42@g.us",
            "origin_timestamp_ms": 1_700_000_000_000i64,
            "is_from_me": true
        });

        let TransportEvent::Message(event) = TransportEvent::from_json(value).unwrap() else {
            panic!("expected message event");
        };
        assert_eq!(event.message_id, "3EB0ABC");
        assert_eq!(event.chat.to_string(), "42@g.us");
        assert!(event.is_from_me);
        assert!(event.raw_payload_ref.is_none());
    }

    #[test]
    fn test_companion_device_message_decodes() {
        let value = serde_json::json!({
            "kind": "message",
            "message_id": "3EB0WEB",
            "sender": "31600000000:7@s.whatsapp.net",
            "chat": "31611111111:2@s.whatsapp.net",
            "origin_timestamp_ms": 1_700_000_000_000i64,
            "is_from_me": true
        });

        let TransportEvent::Message(event) = TransportEvent::from_json(value).unwrap() else {
            panic!("expected message event");
        };
        assert_eq!(event.sender, "31600000000:7@s.whatsapp.net");
        assert_eq!(event.chat.to_string(), "31611111111@s.whatsapp.net");
    }

    #[test]
    fn test_unknown_event_kind_is_other() {
        let event = TransportEvent::from_json(serde_json::json!({ "kind": "presence" })).unwrap();
        assert_eq!(event, TransportEvent::Other { kind: "presence".into() });
        assert_eq!(event.kind(), "presence");
    }

    #[test]
    fn test_malformed_message_is_error() {
        let value = serde_json::json!({
            "kind": "message",
            "message_id": "3EB0BAD",
            "sender": "31600000000@s.whatsapp.net",
            "chat": "not-an-identity",
            "origin_timestamp_ms": 1_700_000_000_000i64,
            "is_from_me": true
        });
        assert!(TransportEvent::from_json(value).is_err());
    }

    #[test]
    fn test_receipt_hashes_serialize_as_base64() {
        let json = serde_json::to_value(receipt()).unwrap();
        assert_eq!(json["encryption_key"], serde_json::json!("AwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwM="));
        let back: UploadReceipt = serde_json::from_value(json).unwrap();
        assert_eq!(back, receipt());
    }
}

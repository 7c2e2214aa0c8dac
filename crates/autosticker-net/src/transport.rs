//! The session capability consumed by the rest of the system.
//!
//! A transport owns the wire protocol, its encryption and its session keys.
//! Callers only see typed events in and typed envelopes out.

use async_trait::async_trait;
use futures::stream::BoxStream;

use autosticker_shared::error::TransportError;
use autosticker_shared::protocol::{
    DeviceSession, OutboundEnvelope, PairingEvent, SendAck, TransportEvent, UploadReceipt,
};
use autosticker_shared::types::{MediaKind, RecipientIdentity};

/// Events for one connection; ends when the connection closes.
pub type EventStream = BoxStream<'static, TransportEvent>;

/// Pairing progress; ends after a terminal [`PairingEvent`].
pub type PairingStream = BoxStream<'static, PairingEvent>;

#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Start linking a new device. Only used when no stored session exists.
    async fn begin_pairing(&self) -> Result<PairingStream, TransportError>;

    /// Bring a stored (or freshly paired) session online.
    async fn connect(&self, session: &DeviceSession) -> Result<(), TransportError>;

    /// Take the event stream for the current connection. Can be taken once
    /// per connection; reconnect to get a new one.
    async fn receive_events(&self) -> Result<EventStream, TransportError>;

    /// Encrypt and upload `bytes`, returning the fields an envelope needs to
    /// reference them.
    async fn upload(&self, bytes: &[u8], kind: MediaKind) -> Result<UploadReceipt, TransportError>;

    async fn send_envelope(
        &self,
        recipient: &RecipientIdentity,
        envelope: &OutboundEnvelope,
    ) -> Result<SendAck, TransportError>;

    /// Flush and close the session.
    async fn disconnect(&self) -> Result<(), TransportError>;
}

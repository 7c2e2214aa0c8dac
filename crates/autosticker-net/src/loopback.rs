//! In-memory transport.
//!
//! Events are injected by the caller, uploads are sealed for real (so
//! receipts carry genuine hashes and keys) and everything sent is recorded.
//! Failures can be scripted per operation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use autosticker_shared::crypto::seal_media;
use autosticker_shared::error::TransportError;
use autosticker_shared::protocol::{
    DeviceSession, OutboundEnvelope, PairingEvent, SendAck, TransportEvent, UploadReceipt,
};
use autosticker_shared::types::{MediaKind, RecipientIdentity};

use crate::transport::{EventStream, PairingStream, SessionTransport};

#[derive(Debug, Clone)]
pub struct RecordedUpload {
    pub bytes: Vec<u8>,
    pub kind: MediaKind,
    pub receipt: UploadReceipt,
}

#[derive(Debug, Clone)]
pub struct RecordedSend {
    pub recipient: RecipientIdentity,
    pub envelope: OutboundEnvelope,
    pub ack: SendAck,
}

#[derive(Default)]
struct Recorded {
    uploads: Vec<RecordedUpload>,
    sends: Vec<RecordedSend>,
    upload_attempts: u32,
}

pub struct LoopbackTransport {
    events_tx: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    session: Mutex<Option<DeviceSession>>,
    pairing_script: Mutex<VecDeque<PairingEvent>>,
    recorded: Mutex<Recorded>,
    upload_failures: AtomicU32,
    send_failures: AtomicU32,
    connect_rejections: AtomicU32,
    corrupt_receipts: AtomicBool,
    upload_delay: Mutex<Option<Duration>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            events_tx: Mutex::new(Some(tx)),
            events_rx: Mutex::new(Some(rx)),
            session: Mutex::new(None),
            pairing_script: Mutex::new(VecDeque::new()),
            recorded: Mutex::new(Recorded::default()),
            upload_failures: AtomicU32::new(0),
            send_failures: AtomicU32::new(0),
            connect_rejections: AtomicU32::new(0),
            corrupt_receipts: AtomicBool::new(false),
            upload_delay: Mutex::new(None),
        }
    }

    /// Queue an event for the receive stream. Returns false once disconnected.
    pub fn inject(&self, event: TransportEvent) -> bool {
        match lock(&self.events_tx).as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Events `begin_pairing` will replay, in order.
    pub fn script_pairing(&self, events: Vec<PairingEvent>) {
        *lock(&self.pairing_script) = events.into();
    }

    /// Fail the next `n` uploads with a (retryable) network error.
    pub fn fail_next_uploads(&self, n: u32) {
        self.upload_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_sends(&self, n: u32) {
        self.send_failures.store(n, Ordering::SeqCst);
    }

    /// Reject the next `n` connects with a session error.
    pub fn reject_next_connects(&self, n: u32) {
        self.connect_rejections.store(n, Ordering::SeqCst);
    }

    /// Return receipts whose content hash does not match the payload.
    pub fn corrupt_receipts(&self, corrupt: bool) {
        self.corrupt_receipts.store(corrupt, Ordering::SeqCst);
    }

    pub fn set_upload_delay(&self, delay: Duration) {
        *lock(&self.upload_delay) = Some(delay);
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        lock(&self.recorded).uploads.clone()
    }

    /// Uploads attempted, including failed ones.
    pub fn upload_attempts(&self) -> u32 {
        lock(&self.recorded).upload_attempts
    }

    pub fn sends(&self) -> Vec<RecordedSend> {
        lock(&self.recorded).sends.clone()
    }

    pub fn session(&self) -> Option<DeviceSession> {
        lock(&self.session).clone()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.session).is_some()
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

// Poisoning only happens if a test panicked while holding the lock.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl SessionTransport for LoopbackTransport {
    async fn begin_pairing(&self) -> Result<PairingStream, TransportError> {
        let script: Vec<PairingEvent> = lock(&self.pairing_script).drain(..).collect();
        Ok(stream::iter(script).boxed())
    }

    async fn connect(&self, session: &DeviceSession) -> Result<(), TransportError> {
        if Self::take_failure(&self.connect_rejections) {
            return Err(TransportError::Session(format!(
                "device {} is not linked",
                session.device_id
            )));
        }
        *lock(&self.session) = Some(session.clone());
        debug!(device = %session.device_id, "Loopback session connected");
        Ok(())
    }

    async fn receive_events(&self) -> Result<EventStream, TransportError> {
        let rx = lock(&self.events_rx)
            .take()
            .ok_or_else(|| TransportError::Session("event stream already taken".to_string()))?;

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed())
    }

    async fn upload(&self, bytes: &[u8], kind: MediaKind) -> Result<UploadReceipt, TransportError> {
        lock(&self.recorded).upload_attempts += 1;

        let delay = *lock(&self.upload_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if Self::take_failure(&self.upload_failures) {
            return Err(TransportError::Network("injected upload failure".to_string()));
        }

        let sealed = seal_media(bytes, kind)
            .map_err(|e| TransportError::Protocol(format!("sealing failed: {e}")))?;
        let id = Uuid::new_v4();

        let mut receipt = UploadReceipt {
            remote_url: format!("loopback://media/{id}"),
            direct_path: format!("/loopback/{}/{id}", kind.as_str()),
            content_hash: sealed.content_hash,
            encrypted_content_hash: sealed.encrypted_hash,
            encryption_key: sealed.media_key,
            byte_length: bytes.len() as u64,
        };
        if self.corrupt_receipts.load(Ordering::SeqCst) {
            receipt.content_hash[0] ^= 0xFF;
        }

        lock(&self.recorded).uploads.push(RecordedUpload {
            bytes: bytes.to_vec(),
            kind,
            receipt: receipt.clone(),
        });

        Ok(receipt)
    }

    async fn send_envelope(
        &self,
        recipient: &RecipientIdentity,
        envelope: &OutboundEnvelope,
    ) -> Result<SendAck, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Session("not connected".to_string()));
        }
        if Self::take_failure(&self.send_failures) {
            return Err(TransportError::Network("injected send failure".to_string()));
        }

        let ack = SendAck {
            message_id: Uuid::new_v4().simple().to_string().to_uppercase(),
            timestamp: Utc::now(),
        };
        lock(&self.recorded).sends.push(RecordedSend {
            recipient: recipient.clone(),
            envelope: envelope.clone(),
            ack: ack.clone(),
        });

        Ok(ack)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        // dropping the sender ends the event stream once it is drained
        lock(&self.events_tx).take();
        lock(&self.session).take();
        debug!("Loopback session disconnected");
        Ok(())
    }
}

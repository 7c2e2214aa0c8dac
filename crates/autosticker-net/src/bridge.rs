//! HTTP bridge transport.
//!
//! Talks JSON over HTTP to a bridge process that owns the actual messaging
//! protocol. Media is sealed locally before it leaves the process, so the
//! bridge only ever stores ciphertext.
//!
//! Endpoints (all under `/v1`):
//! - `POST /pairing`, `GET /pairing/{id}`: QR pairing, polled
//! - `POST /session`, `DELETE /session`: bring a device session online / offline
//! - `GET /events?after={cursor}`: long-poll for events
//! - `POST /media?kind={kind}`: upload sealed media
//! - `POST /messages`: send an envelope

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use autosticker_shared::crypto::seal_media;
use autosticker_shared::error::TransportError;
use autosticker_shared::protocol::{
    DeviceSession, OutboundEnvelope, PairingEvent, SendAck, TransportEvent, UploadReceipt,
};
use autosticker_shared::types::{MediaKind, RecipientIdentity};

use crate::transport::{EventStream, PairingStream, SessionTransport};

const LONG_POLL_SECS: u64 = 25;

#[derive(Debug, Deserialize)]
struct PairingStarted {
    pairing_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum PairingStatus {
    Pending,
    Code { code: String },
    Success { session: DeviceSession },
    Timeout,
    Error { message: String },
}

#[derive(Debug, Deserialize)]
struct EventsPage {
    cursor: Option<String>,
    #[serde(default)]
    events: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct MediaUploaded {
    url: String,
    direct_path: String,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    recipient: &'a RecipientIdentity,
    envelope: &'a OutboundEnvelope,
}

pub struct HttpBridgeTransport {
    client: Client,
    base_url: String,
    poll_interval: Duration,
    token: Arc<RwLock<Option<String>>>,
    events_taken: AtomicBool,
}

impl HttpBridgeTransport {
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| TransportError::Network(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            poll_interval: Duration::from_secs(1),
            token: Arc::new(RwLock::new(None)),
            events_taken: AtomicBool::new(false),
        })
    }

    /// Interval between pairing status polls and between event poll retries.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1{}", self.base_url, path)
    }

    fn authed(&self, request: RequestBuilder) -> Result<RequestBuilder, TransportError> {
        let token = current_token(&self.token)
            .ok_or_else(|| TransportError::Session("not connected".to_string()))?;
        Ok(request.bearer_auth(token))
    }
}

fn current_token(token: &RwLock<Option<String>>) -> Option<String> {
    token
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

fn set_token(token: &RwLock<Option<String>>, value: Option<String>) {
    *token.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = value;
}

fn network_error(e: reqwest::Error) -> TransportError {
    TransportError::Network(e.to_string())
}

/// Map non-success statuses onto the transport error taxonomy.
async fn check_status(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = format!("{status}: {}", body.trim());
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TransportError::Session(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            TransportError::Network(detail)
        }
        s if s.is_server_error() => TransportError::Network(detail),
        _ => TransportError::Protocol(detail),
    })
}

async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, TransportError> {
    check_status(response)
        .await?
        .json::<T>()
        .await
        .map_err(|e| TransportError::Protocol(format!("invalid bridge response: {e}")))
}

struct PairingPoll {
    client: Client,
    status_url: String,
    interval: Duration,
    last_code: Option<String>,
    first: bool,
    done: bool,
}

async fn next_pairing_event(mut poll: PairingPoll) -> Option<(PairingEvent, PairingPoll)> {
    if poll.done {
        return None;
    }

    loop {
        if !poll.first {
            tokio::time::sleep(poll.interval).await;
        }
        poll.first = false;

        let status = match poll.client.get(&poll.status_url).send().await {
            Ok(response) => read_json::<PairingStatus>(response).await,
            Err(e) => Err(network_error(e)),
        };

        let event = match status {
            Ok(PairingStatus::Pending) => continue,
            Ok(PairingStatus::Code { code }) => {
                if poll.last_code.as_deref() == Some(code.as_str()) {
                    continue;
                }
                poll.last_code = Some(code.clone());
                PairingEvent::Code(code)
            }
            Ok(PairingStatus::Success { session }) => PairingEvent::Success(session),
            Ok(PairingStatus::Timeout) => PairingEvent::Timeout,
            Ok(PairingStatus::Error { message }) => PairingEvent::Error(message),
            Err(e) => PairingEvent::Error(e.to_string()),
        };

        if !matches!(event, PairingEvent::Code(_)) {
            poll.done = true;
        }
        return Some((event, poll));
    }
}

struct EventPoll {
    client: Client,
    events_url: String,
    token: Arc<RwLock<Option<String>>>,
    retry_interval: Duration,
    cursor: Option<String>,
    buffer: VecDeque<TransportEvent>,
    finished: bool,
}

async fn next_transport_event(mut poll: EventPoll) -> Option<(TransportEvent, EventPoll)> {
    loop {
        if let Some(event) = poll.buffer.pop_front() {
            return Some((event, poll));
        }
        if poll.finished {
            return None;
        }
        // disconnect() clears the token, which ends the stream
        let Some(token) = current_token(&poll.token) else {
            return None;
        };

        let mut request = poll
            .client
            .get(&poll.events_url)
            .bearer_auth(token)
            .timeout(Duration::from_secs(LONG_POLL_SECS + 5))
            .query(&[("timeout", LONG_POLL_SECS.to_string())]);
        if let Some(cursor) = &poll.cursor {
            request = request.query(&[("after", cursor)]);
        }

        let page = match request.send().await {
            Ok(response) => read_json::<EventsPage>(response).await,
            Err(e) => Err(network_error(e)),
        };

        match page {
            Ok(page) => {
                if page.cursor.is_some() {
                    poll.cursor = page.cursor;
                }
                for value in page.events {
                    match TransportEvent::from_json(value) {
                        Ok(event) => poll.buffer.push_back(event),
                        Err(e) => warn!(error = %e, "Dropping undecodable bridge event"),
                    }
                }
            }
            Err(TransportError::Session(detail)) => {
                warn!(detail = %detail, "Bridge rejected session while polling events");
                poll.finished = true;
                poll.buffer.push_back(TransportEvent::LoggedOut);
            }
            Err(e) => {
                warn!(error = %e, "Event poll failed, retrying");
                tokio::time::sleep(poll.retry_interval).await;
            }
        }
    }
}

#[async_trait]
impl SessionTransport for HttpBridgeTransport {
    async fn begin_pairing(&self) -> Result<PairingStream, TransportError> {
        let response = self
            .client
            .post(self.url("/pairing"))
            .send()
            .await
            .map_err(network_error)?;
        let started: PairingStarted = read_json(response).await?;

        info!(pairing_id = %started.pairing_id, "Pairing started");

        let poll = PairingPoll {
            client: self.client.clone(),
            status_url: self.url(&format!("/pairing/{}", started.pairing_id)),
            interval: self.poll_interval,
            last_code: None,
            first: true,
            done: false,
        };
        Ok(stream::unfold(poll, next_pairing_event).boxed())
    }

    async fn connect(&self, session: &DeviceSession) -> Result<(), TransportError> {
        let response = self
            .client
            .post(self.url("/session"))
            .bearer_auth(&session.token)
            .json(session)
            .send()
            .await
            .map_err(network_error)?;
        check_status(response).await?;

        set_token(&self.token, Some(session.token.clone()));
        self.events_taken.store(false, Ordering::SeqCst);
        info!(device = %session.device_id, "Bridge session online");
        Ok(())
    }

    async fn receive_events(&self) -> Result<EventStream, TransportError> {
        if current_token(&self.token).is_none() {
            return Err(TransportError::Session("not connected".to_string()));
        }
        if self.events_taken.swap(true, Ordering::SeqCst) {
            return Err(TransportError::Session(
                "event stream already taken".to_string(),
            ));
        }

        let poll = EventPoll {
            client: self.client.clone(),
            events_url: self.url("/events"),
            token: self.token.clone(),
            retry_interval: self.poll_interval,
            cursor: None,
            buffer: VecDeque::new(),
            finished: false,
        };
        Ok(stream::unfold(poll, next_transport_event).boxed())
    }

    async fn upload(&self, bytes: &[u8], kind: MediaKind) -> Result<UploadReceipt, TransportError> {
        let sealed = seal_media(bytes, kind)
            .map_err(|e| TransportError::Protocol(format!("sealing failed: {e}")))?;
        let encrypted_len = sealed.ciphertext.len();

        let request = self
            .client
            .post(self.url("/media"))
            .query(&[("kind", kind.as_str())])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(sealed.ciphertext);
        let response = self
            .authed(request)?
            .send()
            .await
            .map_err(network_error)?;
        let uploaded: MediaUploaded = read_json(response).await?;

        debug!(
            kind = kind.as_str(),
            plaintext_len = bytes.len(),
            ciphertext_len = encrypted_len,
            "Uploaded sealed media"
        );

        Ok(UploadReceipt {
            remote_url: uploaded.url,
            direct_path: uploaded.direct_path,
            content_hash: sealed.content_hash,
            encrypted_content_hash: sealed.encrypted_hash,
            encryption_key: sealed.media_key,
            byte_length: bytes.len() as u64,
        })
    }

    async fn send_envelope(
        &self,
        recipient: &RecipientIdentity,
        envelope: &OutboundEnvelope,
    ) -> Result<SendAck, TransportError> {
        let request = self
            .client
            .post(self.url("/messages"))
            .json(&SendRequest { recipient, envelope });
        let response = self
            .authed(request)?
            .send()
            .await
            .map_err(network_error)?;
        read_json(response).await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let Some(token) = current_token(&self.token) else {
            return Ok(());
        };
        set_token(&self.token, None);

        let response = self
            .client
            .delete(self.url("/session"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(network_error)?;
        check_status(response).await?;
        info!("Bridge session closed");
        Ok(())
    }
}

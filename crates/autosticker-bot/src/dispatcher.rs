//! Event dispatcher.
//!
//! Turns inbound transport events into sticker replies:
//!
//! 1. Ignore anything not sent by this account, or older than the freshness
//!    threshold.
//! 2. Check the chat against the allow-list.
//! 3. Pick a random file from the media catalog, convert it to a WebP
//!    sticker, upload it, and send a sticker envelope back to the chat.
//!
//! Each event runs in its own task. A failing event is logged with its
//! stage and dropped; the dispatcher keeps serving the next one.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use autosticker_media::{MediaCatalog, MediaTransform};
use autosticker_net::{EventStream, SessionTransport, UploadGateway};
use autosticker_shared::constants::{DEFAULT_FRESHNESS_THRESHOLD_SECS, DEFAULT_SHUTDOWN_GRACE_SECS};
use autosticker_shared::crypto::content_hash;
use autosticker_shared::protocol::{InboundEvent, OutboundEnvelope, SendAck, TransportEvent};
use autosticker_shared::types::MediaKind;

use crate::error::DispatchError;
use crate::policy::{is_allowed, AllowList};
use crate::stats::{DispatchStats, StatsSnapshot};

/// Wall clock in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Result of the freshness/origin check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted { age_secs: i64 },
    NotSelf,
    Stale { age_secs: i64 },
}

/// Decide whether `event` qualifies for a reply at `now_ms`.
///
/// Age is whole seconds, truncated. Timestamps from the future count as
/// age zero.
pub fn evaluate(event: &InboundEvent, now_ms: i64, threshold_secs: u64) -> Admission {
    if !event.is_from_me {
        return Admission::NotSelf;
    }

    let age_ms = now_ms.saturating_sub(event.origin_timestamp_ms).max(0);
    let age_secs = age_ms / 1000;
    let threshold = i64::try_from(threshold_secs).unwrap_or(i64::MAX);

    if age_secs <= threshold {
        Admission::Admitted { age_secs }
    } else {
        Admission::Stale { age_secs }
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub freshness_threshold_secs: u64,
    /// Time in-flight replies get to finish once shutdown starts.
    pub shutdown_grace: Duration,
    /// Fixed seed for sticker picks; `None` draws from OS entropy.
    pub seed: Option<u64>,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            freshness_threshold_secs: DEFAULT_FRESHNESS_THRESHOLD_SECS,
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
            seed: None,
        }
    }
}

/// What happened to a single event.
#[derive(Debug)]
pub enum Outcome {
    Sent(SendAck),
    Ignored(Admission),
    Failed(DispatchError),
    /// Not a chat message.
    Skipped,
}

pub struct Dispatcher {
    transport: Arc<dyn SessionTransport>,
    allow_list: Arc<AllowList>,
    catalog: MediaCatalog,
    transform: MediaTransform,
    gateway: UploadGateway,
    clock: Arc<dyn Clock>,
    settings: DispatcherSettings,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn SessionTransport>,
        allow_list: Arc<AllowList>,
        catalog: MediaCatalog,
        gateway: UploadGateway,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            transport,
            allow_list,
            catalog,
            transform: MediaTransform::default(),
            gateway,
            clock: Arc::new(SystemClock),
            settings,
            stats: Arc::new(DispatchStats::default()),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[cfg(test)]
    pub fn stats(&self) -> Arc<DispatchStats> {
        self.stats.clone()
    }

    /// Drive the dispatcher until `shutdown` fires or the event stream ends.
    ///
    /// Every event gets its own task. After the loop stops, in-flight tasks
    /// have `shutdown_grace` to finish before their uploads are cancelled
    /// and the tasks aborted.
    pub async fn run(
        self: Arc<Self>,
        mut events: EventStream,
        shutdown: CancellationToken,
    ) -> StatsSnapshot {
        let in_flight_cancel = CancellationToken::new();
        let mut in_flight = JoinSet::new();

        info!(
            threshold_secs = self.settings.freshness_threshold_secs,
            allowed_chats = self.allow_list.len(),
            media_dir = %self.catalog.directory().display(),
            "Dispatcher running"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, no longer accepting events");
                    break;
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "Dispatch task panicked");
                        }
                    }
                }
                next = events.next() => match next {
                    Some(event) => {
                        let this = Arc::clone(&self);
                        let cancel = in_flight_cancel.clone();
                        in_flight.spawn(async move {
                            this.handle_event(event, &cancel).await;
                        });
                    }
                    None => {
                        info!("Event stream closed");
                        break;
                    }
                }
            }
        }

        self.drain(in_flight, in_flight_cancel).await;

        let snapshot = self.stats.snapshot();
        info!(
            received = snapshot.received,
            sent = snapshot.sent,
            failed = snapshot.failed,
            denied = snapshot.denied,
            ignored_not_self = snapshot.ignored_not_self,
            ignored_stale = snapshot.ignored_stale,
            "Dispatcher stopped"
        );
        snapshot
    }

    async fn drain(&self, mut in_flight: JoinSet<()>, in_flight_cancel: CancellationToken) {
        if in_flight.is_empty() {
            return;
        }

        let grace = self.settings.shutdown_grace;
        info!(
            pending = in_flight.len(),
            grace_ms = grace.as_millis() as u64,
            "Waiting for in-flight replies"
        );

        let finished = tokio::time::timeout(grace, async {
            while in_flight.join_next().await.is_some() {}
        })
        .await;

        if finished.is_err() {
            warn!(remaining = in_flight.len(), "Grace period over, aborting in-flight replies");
            in_flight_cancel.cancel();
            in_flight.abort_all();
            while in_flight.join_next().await.is_some() {}
        }
    }

    pub async fn handle_event(&self, event: TransportEvent, cancel: &CancellationToken) -> Outcome {
        match event {
            TransportEvent::Message(message) => self.handle_message(&message, cancel).await,
            TransportEvent::Connected => {
                info!("Transport connected");
                Outcome::Skipped
            }
            TransportEvent::Disconnected { reason } => {
                warn!(reason = reason.as_deref().unwrap_or("unknown"), "Transport disconnected");
                Outcome::Skipped
            }
            TransportEvent::LoggedOut => {
                warn!("Device was logged out remotely; restart to pair again");
                Outcome::Skipped
            }
            TransportEvent::Receipt { message_id } => {
                debug!(message_id = %message_id, "Receipt");
                Outcome::Skipped
            }
            TransportEvent::Other { kind } => {
                debug!(kind = %kind, "Ignoring event");
                Outcome::Skipped
            }
        }
    }

    pub async fn handle_message(&self, event: &InboundEvent, cancel: &CancellationToken) -> Outcome {
        self.stats.record_received();

        let admission = evaluate(
            event,
            self.clock.now_millis(),
            self.settings.freshness_threshold_secs,
        );
        match admission {
            Admission::NotSelf => {
                self.stats.record_not_self();
                debug!(message_id = %event.message_id, "Ignoring message not sent by this account");
                return Outcome::Ignored(admission);
            }
            Admission::Stale { age_secs } => {
                self.stats.record_stale();
                debug!(message_id = %event.message_id, age_secs, "Ignoring old message");
                return Outcome::Ignored(admission);
            }
            Admission::Admitted { age_secs } => {
                debug!(message_id = %event.message_id, chat = %event.chat, age_secs, "Message admitted");
            }
        }

        match self.dispatch(event, cancel).await {
            Ok(ack) => {
                self.stats.record_sent();
                info!(
                    message_id = %event.message_id,
                    chat = %event.chat,
                    reply_id = %ack.message_id,
                    "Sticker sent"
                );
                Outcome::Sent(ack)
            }
            Err(e @ DispatchError::PolicyViolation(_)) => {
                self.stats.record_denied();
                warn!(
                    message_id = %event.message_id,
                    chat = %event.chat,
                    stage = %e.stage(),
                    "Chat not on the allow-list, not replying"
                );
                Outcome::Failed(e)
            }
            Err(e) => {
                self.stats.record_failed();
                error!(
                    message_id = %event.message_id,
                    chat = %event.chat,
                    stage = %e.stage(),
                    error = %e,
                    "Dispatch failed"
                );
                Outcome::Failed(e)
            }
        }
    }

    /// Produce and send one sticker for an admitted event.
    async fn dispatch(
        &self,
        event: &InboundEvent,
        cancel: &CancellationToken,
    ) -> Result<SendAck, DispatchError> {
        if !is_allowed(&event.chat, &self.allow_list) {
            return Err(DispatchError::PolicyViolation(event.chat.clone()));
        }

        let candidates = self
            .catalog
            .list_candidates(cancel)
            .await
            .map_err(DispatchError::Catalog)?;
        let asset = {
            let mut rng = self.event_rng(&event.message_id);
            self.catalog
                .pick(candidates, &mut rng)
                .map_err(DispatchError::Catalog)?
        };

        let decoded = self
            .transform
            .decode(&asset)
            .await
            .map_err(DispatchError::Transform)?;
        let media = self
            .transform
            .encode(decoded)
            .await
            .map_err(DispatchError::Transform)?;

        let receipt = self
            .gateway
            .upload(&media.bytes, MediaKind::Image, cancel)
            .await
            .map_err(DispatchError::Upload)?;

        // the gateway has already checked the receipt against these bytes
        let envelope =
            OutboundEnvelope::sticker(&receipt, &media.mime_type, self.clock.now_millis() / 1000);

        self.transport
            .send_envelope(&event.chat, &envelope)
            .await
            .map_err(DispatchError::Send)
    }

    // Each event gets its own generator; nothing random is shared between
    // tasks.
    fn event_rng(&self, message_id: &str) -> StdRng {
        match self.settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ message_seed(message_id)),
            None => StdRng::from_entropy(),
        }
    }
}

fn message_seed(message_id: &str) -> u64 {
    let hash = content_hash(message_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash[..8]);
    u64::from_le_bytes(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use chrono::Utc;
    use rand::RngCore;

    use autosticker_net::{LoopbackTransport, RetryPolicy};
    use autosticker_shared::constants::STICKER_MIME;
    use autosticker_shared::error::{MediaError, TransportError};
    use autosticker_shared::protocol::DeviceSession;
    use autosticker_shared::types::{RecipientIdentity, RecipientKind};

    use crate::policy::AllowEntry;

    const NOW_MS: i64 = 1_700_000_000_000;
    const CHAT_A: &str = "120363000000000001@g.us";
    const CHAT_B: &str = "120363000000000002@g.us";

    struct FixedClock(i64);

    impl Clock for FixedClock {
        fn now_millis(&self) -> i64 {
            self.0
        }
    }

    struct Harness {
        transport: Arc<LoopbackTransport>,
        dispatcher: Dispatcher,
        media: tempfile::TempDir,
    }

    fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut out = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut out, image::ImageFormat::Jpeg)
            .unwrap();
        out.into_inner()
    }

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(16, 16, image::Rgb([1, 2, 3]));
        let mut out = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn write_file(dir: &Path, name: &str, bytes: &[u8]) {
        std::fs::write(dir.join(name), bytes).unwrap();
    }

    fn message(chat: &str, age_ms: i64, from_me: bool) -> InboundEvent {
        InboundEvent {
            message_id: format!("3EB0{age_ms:08}"),
            sender: "31600000000@s.whatsapp.net".into(),
            chat: RecipientIdentity::parse(chat).unwrap(),
            origin_timestamp_ms: NOW_MS - age_ms,
            is_from_me: from_me,
            raw_payload_ref: None,
        }
    }

    fn session() -> DeviceSession {
        DeviceSession {
            device_id: "31600000000:3@s.whatsapp.net".into(),
            push_name: None,
            token: "t".into(),
            paired_at: Utc::now(),
        }
    }

    async fn harness(allowed: &[&str]) -> Harness {
        let media = tempfile::tempdir().unwrap();
        let transport = Arc::new(LoopbackTransport::new());
        transport.connect(&session()).await.unwrap();

        let entries: Vec<AllowEntry> = allowed
            .iter()
            .map(|identity| AllowEntry {
                identity: identity.to_string(),
                kind: RecipientKind::Group,
            })
            .collect();
        let allow_list = Arc::new(AllowList::from_entries(&entries).unwrap());

        let gateway = UploadGateway::new(transport.clone()).with_retry(RetryPolicy::none());
        let dispatcher = Dispatcher::new(
            transport.clone(),
            allow_list,
            MediaCatalog::new(media.path()),
            gateway,
            DispatcherSettings {
                freshness_threshold_secs: 20,
                shutdown_grace: Duration::from_millis(200),
                seed: Some(1),
            },
        )
        .with_clock(Arc::new(FixedClock(NOW_MS)));

        Harness {
            transport,
            dispatcher,
            media,
        }
    }

    async fn handle(h: &Harness, event: InboundEvent) -> Outcome {
        h.dispatcher
            .handle_event(TransportEvent::Message(event), &CancellationToken::new())
            .await
    }

    // -- admission --

    #[test]
    fn test_age_boundary_in_milliseconds() {
        assert_eq!(
            evaluate(&message(CHAT_A, 20_999, true), NOW_MS, 20),
            Admission::Admitted { age_secs: 20 }
        );
        assert_eq!(
            evaluate(&message(CHAT_A, 21_000, true), NOW_MS, 20),
            Admission::Stale { age_secs: 21 }
        );
    }

    #[test]
    fn test_future_timestamp_counts_as_fresh() {
        assert_eq!(
            evaluate(&message(CHAT_A, -90_000, true), NOW_MS, 20),
            Admission::Admitted { age_secs: 0 }
        );
    }

    #[test]
    fn test_not_self_never_admitted() {
        for age_ms in [0, 1_000, 20_000, 500_000] {
            assert_eq!(
                evaluate(&message(CHAT_A, age_ms, false), NOW_MS, 20),
                Admission::NotSelf
            );
        }
    }

    #[test]
    fn test_seeded_rng_depends_on_message_id() {
        let settings = DispatcherSettings {
            seed: Some(42),
            ..DispatcherSettings::default()
        };
        let transport: Arc<dyn SessionTransport> = Arc::new(LoopbackTransport::new());
        let dispatcher = Dispatcher::new(
            transport.clone(),
            Arc::new(AllowList::default()),
            MediaCatalog::new("unused"),
            UploadGateway::new(transport),
            settings,
        );

        let a = dispatcher.event_rng("3EB0A").next_u64();
        assert_eq!(a, dispatcher.event_rng("3EB0A").next_u64());
        assert_ne!(a, dispatcher.event_rng("3EB0B").next_u64());
    }

    // -- end to end --

    #[tokio::test]
    async fn test_fresh_self_message_gets_sticker() {
        let h = harness(&[CHAT_A]).await;
        write_file(h.media.path(), "cat.jpg", &jpeg_bytes(640, 480));

        let outcome = handle(&h, message(CHAT_A, 5_000, true)).await;
        assert!(matches!(outcome, Outcome::Sent(_)), "got {outcome:?}");

        let uploads = h.transport.uploads();
        let sends = h.transport.sends();
        assert_eq!(uploads.len(), 1);
        assert_eq!(sends.len(), 1);
        assert_eq!(uploads[0].kind, MediaKind::Image);
        assert_eq!(&uploads[0].bytes[..4], b"RIFF");
        assert_eq!(&uploads[0].bytes[8..12], b"WEBP");

        assert_eq!(sends[0].recipient.to_string(), CHAT_A);
        let OutboundEnvelope::Sticker(sticker) = &sends[0].envelope;
        assert_eq!(sticker.mimetype, STICKER_MIME);
        assert_eq!(sticker.file_length, uploads[0].bytes.len() as u64);
        assert_eq!(sticker.file_hash, uploads[0].receipt.content_hash);
        assert_eq!(sticker.media_key, uploads[0].receipt.encryption_key);
        assert_eq!(sticker.direct_path, uploads[0].receipt.direct_path);
        assert_eq!((sticker.width, sticker.height), (100, 100));
        assert_eq!(sticker.media_key_timestamp, NOW_MS / 1000);
        assert!(!sticker.is_animated);

        assert_eq!(h.dispatcher.stats().snapshot().sent, 1);
    }

    #[tokio::test]
    async fn test_companion_device_message_gets_sticker() {
        let h = harness(&[CHAT_A]).await;
        write_file(h.media.path(), "cat.jpg", &jpeg_bytes(64, 64));

        let event = TransportEvent::from_json(serde_json::json!({
            "kind": "message",
            "message_id": "3EB0WEB",
            "sender": "31600000000:7@s.whatsapp.net",
            "chat": CHAT_A,
            "origin_timestamp_ms": NOW_MS - 2_000,
            "is_from_me": true
        }))
        .unwrap();

        let outcome = h.dispatcher.handle_event(event, &CancellationToken::new()).await;
        assert!(matches!(outcome, Outcome::Sent(_)), "got {outcome:?}");
        assert_eq!(h.transport.sends().len(), 1);
        assert_eq!(h.transport.sends()[0].recipient.to_string(), CHAT_A);
    }

    #[tokio::test]
    async fn test_chat_not_allowed_is_denied_before_media_work() {
        let h = harness(&[CHAT_A]).await;
        // no media at all: the catalog must not be consulted
        std::fs::remove_dir(h.media.path()).unwrap();

        let outcome = handle(&h, message(CHAT_B, 1_000, true)).await;
        assert!(matches!(
            outcome,
            Outcome::Failed(DispatchError::PolicyViolation(ref chat)) if chat.to_string() == CHAT_B
        ));
        assert_eq!(h.transport.upload_attempts(), 0);
        assert!(h.transport.sends().is_empty());
        assert_eq!(h.dispatcher.stats().snapshot().denied, 1);
    }

    #[tokio::test]
    async fn test_stale_message_ignored() {
        let h = harness(&[CHAT_A]).await;
        write_file(h.media.path(), "cat.jpg", &jpeg_bytes(64, 64));

        let outcome = handle(&h, message(CHAT_A, 25_000, true)).await;
        assert!(matches!(outcome, Outcome::Ignored(Admission::Stale { age_secs: 25 })));
        assert_eq!(h.transport.upload_attempts(), 0);
        assert!(h.transport.sends().is_empty());
    }

    #[tokio::test]
    async fn test_other_peoples_messages_ignored() {
        let h = harness(&[CHAT_A]).await;
        write_file(h.media.path(), "cat.jpg", &jpeg_bytes(64, 64));

        let outcome = handle(&h, message(CHAT_A, 0, false)).await;
        assert!(matches!(outcome, Outcome::Ignored(Admission::NotSelf)));
        assert_eq!(h.transport.upload_attempts(), 0);
        assert_eq!(h.dispatcher.stats().snapshot().ignored_not_self, 1);
    }

    #[tokio::test]
    async fn test_empty_catalog_fails_then_recovers() {
        let h = harness(&[CHAT_A]).await;

        let outcome = handle(&h, message(CHAT_A, 1_000, true)).await;
        assert!(matches!(
            outcome,
            Outcome::Failed(DispatchError::Catalog(MediaError::EmptyCatalog(_)))
        ));
        assert!(h.transport.sends().is_empty());

        write_file(h.media.path(), "dog.jpg", &jpeg_bytes(32, 32));
        let outcome = handle(&h, message(CHAT_A, 2_000, true)).await;
        assert!(matches!(outcome, Outcome::Sent(_)));

        let snap = h.dispatcher.stats().snapshot();
        assert_eq!((snap.failed, snap.sent), (1, 1));
    }

    #[tokio::test]
    async fn test_non_jpeg_asset_fails_in_transform() {
        let h = harness(&[CHAT_A]).await;
        write_file(h.media.path(), "sticker.png", &png_bytes());

        let outcome = handle(&h, message(CHAT_A, 1_000, true)).await;
        let Outcome::Failed(err) = outcome else {
            panic!("expected a transform failure");
        };
        assert!(matches!(err, DispatchError::Transform(MediaError::UnsupportedFormat(_))));
        assert_eq!(err.stage().as_str(), "transform");
        assert_eq!(h.transport.upload_attempts(), 0);
    }

    #[tokio::test]
    async fn test_upload_failure_is_recovered() {
        let h = harness(&[CHAT_A]).await;
        write_file(h.media.path(), "cat.jpg", &jpeg_bytes(64, 64));
        h.transport.fail_next_uploads(1);

        let outcome = handle(&h, message(CHAT_A, 1_000, true)).await;
        assert!(matches!(
            outcome,
            Outcome::Failed(DispatchError::Upload(TransportError::Network(_)))
        ));
        assert!(h.transport.sends().is_empty());

        let outcome = handle(&h, message(CHAT_A, 1_500, true)).await;
        assert!(matches!(outcome, Outcome::Sent(_)));
    }

    #[tokio::test]
    async fn test_send_failure_reports_send_stage() {
        let h = harness(&[CHAT_A]).await;
        write_file(h.media.path(), "cat.jpg", &jpeg_bytes(64, 64));
        h.transport.fail_next_sends(1);

        let Outcome::Failed(err) = handle(&h, message(CHAT_A, 1_000, true)).await else {
            panic!("expected send failure");
        };
        assert_eq!(err.stage().as_str(), "send");
        assert_eq!(h.transport.uploads().len(), 1);
    }

    #[tokio::test]
    async fn test_each_event_gets_its_own_upload() {
        let h = harness(&[CHAT_A]).await;
        write_file(h.media.path(), "cat.jpg", &jpeg_bytes(64, 64));

        let a = message(CHAT_A, 1_000, true);
        let mut b = a.clone();
        b.message_id = "3EB0DUPLICATE".into();
        handle(&h, a).await;
        handle(&h, b).await;

        let uploads = h.transport.uploads();
        assert_eq!(uploads.len(), 2);
        assert_ne!(uploads[0].receipt.direct_path, uploads[1].receipt.direct_path);
        assert_eq!(h.transport.sends().len(), 2);
    }

    #[tokio::test]
    async fn test_non_message_events_skipped() {
        let h = harness(&[CHAT_A]).await;
        let cancel = CancellationToken::new();

        for event in [
            TransportEvent::Connected,
            TransportEvent::Disconnected { reason: None },
            TransportEvent::LoggedOut,
            TransportEvent::Receipt { message_id: "x".into() },
            TransportEvent::Other { kind: "presence".into() },
        ] {
            let outcome = h.dispatcher.handle_event(event, &cancel).await;
            assert!(matches!(outcome, Outcome::Skipped));
        }
        assert_eq!(h.dispatcher.stats().snapshot().received, 0);
    }

    // -- run loop --

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_run_processes_events_until_stream_ends() {
        let h = harness(&[CHAT_A]).await;
        write_file(h.media.path(), "cat.jpg", &jpeg_bytes(64, 64));
        let transport = h.transport.clone();
        let events = transport.receive_events().await.unwrap();

        let run = tokio::spawn(Arc::new(h.dispatcher).run(events, CancellationToken::new()));

        transport.inject(TransportEvent::Connected);
        transport.inject(TransportEvent::Message(message(CHAT_A, 0, false)));
        transport.inject(TransportEvent::Message(message(CHAT_A, 1_000, true)));
        wait_until(|| transport.sends().len() == 1).await;

        transport.disconnect().await.unwrap();
        let snapshot = tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(snapshot.received, 2);
        assert_eq!(snapshot.sent, 1);
        assert_eq!(snapshot.ignored_not_self, 1);
    }

    #[tokio::test]
    async fn test_shutdown_aborts_slow_uploads_after_grace() {
        let h = harness(&[CHAT_A]).await;
        write_file(h.media.path(), "cat.jpg", &jpeg_bytes(64, 64));
        let transport = h.transport.clone();
        transport.set_upload_delay(Duration::from_secs(30));
        let events = transport.receive_events().await.unwrap();

        let shutdown = CancellationToken::new();
        let run = tokio::spawn(Arc::new(h.dispatcher).run(events, shutdown.clone()));

        transport.inject(TransportEvent::Message(message(CHAT_A, 1_000, true)));
        wait_until(|| transport.upload_attempts() == 1).await;

        shutdown.cancel();
        let snapshot = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("run did not stop after the grace period")
            .unwrap();

        assert_eq!(snapshot.sent, 0);
        assert!(transport.sends().is_empty());
    }
}

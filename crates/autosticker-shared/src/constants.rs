/// Application name
pub const APP_NAME: &str = "autosticker";

/// Server part of a direct-chat identity (`<number>@s.whatsapp.net`)
pub const USER_SERVER: &str = "s.whatsapp.net";

/// Server part of a group identity (`<id>@g.us`)
pub const GROUP_SERVER: &str = "g.us";

/// Maximum age in seconds an inbound message may have to trigger a reply
pub const DEFAULT_FRESHNESS_THRESHOLD_SECS: u64 = 20;

/// Directory scanned for candidate images
pub const DEFAULT_MEDIA_DIR: &str = "stickers";

/// Stickers must fit inside a square canvas of this many pixels
pub const STICKER_CANVAS_PX: u32 = 512;

/// Presentation size advertised in the sticker envelope
pub const ENVELOPE_THUMB_WIDTH: u32 = 100;
pub const ENVELOPE_THUMB_HEIGHT: u32 = 100;

/// Mime type of encoded sticker payloads
pub const STICKER_MIME: &str = "image/webp";

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Media key size in bytes
pub const MEDIA_KEY_SIZE: usize = 32;

/// Maximum upload size in bytes (16 MiB)
pub const MAX_MEDIA_SIZE: usize = 16 * 1024 * 1024;

/// Largest source image the transform will read (32 MiB)
pub const MAX_SOURCE_SIZE: u64 = 32 * 1024 * 1024;

/// Per-attempt upload timeout in seconds
pub const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 30;

/// Upload attempts before giving up on transient failures
pub const DEFAULT_UPLOAD_MAX_ATTEMPTS: u32 = 3;

/// First retry delay in milliseconds (doubles per attempt)
pub const DEFAULT_UPLOAD_BACKOFF_MS: u64 = 500;

/// Time in-flight sends get to finish after a shutdown signal
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

/// Default HTTP bridge endpoint
pub const DEFAULT_BRIDGE_URL: &str = "http://127.0.0.1:8088";

/// Key derivation context (BLAKE3) for media encryption keys
pub const KDF_CONTEXT_MEDIA_KEY: &str = "autosticker-media-key-v1";

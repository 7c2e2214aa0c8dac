use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No media assets available in {0}")]
    EmptyCatalog(String),

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Encode failed: {0}")]
    Encode(String),

    #[error("Source too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },

    #[error("Operation cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Upload receipt does not match payload: {0}")]
    ReceiptMismatch(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Malformed identity '{0}': expected <user>@<server>")]
    Malformed(String),

    #[error("Identity '{identity}' is not a {expected} identity")]
    KindMismatch { identity: String, expected: String },
}

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,
}

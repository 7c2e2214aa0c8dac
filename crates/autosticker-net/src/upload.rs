//! Upload gateway: bounded, cancellable, verified uploads.
//!
//! Every attempt runs under a timeout. Transient failures (network errors,
//! timeouts) are retried with exponential backoff; session problems and
//! receipt mismatches are returned immediately. Each successful receipt is
//! checked against the bytes that were handed in, so an envelope can never
//! reference hashes computed over different content.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use autosticker_shared::constants::{
    DEFAULT_UPLOAD_BACKOFF_MS, DEFAULT_UPLOAD_MAX_ATTEMPTS, DEFAULT_UPLOAD_TIMEOUT_SECS,
    MAX_MEDIA_SIZE,
};
use autosticker_shared::crypto::{content_hash, short_hash};
use autosticker_shared::error::TransportError;
use autosticker_shared::protocol::UploadReceipt;
use autosticker_shared::types::MediaKind;

use crate::transport::SessionTransport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero behaves like one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each further one.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_UPLOAD_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_UPLOAD_BACKOFF_MS),
        }
    }
}

#[derive(Clone)]
pub struct UploadGateway {
    transport: Arc<dyn SessionTransport>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl UploadGateway {
    pub fn new(transport: Arc<dyn SessionTransport>) -> Self {
        Self {
            transport,
            timeout: Duration::from_secs(DEFAULT_UPLOAD_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn upload(
        &self,
        bytes: &[u8],
        kind: MediaKind,
        cancel: &CancellationToken,
    ) -> Result<UploadReceipt, TransportError> {
        if bytes.len() > MAX_MEDIA_SIZE {
            return Err(TransportError::Protocol(format!(
                "payload too large: {} bytes (max {MAX_MEDIA_SIZE})",
                bytes.len()
            )));
        }

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(TransportError::Cancelled),
                outcome = tokio::time::timeout(self.timeout, self.transport.upload(bytes, kind)) => {
                    match outcome {
                        Ok(result) => result.and_then(|receipt| verify_receipt(bytes, receipt)),
                        Err(_) => Err(TransportError::Timeout(self.timeout)),
                    }
                }
            };

            match result {
                Ok(receipt) => {
                    debug!(
                        kind = kind.as_str(),
                        size = bytes.len(),
                        attempt,
                        direct_path = %receipt.direct_path,
                        content_hash = %short_hash(&receipt.content_hash),
                        "Upload complete"
                    );
                    return Ok(receipt);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Upload failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Check that `receipt` describes exactly `bytes`.
pub fn verify_receipt(bytes: &[u8], receipt: UploadReceipt) -> Result<UploadReceipt, TransportError> {
    if receipt.byte_length != bytes.len() as u64 {
        return Err(TransportError::ReceiptMismatch(format!(
            "byte length {} != payload length {}",
            receipt.byte_length,
            bytes.len()
        )));
    }
    if receipt.content_hash != content_hash(bytes) {
        return Err(TransportError::ReceiptMismatch(
            "content hash differs from payload hash".to_string(),
        ));
    }
    Ok(receipt)
}

//! Linked-device pairing and session bootstrap.

use std::io::Write;

use anyhow::{bail, Context};
use futures::StreamExt;
use qrcode::render::unicode;
use qrcode::QrCode;
use tracing::{info, warn};

use autosticker_net::SessionTransport;
use autosticker_shared::error::TransportError;
use autosticker_shared::protocol::{DeviceSession, PairingEvent};
use autosticker_store::CredentialStore;

/// Render a QR payload as half-block characters for a terminal.
pub fn render_qr(payload: &str) -> anyhow::Result<String> {
    let code = QrCode::new(payload.as_bytes()).context("QR payload does not fit in a code")?;
    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}

/// Run the QR pairing flow, printing every code to `out` until the phone
/// scans one. Timeout and errors are fatal.
pub async fn pair_device<W: Write>(
    transport: &dyn SessionTransport,
    out: &mut W,
) -> anyhow::Result<DeviceSession> {
    let mut events = transport
        .begin_pairing()
        .await
        .context("failed to start pairing")?;

    while let Some(event) = events.next().await {
        match event {
            PairingEvent::Code(code) => {
                let qr = render_qr(&code)?;
                writeln!(out, "{qr}")?;
                out.flush()?;
                info!(code = %code, "Scan the QR code from the phone (Linked devices)");
            }
            PairingEvent::Success(session) => {
                info!(device = %session.device_id, "Pairing succeeded");
                return Ok(session);
            }
            PairingEvent::Timeout => bail!("pairing timed out before a code was scanned"),
            PairingEvent::Error(reason) => bail!("pairing failed: {reason}"),
        }
    }

    bail!("pairing ended without a result")
}

/// Connect with the stored session, or pair a new device.
///
/// A stored session the transport rejects is cleared and replaced by a
/// fresh pairing. Other connect failures are returned as-is.
pub async fn establish_session<S, W>(
    transport: &dyn SessionTransport,
    store: &S,
    out: &mut W,
) -> anyhow::Result<DeviceSession>
where
    S: CredentialStore,
    W: Write,
{
    if let Some(session) = store.load_session()? {
        match transport.connect(&session).await {
            Ok(()) => {
                info!(device = %session.device_id, "Connected with stored session");
                return Ok(session);
            }
            Err(TransportError::Session(reason)) => {
                warn!(reason = %reason, "Stored session rejected, pairing again");
                store.clear_session()?;
            }
            Err(e) => return Err(e).context("failed to connect with stored session"),
        }
    } else {
        info!("No stored session, starting pairing");
    }

    let session = pair_device(transport, out).await?;
    store.save_session(&session)?;
    transport
        .connect(&session)
        .await
        .context("failed to connect after pairing")?;
    Ok(session)
}

//! # autosticker
//!
//! Linked-device bot that answers your own fresh messages with a random
//! sticker.
//!
//! This binary:
//! - pairs with the phone through a QR code (once; the session is kept in a
//!   local SQLite database)
//! - listens for messages sent from this account
//! - for each fresh message in an allow-listed chat, picks a random JPEG
//!   from the media directory, converts it to a WebP sticker, uploads it and
//!   sends it back to the same chat

mod config;
mod dispatcher;
mod error;
mod pairing;
mod policy;
mod stats;

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use autosticker_media::MediaCatalog;
use autosticker_net::{HttpBridgeTransport, SessionTransport, UploadGateway};
use autosticker_store::Database;

use crate::config::BotConfig;
use crate::dispatcher::Dispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,autosticker_bot=debug")),
        )
        .init();

    info!("Starting autosticker v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = BotConfig::load()?;
    info!(?config, "Loaded configuration");

    let allow_list = Arc::new(config.allow_list()?);
    if allow_list.is_empty() {
        warn!("Allow-list is empty, no chat will receive stickers");
    }
    for chat in allow_list.iter() {
        info!(chat = %chat, "Allowed chat");
    }

    // -----------------------------------------------------------------------
    // 3. Open the credential store
    // -----------------------------------------------------------------------
    let store = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };

    // -----------------------------------------------------------------------
    // 4. Shutdown signal (Ctrl+C / SIGTERM)
    // -----------------------------------------------------------------------
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    // -----------------------------------------------------------------------
    // 5. Connect: stored session, or pair a new device
    // -----------------------------------------------------------------------
    let transport: Arc<dyn SessionTransport> = Arc::new(
        HttpBridgeTransport::new(&config.bridge_url).context("invalid bridge URL")?,
    );

    let mut stdout = std::io::stdout();
    let session = tokio::select! {
        result = pairing::establish_session(transport.as_ref(), &store, &mut stdout) => result?,
        _ = shutdown.cancelled() => {
            info!("Shutdown before the session was established");
            return Ok(());
        }
    };
    info!(device = %session.device_id, "Session established");

    let events = transport
        .receive_events()
        .await
        .context("failed to subscribe to events")?;

    // -----------------------------------------------------------------------
    // 6. Run the dispatcher (blocks until shutdown or the stream ends)
    // -----------------------------------------------------------------------
    let gateway = UploadGateway::new(transport.clone())
        .with_timeout(config.upload_timeout())
        .with_retry(config.retry_policy());

    let dispatcher = Arc::new(Dispatcher::new(
        transport.clone(),
        allow_list,
        MediaCatalog::new(&config.media_dir),
        gateway,
        config.dispatcher_settings(),
    ));

    dispatcher.run(events, shutdown.clone()).await;

    // -----------------------------------------------------------------------
    // 7. Disconnect
    // -----------------------------------------------------------------------
    if let Err(e) = transport.disconnect().await {
        warn!(error = %e, "Disconnect failed");
    }
    info!("Stopped");

    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                        _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Cannot listen for SIGTERM, only Ctrl+C will stop the bot");
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Received Ctrl+C, shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, shutting down");
        }

        shutdown.cancel();
    });
}

//! # SimplePush Agent
//!
//! Keeps a set of push channels subscribed and logs their notifications.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! simplepush
//!
//! # Run with custom config
//! simplepush --config /path/to/simplepush.toml
//!
//! # Run with environment variables
//! SIMPLEPUSH_URL=ws://push.example.com/simplepush simplepush
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use simplepush_agent::config::Config;
use simplepush_agent::{
    metrics, ConnectOptions, PushError, PushEvent, SimplePush, SubscribeRequest,
};
use simplepush_core::{FilePersistence, HandlerError};
use simplepush_protocol::Update;
use simplepush_transport::WebSocketTransport;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = match args.config {
        Some(path) => Config::from_file(&path)?,
        None => Config::load()?,
    };

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.filter.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        client = %config.name,
        url = %config.connect_url,
        store = %config.store_dir.display(),
        "Starting SimplePush agent"
    );

    if config.metrics.enabled {
        metrics::init_metrics();
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let push = SimplePush::new(
        config.client_settings(),
        Arc::new(FilePersistence::new(&config.store_dir)),
        Arc::new(WebSocketTransport::new()),
    )
    .context("Failed to open push store")?;

    push.add_message_handler(|update: &Update| -> Result<(), HandlerError> {
        debug!(channel = %update.channel_id, version = update.version, "Push message");
        Ok(())
    });

    let mut events = push.events();

    // Offline: reuse stored channels or queue new ones
    let bindings = push.subscribe(config.subscriptions.iter().cloned().map(subscription), false)?;
    for (label, channel) in config.subscriptions.iter().zip(&bindings) {
        info!(label = %label, channel = %channel, "Channel bound");
    }

    push.connect(
        ConnectOptions::new().on_connect_error(|e| error!(error = %e, "Connection error")),
    )
    .await
    .with_context(|| format!("Failed to connect to {}", config.connect_url))?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(PushEvent::Connected { uaid }) => {
                    info!(uaid = %uaid, "Connected");
                    register_queued_channels(&push);
                }
                Ok(PushEvent::Disconnected) => {
                    warn!("Connection closed by server");
                    break;
                }
                Ok(event) => debug!(event = event.kind(), "Push event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event receiver lagged"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                shutdown(&push).await?;
                break;
            }
        }
    }

    Ok(())
}

/// Subscription for one configured label.
fn subscription(label: String) -> SubscribeRequest {
    let on_success = label.clone();
    let on_error = label.clone();
    SubscribeRequest::new()
        .on_success(move |record| {
            info!(
                label = %on_success,
                channel = %record.channel_id,
                version = record.version,
                "Subscribed"
            );
        })
        .on_error(move |e| warn!(label = %on_error, error = %e, "Subscription rejected"))
        .on_notification(move |update| -> Result<(), HandlerError> {
            info!(label = %label, version = update.version, "Notification");
            Ok(())
        })
}

/// Register channels queued while offline; nothing else ever does.
fn register_queued_channels(push: &SimplePush) {
    let queued = push.pending_new_channels();
    if queued.is_empty() {
        return;
    }

    info!(count = queued.len(), "Registering queued channels");
    let requests = queued
        .into_iter()
        .map(|record| SubscribeRequest::new().with_channel_id(record.channel_id));
    if let Err(e) = push.subscribe(requests, false) {
        error!(error = %e, "Failed to register queued channels");
    }
}

/// Disconnect, tolerating a connection the server already closed.
async fn shutdown(push: &SimplePush) -> Result<()> {
    match push.disconnect_with(|| info!("Disconnected")).await {
        Ok(()) | Err(PushError::NotConnected) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

mod action;
mod apps;
mod client;
mod core;
mod discovery;
mod error;
mod http;
mod registry;
mod rpc;
mod shares;

use std::path::PathBuf;
use std::sync::Arc;

use nymph_proto::config::Config;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Log lines kept in the published state.
const LOG_CAP: usize = 200;

#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    /// The session snapshot changed; receivers should fetch from StateManager.
    StateUpdated,
    Log(String),
}

/// A custom tracing layer that forwards log messages to the broadcast channel
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        // Only WARN and ERROR reach the published log
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = String::new();
        let now = chrono::Local::now();
        message.push_str(&format!("{} [{}] ", now.format("%H:%M:%S"), level));

        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // No receivers is OK
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

/// A relative stylesheet path is looked up next to the config file.
fn resolve_stylesheet(config: &Config) -> PathBuf {
    let path = &config.ui.stylesheet;
    if path.is_absolute() {
        return path.clone();
    }
    nymph_proto::platform::config_dir().join(path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Broadcast channel first so logging can use it
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(256);

    let data_dir = nymph_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("remote.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer::new(broadcast_tx.clone()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,nymphcast_remote=debug")
            }),
        )
        .init();

    // Print log path to stderr so the operator can tail it immediately.
    eprintln!("nymphcast-remote log: {}", log_path.display());
    info!("Log file: {:?}", log_path);

    let config_path = Config::config_path();
    let config = Config::load_from(&config_path)?;
    info!("Config loaded from: {:?}", config_path);

    let stylesheet = resolve_stylesheet(&config);
    if !stylesheet.is_file() {
        warn!("Stylesheet {} not found", stylesheet.display());
    }

    // Event channel: every input funnels into SessionCore
    let (event_tx, event_rx) = mpsc::channel::<core::SessionEvent>(256);

    // Status updates arrive from the RPC reader tasks and are re-queued onto
    // the controller loop.
    let (status_tx, mut status_rx) = mpsc::channel::<client::StatusEvent>(256);
    let forward_tx = event_tx.clone();
    tokio::spawn(async move {
        while let Some(evt) = status_rx.recv().await {
            if forward_tx.send(core::SessionEvent::Status(evt)).await.is_err() {
                break;
            }
        }
    });

    let client = Arc::new(rpc::RpcClient::new(config.client.clone(), status_tx));
    let session_core = core::SessionCore::new(
        client,
        config.clone(),
        Some(config_path),
        broadcast_tx.clone(),
    )?;
    let state_manager = session_core.state_manager();

    // Keep the tail of WARN/ERROR lines in the published state
    let mut log_rx = broadcast_tx.subscribe();
    let log_state = state_manager.clone();
    tokio::spawn(async move {
        loop {
            match log_rx.recv().await {
                Ok(BroadcastMessage::Log(line)) => log_state.push_log(line, LOG_CAP).await,
                Ok(BroadcastMessage::StateUpdated) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            http::HttpState::new(state_manager.clone(), event_tx.clone(), stylesheet),
        );
    }

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            let _ = shutdown_tx.send(core::SessionEvent::Shutdown).await;
        }
    });
    drop(event_tx);

    info!("Remote initialised, running event loop");
    session_core.run(event_rx).await?;

    Ok(())
}

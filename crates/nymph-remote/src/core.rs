/// SessionCore: single-owner event loop for all controller state.
///
/// The HTTP surface sends `SessionEvent::Command`s; the cast client's I/O
/// tasks push status updates that a forwarder re-sends as
/// `SessionEvent::Status`.  Both arrive on the same queue and are handled one
/// at a time, so a status update can never interleave with a user command.
///
/// SessionCore owns the connection, the playlist, the remote registry, the
/// shares index and the playback view exclusively.  After every event it
/// publishes a fresh `SessionState` snapshot into the `StateManager` and
/// broadcasts `BroadcastMessage::StateUpdated`.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nymph_proto::config::Config;
use nymph_proto::playlist::PlaylistStore;
use nymph_proto::protocol::{format_clock, Handle};
use nymph_proto::state::{ConnectionInfo, PlaybackView, SessionState, StateManager};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::action::{Action, Outcome};
use crate::apps::{self, AppLink};
use crate::client::{CastClient, StatusEvent};
use crate::error::{ControlError, ErrorKind};
use crate::registry::RemoteRegistry;
use crate::shares::{ShareBrowser, ShareKey};
use crate::BroadcastMessage;

pub const MAX_VOLUME: i64 = 128;
pub const MAX_SEEK: i64 = 100;
/// Lines kept in the app console transcript.
const CONSOLE_CAP: usize = 500;

pub type CommandReply = oneshot::Sender<Result<Outcome, ControlError>>;

// ── SessionEvent ──────────────────────────────────────────────────────────────

/// All inputs into the SessionCore loop.
#[derive(Debug)]
pub enum SessionEvent {
    /// A user intent.  The result is sent back on `reply` when present.
    Command {
        action: Action,
        reply: Option<CommandReply>,
    },
    /// Playback status forwarded from the cast client.
    Status(StatusEvent),
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
enum Transport {
    Pause,
    Forward,
    Rewind,
}

pub fn about_text() -> String {
    format!(
        "NymphCast Remote {}: casts local media files and URLs to NymphCast receivers.",
        env!("CARGO_PKG_VERSION")
    )
}

// ── SessionCore ───────────────────────────────────────────────────────────────

pub struct SessionCore<C: CastClient> {
    client: Arc<C>,
    config: Config,
    /// Where config changes are saved.  `None` keeps them in memory only.
    config_path: Option<PathBuf>,
    state_manager: Arc<StateManager>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    connection: Option<ConnectionInfo>,
    playlist: PlaylistStore,
    current_index: Option<usize>,
    single_play: bool,
    registry: RemoteRegistry,
    shares: ShareBrowser,
    apps: Vec<String>,
    console: Vec<String>,
    /// Display state, including the volume slider value, the muted flag and
    /// the track-in-progress flag.
    playback: PlaybackView,
}

impl<C: CastClient> SessionCore<C> {
    pub fn new(
        client: Arc<C>,
        config: Config,
        config_path: Option<PathBuf>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> anyhow::Result<Self> {
        let playlist = PlaylistStore::load(config.paths.playlist_file.clone())?;
        info!(
            "SessionCore: {} playlist entries from {}",
            playlist.len(),
            playlist.file().display()
        );
        let single_play = config.playback.single_play;

        let mut core = Self {
            client,
            config,
            config_path,
            state_manager: Arc::new(StateManager::new()),
            broadcast_tx,
            connection: None,
            playlist,
            current_index: None,
            single_play,
            registry: RemoteRegistry::new(),
            shares: ShareBrowser::new(),
            apps: Vec::new(),
            console: Vec::new(),
            playback: PlaybackView::default(),
        };
        core.reset_display();
        Ok(core)
    }

    /// Borrow the state manager (for use by the HTTP server).
    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    /// Run the event loop.  Returns on `Shutdown`, `Quit`, or when every
    /// sender is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<SessionEvent>) -> anyhow::Result<()> {
        info!("SessionCore: starting event loop");
        self.publish().await;

        loop {
            match event_rx.recv().await {
                None => {
                    info!("SessionCore: event channel closed, shutting down");
                    break;
                }

                Some(SessionEvent::Shutdown) => {
                    info!("SessionCore: shutdown requested");
                    break;
                }

                Some(SessionEvent::Command { action, reply }) => {
                    let quit = matches!(action, Action::Quit);
                    let result = self.handle_action(action).await;
                    if let Err(e) = &result {
                        match e.kind() {
                            ErrorKind::Transport => error!("SessionCore: command failed: {}", e),
                            ErrorKind::Validation | ErrorKind::NothingFound => {
                                warn!("SessionCore: {}", e)
                            }
                        }
                    }
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                    self.publish().await;
                    if quit {
                        info!("SessionCore: quit requested");
                        break;
                    }
                }

                Some(SessionEvent::Status(evt)) => {
                    self.handle_status(evt).await;
                    self.publish().await;
                }
            }
        }

        self.cleanup().await;
        Ok(())
    }

    // ── action dispatch ───────────────────────────────────────────────────────

    pub async fn handle_action(&mut self, action: Action) -> Result<Outcome, ControlError> {
        match action {
            Action::Connect { address } => self.connect(&address).await,
            Action::Disconnect | Action::DisconnectRemote => self.disconnect().await,
            Action::ScanRemotes => self.scan_remotes().await,
            Action::ConnectRemotes { indices } => self.connect_remotes(&indices).await,

            Action::CastFile { path } => self.cast_file(&path).await,
            Action::CastUrl { url } => self.cast_url(&url).await,

            Action::AddFile { path } => self.add_file(&path),
            Action::RemoveFile { index } => self.remove_file(index),
            Action::Select { index } => self.select(index),
            Action::SetSinglePlay(enabled) => {
                info!("SessionCore: single play {}", enabled);
                self.single_play = enabled;
                Ok(Outcome::Done)
            }

            Action::Play => self.play().await,
            Action::Stop => self.stop().await,
            Action::Pause => self.transport(Transport::Pause).await,
            Action::Forward => self.transport(Transport::Forward).await,
            Action::Rewind => self.transport(Transport::Rewind).await,
            Action::Seek { percent } => self.seek(percent).await,
            Action::Volume { value } => self.set_volume(value).await,
            Action::Mute => self.toggle_mute().await,

            Action::RefreshApps => self.refresh_apps().await,
            Action::SendAppMessage { app_id, message } => {
                self.send_app_message(&app_id, &message).await
            }
            Action::AppsHome => self.apps_home().await,
            Action::FollowLink { path } => self.follow_link(&path).await,
            Action::LoadResource { path } => self.load_resource(&path).await,

            Action::ScanShares => self.scan_shares().await,
            Action::PlayShare {
                selection,
                receivers,
            } => self.play_share(&selection, &receivers).await,

            Action::About => Ok(Outcome::About { text: about_text() }),
            Action::Quit => Ok(Outcome::Done),
        }
    }

    /// Handle of the active session, or `None` (logged) when disconnected.
    fn active_handle(&self, what: &str) -> Option<Handle> {
        let handle = self.connection.as_ref().map(|c| c.handle);
        if handle.is_none() {
            debug!("SessionCore: {} ignored while disconnected", what);
        }
        handle
    }

    // ── connection ────────────────────────────────────────────────────────────

    async fn connect(&mut self, address: &str) -> Result<Outcome, ControlError> {
        let address = address.trim();
        if address.is_empty() {
            debug!("SessionCore: empty address, nothing to connect");
            return Ok(Outcome::Ignored);
        }
        self.connect_to(address, 0).await
    }

    async fn connect_to(&mut self, address: &str, port: u16) -> Result<Outcome, ControlError> {
        if let Some(conn) = &self.connection {
            debug!("SessionCore: already connected to {}", conn.address);
            return Ok(Outcome::Ignored);
        }

        info!("SessionCore: connecting to {}", address);
        let handle = self
            .client
            .connect(address, port)
            .await
            .map_err(|e| ControlError::ConnectFailed {
                address: address.to_string(),
                reason: format!("{e:#}"),
            })?;

        info!("SessionCore: connected to {} (handle {})", address, handle);
        self.connection = Some(ConnectionInfo {
            address: address.to_string(),
            handle,
        });
        Ok(Outcome::Done)
    }

    async fn disconnect(&mut self) -> Result<Outcome, ControlError> {
        let Some(conn) = self.connection.take() else {
            debug!("SessionCore: disconnect ignored, not connected");
            return Ok(Outcome::Ignored);
        };
        if let Err(e) = self.client.disconnect(conn.handle).await {
            warn!("SessionCore: disconnect from {} failed: {:#}", conn.address, e);
        }
        info!("SessionCore: disconnected from {}", conn.address);

        // Nothing this controller started is running on the new session.
        self.playback.track_in_progress = false;
        self.playback.muted = false;
        self.reset_display();
        self.apps.clear();
        Ok(Outcome::Done)
    }

    async fn scan_remotes(&mut self) -> Result<Outcome, ControlError> {
        let remotes = self
            .client
            .find_servers()
            .await
            .map_err(ControlError::transport)?;
        let found = remotes.len();
        if found == 0 {
            info!("SessionCore: no remotes found");
        } else {
            info!("SessionCore: {} remote(s) found", found);
        }
        self.registry.replace(remotes);
        Ok(Outcome::Remotes { found })
    }

    /// Connect to the first selected remote and register the rest as its
    /// slaves.
    async fn connect_remotes(&mut self, indices: &[usize]) -> Result<Outcome, ControlError> {
        if self.connection.is_some() {
            debug!("SessionCore: already connected, remote selection ignored");
            return Ok(Outcome::Ignored);
        }
        let selected = self.registry.resolve(indices)?;
        let Some((master, slaves)) = selected.split_first() else {
            return Err(ControlError::NoSelection("remote"));
        };

        self.connect_to(&master.ipv4, master.port).await?;
        if slaves.is_empty() {
            return Ok(Outcome::Done);
        }

        let Some(handle) = self.active_handle("add slaves") else {
            return Ok(Outcome::Ignored);
        };
        info!(
            "SessionCore: adding {} slave(s) to {}",
            slaves.len(),
            master.label()
        );
        self.client
            .add_slaves(handle, slaves)
            .await
            .map_err(ControlError::transport)?;
        Ok(Outcome::Done)
    }

    // ── casting ───────────────────────────────────────────────────────────────

    async fn cast_file(&mut self, path: &Path) -> Result<Outcome, ControlError> {
        let Some(handle) = self.active_handle("cast file") else {
            return Ok(Outcome::Ignored);
        };
        if !path.is_file() {
            return Err(ControlError::InvalidFile(path.to_path_buf()));
        }
        info!("SessionCore: casting {}", path.display());
        self.client
            .cast_file(handle, path)
            .await
            .map_err(ControlError::transport)?;
        self.playback.track_in_progress = true;
        Ok(Outcome::Done)
    }

    async fn cast_url(&mut self, url: &str) -> Result<Outcome, ControlError> {
        let Some(handle) = self.active_handle("cast url") else {
            return Ok(Outcome::Ignored);
        };
        let url = url.trim();
        if url.is_empty() {
            return Ok(Outcome::Ignored);
        }
        info!("SessionCore: casting url {}", url);
        self.client
            .cast_url(handle, url)
            .await
            .map_err(ControlError::transport)?;
        Ok(Outcome::Done)
    }

    // ── playlist ──────────────────────────────────────────────────────────────

    fn add_file(&mut self, path: &Path) -> Result<Outcome, ControlError> {
        if self.config.remember_open_dir(path) {
            self.save_config();
        }
        let entry = self.playlist.add(path)?;
        info!("SessionCore: added '{}' to playlist", entry.name);
        Ok(Outcome::Done)
    }

    fn remove_file(&mut self, index: usize) -> Result<Outcome, ControlError> {
        let removed = self.playlist.remove(index)?;
        info!("SessionCore: removed '{}' from playlist", removed.name);
        self.current_index = match self.current_index {
            Some(current) if current == index => None,
            Some(current) if current > index => Some(current - 1),
            other => other,
        };
        Ok(Outcome::Done)
    }

    fn select(&mut self, index: usize) -> Result<Outcome, ControlError> {
        if index >= self.playlist.len() {
            return Err(ControlError::OutOfRange {
                what: "playlist index",
                value: index as i64,
                min: 0,
                max: self.playlist.len() as i64 - 1,
            });
        }
        self.current_index = Some(index);
        Ok(Outcome::Done)
    }

    fn save_config(&self) {
        let Some(path) = &self.config_path else {
            return;
        };
        if let Err(e) = self.config.save_to(path) {
            warn!("SessionCore: failed to save config: {:#}", e);
        }
    }

    // ── transport ─────────────────────────────────────────────────────────────

    /// Resume the track this controller started, or cast the selected
    /// playlist entry.
    async fn play(&mut self) -> Result<Outcome, ControlError> {
        let Some(handle) = self.active_handle("play") else {
            return Ok(Outcome::Ignored);
        };

        if self.playback.track_in_progress {
            self.client
                .playback_start(handle)
                .await
                .map_err(ControlError::transport)?;
            return Ok(Outcome::Done);
        }

        let entry = self
            .current_index
            .and_then(|i| self.playlist.get(i))
            .cloned()
            .ok_or(ControlError::NoSelection("file"))?;

        info!("SessionCore: playing '{}'", entry.name);
        self.client
            .cast_file(handle, &entry.path)
            .await
            .map_err(ControlError::transport)?;
        self.playback.track_in_progress = true;
        Ok(Outcome::Done)
    }

    async fn stop(&mut self) -> Result<Outcome, ControlError> {
        let Some(handle) = self.active_handle("stop") else {
            return Ok(Outcome::Ignored);
        };
        self.playback.track_in_progress = false;
        self.client
            .playback_stop(handle)
            .await
            .map_err(ControlError::transport)?;
        Ok(Outcome::Done)
    }

    async fn transport(&mut self, cmd: Transport) -> Result<Outcome, ControlError> {
        let Some(handle) = self.active_handle("transport") else {
            return Ok(Outcome::Ignored);
        };
        let result = match cmd {
            Transport::Pause => self.client.playback_pause(handle).await,
            Transport::Forward => self.client.playback_forward(handle).await,
            Transport::Rewind => self.client.playback_rewind(handle).await,
        };
        result.map_err(ControlError::transport)?;
        Ok(Outcome::Done)
    }

    async fn seek(&mut self, percent: i64) -> Result<Outcome, ControlError> {
        if !(0..=MAX_SEEK).contains(&percent) {
            return Err(ControlError::OutOfRange {
                what: "seek position",
                value: percent,
                min: 0,
                max: MAX_SEEK,
            });
        }
        let Some(handle) = self.active_handle("seek") else {
            return Ok(Outcome::Ignored);
        };
        self.client
            .playback_seek(handle, percent as u8)
            .await
            .map_err(ControlError::transport)?;
        Ok(Outcome::Done)
    }

    async fn set_volume(&mut self, value: i64) -> Result<Outcome, ControlError> {
        if !(0..=MAX_VOLUME).contains(&value) {
            return Err(ControlError::OutOfRange {
                what: "volume",
                value,
                min: 0,
                max: MAX_VOLUME,
            });
        }
        self.playback.volume = value as u8;
        let Some(handle) = self.active_handle("volume") else {
            return Ok(Outcome::Ignored);
        };
        self.client
            .volume_set(handle, value as u8)
            .await
            .map_err(ControlError::transport)?;
        Ok(Outcome::Done)
    }

    /// Mute sends volume 0; unmute sends whatever the volume slider shows now.
    async fn toggle_mute(&mut self) -> Result<Outcome, ControlError> {
        let Some(handle) = self.active_handle("mute") else {
            return Ok(Outcome::Ignored);
        };
        let volume = if self.playback.muted {
            self.playback.volume
        } else {
            0
        };
        self.client
            .volume_set(handle, volume)
            .await
            .map_err(ControlError::transport)?;
        self.playback.muted = !self.playback.muted;
        Ok(Outcome::Done)
    }

    // ── remote apps ───────────────────────────────────────────────────────────

    async fn refresh_apps(&mut self) -> Result<Outcome, ControlError> {
        let Some(handle) = self.active_handle("app list") else {
            return Ok(Outcome::Ignored);
        };
        let raw = self
            .client
            .app_list(handle)
            .await
            .map_err(ControlError::transport)?;
        self.apps = apps::parse_app_list(&raw);
        Ok(Outcome::Apps {
            apps: self.apps.clone(),
        })
    }

    async fn send_app_message(
        &mut self,
        app_id: &str,
        message: &str,
    ) -> Result<Outcome, ControlError> {
        let Some(handle) = self.active_handle("app message") else {
            return Ok(Outcome::Ignored);
        };
        if app_id.is_empty() {
            return Err(ControlError::NoSelection("app"));
        }
        self.push_console(message.to_string());
        let response = self
            .client
            .app_send(handle, app_id, message)
            .await
            .map_err(ControlError::transport)?;
        self.push_console(response.clone());
        Ok(Outcome::AppResponse { response })
    }

    async fn apps_home(&mut self) -> Result<Outcome, ControlError> {
        let Some(handle) = self.active_handle("apps home") else {
            return Ok(Outcome::Ignored);
        };
        let page = self
            .client
            .load_resource(handle, "", apps::HOME_RESOURCE)
            .await
            .map_err(ControlError::transport)?;
        Ok(Outcome::Page(page))
    }

    async fn follow_link(&mut self, path: &str) -> Result<Outcome, ControlError> {
        let Some(handle) = self.active_handle("app link") else {
            return Ok(Outcome::Ignored);
        };
        match AppLink::parse(path) {
            AppLink::Start(app) => {
                info!("SessionCore: starting app {}", app);
                let page = self
                    .client
                    .load_resource(handle, &app, apps::INDEX_RESOURCE)
                    .await
                    .map_err(ControlError::transport)?;
                if page.is_empty() {
                    return Err(ControlError::AppStartFailed(app));
                }
                Ok(Outcome::Page(page))
            }
            AppLink::Message { app, command } => self.send_app_message(&app, &command).await,
            AppLink::Ignore => {
                debug!("SessionCore: link {:?} ignored", path);
                Ok(Outcome::Ignored)
            }
        }
    }

    async fn load_resource(&mut self, path: &str) -> Result<Outcome, ControlError> {
        let Some(handle) = self.active_handle("resource") else {
            return Ok(Outcome::Ignored);
        };
        let (app_id, name) = apps::resource_path(path);
        let bytes = self
            .client
            .load_resource(handle, &app_id, &name)
            .await
            .map_err(ControlError::transport)?;
        Ok(Outcome::Page(bytes))
    }

    fn push_console(&mut self, line: String) {
        self.console.push(line);
        if self.console.len() > CONSOLE_CAP {
            let excess = self.console.len() - CONSOLE_CAP;
            self.console.drain(..excess);
        }
    }

    // ── shares ────────────────────────────────────────────────────────────────

    async fn scan_shares(&mut self) -> Result<Outcome, ControlError> {
        let servers = self
            .client
            .find_shares()
            .await
            .map_err(ControlError::transport)?;
        self.shares.clear();
        if servers.is_empty() {
            return Err(ControlError::NothingFound("media servers"));
        }

        let mut listing = Vec::with_capacity(servers.len());
        for server in servers {
            match self.client.get_shares(&server).await {
                Ok(files) => listing.push((server, files)),
                Err(e) => warn!(
                    "SessionCore: share list from {} failed: {:#}",
                    server.label(),
                    e
                ),
            }
        }

        let files = self.shares.rebuild(listing);
        if self.shares.is_empty() {
            return Err(ControlError::NothingFound("media servers"));
        }
        info!(
            "SessionCore: {} shared file(s) on {} server(s)",
            files,
            self.shares.groups().len()
        );
        Ok(Outcome::Shares { files })
    }

    async fn play_share(
        &mut self,
        selection: &[ShareKey],
        receivers: &[usize],
    ) -> Result<Outcome, ControlError> {
        let file = self.shares.resolve(selection)?.clone();
        let receivers = if receivers.is_empty() {
            Vec::new()
        } else {
            self.registry.resolve(receivers)?
        };
        info!(
            "SessionCore: playing share '{}' on {} receiver(s)",
            file.name,
            receivers.len()
        );
        self.client
            .play_share(&file, &receivers)
            .await
            .map_err(ControlError::transport)?;
        Ok(Outcome::Done)
    }

    // ── status ────────────────────────────────────────────────────────────────

    pub async fn handle_status(&mut self, evt: StatusEvent) {
        match &self.connection {
            Some(conn) if conn.handle == evt.handle => {}
            _ => {
                debug!("SessionCore: stale status for handle {}", evt.handle);
                return;
            }
        }

        let status = evt.status;
        self.playback.volume = status.volume;

        if status.playing {
            self.playback.playing = true;
            self.playback.position_secs = status.position;
            self.playback.duration_secs = status.duration;
            self.playback.position_percent = status.position_percent();
            self.playback.clock = status.clock_label();
            self.playback.title = status.title;
            self.playback.artist = status.artist;
            return;
        }

        self.reset_display();
        if !self.playback.track_in_progress {
            return;
        }
        self.playback.track_in_progress = false;
        if self.single_play {
            info!("SessionCore: track finished (single play)");
            return;
        }

        let Some(next) = self.playlist.next_index(self.current_index) else {
            info!("SessionCore: track finished, playlist empty");
            return;
        };
        info!("SessionCore: track finished, advancing to entry {}", next);
        self.current_index = Some(next);
        if let Err(e) = self.play().await {
            error!("SessionCore: auto-advance failed: {}", e);
        }
    }

    fn reset_display(&mut self) {
        self.playback.playing = false;
        self.playback.position_secs = 0.0;
        self.playback.duration_secs = 0.0;
        self.playback.position_percent = 0;
        self.playback.clock = format!("{} / {}", format_clock(0.0), format_clock(0.0));
        self.playback.title = None;
        self.playback.artist = None;
    }

    // ── publishing ────────────────────────────────────────────────────────────

    fn snapshot(&self) -> SessionState {
        SessionState {
            rev: 0,
            connection: self.connection.clone(),
            playback: self.playback.clone(),
            playlist: self.playlist.entries().to_vec(),
            current_index: self.current_index,
            single_play: self.single_play,
            remotes: self.registry.remotes().to_vec(),
            apps: self.apps.clone(),
            app_console: self.console.clone(),
            shares: self.shares.groups().to_vec(),
            logs: Vec::new(),
        }
    }

    async fn publish(&self) {
        self.state_manager.publish(self.snapshot()).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    async fn cleanup(&mut self) {
        if let Some(conn) = self.connection.take() {
            info!("SessionCore: cleanup, closing session to {}", conn.address);
            if let Err(e) = self.client.disconnect(conn.handle).await {
                warn!("SessionCore: disconnect during cleanup failed: {:#}", e);
            }
        }
        self.publish().await;
    }
}

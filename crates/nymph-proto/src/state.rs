use crate::playlist::PlaylistEntry;
use crate::protocol::{Handle, MediaFile, RemoteDescriptor};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Active receiver session as seen by the controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionInfo {
    pub address: String,
    pub handle: Handle,
}

/// Display state for the transport controls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PlaybackView {
    pub playing: bool,
    pub position_secs: f64,
    pub duration_secs: f64,
    /// 0..=100 position indicator.
    pub position_percent: u8,
    /// `hh:mm:ss / hh:mm:ss`
    pub clock: String,
    /// Last on-screen volume value, 0..=128.
    pub volume: u8,
    pub muted: bool,
    /// True once this controller started a track that has not ended yet.
    pub track_in_progress: bool,
    pub title: Option<String>,
    pub artist: Option<String>,
}

/// A media server with the files it shares, as shown in the shares tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShareGroup {
    pub server: RemoteDescriptor,
    pub files: Vec<ShareItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShareItem {
    pub server_ordinal: usize,
    pub file_ordinal: usize,
    /// Running counter, unique across the whole index.
    pub serial: u32,
    pub file: MediaFile,
}

/// Full published state of the controller.  `rev` is a monotonically
/// increasing counter incremented on every publish.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionState {
    #[serde(default)]
    pub rev: u64,
    pub connection: Option<ConnectionInfo>,
    pub playback: PlaybackView,
    pub playlist: Vec<PlaylistEntry>,
    pub current_index: Option<usize>,
    pub single_play: bool,
    pub remotes: Vec<RemoteDescriptor>,
    pub apps: Vec<String>,
    /// Sent app commands and their responses, oldest first.
    pub app_console: Vec<String>,
    pub shares: Vec<ShareGroup>,
    /// Recent WARN/ERROR log lines.
    #[serde(default)]
    pub logs: Vec<String>,
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Label for the connection indicator.
    pub fn remote_label(&self) -> String {
        match &self.connection {
            Some(c) => format!("Connected to {}", c.address),
            None => "Disconnected.".to_string(),
        }
    }
}

/// Shared read side of the controller state.  Only the controller publishes.
pub struct StateManager {
    state: Arc<RwLock<SessionState>>,
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(SessionState::default())),
        }
    }

    pub async fn get_state(&self) -> SessionState {
        self.state.read().await.clone()
    }

    /// Replace the snapshot.  Log lines are owned by the manager and carried
    /// over; the revision is bumped.
    pub async fn publish(&self, mut next: SessionState) -> u64 {
        let mut state = self.state.write().await;
        next.rev = state.rev + 1;
        next.logs = std::mem::take(&mut state.logs);
        *state = next;
        state.rev
    }

    /// Append a log line, keeping at most `cap` lines.
    pub async fn push_log(&self, line: String, cap: usize) {
        let mut state = self.state.write().await;
        state.logs.push(line);
        if state.logs.len() > cap {
            let excess = state.logs.len() - cap;
            state.logs.drain(..excess);
        }
        state.rev += 1;
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

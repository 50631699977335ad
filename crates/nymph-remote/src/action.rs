//! User intents handled by `SessionCore`, and what they produce.
use std::path::PathBuf;

use serde::Serialize;

use crate::shares::ShareKey;

#[derive(Debug, Clone)]
pub enum Action {
    // Connection
    Connect { address: String },
    Disconnect,
    ScanRemotes,
    /// First index is the master, the rest become its slaves.
    ConnectRemotes { indices: Vec<usize> },
    DisconnectRemote,

    // Casting outside the playlist
    CastFile { path: PathBuf },
    CastUrl { url: String },

    // Playlist
    AddFile { path: PathBuf },
    RemoveFile { index: usize },
    Select { index: usize },
    SetSinglePlay(bool),

    // Transport
    Play,
    Stop,
    Pause,
    Forward,
    Rewind,
    Seek { percent: i64 },
    Volume { value: i64 },
    Mute,

    // Remote apps
    RefreshApps,
    SendAppMessage { app_id: String, message: String },
    AppsHome,
    FollowLink { path: String },
    LoadResource { path: String },

    // Shares
    ScanShares,
    /// `receivers` are positions in the remote list; empty is allowed.
    PlayShare {
        selection: Vec<ShareKey>,
        receivers: Vec<usize>,
    },

    About,
    Quit,
}

/// Successful result of an action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Done,
    /// Benign no-op: already connected, transport control while
    /// disconnected, or a link with nothing to do.
    Ignored,
    /// A remote scan finished; the list is in the published state.
    Remotes { found: usize },
    Apps { apps: Vec<String> },
    AppResponse { response: String },
    /// Raw page bytes for the app pane.
    #[serde(skip)]
    Page(Vec<u8>),
    /// A share scan finished; the index is in the published state.
    Shares { files: usize },
    About { text: String },
}

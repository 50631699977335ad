//! The cast client seam.
//!
//! `SessionCore` only ever talks to receivers and media servers through
//! `CastClient`.  The production implementation is `rpc::RpcClient`; tests
//! substitute a recording mock.  Playback status is not returned from any
//! call: implementations push `StatusEvent`s from their own I/O tasks into
//! the sender they were built with.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use nymph_proto::protocol::{Handle, MediaFile, RemoteDescriptor, StatusUpdate};

/// A status update tagged with the session it belongs to.
#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub handle: Handle,
    pub status: StatusUpdate,
}

#[async_trait]
pub trait CastClient: Send + Sync {
    /// Open a session.  `port == 0` selects the default receiver port.
    async fn connect(&self, address: &str, port: u16) -> Result<Handle>;
    async fn disconnect(&self, handle: Handle) -> Result<()>;
    /// Discover receivers.  An empty list means nobody answered in time.
    async fn find_servers(&self) -> Result<Vec<RemoteDescriptor>>;
    /// Register secondary receivers that mirror the session's playback.
    async fn add_slaves(&self, handle: Handle, remotes: &[RemoteDescriptor]) -> Result<()>;

    async fn cast_file(&self, handle: Handle, path: &Path) -> Result<()>;
    async fn cast_url(&self, handle: Handle, url: &str) -> Result<()>;

    async fn playback_start(&self, handle: Handle) -> Result<()>;
    async fn playback_stop(&self, handle: Handle) -> Result<()>;
    async fn playback_pause(&self, handle: Handle) -> Result<()>;
    async fn playback_forward(&self, handle: Handle) -> Result<()>;
    async fn playback_rewind(&self, handle: Handle) -> Result<()>;
    /// `position` is a 0..=100 percentage of the track.
    async fn playback_seek(&self, handle: Handle, position: u8) -> Result<()>;
    /// `volume` is 0..=128.
    async fn volume_set(&self, handle: Handle, volume: u8) -> Result<()>;

    /// Newline-delimited list of app ids installed on the receiver.
    async fn app_list(&self, handle: Handle) -> Result<String>;
    async fn app_send(&self, handle: Handle, app_id: &str, message: &str) -> Result<String>;
    /// Raw bytes of an app resource.  An empty `app_id` addresses the
    /// top-level app listing.
    async fn load_resource(&self, handle: Handle, app_id: &str, name: &str) -> Result<Vec<u8>>;

    async fn find_shares(&self) -> Result<Vec<RemoteDescriptor>>;
    async fn get_shares(&self, server: &RemoteDescriptor) -> Result<Vec<MediaFile>>;
    async fn play_share(&self, file: &MediaFile, receivers: &[RemoteDescriptor]) -> Result<()>;
}

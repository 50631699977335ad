/// Framed-JSON RPC client for receivers and media servers.
///
/// Architecture:
///
/// ```text
///   RpcClient::connect()
///         │
///         ├── writer_task   ← receives PendingRequest via mpsc, writes frame → socket
///         └── reader_task   ← decodes frames from socket
///                                ├── Response (has id) → matched oneshot::Sender
///                                └── Status            → watch (latest only)
///                                                            └── status_task → StatusEvent channel
/// ```
///
/// The reader never waits on the status consumer: a slow consumer sees only
/// the newest status, and replies keep flowing.
///
/// Each receiver session owns one TCP connection.  Share listing and share
/// playback open a short-lived connection to the media server instead.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use nymph_proto::config::ClientConfig;
use nymph_proto::protocol::{
    Call, Handle, MediaFile, Message, RemoteDescriptor, Reply, Service, StatusUpdate,
    PROTOCOL_VERSION,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, info, warn};

use crate::client::{CastClient, StatusEvent};
use crate::discovery;

const CLIENT_NAME: &str = "NymphCast Remote";

/// Size of each `SessionData` chunk when streaming a local file.
const CHUNK_SIZE: usize = 64 * 1024;

/// Largest frame body accepted from a peer.  A bigger length header closes
/// the connection.
const MAX_FRAME: usize = 16 * 1024 * 1024;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Reply>>>>>;

struct PendingRequest {
    req_id: u64,
    frame: Vec<u8>,
    reply: oneshot::Sender<anyhow::Result<Reply>>,
}

/// Where a connection's unsolicited status frames go.
#[derive(Clone)]
struct StatusSink {
    handle: Handle,
    tx: mpsc::Sender<StatusEvent>,
}

// ── per-connection handle ─────────────────────────────────────────────────────

/// Cloneable handle to one connection's writer task.
#[derive(Clone)]
pub struct RpcHandle {
    tx: mpsc::Sender<PendingRequest>,
    pending: PendingMap,
    timeout: Duration,
}

impl RpcHandle {
    /// Send `call` and wait for its reply.  `Reply::Error` becomes `Err`.
    pub async fn call(&self, call: Call) -> anyhow::Result<Reply> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let frame = Message::Request { id: req_id, call }.encode()?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow!("connection writer gone"))?;

        let reply = match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(reply) => reply.map_err(|_| anyhow!("reply channel dropped req={}", req_id))??,
            Err(_) => {
                self.pending.lock().await.remove(&req_id);
                bail!("request timeout for req={}", req_id);
            }
        };

        match reply {
            Reply::Error { message } => Err(anyhow!("remote error: {}", message)),
            other => Ok(other),
        }
    }

    async fn call_ok(&self, call: Call) -> anyhow::Result<()> {
        match self.call(call).await? {
            Reply::Ok => Ok(()),
            other => bail!("unexpected reply: {:?}", other),
        }
    }

    async fn call_text(&self, call: Call) -> anyhow::Result<String> {
        match self.call(call).await? {
            Reply::Text { value } => Ok(value),
            Reply::Ok => Ok(String::new()),
            other => bail!("unexpected reply: {:?}", other),
        }
    }

    /// Protocol handshake.  Returns the peer's advertised name.
    async fn hello(&self) -> anyhow::Result<String> {
        let reply = self
            .call(Call::Hello {
                protocol_version: PROTOCOL_VERSION,
                client_name: CLIENT_NAME.to_string(),
            })
            .await?;
        match reply {
            Reply::Hello {
                protocol_version,
                name,
            } if protocol_version == PROTOCOL_VERSION => Ok(name),
            Reply::Hello {
                protocol_version, ..
            } => bail!(
                "protocol version mismatch: peer speaks {}, we speak {}",
                protocol_version,
                PROTOCOL_VERSION
            ),
            other => bail!("unexpected handshake reply: {:?}", other),
        }
    }
}

// ── client ────────────────────────────────────────────────────────────────────

pub struct RpcClient {
    config: ClientConfig,
    sessions: Mutex<HashMap<Handle, RpcHandle>>,
    next_handle: AtomicU32,
    status_tx: mpsc::Sender<StatusEvent>,
}

impl RpcClient {
    pub fn new(config: ClientConfig, status_tx: mpsc::Sender<StatusEvent>) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
            next_handle: AtomicU32::new(1),
            status_tx,
        }
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.config.request_timeout_ms)
    }

    fn discovery_window(&self) -> Duration {
        Duration::from_millis(self.config.discovery_timeout_ms)
    }

    async fn session(&self, handle: Handle) -> anyhow::Result<RpcHandle> {
        self.sessions
            .lock()
            .await
            .get(&handle)
            .cloned()
            .ok_or_else(|| anyhow!("unknown session handle {}", handle))
    }

    async fn open(&self, target: &str, sink: Option<StatusSink>) -> anyhow::Result<RpcHandle> {
        let stream = tokio::time::timeout(self.request_timeout(), TcpStream::connect(target))
            .await
            .map_err(|_| anyhow!("connect timeout for {}", target))?
            .with_context(|| format!("connect to {}", target))?;
        let _ = stream.set_nodelay(true);
        let handle = start_io_tasks(stream, sink, self.request_timeout());
        let peer = handle.hello().await?;
        debug!("rpc: handshake with '{}' at {} ok", peer, target);
        Ok(handle)
    }

    async fn open_media_server(&self, server: &RemoteDescriptor) -> anyhow::Result<RpcHandle> {
        let target = resolve_target(&server.ipv4, server.port, self.config.media_server_port);
        self.open(&target, None).await
    }
}

/// `host:port` for a connect request.  `port == 0` keeps an explicit port in
/// `address` or falls back to `default_port`.
pub fn resolve_target(address: &str, port: u16, default_port: u16) -> String {
    if port != 0 {
        return format!("{}:{}", address, port);
    }
    if address.parse::<SocketAddr>().is_ok() {
        return address.to_string();
    }
    format!("{}:{}", address, default_port)
}

#[async_trait]
impl CastClient for RpcClient {
    async fn connect(&self, address: &str, port: u16) -> anyhow::Result<Handle> {
        let target = resolve_target(address, port, self.config.receiver_port);
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let sink = StatusSink {
            handle,
            tx: self.status_tx.clone(),
        };
        let rpc = self.open(&target, Some(sink)).await?;
        self.sessions.lock().await.insert(handle, rpc);
        info!("rpc: session {} open to {}", handle, target);
        Ok(handle)
    }

    async fn disconnect(&self, handle: Handle) -> anyhow::Result<()> {
        let rpc = self.sessions.lock().await.remove(&handle);
        if let Some(rpc) = rpc {
            if let Err(e) = rpc.call_ok(Call::Disconnect).await {
                debug!("rpc: disconnect of session {} not acknowledged: {}", handle, e);
            }
            info!("rpc: session {} closed", handle);
        }
        Ok(())
    }

    async fn find_servers(&self) -> anyhow::Result<Vec<RemoteDescriptor>> {
        discovery::scan(
            Service::Receiver,
            self.config.discovery_port,
            self.discovery_window(),
        )
        .await
    }

    async fn add_slaves(&self, handle: Handle, remotes: &[RemoteDescriptor]) -> anyhow::Result<()> {
        self.session(handle)
            .await?
            .call_ok(Call::AddSlaves {
                remotes: remotes.to_vec(),
            })
            .await
    }

    async fn cast_file(&self, handle: Handle, path: &Path) -> anyhow::Result<()> {
        let rpc = self.session(handle).await?;
        let mut file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("open {}", path.display()))?;
        let size = file.metadata().await?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        rpc.call_ok(Call::SessionStart {
            name: name.clone(),
            size,
        })
        .await?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut sent = 0u64;
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            sent += n as u64;
            rpc.call_ok(Call::SessionData {
                data: buf[..n].to_vec(),
                done: false,
            })
            .await?;
        }
        rpc.call_ok(Call::SessionData {
            data: Vec::new(),
            done: true,
        })
        .await?;
        info!("rpc: streamed '{}' ({} bytes) to session {}", name, sent, handle);
        Ok(())
    }

    async fn cast_url(&self, handle: Handle, url: &str) -> anyhow::Result<()> {
        self.session(handle)
            .await?
            .call_ok(Call::CastUrl {
                url: url.to_string(),
            })
            .await
    }

    async fn playback_start(&self, handle: Handle) -> anyhow::Result<()> {
        self.session(handle).await?.call_ok(Call::PlaybackStart).await
    }

    async fn playback_stop(&self, handle: Handle) -> anyhow::Result<()> {
        self.session(handle).await?.call_ok(Call::PlaybackStop).await
    }

    async fn playback_pause(&self, handle: Handle) -> anyhow::Result<()> {
        self.session(handle).await?.call_ok(Call::PlaybackPause).await
    }

    async fn playback_forward(&self, handle: Handle) -> anyhow::Result<()> {
        self.session(handle).await?.call_ok(Call::PlaybackForward).await
    }

    async fn playback_rewind(&self, handle: Handle) -> anyhow::Result<()> {
        self.session(handle).await?.call_ok(Call::PlaybackRewind).await
    }

    async fn playback_seek(&self, handle: Handle, position: u8) -> anyhow::Result<()> {
        self.session(handle)
            .await?
            .call_ok(Call::PlaybackSeek { position })
            .await
    }

    async fn volume_set(&self, handle: Handle, volume: u8) -> anyhow::Result<()> {
        self.session(handle)
            .await?
            .call_ok(Call::VolumeSet { volume })
            .await
    }

    async fn app_list(&self, handle: Handle) -> anyhow::Result<String> {
        self.session(handle).await?.call_text(Call::AppList).await
    }

    async fn app_send(&self, handle: Handle, app_id: &str, message: &str) -> anyhow::Result<String> {
        self.session(handle)
            .await?
            .call_text(Call::AppSend {
                app_id: app_id.to_string(),
                message: message.to_string(),
            })
            .await
    }

    async fn load_resource(
        &self,
        handle: Handle,
        app_id: &str,
        name: &str,
    ) -> anyhow::Result<Vec<u8>> {
        let reply = self
            .session(handle)
            .await?
            .call(Call::AppLoadResource {
                app_id: app_id.to_string(),
                name: name.to_string(),
            })
            .await?;
        match reply {
            Reply::Bytes { data } => Ok(data),
            Reply::Text { value } => Ok(value.into_bytes()),
            Reply::Ok => Ok(Vec::new()),
            other => bail!("unexpected reply: {:?}", other),
        }
    }

    async fn find_shares(&self) -> anyhow::Result<Vec<RemoteDescriptor>> {
        discovery::scan(
            Service::MediaServer,
            self.config.discovery_port,
            self.discovery_window(),
        )
        .await
    }

    async fn get_shares(&self, server: &RemoteDescriptor) -> anyhow::Result<Vec<MediaFile>> {
        let rpc = self.open_media_server(server).await?;
        match rpc.call(Call::GetShares).await? {
            Reply::Shares { files } => Ok(files),
            other => bail!("unexpected reply: {:?}", other),
        }
    }

    async fn play_share(
        &self,
        file: &MediaFile,
        receivers: &[RemoteDescriptor],
    ) -> anyhow::Result<()> {
        let rpc = self.open_media_server(&file.server).await?;
        rpc.call_ok(Call::PlayShare {
            file_id: file.id,
            receivers: receivers.to_vec(),
        })
        .await
    }
}

// ── io tasks ──────────────────────────────────────────────────────────────────

fn start_io_tasks(stream: TcpStream, sink: Option<StatusSink>, timeout: Duration) -> RpcHandle {
    let (read_half, write_half) = stream.into_split();

    // pending map: req_id → reply channel.  Shared between writer (inserts) and reader (resolves).
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    let status_tx = sink.map(|sink| {
        let (tx, rx) = watch::channel(None);
        tokio::spawn(status_task(rx, sink));
        tx
    });

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(read_half, pending.clone(), status_tx));

    RpcHandle {
        tx: cmd_tx,
        pending,
        timeout,
    }
}

/// Body length announced by the frame header at the front of `buf`.
fn frame_len(buf: &[u8]) -> Option<usize> {
    let header: [u8; 4] = buf.get(..4)?.try_into().ok()?;
    Some(u32::from_be_bytes(header) as usize)
}

/// Pop one complete frame off the front of `buf`.  A malformed frame is
/// consumed and reported as `Some(Err)`; an incomplete one leaves `buf`
/// untouched.
fn next_frame(buf: &mut Vec<u8>) -> Option<anyhow::Result<Message>> {
    let len = frame_len(buf)?;
    if buf.len() < 4 + len {
        return None;
    }
    let result = Message::decode(buf).map(|(msg, _)| msg);
    buf.drain(..4 + len);
    Some(result)
}

async fn fail_pending(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow!("{}", reason)));
    }
}

async fn reader_task(
    mut reader: OwnedReadHalf,
    pending: PendingMap,
    status_tx: Option<watch::Sender<Option<StatusUpdate>>>,
) {
    let mut tmp = [0u8; 8192];
    let mut buf: Vec<u8> = Vec::new();

    loop {
        let n = match reader.read(&mut tmp).await {
            Ok(0) => {
                debug!("rpc reader: connection closed");
                fail_pending(&pending, "connection closed").await;
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!("rpc reader: read error: {}", e);
                fail_pending(&pending, &format!("read error: {}", e)).await;
                break;
            }
        };
        buf.extend_from_slice(&tmp[..n]);

        while let Some(frame) = next_frame(&mut buf) {
            match frame {
                Ok(Message::Response { id, reply }) => {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&id) {
                        debug!("rpc reader: response req={}", id);
                        let _ = tx.send(Ok(reply));
                    } else {
                        debug!("rpc reader: response for unknown req={}", id);
                    }
                }
                Ok(Message::Status { status }) => match &status_tx {
                    Some(tx) => {
                        tx.send_replace(Some(status));
                    }
                    None => debug!("rpc reader: status on a sessionless connection"),
                },
                Ok(Message::Request { id, .. }) => {
                    debug!("rpc reader: ignoring peer request id={}", id);
                }
                Err(e) => warn!("rpc reader: dropping malformed frame: {}", e),
            }
        }

        if let Some(len) = frame_len(&buf).filter(|len| *len > MAX_FRAME) {
            warn!("rpc reader: frame of {} bytes exceeds limit, closing", len);
            fail_pending(&pending, &format!("frame too large: {} bytes", len)).await;
            break;
        }
    }
}

/// Hands the newest status of one connection to the controller's channel.
async fn status_task(mut rx: watch::Receiver<Option<StatusUpdate>>, sink: StatusSink) {
    while rx.changed().await.is_ok() {
        let Some(status) = rx.borrow_and_update().clone() else {
            continue;
        };
        let event = StatusEvent {
            handle: sink.handle,
            status,
        };
        if sink.tx.send(event).await.is_err() {
            debug!("rpc status: channel closed");
            break;
        }
    }
}

async fn writer_task(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<PendingRequest>,
    pending: PendingMap,
) {
    while let Some(req) = rx.recv().await {
        // Register reply channel before writing so reader can match it.  A
        // caller that already timed out is skipped.
        {
            let mut map = pending.lock().await;
            if req.reply.is_closed() {
                debug!("rpc writer: req={} abandoned before send", req.req_id);
                continue;
            }
            map.insert(req.req_id, req.reply);
        }
        if let Err(e) = writer.write_all(&req.frame).await {
            warn!("rpc writer: write error: {}", e);
            let mut map = pending.lock().await;
            if let Some(tx) = map.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow!("write error: {}", e)));
            }
            break;
        }
    }
    debug!("rpc writer: task exiting");
}

use serde::{Deserialize, Serialize};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  The remote checks this during the `Hello` handshake and
/// refuses to talk to an incompatible receiver.
pub const PROTOCOL_VERSION: u32 = 1;

/// Opaque session handle assigned by the client for each open connection.
pub type Handle = u32;

/// A NymphCast receiver or media server found on the network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteDescriptor {
    pub name: String,
    pub ipv4: String,
    pub port: u16,
}

impl RemoteDescriptor {
    pub fn address(&self) -> String {
        format!("{}:{}", self.ipv4, self.port)
    }

    /// Label used in remote lists, e.g. `192.168.1.20 (livingroom)`.
    pub fn label(&self) -> String {
        format!("{} ({})", self.ipv4, self.name)
    }
}

/// A playable file advertised by a media server share.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaFile {
    pub id: u32,
    pub name: String,
    /// Share section the file lives in (e.g. "audio", "video").
    #[serde(default)]
    pub section: String,
    /// Media server that owns this file.
    pub server: RemoteDescriptor,
}

/// Playback status pushed by a receiver whenever its player changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StatusUpdate {
    pub playing: bool,
    /// Seconds into the current track.
    pub position: f64,
    /// Track length in seconds; 0 when unknown.
    pub duration: f64,
    /// Receiver volume, 0..=128.
    pub volume: u8,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
}

impl StatusUpdate {
    /// Position as a 0..=100 percentage.  Unknown or zero duration yields 0.
    pub fn position_percent(&self) -> u8 {
        if self.duration.is_nan() || self.duration <= 0.0 || !self.position.is_finite() {
            return 0;
        }
        ((self.position / self.duration) * 100.0).clamp(0.0, 100.0) as u8
    }

    /// `hh:mm:ss / hh:mm:ss` label for position and duration.
    pub fn clock_label(&self) -> String {
        format!(
            "{} / {}",
            format_clock(self.position),
            format_clock(self.duration)
        )
    }
}

pub fn format_clock(secs: f64) -> String {
    let total = if secs.is_finite() && secs > 0.0 {
        secs as u64
    } else {
        0
    };
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total / 60) % 60,
        total % 60
    )
}

/// Requests sent from the remote to a receiver or media server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "call")]
pub enum Call {
    Hello {
        protocol_version: u32,
        client_name: String,
    },
    Disconnect,
    AddSlaves {
        remotes: Vec<RemoteDescriptor>,
    },
    /// Announces a file stream; followed by `SessionData` chunks.
    SessionStart {
        name: String,
        size: u64,
    },
    SessionData {
        data: Vec<u8>,
        done: bool,
    },
    CastUrl {
        url: String,
    },
    PlaybackStart,
    PlaybackStop,
    PlaybackPause,
    PlaybackForward,
    PlaybackRewind,
    PlaybackSeek {
        position: u8,
    },
    VolumeSet {
        volume: u8,
    },
    AppList,
    AppSend {
        app_id: String,
        message: String,
    },
    AppLoadResource {
        app_id: String,
        name: String,
    },
    GetShares,
    PlayShare {
        file_id: u32,
        receivers: Vec<RemoteDescriptor>,
    },
}

/// Replies to a `Call`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "reply")]
pub enum Reply {
    Ok,
    Hello { protocol_version: u32, name: String },
    Text { value: String },
    Bytes { data: Vec<u8> },
    Shares { files: Vec<MediaFile> },
    Error { message: String },
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Message {
    Request { id: u64, call: Call },
    Response { id: u64, reply: Reply },
    /// Unsolicited playback status from a receiver.
    Status { status: StatusUpdate },
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}

// ── discovery datagrams ───────────────────────────────────────────────────────

/// Which kind of service a discovery probe is looking for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Receiver,
    MediaServer,
}

/// Broadcast by the remote; answered by every matching service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryProbe {
    pub service: Service,
}

/// Answer to a probe.  The address is taken from the datagram source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryAnswer {
    pub service: Service,
    pub name: String,
    pub port: u16,
}

use std::path::PathBuf;

use nymph_proto::playlist::PlaylistError;
use thiserror::Error;

/// Broad class of a failure, used to choose how it is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing user input; nothing was sent to a remote.
    Validation,
    /// A remote call or connection failed.
    Transport,
    /// A scan completed without results.
    NothingFound,
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("no {0} selected")]
    NoSelection(&'static str),
    #[error("{what} {value} out of range {min}..={max}")]
    OutOfRange {
        what: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
    #[error("the selected file could not be opened: {}", .0.display())]
    InvalidFile(PathBuf),
    #[error("expected exactly one selected media file, got {0}")]
    AmbiguousSelection(usize),
    #[error("the selected server could not be connected to ({address}): {reason}")]
    ConnectFailed { address: String, reason: String },
    #[error("remote call failed: {0}")]
    Transport(String),
    #[error("the selected app could not be started: {0}")]
    AppStartFailed(String),
    #[error("no {0} found")]
    NothingFound(&'static str),
    #[error("playlist file: {0}")]
    Storage(String),
}

impl ControlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ControlError::NoSelection(_)
            | ControlError::OutOfRange { .. }
            | ControlError::InvalidFile(_)
            | ControlError::AmbiguousSelection(_) => ErrorKind::Validation,
            ControlError::ConnectFailed { .. }
            | ControlError::Transport(_)
            | ControlError::AppStartFailed(_)
            | ControlError::Storage(_) => ErrorKind::Transport,
            ControlError::NothingFound(_) => ErrorKind::NothingFound,
        }
    }

    pub fn transport(err: anyhow::Error) -> Self {
        ControlError::Transport(format!("{err:#}"))
    }
}

impl From<PlaylistError> for ControlError {
    fn from(err: PlaylistError) -> Self {
        match err {
            PlaylistError::InvalidFile(path) => ControlError::InvalidFile(path),
            PlaylistError::IndexOutOfRange { index, len } => ControlError::OutOfRange {
                what: "playlist index",
                value: index as i64,
                min: 0,
                max: len as i64 - 1,
            },
            PlaylistError::Io(e) => ControlError::Storage(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(
            ControlError::NoSelection("file").kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            ControlError::NothingFound("media servers").kind(),
            ErrorKind::NothingFound
        );
        assert_eq!(
            ControlError::transport(anyhow::anyhow!("reset")).kind(),
            ErrorKind::Transport
        );
    }

    #[test]
    fn test_playlist_errors_map_to_validation() {
        let err: ControlError = PlaylistError::IndexOutOfRange { index: 4, len: 2 }.into();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.to_string(), "playlist index 4 out of range 0..=1");
    }
}

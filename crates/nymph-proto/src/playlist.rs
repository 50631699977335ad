//! Local playlist persisted as a flat file of absolute paths, one per line.
//!
//! Adds append a single line; removals rewrite the whole file from the
//! in-memory order.  The file is read once at startup.  Paths are stored as
//! raw bytes, so non-UTF-8 names survive a reload; paths with embedded
//! newlines are rejected.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum PlaylistError {
    #[error("not a regular file: {}", .0.display())]
    InvalidFile(PathBuf),
    #[error("playlist index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("playlist file I/O: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub path: PathBuf,
    /// File name shown in lists.
    pub name: String,
}

impl PlaylistEntry {
    pub fn new(path: PathBuf) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { path, name }
    }
}

pub struct PlaylistStore {
    file: PathBuf,
    entries: Vec<PlaylistEntry>,
}

impl PlaylistStore {
    /// Read the persisted playlist.  A missing file is an empty playlist.
    pub fn load(file: PathBuf) -> Result<Self, PlaylistError> {
        let entries = match std::fs::read(&file) {
            Ok(content) => parse_playlist(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No playlist file at {}", file.display());
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };
        info!(
            "Loaded {} playlist entries from {}",
            entries.len(),
            file.display()
        );
        Ok(Self { file, entries })
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn entries(&self) -> &[PlaylistEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&PlaylistEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a regular file to the playlist and to the persisted file.
    /// Relative paths are made absolute first.
    pub fn add(&mut self, path: &Path) -> Result<&PlaylistEntry, PlaylistError> {
        if path_bytes(path).contains(&b'\n') || !path.is_file() {
            return Err(PlaylistError::InvalidFile(path.to_path_buf()));
        }
        let path = std::path::absolute(path)?;

        if let Some(parent) = self.file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file)?;
        let mut line = path_bytes(&path).into_owned();
        line.push(b'\n');
        out.write_all(&line)?;

        self.entries.push(PlaylistEntry::new(path));
        let idx = self.entries.len() - 1;
        Ok(&self.entries[idx])
    }

    /// Remove the entry at `index` and rewrite the persisted file.  The
    /// in-memory list is only touched once the file has been written.
    pub fn remove(&mut self, index: usize) -> Result<PlaylistEntry, PlaylistError> {
        if index >= self.entries.len() {
            return Err(PlaylistError::IndexOutOfRange {
                index,
                len: self.entries.len(),
            });
        }
        let remaining = self
            .entries
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, entry)| entry);
        std::fs::write(&self.file, render_playlist(remaining))?;
        Ok(self.entries.remove(index))
    }

    /// Index after `current`, wrapping to 0 past the end.  `None` when the
    /// playlist is empty.
    pub fn next_index(&self, current: Option<usize>) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        match current {
            Some(i) if i + 1 < self.entries.len() => Some(i + 1),
            _ => Some(0),
        }
    }

}

fn render_playlist<'a>(entries: impl Iterator<Item = &'a PlaylistEntry>) -> Vec<u8> {
    let mut content = Vec::new();
    for entry in entries {
        content.extend_from_slice(&path_bytes(&entry.path));
        content.push(b'\n');
    }
    content
}

pub fn parse_playlist(content: &[u8]) -> Vec<PlaylistEntry> {
    content
        .split(|b| *b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| !line.is_empty())
        .map(|line| PlaylistEntry::new(path_from_bytes(line)))
        .collect()
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;
    Cow::Borrowed(path.as_os_str().as_bytes())
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> Cow<'_, [u8]> {
    Cow::Owned(path.to_string_lossy().into_owned().into_bytes())
}

#[cfg(unix)]
fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(std::ffi::OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}

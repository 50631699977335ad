//! Shared-Media Browser index.
//!
//! Two levels, server then file.  The index is rebuilt wholesale from every
//! scan; servers that share nothing are left out, so server ordinals count
//! only the groups that are shown.

use nymph_proto::protocol::{MediaFile, RemoteDescriptor};
use nymph_proto::state::{ShareGroup, ShareItem};
use serde::{Deserialize, Serialize};

use crate::error::ControlError;

/// Position of one file in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareKey {
    pub server: usize,
    pub file: usize,
}

#[derive(Debug, Default)]
pub struct ShareBrowser {
    groups: Vec<ShareGroup>,
}

impl ShareBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }

    pub fn groups(&self) -> &[ShareGroup] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Replace the index with `listing`.  Returns the number of files indexed.
    pub fn rebuild(&mut self, listing: Vec<(RemoteDescriptor, Vec<MediaFile>)>) -> usize {
        self.groups.clear();
        let mut serial = 0u32;
        for (server, files) in listing {
            if files.is_empty() {
                continue;
            }
            let server_ordinal = self.groups.len();
            let files = files
                .into_iter()
                .enumerate()
                .map(|(file_ordinal, file)| {
                    serial += 1;
                    ShareItem {
                        server_ordinal,
                        file_ordinal,
                        serial,
                        file,
                    }
                })
                .collect();
            self.groups.push(ShareGroup { server, files });
        }
        serial as usize
    }

    /// The selection must name exactly one file that exists in the index.
    pub fn resolve(&self, selection: &[ShareKey]) -> Result<&MediaFile, ControlError> {
        let key = match selection {
            [] => return Err(ControlError::NoSelection("media file")),
            [key] => key,
            many => return Err(ControlError::AmbiguousSelection(many.len())),
        };
        let group = self.groups.get(key.server).ok_or(ControlError::OutOfRange {
            what: "server index",
            value: key.server as i64,
            min: 0,
            max: self.groups.len() as i64 - 1,
        })?;
        let item = group.files.get(key.file).ok_or(ControlError::OutOfRange {
            what: "file index",
            value: key.file as i64,
            min: 0,
            max: group.files.len() as i64 - 1,
        })?;
        Ok(&item.file)
    }
}

//! Remote Registry: the receivers found by the last discovery scan.
//!
//! Selection is positional.  Every scan replaces the whole list, so indices
//! from an earlier scan are checked against the current list and rejected
//! when they no longer fit.

use nymph_proto::protocol::RemoteDescriptor;

use crate::error::ControlError;

#[derive(Debug, Default)]
pub struct RemoteRegistry {
    remotes: Vec<RemoteDescriptor>,
}

impl RemoteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&mut self, remotes: Vec<RemoteDescriptor>) {
        self.remotes = remotes;
    }

    pub fn remotes(&self) -> &[RemoteDescriptor] {
        &self.remotes
    }

    /// Resolve a positional selection, preserving its order.  The first
    /// resolved remote is the master.
    pub fn resolve(&self, indices: &[usize]) -> Result<Vec<RemoteDescriptor>, ControlError> {
        if indices.is_empty() {
            return Err(ControlError::NoSelection("remote"));
        }
        indices
            .iter()
            .map(|&i| {
                self.remotes.get(i).cloned().ok_or(ControlError::OutOfRange {
                    what: "remote index",
                    value: i as i64,
                    min: 0,
                    max: self.remotes.len() as i64 - 1,
                })
            })
            .collect()
    }
}

use std::collections::HashSet;

use crate::error::{Result, RouterError};

/// Partition of the channel space into concurrency groups.
///
/// Each group gets its own bounded queue and worker thread, so traffic in one
/// group cannot stall another. Channels within a group are processed strictly
/// in arrival order. An empty configuration puts all 256 channels in a single
/// group.
#[derive(Debug, Clone, Default)]
pub struct ChannelGroups {
    groups: Vec<Vec<u8>>,
}

impl ChannelGroups {
    /// All channels in one group: strict global ordering, no concurrency
    /// between channels.
    pub fn single() -> Self {
        Self::default()
    }

    /// Add a group containing the given channels.
    pub fn with_group(mut self, channels: impl IntoIterator<Item = u8>) -> Self {
        self.groups.push(channels.into_iter().collect());
        self
    }

    /// Validate the partition and expand the implicit all-in-one default.
    pub(crate) fn resolve(&self) -> Result<Vec<Vec<u8>>> {
        if self.groups.is_empty() {
            return Ok(vec![(0..=u8::MAX).collect()]);
        }
        let mut seen = HashSet::new();
        for group in &self.groups {
            for &channel in group {
                if !seen.insert(channel) {
                    return Err(RouterError::DuplicateChannel { channel });
                }
            }
        }
        Ok(self.groups.clone())
    }
}

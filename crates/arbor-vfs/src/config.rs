use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning and identity settings for a [`Vfs`](crate::Vfs).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VfsConfig {
    /// How long a batch stays open for more writes, in milliseconds.
    /// Zero closes the batch at the end of the current scheduler turn.
    pub batch_window_ms: u64,
    /// Maximum number of decoded trees and commits kept in memory.
    pub cache_capacity: usize,
    /// Author name stamped on automatic commits.
    pub author_name: String,
    /// Author email stamped on automatic commits.
    pub author_email: String,
    /// Message of automatic commits.
    pub auto_commit_message: String,
    /// Branch ref moved by `write_commit`; backends may keep one per
    /// repository.
    pub branch_ref: String,
    /// Capacity of each change subscription channel.
    pub channel_capacity: usize,
}

impl VfsConfig {
    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            batch_window_ms: 0,
            cache_capacity: 4096,
            author_name: "AutoCommit".into(),
            author_email: "autocommit@arbor.local".into(),
            auto_commit_message: "Uncommitted changes".into(),
            branch_ref: "refs/heads/master".into(),
            channel_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_close_batch_on_turn() {
        let config = VfsConfig::default();
        assert_eq!(config.batch_window(), Duration::ZERO);
        assert_eq!(config.branch_ref, "refs/heads/master");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: VfsConfig = toml::from_str("batch_window_ms = 25\nauthor_name = \"Ada\"").unwrap();
        assert_eq!(config.batch_window(), Duration::from_millis(25));
        assert_eq!(config.author_name, "Ada");
        assert_eq!(config.cache_capacity, VfsConfig::default().cache_capacity);
    }
}

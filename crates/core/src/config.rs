//! Runtime configuration
//!
//! Loaded from the `[runtime]` table of a panel manifest, or built in code:
//!
//! ```rust,ignore
//! use panel_core::{RuntimeConfig, QueueConfig, WaitPolicy};
//!
//! let config = RuntimeConfig::new()
//!     .with_queue(QueueConfig::new(16).with_wait(WaitPolicy::Immediate))
//!     .with_max_sequence_depth(8);
//! ```

use serde::Deserialize;

/// When the command queue hands entries to the transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitPolicy {
    /// Batch entries until a flush is required
    #[default]
    Deferred,
    /// Flush after every push
    Immediate,
}

/// Command queue sizing and flush policy
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of entries (addressing entries included)
    pub capacity: usize,
    /// Maximum cumulative payload bytes per flush
    pub max_payload: usize,
    pub wait: WaitPolicy,
    /// Never use table writes, even when the transport supports them
    pub separate_tx: bool,
    /// When sending entries one by one, block on every entry
    pub block_each: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            capacity: 32,
            max_payload: 4096,
            wait: WaitPolicy::Deferred,
            separate_tx: false,
            block_each: false,
        }
    }
}

impl QueueConfig {
    pub fn new(capacity: usize) -> Self {
        QueueConfig {
            capacity,
            ..QueueConfig::default()
        }
    }

    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    pub fn with_wait(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_separate_tx(mut self, separate_tx: bool) -> Self {
        self.separate_tx = separate_tx;
        self
    }

    pub fn with_block_each(mut self, block_each: bool) -> Self {
        self.block_each = block_each;
        self
    }
}

/// Per-device interpreter configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub queue: QueueConfig,
    /// Deepest allowed chain of nested sequences
    pub max_sequence_depth: usize,
    /// Refresh rate (Hz) assumed when the refresh properties are unset
    pub default_refresh_rate: u32,
    /// Per-pulse timeout for vsync waits
    pub vsync_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            queue: QueueConfig::default(),
            max_sequence_depth: 16,
            default_refresh_rate: 60,
            vsync_timeout_ms: 100,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        RuntimeConfig::default()
    }

    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_max_sequence_depth(mut self, depth: usize) -> Self {
        self.max_sequence_depth = depth;
        self
    }

    pub fn with_default_refresh_rate(mut self, hz: u32) -> Self {
        self.default_refresh_rate = hz;
        self
    }

    pub fn with_vsync_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.vsync_timeout_ms = timeout_ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::new();
        assert_eq!(config.queue.capacity, 32);
        assert_eq!(config.queue.wait, WaitPolicy::Deferred);
        assert_eq!(config.max_sequence_depth, 16);
        assert_eq!(config.default_refresh_rate, 60);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: RuntimeConfig = toml::from_str(
            r#"
            max_sequence_depth = 4

            [queue]
            capacity = 8
            wait = "immediate"
            "#,
        )
        .unwrap();
        assert_eq!(config.max_sequence_depth, 4);
        assert_eq!(config.queue.capacity, 8);
        assert_eq!(config.queue.wait, WaitPolicy::Immediate);
        assert_eq!(config.queue.max_payload, 4096);
        assert_eq!(config.vsync_timeout_ms, 100);
    }

    #[test]
    fn test_builder() {
        let config = RuntimeConfig::new()
            .with_queue(QueueConfig::new(4).with_separate_tx(true))
            .with_default_refresh_rate(120);
        assert_eq!(config.queue.capacity, 4);
        assert!(config.queue.separate_tx);
        assert_eq!(config.default_refresh_rate, 120);
    }
}

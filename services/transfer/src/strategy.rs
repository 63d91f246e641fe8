//! Size-based transfer strategy selection.

use serde::Serialize;
use std::fmt;

/// Default threshold above which uploads are streamed (5MB)
pub const DEFAULT_STREAMED_THRESHOLD: u64 = 5 * 1024 * 1024;

/// How a payload is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStrategy {
    /// One opaque request body, no progress
    Direct,
    /// Chunked body with progress events
    Streamed,
}

impl TransferStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStrategy::Direct => "direct",
            TransferStrategy::Streamed => "streamed",
        }
    }
}

impl fmt::Display for TransferStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chooses [`TransferStrategy::Direct`] for payloads up to and including the
/// threshold, [`TransferStrategy::Streamed`] above it.
#[derive(Debug, Clone, Copy)]
pub struct StrategySelector {
    threshold_bytes: u64,
}

impl StrategySelector {
    pub fn new(threshold_bytes: u64) -> Self {
        Self { threshold_bytes }
    }

    pub fn select(&self, payload_size_bytes: u64) -> TransferStrategy {
        if payload_size_bytes <= self.threshold_bytes {
            TransferStrategy::Direct
        } else {
            TransferStrategy::Streamed
        }
    }
}

impl Default for StrategySelector {
    fn default() -> Self {
        Self::new(DEFAULT_STREAMED_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_payload_is_direct() {
        let selector = StrategySelector::default();
        assert_eq!(selector.select(0), TransferStrategy::Direct);
        assert_eq!(selector.select(1024), TransferStrategy::Direct);
    }

    #[test]
    fn test_threshold_is_direct() {
        let selector = StrategySelector::default();
        assert_eq!(selector.select(5 * 1024 * 1024), TransferStrategy::Direct);
        assert_eq!(selector.select(5 * 1024 * 1024 + 1), TransferStrategy::Streamed);
    }

    #[test]
    fn test_large_payload_is_streamed() {
        let selector = StrategySelector::new(1000);
        assert_eq!(selector.select(250 * 1024 * 1024), TransferStrategy::Streamed);
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!(TransferStrategy::Direct.to_string(), "direct");
        assert_eq!(TransferStrategy::Streamed.as_str(), "streamed");
    }
}

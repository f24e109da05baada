//! Engine configuration
//!
//! Policy knobs for the AVRCP session engine: response deadline, channel
//! MTUs and the behaviors the AVRCP specification leaves to the
//! implementation (what to do when transaction labels run out, and how to
//! treat oversize attribute text).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default response deadline, within AVRCP's TMTP guidance (100 ms - 10 s)
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Default MTU for the AVCTP control channel
pub const DEFAULT_CONTROL_MTU: usize = 512;

/// Minimum browsing-channel MTU AVRCP guarantees after L2CAP negotiation
pub const DEFAULT_BROWSE_MTU: usize = 335;

/// Maximum attribute text length accepted before the oversize policy applies
pub const DEFAULT_MAX_ATTRIBUTE_TEXT_LEN: usize = 255;

/// What to do when all 16 transaction labels are outstanding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExhaustedPolicy {
    /// Fail the send with `LabelsExhausted`; the caller retries with backoff
    DropCommand,
    /// Park the encoded command until a label frees up
    QueueCommand,
}

/// What to do with attribute text exceeding the configured maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OversizeTextPolicy {
    /// Truncate at a character boundary
    Truncate,
    /// Reject the frame with a decode error
    Reject,
}

/// AVRCP engine configuration
///
/// All fields have sensible defaults; use the builder methods to override.
///
/// # Examples
///
/// ```
/// use avrcp_session_core::config::{EngineConfig, ExhaustedPolicy};
/// use std::time::Duration;
///
/// let config = EngineConfig::new()
///     .with_response_timeout(Duration::from_secs(5))
///     .with_exhausted_policy(ExhaustedPolicy::QueueCommand);
/// assert_eq!(config.response_timeout, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long to wait for a response before resolving `TimedOut`
    pub response_timeout: Duration,

    /// Negotiated MTU for the control channel; payloads beyond it fragment
    pub control_mtu: usize,

    /// Negotiated MTU for the browsing channel; payloads beyond it fail to encode
    pub browse_mtu: usize,

    /// Behavior when no transaction label is free
    pub exhausted_policy: ExhaustedPolicy,

    /// Behavior for attribute text exceeding `max_attribute_text_len`
    pub oversize_text_policy: OversizeTextPolicy,

    /// Maximum accepted attribute text length in bytes
    pub max_attribute_text_len: usize,
}

impl EngineConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            control_mtu: DEFAULT_CONTROL_MTU,
            browse_mtu: DEFAULT_BROWSE_MTU,
            exhausted_policy: ExhaustedPolicy::DropCommand,
            oversize_text_policy: OversizeTextPolicy::Truncate,
            max_attribute_text_len: DEFAULT_MAX_ATTRIBUTE_TEXT_LEN,
        }
    }

    /// Builder: Set the response timeout
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Builder: Set the control-channel MTU
    pub fn with_control_mtu(mut self, mtu: usize) -> Self {
        self.control_mtu = mtu;
        self
    }

    /// Builder: Set the browsing-channel MTU
    pub fn with_browse_mtu(mut self, mtu: usize) -> Self {
        self.browse_mtu = mtu;
        self
    }

    /// Builder: Set the exhausted-label policy
    pub fn with_exhausted_policy(mut self, policy: ExhaustedPolicy) -> Self {
        self.exhausted_policy = policy;
        self
    }

    /// Builder: Set the oversize-text policy
    pub fn with_oversize_text_policy(mut self, policy: OversizeTextPolicy) -> Self {
        self.oversize_text_policy = policy;
        self
    }

    /// Builder: Set the maximum attribute text length
    pub fn with_max_attribute_text_len(mut self, len: usize) -> Self {
        self.max_attribute_text_len = len;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

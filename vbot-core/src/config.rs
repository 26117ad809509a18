//! Client-side tuning knobs.
//!
//! Everything negotiated with the server (channel count, heartbeat) lives in
//! [`SessionConfig`](crate::state::SessionConfig) instead.

use serde::{Deserialize, Serialize};

use crate::network::AdapterOptions;

/// Local client options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Period of the timeout / delivery / heartbeat timer.
    pub tick_ms: u64,
    /// How often the adapter checks its link.
    pub reconnect_poll_ms: u64,
    /// Minimum gap between two dial attempts.
    pub reconnect_cooldown_ms: u64,
    /// Record the call site of every request and attach it to its errors.
    pub debug: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            reconnect_poll_ms: 300,
            reconnect_cooldown_ms: 3000,
            debug: false,
        }
    }
}

impl ClientOptions {
    pub(crate) fn adapter(&self) -> AdapterOptions {
        AdapterOptions {
            poll_ms: self.reconnect_poll_ms,
            cooldown_ms: self.reconnect_cooldown_ms,
        }
    }
}

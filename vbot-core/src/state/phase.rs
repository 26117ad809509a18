//! Per-connection phase of the client.

use std::fmt;
use std::sync::Arc;

use crate::error::{self, RpcError};
use crate::network::StreamConn;

/// Where the client stands with its current link.
///
/// ```text
///  Disconnected ──► AwaitingConnect ──► Ready
///       ▲                  │              │
///       └──────────────────┴──────────────┘
/// ```
#[derive(Clone, Default)]
pub enum ClientPhase {
    /// No link. Requests queue up.
    #[default]
    Disconnected,

    /// Link open, `ConnectRequest` sent, waiting for the session.
    AwaitingConnect { conn: Arc<dyn StreamConn> },

    /// Session negotiated; the channel pool is live.
    Ready { conn: Arc<dyn StreamConn> },
}

impl fmt::Debug for ClientPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::AwaitingConnect { conn } => write!(f, "AwaitingConnect(conn {})", conn.id()),
            Self::Ready { conn } => write!(f, "Ready(conn {})", conn.id()),
        }
    }
}

impl fmt::Display for ClientPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::AwaitingConnect { .. } => write!(f, "AwaitingConnect"),
            Self::Ready { .. } => write!(f, "Ready"),
        }
    }
}

impl ClientPhase {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// The current link, in any phase but `Disconnected`.
    pub fn conn(&self) -> Option<&Arc<dyn StreamConn>> {
        match self {
            Self::Disconnected => None,
            Self::AwaitingConnect { conn } | Self::Ready { conn } => Some(conn),
        }
    }

    /// Whether `conn` is the current link.
    pub fn owns(&self, conn: &dyn StreamConn) -> bool {
        self.conn().is_some_and(|c| c.id() == conn.id())
    }

    // ── Transitions ──────────────────────────────────────────────

    /// A new link opened. Replaces whatever link was current.
    pub fn begin_connect(&mut self, conn: Arc<dyn StreamConn>) {
        *self = Self::AwaitingConnect { conn };
    }

    /// The session was negotiated.
    ///
    /// Valid from: `AwaitingConnect`.
    pub fn complete_connect(&mut self) -> Result<(), RpcError> {
        match self {
            Self::AwaitingConnect { conn } => {
                *self = Self::Ready { conn: conn.clone() };
                Ok(())
            }
            _ => Err(error::stream().add_debug(format!("unexpected connect response while {self}"))),
        }
    }

    /// `conn` went away. Ignored unless it is the current link.
    pub fn disconnect(&mut self, conn: &dyn StreamConn) -> bool {
        if self.owns(conn) {
            *self = Self::Disconnected;
            true
        } else {
            false
        }
    }
}

//! Connection adapter: keeps one live link to the server.
//!
//! The adapter dials through a [`Dialer`], redials when the link drops, and
//! reports everything that happens on the link to a [`StreamReceiver`].

mod adapter;
mod connection;
mod dialer;

pub use adapter::{AdapterOptions, ClientAdapter};
pub use connection::{ConnStatus, Connection};
pub use dialer::{Dialer, FramePair, FrameSink, FrameStream, NetDialer, protocol_of};

use std::sync::Arc;

use crate::error::RpcError;
use crate::stream::Stream;

/// A link streams can be written to.
pub trait StreamConn: Send + Sync {
    /// Unique within one adapter.
    fn id(&self) -> u64;

    /// Stamp the checksum and queue the stream for sending.
    ///
    /// Never calls back into the receiver.
    fn write_stream(&self, stream: &mut Stream) -> Result<(), RpcError>;

    /// Start closing. `true` only if the link was opening or open.
    fn close(&self) -> bool;

    fn is_closed(&self) -> bool;

    /// Whether anything arrived within the last `timeout_ms`.
    fn is_active(&self, now_ms: u64, timeout_ms: u64) -> bool;
}

/// Link events, delivered from the connection task.
pub trait StreamReceiver: Send + Sync {
    fn on_conn_open(&self, conn: Arc<dyn StreamConn>);
    fn on_conn_close(&self, conn: Arc<dyn StreamConn>);
    fn on_conn_read_stream(&self, conn: Arc<dyn StreamConn>, stream: Stream);
    /// `conn` is `None` when a dial failed.
    fn on_conn_error(&self, conn: Option<Arc<dyn StreamConn>>, err: RpcError);
}

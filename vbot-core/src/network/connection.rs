//! One live transport link and the task that drives it.
//!
//! A [`Connection`] is the shared handle; the I/O lives in a spawned task
//! fed through an unbounded channel, so writing never blocks and never
//! calls back into the receiver.

use std::fmt;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::dialer::FramePair;
use super::{StreamConn, StreamReceiver};
use crate::clock::Clock;
use crate::error::{self, RpcError};
use crate::stream::Stream;

/// Lifecycle of a [`Connection`].
///
/// ```text
///  Opening ──► Opened ──► Closing ──► Closed
///     │                      ▲
///     └──────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnStatus {
    Opening = 0,
    Opened = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Opening,
            1 => Self::Opened,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for ConnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug)]
pub(crate) enum Outbound {
    Frame(Vec<u8>),
    Close,
}

/// Shared handle to a transport link.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    status: AtomicU8,
    last_active_ms: AtomicU64,
    clock: Clock,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Connection {
    pub(crate) fn new(
        id: u64,
        clock: Clock,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Self {
            id,
            status: AtomicU8::new(ConnStatus::Opening as u8),
            last_active_ms: AtomicU64::new(clock.now_ms()),
            clock,
            outbound: tx,
        });
        (conn, rx)
    }

    pub fn status(&self) -> ConnStatus {
        ConnStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn transition(&self, from: ConnStatus, to: ConnStatus) -> bool {
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn mark_closed(&self) {
        self.status.store(ConnStatus::Closed as u8, Ordering::Release);
    }

    fn touch(&self) {
        self.last_active_ms
            .store(self.clock.now_ms(), Ordering::Release);
    }

    /// Drive the link until it fails, is closed, or `token` fires.
    ///
    /// Reports open, every received stream, errors and the final close to
    /// `receiver` while it is still alive.
    pub(crate) async fn run(
        self: Arc<Self>,
        pair: FramePair,
        mut outbound: mpsc::UnboundedReceiver<Outbound>,
        receiver: Weak<dyn StreamReceiver>,
        token: CancellationToken,
    ) {
        let FramePair {
            mut sink,
            mut stream,
        } = pair;

        // closed while the dial was in flight
        if !self.transition(ConnStatus::Opening, ConnStatus::Opened) {
            let _ = sink.close().await;
            self.mark_closed();
            return;
        }
        self.touch();
        debug!(conn = self.id, "connection opened");

        let conn: Arc<dyn StreamConn> = self.clone();
        match receiver.upgrade() {
            Some(r) => r.on_conn_open(conn.clone()),
            None => {
                let _ = sink.close().await;
                self.mark_closed();
                return;
            }
        }

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                out = outbound.recv() => match out {
                    Some(Outbound::Frame(bytes)) => {
                        if let Err(e) = sink.send(bytes).await {
                            if let Some(r) = receiver.upgrade() {
                                r.on_conn_error(Some(conn.clone()), e);
                            }
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => break,
                },
                frame = stream.next() => {
                    let Some(r) = receiver.upgrade() else { break };
                    match frame {
                        Some(Ok(bytes)) => {
                            self.touch();
                            match Stream::from_bytes(bytes) {
                                Ok(s) if s.check() => r.on_conn_read_stream(conn.clone(), s),
                                Ok(_) => r.on_conn_error(
                                    Some(conn.clone()),
                                    error::stream().add_debug("stream check failed"),
                                ),
                                Err(e) => r.on_conn_error(Some(conn.clone()), e.into()),
                            }
                        }
                        Some(Err(e)) => {
                            r.on_conn_error(Some(conn.clone()), e);
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        self.status
            .store(ConnStatus::Closing as u8, Ordering::Release);
        let _ = sink.close().await;
        self.mark_closed();
        debug!(conn = self.id, "connection closed");
        if let Some(r) = receiver.upgrade() {
            r.on_conn_close(conn);
        }
    }
}

impl StreamConn for Connection {
    fn id(&self) -> u64 {
        self.id
    }

    fn write_stream(&self, stream: &mut Stream) -> Result<(), RpcError> {
        let status = self.status();
        if status != ConnStatus::Opened {
            return Err(error::write_stream().add_debug(format!("connection is {status}")));
        }
        stream.build_check();
        trace!(conn = self.id, len = stream.write_pos(), "write stream");
        self.outbound
            .send(Outbound::Frame(stream.buffer().to_vec()))
            .map_err(|_| error::write_stream().add_debug("connection task has stopped"))
    }

    fn close(&self) -> bool {
        let closing = self.transition(ConnStatus::Opening, ConnStatus::Closing)
            || self.transition(ConnStatus::Opened, ConnStatus::Closing);
        if closing {
            let _ = self.outbound.send(Outbound::Close);
        }
        closing
    }

    fn is_closed(&self) -> bool {
        self.status() == ConnStatus::Closed
    }

    fn is_active(&self, now_ms: u64, timeout_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_active_ms.load(Ordering::Acquire)) < timeout_ms
    }
}

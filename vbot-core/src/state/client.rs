//! The client protocol state machine.
//!
//! Pure bookkeeping: every method takes the current time and never blocks.
//! Work that must happen outside the state lock (error reports, broadcast
//! handlers) is queued as [`Notice`]s and drained by the owner.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::channel::{Channel, SendItem};
use super::phase::ClientPhase;
use super::session::{ConnectResponse, SessionConfig, connect_request};
use crate::error::{self, RpcError};
use crate::hub::{error_response_stream, parse_response_stream, system_error_stream};
use crate::message::StreamKind;
use crate::network::StreamConn;
use crate::stream::Stream;
use crate::value::Value;

/// Callback run for every broadcast on a subscribed topic.
pub type BroadcastHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Side effects to run once the state lock is released.
pub enum Notice {
    /// Hand to the error hub.
    Report(Stream),
    /// Run every handler with the value.
    Broadcast {
        value: Value,
        handlers: Vec<BroadcastHandler>,
    },
}

struct Subscriber {
    id: u64,
    handler: BroadcastHandler,
}

/// Topic key of `event` on `target`.
pub fn topic_key(target: &str, event: &str) -> String {
    format!("{target}%{event}")
}

/// Session, channel pool, pre-send queue and subscriptions of one client.
#[derive(Default)]
pub struct ClientState {
    phase: ClientPhase,
    session: String,
    config: Option<SessionConfig>,
    channels: Vec<Channel>,
    pre_send: VecDeque<SendItem>,
    last_ping_ms: u64,
    subscriptions: HashMap<String, Vec<Subscriber>>,
    seed: u64,
    notices: Vec<Notice>,
}

impl ClientState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> &ClientPhase {
        &self.phase
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Requests waiting for a channel, in submission order.
    pub fn pre_send(&self) -> impl Iterator<Item = &SendItem> {
        self.pre_send.iter()
    }

    pub fn queued(&self) -> usize {
        self.pre_send.len()
    }

    pub fn in_flight(&self) -> usize {
        self.channels.iter().filter(|c| !c.is_free()).count()
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    // ── Requests ─────────────────────────────────────────────────

    /// Queue a request and try to dispatch right away.
    pub fn enqueue(&mut self, item: SendItem, now_ms: u64) {
        trace!(target_name = item.target(), "request queued");
        self.pre_send.push_back(item);
        self.deliver(now_ms);
    }

    /// Move queued requests onto free channels, oldest first.
    ///
    /// Does nothing unless the session is ready.
    pub fn deliver(&mut self, now_ms: u64) {
        let (ClientPhase::Ready { conn, .. }, Some(config)) = (&self.phase, self.config) else {
            return;
        };
        let conn = conn.clone();
        let count = self.channels.len() as u64;
        let mut failed = None;
        let mut free = 0;
        while free < self.channels.len() && !self.pre_send.is_empty() {
            if !self.channels[free].is_free() {
                free += 1;
                continue;
            }
            let Some(item) = self.pre_send.pop_front() else {
                break;
            };
            let size = item.stream().write_pos() as u64;
            if size > config.trans_limit {
                let err = error::write_stream().add_debug(format!(
                    "{} request of {size} bytes exceeds the transfer limit {}",
                    item.target(),
                    config.trans_limit
                ));
                let err = item.annotate(err);
                item.reject(err);
                continue;
            }
            match self.channels[free].bind(item, count, now_ms) {
                Ok(bound) => {
                    if let Err(err) = conn.write_stream(bound.stream_mut()) {
                        warn!(callback_id = bound.callback_id(), error = %err, "request not written");
                        failed = Some(err);
                        break;
                    }
                }
                Err(item) => {
                    self.pre_send.push_front(item);
                    break;
                }
            }
        }
        // bound items stay on their channels for resend or timeout
        if let Some(err) = failed {
            self.on_conn_error(Some(&conn), err);
        }
    }

    /// Reject every request whose time ran out, then close the link if it
    /// has been silent for longer than the heartbeat timeout.
    ///
    /// Queued requests count from creation, bound requests from sending.
    pub fn sweep(&mut self, now_ms: u64) {
        let mut expired = Vec::new();
        let mut kept = VecDeque::with_capacity(self.pre_send.len());
        for item in self.pre_send.drain(..) {
            if item.queue_expired(now_ms) {
                expired.push(item);
            } else {
                kept.push_back(item);
            }
        }
        self.pre_send = kept;

        for channel in &mut self.channels {
            if let Some(item) = channel.take_expired(now_ms) {
                expired.push(item);
            }
        }

        for item in expired {
            let err = error::client_timeout().add_debug(format!("{} timeout", item.target()));
            let err = item.annotate(err);
            self.notices
                .push(Notice::Report(error_response_stream(&err, item.callback_id())));
            item.reject(err);
        }

        if let (Some(conn), Some(config)) = (self.phase.conn(), self.config)
            && !conn.is_active(now_ms, config.heartbeat_timeout_ms)
            && conn.close()
        {
            debug!(conn = conn.id(), "link silent past heartbeat timeout, closing");
        }
    }

    /// Send a ping if the heartbeat interval has passed since the last one.
    pub fn try_send_ping(&mut self, now_ms: u64) -> bool {
        let (ClientPhase::Ready { conn, .. }, Some(config)) = (&self.phase, self.config) else {
            return false;
        };
        if now_ms.saturating_sub(self.last_ping_ms) < config.heartbeat_ms {
            return false;
        }
        let conn = conn.clone();
        self.last_ping_ms = now_ms;
        let mut ping = Stream::with_kind(StreamKind::Ping);
        ping.set_callback_id(0);
        match conn.write_stream(&mut ping) {
            Ok(()) => true,
            Err(err) => {
                self.on_conn_error(Some(&conn), err);
                false
            }
        }
    }

    /// One timer period: timeouts, dispatch, heartbeat.
    pub fn tick(&mut self, now_ms: u64) {
        self.sweep(now_ms);
        self.deliver(now_ms);
        self.try_send_ping(now_ms);
    }

    // ── Subscriptions ────────────────────────────────────────────

    /// Register `handler` for `event` on `target`. Ids start at 1.
    pub fn subscribe(&mut self, target: &str, event: &str, handler: BroadcastHandler) -> u64 {
        self.seed += 1;
        let id = self.seed;
        self.subscriptions
            .entry(topic_key(target, event))
            .or_default()
            .push(Subscriber { id, handler });
        id
    }

    /// Remove subscription `id`. Returns `false` if it was not registered.
    pub fn unsubscribe(&mut self, id: u64) -> bool {
        let mut found = false;
        self.subscriptions.retain(|_, list| {
            let before = list.len();
            list.retain(|s| s.id != id);
            found |= list.len() != before;
            !list.is_empty()
        });
        found
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.values().map(Vec::len).sum()
    }

    // ── Link events ──────────────────────────────────────────────

    /// A new link opened: ask for the held session.
    pub fn on_conn_open(&mut self, conn: Arc<dyn StreamConn>) {
        debug!(conn = conn.id(), session = %self.session, "link open, requesting session");
        self.phase.begin_connect(conn.clone());
        let sent = connect_request(&self.session).and_then(|mut s| conn.write_stream(&mut s));
        if let Err(err) = sent {
            self.on_conn_error(Some(&conn), err);
        }
    }

    pub fn on_conn_close(&mut self, conn: &dyn StreamConn) {
        if self.phase.disconnect(conn) {
            debug!(conn = conn.id(), "link closed");
        }
    }

    /// Report `err` and drop the link it happened on.
    pub fn on_conn_error(&mut self, conn: Option<&Arc<dyn StreamConn>>, err: RpcError) {
        warn!(conn = ?conn.map(|c| c.id()), error = %err, "link error");
        self.notices.push(Notice::Report(system_error_stream(&err)));
        if let Some(conn) = conn {
            conn.close();
        }
    }

    pub fn on_conn_read_stream(&mut self, conn: Arc<dyn StreamConn>, stream: Stream, now_ms: u64) {
        if !self.phase.owns(conn.as_ref()) {
            trace!(conn = conn.id(), "stream from a stale link dropped");
            return;
        }
        if self.phase.is_ready() {
            self.on_session_stream(conn, stream, now_ms);
        } else {
            self.on_connect_response(conn, stream, now_ms);
        }
    }

    fn on_connect_response(&mut self, conn: Arc<dyn StreamConn>, mut stream: Stream, now_ms: u64) {
        let ConnectResponse { session, config } = match ConnectResponse::parse(&mut stream) {
            Ok(resp) => resp,
            Err(err) => {
                self.on_conn_error(Some(&conn), err);
                return;
            }
        };

        if self.channels.is_empty() || session != self.session {
            for channel in &mut self.channels {
                if let Some(item) = channel.take() {
                    let err = error::session_reset()
                        .add_debug(format!("{} was in flight", item.target()));
                    let err = item.annotate(err);
                    item.reject(err);
                }
            }
            debug!(conn = conn.id(), %session, channels = config.channels, "new session");
            self.session = session;
            self.config = Some(config);
            self.channels = (0..config.channels as u64).map(Channel::new).collect();
        } else {
            debug!(conn = conn.id(), %session, in_flight = self.in_flight(), "session resumed");
            let mut failed = None;
            for channel in &mut self.channels {
                if let Some(item) = channel.item_mut()
                    && let Err(err) = conn.write_stream(item.stream_mut())
                {
                    warn!(callback_id = item.callback_id(), error = %err, "request not resent");
                    failed = Some(err);
                    break;
                }
            }
            if let Some(err) = failed {
                self.on_conn_error(Some(&conn), err);
                return;
            }
        }

        self.last_ping_ms = now_ms;
        if let Err(err) = self.phase.complete_connect() {
            self.on_conn_error(Some(&conn), err);
            return;
        }
        self.deliver(now_ms);
    }

    fn on_session_stream(&mut self, conn: Arc<dyn StreamConn>, mut stream: Stream, now_ms: u64) {
        match stream.kind() {
            Ok(StreamKind::RpcResponseOk) => self.on_response(stream, false, now_ms),
            Ok(StreamKind::RpcResponseError) => self.on_response(stream, true, now_ms),
            Ok(StreamKind::RpcBoardCast) => {
                let topic = stream.read_string();
                let value = stream.read();
                match (topic, value) {
                    (Ok(topic), Ok(value)) if stream.is_read_finish() => {
                        match self.subscriptions.get(&topic) {
                            Some(list) => {
                                let handlers = list.iter().map(|s| s.handler.clone()).collect();
                                self.notices.push(Notice::Broadcast { value, handlers });
                            }
                            None => trace!(%topic, "broadcast without subscribers"),
                        }
                    }
                    _ => self.on_conn_error(
                        Some(&conn),
                        error::stream().add_debug("malformed broadcast"),
                    ),
                }
            }
            Ok(StreamKind::Pong) => {
                if !stream.is_read_finish() {
                    self.on_conn_error(Some(&conn), error::stream().add_debug("pong with a body"));
                }
            }
            _ => {
                let kind = stream.raw_kind();
                self.on_conn_error(
                    Some(&conn),
                    error::stream().add_debug(format!("unexpected stream kind {kind}")),
                );
            }
        }
    }

    /// Route a response to the channel that issued `callback_id`.
    fn on_response(&mut self, mut stream: Stream, is_error: bool, now_ms: u64) {
        let count = self.channels.len() as u64;
        if count == 0 {
            return;
        }
        let callback_id = stream.callback_id();
        let channel = &mut self.channels[(callback_id % count) as usize];
        if !channel.matches(callback_id) {
            trace!(callback_id, "response for no pending request dropped");
            return;
        }
        let Some(item) = channel.take() else {
            return;
        };
        if is_error && let Err(err) = parse_response_stream(&mut stream) {
            let err = item.annotate(err);
            self.notices
                .push(Notice::Report(error_response_stream(&err, callback_id)));
        }
        item.back(&mut stream);
        self.deliver(now_ms);
    }
}

//! Requests and the channel slots they run in.

use crate::deferred::{Deferred, Response};
use crate::error::RpcError;
use crate::hub::parse_response_stream;
use crate::message::StreamKind;
use crate::stream::Stream;

// ── SendItem ─────────────────────────────────────────────────────

/// One request, queued or in flight.
#[derive(Debug)]
pub struct SendItem {
    deferred: Deferred,
    stream: Stream,
    target: String,
    start_ms: u64,
    /// Zero until bound to a channel.
    send_ms: u64,
    timeout_ms: u64,
    /// Call site, recorded in debug mode.
    caller: Option<String>,
}

impl SendItem {
    /// A request for `target` with the target and source tag already
    /// written. Arguments go into [`SendItem::stream_mut`].
    pub fn new(target: &str, timeout_ms: u64, now_ms: u64) -> Result<(Self, Response), RpcError> {
        let mut stream = Stream::with_kind(StreamKind::RpcRequest);
        stream.write_string(target)?;
        stream.write_string("@")?;
        let (deferred, response) = Deferred::new();
        Ok((
            Self {
                deferred,
                stream,
                target: target.to_string(),
                start_ms: now_ms,
                send_ms: 0,
                timeout_ms,
                caller: None,
            },
            response,
        ))
    }

    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut Stream {
        &mut self.stream
    }

    pub fn callback_id(&self) -> u64 {
        self.stream.callback_id()
    }

    pub fn send_ms(&self) -> u64 {
        self.send_ms
    }

    /// Waited in the queue for longer than its timeout.
    pub fn queue_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.start_ms) > self.timeout_ms
    }

    /// In flight for longer than its timeout.
    pub fn flight_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.send_ms) > self.timeout_ms
    }

    /// Attach the call site, if recorded, as debug text.
    pub fn annotate(&self, err: RpcError) -> RpcError {
        match &self.caller {
            Some(caller) => err.add_debug(caller),
            None => err,
        }
    }

    /// Settle with the outcome carried by a response stream.
    pub fn back(mut self, stream: &mut Stream) -> bool {
        match parse_response_stream(stream) {
            Ok(value) => self.deferred.resolve(value),
            Err(err) => {
                let err = self.annotate(err);
                self.deferred.reject(err)
            }
        }
    }

    pub fn reject(mut self, err: RpcError) -> bool {
        self.deferred.reject(err)
    }
}

// ── Channel ──────────────────────────────────────────────────────

/// A slot for one in-flight request.
///
/// Each use advances the sequence by the channel count, so the ids a
/// channel hands out never collide with another channel's ids or with its
/// own earlier ones.
#[derive(Debug)]
pub struct Channel {
    sequence: u64,
    item: Option<SendItem>,
}

impl Channel {
    /// Channel `index` of the pool starts at sequence `index`.
    pub fn new(index: u64) -> Self {
        Self {
            sequence: index,
            item: None,
        }
    }

    pub fn is_free(&self) -> bool {
        self.item.is_none()
    }

    pub fn item(&self) -> Option<&SendItem> {
        self.item.as_ref()
    }

    pub fn item_mut(&mut self) -> Option<&mut SendItem> {
        self.item.as_mut()
    }

    /// Bind `item`, stamping a fresh callback id and the send time.
    ///
    /// Hands the item back if the channel is occupied.
    pub fn bind(&mut self, mut item: SendItem, channel_count: u64, now_ms: u64) -> Result<&mut SendItem, SendItem> {
        if self.item.is_some() {
            return Err(item);
        }
        self.sequence += channel_count;
        item.stream.set_callback_id(self.sequence);
        item.send_ms = now_ms;
        Ok(self.item.insert(item))
    }

    /// Whether `callback_id` answers the request currently bound here.
    pub fn matches(&self, callback_id: u64) -> bool {
        self.item.is_some() && self.sequence == callback_id
    }

    pub fn take(&mut self) -> Option<SendItem> {
        self.item.take()
    }

    /// Unbind the item if its flight time ran out.
    pub fn take_expired(&mut self, now_ms: u64) -> Option<SendItem> {
        if self.item.as_ref().is_some_and(|item| item.flight_expired(now_ms)) {
            self.item.take()
        } else {
            None
        }
    }
}

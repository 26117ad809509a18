//! The public RPC client.
//!
//! A [`Client`] owns one [`ClientState`] behind a mutex, a reconnecting
//! [`ClientAdapter`], and a timer task. Background tasks only hold weak
//! references, so dropping the client tears everything down; requests still
//! outstanding then complete with [`client_closed`](error::client_closed).

use std::panic::Location;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::clock::Clock;
use crate::config::ClientOptions;
use crate::deferred::{Deferred, Response};
use crate::error::{self, RpcError};
use crate::hub::{ErrorHub, LogErrorHub, SilentHub};
use crate::network::{ClientAdapter, Dialer, NetDialer, StreamConn, StreamReceiver};
use crate::state::{ClientState, Notice, SendItem};
use crate::stream::Stream;
use crate::value::Value;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// `1st`, `2nd`, `3rd`, `4th`, ... `11th`, `12th`, `13th`, ... `21st`.
fn ordinal(n: usize) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}

struct Inner {
    state: Mutex<ClientState>,
    hub: Mutex<Arc<dyn ErrorHub>>,
    adapter: ClientAdapter,
    clock: Clock,
    options: ClientOptions,
    timer: Mutex<Option<CancellationToken>>,
}

impl Inner {
    /// Run `f` under the state lock, then the side effects it queued.
    fn with_state<R>(&self, f: impl FnOnce(&mut ClientState, u64) -> R) -> R {
        let now = self.clock.now_ms();
        let (ret, notices) = {
            let mut state = lock(&self.state);
            let ret = f(&mut state, now);
            (ret, state.take_notices())
        };
        self.dispatch(notices);
        ret
    }

    fn dispatch(&self, notices: Vec<Notice>) {
        if notices.is_empty() {
            return;
        }
        let hub = lock(&self.hub).clone();
        for notice in notices {
            match notice {
                Notice::Report(stream) => hub.on_receive_stream(stream),
                Notice::Broadcast { value, handlers } => {
                    for handler in handlers {
                        handler(&value);
                    }
                }
            }
        }
    }

    fn unsubscribe(&self, id: u64) -> bool {
        lock(&self.state).unsubscribe(id)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(token) = lock(&self.timer).take() {
            token.cancel();
        }
    }
}

impl StreamReceiver for Inner {
    fn on_conn_open(&self, conn: Arc<dyn StreamConn>) {
        self.with_state(|state, _| state.on_conn_open(conn));
    }

    fn on_conn_close(&self, conn: Arc<dyn StreamConn>) {
        self.with_state(|state, _| state.on_conn_close(conn.as_ref()));
    }

    fn on_conn_read_stream(&self, conn: Arc<dyn StreamConn>, stream: Stream) {
        self.with_state(|state, now| state.on_conn_read_stream(conn, stream, now));
    }

    fn on_conn_error(&self, conn: Option<Arc<dyn StreamConn>>, err: RpcError) {
        self.with_state(|state, _| state.on_conn_error(conn.as_ref(), err));
    }
}

/// Multiplexed RPC client over a reconnecting link.
///
/// Must be created inside a tokio runtime.
///
/// ```no_run
/// # async fn demo() -> Result<(), vbot_core::RpcError> {
/// use vbot_core::{Client, ClientOptions, Value};
///
/// let client = Client::new("ws://127.0.0.1:8080/rpc", ClientOptions::default());
/// let greeting = client
///     .send(6000, "#.user:SayHello", &[Value::from("kitty")])
///     .await?;
/// assert_eq!(greeting.as_str(), Some("hello kitty"));
/// # Ok(())
/// # }
/// ```
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Connect to `connect_string` (`ws://`, `wss://` or `tcp://`).
    pub fn new(connect_string: impl Into<String>, options: ClientOptions) -> Self {
        Self::with_dialer(connect_string, Arc::new(NetDialer), options)
    }

    /// Connect through a custom [`Dialer`].
    pub fn with_dialer(
        connect_string: impl Into<String>,
        dialer: Arc<dyn Dialer>,
        options: ClientOptions,
    ) -> Self {
        let connect_string = connect_string.into();
        let clock = Clock::new();
        let token = CancellationToken::new();

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let receiver: Weak<dyn StreamReceiver> = weak.clone();
            Inner {
                state: Mutex::new(ClientState::new()),
                hub: Mutex::new(Arc::new(LogErrorHub)),
                adapter: ClientAdapter::new(
                    connect_string,
                    dialer,
                    receiver,
                    options.adapter(),
                    clock,
                ),
                clock,
                options,
                timer: Mutex::new(Some(token.clone())),
            }
        });

        inner.adapter.open();
        Self::spawn_timer(Arc::downgrade(&inner), inner.options.tick_ms, token);
        debug!(url = inner.adapter.connect_string(), "client started");
        Self { inner }
    }

    fn spawn_timer(weak: Weak<Inner>, tick_ms: u64, token: CancellationToken) {
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(tick_ms.max(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        inner.with_state(|state, now| state.tick(now));
                    }
                }
            }
        });
    }

    /// Call `target` with `args`.
    ///
    /// The response completes with the server's value, the server's error,
    /// or a timeout error once `timeout_ms` has passed. An argument that
    /// cannot be encoded rejects the call right away with
    /// [`unsupported_value`](error::unsupported_value).
    #[track_caller]
    pub fn send(&self, timeout_ms: u64, target: &str, args: &[Value]) -> Response {
        let location = Location::caller();
        let caller = self.inner.options.debug.then(|| location.to_string());

        if self.is_closed() {
            let (mut deferred, response) = Deferred::new();
            deferred.reject(error::client_closed());
            return response;
        }

        let now = self.inner.clock.now_ms();
        let (mut item, response) = match SendItem::new(target, timeout_ms, now) {
            Ok(ret) => ret,
            Err(err) => {
                let (mut deferred, response) = Deferred::new();
                deferred.reject(error::unsupported_value().add_debug(format!("target: {err}")));
                return response;
            }
        };
        if let Some(caller) = caller {
            item = item.with_caller(caller);
        }

        for (i, arg) in args.iter().enumerate() {
            if let Err(err) = item.stream_mut().write(arg) {
                let err = error::unsupported_value()
                    .add_debug(format!("{} argument: {err}", ordinal(i + 1)));
                let err = item.annotate(err);
                item.reject(err);
                return response;
            }
        }

        self.inner.with_state(|state, now| state.enqueue(item, now));
        response
    }

    /// Run `handler` for every broadcast of `event` on `target`.
    ///
    /// Dropping the returned handle keeps the subscription; call
    /// [`Subscription::close`] or [`Client::unsubscribe`] to end it.
    pub fn subscribe(
        &self,
        target: &str,
        event: &str,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        let id = lock(&self.inner.state).subscribe(target, event, Arc::new(handler));
        Subscription {
            id,
            client: Some(Arc::downgrade(&self.inner)),
        }
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        self.inner.unsubscribe(id)
    }

    /// Replace the error hub. `None` silences error reports.
    pub fn set_error_hub(&self, hub: Option<Arc<dyn ErrorHub>>) {
        *lock(&self.inner.hub) = hub.unwrap_or_else(|| Arc::new(SilentHub));
    }

    /// Stop the timer and the adapter.
    ///
    /// Outstanding requests are left as they are; they settle with
    /// [`client_closed`](error::client_closed) when the client is dropped.
    /// Returns `false` if already closed.
    pub fn close(&self) -> bool {
        let Some(token) = lock(&self.inner.timer).take() else {
            return false;
        };
        debug!(url = self.inner.adapter.connect_string(), "client closed");
        token.cancel();
        self.inner.adapter.close()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner.timer).is_none()
    }

    /// Whether a session is negotiated on a live link.
    pub fn is_ready(&self) -> bool {
        lock(&self.inner.state).phase().is_ready()
    }

    /// The held session token, empty before the first negotiation.
    pub fn session(&self) -> String {
        lock(&self.inner.state).session().to_string()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

/// Handle to one subscription.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    client: Option<Weak<Inner>>,
}

impl Subscription {
    /// Zero once closed.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Unsubscribe. Later calls do nothing.
    pub fn close(&mut self) {
        if let Some(inner) = self.client.take().and_then(|weak| weak.upgrade()) {
            inner.unsubscribe(self.id);
        }
        self.id = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinals() {
        let got: Vec<String> = [1, 2, 3, 4, 11, 12, 13, 21, 22, 23, 101, 111, 112]
            .into_iter()
            .map(ordinal)
            .collect();
        assert_eq!(
            got,
            [
                "1st", "2nd", "3rd", "4th", "11th", "12th", "13th", "21st", "22nd", "23rd",
                "101st", "111th", "112th"
            ]
        );
    }

    #[tokio::test]
    async fn unencodable_argument_rejects_immediately() {
        let client = Client::new("xxx://nowhere", ClientOptions::default());
        client.set_error_hub(None);
        let mut deep = Value::Null;
        for _ in 0..65 {
            deep = Value::Array(vec![deep]);
        }
        let err = client
            .send(1000, "#.user:SayHello", &[Value::from(1i64), Value::Float64(f64::NAN)])
            .await
            .unwrap_err();
        assert!(err.is(&error::unsupported_value()));
        assert_eq!(err.message(), "2nd argument: value is not supported");

        let err = client
            .send(1000, "#.user:SayHello", &[deep])
            .await
            .unwrap_err();
        assert!(err.message().starts_with("1st argument: value"));
        assert!(err.message().ends_with("overflows"));
        assert_eq!(lock(&client.inner.state).queued(), 0);
    }

    #[tokio::test]
    async fn debug_mode_records_call_site() {
        let options = ClientOptions {
            debug: true,
            ..ClientOptions::default()
        };
        let client = Client::new("xxx://nowhere", options);
        client.set_error_hub(None);
        let err = client
            .send(1000, "t", &[Value::Float64(f64::NAN)])
            .await
            .unwrap_err();
        assert!(err.message().contains(file!()));
    }

    #[tokio::test]
    async fn close_once_then_reject() {
        let client = Client::new("xxx://nowhere", ClientOptions::default());
        client.set_error_hub(None);
        assert!(!client.is_closed());
        assert!(client.close());
        assert!(!client.close());
        assert!(client.is_closed());
        let err = client.send(1000, "t", &[]).await.unwrap_err();
        assert!(err.is(&error::client_closed()));
    }

    #[tokio::test]
    async fn subscription_close_is_idempotent() {
        let client = Client::new("xxx://nowhere", ClientOptions::default());
        client.set_error_hub(None);
        let mut a = client.subscribe("#.room", "Message", |_| {});
        let b = client.subscribe("#.room", "Message", |_| {});
        assert_eq!((a.id(), b.id()), (1, 2));

        a.close();
        assert_eq!(a.id(), 0);
        a.close();
        assert!(!client.unsubscribe(1));
        assert!(client.unsubscribe(b.id()));
    }

    #[tokio::test]
    async fn dropping_the_client_settles_pending() {
        let client = Client::new("xxx://nowhere", ClientOptions::default());
        client.set_error_hub(None);
        let response = client.send(60_000, "t", &[]);
        drop(client);
        let err = response.await.unwrap_err();
        assert!(err.is(&error::client_closed()));
    }
}

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::connection::Connection;
use super::dialer::Dialer;
use super::{StreamConn, StreamReceiver};
use crate::clock::Clock;

/// Redial timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterOptions {
    /// How often the link is checked.
    pub poll_ms: u64,
    /// Minimum gap between two dial attempts.
    pub cooldown_ms: u64,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            poll_ms: 300,
            cooldown_ms: 3000,
        }
    }
}

#[derive(Debug, Default)]
struct Link {
    conn: Option<Arc<Connection>>,
    last_dial_ms: Option<u64>,
    next_id: u64,
}

struct Shared {
    connect_string: String,
    dialer: Arc<dyn Dialer>,
    receiver: Weak<dyn StreamReceiver>,
    options: AdapterOptions,
    clock: Clock,
    link: Mutex<Link>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    /// Dial if there is no live link and the cooldown has passed.
    fn supervise(self: &Arc<Self>, token: &CancellationToken) {
        let now = self.clock.now_ms();
        let mut link = lock(&self.link);
        if link.conn.as_ref().is_some_and(|c| !c.is_closed()) {
            return;
        }
        let cooling = link
            .last_dial_ms
            .is_some_and(|last| now.saturating_sub(last) < self.options.cooldown_ms);
        if cooling {
            return;
        }
        link.last_dial_ms = Some(now);
        link.next_id += 1;
        let (conn, outbound) = Connection::new(link.next_id, self.clock);
        link.conn = Some(conn.clone());
        drop(link);

        let shared = self.clone();
        let token = token.clone();
        tokio::spawn(async move {
            let dialed = tokio::select! {
                _ = token.cancelled() => {
                    conn.mark_closed();
                    return;
                }
                ret = shared.dialer.dial(&shared.connect_string) => ret,
            };
            match dialed {
                Ok(pair) => {
                    conn.run(pair, outbound, shared.receiver.clone(), token).await;
                }
                Err(err) => {
                    conn.mark_closed();
                    warn!(url = %shared.connect_string, error = %err, "dial failed");
                    if let Some(r) = shared.receiver.upgrade() {
                        r.on_conn_error(None, err);
                    }
                }
            }
        });
    }
}

/// Keeps a link to `connect_string` open while the adapter is open.
pub struct ClientAdapter {
    shared: Arc<Shared>,
    running: Mutex<Option<CancellationToken>>,
}

impl ClientAdapter {
    pub fn new(
        connect_string: impl Into<String>,
        dialer: Arc<dyn Dialer>,
        receiver: Weak<dyn StreamReceiver>,
        options: AdapterOptions,
        clock: Clock,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                connect_string: connect_string.into(),
                dialer,
                receiver,
                options,
                clock,
                link: Mutex::new(Link::default()),
            }),
            running: Mutex::new(None),
        }
    }

    pub fn connect_string(&self) -> &str {
        &self.shared.connect_string
    }

    pub fn is_open(&self) -> bool {
        lock(&self.running).is_some()
    }

    /// Start the check loop; the first dial happens right away.
    ///
    /// Returns `false` if already open. Must be called inside a tokio runtime.
    pub fn open(&self) -> bool {
        let mut running = lock(&self.running);
        if running.is_some() {
            return false;
        }
        let token = CancellationToken::new();
        *running = Some(token.clone());
        drop(running);

        debug!(url = %self.shared.connect_string, "adapter open");
        let shared = self.shared.clone();
        let poll = Duration::from_millis(self.shared.options.poll_ms.max(1));
        tokio::spawn(async move {
            let mut ticker = interval(poll);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => shared.supervise(&token),
                }
            }
        });
        true
    }

    /// Stop the check loop and close the current link.
    ///
    /// Returns `false` if not open.
    pub fn close(&self) -> bool {
        let Some(token) = lock(&self.running).take() else {
            return false;
        };
        debug!(url = %self.shared.connect_string, "adapter close");
        token.cancel();
        if let Some(conn) = lock(&self.shared.link).conn.take() {
            conn.close();
        }
        true
    }
}

impl Drop for ClientAdapter {
    fn drop(&mut self) {
        if let Some(token) = lock(&self.running).take() {
            token.cancel();
        }
    }
}

mod channel;
mod client;
mod phase;
mod session;

pub use channel::{Channel, SendItem};
pub use client::{BroadcastHandler, ClientState, Notice, topic_key};
pub use phase::ClientPhase;
pub use session::{ConnectResponse, MAX_CHANNELS, SessionConfig, connect_request};

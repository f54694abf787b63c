//! Live delivery: the per-project connection registry, the Redis pub/sub
//! bridge that carries events across server processes, the ticket
//! handshake authorizer, and the socket pump that ties them together.

mod auth;
mod hub;
mod push;
mod registry;
mod socket;
mod subscriber;

pub use auth::{authenticate, CloseReason};
pub use hub::LiveHub;
pub use push::{reshape, LivePush};
pub use registry::ConnectionRegistry;
pub use socket::handle_socket;
pub use subscriber::{LiveSubscriber, RedisLiveSubscriber};

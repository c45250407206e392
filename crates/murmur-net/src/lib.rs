//! Peer networking for murmur.
//!
//! Outbound requests go through a [`Transport`] (HTTP over a SOCKS5 proxy by
//! default); inbound requests arrive on an axum [`Listener`] and are handed
//! to an [`InboundHandler`].

pub mod error;
pub mod listener;
pub mod loopback;
pub mod rate_limit;
pub mod transport;

pub use error::NetError;
pub use listener::{build_router, InboundHandler, Listener};
pub use loopback::LoopbackTransport;
pub use rate_limit::RateLimiter;
pub use transport::{call, HttpTransport, Transport};

//! The four-stage contact protocol: introduce, confirm-key,
//! set-session-key, deliver.
//!
//! Outbound steps are methods on [`Node`](crate::node::Node); the inbound
//! side implements [`murmur_net::InboundHandler`] for it.

mod inbound;
mod outbound;

pub use outbound::MAX_BATCH;

//! # murmur-core
//!
//! Contact registry, message outbox/inbox and the handshake protocol of
//! murmur, plus the scheduler that drives it.
//!
//! A front end opens a [`Database`](murmur_store::Database), creates or
//! loads the [`User`], builds a [`Node`] and then:
//! - serves [`Node`] as the inbound handler of a `murmur_net::Listener`;
//! - runs a [`Scheduler`] for outbound work;
//! - calls [`Node`] operations and listens on an [`EventSink`].

pub mod commands;
pub mod contact;
pub mod error;
pub mod events;
pub mod message;
pub mod node;
pub mod protocol;
pub mod scheduler;
pub mod user;

pub use commands::{Command, CommandError, Outcome};
pub use contact::{Contact, Registry, Stage};
pub use error::{CoreError, Result};
pub use events::{BroadcastSink, CoreEvent, EventSink};
pub use message::TextMessage;
pub use node::{Node, Status};
pub use scheduler::Scheduler;
pub use user::User;

//! Types and primitives shared by every murmur crate: the cipher layer, the
//! local identity key pair, identifiers and the peer-to-peer wire protocol.

pub mod constants;
pub mod crypto;
pub mod encoding;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod types;

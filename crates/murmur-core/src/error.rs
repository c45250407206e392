use thiserror::Error;

use murmur_net::NetError;
use murmur_shared::error::{CryptoError, IdentityError};
use murmur_shared::types::{AddressError, ContactId};
use murmur_store::StoreError;

/// Errors produced by the contact registry and the handshake protocol.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A contact with the same address or public key already exists.
    #[error("Contact already exists")]
    DuplicateContact,

    #[error("Contact {0} not found")]
    ContactNotFound(ContactId),

    /// The peer's public key has not been received yet.
    #[error("Peer public key unknown")]
    PeerKeyUnknown,

    /// The peer does not know us by an id yet.
    #[error("Peer has not assigned us an id yet")]
    RemoteIdUnknown,

    /// The peer answered a request negatively.
    #[error("Peer rejected {0}")]
    RejectedByPeer(&'static str),

    /// A different public key is already on file for this contact.
    #[error("A different public key is already known for this contact")]
    AlreadyKnown,

    /// The presented shared secret does not match.
    #[error("Shared secret mismatch")]
    SecretMismatch,

    /// No session key is installed for this contact.
    #[error("No session key")]
    NoSessionKey,

    /// The contact stayed busy for too long.
    #[error("Contact {0} is busy")]
    Busy(ContactId),

    /// No local identity exists yet.
    #[error("No user identity; create one first")]
    NoUser,

    #[error("User already exists")]
    UserExists,

    #[error("Invalid user name: {0}")]
    InvalidName(String),

    /// Our own onion address is not known yet.
    #[error("Own address unknown")]
    OwnAddressUnknown,

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Message is empty")]
    EmptyMessage,

    #[error(transparent)]
    Command(#[from] crate::commands::CommandError),

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Transport: {0}")]
    Transport(#[from] NetError),

    #[error("Store: {0}")]
    Store(#[from] StoreError),
}

impl CoreError {
    /// Whether the on-disk state can no longer be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(self, CoreError::Store(e) if e.is_corruption())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Malformed(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::crypto;
use crate::error::{CryptoError, IdentityError};
use crate::types::PeerKey;

/// The local installation's key pair (X25519).
///
/// Peers seal handshake secrets to [`Identity::public_key`]; only this
/// identity can open them.
#[derive(Clone)]
pub struct Identity {
    secret: StaticSecret,
}

/// Serializable format for storing identity
#[derive(Serialize, Deserialize)]
pub struct IdentityExport {
    #[serde(with = "crate::encoding::array32")]
    pub secret_key: [u8; 32],
    #[serde(with = "crate::encoding::array32")]
    pub public_key: [u8; 32],
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        Self {
            secret: StaticSecret::random_from_rng(OsRng),
        }
    }

    pub fn from_secret_bytes(secret: [u8; 32]) -> Self {
        Self {
            secret: StaticSecret::from(secret),
        }
    }

    /// Restore identity from a serialized export, rejecting a mismatched pair.
    pub fn from_export(export: &IdentityExport) -> Result<Self, IdentityError> {
        let identity = Self::from_secret_bytes(export.secret_key);
        if identity.public_key().0 != export.public_key {
            return Err(IdentityError::InvalidKeyBytes);
        }
        Ok(identity)
    }

    pub fn public_key(&self) -> PeerKey {
        PeerKey(PublicKey::from(&self.secret).to_bytes())
    }

    pub fn to_export(&self) -> IdentityExport {
        IdentityExport {
            secret_key: self.secret.to_bytes(),
            public_key: self.public_key().0,
        }
    }

    /// Open a sealed box addressed to this identity.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        crypto::open_sealed(&self.secret, sealed)
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("public_key", &self.public_key().short())
            .finish_non_exhaustive()
    }
}

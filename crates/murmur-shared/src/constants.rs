use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Application name
pub const APP_NAME: &str = "murmur";

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// Symmetric key size in bytes (AES-256 and XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// X25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Length of a contact's shared secret
pub const SECRET_SIZE: usize = 32;

/// Maximum length of a display name, local or peer-reported, in characters
pub const NAME_MAX_LEN: usize = 32;

/// Maximum length of a greeting received with an introduction, in characters
pub const HELLO_MAX_LEN: usize = 1024;

/// Session keys older than this are regenerated before the next delivery
pub const SESSION_KEY_LIFETIME_SECS: i64 = 3600;

/// Minimum spacing between two outbound attempts for the same contact
pub const RETRY_COOLDOWN_SECS: i64 = 20;

/// Default reconciliation tick
pub const SCHEDULER_TICK_SECS: u64 = 10;

/// Timeout of a single outbound wire request
pub const TRANSPORT_TIMEOUT_SECS: u64 = 30;

/// How long opening the storage file may wait on a lock
pub const STORE_OPEN_TIMEOUT_SECS: u64 = 10;

/// Port the onion service exposes to peers
pub const ONION_PORT: u16 = 80;

/// Default local listen address for inbound wire requests
pub const DEFAULT_LISTEN_ADDR: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 6060));

/// Default SOCKS proxy of a local Tor client
pub const DEFAULT_SOCKS_PROXY: &str = "socks5h://127.0.0.1:9050";

/// Schema tag written into every persisted JSON record
pub const RECORD_VERSION: u32 = 1;

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_STORE_KEY: &str = "murmur-store-key-v1";
pub const KDF_CONTEXT_SEALED_BOX: &str = "murmur-sealed-box-v1";

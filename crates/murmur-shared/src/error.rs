use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    /// Ciphertext length or padding header is implausible.
    #[error("Corrupt ciphertext: {0}")]
    Corrupt(&'static str),

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid key length")]
    InvalidKeyLength,
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid key bytes")]
    InvalidKeyBytes,

    #[error("Display name must be 1..={max} characters, got {len}")]
    InvalidName { len: usize, max: usize },
}

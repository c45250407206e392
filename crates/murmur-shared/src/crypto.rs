use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit as _};
use aes::Aes256;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::constants::{
    BLOCK_SIZE, KDF_CONTEXT_SEALED_BOX, NONCE_SIZE, PUBKEY_SIZE, SYMMETRIC_KEY_SIZE,
};
use crate::error::CryptoError;

pub type SymmetricKey = [u8; SYMMETRIC_KEY_SIZE];

// ---------------------------------------------------------------------------
// Hashing & key generation
// ---------------------------------------------------------------------------

/// 32-byte BLAKE3 digest. Used for shared secrets, message ids and session keys.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

pub fn derive_key_from_passphrase(passphrase: &[u8], context: &str) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(passphrase);
    let hash = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&hash.as_bytes()[..32]);
    key
}

/// A fresh session key: the hash of 32 random bytes.
pub fn generate_session_key() -> SymmetricKey {
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    hash(&seed)
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

// ---------------------------------------------------------------------------
// Padded AES-256 (storage values and delivery batches)
// ---------------------------------------------------------------------------

/// Encrypt `data` with AES-256, one block at a time.
///
/// Layout before encryption: `[pad_len][data][random pad]`. The pad makes the
/// whole buffer a multiple of [`BLOCK_SIZE`]; `pad_len` is
/// `BLOCK_SIZE - data.len() % BLOCK_SIZE`, so it is always in `1..=16` and the
/// actual number of random bytes is `pad_len - 1`.
///
/// There is no authentication tag. Only the plausibility of the header byte
/// is checked on the way back.
pub fn encrypt(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256::new(GenericArray::from_slice(key));

    let pad_len = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    let mut buf = Vec::with_capacity(data.len() + pad_len);
    buf.push(pad_len as u8);
    buf.extend_from_slice(data);

    let mut pad = vec![0u8; pad_len - 1];
    rand::thread_rng().fill_bytes(&mut pad);
    buf.extend_from_slice(&pad);

    if buf.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::EncryptionFailed);
    }

    for block in buf.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(buf)
}

pub fn decrypt(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::Corrupt("length is not a multiple of the block size"));
    }

    let cipher = Aes256::new(GenericArray::from_slice(key));
    let mut buf = data.to_vec();
    for block in buf.chunks_exact_mut(BLOCK_SIZE) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }

    let pad_len = buf[0] as usize;
    if !(1..=BLOCK_SIZE).contains(&pad_len) {
        return Err(CryptoError::Corrupt("padding header out of range"));
    }
    // buf is at least one block long, so `end` never drops below 1.
    let end = buf.len() - (pad_len - 1);
    Ok(buf[1..end].to_vec())
}

// ---------------------------------------------------------------------------
// Sealed box (key exchange)
// ---------------------------------------------------------------------------

fn sealed_box_key(shared_secret: &[u8; 32], eph_pk: &[u8; 32], recipient_pk: &[u8; 32]) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_SEALED_BOX);
    hasher.update(shared_secret);
    hasher.update(eph_pk);
    hasher.update(recipient_pk);
    *hasher.finalize().as_bytes()
}

/// Anonymous public-key encryption to `recipient_pk`.
///
/// Output: `eph_pk (32) || nonce (24) || ciphertext+tag`.
pub fn seal(recipient_pk: &[u8; PUBKEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let eph_secret = EphemeralSecret::random_from_rng(OsRng);
    let eph_pk = PublicKey::from(&eph_secret);
    let shared = eph_secret.diffie_hellman(&PublicKey::from(*recipient_pk));

    let key = sealed_box_key(shared.as_bytes(), eph_pk.as_bytes(), recipient_pk);
    let cipher = XChaCha20Poly1305::new((&key).into());
    let nonce_bytes = generate_nonce();

    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad: eph_pk.as_bytes(),
            },
        )
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(PUBKEY_SIZE + NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(eph_pk.as_bytes());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn open_sealed(recipient_sk: &StaticSecret, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < PUBKEY_SIZE + NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }
    let (eph_bytes, rest) = data.split_at(PUBKEY_SIZE);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_SIZE);

    let mut eph_pk = [0u8; PUBKEY_SIZE];
    eph_pk.copy_from_slice(eph_bytes);
    let recipient_pk = PublicKey::from(recipient_sk);
    let shared = recipient_sk.diffie_hellman(&PublicKey::from(eph_pk));

    let key = sealed_box_key(shared.as_bytes(), &eph_pk, recipient_pk.as_bytes());
    let cipher = XChaCha20Poly1305::new((&key).into());

    cipher
        .decrypt(
            XNonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad: &eph_pk,
            },
        )
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Constant-time equality for shared secrets.
pub fn secrets_equal(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.len() == b.len() && a.ct_eq(b).unwrap_u8() == 1
}

//! AES-256-GCM wallet file encryption with Argon2id key derivation.
//!
//! # Wire format
//! ```text
//! salt (16 bytes) || nonce (12 bytes) || ciphertext + auth_tag
//! ```

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use zeroize::Zeroizing;

use duff_core::error::WalletError;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Derive a 256-bit key from `password` and `salt` with Argon2id at the
/// crate's default cost. Salts shorter than 8 bytes are rejected.
pub fn derive_key(password: &[u8], salt: &[u8]) -> Result<Zeroizing<[u8; 32]>, WalletError> {
    let mut key = Zeroizing::new([0u8; 32]);
    Argon2::new(Algorithm::Argon2id, Version::V0x13, Params::default())
        .hash_password_into(password, salt, key.as_mut())
        .map_err(|e| WalletError::Encryption(format!("key derivation: {e}")))?;
    Ok(key)
}

fn cipher_for(password: &[u8], salt: &[u8]) -> Result<Aes256Gcm, WalletError> {
    let key = derive_key(password, salt)?;
    Aes256Gcm::new_from_slice(key.as_ref()).map_err(|e| WalletError::Encryption(e.to_string()))
}

/// Seal `plaintext` under `password` with a fresh salt and nonce.
pub fn encrypt(plaintext: &[u8], password: &[u8]) -> Result<Vec<u8>, WalletError> {
    use rand::RngCore;
    let mut header = [0u8; SALT_LEN + NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut header);
    let (salt, nonce) = header.split_at(SALT_LEN);

    let sealed = cipher_for(password, salt)?
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| WalletError::Encryption(e.to_string()))?;
    Ok([header.as_slice(), &sealed].concat())
}

/// Open an envelope produced by [`encrypt`].
///
/// A wrong password and a tampered payload both surface as
/// [`WalletError::InvalidPassword`]; the tag cannot tell them apart.
pub fn decrypt(envelope: &[u8], password: &[u8]) -> Result<Zeroizing<Vec<u8>>, WalletError> {
    let Some((salt, rest)) = envelope.split_first_chunk::<SALT_LEN>() else {
        return Err(too_short(envelope.len()));
    };
    let Some((nonce, sealed)) = rest.split_first_chunk::<NONCE_LEN>() else {
        return Err(too_short(envelope.len()));
    };
    if sealed.len() < TAG_LEN {
        return Err(too_short(envelope.len()));
    }

    cipher_for(password, salt)?
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map(Zeroizing::new)
        .map_err(|_| WalletError::InvalidPassword)
}

fn too_short(len: usize) -> WalletError {
    WalletError::CorruptedFile(format!(
        "encrypted data too short: {len} < {}",
        SALT_LEN + NONCE_LEN + TAG_LEN
    ))
}

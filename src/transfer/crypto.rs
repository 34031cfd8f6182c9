//! Passphrase-based encryption of whole files
//!
//! A file is encrypted as one unit with AES-256-GCM under a key derived
//! from the passphrase with Argon2id. The result is a self-contained text
//! blob:
//!
//! ```text
//! base64( salt (16 bytes) || nonce (12 bytes) || ciphertext || tag (16 bytes) )
//! ```
//!
//! Salt and nonce are fresh for every call, so encrypting the same file
//! twice gives different blobs.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use argon2::Argon2;
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::{Rng, RngCore};

use crate::error::{Error, Result};

/// Salt length for Argon2id
pub const SALT_LEN: usize = 16;

/// AES-GCM nonce length
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length
pub const TAG_LEN: usize = 16;

/// Length of generated passphrases
pub const PASSPHRASE_LEN: usize = 16;

/// Characters generated passphrases are drawn from
pub const PASSPHRASE_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*";

/// Derive a 256-bit key from a passphrase
fn derive_key(passphrase: &str, salt: &[u8]) -> Result<[u8; 32]> {
    let mut output = [0u8; 32];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut output)
        .map_err(|e| Error::TransferAborted(format!("key derivation failed: {}", e)))?;
    Ok(output)
}

/// Encrypt a whole file. The returned blob length is the size declared on the wire.
pub fn encrypt(plaintext: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce_bytes = [0u8; NONCE_LEN];
    let mut rng = rand::thread_rng();
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut nonce_bytes);

    let key = derive_key(passphrase, &salt)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| Error::TransferAborted(format!("encryption failed: {}", e)))?;

    let mut raw = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
    raw.extend_from_slice(&salt);
    raw.extend_from_slice(&nonce_bytes);
    raw.extend_from_slice(&ciphertext);

    Ok(STANDARD.encode(raw).into_bytes())
}

/// Decrypt a blob produced by [`encrypt`].
///
/// Every failure (bad encoding, truncation, wrong passphrase, tampering)
/// is reported as `InvalidPassphrase`.
pub fn decrypt(blob: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    let raw = STANDARD
        .decode(trim_ascii(blob))
        .map_err(|_| Error::InvalidPassphrase)?;

    if raw.len() < SALT_LEN + NONCE_LEN + TAG_LEN {
        return Err(Error::InvalidPassphrase);
    }

    let (salt, rest) = raw.split_at(SALT_LEN);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

    let key = derive_key(passphrase, salt).map_err(|_| Error::InvalidPassphrase)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| Error::InvalidPassphrase)
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &bytes[start..end]
}

/// Generate a random passphrase for encrypted sends
pub fn generate_passphrase() -> String {
    let mut rng = rand::thread_rng();
    (0..PASSPHRASE_LEN)
        .map(|_| PASSPHRASE_ALPHABET[rng.gen_range(0..PASSPHRASE_ALPHABET.len())] as char)
        .collect()
}

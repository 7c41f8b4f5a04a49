//! Cryptographic primitives backing the vault.
//!
//! - Argon2id key derivation from the master password.
//! - XChaCha20-Poly1305 authenticated encryption with domain-separated AAD.
//! - SHA-256 fingerprinting of canonicalized credential JSON.
//!
//! Key material is zeroized on drop throughout; decrypted plaintexts are
//! never persisted.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::core::CoreError;

/// Current on-disk ciphertext layout version.
const CIPHERTEXT_VERSION: u8 = 1;

/// AAD domain tag for encrypted credential blobs.
pub const AAD_AUTH: &[u8] = b"auth";
/// AAD domain tag for the vault verifier ciphertext.
pub const AAD_VERIFIER: &[u8] = b"verifier";

/// Argon2id parameters used to derive the vault key. Stored in `VaultMeta` so
/// existing vaults keep working if the defaults below change later.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub mem_kib: u32,
    /// Iteration count.
    pub iters: u32,
    /// Degree of parallelism.
    pub parallel: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_kib: 64 * 1024,
            iters: 3,
            parallel: 1,
        }
    }
}

/// A derived 32-byte key, zeroized when dropped.
pub type DerivedKey = Zeroizing<[u8; 32]>;

/// Derives a 32-byte key from `password` and `salt` using Argon2id.
pub fn derive_key(password: &str, salt: &[u8], params: KdfParams) -> Result<DerivedKey, CoreError> {
    use argon2::{Algorithm, Argon2, Params, Version};

    let argon_params = Params::new(params.mem_kib, params.iters, params.parallel, Some(32))
        .map_err(|e| CoreError::CryptoFailed(format!("invalid KDF parameters: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(password.as_bytes(), salt, key.as_mut())
        .map_err(|e| CoreError::CryptoFailed(format!("key derivation failed: {e}")))?;

    Ok(key)
}

/// Generates a fresh random 16-byte salt for a new vault.
pub fn generate_salt() -> [u8; 16] {
    let mut salt = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Encrypts `plaintext` under `key` with the given AAD domain tag, returning
/// `version(1) || nonce(24) || aead_output`.
pub fn encrypt(key: &DerivedKey, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CoreError> {
    let cipher = XChaCha20Poly1305::new_from_slice(key.as_ref())
        .map_err(|e| CoreError::CryptoFailed(format!("invalid key: {e}")))?;

    let mut nonce_bytes = [0u8; 24];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CoreError::CryptoFailed(format!("encryption failed: {e}")))?;

    let mut out = Vec::with_capacity(1 + 24 + ciphertext.len());
    out.push(CIPHERTEXT_VERSION);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts a blob produced by [`encrypt`], verifying the AAD domain tag.
pub fn decrypt(key: &DerivedKey, aad: &[u8], blob: &[u8]) -> Result<Vec<u8>, CoreError> {
    if blob.len() < 1 + 24 + 16 {
        return Err(CoreError::CryptoFailed(
            "ciphertext too short".to_string(),
        ));
    }

    let version = blob[0];
    if version != CIPHERTEXT_VERSION {
        return Err(CoreError::CryptoFailed(format!(
            "unsupported ciphertext version: {version}"
        )));
    }

    let nonce = XNonce::from_slice(&blob[1..25]);
    let ciphertext = &blob[25..];

    let cipher = XChaCha20Poly1305::new_from_slice(key.as_ref())
        .map_err(|e| CoreError::CryptoFailed(format!("invalid key: {e}")))?;

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| {
            CoreError::CryptoFailed(
                "decryption failed: authentication tag verification failed".to_string(),
            )
        })
}

/// Computes the stable fingerprint of a credential's plaintext JSON: parse,
/// re-emit with sorted keys and no insignificant whitespace, SHA-256, first
/// 8 bytes hex-encoded (16 hex characters).
pub fn fingerprint(plaintext_json: &[u8]) -> Result<String, CoreError> {
    let value: serde_json::Value = serde_json::from_slice(plaintext_json)?;
    let canonical = canonicalize(&value);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    Ok(hex_encode(&digest[..8]))
}

fn canonicalize(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = String::from("{");
            for (i, k) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(k).unwrap());
                out.push(':');
                out.push_str(&canonicalize(&map[*k]));
            }
            out.push('}');
            out
        }
        serde_json::Value::Array(items) => {
            let mut out = String::from("[");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&canonicalize(item));
            }
            out.push(']');
            out
        }
        other => other.to_string(),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let key = derive_key("hunter22!", &generate_salt(), KdfParams::default()).unwrap();
        let ciphertext = encrypt(&key, AAD_AUTH, b"top secret").unwrap();
        let plaintext = decrypt(&key, AAD_AUTH, &ciphertext).unwrap();
        assert_eq!(plaintext, b"top secret");
    }

    #[test]
    fn decrypt_fails_on_wrong_aad() {
        let key = derive_key("hunter22!", &generate_salt(), KdfParams::default()).unwrap();
        let ciphertext = encrypt(&key, AAD_AUTH, b"top secret").unwrap();
        assert!(decrypt(&key, AAD_VERIFIER, &ciphertext).is_err());
    }

    #[test]
    fn decrypt_fails_on_wrong_key() {
        let salt = generate_salt();
        let key_a = derive_key("hunter22!", &salt, KdfParams::default()).unwrap();
        let key_b = derive_key("different", &salt, KdfParams::default()).unwrap();
        let ciphertext = encrypt(&key_a, AAD_AUTH, b"top secret").unwrap();
        assert!(decrypt(&key_b, AAD_AUTH, &ciphertext).is_err());
    }

    #[test]
    fn decrypt_fails_on_tampered_ciphertext() {
        let key = derive_key("hunter22!", &generate_salt(), KdfParams::default()).unwrap();
        let mut ciphertext = encrypt(&key, AAD_AUTH, b"top secret").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xFF;
        assert!(decrypt(&key, AAD_AUTH, &ciphertext).is_err());
    }

    #[test]
    fn fingerprint_is_stable_across_reencryption() {
        let plaintext = br#"{"tokens":{"access_token":"xyz"}}"#;
        let a = fingerprint(plaintext).unwrap();
        let b = fingerprint(plaintext).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn fingerprint_ignores_key_order_and_whitespace() {
        let a = fingerprint(br#"{"tokens":{"access_token":"xyz"},"extra":1}"#).unwrap();
        let b = fingerprint(br#"{ "extra" : 1, "tokens" : { "access_token" : "xyz" } }"#).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn derive_key_is_deterministic_for_same_salt() {
        let salt = generate_salt();
        let a = derive_key("hunter22!", &salt, KdfParams::default()).unwrap();
        let b = derive_key("hunter22!", &salt, KdfParams::default()).unwrap();
        assert_eq!(a.as_ref(), b.as_ref());
    }
}

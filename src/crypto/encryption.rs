//! AES-256-GCM encryption/decryption.
//!
//! AES-GCM is Authenticated Encryption with Associated Data (AEAD): a wrong key,
//! a flipped ciphertext bit or altered associated data all fail the tag check
//! instead of producing garbage plaintext.
//!
//! - Nonce 96-bit (12 bytes), random per message
//! - Tag 128-bit (16 bytes), appended to the ciphertext

use super::key_derivation::KEY_LEN;
use crate::error::AuthError;
use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroizing;

/// Nonce length (bytes) - 96 bits
pub const NONCE_LEN: usize = 12;

/// Authentication tag length (bytes) - 128 bits
pub const TAG_LEN: usize = 16;

/// Output of `Encryptor::seal`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub nonce: [u8; NONCE_LEN],
    /// Ciphertext with the tag appended
    pub ciphertext: Vec<u8>,
}

/// Encrypts/decrypts with an already derived key.
pub struct Encryptor {
    cipher: Aes256Gcm,
}

impl Encryptor {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        Self { cipher }
    }

    /// Encrypt with a fresh random nonce, binding `aad` into the tag.
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<Sealed, AuthError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| AuthError::EncryptionFailed)?;

        Ok(Sealed { nonce, ciphertext })
    }

    /// Decrypt and verify. Every failure is the same opaque error.
    pub fn open(
        &self,
        nonce: &[u8],
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, AuthError> {
        if nonce.len() != NONCE_LEN || ciphertext.len() < TAG_LEN {
            return Err(AuthError::InvalidPassphraseOrCorrupt);
        }

        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| AuthError::InvalidPassphraseOrCorrupt)?;

        Ok(Zeroizing::new(plaintext))
    }
}

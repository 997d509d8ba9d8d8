//! Crypto module - AES-256-GCM sealing of the API token.
//!
//! This module contains:
//! - AES-256-GCM encryption/decryption with associated data
//! - Key derivation from a passphrase (PBKDF2-HMAC-SHA256, Argon2id)
//! - Salt and nonce generation

pub mod encryption;
pub mod key_derivation;

pub use encryption::{Encryptor, Sealed, NONCE_LEN, TAG_LEN};
pub use key_derivation::{derive_key, generate_salt, KdfAlgorithm, KEY_LEN, SALT_LEN};

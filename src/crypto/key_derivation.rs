//! Key derivation from the user's passphrase.
//!
//! PBKDF2-HMAC-SHA256 is the default. It is memory-light and bounded only by its
//! iteration count, which is stored with every vault so it can be raised later
//! without breaking old vaults. Argon2id stays available for vaults that opt into
//! a memory-hard KDF; there the stored count is the Argon2 time cost.

use crate::error::AuthError;
use argon2::{Argon2, Params};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

/// Salt length (bytes)
pub const SALT_LEN: usize = 16;

/// Key length (bytes) - 256 bits for AES-256
pub const KEY_LEN: usize = 32;

/// OWASP 2023 guidance for PBKDF2-HMAC-SHA256
pub const PBKDF2_DEFAULT_ITERATIONS: u32 = 600_000;

/// Argon2id time cost
pub const ARGON2_DEFAULT_ITERATIONS: u32 = 3;

/// Highest cost accepted from a vault file. Anything above is treated as damage.
pub const PBKDF2_MAX_ITERATIONS: u32 = 10_000_000;
pub const ARGON2_MAX_ITERATIONS: u32 = 64;

/// Argon2id parameters other than time cost are fixed per vault format version.
/// - Memory: 19 MiB
/// - Parallelism: 1
const ARGON2_MEMORY_KIB: u32 = 19 * 1024;
const ARGON2_PARALLELISM: u32 = 1;

/// Key derivation function recorded in the vault file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum KdfAlgorithm {
    #[default]
    Pbkdf2Sha256,
    Argon2id,
}

impl KdfAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pbkdf2Sha256 => "pbkdf2-sha256",
            Self::Argon2id => "argon2id",
        }
    }

    pub fn default_iterations(&self) -> u32 {
        match self {
            Self::Pbkdf2Sha256 => PBKDF2_DEFAULT_ITERATIONS,
            Self::Argon2id => ARGON2_DEFAULT_ITERATIONS,
        }
    }

    pub fn max_iterations(&self) -> u32 {
        match self {
            Self::Pbkdf2Sha256 => PBKDF2_MAX_ITERATIONS,
            Self::Argon2id => ARGON2_MAX_ITERATIONS,
        }
    }
}

/// Derive a 32-byte key from `passphrase`.
///
/// # Arguments
/// * `kdf` - algorithm recorded for the vault
/// * `passphrase` - the user's secret
/// * `salt` - 16 random bytes, unique per vault write
/// * `iterations` - PBKDF2 rounds or Argon2 time cost
pub fn derive_key(
    kdf: KdfAlgorithm,
    passphrase: &str,
    salt: &[u8],
    iterations: u32,
) -> Result<Zeroizing<[u8; KEY_LEN]>, AuthError> {
    if salt.len() != SALT_LEN {
        return Err(AuthError::KeyDerivation(format!(
            "salt must be {} bytes, got {}",
            SALT_LEN,
            salt.len()
        )));
    }
    if iterations == 0 {
        return Err(AuthError::KeyDerivation(
            "iteration count must be positive".to_string(),
        ));
    }
    if iterations > kdf.max_iterations() {
        return Err(AuthError::KeyDerivation(format!(
            "iteration count {} exceeds the {} limit of {}",
            iterations,
            kdf.as_str(),
            kdf.max_iterations()
        )));
    }

    let mut key = Zeroizing::new([0u8; KEY_LEN]);

    match kdf {
        KdfAlgorithm::Pbkdf2Sha256 => {
            pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, iterations, &mut key[..]);
        }
        KdfAlgorithm::Argon2id => {
            let params = Params::new(
                ARGON2_MEMORY_KIB,
                iterations,
                ARGON2_PARALLELISM,
                Some(KEY_LEN),
            )
            .map_err(|e| AuthError::KeyDerivation(format!("invalid Argon2 parameters: {}", e)))?;

            let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);
            argon2
                .hash_password_into(passphrase.as_bytes(), salt, &mut key[..])
                .map_err(|e| AuthError::KeyDerivation(e.to_string()))?;
        }
    }

    Ok(key)
}

/// Generate a random salt for key derivation.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

//! Credential vault - keeps the service API token encrypted at rest.
//!
//! The token is sealed with AES-256-GCM under a key derived from the user's
//! passphrase. Only the ciphertext and the derivation parameters are persisted;
//! the plaintext lives in an `ApiToken` that zeroes itself on drop.
//!
//! The record header (format version, KDF, iteration count, salt) is bound into
//! the authentication tag, so editing any stored parameter makes `load` fail.

use crate::crypto::{derive_key, generate_salt, Encryptor, KdfAlgorithm, NONCE_LEN, SALT_LEN};
use crate::error::AuthError;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;
use zeroize::Zeroizing;

/// Current vault record format.
pub const VAULT_VERSION: u32 = 1;

/// Decrypted API token.
///
/// Never printed: `Debug` is redacted and there is no `Display`.
pub struct ApiToken(Zeroizing<String>);

impl ApiToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Zeroizing::new(token.into()))
    }

    /// Borrow the plaintext, e.g. to build an authorization header.
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiToken(<redacted>)")
    }
}

/// Persisted vault record (`vault.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub version: u32,
    pub kdf: KdfAlgorithm,
    pub kdf_iterations: u32,
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub nonce: Vec<u8>,
    /// AES-256-GCM ciphertext with tag
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
}

impl Credential {
    /// Associated data covering every header field.
    fn associated_data(version: u32, kdf: KdfAlgorithm, iterations: u32, salt: &[u8]) -> Vec<u8> {
        let mut aad = format!(
            "taskport-vault;v={};kdf={};iterations={};salt=",
            version,
            kdf.as_str(),
            iterations
        )
        .into_bytes();
        aad.extend_from_slice(salt);
        aad
    }
}

/// Seals and opens credentials with a fixed set of KDF parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialVault {
    kdf: KdfAlgorithm,
    iterations: u32,
}

impl Default for CredentialVault {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialVault {
    /// Vault with the default KDF (PBKDF2-HMAC-SHA256, 600k rounds).
    pub fn new() -> Self {
        let kdf = KdfAlgorithm::default();
        Self {
            kdf,
            iterations: kdf.default_iterations(),
        }
    }

    pub fn with_params(kdf: KdfAlgorithm, iterations: u32) -> Self {
        Self { kdf, iterations }
    }

    pub fn kdf(&self) -> KdfAlgorithm {
        self.kdf
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Encrypt `token` under `passphrase` with a fresh salt and nonce.
    pub fn store(&self, token: &str, passphrase: &str) -> Result<Credential, AuthError> {
        if token.trim().is_empty() || passphrase.is_empty() {
            return Err(AuthError::EmptySecret);
        }

        let salt = generate_salt();
        let key = derive_key(self.kdf, passphrase, &salt, self.iterations)?;
        let aad = Credential::associated_data(VAULT_VERSION, self.kdf, self.iterations, &salt);
        let sealed = Encryptor::new(&key).seal(token.as_bytes(), &aad)?;

        debug!(
            kdf = self.kdf.as_str(),
            iterations = self.iterations,
            "Sealed API token"
        );

        Ok(Credential {
            version: VAULT_VERSION,
            kdf: self.kdf,
            kdf_iterations: self.iterations,
            salt: salt.to_vec(),
            nonce: sealed.nonce.to_vec(),
            ciphertext: sealed.ciphertext,
        })
    }

    /// Decrypt the token stored in `credential`.
    ///
    /// Uses the parameters recorded in the credential, not this vault's.
    /// A wrong passphrase and a damaged record fail the same way.
    pub fn load(&self, credential: &Credential, passphrase: &str) -> Result<ApiToken, AuthError> {
        if credential.version > VAULT_VERSION || credential.version == 0 {
            return Err(AuthError::UnsupportedVault(credential.version));
        }
        if credential.salt.len() != SALT_LEN
            || credential.nonce.len() != NONCE_LEN
            || credential.kdf_iterations == 0
            || credential.kdf_iterations > credential.kdf.max_iterations()
        {
            return Err(AuthError::InvalidPassphraseOrCorrupt);
        }

        let key = derive_key(
            credential.kdf,
            passphrase,
            &credential.salt,
            credential.kdf_iterations,
        )
        .map_err(|_| AuthError::InvalidPassphraseOrCorrupt)?;

        let aad = Credential::associated_data(
            credential.version,
            credential.kdf,
            credential.kdf_iterations,
            &credential.salt,
        );
        let plaintext = Encryptor::new(&key).open(&credential.nonce, &credential.ciphertext, &aad)?;

        let token = std::str::from_utf8(&plaintext)
            .map_err(|_| AuthError::InvalidPassphraseOrCorrupt)?;

        Ok(ApiToken::new(token))
    }

    /// Whether `credential` was sealed with weaker parameters than this vault's.
    pub fn needs_upgrade(&self, credential: &Credential) -> bool {
        credential.version < VAULT_VERSION
            || credential.kdf != self.kdf
            || credential.kdf_iterations < self.iterations
    }

    /// Re-encrypt `credential` with this vault's parameters.
    ///
    /// Fails exactly like `load` if the passphrase does not open it.
    pub fn upgrade(&self, credential: &Credential, passphrase: &str) -> Result<Credential, AuthError> {
        let token = self.load(credential, passphrase)?;
        debug!(
            from_kdf = credential.kdf.as_str(),
            from_iterations = credential.kdf_iterations,
            to_kdf = self.kdf.as_str(),
            to_iterations = self.iterations,
            "Upgrading vault parameters"
        );
        self.store(token.expose(), passphrase)
    }
}

/// Serde adapter for byte fields stored as standard base64.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::key_derivation::ARGON2_MAX_ITERATIONS;

    const TOKEN: &str = "2/1200000000000/1200000000001:0123456789abcdef";

    fn fast_vault() -> CredentialVault {
        CredentialVault::with_params(KdfAlgorithm::Pbkdf2Sha256, 1_000)
    }

    #[test]
    fn test_store_load_roundtrip() -> Result<(), AuthError> {
        let vault = fast_vault();
        let credential = vault.store(TOKEN, "correct horse")?;

        assert_eq!(credential.version, VAULT_VERSION);
        assert_eq!(credential.salt.len(), SALT_LEN);
        assert_eq!(credential.nonce.len(), NONCE_LEN);
        assert!(!credential
            .ciphertext
            .windows(TOKEN.len())
            .any(|w| w == TOKEN.as_bytes()));

        let token = vault.load(&credential, "correct horse")?;
        assert_eq!(token.expose(), TOKEN);
        Ok(())
    }

    #[test]
    fn test_store_uses_fresh_salt_and_nonce() -> Result<(), AuthError> {
        let vault = fast_vault();
        let first = vault.store(TOKEN, "pw")?;
        let second = vault.store(TOKEN, "pw")?;

        assert_ne!(first.salt, second.salt);
        assert_ne!(first.nonce, second.nonce);
        assert_ne!(first.ciphertext, second.ciphertext);
        Ok(())
    }

    #[test]
    fn test_wrong_passphrase_fails_closed() -> Result<(), AuthError> {
        let vault = fast_vault();
        let credential = vault.store(TOKEN, "right")?;

        let err = vault.load(&credential, "wrong").unwrap_err();
        assert_eq!(err, AuthError::InvalidPassphraseOrCorrupt);
        Ok(())
    }

    #[test]
    fn test_tampering_is_detected() -> Result<(), AuthError> {
        let vault = fast_vault();
        let credential = vault.store(TOKEN, "pw")?;

        let mut flipped = credential.clone();
        flipped.ciphertext[0] ^= 0x01;
        assert_eq!(
            vault.load(&flipped, "pw").unwrap_err(),
            AuthError::InvalidPassphraseOrCorrupt
        );

        // Lowering the stored cost must not be accepted silently
        let mut weakened = credential.clone();
        weakened.kdf_iterations = 999;
        assert_eq!(
            vault.load(&weakened, "pw").unwrap_err(),
            AuthError::InvalidPassphraseOrCorrupt
        );

        let mut short_salt = credential.clone();
        short_salt.salt.truncate(8);
        assert_eq!(
            vault.load(&short_salt, "pw").unwrap_err(),
            AuthError::InvalidPassphraseOrCorrupt
        );

        let mut zero_rounds = credential.clone();
        zero_rounds.kdf_iterations = 0;
        assert_eq!(
            vault.load(&zero_rounds, "pw").unwrap_err(),
            AuthError::InvalidPassphraseOrCorrupt
        );

        // Must fail before any key derivation work
        let mut huge_rounds = credential.clone();
        huge_rounds.kdf_iterations = u32::MAX;
        assert_eq!(
            vault.load(&huge_rounds, "pw").unwrap_err(),
            AuthError::InvalidPassphraseOrCorrupt
        );

        let mut huge_argon = credential;
        huge_argon.kdf = KdfAlgorithm::Argon2id;
        huge_argon.kdf_iterations = ARGON2_MAX_ITERATIONS + 1;
        assert_eq!(
            vault.load(&huge_argon, "pw").unwrap_err(),
            AuthError::InvalidPassphraseOrCorrupt
        );
        Ok(())
    }

    #[test]
    fn test_non_utf8_plaintext_is_corrupt() -> Result<(), AuthError> {
        let salt = [3u8; SALT_LEN];
        let key = derive_key(KdfAlgorithm::Pbkdf2Sha256, "pw", &salt, 1_000)?;
        let aad = Credential::associated_data(VAULT_VERSION, KdfAlgorithm::Pbkdf2Sha256, 1_000, &salt);
        let sealed = Encryptor::new(&key).seal(&[0xFF, 0xFE, 0xFD], &aad)?;

        let credential = Credential {
            version: VAULT_VERSION,
            kdf: KdfAlgorithm::Pbkdf2Sha256,
            kdf_iterations: 1_000,
            salt: salt.to_vec(),
            nonce: sealed.nonce.to_vec(),
            ciphertext: sealed.ciphertext,
        };

        assert_eq!(
            fast_vault().load(&credential, "pw").unwrap_err(),
            AuthError::InvalidPassphraseOrCorrupt
        );
        Ok(())
    }

    #[test]
    fn test_newer_version_is_unsupported() -> Result<(), AuthError> {
        let vault = fast_vault();
        let mut credential = vault.store(TOKEN, "pw")?;
        credential.version = VAULT_VERSION + 1;

        assert_eq!(
            vault.load(&credential, "pw").unwrap_err(),
            AuthError::UnsupportedVault(VAULT_VERSION + 1)
        );
        Ok(())
    }

    #[test]
    fn test_empty_secrets_rejected() {
        let vault = fast_vault();
        assert_eq!(vault.store("", "pw").unwrap_err(), AuthError::EmptySecret);
        assert_eq!(vault.store("   ", "pw").unwrap_err(), AuthError::EmptySecret);
        assert_eq!(vault.store(TOKEN, "").unwrap_err(), AuthError::EmptySecret);
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = ApiToken::new(TOKEN);
        let shown = format!("{:?}", token);
        assert!(!shown.contains("0123456789abcdef"));
        assert!(shown.contains("redacted"));
    }

    #[test]
    fn test_upgrade_is_explicit() -> Result<(), AuthError> {
        let old = fast_vault();
        let credential = old.store(TOKEN, "pw")?;

        let current = CredentialVault::with_params(KdfAlgorithm::Pbkdf2Sha256, 2_000);
        assert!(current.needs_upgrade(&credential));
        assert!(!old.needs_upgrade(&credential));

        // Loading with the stronger vault still uses the stored parameters
        let token = current.load(&credential, "pw")?;
        assert_eq!(token.expose(), TOKEN);

        let upgraded = current.upgrade(&credential, "pw")?;
        assert_eq!(upgraded.kdf_iterations, 2_000);
        assert_ne!(upgraded.salt, credential.salt);
        assert!(!current.needs_upgrade(&upgraded));
        assert_eq!(current.load(&upgraded, "pw")?.expose(), TOKEN);

        assert_eq!(
            current.upgrade(&credential, "wrong").unwrap_err(),
            AuthError::InvalidPassphraseOrCorrupt
        );
        Ok(())
    }

    #[test]
    fn test_argon2id_vault() -> Result<(), AuthError> {
        let vault = CredentialVault::with_params(KdfAlgorithm::Argon2id, 1);
        let credential = vault.store(TOKEN, "pw")?;

        assert_eq!(credential.kdf, KdfAlgorithm::Argon2id);
        assert_eq!(vault.load(&credential, "pw")?.expose(), TOKEN);
        Ok(())
    }

    #[test]
    fn test_credential_json_uses_base64() -> anyhow::Result<()> {
        let vault = fast_vault();
        let credential = vault.store(TOKEN, "pw")?;

        let json = serde_json::to_string_pretty(&credential)?;
        assert!(json.contains("\"kdf\": \"pbkdf2-sha256\""));
        assert!(!json.contains(TOKEN));

        let back: Credential = serde_json::from_str(&json)?;
        assert_eq!(back, credential);
        assert_eq!(vault.load(&back, "pw")?.expose(), TOKEN);
        Ok(())
    }
}

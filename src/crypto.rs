//! # Column Encryption
//!
//! Columns listed in a record's `encrypted_columns()` are sealed before they
//! are bound and opened after they are read. Every text-stored column takes
//! part: `String` columns directly, and `Sequence`, `Mapping` and `Temporal`
//! columns after they are rendered to JSON or formatted text. `Binary`
//! columns are sealed as raw bytes. Numeric columns are stored as-is.
//!
//! ## Key Management
//!
//! Keys come from a [`KeyProvider`]:
//! - [`PasswordKeyProvider`]: master key = SHA-256 of a password
//! - [`EnvKeyProvider`]: master key read from `ROWDB_MASTER_KEY` (64 hex chars)
//!
//! Each column gets its own key, derived from the master key with
//! HKDF-SHA256 using `table.column` as the info string. Sealing the same
//! plaintext into two different columns therefore yields unrelated ciphertexts.
//!
//! ## Sealed Layout
//!
//! ```text
//! +----------------+------------------------------+
//! | nonce (12 B)   | AES-256-GCM ciphertext + tag |
//! +----------------+------------------------------+
//! ```
//!
//! Text columns store the sealed bytes as standard base64; blob columns store
//! them raw.

use std::env;
use std::fmt;
use std::sync::Arc;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hkdf::Hkdf;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

// =============================================================================
// Constants
// =============================================================================

/// AES-256 key size in bytes.
pub const AES256_KEY_SIZE: usize = 32;

/// AES-GCM nonce size in bytes (96 bits).
pub const AES_GCM_NONCE_SIZE: usize = 12;

/// Environment variable name for the master encryption key.
pub const MASTER_KEY_ENV_VAR: &str = "ROWDB_MASTER_KEY";

/// Password used by [`PasswordKeyProvider::default`].
pub const DEFAULT_PASSWORD: &str = "1234567890abcdxyz";

// =============================================================================
// Key Provider Trait
// =============================================================================

/// Source of the master key used for column encryption.
pub trait KeyProvider: Send + Sync {
    /// Returns the master key bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be retrieved.
    fn master_key(&self) -> Result<[u8; AES256_KEY_SIZE]>;

    /// Derives the key for one column from the master key using HKDF.
    ///
    /// The salt is the first half of the master key; the info string is
    /// `table.column`.
    fn derive_column_key(&self, table: &str, column: &str) -> Result<[u8; AES256_KEY_SIZE]> {
        let master = self.master_key()?;
        let salt = &master[..16];
        let info = format!("{}.{}", table, column);

        let hk = Hkdf::<Sha256>::new(Some(salt), &master);
        let mut output = [0u8; AES256_KEY_SIZE];
        hk.expand(info.as_bytes(), &mut output)
            .map_err(|_| Error::KeyProvider("HKDF expand failed".into()))?;

        Ok(output)
    }
}

// =============================================================================
// Password Key Provider
// =============================================================================

/// Key provider deriving the master key as SHA-256 of a password.
#[derive(Clone)]
pub struct PasswordKeyProvider {
    master_key: [u8; AES256_KEY_SIZE],
}

impl PasswordKeyProvider {
    pub fn new(password: &str) -> Self {
        let digest = Sha256::digest(password.as_bytes());
        let mut master_key = [0u8; AES256_KEY_SIZE];
        master_key.copy_from_slice(&digest);
        Self { master_key }
    }
}

impl Default for PasswordKeyProvider {
    fn default() -> Self {
        Self::new(DEFAULT_PASSWORD)
    }
}

impl KeyProvider for PasswordKeyProvider {
    fn master_key(&self) -> Result<[u8; AES256_KEY_SIZE]> {
        Ok(self.master_key)
    }
}

impl fmt::Debug for PasswordKeyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordKeyProvider").finish_non_exhaustive()
    }
}

// =============================================================================
// Environment Variable Key Provider
// =============================================================================

/// Key provider that reads the master key from an environment variable.
///
/// The master key must be provided as a 64-character hex string (32 bytes)
/// in the `ROWDB_MASTER_KEY` environment variable.
///
/// # Example
///
/// ```bash
/// export ROWDB_MASTER_KEY="0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef"
/// ```
#[derive(Clone)]
pub struct EnvKeyProvider {
    master_key: [u8; AES256_KEY_SIZE],
}

impl EnvKeyProvider {
    /// Creates a new EnvKeyProvider by reading `ROWDB_MASTER_KEY`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Environment variable is not set
    /// - Value is not valid hex
    /// - Decoded length is not 32 bytes
    pub fn from_env() -> Result<Self> {
        let hex_key = env::var(MASTER_KEY_ENV_VAR).map_err(|_| {
            Error::KeyProvider(format!(
                "{} environment variable not set",
                MASTER_KEY_ENV_VAR
            ))
        })?;

        Self::from_hex(&hex_key)
    }

    /// Parses a 64-character hex key.
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let key_bytes = hex_decode(hex_key.trim()).map_err(|e| {
            Error::KeyProvider(format!("invalid hex in {}: {}", MASTER_KEY_ENV_VAR, e))
        })?;

        if key_bytes.len() != AES256_KEY_SIZE {
            return Err(Error::KeyProvider(format!(
                "{} must be {} hex characters (got {})",
                MASTER_KEY_ENV_VAR,
                AES256_KEY_SIZE * 2,
                hex_key.trim().len()
            )));
        }

        let mut master_key = [0u8; AES256_KEY_SIZE];
        master_key.copy_from_slice(&key_bytes);

        Ok(Self { master_key })
    }

    /// Creates a provider with a specific key (for testing).
    pub fn from_key(key: [u8; AES256_KEY_SIZE]) -> Self {
        Self { master_key: key }
    }
}

impl KeyProvider for EnvKeyProvider {
    fn master_key(&self) -> Result<[u8; AES256_KEY_SIZE]> {
        Ok(self.master_key)
    }
}

impl fmt::Debug for EnvKeyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvKeyProvider").finish_non_exhaustive()
    }
}

// =============================================================================
// Column Cryptor
// =============================================================================

/// Seals and opens individual column values.
///
/// Cheap to clone; the key provider is shared.
#[derive(Clone)]
pub struct ColumnCryptor {
    key_provider: Arc<dyn KeyProvider>,
}

impl ColumnCryptor {
    pub fn new(key_provider: Arc<dyn KeyProvider>) -> Self {
        Self { key_provider }
    }

    /// Encrypts `plaintext` for `table.column`, returning `nonce || ciphertext`.
    pub fn seal(&self, table: &str, column: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        let key = self.key_provider.derive_column_key(table, column)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| Error::Encryption(format!("failed to create cipher: {}", e)))?;

        let nonce = generate_nonce();
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| Error::Encryption(format!("encryption failed: {}", e)))?;

        let mut sealed = Vec::with_capacity(AES_GCM_NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypts a value produced by [`ColumnCryptor::seal`] for the same column.
    pub fn open(&self, table: &str, column: &str, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < AES_GCM_NONCE_SIZE {
            return Err(Error::Encryption(format!(
                "sealed value too short ({} bytes)",
                sealed.len()
            )));
        }

        let key = self.key_provider.derive_column_key(table, column)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| Error::Encryption(format!("failed to create cipher: {}", e)))?;

        let (nonce, ciphertext) = sealed.split_at(AES_GCM_NONCE_SIZE);
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| Error::Encryption(format!("decryption failed: {}", e)))
    }

    /// Seals a string and encodes the result as base64 text.
    pub fn seal_text(&self, table: &str, column: &str, plaintext: &str) -> Result<String> {
        let sealed = self.seal(table, column, plaintext.as_bytes())?;
        Ok(BASE64.encode(sealed))
    }

    /// Reverses [`ColumnCryptor::seal_text`].
    pub fn open_text(&self, table: &str, column: &str, encoded: &str) -> Result<String> {
        let sealed = BASE64
            .decode(encoded)
            .map_err(|e| Error::Encryption(format!("invalid base64: {}", e)))?;
        let plaintext = self.open(table, column, &sealed)?;
        String::from_utf8(plaintext)
            .map_err(|e| Error::Encryption(format!("decrypted text is not UTF-8: {}", e)))
    }
}

impl fmt::Debug for ColumnCryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnCryptor").finish_non_exhaustive()
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Generates a cryptographically secure random nonce.
fn generate_nonce() -> [u8; AES_GCM_NONCE_SIZE] {
    let mut rng = StdRng::from_entropy();
    let mut nonce = [0u8; AES_GCM_NONCE_SIZE];
    rng.fill_bytes(&mut nonce);
    nonce
}

/// Decodes a hex string into bytes.
fn hex_decode(hex: &str) -> std::result::Result<Vec<u8>, String> {
    if hex.len() % 2 != 0 {
        return Err("hex string must have even length".into());
    }
    if !hex.is_ascii() {
        return Err("hex string must be ASCII".into());
    }

    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| format!("invalid hex at position {}: {}", i, e))
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn cryptor() -> ColumnCryptor {
        ColumnCryptor::new(Arc::new(PasswordKeyProvider::new("hunter2")))
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let cryptor = cryptor();
        let sealed = cryptor.seal("users", "ssn", b"123-45-6789").unwrap();

        assert_eq!(sealed.len(), AES_GCM_NONCE_SIZE + 11 + 16);
        assert_eq!(cryptor.open("users", "ssn", &sealed).unwrap(), b"123-45-6789");
    }

    #[test]
    fn test_text_roundtrip_is_base64() {
        let cryptor = cryptor();
        let encoded = cryptor.seal_text("users", "email", "ada@example.com").unwrap();

        assert!(BASE64.decode(&encoded).is_ok());
        assert_ne!(encoded, "ada@example.com");
        assert_eq!(
            cryptor.open_text("users", "email", &encoded).unwrap(),
            "ada@example.com"
        );
    }

    #[test]
    fn test_empty_plaintext_roundtrip() {
        let cryptor = cryptor();
        let sealed = cryptor.seal("t", "c", b"").unwrap();
        assert!(cryptor.open("t", "c", &sealed).unwrap().is_empty());
    }

    #[test]
    fn test_nonces_differ() {
        let cryptor = cryptor();
        let a = cryptor.seal("t", "c", b"same").unwrap();
        let b = cryptor.seal("t", "c", b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_column_keys_are_isolated() {
        let cryptor = cryptor();
        let sealed = cryptor.seal("users", "ssn", b"secret").unwrap();

        assert!(cryptor.open("users", "email", &sealed).is_err());
        assert!(cryptor.open("accounts", "ssn", &sealed).is_err());
    }

    #[test]
    fn test_wrong_password_fails() {
        let sealed = cryptor().seal("t", "c", b"secret").unwrap();
        let other = ColumnCryptor::new(Arc::new(PasswordKeyProvider::default()));

        assert!(matches!(
            other.open("t", "c", &sealed),
            Err(Error::Encryption(_))
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let cryptor = cryptor();
        let mut sealed = cryptor.seal("t", "c", b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;

        assert!(cryptor.open("t", "c", &sealed).is_err());
        assert!(cryptor.open("t", "c", &sealed[..4]).is_err());
    }

    #[test]
    fn test_password_provider_is_sha256() {
        let provider = PasswordKeyProvider::new("abc");
        let key = provider.master_key().unwrap();
        assert_eq!(
            key[..4],
            [0xba, 0x78, 0x16, 0xbf],
            "SHA-256(\"abc\") starts with ba7816bf"
        );
    }

    #[test]
    fn test_env_provider_from_hex() {
        let hex = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
        let provider = EnvKeyProvider::from_hex(hex).unwrap();
        let key = provider.master_key().unwrap();
        assert_eq!(key[0], 0x00);
        assert_eq!(key[31], 0x1f);

        assert!(EnvKeyProvider::from_hex("abc").is_err());
        assert!(EnvKeyProvider::from_hex("zz").is_err());
        assert!(EnvKeyProvider::from_hex("0011").is_err());
    }

    #[test]
    fn test_hex_decode() {
        assert_eq!(hex_decode("00ff10").unwrap(), vec![0x00, 0xff, 0x10]);
        assert!(hex_decode("0").is_err());
        assert!(hex_decode("gg").is_err());
    }
}

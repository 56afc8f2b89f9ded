//! Content encryption for sensitive vault columns.
//!
//! Message content and note text are sealed with ChaCha20-Poly1305 when the vault
//! was created with a key. Sealed values are stored as `enc1:<hex(nonce || ciphertext)>`
//! so plaintext and ciphertext rows can be told apart.

use anyhow::{anyhow, bail, Context, Result};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

/// Key size for ChaCha20-Poly1305 (256 bits).
pub const KEY_SIZE: usize = 32;

/// Nonce size for ChaCha20-Poly1305 (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Value stored in `meta.encryption` for encrypted vaults.
pub const ENCRYPTION_MODE: &str = "chacha20poly1305";

/// Value stored in `meta.encryption` for plaintext vaults.
pub const PLAINTEXT_MODE: &str = "none";

const SEALED_PREFIX: &str = "enc1:";
const KEY_CHECK_PLAINTEXT: &str = "memvault-key-check";

/// Symmetric cipher for vault content columns.
#[derive(Clone)]
pub struct ContentCipher {
    key: [u8; KEY_SIZE],
}

impl std::fmt::Debug for ContentCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ContentCipher(..)")
    }
}

impl ContentCipher {
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Parse a 64-character hex key.
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let bytes = hex::decode(hex_key.trim()).context("encryption key is not valid hex")?;
        let key: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| anyhow!("encryption key must be {KEY_SIZE} bytes, got {}", b.len()))?;
        Ok(Self::new(key))
    }

    /// Encrypt `plaintext` under a fresh random nonce.
    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let nonce_bytes: [u8; NONCE_SIZE] = rand::random();
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| anyhow!("content encryption failed"))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(format!("{SEALED_PREFIX}{}", hex::encode(out)))
    }

    /// Decrypt a value produced by [`seal`](Self::seal).
    pub fn open(&self, sealed: &str) -> Result<String> {
        let Some(encoded) = sealed.strip_prefix(SEALED_PREFIX) else {
            bail!("value is not sealed");
        };
        let raw = hex::decode(encoded).context("sealed value is not valid hex")?;
        if raw.len() < NONCE_SIZE {
            bail!("sealed value is truncated");
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_SIZE);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| anyhow!("content decryption failed (wrong key or corrupt data)"))?;
        String::from_utf8(plaintext).context("decrypted content is not UTF-8")
    }

    /// Token stored in `meta.key_check` so a wrong key is detected at open time.
    pub fn key_check_token(&self) -> Result<String> {
        self.seal(KEY_CHECK_PLAINTEXT)
    }

    pub fn verify_key_check(&self, token: &str) -> bool {
        matches!(self.open(token), Ok(text) if text == KEY_CHECK_PLAINTEXT)
    }
}

/// Encrypt `text` if a cipher is configured; otherwise pass it through.
pub fn seal_opt(cipher: Option<&ContentCipher>, text: &str) -> Result<String> {
    match cipher {
        Some(c) => c.seal(text),
        None => Ok(text.to_string()),
    }
}

/// Decrypt `stored` when the vault is encrypted. In a plaintext vault every row is stored
/// as written, including text that happens to start with the sealed prefix.
pub fn open_opt(cipher: Option<&ContentCipher>, stored: String) -> Result<String> {
    match cipher {
        Some(c) => c.open(&stored),
        None => Ok(stored),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> ContentCipher {
        ContentCipher::new([0x42; KEY_SIZE])
    }

    #[test]
    fn sealed_text_opens_with_same_key() {
        let c = cipher();
        let sealed = c.seal("I live in Philadelphia").unwrap();
        assert!(sealed.starts_with("enc1:"));
        assert!(!sealed.contains("Philadelphia"));
        assert_eq!(c.open(&sealed).unwrap(), "I live in Philadelphia");
    }

    #[test]
    fn nonces_differ_between_seals() {
        let c = cipher();
        assert_ne!(c.seal("same").unwrap(), c.seal("same").unwrap());
    }

    #[test]
    fn wrong_key_fails_key_check() {
        let token = cipher().key_check_token().unwrap();
        let other = ContentCipher::new([0x07; KEY_SIZE]);
        assert!(cipher().verify_key_check(&token));
        assert!(!other.verify_key_check(&token));
    }

    #[test]
    fn from_hex_rejects_short_keys() {
        assert!(ContentCipher::from_hex("abcd").is_err());
        assert!(ContentCipher::from_hex(&"11".repeat(KEY_SIZE)).is_ok());
    }

    #[test]
    fn plaintext_passes_through_open_opt() {
        assert_eq!(open_opt(None, "hello".into()).unwrap(), "hello");
        assert_eq!(
            open_opt(None, "enc1: discussed encoders".into()).unwrap(),
            "enc1: discussed encoders"
        );
    }

    #[test]
    fn open_opt_with_key_requires_sealed_value() {
        let c = cipher();
        let sealed = c.seal("secret").unwrap();
        assert_eq!(open_opt(Some(&c), sealed).unwrap(), "secret");
        assert!(open_opt(Some(&c), "plain".into()).is_err());
    }
}

//! AES-GCM-256 implementation of the `edge_core::secrets::SecretCipher`
//! boundary.
//!
//! `edge_core` treats the cipher as an external collaborator (it only
//! depends on the `SecretCipher` trait); this is where the CLI layer
//! supplies a concrete implementation, keyed by `--key` or
//! `EDGE_EXT_ENCRYPTION_KEY`. Ciphertext is `base64(nonce || ciphertext)`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use edge_core::error::{EdgeError, EdgeResult};
use edge_core::secrets::SecretCipher;

const NONCE_LEN: usize = 12;

pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    /// `key` must be exactly 32 bytes. Use [`derive_key_from_passphrase`] to
    /// turn an arbitrary-length passphrase into one.
    pub fn new(key: &[u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> EdgeResult<String> {
        use rand::RngCore;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| EdgeError::Secret(format!("encryption failed: {e}")))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(combined))
    }
}

impl SecretCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &str) -> EdgeResult<String> {
        // Resolves to the inherent `encrypt` above (inherent methods take
        // priority over trait methods of the same name), not a recursive call.
        self.encrypt(plaintext)
    }

    fn decrypt(&self, ciphertext: &str) -> EdgeResult<String> {
        let combined = base64::engine::general_purpose::STANDARD
            .decode(ciphertext.trim())
            .map_err(|e| EdgeError::Secret(format!("invalid base64 ciphertext: {e}")))?;

        if combined.len() < NONCE_LEN {
            return Err(EdgeError::Secret("ciphertext too short to contain a nonce".to_string()));
        }
        let (nonce_bytes, body) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, body)
            .map_err(|e| EdgeError::Secret(format!("decryption failed: {e}")))?;

        String::from_utf8(plaintext).map_err(|e| EdgeError::Secret(format!("decrypted value is not valid UTF-8: {e}")))
    }
}

/// Derives a 32-byte AES-256 key from an arbitrary-length passphrase via
/// SHA-256, so `--key`/`EDGE_EXT_ENCRYPTION_KEY` can be a human-chosen
/// string rather than requiring raw key bytes.
pub fn derive_key_from_passphrase(passphrase: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(passphrase.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let key = derive_key_from_passphrase("correct horse battery staple");
        let cipher = AesGcmCipher::new(&key);

        let ciphertext = cipher.encrypt("super-secret-password").unwrap();
        let plaintext = cipher.decrypt(&ciphertext).unwrap();
        assert_eq!(plaintext, "super-secret-password");
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let key_a = derive_key_from_passphrase("key-a");
        let key_b = derive_key_from_passphrase("key-b");
        let cipher_a = AesGcmCipher::new(&key_a);
        let cipher_b = AesGcmCipher::new(&key_b);

        let ciphertext = cipher_a.encrypt("value").unwrap();
        assert!(cipher_b.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        let key = derive_key_from_passphrase("key");
        let cipher = AesGcmCipher::new(&key);
        assert!(cipher.decrypt("dG9vc2hvcnQ=").is_err());
    }
}

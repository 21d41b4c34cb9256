//! Secret resolution (spec §3/§4.3).
//!
//! Ported from `original_source/internal/secret-manager.go`'s
//! `SecretManager`: a decrypted name -> value map, populated either from an
//! encrypted blob (via an injected [`SecretCipher`]) or from plaintext, with
//! a `get_secret` fallback chain of map lookup -> environment variable ->
//! literal passthrough. The cipher itself is an external collaborator (spec
//! §1 scope note): this module only defines the trait boundary, the AES-GCM
//! implementation lives in the `edge_extractor` CLI crate.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::EdgeResult;

/// Decrypts/encrypts a secrets blob against a name -> value map. Implemented
/// outside `edge_core` (the CLI crate owns the actual cipher and key
/// material).
pub trait SecretCipher: Send + Sync {
    fn decrypt(&self, ciphertext: &str) -> EdgeResult<String>;
    fn encrypt(&self, plaintext: &str) -> EdgeResult<String>;
}

/// Name -> (possibly still encrypted) value pairs as they appear in a raw
/// config document, prior to decryption.
pub type RawSecrets = HashMap<String, String>;

/// Resolved secret store. `get_secret` never fails: an empty reference
/// resolves to an empty string (spec §4.3 invariant), and an unresolvable
/// name falls through to the environment, then to the reference itself
/// taken literally.
pub struct SecretStore {
    secrets: RwLock<HashMap<String, String>>,
}

impl SecretStore {
    pub fn new() -> Self {
        Self {
            secrets: RwLock::new(HashMap::new()),
        }
    }

    /// Load secrets that are already plaintext (spec §4.3's "unencrypted
    /// config" path).
    pub fn load_plain_secrets(&self, raw: RawSecrets) {
        let mut secrets = self.secrets.write();
        secrets.extend(raw);
    }

    /// Decrypt every entry in `raw` with `cipher`, loading whatever succeeds
    /// and continuing past individual failures — matching
    /// `LoadEncryptedSecrets`' "continue on per-entry error, return the last
    /// error" behavior so one bad secret doesn't block the rest.
    pub fn load_encrypted_secrets(&self, raw: &RawSecrets, cipher: &dyn SecretCipher) -> EdgeResult<()> {
        let mut last_err = None;
        let mut decrypted = HashMap::with_capacity(raw.len());

        for (name, ciphertext) in raw {
            match cipher.decrypt(ciphertext) {
                Ok(plaintext) => {
                    decrypted.insert(name.clone(), plaintext);
                }
                Err(e) => {
                    tracing::warn!(secret = %name, error = %e, "failed to decrypt secret, skipping");
                    last_err = Some(e);
                }
            }
        }

        self.secrets.write().extend(decrypted);

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Resolve a secret reference: stored value, else environment variable
    /// of the same name, else the reference taken literally. An empty
    /// reference always resolves to an empty string.
    pub fn get_secret(&self, reference: &str) -> String {
        if reference.is_empty() {
            return String::new();
        }
        if let Some(value) = self.secrets.read().get(reference) {
            return value.clone();
        }
        if let Ok(value) = std::env::var(reference) {
            return value;
        }
        reference.to_string()
    }

    /// Round-trip accessor used by `encrypt_config`/`encrypt_secret` CLI
    /// flows and diagnostics: the raw, already-decrypted map.
    pub fn all_secrets(&self) -> HashMap<String, String> {
        self.secrets.read().clone()
    }

    /// Re-encrypts every stored secret with `cipher`, the counterpart to
    /// [`Self::load_encrypted_secrets`] (spec §4.3's `GetEncryptedSecrets`).
    /// A secret that fails to encrypt is skipped and logged rather than
    /// aborting the whole export.
    pub fn get_encrypted_secrets(&self, cipher: &dyn SecretCipher) -> RawSecrets {
        let mut encrypted = HashMap::new();
        for (name, plaintext) in self.secrets.read().iter() {
            match cipher.encrypt(plaintext) {
                Ok(ciphertext) => {
                    encrypted.insert(name.clone(), ciphertext);
                }
                Err(e) => {
                    tracing::warn!(secret = %name, error = %e, "failed to encrypt secret, skipping");
                }
            }
        }
        encrypted
    }
}

impl Default for SecretStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ReverseCipher;
    impl SecretCipher for ReverseCipher {
        fn decrypt(&self, ciphertext: &str) -> EdgeResult<String> {
            Ok(ciphertext.chars().rev().collect())
        }
        fn encrypt(&self, plaintext: &str) -> EdgeResult<String> {
            Ok(plaintext.chars().rev().collect())
        }
    }

    struct FailingCipher;
    impl SecretCipher for FailingCipher {
        fn decrypt(&self, _ciphertext: &str) -> EdgeResult<String> {
            Err(crate::error::EdgeError::Secret("bad key".to_string()))
        }
        fn encrypt(&self, _plaintext: &str) -> EdgeResult<String> {
            Err(crate::error::EdgeError::Secret("bad key".to_string()))
        }
    }

    #[test]
    fn empty_reference_resolves_to_empty_string() {
        let store = SecretStore::new();
        assert_eq!(store.get_secret(""), "");
    }

    #[test]
    fn unresolved_reference_falls_back_to_literal() {
        let store = SecretStore::new();
        assert_eq!(store.get_secret("not-a-known-secret"), "not-a-known-secret");
    }

    #[test]
    fn stored_secret_takes_priority() {
        let store = SecretStore::new();
        let mut raw = RawSecrets::new();
        raw.insert("db_password".to_string(), "s3cr3t".to_string());
        store.load_plain_secrets(raw);
        assert_eq!(store.get_secret("db_password"), "s3cr3t");
    }

    #[test]
    fn encrypted_load_continues_past_individual_failures() {
        let store = SecretStore::new();
        let mut raw = RawSecrets::new();
        raw.insert("good".to_string(), "cba".to_string());
        let result = store.load_encrypted_secrets(&raw, &ReverseCipher);
        assert!(result.is_ok());
        assert_eq!(store.get_secret("good"), "abc");

        let store2 = SecretStore::new();
        let result2 = store2.load_encrypted_secrets(&raw, &FailingCipher);
        assert!(result2.is_err());
    }

    #[test]
    fn get_encrypted_secrets_round_trips_through_load_encrypted_secrets() {
        let store = SecretStore::new();
        let mut raw = RawSecrets::new();
        raw.insert("good".to_string(), "cba".to_string());
        store.load_encrypted_secrets(&raw, &ReverseCipher).unwrap();
        assert_eq!(store.get_secret("good"), "abc");

        let exported = store.get_encrypted_secrets(&ReverseCipher);
        assert_eq!(exported.get("good"), Some(&"cba".to_string()));

        let store2 = SecretStore::new();
        store2.load_encrypted_secrets(&exported, &ReverseCipher).unwrap();
        assert_eq!(store2.get_secret("good"), "abc");
    }

    #[test]
    fn get_encrypted_secrets_skips_entries_that_fail_to_encrypt() {
        let store = SecretStore::new();
        let mut raw = RawSecrets::new();
        raw.insert("good".to_string(), "cba".to_string());
        store.load_plain_secrets(raw);
        let exported = store.get_encrypted_secrets(&FailingCipher);
        assert!(exported.is_empty());
    }
}

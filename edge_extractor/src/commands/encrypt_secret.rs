//! `edge_extractor encrypt-secret`: encrypt one literal value for pasting
//! into a config document's `secrets` map.

use anyhow::Result;
use colored::Colorize;

use crate::secrets_cipher::{derive_key_from_passphrase, AesGcmCipher};

pub fn execute(plaintext: &str, passphrase: &str) -> Result<()> {
    let key = derive_key_from_passphrase(passphrase);
    let cipher = AesGcmCipher::new(&key);
    let ciphertext = cipher.encrypt(plaintext)?;
    println!("{}", ciphertext);
    eprintln!("{} store this value under `secrets` with `is_encrypted: true`", "note:".yellow().bold());
    Ok(())
}

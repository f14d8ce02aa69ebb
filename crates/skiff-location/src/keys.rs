//! User key pairs and the on-disk key directory.
//!
//! A key directory (the "prefix", `~/.skiff` by default) holds one key pair
//! per location: `<prefix>/<location>` is the base64 Ed25519 secret and
//! `<prefix>/<location>.pub` the matching public key. An optional
//! `<prefix>/default_location` names the location to use when none is given.

use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey, SECRET_KEY_LENGTH};
use rand::rngs::OsRng;

use crate::error::{LocationError, Result};

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// The user's signing key for one location.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    /// Generate a fresh key pair.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Load the key pair for `location` from `prefix`.
    ///
    /// When a `.pub` file is present it must match the secret.
    pub fn load(prefix: &Path, location: &str) -> Result<Self> {
        let secret_path = prefix.join(location);
        let secret = fs::read_to_string(&secret_path).map_err(|e| {
            LocationError::Keys(format!("cannot read {}: {e}", secret_path.display()))
        })?;
        let bytes = B64
            .decode(secret.trim())
            .map_err(|e| LocationError::Keys(format!("{}: {e}", secret_path.display())))?;
        let seed: [u8; SECRET_KEY_LENGTH] = bytes.as_slice().try_into().map_err(|_| {
            LocationError::Keys(format!(
                "{}: expected {SECRET_KEY_LENGTH} bytes, got {}",
                secret_path.display(),
                bytes.len()
            ))
        })?;
        let pair = Self {
            signing: SigningKey::from_bytes(&seed),
        };

        let public_path = prefix.join(format!("{location}.pub"));
        if let Ok(public) = fs::read_to_string(&public_path) {
            if public.trim() != pair.public_base64() {
                return Err(LocationError::Keys(format!(
                    "{} does not match its secret key",
                    public_path.display()
                )));
            }
        }
        Ok(pair)
    }

    /// Write the key pair for `location` into `prefix`.
    pub fn save(&self, prefix: &Path, location: &str) -> Result<()> {
        fs::create_dir_all(prefix)?;
        fs::write(prefix.join(location), B64.encode(self.signing.to_bytes()))?;
        fs::write(prefix.join(format!("{location}.pub")), self.public_base64())?;
        Ok(())
    }

    /// The public half.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// The public key as base64, as sent in the handshake.
    #[must_use]
    pub fn public_base64(&self) -> String {
        B64.encode(self.verifying_key().as_bytes())
    }

    /// Sign a message.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing.sign(message)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let public = self.public_base64();
        write!(f, "KeyPair({}...)", &public[..8.min(public.len())])
    }
}

/// Check a base64 signature over `message` against a base64 public key.
pub fn verify(public_key: &str, message: &[u8], signature: &str) -> Result<()> {
    let key_bytes = B64
        .decode(public_key)
        .map_err(|e| LocationError::Keys(format!("public key: {e}")))?;
    let key_bytes: [u8; 32] = key_bytes
        .as_slice()
        .try_into()
        .map_err(|_| LocationError::Keys("public key has the wrong length".into()))?;
    let key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| LocationError::Keys(format!("public key: {e}")))?;
    let sig_bytes = B64
        .decode(signature)
        .map_err(|e| LocationError::Keys(format!("signature: {e}")))?;
    let signature = Signature::from_slice(&sig_bytes)
        .map_err(|e| LocationError::Keys(format!("signature: {e}")))?;
    key.verify(message, &signature)
        .map_err(|e| LocationError::Keys(format!("bad signature: {e}")))
}

/// The default key directory, `~/.skiff`.
#[must_use]
pub fn default_prefix() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".skiff")
}

/// The location named in `<prefix>/default_location`.
pub fn default_location(prefix: &Path) -> Result<String> {
    let path = prefix.join("default_location");
    let name = fs::read_to_string(&path).map_err(|e| {
        LocationError::Config(format!(
            "no location given and {} is unreadable: {e}",
            path.display()
        ))
    })?;
    let name = name.trim();
    if name.is_empty() {
        return Err(LocationError::Config(format!("{} is empty", path.display())));
    }
    Ok(name.to_string())
}

/// Every location that has a complete key pair in `prefix`, sorted.
pub fn all_locations(prefix: &Path) -> Result<Vec<String>> {
    let names: Vec<String> = fs::read_dir(prefix)?
        .filter_map(std::result::Result::ok)
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    let mut locations: Vec<String> = names
        .iter()
        .filter(|n| !n.ends_with(".pub"))
        .filter(|n| names.contains(&format!("{n}.pub")))
        .cloned()
        .collect();
    locations.sort();
    Ok(locations)
}

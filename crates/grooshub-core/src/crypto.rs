//! At-rest encryption for summaries and memory payloads.
//!
//! Every organization gets its own AES-256-GCM key, derived from a single
//! master secret with PBKDF2-HMAC-SHA256 and an org-specific salt. Stored
//! payloads are `base64(nonce || ciphertext || tag)`.
//!
//! When no master secret is configured the [`Encryptor`] is disabled:
//! [`Encryptor::seal`] passes text through and marks it unencrypted, while
//! any attempt to decrypt a record flagged as encrypted fails hard.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::EncryptionConfig;
use crate::error::{GroosHubError, Result};

const DEFAULT_KEY_ENV_VAR: &str = "GROOSHUB_ENCRYPTION_KEY";
const KEY_LEN: usize = 32;
const TAG_LEN: usize = 16;
const SALT_PREFIX: &str = "grooshub:org:";

/// Result of [`Encryptor::seal`]: the stored text and whether it is ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub data: String,
    pub encrypted: bool,
}

pub struct Encryptor {
    master_key: Option<Vec<u8>>,
    iterations: NonZeroU32,
    rng: SystemRandom,
    org_keys: Mutex<HashMap<String, [u8; KEY_LEN]>>,
}

impl std::fmt::Debug for Encryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encryptor")
            .field("enabled", &self.is_enabled())
            .field("iterations", &self.iterations)
            .finish()
    }
}

impl Encryptor {
    /// Build an encryptor from configuration. Missing keys yield a disabled
    /// encryptor rather than an error.
    pub fn from_config(config: &EncryptionConfig) -> Result<Self> {
        let iterations = NonZeroU32::new(config.iterations).ok_or_else(|| {
            GroosHubError::Config("encryption.iterations must be greater than zero".into())
        })?;

        if !config.enabled {
            tracing::debug!("encryption disabled by configuration");
            return Ok(Self::build(None, iterations));
        }

        match resolve_master_key(config) {
            Some(key) => Ok(Self::build(Some(key.into_bytes()), iterations)),
            None => {
                tracing::warn!(
                    "no encryption master key configured; summaries and memories will be stored unencrypted"
                );
                Ok(Self::build(None, iterations))
            }
        }
    }

    /// An encryptor that never encrypts.
    pub fn disabled() -> Self {
        Self::build(None, default_iterations())
    }

    /// An enabled encryptor with an explicit master secret.
    pub fn with_master_key(master_key: &str, iterations: u32) -> Result<Self> {
        if master_key.is_empty() {
            return Err(GroosHubError::Config(
                "encryption master key cannot be empty".into(),
            ));
        }
        let iterations = NonZeroU32::new(iterations).ok_or_else(|| {
            GroosHubError::Config("encryption.iterations must be greater than zero".into())
        })?;
        Ok(Self::build(Some(master_key.as_bytes().to_vec()), iterations))
    }

    fn build(master_key: Option<Vec<u8>>, iterations: NonZeroU32) -> Self {
        Self {
            master_key,
            iterations,
            rng: SystemRandom::new(),
            org_keys: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.master_key.is_some()
    }

    /// Derive (or fetch from cache) the AES-256 key for one organization.
    pub fn derive_org_key(&self, org_id: &str) -> Result<[u8; KEY_LEN]> {
        let master = self.master_key.as_deref().ok_or_else(not_configured)?;
        if org_id.trim().is_empty() {
            return Err(GroosHubError::InvalidInput(
                "organization id is required for encryption".into(),
            ));
        }

        let mut cache = self
            .org_keys
            .lock()
            .map_err(|e| GroosHubError::Encryption(format!("key cache poisoned: {e}")))?;
        if let Some(key) = cache.get(org_id) {
            return Ok(*key);
        }

        let salt = format!("{SALT_PREFIX}{org_id}");
        let mut key = [0u8; KEY_LEN];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            self.iterations,
            salt.as_bytes(),
            master,
            &mut key,
        );
        cache.insert(org_id.to_string(), key);
        tracing::debug!(org_id, "derived organization encryption key");
        Ok(key)
    }

    /// Encrypt `plaintext` for `org_id`. Fails when encryption is disabled.
    pub fn encrypt(&self, plaintext: &str, org_id: &str) -> Result<String> {
        let key = self.sealing_key(org_id)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| GroosHubError::Encryption("random nonce generation failed".into()))?;

        let mut in_out = plaintext.as_bytes().to_vec();
        key.seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut in_out,
        )
        .map_err(|_| GroosHubError::Encryption("AES-256-GCM encryption failed".into()))?;

        let mut packed = Vec::with_capacity(NONCE_LEN + in_out.len());
        packed.extend_from_slice(&nonce_bytes);
        packed.extend_from_slice(&in_out);
        Ok(STANDARD.encode(packed))
    }

    /// Decrypt a payload produced by [`Encryptor::encrypt`] for the same org.
    pub fn decrypt(&self, payload: &str, org_id: &str) -> Result<String> {
        let key = self.sealing_key(org_id)?;

        let packed = STANDARD
            .decode(payload.trim())
            .map_err(|e| GroosHubError::Encryption(format!("invalid ciphertext encoding: {e}")))?;
        if packed.len() < NONCE_LEN + TAG_LEN {
            return Err(GroosHubError::Encryption("ciphertext too short".into()));
        }

        let (nonce_bytes, sealed) = packed.split_at(NONCE_LEN);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);

        let mut in_out = sealed.to_vec();
        let plaintext = key
            .open_in_place(Nonce::assume_unique_for_key(nonce), Aad::empty(), &mut in_out)
            .map_err(|_| {
                GroosHubError::Encryption(
                    "decryption failed: wrong key or tampered ciphertext".into(),
                )
            })?;

        String::from_utf8(plaintext.to_vec())
            .map_err(|e| GroosHubError::Encryption(format!("decrypted data is not UTF-8: {e}")))
    }

    pub fn encrypt_json<T: Serialize>(&self, value: &T, org_id: &str) -> Result<String> {
        let json = serde_json::to_string(value)?;
        self.encrypt(&json, org_id)
    }

    pub fn decrypt_json<T: DeserializeOwned>(&self, payload: &str, org_id: &str) -> Result<T> {
        let json = self.decrypt(payload, org_id)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Encrypt when enabled, otherwise pass `text` through unflagged.
    pub fn seal(&self, text: &str, org_id: &str) -> Result<Sealed> {
        if !self.is_enabled() {
            return Ok(Sealed {
                data: text.to_string(),
                encrypted: false,
            });
        }
        Ok(Sealed {
            data: self.encrypt(text, org_id)?,
            encrypted: true,
        })
    }

    pub fn seal_json<T: Serialize>(&self, value: &T, org_id: &str) -> Result<Sealed> {
        let json = serde_json::to_string(value)?;
        self.seal(&json, org_id)
    }

    /// Inverse of [`Encryptor::seal`]. A record flagged as encrypted always
    /// goes through decryption and fails without a key.
    pub fn open(&self, data: &str, encrypted: bool, org_id: &str) -> Result<String> {
        if encrypted {
            self.decrypt(data, org_id)
        } else {
            Ok(data.to_string())
        }
    }

    pub fn open_json<T: DeserializeOwned>(
        &self,
        data: &str,
        encrypted: bool,
        org_id: &str,
    ) -> Result<T> {
        let json = self.open(data, encrypted, org_id)?;
        Ok(serde_json::from_str(&json)?)
    }

    fn sealing_key(&self, org_id: &str) -> Result<LessSafeKey> {
        let key = self.derive_org_key(org_id)?;
        let unbound = UnboundKey::new(&AES_256_GCM, &key)
            .map_err(|_| GroosHubError::Encryption("invalid AES-256-GCM key".into()))?;
        Ok(LessSafeKey::new(unbound))
    }
}

/// Generate a fresh random master secret, base64-encoded.
pub fn generate_master_key() -> Result<String> {
    let mut key = [0u8; KEY_LEN];
    SystemRandom::new()
        .fill(&mut key)
        .map_err(|_| GroosHubError::Encryption("random key generation failed".into()))?;
    Ok(STANDARD.encode(key))
}

fn resolve_master_key(config: &EncryptionConfig) -> Option<String> {
    if let Some(ref key) = config.master_key {
        if !key.is_empty() {
            return Some(key.clone());
        }
    }
    let env_var = config.env_var.as_deref().unwrap_or(DEFAULT_KEY_ENV_VAR);
    std::env::var(env_var).ok().filter(|k| !k.is_empty())
}

fn not_configured() -> GroosHubError {
    GroosHubError::Encryption(
        "record is encrypted but no encryption master key is configured".into(),
    )
}

fn default_iterations() -> NonZeroU32 {
    NonZeroU32::new(EncryptionConfig::default().iterations).unwrap_or(NonZeroU32::MIN)
}

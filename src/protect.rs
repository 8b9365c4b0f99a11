//! Passphrase protection of secret key material.
//!
//! Protected material stays encrypted inside the key record. "Unlocking"
//! only caches the verified passphrase so that signing and decryption can
//! hand it to rpgp; `lock` drops the cached passphrase again.

use pgp::crypto::aead::AeadAlgorithm;
use pgp::crypto::hash::HashAlgorithm;
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use pgp::types::{Password, S2kParams, StringToKey};
use rand::{thread_rng, RngCore};
use secrecy::{ExposeSecret, SecretString};

use crate::error::{Error, Result};
use crate::ffi::Ffi;
use crate::handle::KeyHandle;
use crate::key::{s2k_count_encode, with_secret, KeyRef, SecretPart};
use crate::types::{
    cipher_from_name, hash_from_name, ProtectionMode, DEFAULT_CIPHER, DEFAULT_HASH,
    DEFAULT_S2K_ITERATIONS,
};

/// S2K parameters used to encrypt secret material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ProtectionParams {
    pub(crate) cipher: SymmetricKeyAlgorithm,
    pub(crate) mode: ProtectionMode,
    pub(crate) hash: HashAlgorithm,
    pub(crate) iterations: usize,
}

impl Default for ProtectionParams {
    fn default() -> Self {
        Self {
            cipher: DEFAULT_CIPHER,
            mode: ProtectionMode::Cfb,
            hash: DEFAULT_HASH,
            iterations: DEFAULT_S2K_ITERATIONS,
        }
    }
}

impl ProtectionParams {
    /// Resolve optional names, falling back to the defaults.
    pub(crate) fn from_names(
        cipher: Option<&str>,
        mode: Option<&str>,
        hash: Option<&str>,
        iterations: usize,
    ) -> Result<Self> {
        let mut params = Self::default();
        if let Some(name) = cipher {
            params.cipher = cipher_from_name(name)
                .ok_or_else(|| Error::BadParameters(format!("unknown cipher: {}", name)))?;
        }
        if let Some(name) = mode {
            params.mode = ProtectionMode::from_name(name)
                .ok_or_else(|| Error::BadParameters(format!("unknown protection mode: {}", name)))?;
        }
        if let Some(name) = hash {
            params.hash = hash_from_name(name)
                .ok_or_else(|| Error::BadParameters(format!("unknown hash algorithm: {}", name)))?;
        }
        if iterations != 0 {
            params.iterations = iterations;
        }
        Ok(params)
    }

    fn s2k_params(&self) -> S2kParams {
        let mut rng = thread_rng();
        let mut salt = [0u8; 8];
        rng.fill_bytes(&mut salt);
        let s2k = StringToKey::IteratedAndSalted {
            hash_alg: self.hash,
            salt,
            count: s2k_count_encode(self.iterations),
        };
        match self.mode {
            ProtectionMode::Cfb => {
                let mut iv = vec![0u8; self.cipher.block_size()];
                rng.fill_bytes(&mut iv);
                S2kParams::Cfb {
                    sym_alg: self.cipher,
                    s2k,
                    iv: iv.into(),
                }
            }
            ProtectionMode::Ocb => {
                let aead_mode = AeadAlgorithm::Ocb;
                let mut nonce = vec![0u8; aead_mode.nonce_size()];
                rng.fill_bytes(&mut nonce);
                S2kParams::Aead {
                    sym_alg: self.cipher,
                    aead_mode,
                    s2k,
                    nonce: nonce.into(),
                }
            }
        }
    }

    /// Encrypt cleartext secret material under `password`.
    pub(crate) fn apply(&self, secret: &mut SecretPart, password: &str) -> Result<()> {
        if secret.is_protected() {
            return Err(Error::BadState("secret key is already protected".to_string()));
        }
        let password = Password::from(password);
        let params = self.s2k_params();
        with_secret!(secret, k => k.set_password_with_s2k(&password, params))
            .map_err(|e| Error::Generic(format!("failed to protect key: {}", e)))
    }
}

/// Passphrase that opens the secret material of record `id`.
///
/// Cleartext and unlocked keys need no prompt; otherwise the password
/// provider is asked with `context` and the answer is checked.
pub(crate) fn secret_password(ffi: &mut Ffi, id: KeyRef, context: &str) -> Result<Password> {
    let key = ffi.secring.get(id).ok_or(Error::NoSuitableKey)?;
    if let Some(password) = key.usable_password() {
        return Ok(password);
    }
    let secret = key.secret.clone().ok_or(Error::NoSuitableKey)?;
    let answer = ffi.ask_password(Some(id), context).ok_or(Error::BadPassword)?;
    let password = Password::from(answer.expose_secret().as_str());
    secret.check_password(&password)?;
    Ok(password)
}

impl KeyHandle {
    /// Encrypt the secret material under a new passphrase.
    ///
    /// Already protected material is opened first with the cached or
    /// provider-supplied passphrase (context "protect").
    ///
    /// # Arguments
    /// * `password` - New passphrase, must not be empty
    /// * `cipher`, `mode`, `hash` - S2K parameters; defaults are AES256, CFB, SHA256
    /// * `iterations` - S2K iteration count, 0 for the default
    pub fn protect(
        &mut self,
        ffi: &mut Ffi,
        password: &str,
        cipher: Option<&str>,
        mode: Option<&str>,
        hash: Option<&str>,
        iterations: usize,
    ) -> Result<()> {
        if password.is_empty() {
            return Err(Error::BadParameters("empty password".to_string()));
        }
        let params = ProtectionParams::from_names(cipher, mode, hash, iterations)?;
        let id = self.require_secret(ffi)?;
        let current = secret_password(ffi, id, "protect")?;

        let key = ffi.secring.get(id).ok_or(Error::NoSuitableKey)?;
        let mut secret = key.secret.clone().ok_or(Error::NoSuitableKey)?;
        if secret.is_protected() {
            with_secret!(&mut secret, k => k.remove_password(&current)).map_err(|_| Error::BadPassword)?;
        }
        params.apply(&mut secret, password)?;

        let key = ffi.secring.get_mut(id).ok_or(Error::NoSuitableKey)?;
        key.secret = Some(secret);
        key.unlocked = None;
        let message = format!("protected key {}", key.keyid_hex());
        ffi.log_line(message);
        Ok(())
    }

    /// Decrypt the secret material in place.
    ///
    /// Without `password` the provider is asked with context "unprotect".
    ///
    /// # Errors
    /// [`Error::BadPassword`] if no passphrase is supplied or it is wrong;
    /// the key then stays protected.
    pub fn unprotect(&mut self, ffi: &mut Ffi, password: Option<&str>) -> Result<()> {
        let id = self.require_secret(ffi)?;
        let key = ffi.secring.get(id).ok_or(Error::NoSuitableKey)?;
        if !key.is_protected() {
            return Ok(());
        }
        let password = match password {
            Some(pw) => Password::from(pw),
            None => {
                let answer = ffi.ask_password(Some(id), "unprotect").ok_or(Error::BadPassword)?;
                Password::from(answer.expose_secret().as_str())
            }
        };

        let key = ffi.secring.get(id).ok_or(Error::NoSuitableKey)?;
        let mut secret = key.secret.clone().ok_or(Error::NoSuitableKey)?;
        secret.check_password(&password)?;
        with_secret!(&mut secret, k => k.remove_password(&password)).map_err(|_| Error::BadPassword)?;

        let key = ffi.secring.get_mut(id).ok_or(Error::NoSuitableKey)?;
        key.secret = Some(secret);
        key.unlocked = None;
        let message = format!("unprotected key {}", key.keyid_hex());
        ffi.log_line(message);
        Ok(())
    }

    /// Check and cache the passphrase so secret operations need no prompt.
    ///
    /// Without `password` the provider is asked with context "unlock".
    pub fn unlock(&mut self, ffi: &mut Ffi, password: Option<&str>) -> Result<()> {
        let id = self.require_secret(ffi)?;
        let key = ffi.secring.get(id).ok_or(Error::NoSuitableKey)?;
        if !key.is_protected() {
            return Ok(());
        }
        let answer = match password {
            Some(pw) => SecretString::new(pw.to_string()),
            None => ffi.ask_password(Some(id), "unlock").ok_or(Error::BadPassword)?,
        };

        let key = ffi.secring.get_mut(id).ok_or(Error::NoSuitableKey)?;
        let secret = key.secret.as_ref().ok_or(Error::NoSuitableKey)?;
        secret.check_password(&Password::from(answer.expose_secret().as_str()))?;
        key.unlocked = Some(answer);
        log::debug!("unlocked key {}", key.keyid_hex());
        Ok(())
    }

    /// Drop the cached passphrase.
    pub fn lock(&mut self, ffi: &mut Ffi) -> Result<()> {
        let id = self.require_secret(ffi)?;
        let key = ffi.secring.get_mut(id).ok_or(Error::NoSuitableKey)?;
        key.unlocked = None;
        log::debug!("locked key {}", key.keyid_hex());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_defaults() {
        let params = ProtectionParams::from_names(None, None, None, 0).unwrap();
        assert_eq!(params, ProtectionParams::default());
        assert_eq!(params.iterations, DEFAULT_S2K_ITERATIONS);
    }

    #[test]
    fn test_params_by_name() {
        let params = ProtectionParams::from_names(Some("aes128"), Some("cfb"), Some("sha512"), 4096).unwrap();
        assert_eq!(params.cipher, SymmetricKeyAlgorithm::AES128);
        assert_eq!(params.hash, HashAlgorithm::Sha512);
        assert_eq!(params.iterations, 4096);
    }

    #[test]
    fn test_mode_selects_s2k_usage() {
        let cfb = ProtectionParams::from_names(None, Some("cfb"), None, 0).unwrap();
        assert!(matches!(cfb.s2k_params(), S2kParams::Cfb { .. }));

        let ocb = ProtectionParams::from_names(Some("AES128"), Some("ocb"), None, 0).unwrap();
        assert_eq!(ocb.mode, ProtectionMode::Ocb);
        match ocb.s2k_params() {
            S2kParams::Aead { sym_alg, aead_mode, nonce, .. } => {
                assert_eq!(sym_alg, SymmetricKeyAlgorithm::AES128);
                assert_eq!(aead_mode, AeadAlgorithm::Ocb);
                assert_eq!(nonce.len(), AeadAlgorithm::Ocb.nonce_size());
            }
            other => panic!("unexpected S2K parameters: {:?}", other),
        }
    }

    #[test]
    fn test_params_reject_unknown_names() {
        assert!(ProtectionParams::from_names(Some("rot13"), None, None, 0).is_err());
        assert!(ProtectionParams::from_names(None, Some("CBC"), None, 0).is_err());
        assert!(ProtectionParams::from_names(None, None, Some("crc32"), 0).is_err());
    }
}

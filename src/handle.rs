//! Key, user id and signature handles.
//!
//! A [`KeyHandle`] pairs the public and secret records of one key by
//! [`KeyRef`]. Handles never own key material: every accessor takes the
//! owning [`Ffi`], and a reference to a record that has since been removed
//! simply stops resolving.
//!
//! Metadata getters look at the public half when it is loaded and fall back
//! to the secret half, so they never trigger a password prompt or a key
//! provider request.

use pgp::packet::{RevocationCode, Signature, SignatureType};

use crate::error::{Error, Result};
use crate::ffi::Ffi;
use crate::internal::{signature_created, signature_expiration, signature_issuer};
use crate::key::{Key, KeyRef};
use crate::locator::KeyLocator;
use crate::types::{hash_name, revocation_code_text, signature_type_name, KeyUsage, PublicKeyAlg, RemoveFlags};

/// Reference to the public and/or secret half of one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHandle {
    pub(crate) public: Option<KeyRef>,
    pub(crate) secret: Option<KeyRef>,
    /// Locator the handle was created from, used to re-resolve halves.
    pub(crate) locator: KeyLocator,
}

impl KeyHandle {
    pub(crate) fn new(public: Option<KeyRef>, secret: Option<KeyRef>, locator: KeyLocator) -> Self {
        Self {
            public,
            secret,
            locator,
        }
    }

    /// Handle for a record, picking up the other half by grip.
    pub(crate) fn for_key(ffi: &Ffi, key: &Key) -> Self {
        let grip = key.grip();
        Self {
            public: ffi.pubring.by_grip(&grip).map(|k| k.id),
            secret: ffi.secring.by_grip(&grip).map(|k| k.id),
            locator: KeyLocator::Grip(grip),
        }
    }

    pub(crate) fn public_key<'f>(&self, ffi: &'f Ffi) -> Option<&'f Key> {
        self.public.and_then(|id| ffi.pubring.get(id))
    }

    pub(crate) fn secret_key<'f>(&self, ffi: &'f Ffi) -> Option<&'f Key> {
        self.secret.and_then(|id| ffi.secring.get(id))
    }

    /// The public half if loaded, else the secret half.
    pub(crate) fn any_key<'f>(&self, ffi: &'f Ffi) -> Result<&'f Key> {
        self.public_key(ffi)
            .or_else(|| self.secret_key(ffi))
            .ok_or(Error::KeyNotFound)
    }

    /// Resolve the public half, searching by grip, fingerprint and key id of
    /// the secret half (or by the original locator) when it is not cached.
    /// The result is cached in the handle.
    pub(crate) fn require_public(&mut self, ffi: &mut Ffi) -> Result<KeyRef> {
        if let Some(id) = self.public.filter(|id| ffi.pubring.get(*id).is_some()) {
            return Ok(id);
        }
        let found = self.resolve_other_half(ffi, false);
        self.public = found;
        found.ok_or(Error::NoSuitableKey)
    }

    /// Resolve the secret half. Counterpart of [`require_public`](Self::require_public).
    pub(crate) fn require_secret(&mut self, ffi: &mut Ffi) -> Result<KeyRef> {
        if let Some(id) = self.secret.filter(|id| ffi.secring.get(*id).is_some()) {
            return Ok(id);
        }
        let found = self.resolve_other_half(ffi, true);
        self.secret = found;
        found.ok_or(Error::NoSuitableKey)
    }

    /// Public half if it can be resolved, else the secret half.
    pub(crate) fn prefer_public(&mut self, ffi: &mut Ffi) -> Result<KeyRef> {
        self.require_public(ffi).or_else(|_| self.require_secret(ffi))
    }

    fn resolve_other_half(&self, ffi: &mut Ffi, secret: bool) -> Option<KeyRef> {
        let known = if secret {
            self.public_key(ffi)
        } else {
            self.secret_key(ffi)
        };
        match known.map(|k| (k.grip(), k.fingerprint(), k.keyid())) {
            Some((grip, fingerprint, keyid)) => {
                if let Some(key) = ffi.store(secret).by_grip(&grip) {
                    return Some(key.id);
                }
                ffi.find_key(&KeyLocator::Fingerprint(fingerprint), secret, true)
                    .or_else(|| ffi.find_key(&KeyLocator::KeyId(keyid), secret, true))
            }
            None => ffi.find_key(&self.locator, secret, true),
        }
    }

    pub fn have_public(&self, ffi: &Ffi) -> bool {
        self.public_key(ffi).is_some()
    }

    pub fn have_secret(&self, ffi: &Ffi) -> bool {
        self.secret_key(ffi).is_some()
    }

    pub fn get_alg(&self, ffi: &Ffi) -> Result<&'static str> {
        Ok(self.any_key(ffi)?.algorithm_name())
    }

    pub fn get_bits(&self, ffi: &Ffi) -> Result<usize> {
        Ok(self.any_key(ffi)?.bits())
    }

    /// Curve name of an EC key.
    ///
    /// # Errors
    /// [`Error::BadParameters`] for keys without a curve.
    pub fn get_curve(&self, ffi: &Ffi) -> Result<&'static str> {
        self.any_key(ffi)?
            .curve()
            .map(|c| c.as_str())
            .ok_or_else(|| Error::BadParameters("key has no curve".to_string()))
    }

    pub fn get_fprint(&self, ffi: &Ffi) -> Result<String> {
        Ok(self.any_key(ffi)?.fingerprint_hex())
    }

    pub fn get_keyid(&self, ffi: &Ffi) -> Result<String> {
        Ok(self.any_key(ffi)?.keyid_hex())
    }

    pub fn get_grip(&self, ffi: &Ffi) -> Result<String> {
        Ok(self.any_key(ffi)?.grip().to_hex())
    }

    /// Grip of the primary key, `None` for primary keys.
    pub fn get_primary_grip(&self, ffi: &Ffi) -> Result<Option<String>> {
        Ok(self.any_key(ffi)?.primary_grip().map(|g| g.to_hex()))
    }

    /// Fingerprint of the primary key, `None` for primary keys.
    ///
    /// # Errors
    /// [`Error::KeyNotFound`] if the primary is not loaded.
    pub fn get_primary_fprint(&self, ffi: &Ffi) -> Result<Option<String>> {
        let Some(grip) = self.any_key(ffi)?.primary_grip() else {
            return Ok(None);
        };
        ffi.pubring
            .by_grip(&grip)
            .or_else(|| ffi.secring.by_grip(&grip))
            .map(|k| Some(k.fingerprint_hex()))
            .ok_or(Error::KeyNotFound)
    }

    pub fn get_creation(&self, ffi: &Ffi) -> Result<u32> {
        Ok(self.any_key(ffi)?.creation())
    }

    /// Seconds after creation at which the key expires, 0 for never.
    pub fn get_expiration(&self, ffi: &Ffi) -> Result<u32> {
        Ok(self.any_key(ffi)?.expiration())
    }

    pub fn is_primary(&self, ffi: &Ffi) -> Result<bool> {
        Ok(self.any_key(ffi)?.is_primary())
    }

    pub fn is_sub(&self, ffi: &Ffi) -> Result<bool> {
        Ok(self.any_key(ffi)?.is_sub())
    }

    /// Whether the key carries a usage flag ("sign", "certify", "encrypt",
    /// "authenticate").
    pub fn allows_usage(&self, ffi: &Ffi, usage: &str) -> Result<bool> {
        let wanted = KeyUsage::from_name(usage)
            .ok_or_else(|| Error::BadParameters(format!("unknown key usage: {}", usage)))?;
        Ok(wanted.is_subset_of(&self.any_key(ffi)?.usage()))
    }

    pub fn is_revoked(&self, ffi: &Ffi) -> Result<bool> {
        Ok(self.any_key(ffi)?.is_revoked())
    }

    fn revocation(&self, ffi: &Ffi) -> Result<(RevocationCode, String)> {
        self.any_key(ffi)?
            .revocation()
            .ok_or_else(|| Error::BadParameters("key is not revoked".to_string()))
    }

    /// Reason text of the revocation.
    ///
    /// # Errors
    /// [`Error::BadParameters`] if the key is not revoked.
    pub fn get_revocation_reason(&self, ffi: &Ffi) -> Result<String> {
        let (code, reason) = self.revocation(ffi)?;
        if reason.is_empty() {
            Ok(revocation_code_text(code).to_string())
        } else {
            Ok(reason)
        }
    }

    /// The superseded, compromised and retired checks fail with
    /// [`Error::BadParameters`] on keys that are not revoked.
    pub fn is_superseded(&self, ffi: &Ffi) -> Result<bool> {
        Ok(self.revocation(ffi)?.0 == RevocationCode::KeySuperseded)
    }

    pub fn is_compromised(&self, ffi: &Ffi) -> Result<bool> {
        Ok(self.revocation(ffi)?.0 == RevocationCode::KeyCompromised)
    }

    pub fn is_retired(&self, ffi: &Ffi) -> Result<bool> {
        Ok(self.revocation(ffi)?.0 == RevocationCode::KeyRetired)
    }

    pub fn get_subkey_count(&self, ffi: &Ffi) -> Result<usize> {
        Ok(self.any_key(ffi)?.subkey_grips().len())
    }

    /// Handle to the subkey at `idx`.
    pub fn get_subkey_at(&self, ffi: &mut Ffi, idx: usize) -> Result<KeyHandle> {
        let grip = *self
            .any_key(ffi)?
            .subkey_grips()
            .get(idx)
            .ok_or_else(|| Error::BadParameters(format!("no subkey at index {}", idx)))?;
        ffi.locate(&KeyLocator::Grip(grip))?.ok_or(Error::KeyNotFound)
    }

    pub fn get_uid_count(&self, ffi: &Ffi) -> Result<usize> {
        Ok(self.any_key(ffi)?.users.len())
    }

    pub fn get_uid_at(&self, ffi: &Ffi, idx: usize) -> Result<String> {
        self.any_key(ffi)?
            .uids()
            .get(idx)
            .cloned()
            .ok_or_else(|| Error::BadParameters(format!("no user id at index {}", idx)))
    }

    pub fn get_primary_uid(&self, ffi: &Ffi) -> Result<String> {
        self.any_key(ffi)?
            .primary_uid()
            .ok_or_else(|| Error::BadParameters("key has no user ids".to_string()))
    }

    pub fn get_uid_handle_at(&self, ffi: &Ffi, idx: usize) -> Result<UidHandle> {
        let key = self.any_key(ffi)?;
        if idx >= key.users.len() {
            return Err(Error::BadParameters(format!("no user id at index {}", idx)));
        }
        Ok(UidHandle { key: key.id, idx })
    }

    /// Number of key-level signatures: direct-key and revocation signatures
    /// of a primary, binding and revocation signatures of a subkey.
    pub fn get_signature_count(&self, ffi: &Ffi) -> Result<usize> {
        Ok(self.any_key(ffi)?.signatures.len())
    }

    pub fn get_signature_at(&self, ffi: &Ffi, idx: usize) -> Result<SignatureHandle> {
        let key = self.any_key(ffi)?;
        key.signatures
            .get(idx)
            .map(|sig| SignatureHandle::new(sig.clone(), Some(key.id)))
            .ok_or_else(|| Error::BadParameters(format!("no signature at index {}", idx)))
    }

    pub fn is_protected(&mut self, ffi: &mut Ffi) -> Result<bool> {
        let id = self.require_secret(ffi)?;
        Ok(ffi.secring.get(id).map(|k| k.is_protected()).unwrap_or(false))
    }

    pub fn is_locked(&mut self, ffi: &mut Ffi) -> Result<bool> {
        let id = self.require_secret(ffi)?;
        Ok(ffi.secring.get(id).map(|k| k.is_locked()).unwrap_or(false))
    }

    fn protection_field<T>(
        &mut self,
        ffi: &mut Ffi,
        field: impl FnOnce(&crate::key::ProtectionInfo) -> T,
    ) -> Result<T> {
        let id = self.require_secret(ffi)?;
        let info = ffi
            .secring
            .get(id)
            .and_then(|k| k.protection())
            .ok_or_else(|| Error::BadParameters("key is not protected".to_string()))?;
        Ok(field(&info))
    }

    pub fn get_protection_cipher(&mut self, ffi: &mut Ffi) -> Result<&'static str> {
        self.protection_field(ffi, |p| p.cipher)
    }

    pub fn get_protection_mode(&mut self, ffi: &mut Ffi) -> Result<&'static str> {
        self.protection_field(ffi, |p| p.mode)
    }

    pub fn get_protection_hash(&mut self, ffi: &mut Ffi) -> Result<&'static str> {
        self.protection_field(ffi, |p| p.hash)
    }

    pub fn get_protection_iterations(&mut self, ffi: &mut Ffi) -> Result<usize> {
        self.protection_field(ffi, |p| p.iterations)
    }

    /// Remove halves of this key from their stores.
    ///
    /// # Errors
    /// [`Error::BadParameters`] if no half is selected or a selected half is
    /// not held by this handle.
    pub fn remove(&mut self, ffi: &mut Ffi, flags: RemoveFlags) -> Result<()> {
        if !flags.public && !flags.secret {
            return Err(Error::BadParameters("nothing to remove".to_string()));
        }
        if (flags.public && !self.have_public(ffi)) || (flags.secret && !self.have_secret(ffi)) {
            return Err(Error::BadParameters("key half is not loaded".to_string()));
        }

        let halves = [(flags.public, false), (flags.secret, true)];
        for (selected, secret) in halves {
            if !selected {
                continue;
            }
            let id = if secret { self.secret } else { self.public };
            let Some(id) = id else { continue };
            let store = ffi.store_mut(secret);
            let removed = store.remove_key(id).ok_or(Error::KeyNotFound)?;
            if flags.subkeys {
                for grip in &removed.subkey_grips {
                    if let Some(sub) = store.by_grip(grip).map(|k| k.id) {
                        store.remove_key(sub);
                    }
                }
            }
            if secret {
                self.secret = None;
            } else {
                self.public = None;
            }
        }
        let message = format!("removed key {}", self.locator);
        ffi.log_line(message);
        Ok(())
    }
}

/// One user id of a primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UidHandle {
    pub(crate) key: KeyRef,
    pub(crate) idx: usize,
}

impl UidHandle {
    fn user<'f>(&self, ffi: &'f Ffi) -> Result<&'f pgp::types::SignedUser> {
        ffi.key(self.key)
            .and_then(|k| k.users.get(self.idx))
            .ok_or(Error::KeyNotFound)
    }

    pub fn get_uid(&self, ffi: &Ffi) -> Result<String> {
        Ok(String::from_utf8_lossy(self.user(ffi)?.id.id()).to_string())
    }

    pub fn is_primary(&self, ffi: &Ffi) -> Result<bool> {
        let key = ffi.key(self.key).ok_or(Error::KeyNotFound)?;
        Ok(key.primary_uid_index() == Some(self.idx))
    }

    /// Whether a certification revocation is attached to this user id.
    /// Whether a certification revocation made by the key covers this user
    /// id. Revocations from other keys are dropped on import.
    pub fn is_revoked(&self, ffi: &Ffi) -> Result<bool> {
        Ok(self
            .user(ffi)?
            .signatures
            .iter()
            .any(|sig| sig.typ() == Some(SignatureType::CertRevocation)))
    }

    pub fn get_signature_count(&self, ffi: &Ffi) -> Result<usize> {
        Ok(self.user(ffi)?.signatures.len())
    }

    pub fn get_signature_at(&self, ffi: &Ffi, idx: usize) -> Result<SignatureHandle> {
        self.user(ffi)?
            .signatures
            .get(idx)
            .map(|sig| SignatureHandle::new(sig.clone(), Some(self.key)))
            .ok_or_else(|| Error::BadParameters(format!("no signature at index {}", idx)))
    }
}

/// A signature taken from a key or from a verified message.
#[derive(Debug, Clone)]
pub struct SignatureHandle {
    pub(crate) sig: Signature,
    /// The key the signature is attached to, if any.
    pub(crate) key: Option<KeyRef>,
}

impl SignatureHandle {
    pub(crate) fn new(sig: Signature, key: Option<KeyRef>) -> Self {
        Self { sig, key }
    }

    /// Signature type, e.g. "binary", "certification (positive)",
    /// "subkey binding" or "key revocation".
    pub fn get_type(&self) -> &'static str {
        signature_type_name(self.sig.typ())
    }

    pub fn get_alg(&self) -> &'static str {
        self.sig
            .config()
            .and_then(|c| PublicKeyAlg::from_pgp(c.pub_alg))
            .map(|a| a.as_str())
            .unwrap_or("unknown")
    }

    pub fn get_hash_alg(&self) -> &'static str {
        self.sig.config().map(|c| hash_name(c.hash_alg)).unwrap_or("unknown")
    }

    pub fn get_creation(&self) -> u32 {
        signature_created(&self.sig)
    }

    /// Validity period in seconds after creation, 0 for never.
    pub fn get_expiration(&self) -> u32 {
        signature_expiration(&self.sig)
    }

    /// Issuer key id in uppercase hex.
    pub fn get_keyid(&self) -> Option<String> {
        signature_issuer(&self.sig).map(hex::encode_upper)
    }

    /// Locate the signer by issuer key id, asking the key provider if needed.
    ///
    /// # Errors
    /// [`Error::KeyNotFound`] if the signature has no issuer or the signer
    /// cannot be found.
    pub fn get_signer(&self, ffi: &mut Ffi) -> Result<KeyHandle> {
        let keyid = signature_issuer(&self.sig).ok_or(Error::KeyNotFound)?;
        ffi.locate(&KeyLocator::KeyId(keyid))?.ok_or(Error::KeyNotFound)
    }

    pub fn to_json(&self, ffi: &Ffi, mpis: bool) -> Result<String> {
        let value = crate::json::signature_to_json(ffi, &self.sig, mpis)?;
        Ok(serde_json::to_string_pretty(&value)?)
    }
}

//! State shared by the encrypt and sign operation builders.
//!
//! An [`OperationContext`] collects algorithm choices, timestamps and the
//! signer, recipient and password lists through setter calls. The builders
//! consume it once on execute.

use std::fmt;

use pgp::composed::SubpacketConfig;
use pgp::crypto::hash::HashAlgorithm;
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use pgp::packet::SubpacketData;
use pgp::types::{CompressionAlgorithm, KeyDetails, KeyVersion, Password, StringToKey};
use rand::{thread_rng, RngCore};
use secrecy::{ExposeSecret, SecretString};

use crate::error::{Error, Result};
use crate::ffi::Ffi;
use crate::handle::KeyHandle;
use crate::internal::{is_key_expired, now_secs, subpacket, timestamp};
use crate::key::{s2k_count_encode, with_secret, Grip, Key, KeyRef, SecretPart};
use crate::protect::secret_password;
use crate::types::{
    cipher_from_name, compression_from_name, hash_from_name, Aead, Curve, DEFAULT_CIPHER,
    DEFAULT_HASH, DEFAULT_S2K_ITERATIONS,
};

/// One signature requested on a sign or encrypt operation.
///
/// Hash, creation and expiration set here override the operation-wide
/// values for this signature only.
pub struct OpSignature {
    pub(crate) key: KeyRef,
    pub(crate) password: Password,
    pub(crate) hash: Option<HashAlgorithm>,
    pub(crate) creation_time: Option<u32>,
    pub(crate) expiration_time: Option<u32>,
}

impl fmt::Debug for OpSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpSignature")
            .field("key", &self.key)
            .field("hash", &self.hash)
            .field("creation_time", &self.creation_time)
            .field("expiration_time", &self.expiration_time)
            .finish_non_exhaustive()
    }
}

impl OpSignature {
    pub fn set_hash(&mut self, hash: &str) -> Result<()> {
        self.hash = Some(
            hash_from_name(hash)
                .ok_or_else(|| Error::BadParameters(format!("unknown hash algorithm: {}", hash)))?,
        );
        Ok(())
    }

    pub fn set_creation_time(&mut self, created: u32) {
        self.creation_time = Some(created);
    }

    /// Seconds after creation, 0 for a signature that never expires.
    pub fn set_expiration_time(&mut self, expires: u32) {
        self.expiration_time = Some(expires);
    }
}

/// Symmetric passphrase a message is encrypted with.
#[derive(Debug)]
pub(crate) struct PasswordEntry {
    pub(crate) password: SecretString,
    pub(crate) hash: HashAlgorithm,
    pub(crate) iterations: usize,
    pub(crate) cipher: SymmetricKeyAlgorithm,
}

impl PasswordEntry {
    /// Iterated and salted S2K specifier for this entry.
    pub(crate) fn s2k(&self) -> StringToKey {
        let mut salt = [0u8; 8];
        thread_rng().fill_bytes(&mut salt);
        StringToKey::IteratedAndSalted {
            hash_alg: self.hash,
            salt,
            count: s2k_count_encode(self.iterations),
        }
    }

    pub(crate) fn password(&self) -> Password {
        Password::from(self.password.expose_secret().as_str())
    }
}

#[derive(Debug)]
pub(crate) struct OperationContext {
    pub(crate) armor: bool,
    pub(crate) hash: Option<HashAlgorithm>,
    pub(crate) cipher: SymmetricKeyAlgorithm,
    pub(crate) aead: Aead,
    pub(crate) aead_bits: u8,
    pub(crate) compression: Option<CompressionAlgorithm>,
    pub(crate) creation_time: Option<u32>,
    pub(crate) expiration_time: u32,
    pub(crate) file_name: String,
    pub(crate) signers: Vec<OpSignature>,
    pub(crate) recipients: Vec<KeyRef>,
    pub(crate) passwords: Vec<PasswordEntry>,
}

impl Default for OperationContext {
    fn default() -> Self {
        Self {
            armor: false,
            hash: None,
            cipher: DEFAULT_CIPHER,
            aead: Aead::None,
            aead_bits: 0,
            compression: None,
            creation_time: None,
            expiration_time: 0,
            file_name: String::new(),
            signers: Vec::new(),
            recipients: Vec::new(),
            passwords: Vec::new(),
        }
    }
}

impl OperationContext {
    pub(crate) fn set_hash(&mut self, hash: &str) -> Result<()> {
        self.hash = Some(
            hash_from_name(hash)
                .ok_or_else(|| Error::BadParameters(format!("unknown hash algorithm: {}", hash)))?,
        );
        Ok(())
    }

    pub(crate) fn set_compression(&mut self, alg: &str, level: u8) -> Result<()> {
        if level > 9 {
            return Err(Error::BadParameters(format!("invalid compression level: {}", level)));
        }
        let alg = compression_from_name(alg)
            .ok_or_else(|| Error::BadParameters(format!("unknown compression algorithm: {}", alg)))?;
        // The message writer compresses at its own fixed level; only level 0
        // changes the output, by turning compression off.
        self.compression = match (alg, level) {
            (CompressionAlgorithm::Uncompressed, _) | (_, 0) => None,
            (alg, _) => Some(alg),
        };
        Ok(())
    }

    /// Add a signer, picking the handle's key or one of its subkeys that can
    /// sign, and obtaining its passphrase (context "sign").
    pub(crate) fn add_signer(&mut self, ffi: &mut Ffi, handle: &mut KeyHandle) -> Result<&mut OpSignature> {
        let key = suitable_key(ffi, handle, true, Key::can_sign)?;
        let password = secret_password(ffi, key, "sign")?;
        self.signers.push(OpSignature {
            key,
            password,
            hash: None,
            creation_time: None,
            expiration_time: None,
        });
        let last = self.signers.len() - 1;
        Ok(&mut self.signers[last])
    }

    pub(crate) fn add_recipient(&mut self, ffi: &mut Ffi, handle: &mut KeyHandle) -> Result<()> {
        let key = suitable_key(ffi, handle, false, Key::can_encrypt)?;
        if !self.recipients.contains(&key) {
            self.recipients.push(key);
        }
        Ok(())
    }

    /// Add a symmetric passphrase. Without `password` the provider is asked
    /// with context "encrypt (symmetric)".
    pub(crate) fn add_password(
        &mut self,
        ffi: &mut Ffi,
        password: Option<&str>,
        hash: Option<&str>,
        iterations: usize,
        cipher: Option<&str>,
    ) -> Result<()> {
        let password = match password {
            Some(pw) => SecretString::new(pw.to_string()),
            None => ffi
                .ask_password(None, "encrypt (symmetric)")
                .ok_or(Error::BadPassword)?,
        };
        if password.expose_secret().is_empty() {
            return Err(Error::BadParameters("empty password".to_string()));
        }
        let hash = match hash {
            Some(name) => hash_from_name(name)
                .ok_or_else(|| Error::BadParameters(format!("unknown hash algorithm: {}", name)))?,
            None => DEFAULT_HASH,
        };
        let cipher = match cipher {
            Some(name) => cipher_from_name(name)
                .ok_or_else(|| Error::BadParameters(format!("unknown cipher: {}", name)))?,
            None => DEFAULT_CIPHER,
        };
        self.passwords.push(PasswordEntry {
            password,
            hash,
            iterations: if iterations == 0 { DEFAULT_S2K_ITERATIONS } else { iterations },
            cipher,
        });
        Ok(())
    }

    /// Effective hash of a signature: its own override, else the operation's,
    /// else one matching the signing key's curve.
    pub(crate) fn signature_hash(&self, signer: &OpSignature, curve: Option<Curve>) -> HashAlgorithm {
        signer.hash.or(self.hash).unwrap_or_else(|| hash_for_curve(curve))
    }

    pub(crate) fn signature_times(&self, signer: &OpSignature) -> (u32, u32) {
        let created = signer
            .creation_time
            .or(self.creation_time)
            .unwrap_or_else(now_secs);
        let expires = signer.expiration_time.unwrap_or(self.expiration_time);
        (created, expires)
    }
}

/// Secret material and effective parameters of one requested signature.
pub(crate) struct SigningMaterial {
    pub(crate) secret: SecretPart,
    pub(crate) hash: HashAlgorithm,
    pub(crate) created: u32,
    pub(crate) expires: u32,
}

impl SigningMaterial {
    /// Subpackets for the message writer, carrying this signature's own
    /// creation and expiration times.
    pub(crate) fn subpackets(&self) -> Result<SubpacketConfig> {
        with_secret!(&self.secret, k => {
            let mut hashed = vec![
                subpacket(SubpacketData::IssuerFingerprint(k.fingerprint()))?,
                subpacket(SubpacketData::SignatureCreationTime(timestamp(self.created)))?,
            ];
            if self.expires > 0 {
                hashed.push(subpacket(SubpacketData::SignatureExpirationTime(
                    chrono::Duration::seconds(i64::from(self.expires)),
                ))?);
            }
            let mut unhashed = Vec::new();
            if k.version() <= KeyVersion::V4 {
                unhashed.push(subpacket(SubpacketData::Issuer(k.key_id()))?);
            }
            Ok(SubpacketConfig::UserDefined { hashed, unhashed })
        })
    }
}

impl OperationContext {
    /// Take the requested signatures, resolving each signer's secret part.
    ///
    /// Passwords come back as a separate list because the message builder
    /// takes them by value while it borrows the secret parts.
    pub(crate) fn take_signers(&mut self, ffi: &Ffi) -> Result<(Vec<SigningMaterial>, Vec<Password>)> {
        let mut materials = Vec::with_capacity(self.signers.len());
        let mut passwords = Vec::with_capacity(self.signers.len());
        for signer in std::mem::take(&mut self.signers) {
            let key = ffi.secring.get(signer.key).ok_or(Error::NoSuitableKey)?;
            let secret = key.secret.clone().ok_or(Error::NoSuitableKey)?;
            let (created, expires) = self.signature_times(&signer);
            materials.push(SigningMaterial {
                secret,
                hash: self.signature_hash(&signer, key.curve()),
                created,
                expires,
            });
            passwords.push(signer.password);
        }
        Ok((materials, passwords))
    }
}

/// ECDSA needs a digest at least as wide as the curve order.
pub(crate) fn hash_for_curve(curve: Option<Curve>) -> HashAlgorithm {
    match curve {
        Some(Curve::NistP384) | Some(Curve::BrainpoolP384) => HashAlgorithm::Sha384,
        Some(Curve::NistP521) | Some(Curve::BrainpoolP512) => HashAlgorithm::Sha512,
        _ => DEFAULT_HASH,
    }
}

fn is_usable(key: &Key, now: u32) -> bool {
    !key.is_revoked() && !is_key_expired(key.creation(), key.expiration(), now)
}

/// Record of the handle's key, or of one of its subkeys, that passes
/// `capable` and is neither revoked nor expired.
///
/// With `secret` the record must come from the secret store; otherwise the
/// public store is preferred. Among subkeys the newest one wins.
pub(crate) fn suitable_key(
    ffi: &mut Ffi,
    handle: &mut KeyHandle,
    secret: bool,
    capable: fn(&Key) -> bool,
) -> Result<KeyRef> {
    if secret {
        handle.require_secret(ffi)?;
    } else {
        handle.prefer_public(ffi)?;
    }
    let key = handle.any_key(ffi)?;
    let now = now_secs();

    let mut candidates = vec![key.grip()];
    if key.is_primary() {
        candidates.extend(key.subkey_grips().iter().copied());
        if let Some(other) = ffi.secring.by_grip(&key.grip()) {
            for grip in other.subkey_grips() {
                if !candidates.contains(grip) {
                    candidates.push(*grip);
                }
            }
        }
    }

    let lookup = |grip: &Grip| {
        if secret {
            ffi.secring.by_grip(grip)
        } else {
            ffi.pubring.by_grip(grip).or_else(|| ffi.secring.by_grip(grip))
        }
    };
    let mut records = candidates
        .iter()
        .filter_map(lookup)
        .filter(|record| capable(record) && is_usable(record, now));

    let Some(first) = records.next() else {
        return Err(Error::NoSuitableKey);
    };
    if first.grip() == key.grip() {
        return Ok(first.id);
    }
    let newest = records.fold(first, |best, record| {
        if record.creation() > best.creation() {
            record
        } else {
            best
        }
    });
    Ok(newest.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_settings() {
        let mut ctx = OperationContext::default();
        ctx.set_compression("zlib", 6).unwrap();
        assert_eq!(ctx.compression, Some(CompressionAlgorithm::ZLIB));
        ctx.set_compression("zip", 0).unwrap();
        assert_eq!(ctx.compression, None);
        assert!(ctx.set_compression("zlib", 10).is_err());
        assert!(ctx.set_compression("lz4", 1).is_err());
    }

    #[test]
    fn test_signature_overrides() {
        let mut ctx = OperationContext::default();
        ctx.set_hash("SHA512").unwrap();
        ctx.creation_time = Some(1000);
        ctx.expiration_time = 60;
        let mut sig = OpSignature {
            key: 1,
            password: Password::empty(),
            hash: None,
            creation_time: None,
            expiration_time: None,
        };
        assert_eq!(ctx.signature_hash(&sig, None), HashAlgorithm::Sha512);
        assert_eq!(ctx.signature_times(&sig), (1000, 60));

        sig.set_hash("SHA256").unwrap();
        sig.set_creation_time(2000);
        sig.set_expiration_time(0);
        assert_eq!(ctx.signature_hash(&sig, Some(Curve::NistP521)), HashAlgorithm::Sha256);
        assert_eq!(ctx.signature_times(&sig), (2000, 0));
    }

    #[test]
    fn test_hash_follows_curve() {
        let ctx = OperationContext::default();
        let sig = OpSignature {
            key: 1,
            password: Password::empty(),
            hash: None,
            creation_time: None,
            expiration_time: None,
        };
        assert_eq!(ctx.signature_hash(&sig, Some(Curve::NistP384)), HashAlgorithm::Sha384);
        assert_eq!(ctx.signature_hash(&sig, Some(Curve::NistP521)), HashAlgorithm::Sha512);
        assert_eq!(ctx.signature_hash(&sig, Some(Curve::Ed25519)), DEFAULT_HASH);
        assert_eq!(ctx.signature_hash(&sig, None), DEFAULT_HASH);
    }

    #[test]
    fn test_password_entry_defaults() {
        let mut ffi = Ffi::new("GPG", "GPG").unwrap();
        let mut ctx = OperationContext::default();
        ctx.add_password(&mut ffi, Some("secret"), None, 0, None).unwrap();
        assert!(ctx.add_password(&mut ffi, Some(""), None, 0, None).is_err());
        assert!(ctx.add_password(&mut ffi, None, None, 0, None).is_err());
        let entry = &ctx.passwords[0];
        assert_eq!(entry.cipher, DEFAULT_CIPHER);
        assert_eq!(entry.iterations, DEFAULT_S2K_ITERATIONS);
        assert!(matches!(entry.s2k(), StringToKey::IteratedAndSalted { .. }));
    }
}

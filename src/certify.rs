//! Self-signatures: user id certifications and subkey bindings.
//!
//! Both are built from a [`SignatureConfig`] the same way: creation time and
//! issuer fingerprint hashed, the legacy issuer key id unhashed for v4 keys,
//! followed by the key properties the signature asserts.

use chrono::{DateTime, Utc};
use pgp::crypto::hash::HashAlgorithm;
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use pgp::packet::{
    PacketTrait, PublicSubkey, SecretKey, SecretSubkey, Signature, SignatureConfig, SignatureType,
    SubpacketData, UserId,
};
use pgp::types::{
    CompressionAlgorithm, KeyDetails, KeyVersion, Password, SecretKeyTrait, SignedUser,
};
use rand::thread_rng;
use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::ffi::Ffi;
use crate::handle::KeyHandle;
use crate::internal::{now_secs, signature_issuer, subpacket, timestamp};
use crate::key::{Grip, Key, KeyRef, PublicPart, SecretPart};
use crate::protect::secret_password;
use crate::types::{hash_from_name, KeyUsage, MAX_USERID_LEN};

/// Algorithm preferences and key server advertised by a self-certification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Preferences {
    pub(crate) hashes: Vec<HashAlgorithm>,
    pub(crate) ciphers: Vec<SymmetricKeyAlgorithm>,
    pub(crate) compression: Vec<CompressionAlgorithm>,
    pub(crate) key_server: Option<String>,
}

impl Preferences {
    /// Preferences carried by an existing signature.
    pub(crate) fn from_signature(sig: &Signature) -> Self {
        let mut prefs = Preferences::default();
        let Some(config) = sig.config() else {
            return prefs;
        };
        for sp in config.hashed_subpackets() {
            match &sp.data {
                SubpacketData::PreferredHashAlgorithms(algs) => prefs.hashes = algs.to_vec(),
                SubpacketData::PreferredSymmetricAlgorithms(algs) => prefs.ciphers = algs.to_vec(),
                SubpacketData::PreferredCompressionAlgorithms(algs) => {
                    prefs.compression = algs.to_vec()
                }
                SubpacketData::PreferredKeyServer(url) => prefs.key_server = Some(url.to_string()),
                _ => {}
            }
        }
        prefs
    }

    fn push_subpackets(&self, config: &mut SignatureConfig) -> Result<()> {
        if !self.ciphers.is_empty() {
            let algs: SmallVec<[SymmetricKeyAlgorithm; 8]> = self.ciphers.iter().copied().collect();
            config
                .hashed_subpackets
                .push(subpacket(SubpacketData::PreferredSymmetricAlgorithms(algs))?);
        }
        if !self.hashes.is_empty() {
            let algs: SmallVec<[HashAlgorithm; 8]> = self.hashes.iter().copied().collect();
            config
                .hashed_subpackets
                .push(subpacket(SubpacketData::PreferredHashAlgorithms(algs))?);
        }
        if !self.compression.is_empty() {
            let algs: SmallVec<[CompressionAlgorithm; 8]> = self.compression.iter().copied().collect();
            config
                .hashed_subpackets
                .push(subpacket(SubpacketData::PreferredCompressionAlgorithms(algs))?);
        }
        if let Some(url) = &self.key_server {
            config
                .hashed_subpackets
                .push(subpacket(SubpacketData::PreferredKeyServer(url.clone()))?);
        }
        Ok(())
    }
}

/// Properties asserted by a self-certification or binding.
#[derive(Debug, Clone, Default)]
pub(crate) struct SelfSigParams {
    pub(crate) usage: KeyUsage,
    /// Seconds after key creation, 0 for no expiration.
    pub(crate) expiration: u32,
    pub(crate) primary_uid: bool,
    pub(crate) hash: Option<HashAlgorithm>,
    pub(crate) prefs: Preferences,
}

/// Signature config issued by `signer` with the common subpackets set.
pub(crate) fn issuer_config(
    signer: &impl SecretKeyTrait,
    typ: SignatureType,
    hash: Option<HashAlgorithm>,
    created: DateTime<Utc>,
) -> Result<SignatureConfig> {
    let mut config = SignatureConfig::from_key(thread_rng(), signer, typ)
        .map_err(|e| Error::Generic(e.to_string()))?;
    if let Some(hash) = hash {
        config.hash_alg = hash;
    }
    config.hashed_subpackets = vec![
        subpacket(SubpacketData::SignatureCreationTime(created))?,
        subpacket(SubpacketData::IssuerFingerprint(signer.fingerprint()))?,
    ];
    if signer.version() <= KeyVersion::V4 {
        config.unhashed_subpackets = vec![subpacket(SubpacketData::Issuer(signer.key_id()))?];
    }
    Ok(config)
}

fn push_key_properties(config: &mut SignatureConfig, params: &SelfSigParams) -> Result<()> {
    if !params.usage.is_empty() {
        config
            .hashed_subpackets
            .push(subpacket(SubpacketData::KeyFlags(params.usage.to_key_flags()))?);
    }
    if params.expiration > 0 {
        config
            .hashed_subpackets
            .push(subpacket(SubpacketData::KeyExpirationTime(chrono::Duration::seconds(
                i64::from(params.expiration),
            )))?);
    }
    Ok(())
}

/// Positive self-certification of `user` by `primary`.
pub(crate) fn certify_user(
    primary: &SecretKey,
    password: &Password,
    user: &UserId,
    params: &SelfSigParams,
) -> Result<Signature> {
    let mut config = issuer_config(primary, SignatureType::CertPositive, params.hash, timestamp(now_secs()))?;
    push_key_properties(&mut config, params)?;
    if params.primary_uid {
        config
            .hashed_subpackets
            .push(subpacket(SubpacketData::IsPrimary(true))?);
    }
    params.prefs.push_subpackets(&mut config)?;

    config
        .sign_certification(primary, primary.public_key(), password, user.tag(), user)
        .map_err(|e| Error::Generic(format!("failed to certify user id: {}", e)))
}

/// Direct-key self-signature, used by primaries without user ids.
pub(crate) fn certify_direct(
    primary: &SecretKey,
    password: &Password,
    params: &SelfSigParams,
) -> Result<Signature> {
    let mut config = issuer_config(primary, SignatureType::Key, params.hash, timestamp(now_secs()))?;
    push_key_properties(&mut config, params)?;
    params.prefs.push_subpackets(&mut config)?;

    config
        .sign_key(primary, password, primary.public_key())
        .map_err(|e| Error::Generic(format!("failed to sign key: {}", e)))
}

/// Primary key binding signature made by a signing subkey over `primary`.
/// It travels embedded in the subkey's binding signature.
pub(crate) fn back_signature(
    subkey: &SecretSubkey,
    password: &Password,
    primary: &SecretKey,
) -> Result<Signature> {
    subkey
        .sign_primary_key_binding(thread_rng(), primary.public_key(), password)
        .map_err(|e| Error::Generic(format!("failed to cross-certify subkey: {}", e)))
}

/// Subkey binding signature made by `primary`. Signing subkeys must come
/// with their back-signature in `embedded`.
pub(crate) fn bind_subkey(
    primary: &SecretKey,
    password: &Password,
    subkey: &PublicSubkey,
    embedded: Option<Signature>,
    params: &SelfSigParams,
) -> Result<Signature> {
    if params.usage.sign && embedded.is_none() {
        return Err(Error::BadParameters(
            "signing subkey binding requires a back-signature".to_string(),
        ));
    }
    let mut config = issuer_config(primary, SignatureType::SubkeyBinding, params.hash, timestamp(now_secs()))?;
    push_key_properties(&mut config, params)?;
    if let Some(embedded) = embedded {
        config
            .hashed_subpackets
            .push(subpacket(SubpacketData::EmbeddedSignature(Box::new(embedded)))?);
    }

    config
        .sign_subkey_binding(primary, primary.public_key(), password, subkey)
        .map_err(|e| Error::Generic(format!("failed to bind subkey: {}", e)))
}

/// Secret primary key packet of a record.
pub(crate) fn primary_secret(key: &Key) -> Result<SecretKey> {
    match &key.secret {
        Some(SecretPart::Primary(k)) => Ok(k.clone()),
        _ => Err(Error::NoSuitableKey),
    }
}

/// Record of `grip` whose user ids and signatures are authoritative:
/// the public one when loaded, else the secret one.
pub(crate) fn metadata_record<'a>(ffi: &'a Ffi, grip: &Grip) -> Option<&'a Key> {
    ffi.pubring.by_grip(grip).or_else(|| ffi.secring.by_grip(grip))
}

/// Apply a metadata change to both records of `grip`.
pub(crate) fn update_records(ffi: &mut Ffi, grip: &Grip, mut change: impl FnMut(&mut Key)) {
    for store in [&mut ffi.pubring, &mut ffi.secring] {
        if let Some(record) = store.by_grip_mut(grip) {
            change(record);
        }
    }
}

fn has_flagged_primary(key: &Key) -> bool {
    key.users.iter().flat_map(|user| user.signatures.iter()).any(|sig| {
        sig.config()
            .map(|config| {
                config
                    .hashed_subpackets()
                    .any(|sp| matches!(sp.data, SubpacketData::IsPrimary(true)))
            })
            .unwrap_or(false)
    })
}

fn signature_hash(sig: Option<&Signature>) -> Option<HashAlgorithm> {
    sig.and_then(|sig| sig.config()).map(|config| config.hash_alg)
}

/// Signatures in `sigs` that were not issued by `keyid`.
fn foreign_signatures(sigs: &[Signature], keyid: &[u8; 8]) -> Vec<Signature> {
    sigs.iter()
        .filter(|sig| signature_issuer(sig).as_ref() != Some(keyid))
        .cloned()
        .collect()
}

impl KeyHandle {
    /// Add a self-certified user id to a primary key.
    ///
    /// # Arguments
    /// * `uid` - The user id, at most 128 bytes
    /// * `hash` - Certification hash, `None` for the default
    /// * `expiration` - Key expiration asserted by the certification, 0 for none
    /// * `key_flags` - Key flags octet, 0 keeps the key's current usage
    /// * `primary` - Mark the new user id as primary
    pub fn add_uid(
        &mut self,
        ffi: &mut Ffi,
        uid: &str,
        hash: Option<&str>,
        expiration: u32,
        key_flags: u8,
        primary: bool,
    ) -> Result<()> {
        if uid.is_empty() || uid.len() > MAX_USERID_LEN {
            return Err(Error::BadParameters(format!(
                "user id must be 1 to {} bytes",
                MAX_USERID_LEN
            )));
        }
        let hash = match hash {
            Some(name) => Some(
                hash_from_name(name)
                    .ok_or_else(|| Error::BadParameters(format!("unknown hash algorithm: {}", name)))?,
            ),
            None => None,
        };
        let id = self.require_secret(ffi)?;
        let grip = ffi.secring.get(id).ok_or(Error::NoSuitableKey)?.grip;
        let key = metadata_record(ffi, &grip).ok_or(Error::NoSuitableKey)?;
        if !key.is_primary() {
            return Err(Error::BadParameters("user ids belong to primary keys".to_string()));
        }
        if !key.usage().certify {
            return Err(Error::NoSuitableKey);
        }
        if key.uids().iter().any(|existing| existing == uid) {
            return Err(Error::BadParameters(format!("user id already present: {}", uid)));
        }
        if primary && has_flagged_primary(key) {
            return Err(Error::BadParameters("key already has a primary user id".to_string()));
        }
        let usage = if key_flags == 0 {
            key.usage()
        } else {
            KeyUsage::from_bitmask(key_flags)
        };
        let secret = primary_secret(ffi.secring.get(id).ok_or(Error::NoSuitableKey)?)?;

        let password = secret_password(ffi, id, "add userid")?;
        let user = UserId::from_str(Default::default(), uid)
            .map_err(|e| Error::BadParameters(e.to_string()))?;
        let params = SelfSigParams {
            usage,
            expiration,
            primary_uid: primary,
            hash,
            prefs: Preferences::default(),
        };
        let sig = certify_user(&secret, &password, &user, &params)?;

        let signed = SignedUser::new(user, vec![sig]);
        update_records(ffi, &grip, |record| record.users.push(signed.clone()));
        ffi.log_line(format!("added user id \"{}\" to key {}", uid, grip));
        Ok(())
    }

    /// Change the key's expiration, in seconds after its creation.
    ///
    /// A primary key re-certifies every user id; a subkey is re-bound by
    /// its primary, which must have secret material in the context.
    pub fn set_expiration(&mut self, ffi: &mut Ffi, expiry: u32) -> Result<()> {
        let target = self.prefer_public(ffi)?;
        let key = ffi.key(target).ok_or(Error::KeyNotFound)?;
        if key.is_primary() {
            let id = self.require_secret(ffi)?;
            recertify_primary(ffi, id, expiry)
        } else {
            let primary_grip = key.primary_grip.ok_or(Error::KeyNotFound)?;
            let grip = key.grip;
            let primary_id = ffi
                .secring
                .by_grip(&primary_grip)
                .map(|k| k.id)
                .ok_or(Error::NoSuitableKey)?;
            rebind_subkey(ffi, primary_id, &grip, expiry)
        }
    }
}

/// Re-certify every user id of primary `id` asserting `expiry`.
fn recertify_primary(ffi: &mut Ffi, id: KeyRef, expiry: u32) -> Result<()> {
    let secret = primary_secret(ffi.secring.get(id).ok_or(Error::NoSuitableKey)?)?;
    let grip = ffi.secring.get(id).ok_or(Error::NoSuitableKey)?.grip;
    let key = metadata_record(ffi, &grip).ok_or(Error::NoSuitableKey)?;
    let keyid = key.keyid();
    let usage = key.usage();
    let primary_idx = key.primary_uid_index();
    let current = key.self_signature().cloned();
    let users = key.users.clone();
    let direct = key.signatures.clone();

    let password = secret_password(ffi, id, "set expiration")?;
    let base = SelfSigParams {
        usage,
        expiration: expiry,
        primary_uid: false,
        hash: signature_hash(current.as_ref()),
        prefs: current.as_ref().map(Preferences::from_signature).unwrap_or_default(),
    };

    let mut new_users = Vec::with_capacity(users.len());
    for (idx, user) in users.iter().enumerate() {
        let params = SelfSigParams {
            primary_uid: primary_idx == Some(idx) && users.len() > 1,
            ..base.clone()
        };
        let sig = certify_user(&secret, &password, &user.id, &params)?;
        let mut sigs = vec![sig];
        sigs.extend(foreign_signatures(&user.signatures, &keyid));
        new_users.push(SignedUser::new(user.id.clone(), sigs));
    }

    let mut signatures: Vec<Signature> = direct
        .iter()
        .filter(|sig| sig.typ() != Some(SignatureType::Key))
        .cloned()
        .collect();
    if new_users.is_empty() {
        signatures.push(certify_direct(&secret, &password, &base)?);
    }

    update_records(ffi, &grip, |record| {
        record.users = new_users.clone();
        record.signatures = signatures.clone();
    });
    ffi.log_line(format!("set expiration of key {} to {}", grip, expiry));
    Ok(())
}

/// Replace the binding signature of subkey `grip` with one asserting `expiry`.
fn rebind_subkey(ffi: &mut Ffi, primary_id: KeyRef, grip: &Grip, expiry: u32) -> Result<()> {
    let primary = ffi.secring.get(primary_id).ok_or(Error::NoSuitableKey)?;
    let secret = primary_secret(primary)?;
    let sub = metadata_record(ffi, grip).ok_or(Error::KeyNotFound)?;
    let subkey = match &sub.public {
        PublicPart::Sub(k) => k.clone(),
        PublicPart::Primary(_) => return Err(Error::BadParameters("not a subkey".to_string())),
    };
    let current = sub.self_signature().cloned();
    let params = SelfSigParams {
        usage: sub.usage(),
        expiration: expiry,
        hash: signature_hash(current.as_ref()),
        ..Default::default()
    };

    // a back-signature covers only the two keys, so the current one stays valid
    let mut embedded = current
        .as_ref()
        .and_then(|sig| sig.embedded_signature())
        .cloned();
    if params.usage.sign && embedded.is_none() {
        let sub_id = ffi.secring.by_grip(grip).map(|k| k.id).ok_or(Error::NoSuitableKey)?;
        let sub_secret = match &ffi.secring.get(sub_id).and_then(|k| k.secret.clone()) {
            Some(SecretPart::Sub(k)) => k.clone(),
            _ => return Err(Error::NoSuitableKey),
        };
        let sub_password = secret_password(ffi, sub_id, "set expiration")?;
        embedded = Some(back_signature(&sub_secret, &sub_password, &secret)?);
    }

    let password = secret_password(ffi, primary_id, "set expiration")?;
    let binding = bind_subkey(&secret, &password, &subkey, embedded, &params)?;

    update_records(ffi, grip, |record| {
        record
            .signatures
            .retain(|sig| sig.typ() != Some(SignatureType::SubkeyBinding));
        record.signatures.push(binding.clone());
    });
    ffi.log_line(format!("set expiration of subkey {} to {}", grip, expiry));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferences_default_is_empty() {
        let prefs = Preferences::default();
        assert!(prefs.hashes.is_empty());
        assert!(prefs.key_server.is_none());
    }

    #[test]
    fn test_self_sig_params_default() {
        let params = SelfSigParams::default();
        assert_eq!(params.expiration, 0);
        assert!(params.usage.is_empty());
        assert!(!params.primary_uid);
    }
}

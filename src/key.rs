//! Key records held by the key stores.
//!
//! A [`Key`] is one OpenPGP key packet, primary or subkey, with the public
//! half always present and the secret half optional. Primary records carry
//! the user ids; subkey records carry their binding and revocation
//! signatures and the grip of the primary they belong to.

use std::sync::atomic::{AtomicU64, Ordering};

use pgp::composed::{
    SignedKeyDetails, SignedPublicKey, SignedPublicSubKey, SignedSecretKey, SignedSecretSubKey,
};
use pgp::crypto::aead::AeadAlgorithm;
use pgp::crypto::public_key::PublicKeyAlgorithm;
use pgp::packet::{
    PublicKey, PublicSubkey, RevocationCode, SecretKey, SecretSubkey, Signature, SignatureType,
    SubpacketData,
};
use pgp::types::{
    KeyDetails, Password, PublicKeyTrait, S2kParams, SecretParams, SignedUser,
    SignedUserAttribute, StringToKey, Tag,
};
use secrecy::{ExposeSecret, SecretString};

use crate::error::{Error, Result};
use crate::internal::{
    accept_revocation, compute_grip, duration_secs, is_revocation, key_bits, key_curve,
    keyid_bytes, latest_binding, latest_certification, latest_direct, signature_revocation,
    to_secs,
};
use crate::types::{cipher_name, hash_name, Curve, KeyFormat, KeyUsage, PublicKeyAlg};

/// Identity of a key record inside the context's arena.
pub type KeyRef = u64;

static NEXT_KEY_REF: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_key_ref() -> KeyRef {
    NEXT_KEY_REF.fetch_add(1, Ordering::Relaxed)
}

/// Engine-internal 20-byte identifier shared by both halves of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Grip(pub(crate) [u8; 20]);

impl Grip {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Grip> {
        let raw = hex::decode(s.trim()).ok()?;
        Grip::from_slice(&raw)
    }

    pub fn from_slice(raw: &[u8]) -> Option<Grip> {
        if raw.len() != 20 {
            return None;
        }
        let mut grip = [0u8; 20];
        grip.copy_from_slice(raw);
        Some(Grip(grip))
    }
}

impl std::fmt::Display for Grip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[derive(Debug, Clone)]
pub(crate) enum PublicPart {
    Primary(PublicKey),
    Sub(PublicSubkey),
}

#[derive(Debug, Clone)]
pub(crate) enum SecretPart {
    Primary(SecretKey),
    Sub(SecretSubkey),
}

/// Run an expression against either variant of a [`PublicPart`].
macro_rules! with_public {
    ($part:expr, $k:ident => $body:expr) => {
        match $part {
            $crate::key::PublicPart::Primary($k) => $body,
            $crate::key::PublicPart::Sub($k) => $body,
        }
    };
}

/// Run an expression against either variant of a [`SecretPart`].
macro_rules! with_secret {
    ($part:expr, $k:ident => $body:expr) => {
        match $part {
            $crate::key::SecretPart::Primary($k) => $body,
            $crate::key::SecretPart::Sub($k) => $body,
        }
    };
}

pub(crate) use with_public;
pub(crate) use with_secret;

impl SecretPart {
    pub(crate) fn is_protected(&self) -> bool {
        with_secret!(self, k => matches!(k.secret_params(), SecretParams::Encrypted(_)))
    }

    /// Check a password against the encrypted secret material.
    pub(crate) fn check_password(&self, password: &Password) -> Result<()> {
        with_secret!(self, k => k.unlock(password, |_, _| Ok(())))
            .map_err(|_| Error::BadPassword)?
            .map_err(|_| Error::BadPassword)
    }

    pub(crate) fn protection(&self) -> Option<ProtectionInfo> {
        let params = with_secret!(self, k => match k.secret_params() {
            SecretParams::Encrypted(enc) => Some(enc.string_to_key_params().clone()),
            SecretParams::Plain(_) => None,
        })?;
        let info = match params {
            S2kParams::Cfb { sym_alg, s2k, .. } | S2kParams::MalleableCfb { sym_alg, s2k, .. } => {
                let (hash, iterations) = s2k_summary(&s2k);
                ProtectionInfo {
                    cipher: cipher_name(sym_alg),
                    mode: "CFB",
                    hash,
                    iterations,
                }
            }
            S2kParams::Aead { sym_alg, aead_mode, s2k, .. } => {
                let (hash, iterations) = s2k_summary(&s2k);
                ProtectionInfo {
                    cipher: cipher_name(sym_alg),
                    mode: match aead_mode {
                        AeadAlgorithm::Eax => "EAX",
                        AeadAlgorithm::Ocb => "OCB",
                        _ => "Unknown",
                    },
                    hash,
                    iterations,
                }
            }
            _ => ProtectionInfo {
                cipher: "unknown",
                mode: "Unknown",
                hash: "unknown",
                iterations: 0,
            },
        };
        Some(info)
    }
}

/// Hash name and iteration count of a string-to-key specifier.
fn s2k_summary(s2k: &StringToKey) -> (&'static str, usize) {
    match s2k {
        StringToKey::IteratedAndSalted { hash_alg, count, .. } => {
            (hash_name(*hash_alg), s2k_count_decode(*count))
        }
        StringToKey::Salted { hash_alg, .. } | StringToKey::Simple { hash_alg } => {
            (hash_name(*hash_alg), 1)
        }
        _ => ("unknown", 0),
    }
}

/// Decode the one-octet S2K iteration count.
pub(crate) fn s2k_count_decode(coded: u8) -> usize {
    (16 + (coded as usize & 15)) << ((coded as usize >> 4) + 6)
}

/// Smallest one-octet S2K count covering `iterations`.
pub(crate) fn s2k_count_encode(iterations: usize) -> u8 {
    (0..=255u8)
        .find(|c| s2k_count_decode(*c) >= iterations)
        .unwrap_or(255)
}

/// Protection parameters of encrypted secret material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectionInfo {
    pub cipher: &'static str,
    pub mode: &'static str,
    pub hash: &'static str,
    pub iterations: usize,
}

/// One key packet and everything the engine tracks about it.
#[derive(Debug, Clone)]
pub struct Key {
    pub(crate) id: KeyRef,
    pub(crate) format: KeyFormat,
    pub(crate) public: PublicPart,
    pub(crate) secret: Option<SecretPart>,
    pub(crate) users: Vec<SignedUser>,
    pub(crate) user_attributes: Vec<SignedUserAttribute>,
    /// Direct-key and key revocation signatures for a primary; binding and
    /// subkey revocation signatures for a subkey.
    pub(crate) signatures: Vec<Signature>,
    pub(crate) grip: Grip,
    pub(crate) primary_grip: Option<Grip>,
    pub(crate) subkey_grips: Vec<Grip>,
    /// Passphrase cached between `unlock` and `lock`.
    pub(crate) unlocked: Option<SecretString>,
}

impl Key {
    fn primary(format: KeyFormat, public: PublicKey, secret: Option<SecretKey>) -> Result<Key> {
        let grip = Grip(compute_grip(&public)?);
        Ok(Key {
            id: next_key_ref(),
            format,
            public: PublicPart::Primary(public),
            secret: secret.map(SecretPart::Primary),
            users: Vec::new(),
            user_attributes: Vec::new(),
            signatures: Vec::new(),
            grip,
            primary_grip: None,
            subkey_grips: Vec::new(),
            unlocked: None,
        })
    }

    pub(crate) fn subkey(
        format: KeyFormat,
        public: PublicSubkey,
        secret: Option<SecretSubkey>,
        signatures: Vec<Signature>,
        primary_grip: Grip,
    ) -> Result<Key> {
        let grip = Grip(compute_grip(&public)?);
        Ok(Key {
            id: next_key_ref(),
            format,
            public: PublicPart::Sub(public),
            secret: secret.map(SecretPart::Sub),
            users: Vec::new(),
            user_attributes: Vec::new(),
            signatures,
            grip,
            primary_grip: Some(primary_grip),
            subkey_grips: Vec::new(),
            unlocked: None,
        })
    }

    /// Record for secret material stored apart from its certificate, as G10
    /// directories store it. User ids, signatures and links are taken from
    /// `metadata` when the public record is known.
    pub(crate) fn from_secret_part(format: KeyFormat, secret: SecretPart, metadata: Option<&Key>) -> Result<Key> {
        if let Some(known) = metadata {
            return Ok(Key {
                id: next_key_ref(),
                format,
                secret: Some(secret),
                unlocked: None,
                ..known.clone()
            });
        }
        match secret {
            SecretPart::Primary(k) => Key::primary(format, k.public_key().clone(), Some(k)),
            SecretPart::Sub(k) => {
                let public = k.public_key().clone();
                let grip = Grip(compute_grip(&public)?);
                Ok(Key {
                    id: next_key_ref(),
                    format,
                    public: PublicPart::Sub(public),
                    secret: Some(SecretPart::Sub(k)),
                    users: Vec::new(),
                    user_attributes: Vec::new(),
                    signatures: Vec::new(),
                    grip,
                    primary_grip: None,
                    subkey_grips: Vec::new(),
                    unlocked: None,
                })
            }
        }
    }

    /// Split a transferable public key into key records, primary first.
    pub(crate) fn from_signed_public(key: &SignedPublicKey, format: KeyFormat) -> Result<Vec<Key>> {
        let signer = &key.primary_key;
        let mut primary = Key::primary(format, signer.clone(), None)?;
        primary.set_details(&key.details, signer);

        let mut records = Vec::with_capacity(key.public_subkeys.len() + 1);
        for sub in &key.public_subkeys {
            let signatures = subkey_signatures(signer, &sub.key, &sub.signatures);
            let record = Key::subkey(format, sub.key.clone(), None, signatures, primary.grip)?;
            primary.subkey_grips.push(record.grip);
            records.push(record);
        }
        records.insert(0, primary);
        Ok(records)
    }

    /// Split a transferable secret key into key records, primary first.
    pub(crate) fn from_signed_secret(key: &SignedSecretKey, format: KeyFormat) -> Result<Vec<Key>> {
        let signer = key.primary_key.public_key();
        let mut primary = Key::primary(format, signer.clone(), Some(key.primary_key.clone()))?;
        primary.set_details(&key.details, signer);

        let mut records = Vec::with_capacity(key.secret_subkeys.len() + key.public_subkeys.len() + 1);
        for sub in &key.secret_subkeys {
            let public = sub.key.public_key();
            let signatures = subkey_signatures(signer, public, &sub.signatures);
            let record = Key::subkey(
                format,
                public.clone(),
                Some(sub.key.clone()),
                signatures,
                primary.grip,
            )?;
            primary.subkey_grips.push(record.grip);
            records.push(record);
        }
        for sub in &key.public_subkeys {
            let signatures = subkey_signatures(signer, &sub.key, &sub.signatures);
            let record = Key::subkey(format, sub.key.clone(), None, signatures, primary.grip)?;
            primary.subkey_grips.push(record.grip);
            records.push(record);
        }
        records.insert(0, primary);
        Ok(records)
    }

    /// Take over user ids and key-level signatures. Revocations that do not
    /// verify against `primary` are dropped.
    fn set_details(&mut self, details: &SignedKeyDetails, primary: &PublicKey) {
        self.users = details
            .users
            .iter()
            .map(|user| SignedUser {
                id: user.id.clone(),
                signatures: user
                    .signatures
                    .iter()
                    .filter(|sig| {
                        accept_revocation(sig, |s| {
                            s.verify_certification(primary, Tag::UserId, &user.id)
                        })
                    })
                    .cloned()
                    .collect(),
            })
            .collect();
        self.user_attributes = details.user_attributes.clone();
        self.signatures = details
            .revocation_signatures
            .iter()
            .chain(details.direct_signatures.iter())
            .filter(|sig| accept_revocation(sig, |s| s.verify_key(primary)))
            .cloned()
            .collect();
    }

    /// Key-level signatures and user ids regrouped the way rpgp expects them.
    pub(crate) fn details(&self) -> SignedKeyDetails {
        let (revocations, direct): (Vec<Signature>, Vec<Signature>) = self
            .signatures
            .iter()
            .cloned()
            .partition(|sig| sig.typ() == Some(SignatureType::KeyRevocation));
        SignedKeyDetails::new(revocations, direct, self.users.clone(), self.user_attributes.clone())
    }

    /// Public record with the secret half dropped.
    pub(crate) fn public_copy(&self) -> Key {
        Key {
            id: next_key_ref(),
            secret: None,
            unlocked: None,
            ..self.clone()
        }
    }

    pub fn is_primary(&self) -> bool {
        matches!(self.public, PublicPart::Primary(_))
    }

    pub fn is_sub(&self) -> bool {
        !self.is_primary()
    }

    pub fn format(&self) -> KeyFormat {
        self.format
    }

    pub fn grip(&self) -> Grip {
        self.grip
    }

    pub fn primary_grip(&self) -> Option<Grip> {
        self.primary_grip
    }

    pub fn subkey_grips(&self) -> &[Grip] {
        &self.subkey_grips
    }

    pub fn fingerprint(&self) -> Vec<u8> {
        with_public!(&self.public, k => k.fingerprint().as_bytes().to_vec())
    }

    pub fn fingerprint_hex(&self) -> String {
        hex::encode_upper(self.fingerprint())
    }

    pub fn keyid(&self) -> [u8; 8] {
        with_public!(&self.public, k => keyid_bytes(k))
    }

    pub fn keyid_hex(&self) -> String {
        hex::encode_upper(self.keyid())
    }

    pub(crate) fn pgp_algorithm(&self) -> PublicKeyAlgorithm {
        with_public!(&self.public, k => k.algorithm())
    }

    pub fn algorithm(&self) -> Option<PublicKeyAlg> {
        PublicKeyAlg::from_pgp(self.pgp_algorithm())
    }

    pub fn algorithm_name(&self) -> &'static str {
        self.algorithm().map(|a| a.as_str()).unwrap_or("unknown")
    }

    pub fn bits(&self) -> usize {
        with_public!(&self.public, k => key_bits(k))
    }

    pub fn curve(&self) -> Option<Curve> {
        with_public!(&self.public, k => key_curve(k))
    }

    /// Creation time, seconds since the epoch.
    pub fn creation(&self) -> u32 {
        with_public!(&self.public, k => to_secs(k.created_at()))
    }

    /// The signature whose subpackets describe this key's properties.
    pub(crate) fn self_signature(&self) -> Option<&Signature> {
        if self.is_primary() {
            latest_certification(&self.users)
                .map(|(_, sig)| sig)
                .or_else(|| latest_direct(&self.signatures))
        } else {
            latest_binding(&self.signatures)
        }
    }

    /// Validity period in seconds after creation, 0 when the key never expires.
    pub fn expiration(&self) -> u32 {
        self.self_signature()
            .and_then(|sig| sig.key_expiration_time())
            .map(duration_secs)
            .unwrap_or(0)
    }

    pub fn usage(&self) -> KeyUsage {
        let flags = self
            .self_signature()
            .map(|sig| KeyUsage::from_key_flags(&sig.key_flags()))
            .unwrap_or_default();
        if !flags.is_empty() {
            return flags;
        }
        self.algorithm()
            .map(|alg| alg.default_usage(self.is_primary()))
            .unwrap_or_default()
    }

    pub fn can_sign(&self) -> bool {
        self.usage().sign && self.algorithm().map(|a| a.can_sign()).unwrap_or(false)
    }

    /// Whether the algorithm itself can encrypt, whatever the usage flags say.
    pub(crate) fn has_encryption_algorithm(&self) -> bool {
        with_public!(&self.public, k => k.is_encryption_key())
    }

    pub fn can_encrypt(&self) -> bool {
        self.usage().encrypt && self.has_encryption_algorithm()
    }

    /// Revocations are checked against the primary when a record is built,
    /// so any revocation kept here was issued by the key itself.
    pub(crate) fn revocation_signature(&self) -> Option<&Signature> {
        self.signatures.iter().find(|sig| is_revocation(sig))
    }

    pub fn is_revoked(&self) -> bool {
        self.revocation_signature().is_some()
    }

    /// Revocation code and reason text, if revoked.
    pub fn revocation(&self) -> Option<(RevocationCode, String)> {
        let sig = self.revocation_signature()?;
        Some(signature_revocation(sig).unwrap_or((RevocationCode::NoReason, String::new())))
    }

    pub fn uids(&self) -> Vec<String> {
        self.users
            .iter()
            .map(|u| String::from_utf8_lossy(u.id.id()).to_string())
            .collect()
    }

    /// Index of the user id flagged primary, else the first one.
    pub(crate) fn primary_uid_index(&self) -> Option<usize> {
        if self.users.is_empty() {
            return None;
        }
        let flagged = self.users.iter().position(|user| {
            user.signatures.iter().any(|sig| {
                sig.config()
                    .map(|config| {
                        config
                            .hashed_subpackets()
                            .any(|sp| matches!(sp.data, SubpacketData::IsPrimary(true)))
                    })
                    .unwrap_or(false)
            })
        });
        Some(flagged.unwrap_or(0))
    }

    pub fn primary_uid(&self) -> Option<String> {
        self.primary_uid_index().map(|idx| self.uids()[idx].clone())
    }

    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    pub fn is_protected(&self) -> bool {
        self.secret.as_ref().map(|s| s.is_protected()).unwrap_or(false)
    }

    /// Protected secret material without a cached passphrase.
    pub fn is_locked(&self) -> bool {
        self.is_protected() && self.unlocked.is_none()
    }

    pub fn protection(&self) -> Option<ProtectionInfo> {
        self.secret.as_ref().and_then(|s| s.protection())
    }

    /// Passphrase usable for secret operations right now, if any.
    pub(crate) fn usable_password(&self) -> Option<Password> {
        if !self.is_protected() {
            return Some(Password::empty());
        }
        self.unlocked
            .as_ref()
            .map(|pw| Password::from(pw.expose_secret().as_str()))
    }
}

/// Subkey signatures with unverifiable revocations dropped.
fn subkey_signatures(primary: &PublicKey, subkey: &PublicSubkey, sigs: &[Signature]) -> Vec<Signature> {
    sigs.iter()
        .filter(|sig| accept_revocation(sig, |s| s.verify_subkey_binding(primary, subkey)))
        .cloned()
        .collect()
}

/// Assemble a transferable public key from a primary record and its subkeys.
pub(crate) fn assemble_public(primary: &Key, subkeys: &[&Key]) -> Result<SignedPublicKey> {
    let primary_key = match &primary.public {
        PublicPart::Primary(k) => k.clone(),
        PublicPart::Sub(_) => return Err(Error::BadParameters("not a primary key".to_string())),
    };
    let public_subkeys = subkeys
        .iter()
        .filter_map(|sub| match &sub.public {
            PublicPart::Sub(k) => Some(SignedPublicSubKey {
                key: k.clone(),
                signatures: sub.signatures.clone(),
            }),
            PublicPart::Primary(_) => None,
        })
        .collect();
    Ok(SignedPublicKey {
        primary_key,
        details: primary.details(),
        public_subkeys,
    })
}

/// Assemble a transferable secret key. Subkeys without secret material are
/// carried as public subkeys.
pub(crate) fn assemble_secret(primary: &Key, subkeys: &[&Key]) -> Result<SignedSecretKey> {
    let primary_key = match &primary.secret {
        Some(SecretPart::Primary(k)) => k.clone(),
        _ => return Err(Error::NoSuitableKey),
    };
    let mut public_subkeys = Vec::new();
    let mut secret_subkeys = Vec::new();
    for sub in subkeys {
        match (&sub.public, &sub.secret) {
            (_, Some(SecretPart::Sub(k))) => secret_subkeys.push(SignedSecretSubKey {
                key: k.clone(),
                signatures: sub.signatures.clone(),
            }),
            (PublicPart::Sub(k), None) => public_subkeys.push(SignedPublicSubKey {
                key: k.clone(),
                signatures: sub.signatures.clone(),
            }),
            _ => {}
        }
    }
    Ok(SignedSecretKey::new(
        primary_key,
        primary.details(),
        public_subkeys,
        secret_subkeys,
    ))
}

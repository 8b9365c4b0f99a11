//! Key generation operations.
//!
//! A [`GenerateOp`] is configured through setters and executed once. Primary
//! keys are generated together with a positive self-certification of their
//! user id; subkeys are bound by an existing primary whose secret material is
//! available. Both halves land in their stores only when every step
//! succeeded.

use std::str::FromStr;

use pgp::composed::{DsaKeySize, KeyType, SecretKeyParamsBuilder, SignedSecretKey, SubkeyParamsBuilder};
use pgp::crypto::ecc_curve::ECCCurve;
use pgp::crypto::hash::HashAlgorithm;
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use pgp::packet::{SecretSubkey, UserId};
use pgp::types::{CompressionAlgorithm, Password, SignedUser};
use rand::thread_rng;
use secrecy::{ExposeSecret, SecretString};

use crate::certify::{
    back_signature, bind_subkey, certify_user, primary_secret, Preferences, SelfSigParams,
};
use crate::error::{Error, Result};
use crate::ffi::Ffi;
use crate::handle::KeyHandle;
use crate::key::{Grip, Key, KeyRef};
use crate::locator::KeyLocator;
use crate::protect::{secret_password, ProtectionParams};
use crate::types::{
    cipher_from_name, compression_from_name, hash_from_name, Curve, KeyUsage, ProtectionMode,
    PublicKeyAlg, DEFAULT_RSA_BITS, MAX_USERID_LEN,
};

/// Preference lists used when the caller leaves them empty.
fn default_preferences(prefs: &Preferences) -> Preferences {
    let mut prefs = prefs.clone();
    if prefs.ciphers.is_empty() {
        prefs.ciphers = vec![
            SymmetricKeyAlgorithm::AES256,
            SymmetricKeyAlgorithm::AES192,
            SymmetricKeyAlgorithm::AES128,
        ];
    }
    if prefs.hashes.is_empty() {
        prefs.hashes = vec![
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha384,
            HashAlgorithm::Sha512,
            HashAlgorithm::Sha224,
        ];
    }
    if prefs.compression.is_empty() {
        prefs.compression = vec![
            CompressionAlgorithm::ZLIB,
            CompressionAlgorithm::BZip2,
            CompressionAlgorithm::ZIP,
            CompressionAlgorithm::Uncompressed,
        ];
    }
    prefs
}

/// Builder for one primary key or subkey.
#[derive(Debug)]
pub struct GenerateOp {
    /// Primary the subkey is generated for; `None` for primary generation.
    primary: Option<KeyHandle>,
    alg: PublicKeyAlg,
    bits: usize,
    curve: Option<Curve>,
    dsa_qbits: usize,
    hash: Option<HashAlgorithm>,
    usage: KeyUsage,
    userid: Option<String>,
    expiration: u32,
    prefs: Preferences,
    protection: ProtectionParams,
    password: Option<SecretString>,
    request_password: bool,
    generated: Option<KeyHandle>,
}

impl GenerateOp {
    fn new(alg: PublicKeyAlg, primary: Option<KeyHandle>) -> Self {
        let usage = alg.default_usage(primary.is_none());
        Self {
            primary,
            alg,
            bits: if alg.has_bits() { DEFAULT_RSA_BITS } else { 0 },
            curve: Curve::default_for(alg),
            dsa_qbits: 0,
            hash: None,
            usage,
            userid: None,
            expiration: 0,
            prefs: Preferences::default(),
            protection: ProtectionParams::default(),
            password: None,
            request_password: false,
            generated: None,
        }
    }

    /// Start generating a primary key. The algorithm must be able to sign.
    pub fn create(alg: &str) -> Result<GenerateOp> {
        let alg = PublicKeyAlg::from_name(alg)
            .ok_or_else(|| Error::BadParameters(format!("unknown public key algorithm: {}", alg)))?;
        if !alg.can_sign() {
            return Err(Error::BadParameters(format!(
                "{} cannot be used for a primary key",
                alg.as_str()
            )));
        }
        Ok(Self::new(alg, None))
    }

    /// Start generating a subkey for `primary`, which must be a primary key
    /// with secret material of a signing algorithm.
    pub fn subkey_create(ffi: &mut Ffi, primary: &mut KeyHandle, alg: &str) -> Result<GenerateOp> {
        let alg = PublicKeyAlg::from_name(alg)
            .ok_or_else(|| Error::BadParameters(format!("unknown public key algorithm: {}", alg)))?;
        let id = primary
            .require_secret(ffi)
            .map_err(|_| Error::BadParameters("primary secret key is not available".to_string()))?;
        let key = ffi.secring.get(id).ok_or(Error::KeyNotFound)?;
        if !key.is_primary() {
            return Err(Error::BadParameters("not a primary key".to_string()));
        }
        if !key.algorithm().is_some_and(|a| a.can_sign()) {
            return Err(Error::BadParameters("primary key cannot sign".to_string()));
        }
        Ok(Self::new(alg, Some(primary.clone())))
    }

    fn is_primary(&self) -> bool {
        self.primary.is_none()
    }

    fn primary_only(&self, what: &str) -> Result<()> {
        if self.is_primary() {
            Ok(())
        } else {
            Err(Error::BadParameters(format!("{} is only valid for primary keys", what)))
        }
    }

    pub fn set_bits(&mut self, bits: usize) -> Result<()> {
        if !self.alg.has_bits() {
            return Err(Error::BadParameters(format!(
                "key size cannot be set for {}",
                self.alg.as_str()
            )));
        }
        if !(1024..=16384).contains(&bits) {
            return Err(Error::BadParameters(format!("invalid key size: {}", bits)));
        }
        self.bits = bits;
        Ok(())
    }

    pub fn set_curve(&mut self, curve: &str) -> Result<()> {
        if !self.alg.has_curve() {
            return Err(Error::BadParameters(format!(
                "curve cannot be set for {}",
                self.alg.as_str()
            )));
        }
        let curve = Curve::from_name(curve)
            .ok_or_else(|| Error::BadParameters(format!("unknown curve: {}", curve)))?;
        if !curve.fits(self.alg) {
            return Err(Error::BadParameters(format!(
                "curve {} cannot be used with {}",
                curve.as_str(),
                self.alg.as_str()
            )));
        }
        self.curve = Some(curve);
        Ok(())
    }

    /// Size of the DSA subgroup. Left at 0 it follows from the key size.
    pub fn set_dsa_qbits(&mut self, qbits: usize) -> Result<()> {
        if self.alg != PublicKeyAlg::Dsa {
            return Err(Error::BadParameters("q bits are only valid for DSA".to_string()));
        }
        self.dsa_qbits = qbits;
        Ok(())
    }

    pub fn set_hash(&mut self, hash: &str) -> Result<()> {
        self.hash = Some(
            hash_from_name(hash)
                .ok_or_else(|| Error::BadParameters(format!("unknown hash algorithm: {}", hash)))?,
        );
        Ok(())
    }

    pub fn set_protection_password(&mut self, password: &str) -> Result<()> {
        if password.is_empty() {
            return Err(Error::BadParameters("empty password".to_string()));
        }
        self.password = Some(SecretString::new(password.to_string()));
        Ok(())
    }

    /// Ask the password provider (context "protect") when no password is set.
    pub fn set_request_password(&mut self, request: bool) {
        self.request_password = request;
    }

    pub fn set_protection_cipher(&mut self, cipher: &str) -> Result<()> {
        self.protection.cipher = cipher_from_name(cipher)
            .ok_or_else(|| Error::BadParameters(format!("unknown cipher: {}", cipher)))?;
        Ok(())
    }

    pub fn set_protection_hash(&mut self, hash: &str) -> Result<()> {
        self.protection.hash = hash_from_name(hash)
            .ok_or_else(|| Error::BadParameters(format!("unknown hash algorithm: {}", hash)))?;
        Ok(())
    }

    pub fn set_protection_mode(&mut self, mode: &str) -> Result<()> {
        self.protection.mode = ProtectionMode::from_name(mode)
            .ok_or_else(|| Error::BadParameters(format!("unknown protection mode: {}", mode)))?;
        Ok(())
    }

    pub fn set_protection_iterations(&mut self, iterations: usize) {
        self.protection.iterations = iterations;
    }

    /// Add a usage flag. Flags the algorithm cannot carry are `NotSupported`.
    pub fn add_usage(&mut self, usage: &str) -> Result<()> {
        let flag = KeyUsage::from_name(usage)
            .ok_or_else(|| Error::BadParameters(format!("unknown key usage: {}", usage)))?;
        if !flag.is_subset_of(&self.alg.allowed_usage()) {
            return Err(Error::NotSupported(format!(
                "{} keys cannot {}",
                self.alg.as_str(),
                usage
            )));
        }
        self.usage = self.usage.union(flag);
        Ok(())
    }

    pub fn clear_usage(&mut self) {
        self.usage = KeyUsage::default();
    }

    pub fn set_userid(&mut self, userid: &str) -> Result<()> {
        self.primary_only("user id")?;
        if userid.is_empty() || userid.len() > MAX_USERID_LEN {
            return Err(Error::BadParameters("invalid user id length".to_string()));
        }
        self.userid = Some(userid.to_string());
        Ok(())
    }

    /// Seconds after creation, 0 for a key that never expires.
    pub fn set_expiration(&mut self, expiration: u32) {
        self.expiration = expiration;
    }

    pub fn clear_pref_hashes(&mut self) -> Result<()> {
        self.primary_only("hash preferences")?;
        self.prefs.hashes.clear();
        Ok(())
    }

    pub fn add_pref_hash(&mut self, hash: &str) -> Result<()> {
        self.primary_only("hash preferences")?;
        let hash = hash_from_name(hash)
            .ok_or_else(|| Error::BadParameters(format!("unknown hash algorithm: {}", hash)))?;
        if !self.prefs.hashes.contains(&hash) {
            self.prefs.hashes.push(hash);
        }
        Ok(())
    }

    pub fn clear_pref_ciphers(&mut self) -> Result<()> {
        self.primary_only("cipher preferences")?;
        self.prefs.ciphers.clear();
        Ok(())
    }

    pub fn add_pref_cipher(&mut self, cipher: &str) -> Result<()> {
        self.primary_only("cipher preferences")?;
        let cipher = cipher_from_name(cipher)
            .ok_or_else(|| Error::BadParameters(format!("unknown cipher: {}", cipher)))?;
        if !self.prefs.ciphers.contains(&cipher) {
            self.prefs.ciphers.push(cipher);
        }
        Ok(())
    }

    pub fn clear_pref_compression(&mut self) -> Result<()> {
        self.primary_only("compression preferences")?;
        self.prefs.compression.clear();
        Ok(())
    }

    pub fn add_pref_compression(&mut self, compression: &str) -> Result<()> {
        self.primary_only("compression preferences")?;
        let alg = compression_from_name(compression).ok_or_else(|| {
            Error::BadParameters(format!("unknown compression algorithm: {}", compression))
        })?;
        if !self.prefs.compression.contains(&alg) {
            self.prefs.compression.push(alg);
        }
        Ok(())
    }

    pub fn set_pref_keyserver(&mut self, keyserver: Option<&str>) -> Result<()> {
        self.primary_only("key server preference")?;
        self.prefs.key_server = keyserver.filter(|s| !s.is_empty()).map(str::to_string);
        Ok(())
    }

    fn pgp_curve(&self) -> Result<ECCCurve> {
        let curve = self
            .curve
            .ok_or_else(|| Error::BadParameters("curve is not set".to_string()))?;
        curve
            .to_pgp()
            .ok_or_else(|| Error::NotSupported(format!("curve {}", curve.as_str())))
    }

    fn key_type(&self) -> Result<KeyType> {
        match self.alg {
            PublicKeyAlg::Rsa => Ok(KeyType::Rsa(self.bits as u32)),
            PublicKeyAlg::Ecdsa => Ok(KeyType::ECDSA(self.pgp_curve()?)),
            PublicKeyAlg::Ecdh => Ok(KeyType::ECDH(self.pgp_curve()?)),
            PublicKeyAlg::Eddsa => Ok(KeyType::Ed25519Legacy),
            PublicKeyAlg::Dsa => Ok(KeyType::Dsa(self.dsa_size()?)),
            PublicKeyAlg::Elgamal | PublicKeyAlg::Sm2 => Err(Error::NotSupported(format!(
                "{} key generation",
                self.alg.as_str()
            ))),
        }
    }

    /// DSA parameter set for the configured key and subgroup sizes.
    fn dsa_size(&self) -> Result<DsaKeySize> {
        let (size, qbits) = match self.bits {
            1024 => (DsaKeySize::B1024, 160),
            2048 => (DsaKeySize::B2048, 256),
            3072 => (DsaKeySize::B3072, 256),
            bits => return Err(Error::NotSupported(format!("DSA key size {}", bits))),
        };
        if self.dsa_qbits != 0 && self.dsa_qbits != qbits {
            return Err(Error::NotSupported(format!(
                "DSA {}/{} parameters",
                self.bits, self.dsa_qbits
            )));
        }
        Ok(size)
    }

    fn self_sig_params(&self, primary_uid: bool) -> SelfSigParams {
        SelfSigParams {
            usage: self.usage,
            expiration: self.expiration,
            primary_uid,
            hash: self.hash,
            prefs: if primary_uid {
                default_preferences(&self.prefs)
            } else {
                Preferences::default()
            },
        }
    }

    /// Password the new secret material is protected with, if any.
    fn protection_password(&self, ffi: &mut Ffi) -> Result<Option<SecretString>> {
        if let Some(password) = &self.password {
            return Ok(Some(password.clone()));
        }
        if !self.request_password {
            return Ok(None);
        }
        match ffi.ask_password(None, "protect") {
            Some(password) if !password.expose_secret().is_empty() => Ok(Some(password)),
            _ => Err(Error::BadPassword),
        }
    }

    /// Generate the key and insert both halves into the stores.
    ///
    /// # Errors
    /// [`Error::BadState`] when called a second time,
    /// [`Error::NotSupported`] for algorithms that cannot be generated.
    pub fn execute(&mut self, ffi: &mut Ffi) -> Result<()> {
        if self.generated.is_some() {
            return Err(Error::BadState("key already generated".to_string()));
        }
        let record = match self.primary.clone() {
            None => self.generate_primary(ffi)?,
            Some(mut primary) => self.generate_subkey(ffi, &mut primary)?,
        };
        let (public, secret) = insert_pair(ffi, record.clone())?;
        let message = format!(
            "generated {} {} key {}",
            self.alg.as_str(),
            if self.is_primary() { "primary" } else { "sub" },
            record.keyid_hex()
        );
        ffi.log_line(message);
        self.generated = Some(KeyHandle::new(
            Some(public),
            Some(secret),
            KeyLocator::Grip(record.grip()),
        ));
        Ok(())
    }

    fn generate_primary(&self, ffi: &mut Ffi) -> Result<Key> {
        let userid = self
            .userid
            .clone()
            .ok_or_else(|| Error::BadParameters("primary key requires a user id".to_string()))?;
        let key_type = self.key_type()?;

        let params = SecretKeyParamsBuilder::default()
            .key_type(key_type)
            .can_certify(true)
            .can_sign(self.usage.sign)
            .can_encrypt(false)
            .primary_user_id(userid.clone())
            .build()
            .map_err(|e| Error::KeyGeneration(e.to_string()))?;
        let signed: SignedSecretKey = params
            .generate(thread_rng())
            .and_then(|key| key.sign(thread_rng(), &Password::empty()))
            .map_err(|e| Error::KeyGeneration(e.to_string()))?;

        let format = ffi.secring.format().key_format();
        let mut record = Key::from_signed_secret(&signed, format)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::KeyGeneration("no primary key generated".to_string()))?;

        let secret = primary_secret(&record)?;
        let user = UserId::from_str(Default::default(), &userid)
            .map_err(|e| Error::BadParameters(format!("invalid user id: {}", e)))?;
        let sig = certify_user(&secret, &Password::empty(), &user, &self.self_sig_params(true))?;
        record.users = vec![SignedUser::new(user, vec![sig])];
        record.signatures.clear();

        self.protect_record(ffi, &mut record)?;
        Ok(record)
    }

    fn generate_subkey(&self, ffi: &mut Ffi, primary: &mut KeyHandle) -> Result<Key> {
        let key_type = self.key_type()?;
        let primary_id = primary.require_secret(ffi)?;
        let password = secret_password(ffi, primary_id, "add subkey")?;
        let primary_record = ffi.secring.get(primary_id).ok_or(Error::KeyNotFound)?;
        let primary_key = primary_secret(primary_record)?;
        let primary_grip = primary_record.grip();

        let subkey = fresh_subkey(key_type, self.alg)?;
        let params = self.self_sig_params(false);
        let embedded = if params.usage.sign {
            Some(back_signature(&subkey, &Password::empty(), &primary_key)?)
        } else {
            None
        };
        let binding = bind_subkey(&primary_key, &password, subkey.public_key(), embedded, &params)?;

        let format = ffi.secring.format().key_format();
        let public = subkey.public_key().clone();
        let mut record = Key::subkey(format, public, Some(subkey), vec![binding], primary_grip)?;
        self.protect_record(ffi, &mut record)?;
        Ok(record)
    }

    fn protect_record(&self, ffi: &mut Ffi, record: &mut Key) -> Result<()> {
        let Some(password) = self.protection_password(ffi)? else {
            return Ok(());
        };
        let secret = record.secret.as_mut().ok_or(Error::NoSuitableKey)?;
        self.protection
            .apply(secret, password.expose_secret())
            .map_err(|e| Error::BadParameters(format!("failed to protect generated key: {}", e)))
    }

    /// Handle of the generated key.
    pub fn get_key(&self) -> Result<KeyHandle> {
        self.generated
            .clone()
            .ok_or_else(|| Error::BadParameters("no key was generated".to_string()))
    }
}

/// Fresh subkey material of `key_type`.
///
/// rpgp generates subkeys only as part of a transferable key, so the
/// material is taken from a throwaway Ed25519 primary and re-bound by the
/// caller.
fn fresh_subkey(key_type: KeyType, alg: PublicKeyAlg) -> Result<SecretSubkey> {
    let subkey = SubkeyParamsBuilder::default()
        .key_type(key_type)
        .can_sign(false)
        .can_encrypt(alg.can_encrypt())
        .can_authenticate(false)
        .build()
        .map_err(|e| Error::KeyGeneration(e.to_string()))?;
    let params = SecretKeyParamsBuilder::default()
        .key_type(KeyType::Ed25519Legacy)
        .can_certify(true)
        .can_sign(false)
        .primary_user_id("subkey carrier".to_string())
        .subkeys(vec![subkey])
        .build()
        .map_err(|e| Error::KeyGeneration(e.to_string()))?;
    let carrier = params
        .generate(thread_rng())
        .and_then(|key| key.sign(thread_rng(), &Password::empty()))
        .map_err(|e| Error::KeyGeneration(e.to_string()))?;
    carrier
        .secret_subkeys
        .into_iter()
        .next()
        .map(|sub| sub.key)
        .ok_or_else(|| Error::KeyGeneration("no subkey generated".to_string()))
}

/// Add the public copy and the secret record of a generated key, removing
/// the public copy again when the secret store refuses the record.
fn insert_pair(ffi: &mut Ffi, record: Key) -> Result<(KeyRef, KeyRef)> {
    let mut public = record.public_copy();
    public.format = ffi.pubring.format().key_format();
    let public_id = ffi.pubring.add_key(public)?;
    match ffi.secring.add_key(record) {
        Ok(secret_id) => Ok((public_id, secret_id)),
        Err(e) => {
            ffi.pubring.remove_key(public_id);
            Err(e)
        }
    }
}

/// Remove every record of a generated key pair, subkeys included.
pub(crate) fn discard(ffi: &mut Ffi, grip: &Grip) {
    for store in [&mut ffi.pubring, &mut ffi.secring] {
        let Some(key) = store.by_grip(grip) else { continue };
        let (id, subkeys) = (key.id, key.subkey_grips.clone());
        for sub in subkeys {
            if let Some(sub_id) = store.by_grip(&sub).map(|k| k.id) {
                store.remove_key(sub_id);
            }
        }
        store.remove_key(id);
    }
}

/// One half of a convenience generation request.
struct KeySpec<'a> {
    alg: &'a str,
    bits: usize,
    curve: Option<&'a str>,
}

impl Ffi {
    /// Generate a primary key with an optional encryption subkey.
    ///
    /// The primary is created with sign and certify usage, the subkey with
    /// encrypt usage. With a password both secret keys end up protected.
    /// Nothing stays in the stores when any step fails.
    ///
    /// # Arguments
    /// * `key_alg`, `sub_alg` - Algorithm names, `sub_alg` `None` for no subkey
    /// * `key_bits`, `sub_bits` - Sizes for RSA/DSA/ElGamal, 0 for the default
    /// * `key_curve`, `sub_curve` - Curve names for elliptic curve algorithms
    /// * `userid` - User id of the primary
    /// * `password` - Protection password, `None` leaves the keys unprotected
    #[allow(clippy::too_many_arguments)]
    pub fn generate_key_ex(
        &mut self,
        key_alg: &str,
        sub_alg: Option<&str>,
        key_bits: usize,
        sub_bits: usize,
        key_curve: Option<&str>,
        sub_curve: Option<&str>,
        userid: &str,
        password: Option<&str>,
    ) -> Result<KeyHandle> {
        let primary = KeySpec {
            alg: key_alg,
            bits: key_bits,
            curve: key_curve,
        };
        let sub = sub_alg.map(|alg| KeySpec {
            alg,
            bits: sub_bits,
            curve: sub_curve,
        });

        let mut op = GenerateOp::create(primary.alg)?;
        configure(&mut op, &primary)?;
        op.set_userid(userid)?;
        op.add_usage("sign")?;
        op.add_usage("certify")?;
        op.execute(self)?;
        let mut handle = op.get_key()?;
        let grip = handle.any_key(self)?.grip();

        let finished = self.finish_generate_ex(&mut handle, sub.as_ref(), password);
        if let Err(e) = finished {
            discard(self, &grip);
            return Err(e);
        }
        Ok(handle)
    }

    fn finish_generate_ex(
        &mut self,
        primary: &mut KeyHandle,
        sub: Option<&KeySpec<'_>>,
        password: Option<&str>,
    ) -> Result<()> {
        if let Some(sub) = sub {
            let mut op = GenerateOp::subkey_create(self, primary, sub.alg)?;
            configure(&mut op, sub)?;
            op.add_usage("encrypt")?;
            if let Some(password) = password {
                op.set_protection_password(password)?;
            }
            op.execute(self)?;
        }
        if let Some(password) = password {
            primary.protect(self, password, None, None, None, 0)?;
        }
        Ok(())
    }

    /// RSA primary with an optional RSA subkey (`sub_bits` 0 for none).
    pub fn generate_key_rsa(
        &mut self,
        bits: usize,
        sub_bits: usize,
        userid: &str,
        password: Option<&str>,
    ) -> Result<KeyHandle> {
        let sub_alg = (sub_bits != 0).then_some("RSA");
        self.generate_key_ex("RSA", sub_alg, bits, sub_bits, None, None, userid, password)
    }

    /// DSA primary with an optional ElGamal subkey.
    pub fn generate_key_dsa_eg(
        &mut self,
        bits: usize,
        sub_bits: usize,
        userid: &str,
        password: Option<&str>,
    ) -> Result<KeyHandle> {
        let sub_alg = (sub_bits != 0).then_some("ELGAMAL");
        self.generate_key_ex("DSA", sub_alg, bits, sub_bits, None, None, userid, password)
    }

    /// ECDSA primary with an ECDH subkey on the same curve.
    pub fn generate_key_ec(&mut self, curve: &str, userid: &str, password: Option<&str>) -> Result<KeyHandle> {
        self.generate_key_ex("ECDSA", Some("ECDH"), 0, 0, Some(curve), Some(curve), userid, password)
    }

    /// EdDSA primary with a Curve25519 ECDH subkey.
    pub fn generate_key_25519(&mut self, userid: &str, password: Option<&str>) -> Result<KeyHandle> {
        self.generate_key_ex("EDDSA", Some("ECDH"), 0, 0, None, Some("Curve25519"), userid, password)
    }

    /// SM2 primary with an SM2 subkey.
    pub fn generate_key_sm2(&mut self, userid: &str, password: Option<&str>) -> Result<KeyHandle> {
        self.generate_key_ex("SM2", Some("SM2"), 0, 0, None, None, userid, password)
    }
}

fn configure(op: &mut GenerateOp, spec: &KeySpec<'_>) -> Result<()> {
    if spec.bits != 0 {
        op.set_bits(spec.bits)?;
    }
    if let Some(curve) = spec.curve {
        op.set_curve(curve)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_requires_signing_algorithm() {
        assert!(matches!(GenerateOp::create("ECDH"), Err(Error::BadParameters(_))));
        assert!(matches!(GenerateOp::create("ELGAMAL"), Err(Error::BadParameters(_))));
        assert!(matches!(GenerateOp::create("ROT13"), Err(Error::BadParameters(_))));
        assert!(GenerateOp::create("rsa").is_ok());
        assert!(GenerateOp::create("EdDSA").is_ok());
    }

    #[test]
    fn test_setters_check_algorithm() {
        let mut op = GenerateOp::create("ECDSA").unwrap();
        assert!(op.set_bits(2048).is_err());
        assert!(op.set_dsa_qbits(256).is_err());
        assert!(op.set_curve("NIST P-384").is_ok());
        assert!(op.set_curve("Ed25519").is_err());
        assert!(op.set_curve("no such curve").is_err());

        let mut op = GenerateOp::create("RSA").unwrap();
        assert!(op.set_curve("NIST P-256").is_err());
        assert!(op.set_bits(3072).is_ok());
        assert!(op.set_bits(512).is_err());
    }

    #[test]
    fn test_add_usage() {
        let mut op = GenerateOp::create("EDDSA").unwrap();
        assert!(matches!(op.add_usage("encrypt"), Err(Error::NotSupported(_))));
        assert!(matches!(op.add_usage("fly"), Err(Error::BadParameters(_))));
        op.clear_usage();
        op.add_usage("authenticate").unwrap();
        assert!(op.usage.authenticate);
        assert!(!op.usage.sign);
    }

    #[test]
    fn test_default_usage_and_prefs() {
        let op = GenerateOp::create("RSA").unwrap();
        assert_eq!(op.usage, KeyUsage::sign_certify());
        assert_eq!(op.bits, DEFAULT_RSA_BITS);

        let prefs = default_preferences(&Preferences::default());
        assert_eq!(prefs.ciphers[0], SymmetricKeyAlgorithm::AES256);
        assert_eq!(prefs.hashes.len(), 4);
        assert_eq!(prefs.compression.last(), Some(&CompressionAlgorithm::Uncompressed));
    }

    #[test]
    fn test_unsupported_algorithm_at_execute() {
        let mut ffi = Ffi::new("GPG", "GPG").unwrap();
        let mut op = GenerateOp::create("SM2").unwrap();
        op.set_userid("sm2 <sm2@example.com>").unwrap();
        assert!(matches!(op.execute(&mut ffi), Err(Error::NotSupported(_))));
        assert_eq!(ffi.get_public_key_count(), 0);
        assert!(op.get_key().is_err());
    }

    #[test]
    fn test_dsa_sizes() {
        let mut op = GenerateOp::create("DSA").unwrap();
        op.set_bits(1024).unwrap();
        assert_eq!(op.dsa_size().unwrap(), DsaKeySize::B1024);
        op.set_dsa_qbits(256).unwrap();
        assert!(matches!(op.dsa_size(), Err(Error::NotSupported(_))));
        op.set_bits(3072).unwrap();
        assert_eq!(op.dsa_size().unwrap(), DsaKeySize::B3072);
        op.set_bits(4096).unwrap();
        assert!(matches!(op.dsa_size(), Err(Error::NotSupported(_))));
    }

    #[test]
    fn test_dsa_primary_generation() {
        let mut ffi = Ffi::new("GPG", "GPG").unwrap();
        let mut op = GenerateOp::create("DSA").unwrap();
        op.set_bits(1024).unwrap();
        op.set_userid("dsa <dsa@example.com>").unwrap();
        op.execute(&mut ffi).unwrap();

        let key = op.get_key().unwrap();
        assert_eq!(key.get_alg(&ffi).unwrap(), "DSA");
        assert_eq!(key.get_bits(&ffi).unwrap(), 1024);
        assert!(key.allows_usage(&ffi, "sign").unwrap());
    }

    #[test]
    fn test_signing_subkey_carries_back_signature() {
        let mut ffi = Ffi::new("GPG", "GPG").unwrap();
        let mut op = GenerateOp::create("EDDSA").unwrap();
        op.set_userid("cross <cross@example.com>").unwrap();
        op.execute(&mut ffi).unwrap();
        let mut primary = op.get_key().unwrap();

        let mut sub_op = GenerateOp::subkey_create(&mut ffi, &mut primary, "EDDSA").unwrap();
        sub_op.clear_usage();
        sub_op.add_usage("sign").unwrap();
        sub_op.execute(&mut ffi).unwrap();
        let sub = sub_op.get_key().unwrap();

        let record = sub.any_key(&ffi).unwrap();
        let binding = record.self_signature().unwrap();
        let backsig = binding.embedded_signature().unwrap();
        assert_eq!(backsig.typ(), Some(pgp::packet::SignatureType::KeyBinding));
        let primary_key = primary.any_key(&ffi).unwrap();
        match (&primary_key.public, &record.public) {
            (crate::key::PublicPart::Primary(p), crate::key::PublicPart::Sub(s)) => {
                backsig.verify_primary_key_binding(s, p).unwrap();
                binding.verify_subkey_binding(p, s).unwrap();
            }
            _ => panic!("unexpected key parts"),
        }
    }

    #[test]
    fn test_primary_generation() {
        let mut ffi = Ffi::new("GPG", "GPG").unwrap();
        let mut op = GenerateOp::create("EDDSA").unwrap();
        op.set_userid("eddsa <eddsa@example.com>").unwrap();
        op.add_pref_hash("SHA512").unwrap();
        op.set_expiration(3600);
        op.execute(&mut ffi).unwrap();
        assert!(matches!(op.execute(&mut ffi), Err(Error::BadState(_))));

        let key = op.get_key().unwrap();
        assert!(key.have_public(&ffi));
        assert!(key.have_secret(&ffi));
        assert_eq!(key.get_primary_uid(&ffi).unwrap(), "eddsa <eddsa@example.com>");
        assert_eq!(key.get_expiration(&ffi).unwrap(), 3600);
        assert!(key.allows_usage(&ffi, "sign").unwrap());
    }

    #[test]
    fn test_subkey_generation_binds_to_primary() {
        let mut ffi = Ffi::new("GPG", "GPG").unwrap();
        let mut op = GenerateOp::create("EDDSA").unwrap();
        op.set_userid("sub <sub@example.com>").unwrap();
        op.execute(&mut ffi).unwrap();
        let mut primary = op.get_key().unwrap();

        let mut sub_op = GenerateOp::subkey_create(&mut ffi, &mut primary, "ECDH").unwrap();
        assert!(sub_op.set_userid("nope").is_err());
        assert!(sub_op.add_pref_cipher("AES128").is_err());
        sub_op.set_curve("Curve25519").unwrap();
        sub_op.execute(&mut ffi).unwrap();
        let sub = sub_op.get_key().unwrap();

        assert_eq!(
            sub.get_primary_grip(&ffi).unwrap(),
            Some(primary.get_grip(&ffi).unwrap())
        );
        assert!(sub.allows_usage(&ffi, "encrypt").unwrap());
        assert_eq!(primary.get_subkey_count(&ffi).unwrap(), 1);
    }
}

//! Structured JSON dumps of keys and signatures.

use pgp::packet::Signature;
use pgp::ser::Serialize;
use pgp::types::{KeyDetails, PublicKeyTrait};
use serde_json::{json, Map, Value};

use crate::error::{Error, Result};
use crate::ffi::Ffi;
use crate::handle::KeyHandle;
use crate::internal::{ecdh_kdf_params, signature_created, signature_expiration, signature_issuer};
use crate::key::{with_public, with_secret, Key};
use crate::locator::KeyLocator;
use crate::types::{compression_name, cipher_name, hash_name, signature_type_name, JsonFlags, KeyUsage, PublicKeyAlg};

fn hex_value(bytes: Vec<u8>) -> Value {
    Value::String(hex::encode_upper(bytes))
}

/// Key flags beyond usage, taken from the latest self-signature.
fn other_flags(key: &Key) -> Vec<&'static str> {
    match key.self_signature() {
        Some(sig) if sig.key_flags().shared() => vec!["shared"],
        _ => Vec::new(),
    }
}

fn insert_usage(obj: &mut Map<String, Value>, usage: KeyUsage, flags: Vec<&'static str>) {
    let names = usage.names();
    if !names.is_empty() {
        obj.insert("usage".to_string(), json!(names));
    }
    if !flags.is_empty() {
        obj.insert("flags".to_string(), json!(flags));
    }
}

fn preferences(sig: &Signature) -> Option<Value> {
    let mut prefs = Map::new();
    let ciphers: Vec<&str> = sig.preferred_symmetric_algs().iter().map(|a| cipher_name(*a)).collect();
    if !ciphers.is_empty() {
        prefs.insert("ciphers".to_string(), json!(ciphers));
    }
    let hashes: Vec<&str> = sig.preferred_hash_algs().iter().map(|a| hash_name(*a)).collect();
    if !hashes.is_empty() {
        prefs.insert("hashes".to_string(), json!(hashes));
    }
    let compression: Vec<&str> = sig
        .preferred_compression_algs()
        .iter()
        .map(|a| compression_name(*a))
        .collect();
    if !compression.is_empty() {
        prefs.insert("compression".to_string(), json!(compression));
    }
    if let Some(server) = sig.preferred_key_server() {
        prefs.insert("key server".to_string(), json!(server));
    }
    (!prefs.is_empty()).then_some(Value::Object(prefs))
}

/// Describe one signature packet. The signer's fingerprint is added when
/// the issuer is loaded in either store.
pub(crate) fn signature_to_json(ffi: &Ffi, sig: &Signature, mpis: bool) -> Result<Value> {
    let mut obj = Map::new();
    obj.insert("type".to_string(), json!(signature_type_name(sig.typ())));
    let config = sig
        .config()
        .ok_or_else(|| Error::BadFormat("signature without configuration".to_string()))?;
    let key_type = PublicKeyAlg::from_pgp(config.pub_alg).map(|a| a.as_str()).unwrap_or("unknown");
    obj.insert("key type".to_string(), json!(key_type));
    obj.insert("hash".to_string(), json!(hash_name(config.hash_alg)));
    obj.insert("creation time".to_string(), json!(signature_created(sig)));
    obj.insert("expiration".to_string(), json!(signature_expiration(sig)));

    let usage = KeyUsage::from_key_flags(&sig.key_flags());
    let flags = if sig.key_flags().shared() { vec!["shared"] } else { Vec::new() };
    insert_usage(&mut obj, usage, flags);
    if let Some(prefs) = preferences(sig) {
        obj.insert("preferences".to_string(), prefs);
    }

    let signer = signature_issuer(sig).map(|keyid| {
        let mut signer = Map::new();
        signer.insert("keyid".to_string(), hex_value(keyid.to_vec()));
        let locator = KeyLocator::KeyId(keyid);
        if let Some(key) = ffi.pubring.search(&locator).or_else(|| ffi.secring.search(&locator)) {
            signer.insert("fingerprint".to_string(), json!(key.fingerprint_hex()));
        }
        Value::Object(signer)
    });
    obj.insert("signer".to_string(), signer.unwrap_or(Value::Null));

    if mpis {
        obj.insert("mpis".to_string(), json!({ "raw": hex_value(sig.to_bytes()?) }));
    }
    Ok(Value::Object(obj))
}

fn key_signatures(ffi: &Ffi, key: &Key, mpis: bool) -> Result<Vec<Value>> {
    let mut sigs = Vec::new();
    for (idx, user) in key.users.iter().enumerate() {
        for sig in &user.signatures {
            let mut value = signature_to_json(ffi, sig, mpis)?;
            if let Value::Object(obj) = &mut value {
                obj.insert("userid".to_string(), json!(idx));
            }
            sigs.push(value);
        }
    }
    for sig in &key.signatures {
        sigs.push(signature_to_json(ffi, sig, mpis)?);
    }
    Ok(sigs)
}

/// Build the JSON description of a key from its public half, falling back
/// to the secret half.
pub(crate) fn key_to_json(ffi: &Ffi, handle: &KeyHandle, flags: JsonFlags) -> Result<Value> {
    let key = handle.any_key(ffi)?;
    let public = handle.public_key(ffi);
    let secret = handle.secret_key(ffi);

    let mut obj = Map::new();
    obj.insert("type".to_string(), json!(key.algorithm_name()));
    obj.insert("length".to_string(), json!(key.bits()));
    if let Some((hash, cipher)) = with_public!(&key.public, k => ecdh_kdf_params(k)) {
        obj.insert("kdf hash".to_string(), json!(hash));
        obj.insert("key wrap cipher".to_string(), json!(cipher));
    }
    if let Some(curve) = key.curve() {
        obj.insert("curve".to_string(), json!(curve.as_str()));
    }
    obj.insert("keyid".to_string(), json!(key.keyid_hex()));
    obj.insert("fingerprint".to_string(), json!(key.fingerprint_hex()));
    obj.insert("grip".to_string(), json!(key.grip().to_hex()));
    obj.insert("revoked".to_string(), json!(key.is_revoked()));
    obj.insert("creation time".to_string(), json!(key.creation()));
    obj.insert("expiration".to_string(), json!(key.expiration()));
    insert_usage(&mut obj, key.usage(), other_flags(key));

    match key.primary_grip() {
        Some(primary) => {
            obj.insert("primary key grip".to_string(), json!(primary.to_hex()));
        }
        None => {
            let subkeys: Vec<String> = key.subkey_grips().iter().map(|g| g.to_hex()).collect();
            obj.insert("subkey grips".to_string(), json!(subkeys));
        }
    }

    let mut public_obj = Map::new();
    public_obj.insert("present".to_string(), json!(public.is_some()));
    if flags.public_mpis {
        let raw = with_public!(&key.public, k => k.public_params().to_bytes())?;
        public_obj.insert("mpis".to_string(), json!({ "raw": hex_value(raw) }));
    }
    obj.insert("public key".to_string(), Value::Object(public_obj));

    let mut secret_obj = Map::new();
    secret_obj.insert("present".to_string(), json!(secret.is_some()));
    if let Some(secret_key) = secret {
        let locked = secret_key.is_locked();
        if flags.secret_mpis {
            let mpis = match (&secret_key.secret, locked) {
                (Some(part), false) => {
                    let raw = with_secret!(part, k => {
                        let mut raw = Vec::new();
                        k.secret_params().to_writer(&mut raw, k.version()).map(|_| raw)
                    })?;
                    json!({ "raw": hex_value(raw) })
                }
                _ => Value::Null,
            };
            secret_obj.insert("mpis".to_string(), mpis);
        }
        secret_obj.insert("locked".to_string(), json!(locked));
        secret_obj.insert("protected".to_string(), json!(secret_key.is_protected()));
    }
    obj.insert("secret key".to_string(), Value::Object(secret_obj));

    if key.is_primary() {
        obj.insert("userids".to_string(), json!(key.uids()));
    }
    if flags.signatures {
        obj.insert(
            "signatures".to_string(),
            Value::Array(key_signatures(ffi, key, flags.signature_mpis)?),
        );
    }
    Ok(Value::Object(obj))
}

impl KeyHandle {
    /// Pretty-printed JSON description of the key.
    ///
    /// # Example
    ///
    /// ```
    /// use rnpcore::{Ffi, JsonFlags};
    ///
    /// let mut ffi = Ffi::new("GPG", "GPG").unwrap();
    /// let key = ffi.generate_key_25519("json <json@example.com>", None).unwrap();
    /// let dump = key.to_json(&ffi, JsonFlags::default()).unwrap();
    /// assert!(dump.contains("\"type\": \"EDDSA\""));
    /// ```
    pub fn to_json(&self, ffi: &Ffi, flags: JsonFlags) -> Result<String> {
        let value = key_to_json(ffi, self, flags)?;
        Ok(serde_json::to_string_pretty(&value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dump(ffi: &Ffi, handle: &KeyHandle, flags: JsonFlags) -> Value {
        serde_json::from_str(&handle.to_json(ffi, flags).unwrap()).unwrap()
    }

    #[test]
    fn test_primary_fields() {
        let mut ffi = Ffi::new("GPG", "GPG").unwrap();
        let key = ffi.generate_key_25519("json <json@example.com>", None).unwrap();
        let value = dump(&ffi, &key, JsonFlags::default());

        assert_eq!(value["fingerprint"], key.get_fprint(&ffi).unwrap());
        assert_eq!(value["grip"], key.get_grip(&ffi).unwrap());
        assert_eq!(value["revoked"], false);
        assert_eq!(value["userids"][0], "json <json@example.com>");
        assert_eq!(value["subkey grips"].as_array().unwrap().len(), 1);
        assert_eq!(value["public key"]["present"], true);
        assert_eq!(value["secret key"]["present"], true);
        assert_eq!(value["secret key"]["protected"], false);
        assert!(value.get("signatures").is_none());
        assert!(value["public key"].get("mpis").is_none());
    }

    #[test]
    fn test_subkey_fields_and_flags() {
        let mut ffi = Ffi::new("GPG", "GPG").unwrap();
        let key = ffi.generate_key_25519("json <json@example.com>", None).unwrap();
        let sub = key.get_subkey_at(&mut ffi, 0).unwrap();
        let flags = JsonFlags {
            public_mpis: true,
            secret_mpis: true,
            signatures: true,
            signature_mpis: true,
        };
        let value = dump(&ffi, &sub, flags);

        assert_eq!(value["primary key grip"], key.get_grip(&ffi).unwrap());
        assert_eq!(value["curve"], "Curve25519");
        assert!(value["kdf hash"].is_string());
        assert!(value.get("userids").is_none());
        assert!(value["public key"]["mpis"]["raw"].is_string());
        assert!(value["secret key"]["mpis"]["raw"].is_string());
        let sigs = value["signatures"].as_array().unwrap();
        assert_eq!(sigs[0]["type"], "subkey binding");
        assert!(sigs[0]["signer"]["fingerprint"].is_string());
        assert!(sigs[0]["mpis"]["raw"].is_string());
    }
}

//! Declarative key generation from a JSON description.
//!
//! ```json
//! {
//!   "primary": {
//!     "type": "ECDSA", "curve": "NIST P-256", "userid": "alice",
//!     "usage": ["sign", "certify"], "expiration": 0,
//!     "preferences": {"hashes": ["SHA256"], "key server": "hkp://keys"},
//!     "protection": {"cipher": "AES256", "hash": "SHA256"}
//!   },
//!   "sub": {"type": "ECDH", "curve": "NIST P-256", "usage": "encrypt"}
//! }
//! ```
//!
//! Top-level keys are matched case-insensitively. Every other field must be
//! known; anything unexpected is rejected before a key is generated. A `sub`
//! without `primary` names its primary through `"primary": {"grip": HEX}`
//! (or "keyid", "fingerprint", "userid").

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::ffi::Ffi;
use crate::generate::{discard, GenerateOp};
use crate::handle::KeyHandle;
use crate::locator::KeyLocator;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UsageSpec {
    One(String),
    Many(Vec<String>),
}

impl UsageSpec {
    fn names(&self) -> Result<Vec<&str>> {
        let names: Vec<&str> = match self {
            UsageSpec::One(name) => vec![name.as_str()],
            UsageSpec::Many(names) => names.iter().map(String::as_str).collect(),
        };
        for (i, name) in names.iter().enumerate() {
            if names[..i].iter().any(|n| n.eq_ignore_ascii_case(name)) {
                return Err(Error::BadParameters(format!("duplicate usage: {}", name)));
            }
        }
        Ok(names)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PreferencesSpec {
    #[serde(default)]
    hashes: Vec<String>,
    #[serde(default)]
    ciphers: Vec<String>,
    #[serde(default)]
    compression: Vec<String>,
    #[serde(rename = "key server")]
    key_server: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProtectionSpec {
    cipher: Option<String>,
    mode: Option<String>,
    hash: Option<String>,
    #[serde(default)]
    iterations: usize,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PrimarySpec {
    #[serde(rename = "type")]
    alg: Option<String>,
    length: Option<usize>,
    curve: Option<String>,
    hash: Option<String>,
    userid: Option<String>,
    usage: Option<UsageSpec>,
    expiration: Option<u32>,
    preferences: Option<PreferencesSpec>,
    protection: Option<ProtectionSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SubSpec {
    #[serde(rename = "type")]
    alg: Option<String>,
    length: Option<usize>,
    curve: Option<String>,
    hash: Option<String>,
    usage: Option<UsageSpec>,
    expiration: Option<u32>,
    protection: Option<ProtectionSpec>,
    /// Existing primary, as `{id type: identifier}`.
    primary: Option<BTreeMap<String, String>>,
}

/// Settings shared by primary and subkey descriptions.
struct Common<'a> {
    length: Option<usize>,
    curve: Option<&'a str>,
    hash: Option<&'a str>,
    usage: Option<&'a UsageSpec>,
    expiration: Option<u32>,
    protection: Option<&'a ProtectionSpec>,
}

fn apply_common(op: &mut GenerateOp, common: Common<'_>) -> Result<()> {
    if let Some(length) = common.length {
        op.set_bits(length)?;
    }
    if let Some(curve) = common.curve {
        op.set_curve(curve)?;
    }
    if let Some(hash) = common.hash {
        op.set_hash(hash)?;
    }
    if let Some(usage) = common.usage {
        op.clear_usage();
        for name in usage.names()? {
            op.add_usage(name)?;
        }
    }
    if let Some(expiration) = common.expiration {
        op.set_expiration(expiration);
    }
    if let Some(protection) = common.protection {
        if let Some(cipher) = &protection.cipher {
            op.set_protection_cipher(cipher)?;
            op.set_request_password(true);
        }
        if let Some(mode) = &protection.mode {
            op.set_protection_mode(mode)?;
        }
        if let Some(hash) = &protection.hash {
            op.set_protection_hash(hash)?;
        }
        if protection.iterations != 0 {
            op.set_protection_iterations(protection.iterations);
        }
    }
    Ok(())
}

fn primary_op(spec: &PrimarySpec) -> Result<GenerateOp> {
    let mut op = GenerateOp::create(spec.alg.as_deref().unwrap_or("RSA"))?;
    apply_common(
        &mut op,
        Common {
            length: spec.length,
            curve: spec.curve.as_deref(),
            hash: spec.hash.as_deref(),
            usage: spec.usage.as_ref(),
            expiration: spec.expiration,
            protection: spec.protection.as_ref(),
        },
    )?;
    if let Some(userid) = &spec.userid {
        op.set_userid(userid)?;
    }
    if let Some(prefs) = &spec.preferences {
        for hash in &prefs.hashes {
            op.add_pref_hash(hash)?;
        }
        for cipher in &prefs.ciphers {
            op.add_pref_cipher(cipher)?;
        }
        for alg in &prefs.compression {
            op.add_pref_compression(alg)?;
        }
        op.set_pref_keyserver(prefs.key_server.as_deref())?;
    }
    Ok(op)
}

fn sub_op(ffi: &mut Ffi, spec: &SubSpec, primary: &mut KeyHandle) -> Result<GenerateOp> {
    let mut op = GenerateOp::subkey_create(ffi, primary, spec.alg.as_deref().unwrap_or("RSA"))?;
    apply_common(
        &mut op,
        Common {
            length: spec.length,
            curve: spec.curve.as_deref(),
            hash: spec.hash.as_deref(),
            usage: spec.usage.as_ref(),
            expiration: spec.expiration,
            protection: spec.protection.as_ref(),
        },
    )?;
    Ok(op)
}

/// Find the existing primary a standalone subkey description refers to.
fn locate_primary(ffi: &mut Ffi, reference: &BTreeMap<String, String>) -> Result<KeyHandle> {
    let mut entries = reference.iter();
    let (id_type, identifier) = match (entries.next(), entries.next()) {
        (Some(entry), None) => entry,
        _ => {
            return Err(Error::BadParameters(
                "primary reference needs exactly one identifier".to_string(),
            ))
        }
    };
    let locator = KeyLocator::parse(id_type, identifier)?;
    let mut handle = ffi.locate(&locator)?.ok_or(Error::KeyNotFound)?;
    handle.require_public(ffi).map_err(|_| Error::KeyNotFound)?;
    handle.require_secret(ffi).map_err(|_| Error::KeyNotFound)?;
    Ok(handle)
}

/// Parsed top level of a generation request.
struct Request {
    primary: Option<PrimarySpec>,
    sub: Option<SubSpec>,
}

fn parse_request(json: &str) -> Result<Request> {
    let document: Value =
        serde_json::from_str(json).map_err(|e| Error::BadFormat(format!("invalid JSON: {}", e)))?;
    let Value::Object(fields) = document else {
        return Err(Error::BadParameters("expected a JSON object".to_string()));
    };

    let mut request = Request {
        primary: None,
        sub: None,
    };
    for (name, value) in fields {
        let invalid = |e: serde_json::Error| Error::BadParameters(format!("{}: {}", name, e));
        match name.to_ascii_lowercase().as_str() {
            "primary" if request.primary.is_none() => {
                request.primary = Some(serde_json::from_value(value).map_err(invalid)?)
            }
            "sub" if request.sub.is_none() => {
                request.sub = Some(serde_json::from_value(value).map_err(invalid)?)
            }
            _ => return Err(Error::BadParameters(format!("unexpected field: {}", name))),
        }
    }
    Ok(request)
}

impl Ffi {
    /// Generate keys from a JSON description.
    ///
    /// Returns `{"primary": {"grip": HEX}, "sub": {"grip": HEX}}` with an
    /// entry for each generated key.
    ///
    /// # Errors
    /// [`Error::BadFormat`] for malformed JSON, [`Error::BadParameters`] for
    /// unknown fields or values, [`Error::KeyNotFound`] when a standalone
    /// subkey's primary cannot be found with both halves.
    pub fn generate_key_json(&mut self, json: &str) -> Result<String> {
        let request = parse_request(json)?;
        let mut result = serde_json::Map::new();

        match (request.primary, request.sub) {
            (None, None) => {
                return Err(Error::BadParameters("nothing to generate".to_string()));
            }
            (Some(primary), sub) => {
                if sub.as_ref().is_some_and(|s| s.primary.is_some()) {
                    return Err(Error::BadParameters(
                        "subkey of a generated primary cannot name another primary".to_string(),
                    ));
                }
                let mut op = primary_op(&primary)?;
                op.execute(self)?;
                let mut handle = op.get_key()?;
                let grip = handle.any_key(self)?.grip();
                result.insert("primary".to_string(), json!({ "grip": grip.to_hex() }));

                if let Some(sub) = sub {
                    let generated = sub_op(self, &sub, &mut handle).and_then(|mut op| {
                        op.execute(self)?;
                        op.get_key()
                    });
                    match generated {
                        Ok(subkey) => {
                            let sub_grip = subkey.any_key(self)?.grip();
                            result.insert("sub".to_string(), json!({ "grip": sub_grip.to_hex() }));
                        }
                        Err(e) => {
                            discard(self, &grip);
                            return Err(e);
                        }
                    }
                }
            }
            (None, Some(sub)) => {
                let reference = sub.primary.as_ref().ok_or_else(|| {
                    Error::BadParameters("subkey description needs a primary".to_string())
                })?;
                let mut primary = locate_primary(self, reference)?;
                let mut op = sub_op(self, &sub, &mut primary)?;
                op.execute(self)?;
                let subkey = op.get_key()?;
                let grip = subkey.any_key(self)?.grip();
                result.insert("sub".to_string(), json!({ "grip": grip.to_hex() }));
            }
        }

        log::debug!("generated keys from JSON description");
        Ok(serde_json::to_string_pretty(&Value::Object(result))?)
    }
}

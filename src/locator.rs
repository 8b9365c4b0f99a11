//! Key locators: the identifiers used to search stores and to ask the
//! external key provider for keys.

use regex::{Regex, RegexBuilder};

use crate::error::{Error, Result};
use crate::key::{Grip, Key};

/// A discriminated key identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyLocator {
    /// Case-insensitive regular expression over a primary key's user ids.
    UserId(String),
    KeyId([u8; 8]),
    Fingerprint(Vec<u8>),
    Grip(Grip),
}

fn decode_hex(identifier: &str) -> Result<Vec<u8>> {
    let cleaned: String = identifier
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    hex::decode(&cleaned)
        .map_err(|_| Error::BadParameters(format!("invalid hex identifier: {}", identifier)))
}

impl KeyLocator {
    /// Build a locator from a type name ("userid", "keyid", "fingerprint",
    /// "grip") and its string form.
    pub fn parse(id_type: &str, identifier: &str) -> Result<KeyLocator> {
        match id_type.to_ascii_lowercase().as_str() {
            "userid" => {
                if identifier.is_empty() {
                    return Err(Error::BadParameters("empty userid".to_string()));
                }
                Ok(KeyLocator::UserId(identifier.to_string()))
            }
            "keyid" => {
                let raw = decode_hex(identifier)?;
                if raw.len() != 8 {
                    return Err(Error::BadParameters(format!("invalid keyid: {}", identifier)));
                }
                let mut id = [0u8; 8];
                id.copy_from_slice(&raw);
                Ok(KeyLocator::KeyId(id))
            }
            "fingerprint" => {
                let raw = decode_hex(identifier)?;
                if raw.len() != 20 && raw.len() != 32 {
                    return Err(Error::BadParameters(format!(
                        "invalid fingerprint: {}",
                        identifier
                    )));
                }
                Ok(KeyLocator::Fingerprint(raw))
            }
            "grip" => {
                let raw = decode_hex(identifier)?;
                Grip::from_slice(&raw)
                    .map(KeyLocator::Grip)
                    .ok_or_else(|| Error::BadParameters(format!("invalid grip: {}", identifier)))
            }
            other => Err(Error::BadParameters(format!("unknown identifier type: {}", other))),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            KeyLocator::UserId(_) => "userid",
            KeyLocator::KeyId(_) => "keyid",
            KeyLocator::Fingerprint(_) => "fingerprint",
            KeyLocator::Grip(_) => "grip",
        }
    }

    /// String form handed to the key provider. Binary identifiers are
    /// uppercase hex.
    pub fn identifier(&self) -> String {
        match self {
            KeyLocator::UserId(uid) => uid.clone(),
            KeyLocator::KeyId(id) => hex::encode_upper(id),
            KeyLocator::Fingerprint(fp) => hex::encode_upper(fp),
            KeyLocator::Grip(grip) => grip.to_hex(),
        }
    }

    /// Prepared matcher, compiling the user id expression once per search.
    pub(crate) fn matcher(&self) -> LocatorMatcher<'_> {
        let regex = match self {
            KeyLocator::UserId(pattern) => Some(
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .or_else(|_| {
                        RegexBuilder::new(&regex::escape(pattern))
                            .case_insensitive(true)
                            .build()
                    }),
            ),
            _ => None,
        };
        LocatorMatcher {
            locator: self,
            regex: regex.and_then(|r| r.ok()),
        }
    }

    pub fn matches(&self, key: &Key) -> bool {
        self.matcher().matches(key)
    }
}

pub(crate) struct LocatorMatcher<'a> {
    locator: &'a KeyLocator,
    regex: Option<Regex>,
}

impl LocatorMatcher<'_> {
    pub(crate) fn matches(&self, key: &Key) -> bool {
        match self.locator {
            KeyLocator::UserId(_) => {
                if !key.is_primary() {
                    return false;
                }
                match &self.regex {
                    Some(re) => key.uids().iter().any(|uid| re.is_match(uid)),
                    None => false,
                }
            }
            KeyLocator::KeyId(id) => key.keyid() == *id,
            KeyLocator::Fingerprint(fp) => key.fingerprint() == *fp,
            KeyLocator::Grip(grip) => key.grip() == *grip,
        }
    }
}

impl std::fmt::Display for KeyLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.type_name(), self.identifier())
    }
}

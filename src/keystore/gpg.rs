//! GPG keyrings: concatenated transferable keys.

use std::io::Cursor;

use pgp::composed::{Deserializable, SignedPublicKey, SignedSecretKey};
use pgp::ser::Serialize;

use crate::error::{Error, Result};

/// One transferable key read from a keyring.
#[derive(Debug, Clone)]
pub(crate) enum ParsedKey {
    Public(SignedPublicKey),
    Secret(SignedSecretKey),
}

/// Parse every transferable key in `data`, armored or binary.
///
/// Keys that fail to parse are skipped with a warning.
pub(crate) fn parse_transferable(data: &[u8]) -> Result<Vec<ParsedKey>> {
    let mut keys = Vec::new();

    if let Ok((iter, _headers)) = SignedSecretKey::from_reader_many(Cursor::new(data)) {
        for parsed in iter {
            match parsed {
                Ok(key) => keys.push(ParsedKey::Secret(key)),
                Err(e) => log::debug!("skipping block while reading secret keys: {}", e),
            }
        }
    }

    let (iter, _headers) = SignedPublicKey::from_reader_many(Cursor::new(data))
        .map_err(|e| Error::BadFormat(e.to_string()))?;
    for parsed in iter {
        match parsed {
            Ok(key) => keys.push(ParsedKey::Public(key)),
            // a secret keyring fails every block of the public pass
            Err(e) if keys.is_empty() => log::warn!("skipping unparsable key: {}", e),
            Err(_) => {}
        }
    }

    Ok(keys)
}

/// Binary GPG keyring of public keys.
pub(crate) fn write_public(keys: &[SignedPublicKey]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for key in keys {
        buf.extend(key.to_bytes()?);
    }
    Ok(buf)
}

/// Binary GPG keyring of secret keys.
pub(crate) fn write_secret(keys: &[SignedSecretKey]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for key in keys {
        buf.extend(key.to_bytes()?);
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_keyring() {
        let keys = parse_transferable(&[]).unwrap_or_default();
        assert!(keys.is_empty());
        assert!(write_public(&[]).unwrap().is_empty());
    }
}

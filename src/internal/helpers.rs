//! Internal helper functions.

use std::io::{BufReader, Cursor, Read};

use chrono::{DateTime, TimeZone, Utc};
use pgp::armor::{Dearmor, DearmorOptions};
use pgp::packet::{RevocationCode, Signature, Subpacket, SubpacketData};
use pgp::ser::Serialize;
use pgp::types::{EcdhPublicParams, EcdsaPublicParams, KeyDetails, PublicKeyTrait, PublicParams};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::types::Curve;

pub(crate) fn keyid_bytes(key: &impl KeyDetails) -> [u8; 8] {
    let mut id = [0u8; 8];
    let raw = key.key_id();
    let raw = raw.as_ref();
    if raw.len() == 8 {
        id.copy_from_slice(raw);
    }
    id
}

/// Compute the 20-byte grip of a key: SHA-1 over the algorithm id and the
/// serialized public parameters. Public and secret halves share it.
pub(crate) fn compute_grip(key: &impl PublicKeyTrait) -> Result<[u8; 20]> {
    let params = key
        .public_params()
        .to_bytes()
        .map_err(|e| Error::BadFormat(e.to_string()))?;
    let mut hasher = Sha1::new();
    hasher.update([u8::from(key.algorithm())]);
    hasher.update(&params);
    let mut grip = [0u8; 20];
    grip.copy_from_slice(&hasher.finalize());
    Ok(grip)
}

/// Curve of an EC key, if any.
pub(crate) fn key_curve(key: &impl PublicKeyTrait) -> Option<Curve> {
    match key.public_params() {
        PublicParams::EdDSALegacy(_) | PublicParams::Ed25519(_) => Some(Curve::Ed25519),
        PublicParams::X25519(_) => Some(Curve::Curve25519),
        PublicParams::ECDSA(params) => match params {
            EcdsaPublicParams::P256 { .. } => Some(Curve::NistP256),
            EcdsaPublicParams::P384 { .. } => Some(Curve::NistP384),
            EcdsaPublicParams::P521 { .. } => Some(Curve::NistP521),
            EcdsaPublicParams::Secp256k1 { .. } => Some(Curve::Secp256k1),
            _ => None,
        },
        PublicParams::ECDH(params) => match params {
            EcdhPublicParams::Curve25519 { .. } => Some(Curve::Curve25519),
            EcdhPublicParams::P256 { .. } => Some(Curve::NistP256),
            EcdhPublicParams::P384 { .. } => Some(Curve::NistP384),
            EcdhPublicParams::P521 { .. } => Some(Curve::NistP521),
            _ => None,
        },
        _ => None,
    }
}

/// KDF hash and key wrap cipher names of an ECDH key.
pub(crate) fn ecdh_kdf_params(key: &impl PublicKeyTrait) -> Option<(&'static str, &'static str)> {
    match key.public_params() {
        PublicParams::ECDH(
            EcdhPublicParams::Curve25519 { hash, alg_sym, .. }
            | EcdhPublicParams::P256 { hash, alg_sym, .. }
            | EcdhPublicParams::P384 { hash, alg_sym, .. }
            | EcdhPublicParams::P521 { hash, alg_sym, .. },
        ) => Some((
            crate::types::hash_name(*hash),
            crate::types::cipher_name(*alg_sym),
        )),
        _ => None,
    }
}

/// Bit length of a key. RSA, DSA and ElGamal report the size of their first
/// MPI (n or p); EC keys report the curve size.
pub(crate) fn key_bits(key: &impl PublicKeyTrait) -> usize {
    if let Some(curve) = key_curve(key) {
        return curve.bits();
    }
    match key.public_params() {
        PublicParams::RSA(_) | PublicParams::DSA(_) | PublicParams::Elgamal(_) => key
            .public_params()
            .to_bytes()
            .ok()
            .filter(|b| b.len() >= 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]) as usize)
            .unwrap_or(0),
        _ => 0,
    }
}

/// Build a hashed or unhashed subpacket, mapping the rpgp error.
pub(crate) fn subpacket(data: SubpacketData) -> Result<Subpacket> {
    Subpacket::regular(data).map_err(|e| Error::Generic(e.to_string()))
}

pub(crate) fn timestamp(secs: u32) -> DateTime<Utc> {
    Utc.timestamp_opt(i64::from(secs), 0)
        .single()
        .unwrap_or_default()
}

/// Whole seconds since the epoch, clamped to the 32-bit OpenPGP range.
pub(crate) fn to_secs(time: &DateTime<Utc>) -> u32 {
    time.timestamp().clamp(0, i64::from(u32::MAX)) as u32
}

pub(crate) fn now_secs() -> u32 {
    to_secs(&Utc::now())
}

pub(crate) fn duration_secs(d: &chrono::Duration) -> u32 {
    d.num_seconds().clamp(0, i64::from(u32::MAX)) as u32
}

/// Strip ASCII armor if the data carries it.
pub(crate) fn dearmor_if_needed(data: &[u8]) -> Result<Vec<u8>> {
    if is_armored(data) {
        let mut buf = Vec::new();
        let options = DearmorOptions::default().enable_crc24_check();
        let mut reader = BufReader::new(Dearmor::with_options(Cursor::new(data), options));
        reader
            .read_to_end(&mut buf)
            .map_err(|e| Error::BadFormat(e.to_string()))?;
        Ok(buf)
    } else {
        Ok(data.to_vec())
    }
}

pub(crate) fn is_armored(data: &[u8]) -> bool {
    let trimmed = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map(|p| &data[p..])
        .unwrap_or(&[]);
    trimmed.starts_with(b"-----BEGIN PGP")
}

/// Signature creation time in seconds.
pub(crate) fn signature_created(sig: &Signature) -> u32 {
    sig.config()
        .and_then(|config| {
            config.hashed_subpackets().find_map(|sp| match &sp.data {
                SubpacketData::SignatureCreationTime(ts) => Some(to_secs(ts)),
                _ => None,
            })
        })
        .unwrap_or(0)
}

/// Signature validity period in seconds, 0 if it never expires.
pub(crate) fn signature_expiration(sig: &Signature) -> u32 {
    sig.config()
        .and_then(|config| {
            config.hashed_subpackets().find_map(|sp| match &sp.data {
                SubpacketData::SignatureExpirationTime(d) => Some(duration_secs(d)),
                _ => None,
            })
        })
        .unwrap_or(0)
}

/// Issuer key id of a signature: the issuer subpacket, or the low 8 bytes
/// of the issuer fingerprint.
pub(crate) fn signature_issuer(sig: &Signature) -> Option<[u8; 8]> {
    let config = sig.config()?;
    let mut fallback = None;
    for sp in config.hashed_subpackets().chain(config.unhashed_subpackets()) {
        match &sp.data {
            SubpacketData::Issuer(id) => {
                let raw = id.as_ref();
                if raw.len() == 8 {
                    let mut out = [0u8; 8];
                    out.copy_from_slice(raw);
                    return Some(out);
                }
            }
            SubpacketData::IssuerFingerprint(fp) => {
                let raw = fp.as_bytes();
                if raw.len() >= 8 && fallback.is_none() {
                    let mut out = [0u8; 8];
                    // v4 key ids are the low 64 bits; v6 ids the high 64 bits
                    if raw.len() == 20 {
                        out.copy_from_slice(&raw[12..]);
                    } else {
                        out.copy_from_slice(&raw[..8]);
                    }
                    fallback = Some(out);
                }
            }
            _ => {}
        }
    }
    fallback
}

/// Revocation code and reason text of a revocation signature.
pub(crate) fn signature_revocation(sig: &Signature) -> Option<(RevocationCode, String)> {
    let config = sig.config()?;
    config.hashed_subpackets().find_map(|sp| match &sp.data {
        SubpacketData::RevocationReason(code, reason) => {
            Some((*code, String::from_utf8_lossy(reason.as_ref()).to_string()))
        }
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_armored() {
        assert!(is_armored(b"\n  -----BEGIN PGP MESSAGE-----\n"));
        assert!(!is_armored(&[0x99, 0x01, 0x0d]));
        assert!(!is_armored(b""));
    }

    #[test]
    fn test_dearmor_passthrough_for_binary() {
        let data = vec![0xc6u8, 0x03, 1, 2, 3];
        assert_eq!(dearmor_if_needed(&data).unwrap(), data);
    }
}

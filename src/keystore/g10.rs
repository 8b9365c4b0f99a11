//! G10 key directories: one S-expression file per secret key.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use pgp::packet::{Packet, PacketParser, PacketTrait};

use crate::error::{Error, Result};
use crate::internal::{compute_grip, Sexp};
use crate::key::{with_secret, Grip, Key, SecretPart};

const G10_HEAD: &str = "openpgp-private-key";

fn encode_key(key: &Key, secret: &SecretPart) -> Result<Vec<u8>> {
    let mut packet = Vec::new();
    with_secret!(secret, k => k.to_writer_with_header(&mut packet))?;
    let sexp = Sexp::List(vec![
        Sexp::atom(G10_HEAD),
        Sexp::pair("grip", key.grip().to_hex()),
        Sexp::pair("created", key.creation().to_string()),
        Sexp::pair("packet", packet),
    ]);
    Ok(sexp.to_bytes())
}

fn decode_key(data: &[u8]) -> Result<(Grip, SecretPart)> {
    let sexp = Sexp::parse(data)?;
    if sexp.head() != Some(G10_HEAD.as_bytes()) {
        return Err(Error::BadFormat("not a G10 private key".to_string()));
    }
    let packet = sexp
        .lookup_value("packet")
        .ok_or_else(|| Error::BadFormat("G10 key without packet".to_string()))?;

    let parsed = PacketParser::new(Cursor::new(packet))
        .next()
        .ok_or_else(|| Error::BadFormat("empty G10 packet".to_string()))?
        .map_err(|e| Error::BadFormat(e.to_string()))?;
    let secret = match parsed {
        Packet::SecretKey(k) => SecretPart::Primary(k),
        Packet::SecretSubkey(k) => SecretPart::Sub(k),
        _ => return Err(Error::BadFormat("G10 packet is not a secret key".to_string())),
    };
    let grip = Grip(with_secret!(&secret, k => compute_grip(k.public_key()))?);

    if let Some(stored) = sexp.lookup_value("grip") {
        if !stored.eq_ignore_ascii_case(grip.to_hex().as_bytes()) {
            log::warn!("G10 key grip mismatch, using computed grip {}", grip);
        }
    }
    Ok((grip, secret))
}

/// Read every `*.key` file of a G10 directory.
///
/// Files that fail to parse are skipped with a warning.
pub(crate) fn load_g10_dir(dir: &Path) -> Result<Vec<(Grip, SecretPart)>> {
    if !dir.is_dir() {
        return Err(Error::Access(format!("not a directory: {}", dir.display())));
    }
    let mut entries: Vec<_> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|ext| ext == "key").unwrap_or(false))
        .collect();
    entries.sort();

    let mut keys = Vec::with_capacity(entries.len());
    for path in entries {
        let data = fs::read(&path).map_err(|e| Error::Read(e.to_string()))?;
        match decode_key(&data) {
            Ok(key) => keys.push(key),
            Err(e) => log::warn!("skipping {}: {}", path.display(), e),
        }
    }
    Ok(keys)
}

/// Write secret key records into a G10 directory, creating it if needed.
pub(crate) fn save_g10_dir<'a>(dir: &Path, keys: impl IntoIterator<Item = &'a Key>) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| Error::Access(e.to_string()))?;
    for key in keys {
        let Some(secret) = key.secret.as_ref() else {
            continue;
        };
        let data = encode_key(key, secret)?;
        let path = dir.join(format!("{}.key", key.grip().to_hex()));
        fs::write(&path, data).map_err(|e| Error::Write(e.to_string()))?;
        log::debug!("wrote G10 key {}", path.display());
    }
    Ok(())
}

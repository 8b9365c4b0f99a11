//! GnuPG keybox (KBX) container.
//!
//! A keybox is a sequence of blobs. Each blob starts with a 4-byte
//! big-endian length and a 1-byte type. The first blob is the header blob
//! carrying the `KBXf` magic at offset 8; OpenPGP blobs (type 2) point at
//! one transferable key embedded in the blob and end with a SHA-1 checksum
//! over the blob. Only the OpenPGP keyblock is read back; the key and user
//! id index tables are written for GnuPG's benefit.

use sha1::{Digest, Sha1};

use pgp::composed::SignedPublicKey;
use pgp::ser::Serialize;
use pgp::types::KeyDetails;

use crate::error::{Error, Result};

pub(crate) const KBX_MAGIC: &[u8; 4] = b"KBXf";

const BLOB_HEADER: u8 = 1;
const BLOB_OPENPGP: u8 = 2;
const HEADER_BLOB_LEN: u32 = 32;
const KEY_INFO_LEN: u16 = 28;
const UID_INFO_LEN: u16 = 12;
const SIG_INFO_LEN: u16 = 4;

fn write_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn read_u32(data: &[u8], pos: usize) -> Result<u32> {
    data.get(pos..pos + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| Error::BadFormat("truncated keybox blob".to_string()))
}

fn write_header_blob(buf: &mut Vec<u8>, created: u32) {
    write_u32(buf, HEADER_BLOB_LEN);
    buf.push(BLOB_HEADER);
    buf.push(1); // version
    write_u16(buf, 0); // flags
    buf.extend_from_slice(KBX_MAGIC);
    write_u32(buf, 0); // reserved
    write_u32(buf, created);
    write_u32(buf, created); // last maintenance
    write_u32(buf, 0);
    write_u32(buf, 0);
}

fn write_openpgp_blob(buf: &mut Vec<u8>, key: &SignedPublicKey) -> Result<()> {
    let keyblock = key.to_bytes()?;

    let mut fingerprints = vec![key.primary_key.fingerprint().as_bytes().to_vec()];
    fingerprints.extend(
        key.public_subkeys
            .iter()
            .map(|sub| sub.key.fingerprint().as_bytes().to_vec()),
    );

    // fixed part, key infos, serial, uid and signature tables, trust fields
    let mut blob = Vec::new();
    write_u32(&mut blob, 0); // length, patched below
    blob.push(BLOB_OPENPGP);
    blob.push(1); // version
    write_u16(&mut blob, 0); // flags
    write_u32(&mut blob, 0); // keyblock offset, patched below
    write_u32(&mut blob, keyblock.len() as u32);
    write_u16(&mut blob, fingerprints.len() as u16);
    write_u16(&mut blob, KEY_INFO_LEN);
    for fp in &fingerprints {
        let key_info_start = blob.len() as u32;
        let mut fpr = [0u8; 20];
        let n = fp.len().min(20);
        fpr[..n].copy_from_slice(&fp[..n]);
        blob.extend_from_slice(&fpr);
        // v4 key ids are the low 8 bytes of the fingerprint
        write_u32(&mut blob, key_info_start + 12);
        write_u16(&mut blob, 0);
        write_u16(&mut blob, 0);
    }
    write_u16(&mut blob, 0); // serial number length
    write_u16(&mut blob, 0); // user ids
    write_u16(&mut blob, UID_INFO_LEN);
    write_u16(&mut blob, 0); // signatures
    write_u16(&mut blob, SIG_INFO_LEN);
    blob.push(0); // ownertrust
    blob.push(0); // all validity
    write_u16(&mut blob, 0);
    write_u32(&mut blob, 0); // recheck after
    write_u32(&mut blob, 0); // latest timestamp
    write_u32(&mut blob, 0); // blob created at
    write_u32(&mut blob, 0); // reserved space

    let keyblock_offset = blob.len() as u32;
    blob.extend_from_slice(&keyblock);

    let total = blob.len() as u32 + 20;
    blob[0..4].copy_from_slice(&total.to_be_bytes());
    blob[8..12].copy_from_slice(&keyblock_offset.to_be_bytes());

    let checksum = Sha1::digest(&blob);
    blob.extend_from_slice(&checksum);
    buf.extend_from_slice(&blob);
    Ok(())
}

/// Serialize public keys into a keybox.
pub(crate) fn write_kbx(keys: &[SignedPublicKey], created: u32) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_header_blob(&mut buf, created);
    for key in keys {
        write_openpgp_blob(&mut buf, key)?;
    }
    Ok(buf)
}

/// Extract the embedded OpenPGP keyblocks of a keybox, in file order.
pub(crate) fn parse_kbx(data: &[u8]) -> Result<Vec<Vec<u8>>> {
    if data.len() < HEADER_BLOB_LEN as usize || &data[8..12] != KBX_MAGIC {
        return Err(Error::BadFormat("missing keybox header".to_string()));
    }

    let mut blocks = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        let len = read_u32(data, pos)? as usize;
        if len < 5 || pos + len > data.len() {
            return Err(Error::BadFormat("invalid keybox blob length".to_string()));
        }
        let blob = &data[pos..pos + len];
        match blob[4] {
            BLOB_OPENPGP => {
                let offset = read_u32(blob, 8)? as usize;
                let length = read_u32(blob, 12)? as usize;
                let block = offset
                    .checked_add(length)
                    .and_then(|end| blob.get(offset..end))
                    .ok_or_else(|| Error::BadFormat("keyblock outside blob".to_string()))?;
                blocks.push(block.to_vec());
            }
            BLOB_HEADER => {}
            other => log::debug!("skipping keybox blob of type {}", other),
        }
        pos += len;
    }
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_keybox() {
        let data = write_kbx(&[], 1_600_000_000).unwrap();
        assert_eq!(data.len(), 32);
        assert_eq!(&data[8..12], KBX_MAGIC);
        assert!(parse_kbx(&data).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_missing_magic() {
        assert!(parse_kbx(&[0u8; 40]).is_err());
        assert!(parse_kbx(b"short").is_err());
    }

    #[test]
    fn test_truncated_blob() {
        let mut data = write_kbx(&[], 0).unwrap();
        data.extend_from_slice(&[0, 0, 1, 0, 2]);
        assert!(parse_kbx(&data).is_err());
    }
}

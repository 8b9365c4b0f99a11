//! Message decryption.
//!
//! Decryption first scans the visible packets for session key packets and
//! signatures, then tries the secret keys named by the public-key session
//! key packets and finally passwords from the provider. Both the verify
//! operation and [`decrypt`] open messages this way.

use std::io::Cursor;

use pgp::composed::{Message, SignedSecretKey};
use pgp::packet::{Packet, PacketParser, PublicKeyEncryptedSessionKey, Signature};
use pgp::types::Password;
use secrecy::ExposeSecret;

use crate::error::{Error, Result};
use crate::ffi::Ffi;
use crate::internal::dearmor_if_needed;
use crate::io::{Input, Output};
use crate::key::{assemble_secret, Key, KeyRef};
use crate::locator::KeyLocator;
use crate::protect::secret_password;

/// Provider rounds for symmetric passwords before giving up.
const MAX_PASSWORD_ATTEMPTS: usize = 3;

const WILDCARD_KEYID: [u8; 8] = [0; 8];

/// Packets visible before the encrypted or compressed body.
#[derive(Debug, Default)]
pub(crate) struct PacketScan {
    /// Key ids of public-key session key packets, zero for anonymous ones.
    pub(crate) recipients: Vec<[u8; 8]>,
    pub(crate) symenc: usize,
    pub(crate) signatures: Vec<Signature>,
}

impl PacketScan {
    pub(crate) fn is_encrypted(&self) -> bool {
        !self.recipients.is_empty() || self.symenc > 0
    }
}

/// Scan binary OpenPGP data, stopping at the first unparsable packet.
pub(crate) fn scan_packets(data: &[u8]) -> PacketScan {
    let mut scan = PacketScan::default();
    for packet in PacketParser::new(Cursor::new(data)) {
        match packet {
            Ok(Packet::PublicKeyEncryptedSessionKey(pkesk)) => match pkesk {
                PublicKeyEncryptedSessionKey::V3 { id, .. } => {
                    let mut keyid = [0u8; 8];
                    let raw = id.as_ref();
                    if raw.len() == 8 {
                        keyid.copy_from_slice(raw);
                    }
                    scan.recipients.push(keyid);
                }
                PublicKeyEncryptedSessionKey::V6 { fingerprint, .. } => {
                    let mut keyid = WILDCARD_KEYID;
                    if let Some(fp) = fingerprint {
                        let raw = fp.as_bytes();
                        if raw.len() == 20 {
                            keyid.copy_from_slice(&raw[12..]);
                        } else if raw.len() >= 8 {
                            keyid.copy_from_slice(&raw[..8]);
                        }
                    }
                    scan.recipients.push(keyid);
                }
                _ => {}
            },
            Ok(Packet::SymKeyEncryptedSessionKey(_)) => scan.symenc += 1,
            Ok(Packet::Signature(sig)) => scan.signatures.push(sig),
            Ok(_) => {}
            Err(_) => break,
        }
    }
    scan
}

fn parse_message(data: &[u8]) -> Result<Message<'_>> {
    Message::from_bytes(data).map_err(|e| Error::BadFormat(format!("failed to parse message: {}", e)))
}

/// An opened message: decrypted if it was encrypted, decompressed and read
/// through, so that signatures can be checked.
pub(crate) struct OpenedMessage<'d> {
    pub(crate) message: Message<'d>,
    pub(crate) plaintext: Vec<u8>,
    pub(crate) scan: PacketScan,
    pub(crate) used_recipient: Option<KeyRef>,
    pub(crate) used_password: bool,
}

/// Decompress and read the literal data. A wrong session key surfaces here
/// as an integrity failure.
fn read_through(mut message: Message<'_>) -> Result<(Message<'_>, Vec<u8>)> {
    while message.is_compressed() {
        message = message
            .decompress()
            .map_err(|e| Error::BadFormat(format!("failed to decompress: {}", e)))?;
    }
    let plaintext = message
        .as_data_vec()
        .map_err(|e| Error::BadFormat(format!("failed to read message data: {}", e)))?;
    Ok((message, plaintext))
}

/// Secret records able to open a session key packet for `keyid`.
fn recipient_candidates(ffi: &mut Ffi, keyid: &[u8; 8]) -> Vec<KeyRef> {
    if *keyid == WILDCARD_KEYID {
        return ffi
            .secring
            .iter()
            .filter(|key| key.has_secret() && key.has_encryption_algorithm())
            .map(|key| key.id)
            .collect();
    }
    ffi.find_key(&KeyLocator::KeyId(*keyid), true, true)
        .into_iter()
        .collect()
}

/// Transferable secret key holding `record`, as rpgp decrypts with one.
fn transferable_for(ffi: &Ffi, record: &Key) -> Result<SignedSecretKey> {
    match record.primary_grip() {
        None => assemble_secret(record, &[]),
        Some(grip) => {
            let primary = ffi.secring.by_grip(&grip).ok_or(Error::NoSuitableKey)?;
            assemble_secret(primary, &[record])
        }
    }
}

fn try_secret_key<'d>(ffi: &mut Ffi, id: KeyRef, data: &'d [u8]) -> Option<(Message<'d>, Vec<u8>)> {
    let password = match secret_password(ffi, id, "decrypt") {
        Ok(password) => password,
        Err(e) => {
            log::debug!("skipping key for decryption: {}", e);
            return None;
        }
    };
    let record = ffi.secring.get(id)?;
    let key = match transferable_for(ffi, record) {
        Ok(key) => key,
        Err(e) => {
            log::warn!("cannot decrypt with key {}: {}", record.keyid_hex(), e);
            return None;
        }
    };
    let decrypted = match parse_message(data).ok()?.decrypt(&password, &key) {
        Ok(message) => message,
        Err(_) => parse_message(data).ok()?.decrypt_legacy(&password, &key).ok()?,
    };
    read_through(decrypted).ok()
}

fn try_passwords<'d>(ffi: &mut Ffi, data: &'d [u8]) -> Option<(Message<'d>, Vec<u8>)> {
    for _ in 0..MAX_PASSWORD_ATTEMPTS {
        let answer = ffi.ask_password(None, "decrypt (symmetric)")?;
        let password = Password::from(answer.expose_secret().as_str());
        let opened = parse_message(data)
            .and_then(|message| {
                message
                    .decrypt_with_password(&password)
                    .map_err(|e| Error::Generic(e.to_string()))
            })
            .and_then(read_through);
        match opened {
            Ok(opened) => return Some(opened),
            Err(e) => ffi.log_line(format!("failed to decrypt with password: {}", e)),
        }
    }
    None
}

/// Open binary message data, decrypting it through the key store and the
/// providers when needed.
///
/// # Errors
/// [`Error::DecryptFailed`] when the message is encrypted and no session key
/// could be obtained.
pub(crate) fn open_message<'d>(ffi: &mut Ffi, data: &'d [u8]) -> Result<OpenedMessage<'d>> {
    let scan = scan_packets(data);
    let mut used_recipient = None;
    let mut used_password = false;

    let (message, plaintext) = if !scan.is_encrypted() {
        read_through(parse_message(data)?)?
    } else {
        let mut opened = None;
        'recipients: for keyid in &scan.recipients {
            for id in recipient_candidates(ffi, keyid) {
                if let Some(found) = try_secret_key(ffi, id, data) {
                    used_recipient = Some(id);
                    opened = Some(found);
                    break 'recipients;
                }
            }
        }
        if opened.is_none() && scan.symenc > 0 {
            opened = try_passwords(ffi, data);
            used_password = opened.is_some();
        }
        match opened {
            Some(found) => found,
            None => {
                ffi.log_line("failed to obtain a session key");
                return Err(Error::DecryptFailed);
            }
        }
    };

    Ok(OpenedMessage {
        message,
        plaintext,
        scan,
        used_recipient,
        used_password,
    })
}

/// Decrypt `input` into `output`.
///
/// Signatures are not checked. An unencrypted message is passed through
/// as its literal data.
pub fn decrypt(ffi: &mut Ffi, input: &mut Input, output: &mut Output) -> Result<()> {
    let result = input
        .read_all()
        .and_then(|raw| dearmor_if_needed(&raw))
        .and_then(|data| open_message(ffi, &data).map(|opened| opened.plaintext));
    match result {
        Ok(plaintext) => {
            output.write(&plaintext);
            output.finish(true)?;
            ffi.log_line("decrypted message");
            Ok(())
        }
        Err(e) => {
            output.finish(false)?;
            Err(e)
        }
    }
}

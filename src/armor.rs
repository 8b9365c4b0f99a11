//! ASCII armor utilities.
//!
//! Both directions go through rpgp's armor codec. Encoding wraps the raw
//! bytes so that arbitrary data, not only parsed packets, can be armored.

use std::io;

use pgp::armor::BlockType;
use pgp::ser::Serialize;

use crate::error::{Error, Result};
use crate::internal::{dearmor_if_needed, is_armored};
use crate::io::{Input, Output};

/// Armor block kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmorType {
    Message,
    PublicKey,
    SecretKey,
    Signature,
    /// Written as a message block.
    Cleartext,
}

impl ArmorType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "message" => Some(ArmorType::Message),
            "public key" => Some(ArmorType::PublicKey),
            "secret key" => Some(ArmorType::SecretKey),
            "signature" => Some(ArmorType::Signature),
            "cleartext" => Some(ArmorType::Cleartext),
            _ => None,
        }
    }

    fn block_type(&self) -> BlockType {
        match self {
            ArmorType::Message | ArmorType::Cleartext => BlockType::Message,
            ArmorType::PublicKey => BlockType::PublicKey,
            ArmorType::SecretKey => BlockType::PrivateKey,
            ArmorType::Signature => BlockType::Signature,
        }
    }
}

/// Bytes handed to the armor writer unchanged.
struct RawBytes<'a>(&'a [u8]);

impl Serialize for RawBytes<'_> {
    fn to_writer<W: io::Write>(&self, writer: &mut W) -> pgp::errors::Result<()> {
        writer.write_all(self.0)?;
        Ok(())
    }

    fn write_len(&self) -> usize {
        self.0.len()
    }
}

/// Armor raw bytes into a text block of the given kind, CRC-24 line
/// included.
pub(crate) fn armor_bytes(data: &[u8], kind: ArmorType) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 4 / 3 + 128);
    pgp::armor::write(&RawBytes(data), kind.block_type(), &mut out, None, true)?;
    Ok(out)
}

/// Packet tag of the first packet, old or new format.
fn first_packet_tag(data: &[u8]) -> Option<u8> {
    let first = *data.first()?;
    if first & 0x80 == 0 {
        return None;
    }
    if first & 0x40 != 0 {
        Some(first & 0x3f)
    } else {
        Some((first >> 2) & 0x0f)
    }
}

/// Guess what OpenPGP data contains from its first packet.
fn guess_binary(data: &[u8]) -> &'static str {
    match first_packet_tag(data) {
        Some(1) | Some(3) | Some(4) | Some(8) | Some(9) | Some(11) | Some(18) | Some(20) => {
            "message"
        }
        Some(2) => "signature",
        Some(5) => "secret key",
        Some(6) => "public key",
        _ => "unknown",
    }
}

fn guess_armored(data: &[u8]) -> &'static str {
    let text = String::from_utf8_lossy(&data[..data.len().min(256)]).to_string();
    let header = text
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("-----BEGIN PGP "))
        .unwrap_or("");
    if header.contains("SIGNED MESSAGE") {
        "cleartext"
    } else if header.contains("MESSAGE") {
        "message"
    } else if header.contains("PUBLIC KEY BLOCK") {
        "public key"
    } else if header.contains("PRIVATE KEY BLOCK") || header.contains("SECRET KEY BLOCK") {
        "secret key"
    } else if header.contains("SIGNATURE") {
        "signature"
    } else {
        "unknown"
    }
}

/// Guess the contents of OpenPGP data: "message", "public key",
/// "secret key", "signature", "cleartext" or "unknown".
pub fn guess_contents(input: &mut Input) -> Result<&'static str> {
    let data = input.read_all()?;
    if is_armored(&data) {
        Ok(guess_armored(&data))
    } else {
        Ok(guess_binary(&data))
    }
}

/// Armor the input. Without an explicit type the kind is guessed from the
/// first packet, falling back to "message".
pub fn enarmor(input: &mut Input, output: &mut Output, kind: Option<&str>) -> Result<()> {
    let data = input.read_all()?;
    let kind = match kind {
        Some(name) => ArmorType::from_name(name)
            .ok_or_else(|| Error::BadParameters(format!("unknown armor type: {}", name)))?,
        None => ArmorType::from_name(guess_binary(&data)).unwrap_or(ArmorType::Message),
    };
    let armored = armor_bytes(&data, kind)?;
    output.write(&armored);
    output.finish(true)
}

/// Strip ASCII armor from the input.
pub fn dearmor(input: &mut Input, output: &mut Output) -> Result<()> {
    let data = input.read_all()?;
    if !is_armored(&data) {
        output.finish(false)?;
        return Err(Error::BadFormat("input is not armored".to_string()));
    }
    match dearmor_if_needed(&data) {
        Ok(raw) => {
            output.write(&raw);
            output.finish(true)
        }
        Err(e) => {
            output.finish(false)?;
            Err(e)
        }
    }
}

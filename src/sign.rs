//! Signing operations.
//!
//! A [`SignOp`] produces one of three shapes, fixed when it is created:
//! an attached signed message, a cleartext-signed text, or detached
//! signatures over the input.

use pgp::composed::{CleartextSignedMessage, MessageBuilder};
use pgp::packet::{PacketTrait, SignatureType, SubpacketData};
use pgp::types::Password;
use rand::thread_rng;

use crate::armor::{armor_bytes, ArmorType};
use crate::certify::issuer_config;
use crate::error::{Error, Result};
use crate::ffi::Ffi;
use crate::handle::KeyHandle;
use crate::internal::{subpacket, timestamp};
use crate::io::{Input, Output};
use crate::key::with_secret;
use crate::op::{OpSignature, OperationContext, SigningMaterial};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignMode {
    Attached,
    Cleartext,
    Detached,
}

/// One signature over `data` with the creation and expiration overrides
/// applied.
fn make_signature(
    material: &SigningMaterial,
    password: &Password,
    typ: SignatureType,
    data: &[u8],
) -> Result<pgp::packet::Signature> {
    with_secret!(&material.secret, k => {
        let mut config = issuer_config(k, typ, Some(material.hash), timestamp(material.created))?;
        if material.expires > 0 {
            config.hashed_subpackets.push(subpacket(SubpacketData::SignatureExpirationTime(
                chrono::Duration::seconds(i64::from(material.expires)),
            ))?);
        }
        config
            .sign(k, password, data)
            .map_err(|e| Error::Generic(format!("failed to sign: {}", e)))
    })
}

#[derive(Debug)]
pub struct SignOp<'a> {
    mode: SignMode,
    input: Option<&'a mut Input>,
    output: Option<&'a mut Output>,
    ctx: OperationContext,
}

impl<'a> SignOp<'a> {
    fn new(mode: SignMode, input: &'a mut Input, output: &'a mut Output) -> Self {
        Self {
            mode,
            input: Some(input),
            output: Some(output),
            ctx: OperationContext::default(),
        }
    }

    /// Signed message carrying the data.
    pub fn create(input: &'a mut Input, output: &'a mut Output) -> Self {
        Self::new(SignMode::Attached, input, output)
    }

    /// Cleartext-signed text; always armored.
    pub fn cleartext_create(input: &'a mut Input, output: &'a mut Output) -> Self {
        let mut op = Self::new(SignMode::Cleartext, input, output);
        op.ctx.armor = true;
        op
    }

    /// Signatures only, written without the data.
    pub fn detached_create(input: &'a mut Input, signature: &'a mut Output) -> Self {
        Self::new(SignMode::Detached, input, signature)
    }

    /// Add a signer. The key or its newest usable signing subkey is used;
    /// a locked key is opened through the password provider (context "sign").
    pub fn add_signature(&mut self, ffi: &mut Ffi, key: &mut KeyHandle) -> Result<&mut OpSignature> {
        self.ctx.add_signer(ffi, key)
    }

    pub fn set_armor(&mut self, armored: bool) {
        self.ctx.armor = armored || self.mode == SignMode::Cleartext;
    }

    pub fn set_hash(&mut self, hash: &str) -> Result<()> {
        self.ctx.set_hash(hash)
    }

    pub fn set_compression(&mut self, alg: &str, level: u8) -> Result<()> {
        self.ctx.set_compression(alg, level)
    }

    pub fn set_creation_time(&mut self, created: u32) {
        self.ctx.creation_time = Some(created);
    }

    pub fn set_expiration_time(&mut self, expires: u32) {
        self.ctx.expiration_time = expires;
    }

    pub fn set_file_name(&mut self, name: &str) {
        self.ctx.file_name = name.to_string();
    }

    /// Sign the whole input.
    ///
    /// # Errors
    /// [`Error::BadParameters`] without signers, [`Error::BadState`] on a
    /// second call.
    pub fn execute(&mut self, ffi: &mut Ffi) -> Result<()> {
        let (input, output) = match (self.input.take(), self.output.take()) {
            (Some(input), Some(output)) => (input, output),
            _ => return Err(Error::BadState("signing already executed".to_string())),
        };
        if self.ctx.signers.is_empty() {
            output.finish(false)?;
            return Err(Error::BadParameters("no signers".to_string()));
        }
        let count = self.ctx.signers.len();

        match self.sign(ffi, input) {
            Ok(signed) => {
                output.write(&signed);
                output.finish(true)?;
                ffi.log_line(format!("made {} {:?} signatures", count, self.mode));
                Ok(())
            }
            Err(e) => {
                output.finish(false)?;
                Err(e)
            }
        }
    }

    fn sign(&mut self, ffi: &Ffi, input: &mut Input) -> Result<Vec<u8>> {
        let data = input.read_all()?;
        let (signers, passwords) = self.ctx.take_signers(ffi)?;
        match self.mode {
            SignMode::Attached => self.sign_attached(data, &signers, passwords),
            SignMode::Cleartext => Self::sign_cleartext(&data, &signers, &passwords),
            SignMode::Detached => self.sign_detached(&data, &signers, &passwords),
        }
    }

    fn sign_attached(&self, data: Vec<u8>, signers: &[SigningMaterial], passwords: Vec<Password>) -> Result<Vec<u8>> {
        let mut rng = thread_rng();
        let mut builder = MessageBuilder::from_bytes(self.ctx.file_name.clone(), data);
        for (material, password) in signers.iter().zip(passwords) {
            let subpackets = material.subpackets()?;
            with_secret!(&material.secret, k => {
                builder.sign_with_subpackets(k, password, material.hash, subpackets);
            });
        }
        if let Some(alg) = self.ctx.compression {
            builder.compression(alg);
        }
        if self.ctx.armor {
            Ok(builder.to_armored_string(&mut rng, None.into())?.into_bytes())
        } else {
            Ok(builder.to_vec(&mut rng)?)
        }
    }

    fn sign_cleartext(data: &[u8], signers: &[SigningMaterial], passwords: &[Password]) -> Result<Vec<u8>> {
        let text = String::from_utf8_lossy(data);
        let mut failure = None;
        let message = CleartextSignedMessage::new_many(&text, |normalized| {
            let mut sigs = Vec::with_capacity(signers.len());
            for (material, password) in signers.iter().zip(passwords) {
                match make_signature(material, password, SignatureType::Text, normalized.as_bytes()) {
                    Ok(sig) => sigs.push(sig),
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
            Ok(sigs)
        })?;
        if let Some(e) = failure {
            return Err(e);
        }
        Ok(message.to_armored_string(None.into())?.into_bytes())
    }

    fn sign_detached(&self, data: &[u8], signers: &[SigningMaterial], passwords: &[Password]) -> Result<Vec<u8>> {
        let mut packets = Vec::new();
        for (material, password) in signers.iter().zip(passwords) {
            let sig = make_signature(material, password, SignatureType::Binary, data)?;
            sig.to_writer_with_header(&mut packets)?;
        }
        if self.ctx.armor {
            armor_bytes(&packets, ArmorType::Signature)
        } else {
            Ok(packets)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_without_signers() {
        let mut ffi = Ffi::new("GPG", "GPG").unwrap();
        let mut input = Input::from_memory(b"abc".to_vec());
        let mut output = Output::to_memory();
        let mut op = SignOp::detached_create(&mut input, &mut output);
        assert!(matches!(op.execute(&mut ffi), Err(Error::BadParameters(_))));
        assert!(matches!(op.execute(&mut ffi), Err(Error::BadState(_))));
    }

    #[test]
    fn test_cleartext_is_always_armored() {
        let mut input = Input::from_memory(b"abc".to_vec());
        let mut output = Output::to_memory();
        let mut op = SignOp::cleartext_create(&mut input, &mut output);
        op.set_armor(false);
        assert!(op.ctx.armor);
        assert!(op.set_hash("SHA384").is_ok());
        assert!(op.set_compression("BZip2", 9).is_ok());
    }
}

//! Message encryption.
//!
//! An [`EncryptOp`] encrypts its input to any mix of recipient keys and
//! symmetric passwords, optionally signing the data inside the encryption
//! and compressing it first.

use pgp::composed::MessageBuilder;
use pgp::crypto::aead::ChunkSize;
use rand::thread_rng;

use crate::error::{Error, Result};
use crate::ffi::Ffi;
use crate::handle::KeyHandle;
use crate::io::{Input, Output};
use crate::key::{with_public, with_secret};
use crate::op::{OpSignature, OperationContext};
use crate::types::{cipher_from_name, cipher_name, Aead};

/// Largest AEAD chunk size exponent accepted by `set_aead_bits`.
const MAX_AEAD_BITS: u8 = 56;

/// Recipients, passwords and signers are added, then everything is written
/// in one `execute` call.
macro_rules! write_message {
    ($builder:ident, $rng:ident, $ctx:expr, $recipients:expr, $signers:expr, $passwords:expr) => {{
        for public in $recipients.iter() {
            with_public!(public, k => $builder.encrypt_to_key(&mut $rng, k))?;
        }
        for (material, password) in $signers.iter().zip($passwords) {
            let subpackets = material.subpackets()?;
            with_secret!(&material.secret, k => {
                $builder.sign_with_subpackets(k, password, material.hash, subpackets);
            });
        }
        if let Some(alg) = $ctx.compression {
            $builder.compression(alg);
        }
        if $ctx.armor {
            $builder.to_armored_string(&mut $rng, None.into())?.into_bytes()
        } else {
            $builder.to_vec(&mut $rng)?
        }
    }};
}

#[derive(Debug)]
pub struct EncryptOp<'a> {
    input: Option<&'a mut Input>,
    output: Option<&'a mut Output>,
    ctx: OperationContext,
}

impl<'a> EncryptOp<'a> {
    pub fn create(input: &'a mut Input, output: &'a mut Output) -> Self {
        Self {
            input: Some(input),
            output: Some(output),
            ctx: OperationContext::default(),
        }
    }

    /// Encrypt to `key`, or to its newest usable encryption subkey.
    ///
    /// # Errors
    /// [`Error::NoSuitableKey`] if neither the key nor any subkey can encrypt.
    pub fn add_recipient(&mut self, ffi: &mut Ffi, key: &mut KeyHandle) -> Result<()> {
        self.ctx.add_recipient(ffi, key)
    }

    /// Sign the data inside the encryption. The returned signature may
    /// override the hash for itself.
    pub fn add_signature(&mut self, ffi: &mut Ffi, key: &mut KeyHandle) -> Result<&mut OpSignature> {
        self.ctx.add_signer(ffi, key)
    }

    /// Add a symmetric password; with `password` unset the provider is asked.
    ///
    /// # Arguments
    /// * `hash` - S2K hash, SHA256 when unset
    /// * `iterations` - S2K iteration count, 0 for the default
    /// * `cipher` - Key-wrapping cipher, AES256 when unset
    pub fn add_password(
        &mut self,
        ffi: &mut Ffi,
        password: Option<&str>,
        hash: Option<&str>,
        iterations: usize,
        cipher: Option<&str>,
    ) -> Result<()> {
        self.ctx.add_password(ffi, password, hash, iterations, cipher)
    }

    pub fn set_armor(&mut self, armored: bool) {
        self.ctx.armor = armored;
    }

    pub fn set_cipher(&mut self, cipher: &str) -> Result<()> {
        self.ctx.cipher = cipher_from_name(cipher)
            .ok_or_else(|| Error::BadParameters(format!("unknown cipher: {}", cipher)))?;
        Ok(())
    }

    /// "None" keeps classic SEIPD v1 framing; "EAX" or "OCB" switch to v2.
    pub fn set_aead(&mut self, alg: &str) -> Result<()> {
        self.ctx.aead = Aead::from_name(alg)
            .ok_or_else(|| Error::BadParameters(format!("unknown AEAD algorithm: {}", alg)))?;
        Ok(())
    }

    pub fn set_aead_bits(&mut self, bits: u8) -> Result<()> {
        if bits > MAX_AEAD_BITS {
            return Err(Error::BadParameters(format!("invalid AEAD chunk bits: {}", bits)));
        }
        self.ctx.aead_bits = bits;
        Ok(())
    }

    pub fn set_compression(&mut self, alg: &str, level: u8) -> Result<()> {
        self.ctx.set_compression(alg, level)
    }

    pub fn set_hash(&mut self, hash: &str) -> Result<()> {
        self.ctx.set_hash(hash)
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

    /// Encrypt the whole input and write the message to the output.
    ///
    /// # Errors
    /// [`Error::BadParameters`] without any recipient or password,
    /// [`Error::BadState`] on a second call.
    pub fn execute(&mut self, ffi: &mut Ffi) -> Result<()> {
        let (input, output) = match (self.input.take(), self.output.take()) {
            (Some(input), Some(output)) => (input, output),
            _ => return Err(Error::BadState("encryption already executed".to_string())),
        };
        if self.ctx.recipients.is_empty() && self.ctx.passwords.is_empty() {
            output.finish(false)?;
            return Err(Error::BadParameters("no recipients or passwords".to_string()));
        }

        match self.encrypt(ffi, input) {
            Ok(message) => {
                output.write(&message);
                output.finish(true)?;
                ffi.log_line(format!(
                    "encrypted to {} keys and {} passwords",
                    self.ctx.recipients.len(),
                    self.ctx.passwords.len()
                ));
                Ok(())
            }
            Err(e) => {
                output.finish(false)?;
                Err(e)
            }
        }
    }

    fn encrypt(&mut self, ffi: &mut Ffi, input: &mut Input) -> Result<Vec<u8>> {
        let data = input.read_all()?;
        let recipients = self
            .ctx
            .recipients
            .iter()
            .map(|id| ffi.key(*id).map(|key| key.public.clone()).ok_or(Error::KeyNotFound))
            .collect::<Result<Vec<_>>>()?;
        let (signers, passwords) = self.ctx.take_signers(ffi)?;

        for entry in &self.ctx.passwords {
            if entry.cipher != self.ctx.cipher {
                ffi.log_line(format!(
                    "password cipher {} replaced by message cipher {}",
                    cipher_name(entry.cipher),
                    cipher_name(self.ctx.cipher)
                ));
            }
        }

        let mut rng = thread_rng();
        let ctx = &self.ctx;
        let builder = MessageBuilder::from_bytes(ctx.file_name.clone(), data);
        let message = match ctx.aead.to_pgp() {
            None => {
                let mut builder = builder.seipd_v1(&mut rng, ctx.cipher);
                for entry in &ctx.passwords {
                    builder.encrypt_with_password(entry.s2k(), &entry.password())?;
                }
                write_message!(builder, rng, ctx, recipients, signers, passwords)
            }
            Some(aead) => {
                let chunk = if ctx.aead_bits == 0 {
                    ChunkSize::default()
                } else {
                    ChunkSize::try_from(ctx.aead_bits).map_err(|_| {
                        Error::NotSupported(format!("AEAD chunk bits {}", ctx.aead_bits))
                    })?
                };
                let mut builder = builder.seipd_v2(&mut rng, ctx.cipher, aead, chunk);
                for entry in &ctx.passwords {
                    builder.encrypt_with_password(&mut rng, entry.s2k(), &entry.password())?;
                }
                write_message!(builder, rng, ctx, recipients, signers, passwords)
            }
        };
        Ok(message)
    }
}

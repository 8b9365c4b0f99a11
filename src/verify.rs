//! Signature verification operations.
//!
//! [`VerifyOp`] checks attached, cleartext and detached signatures. An
//! encrypted message is decrypted first through the key store and the
//! providers. Bad signatures do not fail `execute`; each one carries its
//! own status.

use pgp::composed::{CleartextSignedMessage, DetachedSignature, Message};
use pgp::packet::Signature;

use crate::decrypt::{open_message, scan_packets};
use crate::error::{Error, Result};
use crate::ffi::Ffi;
use crate::handle::{KeyHandle, SignatureHandle};
use crate::internal::{
    dearmor_if_needed, now_secs, signature_created, signature_expiration, signature_issuer,
};
use crate::io::{Input, Output};
use crate::key::{with_public, KeyRef, PublicPart};
use crate::locator::KeyLocator;

/// Outcome of checking one signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureStatus {
    Valid,
    /// Cryptographically valid, but past its expiration time.
    Expired,
    Invalid,
    /// No key with the issuer's key id is available.
    KeyNotFound,
}

/// One signature found by a verify operation.
#[derive(Debug, Clone)]
pub struct VerifySignature {
    sig: Option<Signature>,
    keyid: Option<[u8; 8]>,
    key: Option<KeyRef>,
    status: SignatureStatus,
    created: u32,
    expires: u32,
}

impl VerifySignature {
    pub fn status(&self) -> SignatureStatus {
        self.status
    }

    /// The status as a result code: `Ok` for a valid signature.
    pub fn get_status(&self) -> Result<()> {
        match self.status {
            SignatureStatus::Valid => Ok(()),
            SignatureStatus::Expired => Err(Error::SignatureExpired),
            SignatureStatus::Invalid => Err(Error::SignatureInvalid),
            SignatureStatus::KeyNotFound => Err(Error::KeyNotFound),
        }
    }

    /// Handle on the signature packet.
    ///
    /// # Errors
    /// [`Error::BadState`] when the signature packet was not kept.
    pub fn get_handle(&self) -> Result<SignatureHandle> {
        let sig = self
            .sig
            .clone()
            .ok_or_else(|| Error::BadState("signature packet is not available".to_string()))?;
        Ok(SignatureHandle::new(sig, self.key))
    }

    /// Handle on the signing key.
    pub fn get_key(&self, ffi: &Ffi) -> Result<KeyHandle> {
        let key = self.key.and_then(|id| ffi.key(id)).ok_or(Error::KeyNotFound)?;
        Ok(KeyHandle::for_key(ffi, key))
    }

    /// Issuer key id as uppercase hex.
    pub fn get_keyid(&self) -> Option<String> {
        self.keyid.map(hex::encode_upper)
    }

    /// Creation time and validity period in seconds.
    pub fn get_times(&self) -> (u32, u32) {
        (self.created, self.expires)
    }
}

/// Look up the issuer and check one signature packet with `verify`.
fn check_signature(
    ffi: &mut Ffi,
    sig: &Signature,
    verify: impl Fn(&PublicPart) -> bool,
) -> VerifySignature {
    let keyid = signature_issuer(sig);
    let created = signature_created(sig);
    let expires = signature_expiration(sig);
    let key = keyid.and_then(|id| {
        let locator = KeyLocator::KeyId(id);
        ffi.find_key(&locator, false, true)
            .or_else(|| ffi.find_key(&locator, true, false))
    });

    let status = match key.and_then(|id| ffi.key(id)) {
        None => SignatureStatus::KeyNotFound,
        Some(signer) if verify(&signer.public) => {
            if expires > 0 && created as u64 + expires as u64 <= now_secs() as u64 {
                SignatureStatus::Expired
            } else {
                SignatureStatus::Valid
            }
        }
        Some(_) => SignatureStatus::Invalid,
    };
    VerifySignature {
        sig: Some(sig.clone()),
        keyid,
        key,
        status,
        created,
        expires,
    }
}

/// Nesting limit when walking the signature layers of a message.
const MAX_SIGNATURE_LAYERS: usize = 1024;

/// Every signature layer of a read-through message, outermost first,
/// paired with its signature packet.
fn signature_layers<'m, 'a>(message: &'m Message<'a>) -> Vec<(&'m Message<'a>, &'m Signature)> {
    let mut layers = Vec::new();
    let mut current = message;
    for _ in 0..MAX_SIGNATURE_LAYERS {
        match current {
            Message::SignedOnePass { reader, .. } => {
                if let Some(sig) = reader.signature() {
                    layers.push((current, sig));
                }
                current = reader.get_ref();
            }
            Message::Signed { reader, .. } => {
                layers.push((current, reader.signature()));
                current = reader.get_ref();
            }
            _ => break,
        }
    }
    layers
}

/// Cleartext framework header.
const CLEARTEXT_HEADER: &str = "-----BEGIN PGP SIGNED MESSAGE-----";

/// Builder for a verification.
#[derive(Debug)]
pub struct VerifyOp<'a> {
    input: Option<&'a mut Input>,
    /// Signature input of a detached verification.
    signature: Option<&'a mut Input>,
    output: Option<&'a mut Output>,
    detached: bool,
    signatures: Vec<VerifySignature>,
    recipients: Vec<[u8; 8]>,
    used_recipient: Option<[u8; 8]>,
    symenc: usize,
    used_password: bool,
    executed: bool,
}

impl<'a> VerifyOp<'a> {
    fn new(
        input: &'a mut Input,
        signature: Option<&'a mut Input>,
        output: Option<&'a mut Output>,
    ) -> Self {
        Self {
            input: Some(input),
            detached: signature.is_some(),
            signature,
            output,
            signatures: Vec::new(),
            recipients: Vec::new(),
            used_recipient: None,
            symenc: 0,
            used_password: false,
            executed: false,
        }
    }

    /// Verify an attached or cleartext-signed message, writing the signed
    /// data to `output`.
    pub fn create(input: &'a mut Input, output: &'a mut Output) -> Self {
        Self::new(input, None, Some(output))
    }

    /// Verify a detached signature over the data in `input`.
    pub fn detached_create(input: &'a mut Input, signature: &'a mut Input) -> Self {
        Self::new(input, Some(signature), None)
    }

    /// Check every signature.
    ///
    /// # Errors
    /// [`Error::NoSignaturesFound`] when the data is neither signed nor
    /// encrypted, [`Error::DecryptFailed`] when an encrypted message cannot
    /// be opened, [`Error::BadState`] on a second call.
    pub fn execute(&mut self, ffi: &mut Ffi) -> Result<()> {
        if self.executed {
            return Err(Error::BadState("verification already executed".to_string()));
        }
        self.executed = true;
        let input = self
            .input
            .take()
            .ok_or_else(|| Error::BadState("no input".to_string()))?;
        let output = self.output.take();
        let signature = self.signature.take();

        let result = match signature {
            Some(signature) => self.verify_detached(ffi, input, signature).map(|_| None),
            None => self.verify_attached(ffi, input).map(Some),
        };

        match (result, output) {
            (Ok(data), Some(output)) => {
                output.write(&data.unwrap_or_default());
                output.finish(true)?;
            }
            (Err(e), Some(output)) => {
                output.finish(false)?;
                return Err(e);
            }
            (Err(e), None) => return Err(e),
            (Ok(_), None) => {}
        }

        let valid = self
            .signatures
            .iter()
            .filter(|sig| sig.status == SignatureStatus::Valid)
            .count();
        ffi.log_line(format!(
            "verified {} of {} signatures",
            valid,
            self.signatures.len()
        ));
        if self.signatures.is_empty() && self.recipients.is_empty() && self.symenc == 0 {
            return Err(Error::NoSignaturesFound);
        }
        Ok(())
    }

    fn verify_detached(&mut self, ffi: &mut Ffi, input: &mut Input, signature: &mut Input) -> Result<()> {
        let data = input.read_all()?;
        let raw = dearmor_if_needed(&signature.read_all()?)?;
        for sig in scan_packets(&raw).signatures {
            let detached = DetachedSignature::new(sig.clone());
            let result = check_signature(ffi, &sig, |part| {
                with_public!(part, k => detached.verify(k, &data[..]).is_ok())
            });
            self.signatures.push(result);
        }
        Ok(())
    }

    fn verify_attached(&mut self, ffi: &mut Ffi, input: &mut Input) -> Result<Vec<u8>> {
        let raw = input.read_all()?;
        let text = String::from_utf8_lossy(&raw);
        if text.trim_start().starts_with(CLEARTEXT_HEADER) {
            return self.verify_cleartext(ffi, &text);
        }

        let data = dearmor_if_needed(&raw)?;
        let opened = open_message(ffi, &data)?;
        self.recipients = opened.scan.recipients.clone();
        self.symenc = opened.scan.symenc;
        self.used_password = opened.used_password;
        self.used_recipient = opened
            .used_recipient
            .and_then(|id| ffi.key(id))
            .map(|key| key.keyid());

        for (layer, sig) in signature_layers(&opened.message) {
            let result = check_signature(ffi, sig, |part| {
                with_public!(part, k => layer.verify(k).is_ok())
            });
            self.signatures.push(result);
        }
        Ok(opened.plaintext)
    }

    fn verify_cleartext(&mut self, ffi: &mut Ffi, text: &str) -> Result<Vec<u8>> {
        let (message, _headers) = CleartextSignedMessage::from_string(text)
            .map_err(|e| Error::BadFormat(format!("invalid cleartext message: {}", e)))?;
        let signed = message.signed_text();
        for sig in message.signatures() {
            let result = check_signature(ffi, sig, |part| {
                with_public!(part, k => sig.verify(k, signed.as_bytes()).is_ok())
            });
            self.signatures.push(result);
        }
        Ok(signed.replace("\r\n", "\n").into_bytes())
    }

    pub fn get_signature_count(&self) -> usize {
        self.signatures.len()
    }

    pub fn get_signature_at(&self, idx: usize) -> Result<&VerifySignature> {
        self.signatures
            .get(idx)
            .ok_or_else(|| Error::BadParameters(format!("signature index {} out of range", idx)))
    }

    /// Whether the verified message was encrypted.
    pub fn is_encrypted(&self) -> bool {
        !self.recipients.is_empty() || self.symenc > 0
    }

    pub fn get_recipient_count(&self) -> usize {
        self.recipients.len()
    }

    /// Key id of a public-key session key packet, uppercase hex.
    pub fn get_recipient_at(&self, idx: usize) -> Result<String> {
        self.recipients
            .get(idx)
            .map(hex::encode_upper)
            .ok_or_else(|| Error::BadParameters(format!("recipient index {} out of range", idx)))
    }

    /// Key id of the key that opened the message, if a key did.
    pub fn get_used_recipient(&self) -> Option<String> {
        self.used_recipient.map(hex::encode_upper)
    }

    pub fn get_symenc_count(&self) -> usize {
        self.symenc
    }

    /// Whether a password opened the message.
    pub fn used_password(&self) -> bool {
        self.used_password
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let mut sig = VerifySignature {
            sig: None,
            keyid: Some([0xAB; 8]),
            key: None,
            status: SignatureStatus::Valid,
            created: 10,
            expires: 20,
        };
        assert!(sig.get_status().is_ok());
        sig.status = SignatureStatus::Expired;
        assert!(matches!(sig.get_status(), Err(Error::SignatureExpired)));
        sig.status = SignatureStatus::Invalid;
        assert!(matches!(sig.get_status(), Err(Error::SignatureInvalid)));
        sig.status = SignatureStatus::KeyNotFound;
        assert!(matches!(sig.get_status(), Err(Error::KeyNotFound)));
        assert_eq!(sig.get_keyid().unwrap(), "ABABABABABABABAB");
        assert_eq!(sig.get_times(), (10, 20));
        assert!(sig.get_handle().is_err());
    }

    #[test]
    fn test_unsigned_literal_has_no_signatures() {
        let mut ffi = Ffi::new("GPG", "GPG").unwrap();
        let mut input = Input::from_memory(b"plain bytes".to_vec());
        let mut output = Output::to_memory();
        let mut op = VerifyOp::create(&mut input, &mut output);
        assert!(op.execute(&mut ffi).is_err());
        assert!(matches!(op.execute(&mut ffi), Err(Error::BadState(_))));
    }

    #[test]
    fn test_unsigned_cleartext_has_no_signatures() {
        let mut ffi = Ffi::new("GPG", "GPG").unwrap();
        let text = "-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA256\n\nhello\n";
        let mut input = Input::from_memory(text.as_bytes().to_vec());
        let mut output = Output::to_memory();
        let mut op = VerifyOp::create(&mut input, &mut output);
        assert!(op.execute(&mut ffi).is_err());
        assert_eq!(op.get_signature_count(), 0);
    }
}

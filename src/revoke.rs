//! Key and subkey revocation.

use pgp::crypto::hash::HashAlgorithm;
use pgp::packet::{PacketTrait, RevocationCode, Signature, SignatureType, SubpacketData};

use crate::armor::{armor_bytes, ArmorType};
use crate::certify::{issuer_config, metadata_record, primary_secret, update_records};
use crate::error::{Error, Result};
use crate::ffi::Ffi;
use crate::handle::KeyHandle;
use crate::internal::{now_secs, subpacket, timestamp};
use crate::io::Output;
use crate::key::{Grip, KeyRef, PublicPart};
use crate::protect::secret_password;
use crate::types::{hash_from_name, revocation_code_from_name, revocation_code_name, revocation_code_text};

/// Parsed revocation arguments; unset values take their defaults.
struct RevocationParams {
    hash: Option<HashAlgorithm>,
    code: RevocationCode,
    reason: String,
}

impl RevocationParams {
    fn parse(hash: Option<&str>, code: Option<&str>, reason: Option<&str>) -> Result<Self> {
        let hash = match hash {
            Some(name) => Some(
                hash_from_name(name)
                    .ok_or_else(|| Error::BadParameters(format!("unknown hash algorithm: {}", name)))?,
            ),
            None => None,
        };
        let code = match code {
            Some(name) => revocation_code_from_name(name)
                .ok_or_else(|| Error::BadParameters(format!("unknown revocation code: {}", name)))?,
            None => RevocationCode::NoReason,
        };
        let reason = reason
            .map(str::to_string)
            .unwrap_or_else(|| revocation_code_text(code).to_string());
        Ok(Self { hash, code, reason })
    }
}

/// Secret record of the primary that may revoke `grip`, and the target's
/// public part.
fn revoker(ffi: &Ffi, grip: &Grip) -> Result<(KeyRef, PublicPart)> {
    let target = metadata_record(ffi, grip).ok_or(Error::KeyNotFound)?;
    let revoker_grip = target.primary_grip().unwrap_or(*grip);
    let revoker = ffi.secring.by_grip(&revoker_grip).ok_or(Error::NoSuitableKey)?;
    if !revoker.has_secret() {
        return Err(Error::NoSuitableKey);
    }
    Ok((revoker.id, target.public.clone()))
}

/// Build a key or subkey revocation signature for `grip`.
fn make_revocation(ffi: &mut Ffi, grip: &Grip, params: &RevocationParams) -> Result<Signature> {
    let (revoker_id, target) = revoker(ffi, grip)?;
    let secret = primary_secret(ffi.secring.get(revoker_id).ok_or(Error::NoSuitableKey)?)?;
    let password = secret_password(ffi, revoker_id, "revoke")?;

    let typ = match target {
        PublicPart::Primary(_) => SignatureType::KeyRevocation,
        PublicPart::Sub(_) => SignatureType::SubkeyRevocation,
    };
    let mut config = issuer_config(&secret, typ, params.hash, timestamp(now_secs()))?;
    config.hashed_subpackets.push(subpacket(SubpacketData::RevocationReason(
        params.code,
        params.reason.clone().into(),
    ))?);

    let sig = match &target {
        PublicPart::Primary(_) => config.sign_key(&secret, &password, secret.public_key()),
        PublicPart::Sub(subkey) => {
            config.sign_subkey_binding(&secret, secret.public_key(), &password, subkey)
        }
    };
    sig.map_err(|e| Error::Generic(format!("failed to create revocation: {}", e)))
}

impl KeyHandle {
    /// Revoke the key or subkey and apply the revocation to both of its
    /// records.
    ///
    /// # Arguments
    /// * `hash` - Signature hash, `None` for the default
    /// * `code` - "no", "superseded", "compromised" or "retired"; "no" when unset
    /// * `reason` - Free text, the code's default text when unset
    ///
    /// # Errors
    /// [`Error::NoSuitableKey`] if the owning primary's secret is not loaded.
    pub fn revoke(
        &mut self,
        ffi: &mut Ffi,
        hash: Option<&str>,
        code: Option<&str>,
        reason: Option<&str>,
    ) -> Result<()> {
        let params = RevocationParams::parse(hash, code, reason)?;
        let grip = self.any_key(ffi)?.grip();
        let sig = make_revocation(ffi, &grip, &params)?;
        update_records(ffi, &grip, |record| record.signatures.push(sig.clone()));
        ffi.log_line(format!(
            "revoked key {} ({})",
            grip,
            revocation_code_name(params.code)
        ));
        Ok(())
    }

    /// Write a revocation signature for a primary key without applying it.
    pub fn export_revocation(
        &mut self,
        ffi: &mut Ffi,
        output: &mut Output,
        hash: Option<&str>,
        code: Option<&str>,
        reason: Option<&str>,
        armored: bool,
    ) -> Result<()> {
        let params = RevocationParams::parse(hash, code, reason)?;
        let key = self.any_key(ffi)?;
        if !key.is_primary() {
            return Err(Error::BadParameters(
                "revocations are exported for primary keys only".to_string(),
            ));
        }
        let grip = key.grip();
        let result = make_revocation(ffi, &grip, &params).and_then(|sig| {
            let mut packet = Vec::new();
            sig.to_writer_with_header(&mut packet)?;
            Ok(if armored {
                armor_bytes(&packet, ArmorType::Signature)?
            } else {
                packet
            })
        });
        match result {
            Ok(data) => {
                output.write(&data);
                output.finish(true)
            }
            Err(e) => {
                output.finish(false)?;
                Err(e)
            }
        }
    }
}

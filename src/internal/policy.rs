//! Self-signature selection and validity checks.
//!
//! rpgp doesn't have a policy system like sequoia, so the rules for picking
//! the authoritative self-signature live here:
//! - the newest signature of the relevant type wins
//! - revocations are recognised by signature type, and only kept once they
//!   verify against the primary key

use pgp::packet::{Signature, SignatureType};
use pgp::types::SignedUser;

use super::helpers::signature_created;

/// Check if a key has expired based on its creation time and validity period.
pub(crate) fn is_key_expired(creation: u32, validity: u32, now: u32) -> bool {
    if validity == 0 {
        return false;
    }
    (creation as u64 + validity as u64) < now as u64
}

pub(crate) fn is_revocation(sig: &Signature) -> bool {
    matches!(
        sig.typ(),
        Some(SignatureType::KeyRevocation) | Some(SignatureType::SubkeyRevocation)
    )
}

/// Whether `sig` may stay on a key record. Anything but a key, subkey or
/// certification revocation passes; a revocation only when `verify` accepts it.
pub(crate) fn accept_revocation<F>(sig: &Signature, verify: F) -> bool
where
    F: FnOnce(&Signature) -> pgp::errors::Result<()>,
{
    if !is_revocation(sig) && sig.typ() != Some(SignatureType::CertRevocation) {
        return true;
    }
    match verify(sig) {
        Ok(()) => true,
        Err(e) => {
            log::warn!("dropping revocation signature that does not verify: {}", e);
            false
        }
    }
}

pub(crate) fn is_user_certification(sig: &Signature) -> bool {
    matches!(
        sig.typ(),
        Some(SignatureType::CertGeneric)
            | Some(SignatureType::CertPersona)
            | Some(SignatureType::CertCasual)
            | Some(SignatureType::CertPositive)
    )
}

/// Newest self-certification among a primary key's user ids, together with
/// the index of the user it belongs to.
pub(crate) fn latest_certification(users: &[SignedUser]) -> Option<(usize, &Signature)> {
    let mut best: Option<(usize, &Signature)> = None;
    for (idx, user) in users.iter().enumerate() {
        for sig in user.signatures.iter().filter(|s| is_user_certification(s)) {
            let newer = match best {
                Some((_, current)) => signature_created(sig) >= signature_created(current),
                None => true,
            };
            if newer {
                best = Some((idx, sig));
            }
        }
    }
    best
}

/// Newest subkey binding signature.
pub(crate) fn latest_binding(sigs: &[Signature]) -> Option<&Signature> {
    sigs.iter()
        .filter(|s| s.typ() == Some(SignatureType::SubkeyBinding))
        .max_by_key(|s| signature_created(s))
}

/// Newest direct-key signature.
pub(crate) fn latest_direct(sigs: &[Signature]) -> Option<&Signature> {
    sigs.iter()
        .filter(|s| s.typ() == Some(SignatureType::Key))
        .max_by_key(|s| signature_created(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_expiry() {
        assert!(!is_key_expired(100, 0, 10_000));
        assert!(!is_key_expired(100, 1000, 500));
        assert!(is_key_expired(100, 1000, 1200));
    }
}

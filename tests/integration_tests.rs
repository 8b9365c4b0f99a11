//! Integration tests for rnpcore.
//!
//! These tests drive the engine end to end through the public API: key
//! generation and protection, keyring persistence, encryption, signing,
//! verification and revocation.

use rnpcore::{
    // Context and endpoints
    decrypt, dearmor, enarmor, Ffi, FixedPassword, Input, Output,
    // Operations
    EncryptOp, GenerateOp, SignOp, VerifyOp,
    // Flags and statuses
    Error, ExportFlags, ImportFlags, KeyHandle, LoadFlags, SignatureStatus, VerifySignature,
};

const TEST_PASSWORD: &str = "hunter2";
const TEST_UID: &str = "Alice <a@x>";

/// Context holding one unprotected Curve25519 key.
fn context_with_key(uid: &str) -> (Ffi, KeyHandle) {
    let mut ffi = Ffi::new("GPG", "GPG").unwrap();
    let key = ffi.generate_key_25519(uid, None).unwrap();
    (ffi, key)
}

/// Exported transferable key, public or secret, with all subkeys.
fn export_key(ffi: &mut Ffi, key: &mut KeyHandle, secret: bool) -> Vec<u8> {
    let mut output = Output::to_memory();
    let flags = ExportFlags {
        public: !secret,
        secret,
        subkeys: true,
        armored: true,
    };
    key.export(ffi, &mut output, flags).unwrap();
    output.memory_get_buf(false).unwrap()
}

fn import(ffi: &mut Ffi, data: Vec<u8>) {
    let flags = ImportFlags {
        public: true,
        secret: true,
        ..Default::default()
    };
    ffi.import_keys(&mut Input::from_memory(data), flags).unwrap();
}

fn decrypt_bytes(ffi: &mut Ffi, message: &[u8]) -> rnpcore::Result<Vec<u8>> {
    let mut input = Input::from_memory(message.to_vec());
    let mut output = Output::to_memory();
    decrypt(ffi, &mut input, &mut output)?;
    output.memory_get_buf(false)
}

// =============================================================================
// Key Generation Tests
// =============================================================================

mod key_generation {
    use super::*;

    #[test]
    fn test_subkey_links_to_primary() {
        let (mut ffi, key) = context_with_key("Bob <bob@example.com>");
        let sub = key.get_subkey_at(&mut ffi, 0).unwrap();
        assert_eq!(
            sub.get_primary_grip(&ffi).unwrap().unwrap(),
            key.get_grip(&ffi).unwrap()
        );
        assert_eq!(
            sub.get_primary_fprint(&ffi).unwrap().unwrap(),
            key.get_fprint(&ffi).unwrap()
        );
        assert!(key.is_primary(&ffi).unwrap());
        assert!(sub.is_sub(&ffi).unwrap());
    }

    #[test]
    fn test_fingerprint_and_keyid_find_same_key() {
        let (mut ffi, key) = context_with_key("Carol <carol@example.com>");
        let fpr = key.get_fprint(&ffi).unwrap();
        let keyid = key.get_keyid(&ffi).unwrap();
        assert!(fpr.ends_with(&keyid));

        let by_fpr = ffi.locate_key("fingerprint", &fpr).unwrap().unwrap();
        let by_keyid = ffi.locate_key("keyid", &keyid).unwrap().unwrap();
        assert_eq!(by_fpr.get_grip(&ffi).unwrap(), by_keyid.get_grip(&ffi).unwrap());
    }

    #[test]
    fn test_sign_only_key_is_not_a_recipient() {
        let mut ffi = Ffi::new("GPG", "GPG").unwrap();
        let mut op = GenerateOp::create("EDDSA").unwrap();
        op.set_userid("Signer <signer@example.com>").unwrap();
        op.add_usage("sign").unwrap();
        op.add_usage("certify").unwrap();
        op.execute(&mut ffi).unwrap();
        let mut key = op.get_key().unwrap();

        let mut input = Input::from_memory(b"data".to_vec());
        let mut output = Output::to_memory();
        let mut encrypt = EncryptOp::create(&mut input, &mut output);
        assert!(matches!(
            encrypt.add_recipient(&mut ffi, &mut key),
            Err(Error::NoSuitableKey)
        ));
    }

    #[test]
    fn test_generate_from_json() {
        let mut ffi = Ffi::new("GPG", "GPG").unwrap();
        let result = ffi
            .generate_key_json(
                r#"{
                    "primary": {"type": "EDDSA", "userid": "json@example.com"},
                    "sub": {"type": "ECDH", "curve": "Curve25519"}
                }"#,
            )
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&result).unwrap();
        let primary = value["primary"]["grip"].as_str().unwrap();
        let sub = value["sub"]["grip"].as_str().unwrap();

        let sub_key = ffi.locate_key("grip", sub).unwrap().unwrap();
        assert_eq!(sub_key.get_primary_grip(&ffi).unwrap().unwrap(), primary);
    }

    #[test]
    fn test_generate_json_rejects_unknown_fields() {
        let mut ffi = Ffi::new("GPG", "GPG").unwrap();
        let result = ffi.generate_key_json(r#"{"primary": {"type": "EDDSA", "colour": "blue"}}"#);
        assert!(matches!(result, Err(Error::BadParameters(_))));
        assert_eq!(ffi.get_public_key_count(), 0);
    }
}

// =============================================================================
// Protection Tests
// =============================================================================

mod protection {
    use super::*;

    #[test]
    fn test_protect_unprotect_round_trip() {
        let (mut ffi, mut key) = context_with_key("Dave <dave@example.com>");
        key.protect(&mut ffi, "pw", None, None, None, 1024).unwrap();
        assert!(key.is_protected(&mut ffi).unwrap());
        assert!(key.is_locked(&mut ffi).unwrap());

        assert!(matches!(
            key.unprotect(&mut ffi, Some("wrong")),
            Err(Error::BadPassword)
        ));
        assert!(key.is_protected(&mut ffi).unwrap());

        key.unprotect(&mut ffi, Some("pw")).unwrap();
        assert!(!key.is_protected(&mut ffi).unwrap());

        // secret operations need no prompt afterwards
        let mut input = Input::from_memory(b"abc".to_vec());
        let mut output = Output::to_memory();
        let mut op = SignOp::detached_create(&mut input, &mut output);
        op.add_signature(&mut ffi, &mut key).unwrap();
        op.execute(&mut ffi).unwrap();
    }

    #[test]
    fn test_protection_parameters() {
        let (mut ffi, mut key) = context_with_key("Erin <erin@example.com>");
        key.protect(&mut ffi, "pw", Some("AES128"), None, Some("SHA512"), 2048)
            .unwrap();
        assert_eq!(key.get_protection_cipher(&mut ffi).unwrap(), "AES128");
        assert_eq!(key.get_protection_hash(&mut ffi).unwrap(), "SHA512");
        assert!(key.get_protection_iterations(&mut ffi).unwrap() >= 2048);
    }

    #[test]
    fn test_ocb_protection_mode() {
        let (mut ffi, mut key) = context_with_key("Gail <gail@example.com>");
        key.protect(&mut ffi, "pw", None, Some("OCB"), None, 1024).unwrap();
        assert_eq!(key.get_protection_mode(&mut ffi).unwrap(), "OCB");
        assert_eq!(key.get_protection_hash(&mut ffi).unwrap(), "SHA256");

        assert!(matches!(
            key.unprotect(&mut ffi, Some("wrong")),
            Err(Error::BadPassword)
        ));
        key.unprotect(&mut ffi, Some("pw")).unwrap();
        assert!(!key.is_protected(&mut ffi).unwrap());
    }

    #[test]
    fn test_locked_key_signs_through_provider() {
        let (mut ffi, mut key) = context_with_key("Finn <finn@example.com>");
        key.protect(&mut ffi, "pw", None, None, None, 1024).unwrap();
        ffi.set_password_provider(FixedPassword::new("pw"));

        let mut input = Input::from_memory(b"abc".to_vec());
        let mut output = Output::to_memory();
        let mut op = SignOp::detached_create(&mut input, &mut output);
        op.add_signature(&mut ffi, &mut key).unwrap();
        op.execute(&mut ffi).unwrap();
        drop(op);
        assert!(!output.memory_get_buf(false).unwrap().is_empty());
    }
}

// =============================================================================
// Armor Tests
// =============================================================================

mod armor {
    use super::*;

    fn armor_round_trip(data: &[u8]) -> (String, Vec<u8>) {
        let mut input = Input::from_memory(data.to_vec());
        let mut armored = Output::to_memory();
        enarmor(&mut input, &mut armored, Some("message")).unwrap();
        let text = armored.memory_get_buf(false).unwrap();

        let mut input = Input::from_memory(text.clone());
        let mut output = Output::to_memory();
        dearmor(&mut input, &mut output).unwrap();
        (String::from_utf8(text).unwrap(), output.memory_get_buf(false).unwrap())
    }

    #[test]
    fn test_enarmor_dearmor_binary() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let (_, plain) = armor_round_trip(&data);
        assert_eq!(plain, data);
    }

    #[test]
    fn test_enarmor_dearmor_empty() {
        let (text, plain) = armor_round_trip(b"");
        assert!(text.contains("\n=twTO\n"));
        assert!(plain.is_empty());
    }

    #[test]
    fn test_enarmor_dearmor_lengths() {
        // every residue of the base64 grouping, and both sides of a line break
        for len in [1usize, 2, 3, 4, 47, 48, 49, 95, 96, 97, 4096] {
            let data: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
            let (text, plain) = armor_round_trip(&data);
            assert_eq!(plain, data, "length {}", len);

            let lines: Vec<&str> = text.lines().collect();
            let checksum = lines[lines.len() - 2];
            assert!(checksum.starts_with('=') && checksum.len() == 5, "length {}", len);
            assert!(lines.iter().all(|line| line.len() <= 64));
        }
    }

    #[test]
    fn test_dearmor_rejects_bad_checksum() {
        let (text, _) = armor_round_trip(b"checksum covered data");
        let lines: Vec<&str> = text.lines().collect();
        let checksum = lines[lines.len() - 2];
        let tampered = text.replace(checksum, "=AAAA");
        assert_ne!(tampered, text);

        let mut input = Input::from_memory(tampered.into_bytes());
        let mut output = Output::to_memory();
        assert!(dearmor(&mut input, &mut output).is_err());
    }
}

// =============================================================================
// End-to-end Scenarios
// =============================================================================

mod scenarios {
    use super::*;

    #[test]
    fn test_rsa_store_reload_sign_verify() {
        let dir = tempfile::tempdir().unwrap();
        let pubring = dir.path().join("pubring.gpg");
        let secring = dir.path().join("secring.gpg");

        let keyid = {
            let mut ffi = Ffi::new("GPG", "GPG").unwrap();
            let key = ffi
                .generate_key_rsa(2048, 2048, TEST_UID, Some(TEST_PASSWORD))
                .unwrap();
            let sub = key.get_subkey_at(&mut ffi, 0).unwrap();
            assert!(sub.allows_usage(&ffi, "encrypt").unwrap());

            let public_only = LoadFlags { public: true, secret: false };
            let secret_only = LoadFlags { public: false, secret: true };
            let mut output = Output::to_path(&pubring, true).unwrap();
            ffi.save_keys("GPG", &mut output, public_only).unwrap();
            let mut output = Output::to_path(&secring, true).unwrap();
            ffi.save_keys("GPG", &mut output, secret_only).unwrap();
            key.get_keyid(&ffi).unwrap()
        };

        let mut ffi = Ffi::new("GPG", "GPG").unwrap();
        let info = rnpcore::detect_homedir_info(dir.path()).unwrap().unwrap();
        let mut input = Input::from_path(&info.pub_path).unwrap();
        ffi.load_keys(info.pub_format, &mut input, LoadFlags { public: true, secret: false })
            .unwrap();
        let mut input = Input::from_path(&info.sec_path).unwrap();
        ffi.load_keys(info.sec_format, &mut input, LoadFlags { public: false, secret: true })
            .unwrap();

        let mut key = ffi.locate_key("userid", "Alice").unwrap().unwrap();
        assert!(key.is_protected(&mut ffi).unwrap());
        key.unlock(&mut ffi, Some(TEST_PASSWORD)).unwrap();

        let mut input = Input::from_memory(b"abc".to_vec());
        let mut signature = Output::to_memory();
        let mut op = SignOp::detached_create(&mut input, &mut signature);
        op.add_signature(&mut ffi, &mut key).unwrap();
        op.execute(&mut ffi).unwrap();
        drop(op);

        let mut data = Input::from_memory(b"abc".to_vec());
        let mut sig_input = Input::from_memory(signature.memory_get_buf(false).unwrap());
        let mut verify = VerifyOp::detached_create(&mut data, &mut sig_input);
        verify.execute(&mut ffi).unwrap();
        assert_eq!(verify.get_signature_count(), 1);
        let sig = verify.get_signature_at(0).unwrap();
        assert_eq!(sig.status(), SignatureStatus::Valid);
        assert!(sig.get_status().is_ok());
        assert_eq!(sig.get_keyid().unwrap(), keyid);
    }

    #[test]
    fn test_imported_compromised_revocation() {
        let (mut ffi, mut key) = context_with_key("Gina <gina@example.com>");
        key.revoke(&mut ffi, None, Some("compromised"), Some("stolen laptop"))
            .unwrap();
        let exported = export_key(&mut ffi, &mut key, false);

        let mut other = Ffi::new("GPG", "GPG").unwrap();
        import(&mut other, exported);
        let imported = other.locate_key("userid", "Gina").unwrap().unwrap();
        assert!(imported.is_revoked(&other).unwrap());
        assert!(imported.is_compromised(&other).unwrap());
        assert!(!imported.is_superseded(&other).unwrap());
        assert_eq!(imported.get_revocation_reason(&other).unwrap(), "stolen laptop");
    }

    #[test]
    fn test_import_standalone_revocation() {
        let (mut ffi, mut key) = context_with_key("Hana <hana@example.com>");
        let public = export_key(&mut ffi, &mut key, false);
        let mut revocation = Output::to_memory();
        key.export_revocation(&mut ffi, &mut revocation, None, Some("retired"), None, true)
            .unwrap();

        let mut other = Ffi::new("GPG", "GPG").unwrap();
        import(&mut other, public);
        let report = other
            .import_signatures(&mut Input::from_memory(revocation.memory_get_buf(false).unwrap()))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&report).unwrap();
        assert_eq!(value["sigs"][0]["public"], "new");
        assert_eq!(value["sigs"][0]["secret"], "none");

        let imported = other.locate_key("userid", "Hana").unwrap().unwrap();
        assert!(imported.is_retired(&other).unwrap());
        assert!(!imported.is_compromised(&other).unwrap());
    }

    /// Copy of the armored public key `target` carrying a key revocation
    /// and a user id revocation made by the secret key `issuer`.
    fn with_foreign_revocations(target: &[u8], issuer: &[u8]) -> Vec<u8> {
        use pgp::composed::{Deserializable, SignedPublicKey, SignedSecretKey};
        use pgp::packet::{RevocationCode, SignatureConfig, SignatureType, Subpacket, SubpacketData};
        use pgp::types::{KeyDetails, Password, Tag};

        let (mut target, _) = SignedPublicKey::from_armor_single(target).unwrap();
        let (issuer, _) = SignedSecretKey::from_armor_single(issuer).unwrap();
        let signer = &issuer.primary_key;
        let now = chrono::DateTime::from_timestamp(chrono::Utc::now().timestamp(), 0).unwrap();
        let config = |typ: SignatureType| {
            let mut config = SignatureConfig::from_key(rand::thread_rng(), signer, typ).unwrap();
            config.hashed_subpackets = vec![
                Subpacket::regular(SubpacketData::SignatureCreationTime(now)).unwrap(),
                Subpacket::regular(SubpacketData::IssuerFingerprint(signer.fingerprint())).unwrap(),
                Subpacket::regular(SubpacketData::RevocationReason(
                    RevocationCode::KeyCompromised,
                    "forged".into(),
                ))
                .unwrap(),
            ];
            config.unhashed_subpackets =
                vec![Subpacket::regular(SubpacketData::Issuer(signer.key_id())).unwrap()];
            config
        };

        let key_revocation = config(SignatureType::KeyRevocation)
            .sign_key(signer, &Password::empty(), &target.primary_key)
            .unwrap();
        let uid_revocation = config(SignatureType::CertRevocation)
            .sign_certification_third_party(
                signer,
                &Password::empty(),
                &target.primary_key,
                Tag::UserId,
                &target.details.users[0].id,
            )
            .unwrap();
        target.details.revocation_signatures.push(key_revocation);
        target.details.users[0].signatures.push(uid_revocation);
        target.to_armored_bytes(None.into()).unwrap()
    }

    #[test]
    fn test_third_party_revocations_are_ignored() {
        let mut ffi = Ffi::new("GPG", "GPG").unwrap();
        let mut alice = ffi.generate_key_25519("Alice <alice@example.com>", None).unwrap();
        let mut mallory = ffi.generate_key_25519("Mallory <mallory@example.com>", None).unwrap();
        let alice_public = export_key(&mut ffi, &mut alice, false);
        let mallory_secret = export_key(&mut ffi, &mut mallory, true);
        let forged = with_foreign_revocations(&alice_public, &mallory_secret);

        let mut other = Ffi::new("GPG", "GPG").unwrap();
        import(&mut other, forged);
        let imported = other.locate_key("userid", "Alice").unwrap().unwrap();
        assert!(!imported.is_revoked(&other).unwrap());
        let uid = imported.get_uid_handle_at(&other, 0).unwrap();
        assert!(!uid.is_revoked(&other).unwrap());
        assert_eq!(uid.get_signature_count(&other).unwrap(), 1);

        // merging into a store that already holds the key changes nothing
        let forged = with_foreign_revocations(&alice_public, &mallory_secret);
        import(&mut ffi, forged);
        assert!(!alice.is_revoked(&ffi).unwrap());
        assert!(!alice.get_uid_handle_at(&ffi, 0).unwrap().is_revoked(&ffi).unwrap());
    }

    #[test]
    fn test_two_recipients_and_password() {
        let mut ffi = Ffi::new("GPG", "GPG").unwrap();
        let mut alice = ffi.generate_key_25519("Alice <alice@example.com>", None).unwrap();
        let mut bob = ffi.generate_key_25519("Bob <bob@example.com>", None).unwrap();
        let alice_secret = export_key(&mut ffi, &mut alice, true);
        let bob_secret = export_key(&mut ffi, &mut bob, true);

        let plaintext = b"meet at the usual place".to_vec();
        let mut input = Input::from_memory(plaintext.clone());
        let mut output = Output::to_memory();
        let mut op = EncryptOp::create(&mut input, &mut output);
        op.add_recipient(&mut ffi, &mut alice).unwrap();
        op.add_recipient(&mut ffi, &mut bob).unwrap();
        op.add_password(&mut ffi, Some("shared"), None, 1024, None).unwrap();
        op.set_aead("None").unwrap();
        op.set_armor(true);
        op.execute(&mut ffi).unwrap();
        drop(op);
        let message = output.memory_get_buf(false).unwrap();

        let mut only_alice = Ffi::new("GPG", "GPG").unwrap();
        import(&mut only_alice, alice_secret);
        assert_eq!(decrypt_bytes(&mut only_alice, &message).unwrap(), plaintext);

        let mut only_bob = Ffi::new("GPG", "GPG").unwrap();
        import(&mut only_bob, bob_secret);
        assert_eq!(decrypt_bytes(&mut only_bob, &message).unwrap(), plaintext);

        let mut password_only = Ffi::new("GPG", "GPG").unwrap();
        password_only.set_password_provider(FixedPassword::new("shared"));
        assert_eq!(decrypt_bytes(&mut password_only, &message).unwrap(), plaintext);

        let mut nobody = Ffi::new("GPG", "GPG").unwrap();
        assert!(matches!(decrypt_bytes(&mut nobody, &message), Err(Error::DecryptFailed)));
    }
}

// =============================================================================
// Signing and Verification Tests
// =============================================================================

mod signing {
    use super::*;

    fn sign_with(mode: &str, ffi: &mut Ffi, key: &mut KeyHandle, data: &[u8]) -> Vec<u8> {
        let mut input = Input::from_memory(data.to_vec());
        let mut output = Output::to_memory();
        let mut op = match mode {
            "cleartext" => SignOp::cleartext_create(&mut input, &mut output),
            _ => SignOp::create(&mut input, &mut output),
        };
        op.add_signature(ffi, key).unwrap();
        op.execute(ffi).unwrap();
        drop(op);
        output.memory_get_buf(false).unwrap()
    }

    #[test]
    fn test_attached_signature_verifies() {
        let (mut ffi, mut key) = context_with_key("Ivan <ivan@example.com>");
        let signed = sign_with("attached", &mut ffi, &mut key, b"attached data");

        let mut input = Input::from_memory(signed);
        let mut output = Output::to_memory();
        let mut verify = VerifyOp::create(&mut input, &mut output);
        verify.execute(&mut ffi).unwrap();
        assert_eq!(verify.get_signature_count(), 1);
        assert!(verify.get_signature_at(0).unwrap().get_status().is_ok());
        assert!(!verify.is_encrypted());
        drop(verify);
        assert_eq!(output.memory_get_buf(false).unwrap(), b"attached data");
    }

    #[test]
    fn test_cleartext_signature_verifies() {
        let (mut ffi, mut key) = context_with_key("Jade <jade@example.com>");
        let signed = sign_with("cleartext", &mut ffi, &mut key, b"line one\nline two\n");
        assert!(signed.starts_with(b"-----BEGIN PGP SIGNED MESSAGE-----"));

        let mut input = Input::from_memory(signed);
        let mut output = Output::to_memory();
        let mut verify = VerifyOp::create(&mut input, &mut output);
        verify.execute(&mut ffi).unwrap();
        let sig = verify.get_signature_at(0).unwrap();
        assert_eq!(sig.status(), SignatureStatus::Valid);
        assert_eq!(sig.get_handle().unwrap().get_type(), "text");
    }

    #[test]
    fn test_unknown_signer() {
        let (mut ffi, mut key) = context_with_key("Kim <kim@example.com>");
        let mut input = Input::from_memory(b"abc".to_vec());
        let mut signature = Output::to_memory();
        let mut op = SignOp::detached_create(&mut input, &mut signature);
        op.add_signature(&mut ffi, &mut key).unwrap();
        op.execute(&mut ffi).unwrap();
        drop(op);

        let mut stranger = Ffi::new("GPG", "GPG").unwrap();
        let mut data = Input::from_memory(b"abc".to_vec());
        let mut sig_input = Input::from_memory(signature.memory_get_buf(false).unwrap());
        let mut verify = VerifyOp::detached_create(&mut data, &mut sig_input);
        verify.execute(&mut stranger).unwrap();
        let sig = verify.get_signature_at(0).unwrap();
        assert_eq!(sig.status(), SignatureStatus::KeyNotFound);
        assert!(matches!(sig.get_status(), Err(Error::KeyNotFound)));
    }

    fn verify_attached(ffi: &mut Ffi, signed: Vec<u8>) -> (Vec<VerifySignature>, bool, Vec<u8>) {
        let mut input = Input::from_memory(signed);
        let mut output = Output::to_memory();
        let mut verify = VerifyOp::create(&mut input, &mut output);
        verify.execute(ffi).unwrap();
        let sigs = (0..verify.get_signature_count())
            .map(|i| verify.get_signature_at(i).unwrap().clone())
            .collect();
        let encrypted = verify.is_encrypted();
        drop(verify);
        (sigs, encrypted, output.memory_get_buf(false).unwrap())
    }

    fn now() -> u32 {
        chrono::Utc::now().timestamp() as u32
    }

    #[test]
    fn test_encrypted_and_signed_message_verifies() {
        let mut ffi = Ffi::new("GPG", "GPG").unwrap();
        let mut alice = ffi.generate_key_25519("Alice <alice@example.com>", None).unwrap();
        let mut bob = ffi.generate_key_25519("Bob <bob@example.com>", None).unwrap();

        let mut input = Input::from_memory(b"signed and sealed".to_vec());
        let mut output = Output::to_memory();
        let mut op = EncryptOp::create(&mut input, &mut output);
        op.add_recipient(&mut ffi, &mut bob).unwrap();
        op.add_signature(&mut ffi, &mut alice).unwrap();
        op.execute(&mut ffi).unwrap();
        drop(op);
        let message = output.memory_get_buf(false).unwrap();

        let (sigs, encrypted, data) = verify_attached(&mut ffi, message);
        assert!(encrypted);
        assert_eq!(data, b"signed and sealed");
        assert_eq!(sigs.len(), 1);
        assert_eq!(sigs[0].status(), SignatureStatus::Valid);
        assert!(sigs[0].get_handle().is_ok());
        assert_eq!(
            sigs[0].get_key(&ffi).unwrap().get_keyid(&ffi).unwrap(),
            alice.get_keyid(&ffi).unwrap()
        );
        let (created, expires) = sigs[0].get_times();
        assert!(created > 0 && created <= now());
        assert_eq!(expires, 0);
    }

    #[test]
    fn test_two_attached_signers() {
        let mut ffi = Ffi::new("GPG", "GPG").unwrap();
        let mut alice = ffi.generate_key_25519("Alice <alice@example.com>", None).unwrap();
        let mut bob = ffi.generate_key_25519("Bob <bob@example.com>", None).unwrap();

        let mut input = Input::from_memory(b"co-signed".to_vec());
        let mut output = Output::to_memory();
        let mut op = SignOp::create(&mut input, &mut output);
        op.add_signature(&mut ffi, &mut alice).unwrap();
        op.add_signature(&mut ffi, &mut bob).unwrap();
        op.execute(&mut ffi).unwrap();
        drop(op);

        let (sigs, _, data) = verify_attached(&mut ffi, output.memory_get_buf(false).unwrap());
        assert_eq!(data, b"co-signed");
        assert_eq!(sigs.len(), 2);
        assert!(sigs.iter().all(|sig| sig.status() == SignatureStatus::Valid));
        assert_ne!(sigs[0].get_keyid(), sigs[1].get_keyid());
    }

    #[test]
    fn test_compressed_attached_signature() {
        let (mut ffi, mut key) = context_with_key("Mona <mona@example.com>");
        let data = b"compressible ".repeat(64);
        let mut input = Input::from_memory(data.clone());
        let mut output = Output::to_memory();
        let mut op = SignOp::create(&mut input, &mut output);
        op.set_compression("ZLIB", 6).unwrap();
        op.add_signature(&mut ffi, &mut key).unwrap();
        op.execute(&mut ffi).unwrap();
        drop(op);
        let signed = output.memory_get_buf(false).unwrap();
        assert!(signed.len() < data.len());

        let (sigs, _, plain) = verify_attached(&mut ffi, signed);
        assert_eq!(plain, data);
        assert_eq!(sigs.len(), 1);
        assert_eq!(sigs[0].status(), SignatureStatus::Valid);
    }

    #[test]
    fn test_attached_unknown_signer() {
        let (mut ffi, mut key) = context_with_key("Nell <nell@example.com>");
        let signed = sign_with("attached", &mut ffi, &mut key, b"from a stranger");

        let mut stranger = Ffi::new("GPG", "GPG").unwrap();
        let (sigs, _, data) = verify_attached(&mut stranger, signed);
        assert_eq!(data, b"from a stranger");
        assert_eq!(sigs.len(), 1);
        assert_eq!(sigs[0].status(), SignatureStatus::KeyNotFound);
        assert_eq!(sigs[0].get_keyid(), Some(key.get_keyid(&ffi).unwrap()));
        assert!(sigs[0].get_times().0 > 0);
    }

    #[test]
    fn test_signature_time_overrides() {
        let (mut ffi, mut key) = context_with_key("Otto <otto@example.com>");
        let created = now() - 3600;
        let expires = 86400;

        for mode in ["attached", "detached"] {
            let mut input = Input::from_memory(b"dated".to_vec());
            let mut output = Output::to_memory();
            let mut op = match mode {
                "detached" => SignOp::detached_create(&mut input, &mut output),
                _ => SignOp::create(&mut input, &mut output),
            };
            let sig = op.add_signature(&mut ffi, &mut key).unwrap();
            sig.set_creation_time(created);
            sig.set_expiration_time(expires);
            op.execute(&mut ffi).unwrap();
            drop(op);
            let signed = output.memory_get_buf(false).unwrap();

            let mut verify_input = Input::from_memory(match mode {
                "detached" => b"dated".to_vec(),
                _ => signed.clone(),
            });
            let mut sig_input = Input::from_memory(signed);
            let mut plain = Output::to_memory();
            let mut verify = match mode {
                "detached" => VerifyOp::detached_create(&mut verify_input, &mut sig_input),
                _ => VerifyOp::create(&mut verify_input, &mut plain),
            };
            verify.execute(&mut ffi).unwrap();
            let sig = verify.get_signature_at(0).unwrap();
            assert_eq!(sig.get_times(), (created, expires), "{}", mode);
            assert_eq!(sig.status(), SignatureStatus::Valid, "{}", mode);
        }
    }

    #[test]
    fn test_expired_attached_signature() {
        let (mut ffi, mut key) = context_with_key("Pia <pia@example.com>");
        let mut input = Input::from_memory(b"stale".to_vec());
        let mut output = Output::to_memory();
        let mut op = SignOp::create(&mut input, &mut output);
        op.set_creation_time(now() - 7200);
        op.set_expiration_time(60);
        op.add_signature(&mut ffi, &mut key).unwrap();
        op.execute(&mut ffi).unwrap();
        drop(op);

        let (sigs, _, _) = verify_attached(&mut ffi, output.memory_get_buf(false).unwrap());
        assert_eq!(sigs[0].status(), SignatureStatus::Expired);
        assert!(matches!(sigs[0].get_status(), Err(Error::SignatureExpired)));
    }

    #[test]
    fn test_tampered_data_is_invalid() {
        let (mut ffi, mut key) = context_with_key("Lee <lee@example.com>");
        let mut input = Input::from_memory(b"abc".to_vec());
        let mut signature = Output::to_memory();
        let mut op = SignOp::detached_create(&mut input, &mut signature);
        op.add_signature(&mut ffi, &mut key).unwrap();
        op.execute(&mut ffi).unwrap();
        drop(op);

        let mut data = Input::from_memory(b"abd".to_vec());
        let mut sig_input = Input::from_memory(signature.memory_get_buf(false).unwrap());
        let mut verify = VerifyOp::detached_create(&mut data, &mut sig_input);
        verify.execute(&mut ffi).unwrap();
        assert_eq!(verify.get_signature_at(0).unwrap().status(), SignatureStatus::Invalid);
    }
}

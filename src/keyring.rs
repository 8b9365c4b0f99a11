//! Keyring persistence, import and export.
//!
//! Loading reads a whole keyring into the context's stores; saving writes
//! the stores back out. Import merges keys into the stores and reports what
//! changed for each key record.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use crate::armor::{armor_bytes, ArmorType};
use crate::decrypt::scan_packets;
use crate::error::{Error, Result};
use crate::ffi::Ffi;
use crate::handle::KeyHandle;
use crate::internal::{dearmor_if_needed, is_revocation, now_secs, signature_issuer};
use crate::io::{Input, Output};
use crate::key::{assemble_public, assemble_secret, with_public, Grip, Key};
use crate::keystore::{
    load_g10_dir, parse_kbx, parse_transferable, save_g10_dir, write_kbx, write_public,
    write_secret, ImportStatus, KeyStore, ParsedKey, KBX_MAGIC,
};
use crate::locator::KeyLocator;
use crate::types::{ExportFlags, ImportFlags, KeyFormat, LoadFlags};

fn parse_format(name: &str) -> Result<KeyFormat> {
    KeyFormat::from_name(name)
        .ok_or_else(|| Error::BadParameters(format!("unknown keyring format: {}", name)))
}

/// Key records of one transferable key, as (public, secret). Public records
/// of a secret key are derived from it.
fn split_parsed(parsed: &ParsedKey, pub_format: KeyFormat, sec_format: KeyFormat) -> Result<(Vec<Key>, Vec<Key>)> {
    match parsed {
        ParsedKey::Public(key) => Ok((Key::from_signed_public(key, pub_format)?, Vec::new())),
        ParsedKey::Secret(key) => {
            let secret = Key::from_signed_secret(key, sec_format)?;
            let public = secret
                .iter()
                .map(|record| {
                    let mut copy = record.public_copy();
                    copy.format = pub_format;
                    copy
                })
                .collect();
            Ok((public, secret))
        }
    }
}

/// Import outcome of one key record.
#[derive(Debug, Clone)]
pub(crate) struct ImportedRecord {
    pub(crate) fingerprint: String,
    pub(crate) public: ImportStatus,
    pub(crate) secret: ImportStatus,
}

fn record_entry<'r>(report: &'r mut Vec<ImportedRecord>, key: &Key) -> &'r mut ImportedRecord {
    let fingerprint = key.fingerprint_hex();
    match report.iter().position(|r| r.fingerprint == fingerprint) {
        Some(pos) => &mut report[pos],
        None => {
            report.push(ImportedRecord {
                fingerprint,
                public: ImportStatus::None,
                secret: ImportStatus::None,
            });
            let last = report.len() - 1;
            &mut report[last]
        }
    }
}

/// Attach a standalone signature to the record of `grip` in `store`.
fn attach_signature(store: &mut KeyStore, grip: &Grip, sig: &pgp::packet::Signature) -> ImportStatus {
    match store.by_grip_mut(grip) {
        None => ImportStatus::None,
        Some(record) if record.signatures.contains(sig) => ImportStatus::Unchanged,
        Some(record) => {
            record.signatures.push(sig.clone());
            ImportStatus::New
        }
    }
}

impl Ffi {
    /// Load keys from a keyring into the stores.
    ///
    /// # Arguments
    /// * `format` - "GPG", "KBX" or "G10"; G10 input must point at a directory
    /// * `flags` - Which stores receive keys; secret keys also yield public
    ///   records when `public` is set
    ///
    /// # Errors
    /// [`Error::NotImplemented`] when the keys do not fit a store's format.
    pub fn load_keys(&mut self, format: &str, input: &mut Input, flags: LoadFlags) -> Result<()> {
        if flags.is_empty() {
            return Err(Error::BadParameters("no stores selected".to_string()));
        }
        let format = parse_format(format)?;
        if format == KeyFormat::G10 {
            return self.load_g10(input, flags);
        }

        let data = input.read_all()?;
        let parsed = match format {
            KeyFormat::Kbx => {
                let mut keys = Vec::new();
                for block in parse_kbx(&data)? {
                    keys.extend(parse_transferable(&block)?);
                }
                keys
            }
            _ => parse_transferable(&data)?,
        };

        let mut loaded = 0usize;
        for key in &parsed {
            let (public, secret) = split_parsed(key, KeyFormat::Gpg, KeyFormat::Gpg)?;
            if flags.public {
                for record in public {
                    self.pubring.merge_key(record)?;
                    loaded += 1;
                }
            }
            if flags.secret {
                for record in secret {
                    self.secring.merge_key(record)?;
                    loaded += 1;
                }
            }
        }
        self.log_line(format!("loaded {} key records from {} keyring", loaded, format));
        Ok(())
    }

    fn load_g10(&mut self, input: &mut Input, flags: LoadFlags) -> Result<()> {
        if !flags.secret {
            return Err(Error::BadParameters("G10 directories hold secret keys only".to_string()));
        }
        let dir = input
            .dir_path()
            .ok_or_else(|| Error::BadParameters("G10 keys are loaded from a directory".to_string()))?
            .to_path_buf();
        let mut loaded = 0usize;
        for (grip, secret) in load_g10_dir(&dir)? {
            let record = Key::from_secret_part(KeyFormat::G10, secret, self.pubring.by_grip(&grip))?;
            self.secring.merge_key(record)?;
            loaded += 1;
        }
        self.secring.set_path(Some(dir));
        self.log_line(format!("loaded {} G10 secret keys", loaded));
        Ok(())
    }

    /// Write the selected stores in `format`.
    ///
    /// GPG output holds the public keyring followed by the secret one. KBX
    /// holds public keys only. G10 writes one file per secret key into the
    /// directory the output points at.
    pub fn save_keys(&mut self, format: &str, output: &mut Output, flags: LoadFlags) -> Result<()> {
        if flags.is_empty() {
            return Err(Error::BadParameters("no stores selected".to_string()));
        }
        let format = parse_format(format)?;
        if format == KeyFormat::G10 {
            return self.save_g10(output, flags);
        }
        if format == KeyFormat::Kbx && flags.secret {
            return Err(Error::BadParameters("KBX keyrings hold public keys only".to_string()));
        }

        match self.serialize_stores(format, flags) {
            Ok(data) => {
                output.write(&data);
                output.finish(true)?;
                self.log_line(format!("saved keys in {} format", format));
                Ok(())
            }
            Err(e) => {
                output.finish(false)?;
                Err(e)
            }
        }
    }

    fn serialize_stores(&self, format: KeyFormat, flags: LoadFlags) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        if flags.public {
            check_store_format(&self.pubring, format)?;
            let keys = self
                .pubring
                .primaries()
                .map(|primary| assemble_public(primary, &self.pubring.subkeys_of(primary)))
                .collect::<Result<Vec<_>>>()?;
            data.extend(match format {
                KeyFormat::Kbx => write_kbx(&keys, now_secs())?,
                _ => write_public(&keys)?,
            });
        }
        if flags.secret {
            check_store_format(&self.secring, format)?;
            let mut keys = Vec::new();
            for primary in self.secring.primaries() {
                match assemble_secret(primary, &self.secring.subkeys_of(primary)) {
                    Ok(key) => keys.push(key),
                    Err(_) => log::warn!("skipping key {} without primary secret", primary.grip()),
                }
            }
            data.extend(write_secret(&keys)?);
        }
        Ok(data)
    }

    fn save_g10(&mut self, output: &mut Output, flags: LoadFlags) -> Result<()> {
        if flags.public {
            return Err(Error::BadParameters("G10 directories hold secret keys only".to_string()));
        }
        let dir = output
            .path()
            .ok_or_else(|| Error::BadParameters("G10 keys are saved to a directory".to_string()))?
            .to_path_buf();
        check_store_format(&self.secring, KeyFormat::G10)?;
        save_g10_dir(&dir, self.secring.iter())?;
        self.log_line(format!("saved {} G10 secret keys", self.secring.len()));
        Ok(())
    }

    /// Drop every key from the selected stores.
    pub fn unload_keys(&mut self, flags: LoadFlags) -> Result<()> {
        if flags.is_empty() {
            return Err(Error::BadParameters("no stores selected".to_string()));
        }
        if flags.public {
            self.pubring.clear();
        }
        if flags.secret {
            self.secring.clear();
        }
        Ok(())
    }

    /// Merge transferable keys into the stores, reporting each record.
    pub(crate) fn import_data(&mut self, data: &[u8], flags: ImportFlags) -> Result<Vec<ImportedRecord>> {
        if !flags.public && !flags.secret {
            return Err(Error::BadParameters("neither public nor secret keys selected".to_string()));
        }
        let parsed = match parse_transferable(data) {
            Ok(keys) => keys,
            Err(e) if flags.permissive => {
                log::warn!("nothing importable: {}", e);
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        if parsed.is_empty() && !flags.permissive {
            return Err(Error::BadFormat("no keys found".to_string()));
        }
        let take = if flags.single { 1 } else { parsed.len() };

        let pub_format = self.pubring.format().key_format();
        let sec_format = self.secring.format().key_format();
        let mut report = Vec::new();
        for key in parsed.iter().take(take) {
            let (public, secret) = split_parsed(key, pub_format, sec_format)?;
            if flags.public {
                for record in public {
                    let entry = record_entry(&mut report, &record);
                    let (_, status) = self.pubring.merge_key(record)?;
                    entry.public = entry.public.merge(status);
                }
            }
            if flags.secret {
                for record in secret {
                    let entry = record_entry(&mut report, &record);
                    let (_, status) = self.secring.merge_key(record)?;
                    entry.secret = entry.secret.merge(status);
                }
            }
        }
        Ok(report)
    }

    /// Import keys and return a JSON report:
    /// `{"keys": [{"public": S, "secret": S, "fingerprint": HEX}]}`, where S
    /// is "new", "updated", "unchanged" or "none".
    pub fn import_keys(&mut self, input: &mut Input, flags: ImportFlags) -> Result<String> {
        let data = input.read_all()?;
        let report = self.import_data(&data, flags)?;
        let keys: Vec<Value> = report
            .iter()
            .map(|r| {
                json!({
                    "public": r.public.as_str(),
                    "secret": r.secret.as_str(),
                    "fingerprint": r.fingerprint,
                })
            })
            .collect();
        self.log_line(format!("imported {} key records", keys.len()));
        Ok(serde_json::to_string_pretty(&json!({ "keys": keys }))?)
    }

    /// Import standalone key revocation or direct-key signatures onto known
    /// keys. Returns `{"sigs": [{"public": S, "secret": S,
    /// "signer fingerprint": HEX}]}`; S is "unknown" for an unknown signer.
    pub fn import_signatures(&mut self, input: &mut Input) -> Result<String> {
        let data = dearmor_if_needed(&input.read_all()?)?;
        let sigs = scan_packets(&data).signatures;
        if sigs.is_empty() {
            return Err(Error::BadFormat("no signatures found".to_string()));
        }

        let mut entries = Vec::with_capacity(sigs.len());
        for sig in &sigs {
            let signer = signature_issuer(sig).and_then(|keyid| {
                let locator = KeyLocator::KeyId(keyid);
                self.pubring
                    .search(&locator)
                    .or_else(|| self.secring.search(&locator))
                    .filter(|key| key.is_primary())
                    .map(|key| (key.grip(), key.fingerprint_hex(), key.public.clone()))
            });
            let Some((grip, fingerprint, public)) = signer else {
                entries.push(json!({ "public": "unknown", "secret": "unknown" }));
                continue;
            };

            let valid = with_public!(&public, k => sig.verify_key(k).is_ok());
            let applicable = is_revocation(sig) || sig.typ() == Some(pgp::packet::SignatureType::Key);
            let (public_status, secret_status) = if valid && applicable {
                (
                    attach_signature(&mut self.pubring, &grip, sig),
                    attach_signature(&mut self.secring, &grip, sig),
                )
            } else {
                log::warn!("ignoring signature that does not apply to key {}", grip);
                (ImportStatus::None, ImportStatus::None)
            };
            entries.push(json!({
                "public": public_status.as_str(),
                "secret": secret_status.as_str(),
                "signer fingerprint": fingerprint,
            }));
        }
        self.log_line(format!("imported {} signatures", entries.len()));
        Ok(serde_json::to_string_pretty(&json!({ "sigs": entries }))?)
    }
}

fn check_store_format(store: &KeyStore, format: KeyFormat) -> Result<()> {
    match store.iter().find(|key| !format.accepts(key.format)) {
        Some(key) => Err(Error::NotImplemented(format!(
            "cannot write {} key {} as {}",
            key.format,
            key.grip(),
            format
        ))),
        None => Ok(()),
    }
}

impl KeyHandle {
    /// Export the key as a transferable key.
    ///
    /// A primary is written alone or, with `subkeys`, with all of its
    /// subkeys. A subkey is written after its primary, without siblings.
    ///
    /// # Errors
    /// [`Error::BadParameters`] unless exactly one of `public` and `secret`
    /// is set, or when `subkeys` is set for a subkey.
    pub fn export(&mut self, ffi: &mut Ffi, output: &mut Output, flags: ExportFlags) -> Result<()> {
        if flags.public == flags.secret {
            return Err(Error::BadParameters(
                "exactly one of public or secret must be exported".to_string(),
            ));
        }
        let id = if flags.secret {
            self.require_secret(ffi)?
        } else {
            self.require_public(ffi)?
        };

        let result = {
            let store = ffi.store(flags.secret);
            let key = store.get(id).ok_or(Error::KeyNotFound)?;
            let selection = if key.is_primary() {
                let subkeys = if flags.subkeys { store.subkeys_of(key) } else { Vec::new() };
                Ok((key, subkeys))
            } else if flags.subkeys {
                Err(Error::BadParameters("subkeys are exported with a primary key".to_string()))
            } else {
                store
                    .primary_of(key)
                    .map(|primary| (primary, vec![key]))
                    .ok_or(Error::KeyNotFound)
            };
            selection.and_then(|(primary, subkeys)| {
                if flags.secret {
                    Ok((write_secret(&[assemble_secret(primary, &subkeys)?])?, ArmorType::SecretKey))
                } else {
                    Ok((write_public(&[assemble_public(primary, &subkeys)?])?, ArmorType::PublicKey))
                }
            })
        };

        match result {
            Ok((packets, kind)) => {
                let data = if flags.armored {
                    armor_bytes(&packets, kind)?
                } else {
                    packets
                };
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

/// Keyring layout found in a home directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomedirInfo {
    pub pub_format: &'static str,
    pub pub_path: PathBuf,
    pub sec_format: &'static str,
    pub sec_path: PathBuf,
}

/// Guess the keyring formats of a GnuPG-style home directory.
///
/// `pubring.kbx` with `private-keys-v1.d/` is KBX with G10 secret keys;
/// `pubring.gpg` with `secring.gpg` is GPG for both. Anything else yields
/// `None`.
pub fn detect_homedir_info(homedir: impl AsRef<Path>) -> Result<Option<HomedirInfo>> {
    let home = homedir.as_ref();
    if !home.is_dir() {
        return Err(Error::Access(format!("{} is not a directory", home.display())));
    }

    let kbx = home.join("pubring.kbx");
    let g10 = home.join("private-keys-v1.d");
    if kbx.is_file() && g10.is_dir() {
        return Ok(Some(HomedirInfo {
            pub_format: "KBX",
            pub_path: kbx,
            sec_format: "G10",
            sec_path: g10,
        }));
    }

    let pubring = home.join("pubring.gpg");
    let secring = home.join("secring.gpg");
    if pubring.is_file() && secring.is_file() {
        return Ok(Some(HomedirInfo {
            pub_format: "GPG",
            pub_path: pubring,
            sec_format: "GPG",
            sec_path: secring,
        }));
    }
    Ok(None)
}

/// Guess the keyring format of raw data: "GPG", "KBX", "G10" or `None`.
pub fn detect_key_format(data: &[u8]) -> Result<Option<&'static str>> {
    let Some(first) = data.first() else {
        return Err(Error::BadParameters("empty data".to_string()));
    };
    if data.len() >= 12 && &data[8..12] == KBX_MAGIC {
        return Ok(Some("KBX"));
    }
    if data.starts_with(b"-----BEGIN PGP") {
        return Ok(Some("GPG"));
    }
    if *first == b'(' {
        return Ok(Some("G10"));
    }
    if first & 0x80 != 0 {
        return Ok(Some("GPG"));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============================================================
    // Format detection
    // ============================================================

    mod detect {
        use super::*;

        #[test]
        fn test_detect_key_format() {
            let mut kbx = vec![0u8; 32];
            kbx[8..12].copy_from_slice(b"KBXf");
            assert_eq!(detect_key_format(&kbx).unwrap(), Some("KBX"));
            assert_eq!(detect_key_format(b"-----BEGIN PGP PUBLIC KEY BLOCK-----").unwrap(), Some("GPG"));
            assert_eq!(detect_key_format(b"(21:protected-private-key").unwrap(), Some("G10"));
            assert_eq!(detect_key_format(&[0x99, 0x01, 0x0d]).unwrap(), Some("GPG"));
            assert_eq!(detect_key_format(b"hello").unwrap(), None);
            assert!(detect_key_format(&[]).is_err());
        }

        #[test]
        fn test_detect_homedir_info() {
            let dir = tempfile::tempdir().unwrap();
            assert_eq!(detect_homedir_info(dir.path()).unwrap(), None);

            std::fs::write(dir.path().join("pubring.gpg"), b"").unwrap();
            std::fs::write(dir.path().join("secring.gpg"), b"").unwrap();
            let info = detect_homedir_info(dir.path()).unwrap().unwrap();
            assert_eq!(info.pub_format, "GPG");
            assert_eq!(info.sec_format, "GPG");

            std::fs::write(dir.path().join("pubring.kbx"), b"").unwrap();
            std::fs::create_dir(dir.path().join("private-keys-v1.d")).unwrap();
            let info = detect_homedir_info(dir.path()).unwrap().unwrap();
            assert_eq!(info.pub_format, "KBX");
            assert_eq!(info.sec_format, "G10");
            assert!(info.sec_path.ends_with("private-keys-v1.d"));
        }

        #[test]
        fn test_detect_homedir_missing() {
            assert!(detect_homedir_info("/nonexistent/rnpcore/home").is_err());
        }
    }

    // ============================================================
    // Load, save and import
    // ============================================================

    mod persistence {
        use super::*;

        fn ffi_with_key() -> Ffi {
            let mut ffi = Ffi::new("GPG", "GPG").unwrap();
            ffi.generate_key_25519("keyring <keyring@example.com>", None).unwrap();
            ffi
        }

        #[test]
        fn test_flags_required() {
            let mut ffi = Ffi::new("GPG", "GPG").unwrap();
            let mut input = Input::from_memory(Vec::new());
            assert!(ffi.load_keys("GPG", &mut input, LoadFlags::default()).is_err());
            assert!(ffi.unload_keys(LoadFlags::default()).is_err());
            assert!(ffi.load_keys("PGP", &mut input, LoadFlags::both()).is_err());
        }

        #[test]
        fn test_save_and_reload_gpg() {
            let mut ffi = ffi_with_key();
            let mut output = Output::to_memory();
            ffi.save_keys("GPG", &mut output, LoadFlags::both()).unwrap();
            let data = output.memory_get_buf(false).unwrap();

            let mut other = Ffi::new("GPG", "GPG").unwrap();
            let mut input = Input::from_memory(data);
            other.load_keys("GPG", &mut input, LoadFlags::both()).unwrap();
            assert_eq!(other.get_public_key_count(), ffi.get_public_key_count());
            assert_eq!(other.get_secret_key_count(), ffi.get_secret_key_count());
        }

        #[test]
        fn test_save_and_reload_kbx() {
            let mut ffi = ffi_with_key();
            let mut output = Output::to_memory();
            let secret_only = LoadFlags { public: false, secret: true };
            assert!(ffi.save_keys("KBX", &mut output, secret_only).is_err());

            let public_only = LoadFlags { public: true, secret: false };
            ffi.save_keys("KBX", &mut output, public_only).unwrap();
            let data = output.memory_get_buf(false).unwrap();
            assert_eq!(detect_key_format(&data).unwrap(), Some("KBX"));

            let mut other = Ffi::new("KBX", "G10").unwrap();
            let mut input = Input::from_memory(data);
            other.load_keys("KBX", &mut input, public_only).unwrap();
            assert_eq!(other.get_public_key_count(), 2);
        }

        #[test]
        fn test_gpg_secret_keys_do_not_fit_g10_store() {
            let mut ffi = ffi_with_key();
            let mut output = Output::to_memory();
            let secret_only = LoadFlags { public: false, secret: true };
            ffi.save_keys("GPG", &mut output, secret_only).unwrap();

            let mut other = Ffi::new("KBX", "G10").unwrap();
            let mut input = Input::from_memory(output.memory_get_buf(false).unwrap());
            assert!(matches!(
                other.load_keys("GPG", &mut input, secret_only),
                Err(Error::NotImplemented(_))
            ));
        }

        #[test]
        fn test_import_report() {
            let mut ffi = ffi_with_key();
            let mut output = Output::to_memory();
            let public_only = LoadFlags { public: true, secret: false };
            ffi.save_keys("GPG", &mut output, public_only).unwrap();
            let data = output.memory_get_buf(false).unwrap();

            let mut other = Ffi::new("GPG", "GPG").unwrap();
            let flags = ImportFlags { public: true, secret: true, ..Default::default() };
            let report = other.import_keys(&mut Input::from_memory(data.clone()), flags).unwrap();
            let value: Value = serde_json::from_str(&report).unwrap();
            let keys = value["keys"].as_array().unwrap();
            assert_eq!(keys.len(), 2);
            assert_eq!(keys[0]["public"], "new");
            assert_eq!(keys[0]["secret"], "none");

            let report = other.import_keys(&mut Input::from_memory(data), flags).unwrap();
            let value: Value = serde_json::from_str(&report).unwrap();
            assert_eq!(value["keys"][0]["public"], "unchanged");
        }

        #[test]
        fn test_import_garbage() {
            let mut ffi = Ffi::new("GPG", "GPG").unwrap();
            let flags = ImportFlags { public: true, ..Default::default() };
            assert!(ffi.import_keys(&mut Input::from_memory(b"garbage".to_vec()), flags).is_err());
            let permissive = ImportFlags { permissive: true, ..flags };
            let report = ffi
                .import_keys(&mut Input::from_memory(b"garbage".to_vec()), permissive)
                .unwrap();
            assert!(report.contains("\"keys\": []"));
        }

        #[test]
        fn test_export_flags() {
            let mut ffi = ffi_with_key();
            let mut key = ffi.locate_key("userid", "keyring").unwrap().unwrap();
            let mut output = Output::to_memory();
            let both = ExportFlags { public: true, secret: true, ..Default::default() };
            assert!(key.export(&mut ffi, &mut output, both).is_err());

            let armored = ExportFlags { public: true, subkeys: true, armored: true, ..Default::default() };
            key.export(&mut ffi, &mut output, armored).unwrap();
            let text = output.memory_get_buf(false).unwrap();
            assert!(text.starts_with(b"-----BEGIN PGP PUBLIC KEY BLOCK-----"));
        }
    }
}

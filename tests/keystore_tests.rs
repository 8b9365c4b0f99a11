//! Keyring persistence, import and key provider tests.

use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;

use rnpcore::{
    detect_homedir_info, detect_key_format, Error, ExportFlags, Ffi, ImportFlags, Input, KeyHandle,
    KeyLocator, LoadFlags, Output, RemoveFlags,
};

const PUBLIC: LoadFlags = LoadFlags { public: true, secret: false };
const SECRET: LoadFlags = LoadFlags { public: false, secret: true };

fn create_test_key(ffi: &mut Ffi, uid: &str) -> KeyHandle {
    ffi.generate_key_25519(uid, None).unwrap()
}

fn save(ffi: &mut Ffi, format: &str, path: &Path, flags: LoadFlags) {
    let mut output = Output::to_path(path, true).unwrap();
    ffi.save_keys(format, &mut output, flags).unwrap();
}

fn load(ffi: &mut Ffi, format: &str, path: &Path, flags: LoadFlags) {
    let mut input = Input::from_path(path).unwrap();
    ffi.load_keys(format, &mut input, flags).unwrap();
}

#[test]
fn test_gnupg_homedir_round_trip() {
    let home = tempfile::tempdir().unwrap();
    let grip = {
        let mut ffi = Ffi::new("KBX", "G10").unwrap();
        let key = create_test_key(&mut ffi, "Keybox <kbx@example.com>");
        save(&mut ffi, "KBX", &home.path().join("pubring.kbx"), PUBLIC);
        save(&mut ffi, "G10", &home.path().join("private-keys-v1.d"), SECRET);
        key.get_grip(&ffi).unwrap()
    };

    let info = detect_homedir_info(home.path()).unwrap().unwrap();
    assert_eq!(info.pub_format, "KBX");
    assert_eq!(info.sec_format, "G10");
    let kbx = std::fs::read(&info.pub_path).unwrap();
    assert_eq!(detect_key_format(&kbx).unwrap(), Some("KBX"));

    let mut ffi = Ffi::new(info.pub_format, info.sec_format).unwrap();
    load(&mut ffi, info.pub_format, &info.pub_path, PUBLIC);
    load(&mut ffi, info.sec_format, &info.sec_path, SECRET);
    assert_eq!(ffi.get_public_key_count(), 2);
    assert_eq!(ffi.get_secret_key_count(), 2);

    let key = ffi.locate_key("grip", &grip).unwrap().unwrap();
    assert!(key.have_public(&ffi));
    assert!(key.have_secret(&ffi));
    assert_eq!(key.get_primary_uid(&ffi).unwrap(), "Keybox <kbx@example.com>");
}

#[test]
fn test_g10_refuses_public_keys() {
    let dir = tempfile::tempdir().unwrap();
    let mut ffi = Ffi::new("KBX", "G10").unwrap();
    create_test_key(&mut ffi, "g10 <g10@example.com>");
    let mut output = Output::to_path(dir.path().join("private-keys-v1.d"), true).unwrap();
    assert!(matches!(
        ffi.save_keys("G10", &mut output, PUBLIC),
        Err(Error::BadParameters(_))
    ));
    let mut input = Input::from_path(dir.path()).unwrap();
    assert!(matches!(
        ffi.load_keys("G10", &mut input, PUBLIC),
        Err(Error::BadParameters(_))
    ));
}

#[test]
fn test_cross_format_save_is_not_implemented() {
    let dir = tempfile::tempdir().unwrap();
    let mut ffi = Ffi::new("GPG", "GPG").unwrap();
    create_test_key(&mut ffi, "gpg <gpg@example.com>");
    let mut output = Output::to_path(dir.path().join("private-keys-v1.d"), true).unwrap();
    assert!(matches!(
        ffi.save_keys("G10", &mut output, SECRET),
        Err(Error::NotImplemented(_))
    ));
}

#[test]
fn test_unload_keys() {
    let mut ffi = Ffi::new("GPG", "GPG").unwrap();
    create_test_key(&mut ffi, "unload <unload@example.com>");
    ffi.unload_keys(SECRET).unwrap();
    assert_eq!(ffi.get_secret_key_count(), 0);
    assert_eq!(ffi.get_public_key_count(), 2);
    ffi.unload_keys(LoadFlags::both()).unwrap();
    assert_eq!(ffi.get_public_key_count(), 0);
}

#[test]
fn test_export_subkey_with_its_primary() {
    let mut ffi = Ffi::new("GPG", "GPG").unwrap();
    let key = create_test_key(&mut ffi, "export <export@example.com>");
    let mut sub = key.get_subkey_at(&mut ffi, 0).unwrap();

    let mut output = Output::to_memory();
    let flags = ExportFlags { public: true, ..Default::default() };
    sub.export(&mut ffi, &mut output, flags).unwrap();
    let exported = output.memory_get_buf(false).unwrap();

    let with_subkeys = ExportFlags { subkeys: true, ..flags };
    assert!(matches!(
        sub.export(&mut ffi, &mut output, with_subkeys),
        Err(Error::BadParameters(_))
    ));

    let mut other = Ffi::new("GPG", "GPG").unwrap();
    let report = other
        .import_keys(
            &mut Input::from_memory(exported),
            ImportFlags { public: true, ..Default::default() },
        )
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&report).unwrap();
    assert_eq!(value["keys"].as_array().unwrap().len(), 2);
    assert_eq!(other.get_secret_key_count(), 0);
}

#[test]
fn test_import_single_key() {
    let mut ffi = Ffi::new("GPG", "GPG").unwrap();
    create_test_key(&mut ffi, "first <first@example.com>");
    create_test_key(&mut ffi, "second <second@example.com>");
    let mut output = Output::to_memory();
    ffi.save_keys("GPG", &mut output, PUBLIC).unwrap();
    let data = output.memory_get_buf(false).unwrap();

    let mut other = Ffi::new("GPG", "GPG").unwrap();
    let flags = ImportFlags { public: true, single: true, ..Default::default() };
    other.import_keys(&mut Input::from_memory(data), flags).unwrap();
    assert_eq!(other.get_public_key_count(), 2);
    assert!(other.locate_key("userid", "first").unwrap().is_some());
    assert!(other.locate_key("userid", "second").unwrap().is_none());
}

#[test]
fn test_remove_key_with_subkeys() {
    let mut ffi = Ffi::new("GPG", "GPG").unwrap();
    let mut key = create_test_key(&mut ffi, "remove <remove@example.com>");
    assert!(key.remove(&mut ffi, RemoveFlags::default()).is_err());

    let flags = RemoveFlags { secret: true, subkeys: true, ..Default::default() };
    key.remove(&mut ffi, flags).unwrap();
    assert_eq!(ffi.get_secret_key_count(), 0);
    assert_eq!(ffi.get_public_key_count(), 2);
}

#[test]
fn test_identifier_iterator() {
    let mut ffi = Ffi::new("GPG", "GPG").unwrap();
    create_test_key(&mut ffi, "one <one@example.com>");
    create_test_key(&mut ffi, "two <two@example.com>");

    let uids: Vec<String> = ffi.identifier_iterator_create("userid").unwrap().collect();
    assert_eq!(uids, vec!["one <one@example.com>", "two <two@example.com>"]);
    // public and secret records share grips, each is reported once
    let grips: Vec<String> = ffi.identifier_iterator_create("grip").unwrap().collect();
    assert_eq!(grips.len(), 4);
    assert!(grips.iter().all(|g| g.len() == 40 && g.to_uppercase() == *g));
    assert!(ffi.identifier_iterator_create("email").is_err());
}

#[test]
fn test_key_provider_is_asked_once() {
    let mut source = Ffi::new("GPG", "GPG").unwrap();
    let key = create_test_key(&mut source, "remote <remote@example.com>");
    let fpr = key.get_fprint(&source).unwrap();
    let mut output = Output::to_memory();
    source.save_keys("GPG", &mut output, PUBLIC).unwrap();
    let published = output.memory_get_buf(false).unwrap();

    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let mut ffi = Ffi::new("GPG", "GPG").unwrap();
    ffi.set_key_provider(move |locator: &KeyLocator, secret: bool| {
        counter.set(counter.get() + 1);
        (!secret && locator.type_name() == "fingerprint").then(|| published.clone())
    });

    let found = ffi.locate_key("fingerprint", &fpr).unwrap().unwrap();
    assert!(found.have_public(&ffi));
    assert!(!found.have_secret(&ffi));
    assert!(calls.get() >= 1);

    let before = calls.get();
    assert!(ffi.locate_key("userid", "nobody").unwrap().is_none());
    assert!(calls.get() > before);
}

//! The engine context.
//!
//! An [`Ffi`] owns one public and one secret [`KeyStore`], the password and
//! key providers and an optional log sink. Everything else (key handles,
//! operations) borrows from it or refers into it by [`KeyRef`].

use std::collections::HashSet;
use std::fmt;
use std::io::Write;
use std::time::Instant;

use pgp::crypto::hash::HashAlgorithm;
use secrecy::{ExposeSecret, SecretString};

use crate::error::{Error, Result};
use crate::handle::KeyHandle;
use crate::key::{s2k_count_decode, s2k_count_encode, Key, KeyRef};
use crate::keystore::KeyStore;
use crate::locator::KeyLocator;
use crate::provider::{KeyProvider, PasswordProvider};
use crate::types::{feature_names, hash_from_name, ImportFlags, KeyFormat};

/// Milliseconds `calculate_iterations` targets when asked for 0.
const DEFAULT_S2K_MSEC: usize = 150;
/// Length of the hashing trial run.
const S2K_TRIAL_MSEC: u128 = 10;
/// Lower bound for computed iteration counts.
const MIN_S2K_ITERATIONS: usize = 65_536;

/// Engine context owning both key stores and the providers.
pub struct Ffi {
    pub(crate) pubring: KeyStore,
    pub(crate) secring: KeyStore,
    password_provider: Option<Box<dyn PasswordProvider>>,
    key_provider: Option<Box<dyn KeyProvider>>,
    log_sink: Option<Box<dyn Write>>,
}

impl fmt::Debug for Ffi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ffi")
            .field("pubring", &self.pubring.format())
            .field("public_keys", &self.pubring.len())
            .field("secring", &self.secring.format())
            .field("secret_keys", &self.secring.len())
            .field("password_provider", &self.password_provider.is_some())
            .field("key_provider", &self.key_provider.is_some())
            .finish()
    }
}

impl Ffi {
    /// Create a context with empty stores.
    ///
    /// # Arguments
    /// * `pub_format` - Public store format: "GPG" or "KBX"
    /// * `sec_format` - Secret store format: "GPG" or "G10"
    ///
    /// # Example
    ///
    /// ```
    /// use rnpcore::Ffi;
    ///
    /// let ffi = Ffi::new("GPG", "GPG").unwrap();
    /// assert_eq!(ffi.get_public_key_count(), 0);
    /// assert!(Ffi::new("PGP", "GPG").is_err());
    /// ```
    pub fn new(pub_format: &str, sec_format: &str) -> Result<Self> {
        let pub_fmt = KeyFormat::from_name(pub_format)
            .ok_or_else(|| Error::BadParameters(format!("unknown keyring format: {}", pub_format)))?;
        let sec_fmt = KeyFormat::from_name(sec_format)
            .ok_or_else(|| Error::BadParameters(format!("unknown keyring format: {}", sec_format)))?;
        log::debug!("created context with {} public and {} secret stores", pub_fmt, sec_fmt);
        Ok(Self {
            pubring: KeyStore::new(pub_fmt),
            secring: KeyStore::new(sec_fmt),
            password_provider: None,
            key_provider: None,
            log_sink: None,
        })
    }

    pub fn pubring(&self) -> &KeyStore {
        &self.pubring
    }

    pub fn secring(&self) -> &KeyStore {
        &self.secring
    }

    pub(crate) fn store(&self, secret: bool) -> &KeyStore {
        if secret {
            &self.secring
        } else {
            &self.pubring
        }
    }

    pub(crate) fn store_mut(&mut self, secret: bool) -> &mut KeyStore {
        if secret {
            &mut self.secring
        } else {
            &mut self.pubring
        }
    }

    /// Number of public key records, subkeys included.
    pub fn get_public_key_count(&self) -> usize {
        self.pubring.len()
    }

    /// Number of secret key records, subkeys included.
    pub fn get_secret_key_count(&self) -> usize {
        self.secring.len()
    }

    /// Send operation diagnostics to `sink` in addition to the `log` facade.
    pub fn set_log_sink(&mut self, sink: impl Write + 'static) {
        self.log_sink = Some(Box::new(sink));
    }

    pub fn clear_log_sink(&mut self) {
        self.log_sink = None;
    }

    /// Write one diagnostic line.
    pub(crate) fn log_line(&mut self, message: impl fmt::Display) {
        log::debug!("{}", message);
        if let Some(sink) = self.log_sink.as_mut() {
            // diagnostics must never fail the operation
            let _ = writeln!(sink, "{}", message);
        }
    }

    pub fn set_password_provider(&mut self, provider: impl PasswordProvider + 'static) {
        self.password_provider = Some(Box::new(provider));
    }

    pub fn clear_password_provider(&mut self) {
        self.password_provider = None;
    }

    pub fn set_key_provider(&mut self, provider: impl KeyProvider + 'static) {
        self.key_provider = Some(Box::new(provider));
    }

    pub fn clear_key_provider(&mut self) {
        self.key_provider = None;
    }

    /// A key record from either store.
    pub(crate) fn key(&self, id: KeyRef) -> Option<&Key> {
        self.pubring.get(id).or_else(|| self.secring.get(id))
    }

    /// Ask the password provider. Declined and empty answers are `None`.
    pub(crate) fn ask_password(&mut self, key: Option<KeyRef>, context: &str) -> Option<SecretString> {
        let key = key.and_then(|id| self.key(id)).cloned();
        let provider = self.password_provider.as_mut()?;
        log::debug!(
            "requesting password for {} ({})",
            key.as_ref().map(|k| k.keyid_hex()).unwrap_or_else(|| "no key".to_string()),
            context
        );
        provider
            .request_password(key.as_ref(), context)
            .filter(|pw| !pw.expose_secret().is_empty())
    }

    /// Ask the password provider directly.
    ///
    /// # Errors
    /// [`Error::Generic`] if there is no provider or it declines.
    pub fn request_password(&mut self, key: Option<&KeyHandle>, context: &str) -> Result<SecretString> {
        let key = match key {
            Some(handle) => Some(handle.any_key(self)?.id),
            None => None,
        };
        self.ask_password(key, context)
            .ok_or_else(|| Error::Generic("password was not provided".to_string()))
    }

    /// Search one store, falling back to the key provider once.
    pub(crate) fn find_key(&mut self, locator: &KeyLocator, secret: bool, try_provider: bool) -> Option<KeyRef> {
        if let Some(key) = self.store(secret).search(locator) {
            return Some(key.id);
        }
        if !try_provider {
            return None;
        }

        let mut provider = self.key_provider.take()?;
        log::debug!("requesting {} key {} from key provider", if secret { "secret" } else { "public" }, locator);
        let data = provider.request_key(locator, secret);
        self.key_provider = Some(provider);

        if let Some(data) = data {
            let flags = ImportFlags {
                public: true,
                secret: true,
                permissive: true,
                single: false,
            };
            if let Err(e) = self.import_data(&data, flags) {
                log::warn!("key provider returned unusable data for {}: {}", locator, e);
            }
        }
        self.store(secret).search(locator).map(|k| k.id)
    }

    /// Find a key and return a handle to both of its halves.
    ///
    /// The public store is searched first; the secret half is then picked by
    /// grip so both halves always belong to the same key. Returns `Ok(None)`
    /// when nothing matches, even after asking the key provider.
    pub fn locate_key(&mut self, id_type: &str, identifier: &str) -> Result<Option<KeyHandle>> {
        let locator = KeyLocator::parse(id_type, identifier)?;
        self.locate(&locator)
    }

    pub(crate) fn locate(&mut self, locator: &KeyLocator) -> Result<Option<KeyHandle>> {
        let public = self.find_key(locator, false, true);
        let secret = match public.and_then(|id| self.pubring.get(id)) {
            Some(key) => {
                let grip = key.grip();
                self.secring.by_grip(&grip).map(|k| k.id)
            }
            None => self.find_key(locator, true, true),
        };
        if public.is_none() && secret.is_none() {
            return Ok(None);
        }
        Ok(Some(KeyHandle::new(public, secret, locator.clone())))
    }

    /// Lazily list distinct identifiers of one kind across both stores.
    ///
    /// # Arguments
    /// * `id_type` - "userid", "keyid", "fingerprint" or "grip"
    pub fn identifier_iterator_create(&self, id_type: &str) -> Result<IdentifierIterator<'_>> {
        let kind = match id_type.to_ascii_lowercase().as_str() {
            "userid" => IdentifierKind::UserId,
            "keyid" => IdentifierKind::KeyId,
            "fingerprint" => IdentifierKind::Fingerprint,
            "grip" => IdentifierKind::Grip,
            other => {
                return Err(Error::BadParameters(format!("unknown identifier type: {}", other)))
            }
        };
        Ok(IdentifierIterator {
            ffi: self,
            kind,
            store: 0,
            key: 0,
            uid: 0,
            seen: HashSet::new(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdentifierKind {
    UserId,
    KeyId,
    Fingerprint,
    Grip,
}

/// Identifiers of one kind over the public then the secret store, each
/// reported once.
pub struct IdentifierIterator<'a> {
    ffi: &'a Ffi,
    kind: IdentifierKind,
    store: usize,
    key: usize,
    uid: usize,
    seen: HashSet<String>,
}

impl Iterator for IdentifierIterator<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            let store = match self.store {
                0 => &self.ffi.pubring,
                1 => &self.ffi.secring,
                _ => return None,
            };
            let Some(key) = store.keys.get(self.key) else {
                self.store += 1;
                self.key = 0;
                self.uid = 0;
                continue;
            };

            let item = match self.kind {
                IdentifierKind::UserId => match key.users.get(self.uid) {
                    Some(user) => {
                        self.uid += 1;
                        String::from_utf8_lossy(user.id.id()).to_string()
                    }
                    None => {
                        self.key += 1;
                        self.uid = 0;
                        continue;
                    }
                },
                IdentifierKind::KeyId => {
                    self.key += 1;
                    key.keyid_hex()
                }
                IdentifierKind::Fingerprint => {
                    self.key += 1;
                    key.fingerprint_hex()
                }
                IdentifierKind::Grip => {
                    self.key += 1;
                    key.grip().to_hex()
                }
            };
            if self.seen.insert(item.clone()) {
                return Some(item);
            }
        }
    }
}

/// Version of this engine.
pub fn version_string() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Whether `name` is a supported value of a feature type such as
/// "symmetric algorithm" or "elliptic curve".
pub fn supports_feature(feature: &str, name: &str) -> Result<bool> {
    let names = feature_names(feature)
        .ok_or_else(|| Error::BadParameters(format!("unknown feature type: {}", feature)))?;
    Ok(names.iter().any(|n| n.eq_ignore_ascii_case(name)))
}

/// JSON array of the supported values of a feature type.
pub fn supported_features(feature: &str) -> Result<String> {
    let names = feature_names(feature)
        .ok_or_else(|| Error::BadParameters(format!("unknown feature type: {}", feature)))?;
    Ok(serde_json::to_string(&names)?)
}

/// S2K iteration count that makes key derivation with `hash` take about
/// `msec` milliseconds on this machine (150 when 0 is given).
pub fn calculate_iterations(hash: &str, msec: usize) -> Result<usize> {
    let hash = hash_from_name(hash)
        .ok_or_else(|| Error::BadParameters(format!("unknown hash algorithm: {}", hash)))?;
    let msec = if msec == 0 { DEFAULT_S2K_MSEC } else { msec };

    let bytes_per_ms = hash_throughput(hash)?;
    let wanted = (bytes_per_ms as u128 * msec as u128).min(usize::MAX as u128) as usize;
    let iterations = s2k_count_decode(s2k_count_encode(wanted.max(MIN_S2K_ITERATIONS)));
    log::debug!("{} bytes/ms with {:?}, using {} iterations", bytes_per_ms, hash, iterations);
    Ok(iterations)
}

/// Bytes hashed per millisecond during a short trial run.
fn hash_throughput(hash: HashAlgorithm) -> Result<usize> {
    let chunk = vec![0x55u8; 64 * 1024];
    let start = Instant::now();
    let mut hashed = 0usize;
    while start.elapsed().as_millis() < S2K_TRIAL_MSEC {
        hash.digest(&chunk)
            .map_err(|e| Error::BadParameters(format!("hash {:?} unavailable: {}", hash, e)))?;
        hashed += chunk.len();
    }
    let elapsed = start.elapsed().as_millis().max(1);
    Ok((hashed as u128 / elapsed) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_unknown_format() {
        assert!(Ffi::new("GPG", "G10").is_ok());
        assert!(matches!(Ffi::new("GPG", "XYZ"), Err(Error::BadParameters(_))));
    }

    #[test]
    fn test_supports_feature() {
        assert!(supports_feature("symmetric algorithm", "aes256").unwrap());
        assert!(supports_feature("hash algorithm", "SHA256").unwrap());
        assert!(!supports_feature("hash algorithm", "WHIRLPOOL").unwrap());
        assert!(supports_feature("no such type", "x").is_err());
    }

    #[test]
    fn test_supported_features_is_json() {
        let json = supported_features("aead algorithm").unwrap();
        let names: Vec<String> = serde_json::from_str(&json).unwrap();
        assert_eq!(names, vec!["None", "EAX", "OCB"]);
    }

    #[test]
    fn test_calculate_iterations() {
        let iterations = calculate_iterations("SHA256", 5).unwrap();
        assert!(iterations >= MIN_S2K_ITERATIONS);
        assert_eq!(s2k_count_decode(s2k_count_encode(iterations)), iterations);
        assert!(calculate_iterations("bogus", 5).is_err());
    }

    #[test]
    fn test_identifier_iterator_empty() {
        let ffi = Ffi::new("GPG", "GPG").unwrap();
        assert_eq!(ffi.identifier_iterator_create("keyid").unwrap().count(), 0);
        assert!(ffi.identifier_iterator_create("email").is_err());
    }

    #[test]
    fn test_request_password_without_provider() {
        let mut ffi = Ffi::new("GPG", "GPG").unwrap();
        assert!(ffi.request_password(None, "test").is_err());
        ffi.set_password_provider(|_: Option<&Key>, _: &str| Some("pw".to_string()));
        assert_eq!(ffi.request_password(None, "test").unwrap().expose_secret(), "pw");
    }

    #[test]
    fn test_log_sink_receives_lines() {
        use std::cell::RefCell;
        use std::rc::Rc;

        #[derive(Clone)]
        struct Shared(Rc<RefCell<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.borrow_mut().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let buf = Shared(Rc::new(RefCell::new(Vec::new())));
        let mut ffi = Ffi::new("GPG", "GPG").unwrap();
        ffi.set_log_sink(buf.clone());
        ffi.log_line("hello");
        assert_eq!(&*buf.0.borrow(), b"hello\n");
    }
}

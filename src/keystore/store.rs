//! KeyStore implementation.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::key::{Grip, Key, KeyRef};
use crate::locator::KeyLocator;
use crate::types::KeyFormat;

/// Outcome of merging one key record into a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStatus {
    /// Nothing was offered for this half.
    None,
    New,
    Updated,
    Unchanged,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::None => "none",
            ImportStatus::New => "new",
            ImportStatus::Updated => "updated",
            ImportStatus::Unchanged => "unchanged",
        }
    }

    /// Combine the statuses of several records belonging to one key.
    pub(crate) fn merge(self, other: ImportStatus) -> ImportStatus {
        use ImportStatus::*;
        match (self, other) {
            (New, _) | (_, New) => New,
            (Updated, _) | (_, Updated) => Updated,
            (Unchanged, _) | (_, Unchanged) => Unchanged,
            _ => None,
        }
    }
}

/// Ordered collection of key records.
///
/// The store owns its keys. Records are addressed from outside through
/// their [`KeyRef`], which stays stable for as long as the record lives in
/// the store. Removing a record invalidates every reference to it.
///
/// # Format
///
/// The store format decides which key formats it may hold: GPG and KBX
/// stores hold GPG keys, G10 stores hold G10 keys. Adding a key of the
/// wrong format fails with [`Error::NotImplemented`] since no conversion
/// between the encodings is performed.
#[derive(Debug, Clone)]
pub struct KeyStore {
    pub(crate) format: KeyFormat,
    pub(crate) path: Option<PathBuf>,
    pub(crate) keys: Vec<Key>,
}

impl KeyStore {
    /// Create an empty store of the given format.
    ///
    /// # Example
    ///
    /// ```
    /// use rnpcore::{KeyFormat, KeyStore};
    ///
    /// let store = KeyStore::new(KeyFormat::Kbx);
    /// assert_eq!(store.format(), KeyFormat::Kbx);
    /// assert_eq!(store.len(), 0);
    /// ```
    pub fn new(format: KeyFormat) -> Self {
        Self {
            format,
            path: None,
            keys: Vec::new(),
        }
    }

    pub fn format(&self) -> KeyFormat {
        self.format
    }

    /// Backing path the store was last loaded from or saved to.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub(crate) fn set_path(&mut self, path: Option<PathBuf>) {
        self.path = path;
    }

    /// Number of key records, subkeys included.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Key> {
        self.keys.iter()
    }

    pub(crate) fn get(&self, id: KeyRef) -> Option<&Key> {
        self.keys.iter().find(|k| k.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: KeyRef) -> Option<&mut Key> {
        self.keys.iter_mut().find(|k| k.id == id)
    }

    pub fn by_grip(&self, grip: &Grip) -> Option<&Key> {
        self.keys.iter().find(|k| k.grip == *grip)
    }

    pub(crate) fn by_grip_mut(&mut self, grip: &Grip) -> Option<&mut Key> {
        self.keys.iter_mut().find(|k| k.grip == *grip)
    }

    /// Find the first key matching a locator.
    ///
    /// Key ids, fingerprints and grips match exactly. User ids are matched
    /// as a case-insensitive regular expression against the user ids of
    /// primary keys; subkeys never match by user id.
    pub fn search(&self, locator: &KeyLocator) -> Option<&Key> {
        let matcher = locator.matcher();
        self.keys.iter().find(|k| matcher.matches(k))
    }

    /// The primary record a subkey belongs to, if loaded.
    pub fn primary_of(&self, key: &Key) -> Option<&Key> {
        key.primary_grip.as_ref().and_then(|g| self.by_grip(g))
    }

    /// Loaded subkey records of a primary, in the primary's order.
    pub fn subkeys_of(&self, primary: &Key) -> Vec<&Key> {
        primary
            .subkey_grips
            .iter()
            .filter_map(|g| self.by_grip(g))
            .collect()
    }

    /// Add a key record.
    ///
    /// A record whose grip is already present is ignored and the existing
    /// record's reference is returned. A subkey is linked into its primary's
    /// subkey list when the primary is present; a primary picks up any of
    /// its subkeys that were added before it.
    pub fn add_key(&mut self, key: Key) -> Result<KeyRef> {
        if !self.format.accepts(key.format) {
            return Err(Error::NotImplemented(format!(
                "cannot store a {} key in a {} keyring",
                key.format, self.format
            )));
        }
        if let Some(existing) = self.by_grip(&key.grip) {
            log::debug!("key {} already present, skipping", key.grip);
            return Ok(existing.id);
        }

        let mut key = key;
        if let Some(primary_grip) = key.primary_grip {
            if let Some(primary) = self.by_grip_mut(&primary_grip) {
                if !primary.subkey_grips.contains(&key.grip) {
                    primary.subkey_grips.push(key.grip);
                }
            }
        } else {
            for sub in self
                .keys
                .iter()
                .filter(|k| k.primary_grip == Some(key.grip))
            {
                if !key.subkey_grips.contains(&sub.grip) {
                    key.subkey_grips.push(sub.grip);
                }
            }
        }

        let id = key.id;
        log::debug!("added key {} to {} store", key.grip, self.format);
        self.keys.push(key);
        Ok(id)
    }

    /// Merge a key record into the store.
    ///
    /// New user ids, signatures and subkey links are appended to an existing
    /// record. Missing secret material is taken over, and a cleartext secret
    /// is replaced by a protected one, but a protected secret is never
    /// replaced by a cleartext one.
    pub(crate) fn merge_key(&mut self, key: Key) -> Result<(KeyRef, ImportStatus)> {
        let Some(existing) = self.by_grip_mut(&key.grip) else {
            let id = self.add_key(key)?;
            return Ok((id, ImportStatus::New));
        };

        let mut changed = false;
        for user in key.users {
            match existing.users.iter_mut().find(|u| u.id == user.id) {
                Some(known) => {
                    for sig in user.signatures {
                        if !known.signatures.contains(&sig) {
                            known.signatures.push(sig);
                            changed = true;
                        }
                    }
                }
                None => {
                    existing.users.push(user);
                    changed = true;
                }
            }
        }
        for attr in key.user_attributes {
            if !existing.user_attributes.contains(&attr) {
                existing.user_attributes.push(attr);
                changed = true;
            }
        }
        for sig in key.signatures {
            if !existing.signatures.contains(&sig) {
                existing.signatures.push(sig);
                changed = true;
            }
        }
        for grip in key.subkey_grips {
            if !existing.subkey_grips.contains(&grip) {
                existing.subkey_grips.push(grip);
                changed = true;
            }
        }

        if let Some(secret) = key.secret {
            let replace = match &existing.secret {
                None => true,
                Some(current) => !current.is_protected() && secret.is_protected(),
            };
            if replace {
                existing.secret = Some(secret);
                existing.unlocked = None;
                changed = true;
            }
        }

        let id = existing.id;
        let status = if changed {
            log::debug!("updated key {}", existing.grip);
            ImportStatus::Updated
        } else {
            ImportStatus::Unchanged
        };
        Ok((id, status))
    }

    /// Remove a record. Subkeys of a removed primary stay in the store.
    pub fn remove_key(&mut self, id: KeyRef) -> Option<Key> {
        let pos = self.keys.iter().position(|k| k.id == id)?;
        let key = self.keys.remove(pos);
        if let Some(primary_grip) = key.primary_grip {
            if let Some(primary) = self.by_grip_mut(&primary_grip) {
                primary.subkey_grips.retain(|g| *g != key.grip);
            }
        }
        log::debug!("removed key {} from {} store", key.grip, self.format);
        Some(key)
    }

    /// Drop all records.
    pub fn clear(&mut self) {
        self.keys.clear();
    }

    /// Primary records in insertion order.
    pub(crate) fn primaries(&self) -> impl Iterator<Item = &Key> {
        self.keys.iter().filter(|k| k.is_primary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_status_merge() {
        assert_eq!(ImportStatus::None.merge(ImportStatus::Unchanged), ImportStatus::Unchanged);
        assert_eq!(ImportStatus::Unchanged.merge(ImportStatus::Updated), ImportStatus::Updated);
        assert_eq!(ImportStatus::Updated.merge(ImportStatus::New), ImportStatus::New);
        assert_eq!(ImportStatus::New.as_str(), "new");
    }

    #[test]
    fn test_empty_store() {
        let store = KeyStore::new(KeyFormat::G10);
        assert!(store.is_empty());
        assert!(store.search(&KeyLocator::KeyId([0; 8])).is_none());
        assert!(store.by_grip(&Grip([1; 20])).is_none());
    }
}

//! In-memory key stores and their on-disk encodings.
//!
//! A [`KeyStore`] holds key records of one logical kind (public or secret)
//! in insertion order. Stores are persisted in one of three encodings:
//!
//! - **GPG**: a concatenation of transferable OpenPGP keys, armored or binary
//!   (`pubring.gpg` / `secring.gpg`).
//! - **KBX**: the GnuPG keybox container, a header blob followed by one
//!   OpenPGP blob per transferable key (`pubring.kbx`).
//! - **G10**: one canonical S-expression file per secret key, named after
//!   the key grip (`private-keys-v1.d/<GRIP>.key`).
//!
//! # Basic Usage
//!
//! ```
//! use rnpcore::{KeyFormat, KeyStore};
//!
//! let store = KeyStore::new(KeyFormat::Gpg);
//! assert!(store.is_empty());
//! assert!(store.path().is_none());
//! ```

mod g10;
mod gpg;
mod kbx;
mod store;

pub(crate) use g10::{load_g10_dir, save_g10_dir};
pub(crate) use gpg::{parse_transferable, write_public, write_secret, ParsedKey};
pub(crate) use kbx::{parse_kbx, write_kbx, KBX_MAGIC};
pub use store::*;

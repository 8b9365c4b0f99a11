//! # rnpcore
//!
//! An OpenPGP engine built on [rpgp](https://docs.rs/pgp): key stores in
//! GPG, KBX and G10 formats, key generation and protection, encryption,
//! signing, verification and revocation.
//!
//! Everything hangs off an [`Ffi`] context that owns a public and a secret
//! [`KeyStore`] plus optional password and key providers. Keys are reached
//! through [`KeyHandle`]s; data flows through [`Input`] and [`Output`]
//! endpoints backed by memory, files or callbacks.
//!
//! ## Quick Start
//!
//! ```
//! use rnpcore::*;
//!
//! let mut ffi = Ffi::new("GPG", "GPG").unwrap();
//! let mut key = ffi.generate_key_25519("Alice <alice@example.com>", None).unwrap();
//!
//! // Encrypt a message
//! let mut input = Input::from_memory(b"Hello!".to_vec());
//! let mut output = Output::to_memory();
//! let mut op = EncryptOp::create(&mut input, &mut output);
//! op.add_recipient(&mut ffi, &mut key).unwrap();
//! op.execute(&mut ffi).unwrap();
//! drop(op);
//!
//! // Decrypt it
//! let mut input = Input::from_memory(output.memory_get_buf(false).unwrap());
//! let mut plain = Output::to_memory();
//! decrypt(&mut ffi, &mut input, &mut plain).unwrap();
//! assert_eq!(plain.memory_get_buf(false).unwrap(), b"Hello!");
//! ```
//!
//! ## Result codes
//!
//! Every [`Error`] maps onto the classic numeric result codes through
//! [`Error::code`], and [`result_to_string`] names any code.

// Modules
mod error;
mod types;
mod internal;

mod key;
pub mod keystore;
mod locator;
mod provider;
mod ffi;
mod handle;
mod io;
mod armor;

mod certify;
mod protect;
mod generate;
mod generate_json;

mod op;
mod encrypt;
mod decrypt;
mod sign;
mod verify;
mod revoke;
mod keyring;
mod json;

// Re-export error types
pub use error::{codes, result_to_string, Error, Result};

// Re-export value types and name tables
pub use types::{
    cipher_from_name, cipher_name, compression_from_name, compression_name, hash_from_name,
    hash_name, revocation_code_name, signature_type_name, Aead, Curve, ExportFlags, ImportFlags,
    JsonFlags, KeyFormat, KeyUsage, LoadFlags, ProtectionMode, PublicKeyAlg, RemoveFlags,
    DEFAULT_CIPHER, DEFAULT_HASH, DEFAULT_RSA_BITS, DEFAULT_S2K_ITERATIONS, MAX_USERID_LEN,
};

// Re-export the context and its collaborators
pub use ffi::{
    calculate_iterations, supported_features, supports_feature, version_string, Ffi,
    IdentifierIterator,
};
pub use handle::{KeyHandle, SignatureHandle, UidHandle};
pub use io::{Input, Output};
pub use key::{Grip, Key, KeyRef, ProtectionInfo};
pub use keystore::{ImportStatus, KeyStore};
pub use locator::KeyLocator;
pub use provider::{FixedPassword, KeyProvider, PasswordProvider};

// Re-export operations
pub use armor::{dearmor, enarmor, guess_contents};
pub use decrypt::decrypt;
pub use encrypt::EncryptOp;
pub use generate::GenerateOp;
pub use keyring::{detect_homedir_info, detect_key_format, HomedirInfo};
pub use op::OpSignature;
pub use sign::SignOp;
pub use verify::{SignatureStatus, VerifyOp, VerifySignature};

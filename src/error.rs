//! Error types for the rnpcore engine.
//!
//! Every fallible call returns [`Result`]. Each [`Error`] variant maps onto
//! one of the classic numeric result codes through [`Error::code`], so a
//! thin C shim can hand the code across an FFI boundary unchanged.

use thiserror::Error;

/// Numeric result codes of the classic C API.
pub mod codes {
    pub const SUCCESS: u32 = 0x0000_0000;

    pub const GENERIC: u32 = 0x1000_0000;
    pub const BAD_FORMAT: u32 = 0x1000_0001;
    pub const BAD_PARAMETERS: u32 = 0x1000_0002;
    pub const NOT_IMPLEMENTED: u32 = 0x1000_0003;
    pub const NOT_SUPPORTED: u32 = 0x1000_0004;
    pub const OUT_OF_MEMORY: u32 = 0x1000_0005;
    pub const SHORT_BUFFER: u32 = 0x1000_0006;
    pub const NULL_POINTER: u32 = 0x1000_0007;

    pub const ACCESS: u32 = 0x1100_0000;
    pub const READ: u32 = 0x1100_0001;
    pub const WRITE: u32 = 0x1100_0002;

    pub const BAD_STATE: u32 = 0x1200_0000;
    pub const MAC_INVALID: u32 = 0x1200_0001;
    pub const SIGNATURE_INVALID: u32 = 0x1200_0002;
    pub const KEY_GENERATION: u32 = 0x1200_0003;
    pub const BAD_PASSWORD: u32 = 0x1200_0004;
    pub const KEY_NOT_FOUND: u32 = 0x1200_0005;
    pub const NO_SUITABLE_KEY: u32 = 0x1200_0006;
    pub const DECRYPT_FAILED: u32 = 0x1200_0007;
    pub const RNG: u32 = 0x1200_0008;
    pub const SIGNING_FAILED: u32 = 0x1200_0009;
    pub const NO_SIGNATURES_FOUND: u32 = 0x1200_000a;
    pub const SIGNATURE_EXPIRED: u32 = 0x1200_000b;
}

/// The main error type for rnpcore operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A required argument or endpoint was missing
    #[error("Null pointer")]
    NullPointer,

    /// Invalid argument, unknown name, unknown config field or conflicting flags
    #[error("Bad parameters: {0}")]
    BadParameters(String),

    /// Unparsable keyring, packet or JSON data
    #[error("Bad format: {0}")]
    BadFormat(String),

    /// Requested conversion is not available (cross-format keys)
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Capability not offered by the chosen algorithm
    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Out of memory")]
    OutOfMemory,

    /// File could not be opened or created
    #[error("Error accessing file: {0}")]
    Access(String),

    #[error("Error reading file: {0}")]
    Read(String),

    #[error("Error writing file: {0}")]
    Write(String),

    /// Operation invoked on an object in the wrong state
    #[error("Bad state: {0}")]
    BadState(String),

    /// Password missing or wrong for a protected secret key
    #[error("Bad password")]
    BadPassword,

    #[error("Key not found")]
    KeyNotFound,

    /// Key exists but lacks the material or capability needed
    #[error("No suitable key")]
    NoSuitableKey,

    #[error("Invalid signature")]
    SignatureInvalid,

    #[error("Signature expired")]
    SignatureExpired,

    #[error("No signatures found cannot verify")]
    NoSignaturesFound,

    #[error("Decryption failed")]
    DecryptFailed,

    #[error("Error during key generation: {0}")]
    KeyGeneration(String),

    #[error("Unknown error: {0}")]
    Generic(String),

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// rpgp OpenPGP error
    #[error("OpenPGP error: {0}")]
    OpenPgp(#[from] pgp::errors::Error),

    /// JSON parsing or building error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error from anyhow
    #[error("Error: {0}")]
    Other(#[from] anyhow::Error),
}

/// A specialized Result type for rnpcore operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The classic numeric result code for this error.
    pub fn code(&self) -> u32 {
        match self {
            Error::NullPointer => codes::NULL_POINTER,
            Error::BadParameters(_) => codes::BAD_PARAMETERS,
            Error::BadFormat(_) | Error::Json(_) => codes::BAD_FORMAT,
            Error::NotImplemented(_) => codes::NOT_IMPLEMENTED,
            Error::NotSupported(_) => codes::NOT_SUPPORTED,
            Error::OutOfMemory => codes::OUT_OF_MEMORY,
            Error::Access(_) => codes::ACCESS,
            Error::Read(_) => codes::READ,
            Error::Write(_) => codes::WRITE,
            Error::BadState(_) => codes::BAD_STATE,
            Error::BadPassword => codes::BAD_PASSWORD,
            Error::KeyNotFound => codes::KEY_NOT_FOUND,
            Error::NoSuitableKey => codes::NO_SUITABLE_KEY,
            Error::SignatureInvalid => codes::SIGNATURE_INVALID,
            Error::SignatureExpired => codes::SIGNATURE_EXPIRED,
            Error::NoSignaturesFound => codes::NO_SIGNATURES_FOUND,
            Error::DecryptFailed => codes::DECRYPT_FAILED,
            Error::KeyGeneration(_) => codes::KEY_GENERATION,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    codes::ACCESS
                }
                _ => codes::READ,
            },
            Error::Generic(_) | Error::OpenPgp(_) | Error::Other(_) => codes::GENERIC,
        }
    }
}

/// Fixed description of a numeric result code.
pub fn result_to_string(code: u32) -> &'static str {
    match code {
        codes::SUCCESS => "Success",

        codes::GENERIC => "Unknown error",
        codes::BAD_FORMAT => "Bad format",
        codes::BAD_PARAMETERS => "Bad parameters",
        codes::NOT_IMPLEMENTED => "Not implemented",
        codes::NOT_SUPPORTED => "Not supported",
        codes::OUT_OF_MEMORY => "Out of memory",
        codes::SHORT_BUFFER => "Buffer too short",
        codes::NULL_POINTER => "Null pointer",

        codes::ACCESS => "Error accessing file",
        codes::READ => "Error reading file",
        codes::WRITE => "Error writing file",

        codes::BAD_STATE => "Bad state",
        codes::MAC_INVALID => "Invalid MAC",
        codes::SIGNATURE_INVALID => "Invalid signature",
        codes::KEY_GENERATION => "Error during key generation",
        codes::BAD_PASSWORD => "Bad password",
        codes::KEY_NOT_FOUND => "Key not found",
        codes::NO_SUITABLE_KEY => "No suitable key",
        codes::DECRYPT_FAILED => "Decryption failed",
        codes::NO_SIGNATURES_FOUND => "No signatures found cannot verify",
        codes::SIGNATURE_EXPIRED => "Signature expired",

        _ => "Unknown error",
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Generic(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Generic(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_match_descriptions() {
        assert_eq!(result_to_string(Error::KeyNotFound.code()), "Key not found");
        assert_eq!(
            result_to_string(Error::BadParameters("x".into()).code()),
            "Bad parameters"
        );
        assert_eq!(result_to_string(0xdead_beef), "Unknown error");
        assert_eq!(result_to_string(codes::SUCCESS), "Success");
    }

    #[test]
    fn test_io_not_found_maps_to_access() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.code(), codes::ACCESS);
    }
}

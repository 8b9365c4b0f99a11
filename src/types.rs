//! Value types and name tables shared across the engine.
//!
//! Algorithm, curve, usage and format names are matched case-insensitively.
//! Lookups return `None` for unknown names and callers turn that into
//! [`Error::BadParameters`](crate::Error::BadParameters).

use pgp::crypto::aead::AeadAlgorithm;
use pgp::crypto::ecc_curve::ECCCurve;
use pgp::crypto::hash::HashAlgorithm;
use pgp::crypto::public_key::PublicKeyAlgorithm;
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use pgp::packet::{KeyFlags, RevocationCode, SignatureType};
use pgp::types::CompressionAlgorithm;

pub const DEFAULT_HASH: HashAlgorithm = HashAlgorithm::Sha256;
pub const DEFAULT_CIPHER: SymmetricKeyAlgorithm = SymmetricKeyAlgorithm::AES256;
pub const DEFAULT_RSA_BITS: usize = 2048;
/// Iteration count used for key protection when none is requested.
pub const DEFAULT_S2K_ITERATIONS: usize = 65_011_712;
pub const MAX_USERID_LEN: usize = 128;

/// Keyring encoding of a store, or storage format of a single key.
///
/// Keys themselves are only ever `Gpg` or `G10`; `Kbx` stores hold
/// `Gpg` keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyFormat {
    Gpg,
    Kbx,
    G10,
}

impl KeyFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "GPG" => Some(KeyFormat::Gpg),
            "KBX" => Some(KeyFormat::Kbx),
            "G10" => Some(KeyFormat::G10),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyFormat::Gpg => "GPG",
            KeyFormat::Kbx => "KBX",
            KeyFormat::G10 => "G10",
        }
    }

    /// Format that keys must carry to live in a store of this format.
    pub fn key_format(&self) -> KeyFormat {
        match self {
            KeyFormat::Gpg | KeyFormat::Kbx => KeyFormat::Gpg,
            KeyFormat::G10 => KeyFormat::G10,
        }
    }

    pub fn accepts(&self, key_format: KeyFormat) -> bool {
        self.key_format() == key_format
    }
}

impl std::fmt::Display for KeyFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Public-key algorithm families the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublicKeyAlg {
    Rsa,
    Dsa,
    Elgamal,
    Ecdh,
    Ecdsa,
    Eddsa,
    Sm2,
}

const PK_ALG_NAMES: &[(PublicKeyAlg, &str)] = &[
    (PublicKeyAlg::Rsa, "RSA"),
    (PublicKeyAlg::Dsa, "DSA"),
    (PublicKeyAlg::Elgamal, "ELGAMAL"),
    (PublicKeyAlg::Ecdh, "ECDH"),
    (PublicKeyAlg::Ecdsa, "ECDSA"),
    (PublicKeyAlg::Eddsa, "EDDSA"),
    (PublicKeyAlg::Sm2, "SM2"),
];

impl PublicKeyAlg {
    pub fn from_name(name: &str) -> Option<Self> {
        PK_ALG_NAMES
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(alg, _)| *alg)
    }

    pub fn as_str(&self) -> &'static str {
        PK_ALG_NAMES
            .iter()
            .find(|(alg, _)| alg == self)
            .map(|(_, n)| *n)
            .unwrap_or("unknown")
    }

    /// Map an rpgp algorithm id onto a family.
    pub fn from_pgp(alg: PublicKeyAlgorithm) -> Option<Self> {
        match alg {
            PublicKeyAlgorithm::RSA
            | PublicKeyAlgorithm::RSAEncrypt
            | PublicKeyAlgorithm::RSASign => Some(PublicKeyAlg::Rsa),
            PublicKeyAlgorithm::DSA => Some(PublicKeyAlg::Dsa),
            PublicKeyAlgorithm::ElgamalEncrypt | PublicKeyAlgorithm::Elgamal => {
                Some(PublicKeyAlg::Elgamal)
            }
            PublicKeyAlgorithm::ECDH | PublicKeyAlgorithm::X25519 => Some(PublicKeyAlg::Ecdh),
            PublicKeyAlgorithm::ECDSA => Some(PublicKeyAlg::Ecdsa),
            PublicKeyAlgorithm::EdDSALegacy | PublicKeyAlgorithm::Ed25519 => {
                Some(PublicKeyAlg::Eddsa)
            }
            _ => None,
        }
    }

    pub fn can_sign(&self) -> bool {
        matches!(
            self,
            PublicKeyAlg::Rsa
                | PublicKeyAlg::Dsa
                | PublicKeyAlg::Ecdsa
                | PublicKeyAlg::Eddsa
                | PublicKeyAlg::Sm2
        )
    }

    pub fn can_encrypt(&self) -> bool {
        matches!(
            self,
            PublicKeyAlg::Rsa | PublicKeyAlg::Elgamal | PublicKeyAlg::Ecdh | PublicKeyAlg::Sm2
        )
    }

    /// Algorithms whose size is chosen by curve rather than bit length.
    pub fn has_curve(&self) -> bool {
        matches!(
            self,
            PublicKeyAlg::Ecdh | PublicKeyAlg::Ecdsa | PublicKeyAlg::Eddsa | PublicKeyAlg::Sm2
        )
    }

    pub fn has_bits(&self) -> bool {
        matches!(self, PublicKeyAlg::Rsa | PublicKeyAlg::Dsa | PublicKeyAlg::Elgamal)
    }

    /// Every usage flag this algorithm may carry.
    pub fn allowed_usage(&self) -> KeyUsage {
        let mut usage = KeyUsage::default();
        if self.can_sign() {
            usage.sign = true;
            usage.certify = true;
            usage.authenticate = true;
        }
        if self.can_encrypt() {
            usage.encrypt = true;
        }
        usage
    }

    /// Usage assigned when the caller does not request any.
    pub fn default_usage(&self, primary: bool) -> KeyUsage {
        match (self, primary) {
            (PublicKeyAlg::Ecdh | PublicKeyAlg::Elgamal, _) => KeyUsage::encrypt_only(),
            (_, true) => KeyUsage::sign_certify(),
            (PublicKeyAlg::Rsa | PublicKeyAlg::Sm2, false) => KeyUsage::encrypt_only(),
            (_, false) => KeyUsage::sign_only(),
        }
    }
}

/// Named elliptic curves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Curve {
    NistP256,
    NistP384,
    NistP521,
    Ed25519,
    Curve25519,
    BrainpoolP256,
    BrainpoolP384,
    BrainpoolP512,
    Secp256k1,
    Sm2P256,
}

const CURVE_NAMES: &[(Curve, &str, usize)] = &[
    (Curve::NistP256, "NIST P-256", 256),
    (Curve::NistP384, "NIST P-384", 384),
    (Curve::NistP521, "NIST P-521", 521),
    (Curve::Ed25519, "Ed25519", 255),
    (Curve::Curve25519, "Curve25519", 255),
    (Curve::BrainpoolP256, "brainpoolP256r1", 256),
    (Curve::BrainpoolP384, "brainpoolP384r1", 384),
    (Curve::BrainpoolP512, "brainpoolP512r1", 512),
    (Curve::Secp256k1, "secp256k1", 256),
    (Curve::Sm2P256, "SM2 P-256", 256),
];

impl Curve {
    pub fn from_name(name: &str) -> Option<Self> {
        CURVE_NAMES
            .iter()
            .find(|(_, n, _)| n.eq_ignore_ascii_case(name))
            .map(|(c, _, _)| *c)
    }

    pub fn as_str(&self) -> &'static str {
        CURVE_NAMES
            .iter()
            .find(|(c, _, _)| c == self)
            .map(|(_, n, _)| *n)
            .unwrap_or("unknown")
    }

    pub fn bits(&self) -> usize {
        CURVE_NAMES
            .iter()
            .find(|(c, _, _)| c == self)
            .map(|(_, _, b)| *b)
            .unwrap_or(0)
    }

    pub fn all() -> impl Iterator<Item = Curve> {
        CURVE_NAMES.iter().map(|(c, _, _)| *c)
    }

    /// Whether this curve can be used with the given algorithm.
    pub fn fits(&self, alg: PublicKeyAlg) -> bool {
        match alg {
            PublicKeyAlg::Eddsa => *self == Curve::Ed25519,
            PublicKeyAlg::Sm2 => *self == Curve::Sm2P256,
            PublicKeyAlg::Ecdsa => !matches!(
                self,
                Curve::Ed25519 | Curve::Curve25519 | Curve::Sm2P256
            ),
            PublicKeyAlg::Ecdh => !matches!(self, Curve::Ed25519 | Curve::Sm2P256),
            _ => false,
        }
    }

    pub(crate) fn to_pgp(self) -> Option<ECCCurve> {
        match self {
            Curve::NistP256 => Some(ECCCurve::P256),
            Curve::NistP384 => Some(ECCCurve::P384),
            Curve::NistP521 => Some(ECCCurve::P521),
            Curve::Ed25519 => Some(ECCCurve::Ed25519),
            Curve::Curve25519 => Some(ECCCurve::Curve25519),
            Curve::Secp256k1 => Some(ECCCurve::Secp256k1),
            _ => None,
        }
    }

    pub(crate) fn default_for(alg: PublicKeyAlg) -> Option<Curve> {
        match alg {
            PublicKeyAlg::Ecdsa => Some(Curve::NistP256),
            PublicKeyAlg::Ecdh => Some(Curve::Curve25519),
            PublicKeyAlg::Eddsa => Some(Curve::Ed25519),
            PublicKeyAlg::Sm2 => Some(Curve::Sm2P256),
            _ => None,
        }
    }
}

/// Key usage flags carried in self-signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyUsage {
    pub sign: bool,
    pub certify: bool,
    pub encrypt: bool,
    pub authenticate: bool,
}

impl KeyUsage {
    pub fn sign_certify() -> Self {
        Self {
            sign: true,
            certify: true,
            ..Default::default()
        }
    }

    pub fn sign_only() -> Self {
        Self {
            sign: true,
            ..Default::default()
        }
    }

    pub fn encrypt_only() -> Self {
        Self {
            encrypt: true,
            ..Default::default()
        }
    }

    /// Parse a single usage name ("sign", "certify", "encrypt", "authenticate").
    pub fn from_name(name: &str) -> Option<Self> {
        let mut usage = KeyUsage::default();
        match name.to_ascii_lowercase().as_str() {
            "sign" => usage.sign = true,
            "certify" => usage.certify = true,
            "encrypt" => usage.encrypt = true,
            "authenticate" => usage.authenticate = true,
            _ => return None,
        }
        Some(usage)
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.sign {
            names.push("sign");
        }
        if self.certify {
            names.push("certify");
        }
        if self.encrypt {
            names.push("encrypt");
        }
        if self.authenticate {
            names.push("authenticate");
        }
        names
    }

    pub fn is_empty(&self) -> bool {
        self.to_bitmask() == 0
    }

    pub fn union(self, other: KeyUsage) -> KeyUsage {
        Self::from_bitmask(self.to_bitmask() | other.to_bitmask())
    }

    /// True when every flag set in `self` is also set in `other`.
    pub fn is_subset_of(&self, other: &KeyUsage) -> bool {
        self.to_bitmask() & !other.to_bitmask() == 0
    }

    /// Create flags from an OpenPGP key flags octet
    /// (0x01 certify, 0x02 sign, 0x04|0x08 encrypt, 0x20 authenticate).
    pub fn from_bitmask(mask: u8) -> Self {
        Self {
            certify: (mask & 0x01) != 0,
            sign: (mask & 0x02) != 0,
            encrypt: (mask & 0x0c) != 0,
            authenticate: (mask & 0x20) != 0,
        }
    }

    /// Convert to the OpenPGP key flags octet.
    pub fn to_bitmask(&self) -> u8 {
        let mut mask = 0u8;
        if self.certify {
            mask |= 0x01;
        }
        if self.sign {
            mask |= 0x02;
        }
        if self.encrypt {
            mask |= 0x0c;
        }
        if self.authenticate {
            mask |= 0x20;
        }
        mask
    }

    pub(crate) fn from_key_flags(flags: &KeyFlags) -> Self {
        Self {
            sign: flags.sign(),
            certify: flags.certify(),
            encrypt: flags.encrypt_comms() || flags.encrypt_storage(),
            authenticate: flags.authentication(),
        }
    }

    pub(crate) fn to_key_flags(self) -> KeyFlags {
        let mut flags = KeyFlags::default();
        flags.set_sign(self.sign);
        flags.set_certify(self.certify);
        flags.set_encrypt_comms(self.encrypt);
        flags.set_encrypt_storage(self.encrypt);
        flags.set_authentication(self.authenticate);
        flags
    }
}

/// AEAD choice for encryption; `None` selects the classic SEIPD v1 framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aead {
    None,
    Eax,
    Ocb,
}

impl Aead {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "NONE" => Some(Aead::None),
            "EAX" => Some(Aead::Eax),
            "OCB" => Some(Aead::Ocb),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Aead::None => "None",
            Aead::Eax => "EAX",
            Aead::Ocb => "OCB",
        }
    }

    pub(crate) fn to_pgp(self) -> Option<AeadAlgorithm> {
        match self {
            Aead::None => None,
            Aead::Eax => Some(AeadAlgorithm::Eax),
            Aead::Ocb => Some(AeadAlgorithm::Ocb),
        }
    }
}

/// Secret key protection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionMode {
    Cfb,
    /// AEAD protection, usage octet 253.
    Ocb,
}

impl ProtectionMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "CFB" => Some(ProtectionMode::Cfb),
            "OCB" => Some(ProtectionMode::Ocb),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtectionMode::Cfb => "CFB",
            ProtectionMode::Ocb => "OCB",
        }
    }
}

const HASH_NAMES: &[(HashAlgorithm, &str)] = &[
    (HashAlgorithm::Md5, "MD5"),
    (HashAlgorithm::Sha1, "SHA1"),
    (HashAlgorithm::Ripemd160, "RIPEMD160"),
    (HashAlgorithm::Sha256, "SHA256"),
    (HashAlgorithm::Sha384, "SHA384"),
    (HashAlgorithm::Sha512, "SHA512"),
    (HashAlgorithm::Sha224, "SHA224"),
    (HashAlgorithm::Sha3_256, "SHA3-256"),
    (HashAlgorithm::Sha3_512, "SHA3-512"),
];

pub fn hash_from_name(name: &str) -> Option<HashAlgorithm> {
    HASH_NAMES
        .iter()
        .find(|(_, n)| n.eq_ignore_ascii_case(name))
        .map(|(h, _)| *h)
}

pub fn hash_name(hash: HashAlgorithm) -> &'static str {
    HASH_NAMES
        .iter()
        .find(|(h, _)| *h == hash)
        .map(|(_, n)| *n)
        .unwrap_or("unknown")
}

const CIPHER_NAMES: &[(SymmetricKeyAlgorithm, &str)] = &[
    (SymmetricKeyAlgorithm::IDEA, "IDEA"),
    (SymmetricKeyAlgorithm::TripleDES, "TRIPLEDES"),
    (SymmetricKeyAlgorithm::CAST5, "CAST5"),
    (SymmetricKeyAlgorithm::Blowfish, "BLOWFISH"),
    (SymmetricKeyAlgorithm::AES128, "AES128"),
    (SymmetricKeyAlgorithm::AES192, "AES192"),
    (SymmetricKeyAlgorithm::AES256, "AES256"),
    (SymmetricKeyAlgorithm::Twofish, "TWOFISH"),
    (SymmetricKeyAlgorithm::Camellia128, "CAMELLIA128"),
    (SymmetricKeyAlgorithm::Camellia192, "CAMELLIA192"),
    (SymmetricKeyAlgorithm::Camellia256, "CAMELLIA256"),
];

pub fn cipher_from_name(name: &str) -> Option<SymmetricKeyAlgorithm> {
    CIPHER_NAMES
        .iter()
        .find(|(_, n)| n.eq_ignore_ascii_case(name))
        .map(|(c, _)| *c)
}

pub fn cipher_name(cipher: SymmetricKeyAlgorithm) -> &'static str {
    CIPHER_NAMES
        .iter()
        .find(|(c, _)| *c == cipher)
        .map(|(_, n)| *n)
        .unwrap_or("unknown")
}

const COMPRESSION_NAMES: &[(CompressionAlgorithm, &str)] = &[
    (CompressionAlgorithm::Uncompressed, "Uncompressed"),
    (CompressionAlgorithm::ZIP, "ZIP"),
    (CompressionAlgorithm::ZLIB, "ZLIB"),
    (CompressionAlgorithm::BZip2, "BZip2"),
];

pub fn compression_from_name(name: &str) -> Option<CompressionAlgorithm> {
    COMPRESSION_NAMES
        .iter()
        .find(|(_, n)| n.eq_ignore_ascii_case(name))
        .map(|(c, _)| *c)
}

pub fn compression_name(alg: CompressionAlgorithm) -> &'static str {
    COMPRESSION_NAMES
        .iter()
        .find(|(c, _)| *c == alg)
        .map(|(_, n)| *n)
        .unwrap_or("unknown")
}

pub fn signature_type_name(typ: Option<SignatureType>) -> &'static str {
    match typ {
        Some(SignatureType::Binary) => "binary",
        Some(SignatureType::Text) => "text",
        Some(SignatureType::Standalone) => "standalone",
        Some(SignatureType::CertGeneric) => "certification (generic)",
        Some(SignatureType::CertPersona) => "certification (persona)",
        Some(SignatureType::CertCasual) => "certification (casual)",
        Some(SignatureType::CertPositive) => "certification (positive)",
        Some(SignatureType::SubkeyBinding) => "subkey binding",
        Some(SignatureType::KeyBinding) => "primary key binding",
        Some(SignatureType::Key) => "direct",
        Some(SignatureType::KeyRevocation) => "key revocation",
        Some(SignatureType::SubkeyRevocation) => "subkey revocation",
        Some(SignatureType::CertRevocation) => "certification revocation",
        Some(SignatureType::Timestamp) => "timestamp",
        Some(SignatureType::ThirdParty) => "confirmation",
        _ => "unknown",
    }
}

/// Revocation code names accepted by `revoke` ("no", "superseded",
/// "compromised", "retired").
pub fn revocation_code_from_name(name: &str) -> Option<RevocationCode> {
    match name.to_ascii_lowercase().as_str() {
        "no" => Some(RevocationCode::NoReason),
        "superseded" => Some(RevocationCode::KeySuperseded),
        "compromised" => Some(RevocationCode::KeyCompromised),
        "retired" => Some(RevocationCode::KeyRetired),
        _ => None,
    }
}

pub fn revocation_code_name(code: RevocationCode) -> &'static str {
    match code {
        RevocationCode::NoReason => "no",
        RevocationCode::KeySuperseded => "superseded",
        RevocationCode::KeyCompromised => "compromised",
        RevocationCode::KeyRetired => "retired",
        RevocationCode::CertUserIdInvalid => "userid invalid",
        _ => "unknown",
    }
}

/// Default human-readable text for a revocation code.
pub fn revocation_code_text(code: RevocationCode) -> &'static str {
    match code {
        RevocationCode::KeySuperseded => "Key is superseded",
        RevocationCode::KeyCompromised => "Key material has been compromised",
        RevocationCode::KeyRetired => "Key is retired and no longer used",
        RevocationCode::CertUserIdInvalid => "User ID information is no longer valid",
        _ => "No reason specified",
    }
}

/// Names reported by `supported_features` for each feature type.
pub fn feature_names(feature: &str) -> Option<Vec<&'static str>> {
    let names = match feature.to_ascii_lowercase().as_str() {
        "symmetric algorithm" => CIPHER_NAMES.iter().map(|(_, n)| *n).collect(),
        "aead algorithm" => vec!["None", "EAX", "OCB"],
        "protection mode" => vec!["CFB", "OCB"],
        "public key algorithm" => PK_ALG_NAMES
            .iter()
            .filter(|(alg, _)| *alg != PublicKeyAlg::Sm2)
            .map(|(_, n)| *n)
            .collect(),
        "hash algorithm" => HASH_NAMES.iter().map(|(_, n)| *n).collect(),
        "compression algorithm" => COMPRESSION_NAMES.iter().map(|(_, n)| *n).collect(),
        "elliptic curve" => CURVE_NAMES
            .iter()
            .filter(|(c, _, _)| c.to_pgp().is_some())
            .map(|(_, n, _)| *n)
            .collect(),
        _ => return None,
    };
    Some(names)
}

/// Which stores `load_keys`, `save_keys` and `unload_keys` touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadFlags {
    pub public: bool,
    pub secret: bool,
}

impl LoadFlags {
    pub fn both() -> Self {
        Self {
            public: true,
            secret: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.public && !self.secret
    }
}

/// Options for `import_keys`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportFlags {
    pub public: bool,
    pub secret: bool,
    /// Skip unparsable blocks instead of failing.
    pub permissive: bool,
    /// Import only the first key of the input.
    pub single: bool,
}

/// Options for `KeyHandle::export`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExportFlags {
    pub public: bool,
    pub secret: bool,
    pub subkeys: bool,
    pub armored: bool,
}

/// Options for `KeyHandle::remove`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoveFlags {
    pub public: bool,
    pub secret: bool,
    pub subkeys: bool,
}

/// Options for `KeyHandle::to_json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JsonFlags {
    pub public_mpis: bool,
    pub secret_mpis: bool,
    pub signatures: bool,
    pub signature_mpis: bool,
}

//! Password and key providers.
//!
//! Providers are the engine's only suspension points: they are called
//! synchronously whenever a passphrase or a missing key is needed, and may
//! block on terminal or file I/O. Closures implement both traits.

use secrecy::{ExposeSecret, SecretString};

use crate::key::Key;
use crate::locator::KeyLocator;

/// Supplies passphrases for protected keys and symmetric encryption.
pub trait PasswordProvider {
    /// Ask for a passphrase.
    ///
    /// # Arguments
    /// * `key` - The key the passphrase is for, if any
    /// * `context` - What it is needed for: "protect", "unprotect", "sign",
    ///   "decrypt", "decrypt (symmetric)", "encrypt (symmetric)",
    ///   "add userid", "set expiration" or a caller-chosen string
    ///
    /// Returning `None` declines the request.
    fn request_password(&mut self, key: Option<&Key>, context: &str) -> Option<SecretString>;
}

impl<F> PasswordProvider for F
where
    F: FnMut(Option<&Key>, &str) -> Option<String>,
{
    fn request_password(&mut self, key: Option<&Key>, context: &str) -> Option<SecretString> {
        self(key, context).map(SecretString::new)
    }
}

/// Supplies keys that a search could not find.
pub trait KeyProvider {
    /// Return key material (armored or binary transferable keys) for the
    /// locator, or `None`. The returned keys are imported into the context
    /// and the search is retried once.
    fn request_key(&mut self, locator: &KeyLocator, secret: bool) -> Option<Vec<u8>>;
}

impl<F> KeyProvider for F
where
    F: FnMut(&KeyLocator, bool) -> Option<Vec<u8>>,
{
    fn request_key(&mut self, locator: &KeyLocator, secret: bool) -> Option<Vec<u8>> {
        self(locator, secret)
    }
}

/// Answers every request with the same passphrase.
pub struct FixedPassword(SecretString);

impl FixedPassword {
    pub fn new(password: &str) -> Self {
        Self(SecretString::new(password.to_string()))
    }
}

impl PasswordProvider for FixedPassword {
    fn request_password(&mut self, _key: Option<&Key>, _context: &str) -> Option<SecretString> {
        Some(SecretString::new(self.0.expose_secret().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_provider() {
        let mut calls = Vec::new();
        let mut provider = |_: Option<&Key>, ctx: &str| {
            calls.push(ctx.to_string());
            Some("pw".to_string())
        };
        let pw = provider.request_password(None, "decrypt").unwrap();
        assert_eq!(pw.expose_secret(), "pw");
        assert_eq!(calls, vec!["decrypt".to_string()]);
    }

    #[test]
    fn test_fixed_password() {
        let mut provider = FixedPassword::new("hunter2");
        assert_eq!(
            provider.request_password(None, "sign").unwrap().expose_secret(),
            "hunter2"
        );
    }
}

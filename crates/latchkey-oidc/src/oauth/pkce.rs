//! PKCE (Proof Key for Code Exchange) support for the authorization request.
//!
//! Implements the client half of RFC 7636 with the S256 method only. The
//! verifier is generated when the authorization redirect is built, carried
//! back to the callback in a short-lived cookie, and sent to the token
//! endpoint with the authorization code. The "plain" method is never emitted.
//!
//! # Example
//!
//! ```
//! use latchkey_oidc::oauth::{PkceChallenge, PkceVerifier};
//!
//! // Generated for the authorization request
//! let verifier = PkceVerifier::generate();
//! let challenge = PkceChallenge::from_verifier(&verifier);
//!
//! // The challenge goes into the authorization URL, the verifier into a
//! // cookie that is replayed at the token endpoint.
//! assert_eq!(challenge.as_str().len(), 43);
//! ```

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised when re-validating a verifier read back from a cookie.
#[derive(Debug, thiserror::Error)]
pub enum PkceError {
    /// Verifier length is outside the valid range (43-128 characters).
    #[error("Invalid verifier length: must be 43-128 characters, got {0}")]
    InvalidVerifierLength(usize),

    /// Verifier contains invalid characters.
    #[error("Invalid verifier characters: must be URL-safe base64 ([A-Za-z0-9-._~])")]
    InvalidVerifierCharacters,
}

impl PkceError {
    /// Create an `InvalidVerifierLength` error.
    #[must_use]
    pub fn invalid_verifier_length(len: usize) -> Self {
        Self::InvalidVerifierLength(len)
    }

    /// Create an `InvalidVerifierCharacters` error.
    #[must_use]
    pub fn invalid_verifier_characters() -> Self {
        Self::InvalidVerifierCharacters
    }
}

// =============================================================================
// PKCE Challenge Method
// =============================================================================

/// PKCE challenge method sent as `code_challenge_method`.
///
/// Only S256 (SHA-256) is emitted. The "plain" method offers no protection
/// against an intercepted authorization code and is not represented here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PkceChallengeMethod {
    /// SHA-256 hash (the only supported method).
    #[default]
    S256,
}

impl PkceChallengeMethod {
    /// Get the method as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S256 => "S256",
        }
    }
}

impl std::fmt::Display for PkceChallengeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// PKCE Verifier
// =============================================================================

/// PKCE code verifier.
///
/// A high-entropy cryptographic random string using the unreserved characters
/// `[A-Z] / [a-z] / [0-9] / "-" / "." / "_" / "~"`, with a minimum length of
/// 43 characters and a maximum length of 128 characters.
///
/// The verifier is a secret for the duration of the flow. It never appears in
/// the authorization URL and must not be written to logs or error messages.
#[derive(Clone)]
pub struct PkceVerifier(String);

impl PkceVerifier {
    /// Create a verifier from a string, such as one read back from a cookie.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Length is not between 43 and 128 characters
    /// - Contains characters other than `[A-Za-z0-9-._~]`
    pub fn new(verifier: String) -> Result<Self, PkceError> {
        let len = verifier.len();

        // RFC 7636: verifier must be 43-128 characters
        if !(43..=128).contains(&len) {
            return Err(PkceError::invalid_verifier_length(len));
        }

        // Must be URL-safe unreserved characters: [A-Z], [a-z], [0-9], '-', '.', '_', '~'
        if !verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' || c == '~')
        {
            return Err(PkceError::invalid_verifier_characters());
        }

        Ok(Self(verifier))
    }

    /// Generate a cryptographically random verifier.
    ///
    /// Generates 32 random bytes and encodes them as base64url (43 characters).
    #[must_use]
    pub fn generate() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        // `gen` is a reserved keyword in Rust 2024, so we use r#gen
        let bytes: [u8; 32] = rng.r#gen();
        let verifier = URL_SAFE_NO_PAD.encode(bytes);
        Self(verifier)
    }

    /// Get the verifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the verifier and return the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl AsRef<str> for PkceVerifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Debug keeps the verifier out of log output.
impl std::fmt::Debug for PkceVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PkceVerifier(..)")
    }
}

// =============================================================================
// PKCE Challenge
// =============================================================================

/// PKCE code challenge sent as `code_challenge`.
///
/// The S256 challenge is the base64url-encoded SHA-256 hash of the verifier:
/// `code_challenge = BASE64URL(SHA256(ASCII(code_verifier)))`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge(String);

impl PkceChallenge {
    /// Create a challenge from a verifier using the S256 method.
    #[must_use]
    pub fn from_verifier(verifier: &PkceVerifier) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(verifier.0.as_bytes());
        let hash = hasher.finalize();
        Self(URL_SAFE_NO_PAD.encode(hash))
    }

    /// Get the challenge as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the challenge and return the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl AsRef<str> for PkceChallenge {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Tests
// =============================================================================

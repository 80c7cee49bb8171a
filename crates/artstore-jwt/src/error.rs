//! Error type for key management, signing and validation.

use thiserror::Error;

/// Failure modes surfaced by [`crate::KeyManager`] and the sign/validate helpers.
#[derive(Debug, Error)]
pub enum JwtError {
    /// Token signature, expiry or claim shape failed validation.
    #[error("token validation failed: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    /// No active key could validate the token (all active keys tried).
    #[error("no active signing key could validate the token")]
    NoMatchingKey,

    /// Candidate PEM content did not look like a PEM block.
    #[error("key material is not a PEM block (missing -----BEGIN header)")]
    NotPem,

    /// RSA keypair generation failed.
    #[error("RSA key generation failed: {0}")]
    KeyGeneration(String),

    /// PEM encoding/decoding of generated key material failed.
    #[error("PEM encoding failed: {0}")]
    Pem(String),

    /// Reading a key file from disk failed.
    #[error("failed to read key file {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

//! Error types for the identity service.

use thiserror::Error;

/// Errors raised while generating, importing or using an identity.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Certificate or key generation failed.
    #[error("certificate generation failed: {0}")]
    Generation(#[from] rcgen::Error),

    /// A certificate could not be parsed.
    #[error("invalid certificate: {0}")]
    Certificate(String),

    /// A private key could not be parsed.
    #[error("invalid private key: {0}")]
    PrivateKey(String),

    /// Signing failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// Transport encoding of an identity blob was invalid.
    #[error("invalid identity encoding: {0}")]
    Encoding(#[from] base64::DecodeError),

    /// PEM material was not valid UTF-8.
    #[error("identity material is not valid PEM text")]
    NotUtf8(#[from] std::string::FromUtf8Error),
}

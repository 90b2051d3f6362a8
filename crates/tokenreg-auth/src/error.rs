//! Error taxonomy for token configuration, signing and validation

use thiserror::Error;

use crate::codec::CodecError;

/// Setup and lookup errors
///
/// These are raised synchronously at the call site and indicate
/// misconfiguration rather than a bad token.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Must specify type or types object map")]
    MissingType,

    #[error("Must specify string type")]
    InvalidTypeName,

    #[error("Invalid token configuration for type `{0}`")]
    InvalidConfig(String),

    #[error("Unknown token type `{0}`")]
    UnknownType(String),

    #[error("Malformed token configuration for type `{name}`: {source}")]
    Malformed {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Outcome of a failed token validation
///
/// Callers can tell "expired" apart from "otherwise invalid" without
/// looking at codec internals.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The token was valid once but its lifetime has elapsed
    #[error("{0}")]
    Expired(String),

    /// Any other verification failure
    #[error("{0}")]
    Invalid(String),
}

impl ValidationError {
    pub fn is_expired(&self) -> bool {
        matches!(self, ValidationError::Expired(_))
    }

    pub fn message(&self) -> &str {
        match self {
            ValidationError::Expired(message) | ValidationError::Invalid(message) => message,
        }
    }
}

impl From<CodecError> for ValidationError {
    fn from(error: CodecError) -> Self {
        if error.is_expired() {
            ValidationError::Expired(error.into_message())
        } else {
            ValidationError::Invalid(error.into_message())
        }
    }
}

/// Errors from generating a token of a registered type
#[derive(Debug, Error)]
pub enum TokenError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Token signing failed: {0}")]
    Signing(#[from] CodecError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_uses_codec_kind() {
        let expired = ValidationError::from(CodecError::expired("jwt expired"));
        assert!(expired.is_expired());
        assert_eq!(expired.message(), "jwt expired");

        // Message wording alone never makes an error "expired"
        let invalid = ValidationError::from(CodecError::invalid("jwt expired"));
        assert!(!invalid.is_expired());
        assert_eq!(invalid, ValidationError::Invalid("jwt expired".to_string()));
    }

    #[test]
    fn test_config_error_messages() {
        assert_eq!(
            ConfigError::MissingType.to_string(),
            "Must specify type or types object map"
        );
        assert_eq!(
            ConfigError::InvalidConfig("access".to_string()).to_string(),
            "Invalid token configuration for type `access`"
        );
        assert_eq!(
            ConfigError::UnknownType("refresh".to_string()).to_string(),
            "Unknown token type `refresh`"
        );
    }

    #[test]
    fn test_token_error_wraps_both_sides() {
        let err: TokenError = ConfigError::UnknownType("x".to_string()).into();
        assert_eq!(err.to_string(), "Unknown token type `x`");

        let err: TokenError = CodecError::invalid("secretOrPrivateKey must have a value").into();
        assert!(matches!(err, TokenError::Signing(_)));
    }
}

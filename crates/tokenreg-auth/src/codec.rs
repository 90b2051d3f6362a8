//! Token codec seam and the default `jsonwebtoken`-backed implementation

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::config::{Lifetime, TokenConfig};

/// Token payload: the caller's claims plus any standard claims the codec adds
pub type Claims = Map<String, Value>;

/// HMAC algorithms accepted on verification when none is configured
const HMAC_ALGORITHMS: [Algorithm; 3] = [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

/// Broad category of a codec failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecErrorKind {
    /// The token's lifetime has elapsed
    Expired,
    /// Anything else
    Invalid,
}

/// Failure reported by a [`TokenCodec`]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct CodecError {
    kind: CodecErrorKind,
    message: String,
}

impl CodecError {
    pub fn expired(message: impl Into<String>) -> Self {
        Self {
            kind: CodecErrorKind::Expired,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            kind: CodecErrorKind::Invalid,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> CodecErrorKind {
        self.kind
    }

    pub fn is_expired(&self) -> bool {
        self.kind == CodecErrorKind::Expired
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn into_message(self) -> String {
        self.message
    }
}

impl From<jsonwebtoken::errors::Error> for CodecError {
    fn from(error: jsonwebtoken::errors::Error) -> Self {
        match error.kind() {
            ErrorKind::ExpiredSignature => CodecError::expired("jwt expired"),
            ErrorKind::ImmatureSignature => CodecError::invalid("jwt not active"),
            ErrorKind::InvalidSignature => CodecError::invalid("invalid signature"),
            ErrorKind::InvalidAlgorithm => CodecError::invalid("invalid algorithm"),
            ErrorKind::InvalidAudience => CodecError::invalid("jwt audience invalid"),
            ErrorKind::InvalidIssuer => CodecError::invalid("jwt issuer invalid"),
            ErrorKind::InvalidSubject => CodecError::invalid("jwt subject invalid"),
            ErrorKind::MissingRequiredClaim(claim) => {
                CodecError::invalid(format!("jwt {} required", claim))
            }
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => CodecError::invalid("jwt malformed"),
            _ => CodecError::invalid(error.to_string()),
        }
    }
}

/// Signing and verification primitive
///
/// `options` never contains the secret; it is passed separately.
#[async_trait]
pub trait TokenCodec: Send + Sync {
    /// Sign `payload` into a token string
    fn sign(&self, payload: &Claims, secret: &str, options: &TokenConfig)
        -> Result<String, CodecError>;

    /// Verify `token` and return its decoded payload
    ///
    /// Expiration failures must be reported with [`CodecError::expired`] so
    /// callers can distinguish them from other failures.
    async fn verify(
        &self,
        token: &str,
        secret: &str,
        options: &TokenConfig,
    ) -> Result<Claims, CodecError>;
}

/// HMAC JWT codec backed by `jsonwebtoken`
#[derive(Debug, Clone, Copy, Default)]
pub struct JwtCodec;

impl JwtCodec {
    pub fn new() -> Self {
        Self
    }

    fn build_validation(options: &TokenConfig) -> Validation {
        let algorithms = match options.algorithm {
            Some(algorithm) => vec![algorithm],
            None => HMAC_ALGORITHMS.to_vec(),
        };

        let mut validation = Validation::new(algorithms[0]);
        validation.algorithms = algorithms;
        // Time claims are checked after decoding, see `check_time_claims`
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.required_spec_claims.clear();

        match &options.audience {
            Some(audience) => {
                validation.set_audience(&[audience]);
                validation.required_spec_claims.insert("aud".to_string());
            }
            None => validation.validate_aud = false,
        }
        if let Some(issuer) = &options.issuer {
            validation.set_issuer(&[issuer]);
            validation.required_spec_claims.insert("iss".to_string());
        }
        if let Some(subject) = &options.subject {
            validation.sub = Some(subject.clone());
            validation.required_spec_claims.insert("sub".to_string());
        }

        validation
    }
}

/// Write `value` under `claim`, refusing to overwrite a claim the caller set
fn set_claim(
    claims: &mut Claims,
    claim: &str,
    option: &str,
    value: Value,
) -> Result<(), CodecError> {
    if claims.contains_key(claim) {
        return Err(CodecError::invalid(format!(
            "Bad \"options.{}\" option. The payload already has an \"{}\" property.",
            option, claim
        )));
    }
    claims.insert(claim.to_string(), value);
    Ok(())
}

/// `base + lifetime` in seconds, or an error naming `option` when the
/// lifetime is malformed or the sum overflows
fn offset_from(base: i64, lifetime: &Lifetime, option: &str) -> Result<i64, CodecError> {
    lifetime
        .as_seconds()
        .and_then(|offset| base.checked_add(offset))
        .ok_or_else(|| {
            CodecError::invalid(format!(
                "\"{}\" should be a number of seconds or string representing a timespan",
                option
            ))
        })
}

/// Audience, issuer and subject failures, reported with the expected value
///
/// A configured claim that is missing from the token counts as a mismatch.
fn claim_mismatch(error: &jsonwebtoken::errors::Error, options: &TokenConfig) -> Option<CodecError> {
    let (name, expected) = match error.kind() {
        ErrorKind::InvalidAudience => ("audience", &options.audience),
        ErrorKind::InvalidIssuer => ("issuer", &options.issuer),
        ErrorKind::InvalidSubject => ("subject", &options.subject),
        ErrorKind::MissingRequiredClaim(claim) => match claim.as_str() {
            "aud" => ("audience", &options.audience),
            "iss" => ("issuer", &options.issuer),
            "sub" => ("subject", &options.subject),
            _ => return None,
        },
        _ => return None,
    };

    Some(CodecError::invalid(format!(
        "jwt {} invalid. expected: {}",
        name,
        expected.as_deref().unwrap_or_default()
    )))
}

/// Numeric value of a time claim, if present
fn time_claim(claims: &Claims, claim: &str) -> Result<Option<f64>, CodecError> {
    match claims.get(claim) {
        None => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or_else(|| CodecError::invalid(format!("invalid {} value", claim))),
    }
}

/// `nbf` and `exp` checks: expired once `now >= exp + tolerance`
fn check_time_claims(claims: &Claims, options: &TokenConfig, now: i64) -> Result<(), CodecError> {
    let now = now as f64;
    let tolerance = options.clock_tolerance.unwrap_or(0) as f64;

    if !options.ignore_not_before.unwrap_or(false) {
        if let Some(not_before) = time_claim(claims, "nbf")? {
            if not_before > now + tolerance {
                return Err(CodecError::invalid("jwt not active"));
            }
        }
    }

    if !options.ignore_expiration.unwrap_or(false) {
        if let Some(expires_at) = time_claim(claims, "exp")? {
            if now >= expires_at + tolerance {
                return Err(CodecError::expired("jwt expired"));
            }
        }
    }

    Ok(())
}

#[async_trait]
impl TokenCodec for JwtCodec {
    fn sign(
        &self,
        payload: &Claims,
        secret: &str,
        options: &TokenConfig,
    ) -> Result<String, CodecError> {
        if secret.is_empty() {
            return Err(CodecError::invalid("secretOrPrivateKey must have a value"));
        }

        let mut claims = payload.clone();
        let issued_at = match claims.get("iat") {
            None => Utc::now().timestamp(),
            Some(iat) => iat
                .as_f64()
                .map(|secs| secs.floor() as i64)
                .ok_or_else(|| CodecError::invalid("\"iat\" should be a number of seconds"))?,
        };

        if options.no_timestamp.unwrap_or(false) {
            claims.remove("iat");
        } else if !claims.contains_key("iat") {
            claims.insert("iat".to_string(), Value::from(issued_at));
        }

        if let Some(lifetime) = &options.expires_in {
            let expires_at = offset_from(issued_at, lifetime, "expiresIn")?;
            set_claim(&mut claims, "exp", "expiresIn", Value::from(expires_at))?;
        }
        if let Some(lifetime) = &options.not_before {
            let not_before = offset_from(issued_at, lifetime, "notBefore")?;
            set_claim(&mut claims, "nbf", "notBefore", Value::from(not_before))?;
        }
        if let Some(audience) = &options.audience {
            set_claim(&mut claims, "aud", "audience", Value::from(audience.as_str()))?;
        }
        if let Some(issuer) = &options.issuer {
            set_claim(&mut claims, "iss", "issuer", Value::from(issuer.as_str()))?;
        }
        if let Some(subject) = &options.subject {
            set_claim(&mut claims, "sub", "subject", Value::from(subject.as_str()))?;
        }
        if let Some(jwt_id) = &options.jwt_id {
            set_claim(&mut claims, "jti", "jwtid", Value::from(jwt_id.as_str()))?;
        }

        for key in options.extra.keys() {
            debug!("JwtCodec ignoring unsupported option '{}'", key);
        }

        let mut header = Header::new(options.algorithm.unwrap_or(Algorithm::HS256));
        header.kid = options.key_id.clone();

        Ok(encode(
            &header,
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )?)
    }

    async fn verify(
        &self,
        token: &str,
        secret: &str,
        options: &TokenConfig,
    ) -> Result<Claims, CodecError> {
        if secret.is_empty() {
            return Err(CodecError::invalid("secret or public key must be provided"));
        }

        let validation = Self::build_validation(options);
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map_err(|e| claim_mismatch(&e, options).unwrap_or_else(|| CodecError::from(e)))?;
        let claims = token_data.claims;
        let now = Utc::now().timestamp();

        check_time_claims(&claims, options, now)?;

        if let Some(jwt_id) = &options.jwt_id {
            if claims.get("jti").and_then(Value::as_str) != Some(jwt_id.as_str()) {
                return Err(CodecError::invalid(format!(
                    "jwt jwtid invalid. expected: {}",
                    jwt_id
                )));
            }
        }

        if let Some(max_age) = &options.max_age {
            let issued_at = time_claim(&claims, "iat")?
                .ok_or_else(|| CodecError::invalid("iat required when maxAge is specified"))?;
            let tolerance = i64::try_from(options.clock_tolerance.unwrap_or(0)).unwrap_or(i64::MAX);
            let deadline = offset_from(issued_at.floor() as i64, max_age, "maxAge")?
                .saturating_add(tolerance);
            if now >= deadline {
                return Err(CodecError::expired("maxAge exceeded"));
            }
        }

        Ok(claims)
    }
}

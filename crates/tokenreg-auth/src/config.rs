//! Token configuration, merging and the shared defaults container

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

const MILLIS_PER_SECOND: f64 = 1_000.0;
const MILLIS_PER_MINUTE: f64 = MILLIS_PER_SECOND * 60.0;
const MILLIS_PER_HOUR: f64 = MILLIS_PER_MINUTE * 60.0;
const MILLIS_PER_DAY: f64 = MILLIS_PER_HOUR * 24.0;
const MILLIS_PER_WEEK: f64 = MILLIS_PER_DAY * 7.0;
const MILLIS_PER_YEAR: f64 = MILLIS_PER_DAY * 365.25;
const MAX_SPAN_SECONDS: f64 = i64::MAX as f64;

/// A claim offset relative to the issue time
///
/// Either a whole number of seconds or a timespan string such as `"90s"`,
/// `"15m"`, `"2h"`, `"7 days"` or `"1.5 hours"`. A string without a unit is
/// read as milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Lifetime {
    Seconds(i64),
    Span(String),
}

impl Lifetime {
    /// Offset in whole seconds, or `None` for a malformed or out-of-range timespan
    pub fn as_seconds(&self) -> Option<i64> {
        match self {
            Lifetime::Seconds(secs) => Some(*secs),
            Lifetime::Span(span) => {
                let secs = (parse_span_millis(span)? / MILLIS_PER_SECOND).floor();
                // Outside this range the cast would saturate
                (secs.is_finite() && secs.abs() < MAX_SPAN_SECONDS).then_some(secs as i64)
            }
        }
    }
}

impl From<i64> for Lifetime {
    fn from(secs: i64) -> Self {
        Lifetime::Seconds(secs)
    }
}

impl From<i32> for Lifetime {
    fn from(secs: i32) -> Self {
        Lifetime::Seconds(i64::from(secs))
    }
}

impl From<&str> for Lifetime {
    fn from(span: &str) -> Self {
        Lifetime::Span(span.to_string())
    }
}

fn parse_span_millis(input: &str) -> Option<f64> {
    let input = input.trim();
    if input.is_empty() || input.len() > 100 {
        return None;
    }

    let split = input
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);
    let value: f64 = number.parse().ok()?;

    let factor = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => 1.0,
        "s" | "sec" | "secs" | "second" | "seconds" => MILLIS_PER_SECOND,
        "m" | "min" | "mins" | "minute" | "minutes" => MILLIS_PER_MINUTE,
        "h" | "hr" | "hrs" | "hour" | "hours" => MILLIS_PER_HOUR,
        "d" | "day" | "days" => MILLIS_PER_DAY,
        "w" | "week" | "weeks" => MILLIS_PER_WEEK,
        "y" | "yr" | "yrs" | "year" | "years" => MILLIS_PER_YEAR,
        _ => return None,
    };

    Some(value * factor)
}

/// Signing and verification options for a token
///
/// Named fields cover the options the bundled codec understands. Anything
/// else lands in `extra` and is forwarded to the codec untouched.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TokenConfig {
    /// Signing/verification key; stripped before options reach the codec
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    #[serde(rename = "jwtid", skip_serializing_if = "Option::is_none")]
    pub jwt_id: Option<String>,

    /// `kid` header written on signing
    #[serde(rename = "keyid", skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<Lifetime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<Lifetime>,

    /// Verification fails as expired once `iat + max_age` has passed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age: Option<Lifetime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<Algorithm>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_timestamp: Option<bool>,

    /// Leeway in seconds for time-based claim checks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clock_tolerance: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_expiration: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_not_before: Option<bool>,

    /// Codec-specific options with no named field
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_jwt_id(mut self, jwt_id: impl Into<String>) -> Self {
        self.jwt_id = Some(jwt_id.into());
        self
    }

    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    pub fn with_expires_in(mut self, lifetime: impl Into<Lifetime>) -> Self {
        self.expires_in = Some(lifetime.into());
        self
    }

    pub fn with_not_before(mut self, lifetime: impl Into<Lifetime>) -> Self {
        self.not_before = Some(lifetime.into());
        self
    }

    pub fn with_max_age(mut self, lifetime: impl Into<Lifetime>) -> Self {
        self.max_age = Some(lifetime.into());
        self
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    pub fn with_clock_tolerance(mut self, seconds: u64) -> Self {
        self.clock_tolerance = Some(seconds);
        self
    }

    pub fn with_no_timestamp(mut self, enabled: bool) -> Self {
        self.no_timestamp = Some(enabled);
        self
    }

    pub fn with_ignore_expiration(mut self, enabled: bool) -> Self {
        self.ignore_expiration = Some(enabled);
        self
    }

    pub fn with_ignore_not_before(mut self, enabled: bool) -> Self {
        self.ignore_not_before = Some(enabled);
        self
    }

    /// Set a codec-specific option
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Return a new config with `top` laid over `self`
    ///
    /// Every option set in `top` wins; options only set in `self` are kept.
    /// Neither side is modified.
    pub fn overlay(&self, top: &TokenConfig) -> TokenConfig {
        let mut extra = self.extra.clone();
        for (key, value) in &top.extra {
            extra.insert(key.clone(), value.clone());
        }

        TokenConfig {
            secret: pick(&top.secret, &self.secret),
            audience: pick(&top.audience, &self.audience),
            issuer: pick(&top.issuer, &self.issuer),
            subject: pick(&top.subject, &self.subject),
            jwt_id: pick(&top.jwt_id, &self.jwt_id),
            key_id: pick(&top.key_id, &self.key_id),
            expires_in: pick(&top.expires_in, &self.expires_in),
            not_before: pick(&top.not_before, &self.not_before),
            max_age: pick(&top.max_age, &self.max_age),
            algorithm: pick(&top.algorithm, &self.algorithm),
            no_timestamp: pick(&top.no_timestamp, &self.no_timestamp),
            clock_tolerance: pick(&top.clock_tolerance, &self.clock_tolerance),
            ignore_expiration: pick(&top.ignore_expiration, &self.ignore_expiration),
            ignore_not_before: pick(&top.ignore_not_before, &self.ignore_not_before),
            extra,
        }
    }

    /// Remove the secret from this config and return it (`""` if unset)
    pub fn take_secret(&mut self) -> String {
        self.secret.take().unwrap_or_default()
    }

    /// Whether `secret`, `audience` and `issuer` are all set and non-empty
    pub fn is_complete(&self) -> bool {
        [&self.secret, &self.audience, &self.issuer]
            .iter()
            .all(|value| value.as_deref().is_some_and(|v| !v.is_empty()))
    }
}

impl fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("audience", &self.audience)
            .field("issuer", &self.issuer)
            .field("subject", &self.subject)
            .field("jwt_id", &self.jwt_id)
            .field("key_id", &self.key_id)
            .field("expires_in", &self.expires_in)
            .field("not_before", &self.not_before)
            .field("max_age", &self.max_age)
            .field("algorithm", &self.algorithm)
            .field("no_timestamp", &self.no_timestamp)
            .field("clock_tolerance", &self.clock_tolerance)
            .field("ignore_expiration", &self.ignore_expiration)
            .field("ignore_not_before", &self.ignore_not_before)
            .field("extra", &self.extra)
            .finish()
    }
}

fn pick<T: Clone>(top: &Option<T>, base: &Option<T>) -> Option<T> {
    top.as_ref().or(base.as_ref()).cloned()
}

impl From<i64> for TokenConfig {
    fn from(expires_in: i64) -> Self {
        TokenConfig::new().with_expires_in(expires_in)
    }
}

impl From<i32> for TokenConfig {
    fn from(expires_in: i32) -> Self {
        TokenConfig::from(i64::from(expires_in))
    }
}

impl From<Lifetime> for TokenConfig {
    fn from(expires_in: Lifetime) -> Self {
        TokenConfig::new().with_expires_in(expires_in)
    }
}

impl From<&TokenConfig> for TokenConfig {
    fn from(config: &TokenConfig) -> Self {
        config.clone()
    }
}

impl From<Option<&TokenConfig>> for TokenConfig {
    fn from(config: Option<&TokenConfig>) -> Self {
        config.cloned().unwrap_or_default()
    }
}

/// Shared default configuration applied under every call-site config
///
/// Clones share the same underlying state.
#[derive(Debug, Clone, Default)]
pub struct Defaults {
    config: Arc<RwLock<TokenConfig>>,
}

impl Defaults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: TokenConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
        }
    }

    /// Shallow-merge `partial` into the defaults, overwriting existing keys
    pub fn set(&self, partial: &TokenConfig) {
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        *config = config.overlay(partial);
        debug!(
            "Token defaults updated (audience: {:?}, issuer: {:?})",
            config.audience, config.issuer
        );
    }

    /// Copy of the current defaults
    pub fn snapshot(&self) -> TokenConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Defaults overlaid with the call-site config, as a fresh value
    pub fn merge(&self, call: Option<&TokenConfig>) -> TokenConfig {
        let defaults = self.config.read().unwrap_or_else(PoisonError::into_inner);
        match call {
            Some(call) => defaults.overlay(call),
            None => defaults.clone(),
        }
    }
}

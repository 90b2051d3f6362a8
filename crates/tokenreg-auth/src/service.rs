//! Token service: generation, validation and named token types
//!
//! `TokenService` ties the shared [`Defaults`], the [`TypeRegistry`] and a
//! [`TokenCodec`] together. Every call merges its own copy of the options,
//! so calls never observe each other's configuration.
//!
//! # Example
//!
//! ```
//! use tokenreg_auth::{TokenConfig, TokenService};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let service = TokenService::new();
//! service.set_defaults(&TokenConfig::new().with_issuer("auth.example.com"));
//! service.register_type(
//!     "access",
//!     Some(
//!         &TokenConfig::new()
//!             .with_secret("change-me")
//!             .with_audience("api")
//!             .with_expires_in("15m"),
//!     ),
//! )?;
//!
//! let token = service.generate_type("access", None)?;
//! let claims = service.validate_type("access", &token)?.await?;
//! assert_eq!(claims["aud"], "api");
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::codec::{Claims, CodecError, JwtCodec, TokenCodec};
use crate::config::{Defaults, TokenConfig};
use crate::error::{ConfigError, TokenError, ValidationError};
use crate::registry::TypeRegistry;

/// Deferred validation result; resolves once with the payload or a classified error
pub type PendingValidation = BoxFuture<'static, Result<Claims, ValidationError>>;

/// Facade over defaults, the type registry and the token codec
#[derive(Clone)]
pub struct TokenService {
    defaults: Defaults,
    registry: TypeRegistry,
    codec: Arc<dyn TokenCodec>,
}

impl TokenService {
    /// Service with empty defaults, an empty registry and the JWT codec
    pub fn new() -> Self {
        Self::with_codec(Arc::new(JwtCodec::new()))
    }

    pub fn with_codec(codec: Arc<dyn TokenCodec>) -> Self {
        Self::from_parts(Defaults::new(), TypeRegistry::new(), codec)
    }

    /// Build a service over existing state containers
    ///
    /// Services built from clones of the same containers share defaults and
    /// registered types.
    pub fn from_parts(
        defaults: Defaults,
        registry: TypeRegistry,
        codec: Arc<dyn TokenCodec>,
    ) -> Self {
        Self {
            defaults,
            registry,
            codec,
        }
    }

    pub fn defaults(&self) -> &Defaults {
        &self.defaults
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    // ------------------------------------------------------------------
    // Configuration helpers
    // ------------------------------------------------------------------

    /// Shallow-merge `partial` into the defaults
    pub fn set_defaults(&self, partial: &TokenConfig) {
        self.defaults.set(partial);
    }

    /// Defaults overlaid with `config`; a copy of the defaults when `None`
    pub fn merge_config(&self, config: Option<&TokenConfig>) -> TokenConfig {
        self.defaults.merge(config)
    }

    /// Remove and return the secret from `config` (`""` if unset)
    pub fn extract_secret(config: &mut TokenConfig) -> String {
        config.take_secret()
    }

    // ------------------------------------------------------------------
    // Generation and validation
    // ------------------------------------------------------------------

    /// Sign `payload` (an empty object if `None`) with the merged config
    ///
    /// A bare number is accepted as the `expiresIn` value in seconds.
    /// Completeness of the config is not checked here; only registered
    /// types enforce it.
    pub fn generate(
        &self,
        payload: Option<&Claims>,
        config: impl Into<TokenConfig>,
    ) -> Result<String, CodecError> {
        let config = config.into();
        let mut options = self.merge_config(Some(&config));
        let secret = Self::extract_secret(&mut options);

        let empty = Claims::new();
        let token = self
            .codec
            .sign(payload.unwrap_or(&empty), &secret, &options)?;

        debug!(
            "Issued token (audience: {:?}, issuer: {:?})",
            options.audience, options.issuer
        );
        Ok(token)
    }

    /// Verify `token` with the merged config
    ///
    /// Options are captured when this is called, not when the returned
    /// future is polled. Failures only surface through the future.
    pub fn validate(&self, token: &str, config: Option<&TokenConfig>) -> PendingValidation {
        let mut options = self.merge_config(config);
        let secret = Self::extract_secret(&mut options);
        let codec = Arc::clone(&self.codec);
        let token = token.to_string();

        Box::pin(async move {
            match codec.verify(&token, &secret, &options).await {
                Ok(claims) => {
                    debug!("Token validated");
                    Ok(claims)
                }
                Err(e) => {
                    let error = ValidationError::from(e);
                    debug!("Token rejected: {}", error);
                    Err(error)
                }
            }
        })
    }

    // ------------------------------------------------------------------
    // Token types
    // ------------------------------------------------------------------

    /// Register a single token type
    ///
    /// `config` is merged with the current defaults and must end up with a
    /// non-empty secret, audience and issuer. An existing type with the same
    /// name is replaced.
    pub fn register_type(
        &self,
        name: &str,
        config: Option<&TokenConfig>,
    ) -> Result<(), ConfigError> {
        if name.is_empty() {
            return Err(ConfigError::MissingType);
        }

        let merged = self.merge_config(config);
        if !merged.is_complete() {
            warn!(
                "Rejected token type '{}': secret, audience and issuer are required",
                name
            );
            return Err(ConfigError::InvalidConfig(name.to_string()));
        }

        info!(
            "Registered token type '{}' (audience: {:?}, issuer: {:?})",
            name, merged.audience, merged.issuer
        );
        self.registry.insert(name, merged);
        Ok(())
    }

    /// Register several token types in order, stopping at the first failure
    ///
    /// Types registered before a failing entry stay registered.
    pub fn register_types<I, K>(&self, types: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, TokenConfig)>,
        K: AsRef<str>,
    {
        for (name, config) in types {
            self.register_type(name.as_ref(), Some(&config))?;
        }
        Ok(())
    }

    /// Register from loosely typed input
    ///
    /// An object is treated as a map of type name to configuration, registered
    /// in key order and stopping at the first failure. A string is a single
    /// type name registered with `config`. Falsy values
    /// (`null`, `false`, `0`, `""`) are rejected as missing; anything else
    /// is not a valid type name.
    pub fn register_value(
        &self,
        types: &Value,
        config: Option<&TokenConfig>,
    ) -> Result<(), ConfigError> {
        match types {
            Value::Null | Value::Bool(false) => Err(ConfigError::MissingType),
            Value::Number(n) if n.as_f64() == Some(0.0) => Err(ConfigError::MissingType),
            Value::String(name) => self.register_type(name, config),
            Value::Object(types) => {
                for (name, value) in types {
                    let type_config: TokenConfig = serde_json::from_value(value.clone())
                        .map_err(|source| ConfigError::Malformed {
                            name: name.clone(),
                            source,
                        })?;
                    self.register_type(name, Some(&type_config))?;
                }
                Ok(())
            }
            _ => Err(ConfigError::InvalidTypeName),
        }
    }

    /// Merged configuration registered under `name`
    pub fn get_type(&self, name: &str) -> Result<TokenConfig, ConfigError> {
        self.registry.get(name)
    }

    /// Names of all registered types, sorted
    pub fn registered_types(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Generate a token of a registered type
    pub fn generate_type(
        &self,
        name: &str,
        claims: Option<&Claims>,
    ) -> Result<String, TokenError> {
        let config = self.get_type(name)?;
        Ok(self.generate(claims, &config)?)
    }

    /// Validate a token against a registered type
    ///
    /// An unknown type fails immediately; token failures come through the
    /// returned future.
    pub fn validate_type(
        &self,
        name: &str,
        token: &str,
    ) -> Result<PendingValidation, ConfigError> {
        let config = self.get_type(name)?;
        Ok(self.validate(token, Some(&config)))
    }
}

impl Default for TokenService {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("defaults", &self.defaults)
            .field("types", &self.registry.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    use crate::config::Lifetime;

    /// Codec that records what it was given and returns a canned outcome
    struct RecordingCodec {
        calls: Mutex<Vec<(String, TokenConfig)>>,
        outcome: Result<Claims, CodecError>,
    }

    impl RecordingCodec {
        fn new(outcome: Result<Claims, CodecError>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                outcome,
            })
        }

        fn calls(&self) -> Vec<(String, TokenConfig)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TokenCodec for RecordingCodec {
        fn sign(
            &self,
            payload: &Claims,
            secret: &str,
            options: &TokenConfig,
        ) -> Result<String, CodecError> {
            self.calls
                .lock()
                .unwrap()
                .push((secret.to_string(), options.clone()));
            Ok(format!("signed:{}", serde_json::to_string(payload).unwrap()))
        }

        async fn verify(
            &self,
            _token: &str,
            secret: &str,
            options: &TokenConfig,
        ) -> Result<Claims, CodecError> {
            self.calls
                .lock()
                .unwrap()
                .push((secret.to_string(), options.clone()));
            self.outcome.clone()
        }
    }

    fn complete(audience: &str) -> TokenConfig {
        TokenConfig::new()
            .with_secret("s")
            .with_audience(audience)
            .with_issuer("i")
    }

    #[test]
    fn test_generate_strips_secret_from_options() {
        let codec = RecordingCodec::new(Ok(Claims::new()));
        let service = TokenService::with_codec(codec.clone());
        service.set_defaults(&TokenConfig::new().with_secret("default-secret").with_issuer("auth"));

        let token = service
            .generate(None, &TokenConfig::new().with_audience("api"))
            .unwrap();
        assert_eq!(token, "signed:{}");

        let calls = codec.calls();
        assert_eq!(calls.len(), 1);
        let (secret, options) = &calls[0];
        assert_eq!(secret, "default-secret");
        assert_eq!(options.secret, None);
        assert_eq!(options.audience.as_deref(), Some("api"));
        assert_eq!(options.issuer.as_deref(), Some("auth"));

        // Defaults keep their secret
        assert_eq!(service.defaults().snapshot().secret.as_deref(), Some("default-secret"));
    }

    #[test]
    fn test_generate_number_is_expires_in() {
        let codec = RecordingCodec::new(Ok(Claims::new()));
        let service = TokenService::with_codec(codec.clone());

        service.generate(None, 3600).unwrap();

        let (secret, options) = &codec.calls()[0];
        assert_eq!(secret, "");
        assert_eq!(options.expires_in, Some(Lifetime::Seconds(3600)));
    }

    #[test]
    fn test_generate_passes_payload() {
        let codec = RecordingCodec::new(Ok(Claims::new()));
        let service = TokenService::with_codec(codec);
        let payload = match json!({"user": 7}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };

        let token = service.generate(Some(&payload), None::<&TokenConfig>).unwrap();
        assert_eq!(token, r#"signed:{"user":7}"#);
    }

    #[tokio::test]
    async fn test_validate_classifies_by_kind() {
        let expired = TokenService::with_codec(RecordingCodec::new(Err(CodecError::expired(
            "jwt expired",
        ))));
        let err = expired.validate("t", None).await.unwrap_err();
        assert_eq!(err, ValidationError::Expired("jwt expired".to_string()));

        let invalid = TokenService::with_codec(RecordingCodec::new(Err(CodecError::invalid(
            "invalid signature",
        ))));
        let err = invalid.validate("t", None).await.unwrap_err();
        assert_eq!(err, ValidationError::Invalid("invalid signature".to_string()));
    }

    #[tokio::test]
    async fn test_validate_captures_options_at_call_time() {
        let codec = RecordingCodec::new(Ok(Claims::new()));
        let service = TokenService::with_codec(codec.clone());
        service.set_defaults(&TokenConfig::new().with_secret("first").with_audience("api"));

        let pending = service.validate("t", None);
        service.set_defaults(&TokenConfig::new().with_secret("second").with_audience("web"));
        pending.await.unwrap();

        let (secret, options) = &codec.calls()[0];
        assert_eq!(secret, "first");
        assert_eq!(options.audience.as_deref(), Some("api"));
        assert_eq!(options.secret, None);
    }

    #[test]
    fn test_register_type_merges_defaults() {
        let service = TokenService::with_codec(RecordingCodec::new(Ok(Claims::new())));
        service.set_defaults(&TokenConfig::new().with_expires_in("1h").with_issuer("auth"));

        service
            .register_type("x", Some(&TokenConfig::new().with_secret("s").with_audience("a")))
            .unwrap();

        let stored = service.get_type("x").unwrap();
        assert_eq!(stored.secret.as_deref(), Some("s"));
        assert_eq!(stored.audience.as_deref(), Some("a"));
        assert_eq!(stored.issuer.as_deref(), Some("auth"));
        assert_eq!(stored.expires_in, Some(Lifetime::Span("1h".to_string())));
    }

    #[test]
    fn test_register_type_rejects_incomplete() {
        let service = TokenService::with_codec(RecordingCodec::new(Ok(Claims::new())));

        let err = service
            .register_type("y", Some(&TokenConfig::new().with_secret("s")))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConfig(ref name) if name == "y"));
        assert!(!service.registry().contains("y"));

        assert!(matches!(
            service.register_type("", Some(&complete("a"))),
            Err(ConfigError::MissingType)
        ));
    }

    #[test]
    fn test_register_types_stops_at_first_failure() {
        let service = TokenService::with_codec(RecordingCodec::new(Ok(Claims::new())));

        let err = service
            .register_types(vec![
                ("a", complete("api")),
                ("b", TokenConfig::new().with_secret("s")),
                ("c", complete("web")),
            ])
            .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidConfig(ref name) if name == "b"));
        assert_eq!(service.registered_types(), vec!["a"]);
    }

    #[test]
    fn test_register_value_shapes() {
        let service = TokenService::with_codec(RecordingCodec::new(Ok(Claims::new())));

        for falsy in [json!(null), json!(false), json!(0), json!("")] {
            assert!(matches!(
                service.register_value(&falsy, None),
                Err(ConfigError::MissingType)
            ));
        }
        for wrong in [json!(true), json!(42), json!(["a"])] {
            assert!(matches!(
                service.register_value(&wrong, None),
                Err(ConfigError::InvalidTypeName)
            ));
        }

        service
            .register_value(&json!("single"), Some(&complete("api")))
            .unwrap();
        service
            .register_value(
                &json!({
                    "access": {"secret": "s", "audience": "api", "issuer": "i", "expiresIn": 900},
                    "refresh": {"secret": "r", "audience": "api", "issuer": "i", "expiresIn": "30d"}
                }),
                None,
            )
            .unwrap();

        assert_eq!(service.registered_types(), vec!["access", "refresh", "single"]);
        assert_eq!(
            service.get_type("refresh").unwrap().expires_in,
            Some(Lifetime::Span("30d".to_string()))
        );

        let err = service
            .register_value(&json!({"broken": {"clockTolerance": "soon"}}), None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { ref name, .. } if name == "broken"));
    }

    #[test]
    fn test_register_value_follows_key_order() {
        let service = TokenService::with_codec(RecordingCodec::new(Ok(Claims::new())));

        let err = service
            .register_value(
                &json!({
                    "zeta": {"secret": "s", "audience": "api", "issuer": "i"},
                    "broken": {"secret": "s"},
                    "alpha": {"secret": "s", "audience": "api", "issuer": "i"}
                }),
                None,
            )
            .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidConfig(ref name) if name == "broken"));
        assert_eq!(service.registered_types(), vec!["zeta"]);
    }

    #[test]
    fn test_unknown_type() {
        let service = TokenService::with_codec(RecordingCodec::new(Ok(Claims::new())));

        assert!(matches!(
            service.get_type("unregistered"),
            Err(ConfigError::UnknownType(_))
        ));
        assert!(matches!(
            service.generate_type("unregistered", None),
            Err(TokenError::Config(ConfigError::UnknownType(_)))
        ));
        assert!(service.validate_type("unregistered", "t").is_err());
        assert!(service.registered_types().is_empty());
    }

    #[tokio::test]
    async fn test_generate_and_validate_type_use_stored_config() {
        let codec = RecordingCodec::new(Ok(Claims::new()));
        let service = TokenService::with_codec(codec.clone());
        service.register_type("access", Some(&complete("api"))).unwrap();

        service.generate_type("access", None).unwrap();
        service.validate_type("access", "t").unwrap().await.unwrap();

        let calls = codec.calls();
        assert_eq!(calls.len(), 2);
        for (secret, options) in calls {
            assert_eq!(secret, "s");
            assert_eq!(options.secret, None);
            assert_eq!(options.audience.as_deref(), Some("api"));
        }

        // The stored entry still carries its secret
        assert_eq!(service.get_type("access").unwrap().secret.as_deref(), Some("s"));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let service = TokenService::with_codec(RecordingCodec::new(Ok(Claims::new())));
        service.set_defaults(&TokenConfig::new().with_secret("hunter2"));
        assert!(!format!("{:?}", service).contains("hunter2"));
    }
}

//! Signed, time-bounded tokens with named token types
//!
//! The crate issues and validates JSON Web Tokens through a [`TokenService`].
//! Options come from three layers: shared [`Defaults`], a per-call
//! [`TokenConfig`], and named types kept in a [`TypeRegistry`]. Signing and
//! verification go through the [`TokenCodec`] trait; [`JwtCodec`] is the
//! bundled HMAC implementation.
//!
//! Validation failures are always one of two [`ValidationError`] variants,
//! `Expired` or `Invalid`, so callers can ask for re-authentication on the
//! first and reject outright on the second.

pub mod codec;
pub mod config;
pub mod error;
pub mod registry;
pub mod service;

pub use codec::{Claims, CodecError, CodecErrorKind, JwtCodec, TokenCodec};
pub use config::{Defaults, Lifetime, TokenConfig};
pub use error::{ConfigError, TokenError, ValidationError};
pub use registry::TypeRegistry;
pub use service::{PendingValidation, TokenService};

// Re-export useful types
pub use async_trait::async_trait;
pub use jsonwebtoken::Algorithm;

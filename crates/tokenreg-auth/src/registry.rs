//! Named token types
//!
//! Each entry maps a type name to a configuration that has already been
//! merged with the defaults and checked for completeness. Entries are only
//! ever added or replaced; there is no removal.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::config::TokenConfig;
use crate::error::ConfigError;

/// Registry of token types, shareable across clones
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: Arc<RwLock<HashMap<String, TokenConfig>>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `config` under `name`, returning the entry it replaced
    ///
    /// No validation happens here; callers register through
    /// [`TokenService::register_type`](crate::TokenService::register_type).
    pub(crate) fn insert(&self, name: &str, config: TokenConfig) -> Option<TokenConfig> {
        let mut types = self.types.write().unwrap_or_else(PoisonError::into_inner);
        let previous = types.insert(name.to_string(), config);
        if previous.is_some() {
            debug!("Token type '{}' replaced", name);
        }
        previous
    }

    /// Copy of the configuration registered under `name`
    pub fn get(&self, name: &str) -> Result<TokenConfig, ConfigError> {
        self.types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered type names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.types.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Token-types file support
//!
//! Declares shared defaults and named token types in a single
//! `.tokenreg.yml` file, discovered from the current directory upward.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokenreg_auth::{TokenConfig, TokenService};
use tracing::info;

/// File names checked in each directory during discovery, in order
const FILE_NAMES: [&str; 2] = [".tokenreg.yml", ".tokenreg.yaml"];

/// Token-types file format
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TypesFile {
    /// Options applied under every type and ad-hoc call
    #[serde(default)]
    pub defaults: TokenConfig,

    /// Token type definitions, keyed by name
    #[serde(default)]
    pub types: BTreeMap<String, TokenConfig>,
}

impl TypesFile {
    /// Discover a types file from the current directory upward
    pub fn discover() -> Result<Option<(PathBuf, Self)>> {
        let current_dir = std::env::current_dir()?;
        Self::discover_from(&current_dir)
    }

    /// Discover a types file starting from a specific directory
    pub fn discover_from(start_dir: &Path) -> Result<Option<(PathBuf, Self)>> {
        let mut current = start_dir.to_path_buf();

        loop {
            for name in FILE_NAMES {
                let path = current.join(name);
                if path.exists() {
                    let file = Self::load(&path)?;
                    return Ok(Some((path, file)));
                }
            }

            if !current.pop() {
                break;
            }
        }

        Ok(None)
    }

    /// Load a types file from a specific path
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read token types file: {:?}", path))?;

        Self::parse(&content)
    }

    /// Parse a types file from YAML, expanding `${VAR}` references
    pub fn parse(content: &str) -> Result<Self> {
        let mut file: TypesFile =
            serde_yaml::from_str(content).context("Failed to parse token types YAML")?;

        expand_config(&mut file.defaults);
        for config in file.types.values_mut() {
            expand_config(config);
        }

        file.validate()?;
        Ok(file)
    }

    fn validate(&self) -> Result<()> {
        for name in self.types.keys() {
            if !is_valid_type_name(name) {
                anyhow::bail!(
                    "Invalid token type name '{}': must be alphanumeric with '-', '_' or '.' only",
                    name
                );
            }
        }
        Ok(())
    }

    /// Install the defaults, then register every type
    pub fn apply(&self, service: &TokenService) -> Result<()> {
        service.set_defaults(&self.defaults);
        service
            .register_types(
                self.types
                    .iter()
                    .map(|(name, config)| (name.as_str(), config.clone())),
            )
            .context("Failed to register token types")?;

        info!("Loaded {} token type(s)", self.types.len());
        Ok(())
    }

    /// Template types file content
    pub fn template() -> String {
        r#"# tokenreg token types
#
# Secrets support ${ENV_VAR} expansion; keep them out of version control.

defaults:
  issuer: "auth.example.com"
  clockTolerance: 5

types:
  access:
    secret: "${ACCESS_TOKEN_SECRET}"
    audience: "api.example.com"
    expiresIn: "15m"

  refresh:
    secret: "${REFRESH_TOKEN_SECRET}"
    audience: "auth.example.com"
    expiresIn: "30d"

  # password-reset:
  #   secret: "${RESET_TOKEN_SECRET}"
  #   audience: "app.example.com"
  #   expiresIn: "1h"
  #   maxAge: "1h"
"#
        .to_string()
    }
}

fn expand_config(config: &mut TokenConfig) {
    for value in [&mut config.secret, &mut config.audience, &mut config.issuer]
        .into_iter()
        .flatten()
    {
        *value = expand_env_vars(value);
    }
}

/// Check if a type name is valid (alphanumeric, hyphens, underscores, dots)
fn is_valid_type_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
}

/// Expand environment variables in a string
///
/// Supports `${VAR}` syntax. If the variable is not set, it expands to an
/// empty string.
pub fn expand_env_vars(input: &str) -> String {
    let Ok(re) = regex_lite::Regex::new(r"\$\{([^}]+)\}") else {
        return input.to_string();
    };

    let mut result = input.to_string();
    for cap in re.captures_iter(input) {
        let var_value = std::env::var(&cap[1]).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

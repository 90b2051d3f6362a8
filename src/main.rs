//! tokenreg CLI - issue and validate signed tokens from named token types
//!
//! Token types are read from the nearest `.tokenreg.yml` (or `--config`),
//! and ad-hoc flags can stand in for, or override, a registered type.

mod types_file;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokenreg_auth::{Claims, Lifetime, TokenConfig, TokenService, ValidationError};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::types_file::TypesFile;

/// tokenreg - issue and validate signed tokens
#[derive(Parser, Debug)]
#[command(name = "tokenreg")]
#[command(about = "Issue and validate signed tokens from named token types")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Token types file (defaults to the nearest .tokenreg.yml)
    #[arg(short, long, global = true, env = "TOKENREG_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Token type selection plus ad-hoc overrides
#[derive(Args, Debug, Default)]
struct TokenOptions {
    /// Registered token type
    #[arg(short = 't', long = "type")]
    token_type: Option<String>,

    /// Signing secret
    #[arg(long, env = "TOKENREG_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Audience claim
    #[arg(long)]
    audience: Option<String>,

    /// Issuer claim
    #[arg(long)]
    issuer: Option<String>,

    /// Subject claim
    #[arg(long)]
    subject: Option<String>,
}

impl TokenOptions {
    fn overrides(&self) -> TokenConfig {
        TokenConfig {
            secret: self.secret.clone(),
            audience: self.audience.clone(),
            issuer: self.issuer.clone(),
            subject: self.subject.clone(),
            ..TokenConfig::default()
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a signed token
    #[command(long_about = r#"
Generate a signed token, either from a registered token type or from
ad-hoc flags merged over the file's defaults.

EXAMPLES:
  # Token of a registered type
  tokenreg generate --type access --claims '{"user":"user-42"}'

  # Ad-hoc token valid for two hours
  tokenreg generate --secret "$SECRET" --audience api --issuer auth --expires-in 2h
    "#)]
    Generate {
        #[command(flatten)]
        options: TokenOptions,

        /// Claims as a JSON object
        #[arg(long)]
        claims: Option<String>,

        /// Lifetime in seconds or as a timespan (e.g. 15m, 2h, 7d)
        #[arg(long)]
        expires_in: Option<String>,
    },

    /// Validate a token and print its claims
    #[command(long_about = r#"
Validate a token and print its decoded claims as JSON.

EXIT CODES:
  0  token is valid
  1  token is invalid (bad signature, malformed, wrong audience, ...)
  2  token has expired
    "#)]
    Validate {
        #[command(flatten)]
        options: TokenOptions,

        /// Token to validate
        token: String,
    },

    /// List registered token types
    Types,

    /// Print (or write) a template token types file
    Init {
        /// Write the template to this path instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

/// Setup logging with the specified log level
fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "warn" };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Build the service from the explicit or discovered token types file
fn load_service(config: Option<&PathBuf>) -> Result<TokenService> {
    let service = TokenService::new();

    let file = match config {
        Some(path) => Some((path.clone(), TypesFile::load(path)?)),
        None => TypesFile::discover()?,
    };

    match file {
        Some((path, file)) => {
            info!("Using token types from {:?}", path);
            file.apply(&service)?;
        }
        None => debug!("No token types file found"),
    }

    Ok(service)
}

/// Resolve the effective call config: a registered type, overlaid with flags
fn call_config(service: &TokenService, options: &TokenOptions) -> Result<TokenConfig> {
    let overrides = options.overrides();
    match &options.token_type {
        Some(name) => Ok(service.get_type(name)?.overlay(&overrides)),
        None => Ok(overrides),
    }
}

fn parse_lifetime(input: &str) -> Lifetime {
    match input.trim().parse::<i64>() {
        Ok(secs) => Lifetime::Seconds(secs),
        Err(_) => Lifetime::Span(input.to_string()),
    }
}

fn parse_claims(input: Option<&str>) -> Result<Option<Claims>> {
    input
        .map(|raw| serde_json::from_str::<Claims>(raw).context("Claims must be a JSON object"))
        .transpose()
}

fn generate(
    service: &TokenService,
    options: &TokenOptions,
    claims: Option<&str>,
    expires_in: Option<&str>,
) -> Result<ExitCode> {
    let claims = parse_claims(claims)?;
    let mut config = call_config(service, options)?;
    if let Some(expires_in) = expires_in {
        config.expires_in = Some(parse_lifetime(expires_in));
    }

    let token = service
        .generate(claims.as_ref(), &config)
        .context("Failed to generate token")?;
    println!("{}", token);
    Ok(ExitCode::SUCCESS)
}

async fn validate(service: &TokenService, options: &TokenOptions, token: &str) -> Result<ExitCode> {
    let config = call_config(service, options)?;

    match service.validate(token, Some(&config)).await {
        Ok(claims) => {
            println!("{}", serde_json::to_string_pretty(&claims)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(ValidationError::Expired(message)) => {
            warn!("Token expired");
            eprintln!("Token expired: {}", message);
            Ok(ExitCode::from(2))
        }
        Err(ValidationError::Invalid(message)) => {
            warn!("Token invalid");
            eprintln!("Token invalid: {}", message);
            Ok(ExitCode::from(1))
        }
    }
}

fn list_types(service: &TokenService) -> Result<ExitCode> {
    let names = service.registered_types();
    if names.is_empty() {
        eprintln!("No token types registered");
        return Ok(ExitCode::SUCCESS);
    }

    for name in names {
        let config = service.get_type(&name)?;
        println!(
            "{}\taudience={}\tissuer={}\texpiresIn={}",
            name,
            config.audience.unwrap_or_default(),
            config.issuer.unwrap_or_default(),
            config
                .expires_in
                .map(|lifetime| match lifetime {
                    Lifetime::Seconds(secs) => format!("{}s", secs),
                    Lifetime::Span(span) => span,
                })
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn init(output: Option<&PathBuf>) -> Result<ExitCode> {
    let template = TypesFile::template();
    match output {
        Some(path) => {
            if path.exists() {
                anyhow::bail!("Refusing to overwrite existing file {:?}", path);
            }
            std::fs::write(path, template)
                .with_context(|| format!("Failed to write {:?}", path))?;
            eprintln!("Wrote token types template to {:?}", path);
        }
        None => print!("{}", template),
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(cli.verbose);

    match &cli.command {
        Commands::Init { output } => init(output.as_ref()),
        Commands::Types => {
            let service = load_service(cli.config.as_ref())?;
            list_types(&service)
        }
        Commands::Generate {
            options,
            claims,
            expires_in,
        } => {
            let service = load_service(cli.config.as_ref())?;
            generate(&service, options, claims.as_deref(), expires_in.as_deref())
        }
        Commands::Validate { options, token } => {
            let service = load_service(cli.config.as_ref())?;
            validate(&service, options, token).await
        }
    }
}

//! Ambient credential pickup
//!
//! nsgpush never signs in on its own. It reuses a session the user already
//! has, in this order:
//!
//! 1. `NSGPUSH_ACCESS_TOKEN`: a management-plane bearer token, used as-is.
//! 2. The Azure CLI: `az account get-access-token` for the ARM resource.
//!
//! # Environment Variables
//!
//! - `NSGPUSH_ACCESS_TOKEN`: Bearer token to use instead of asking the CLI.
//! - `NSGPUSH_AZ_COMMAND`: Program to run in place of `az` (used by tests and
//!   for non-standard installs).
//! - `AZURE_SUBSCRIPTION_ID`: Subscription fallback when none is configured.
//!
//! # Security
//!
//! - The CLI is spawned directly, without shell interpolation
//! - Tokens are never logged

use serde::Deserialize;
use std::io;
use tokio::process::Command;
use tracing::{debug, info};

pub const TOKEN_ENV: &str = "NSGPUSH_ACCESS_TOKEN";
pub const AZ_COMMAND_ENV: &str = "NSGPUSH_AZ_COMMAND";
pub const SUBSCRIPTION_ENV: &str = "AZURE_SUBSCRIPTION_ID";

/// Resource the token must be issued for
pub const MANAGEMENT_RESOURCE: &str = "https://management.azure.com/";

/// Error type for credential pickup
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// Azure CLI binary not found in PATH
    #[error("Azure CLI '{0}' not found - install it and run 'az login', or set NSGPUSH_ACCESS_TOKEN")]
    CliNotFound(String),

    /// CLI ran but reported failure (usually not logged in)
    #[error("'az account get-access-token' failed: {0} - run 'az login'")]
    CliFailed(String),

    /// CLI output was not the expected JSON
    #[error("Unexpected Azure CLI output: {0}")]
    InvalidOutput(String),

    /// Token variable present but empty
    #[error("{TOKEN_ENV} is set but empty")]
    EmptyToken,

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<CredentialError> for crate::core::error::Error {
    fn from(err: CredentialError) -> Self {
        crate::core::error::Error::Auth(err.to_string())
    }
}

/// A bearer token and what the session knows about its subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    /// Subscription the session is currently pointed at, if known
    pub subscription: Option<String>,
}

/// Shape of `az account get-access-token --output json`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
    access_token: String,
    #[serde(default)]
    subscription: Option<String>,
}

/// Checks if a binary exists in PATH (or is an existing path itself)
fn binary_exists(name: &str) -> bool {
    if name.contains(std::path::MAIN_SEPARATOR) {
        return std::path::Path::new(name).is_file();
    }
    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths).find_map(|dir| {
                let full_path = dir.join(name);
                if full_path.is_file() {
                    Some(full_path)
                } else {
                    None
                }
            })
        })
        .is_some()
}

/// Builds the CLI command that prints a management token.
///
/// Arguments are passed directly without shell interpretation.
pub fn create_token_command() -> Result<Command, CredentialError> {
    let program = std::env::var(AZ_COMMAND_ENV).unwrap_or_else(|_| "az".to_string());
    if !binary_exists(&program) {
        return Err(CredentialError::CliNotFound(program));
    }

    let mut cmd = Command::new(program);
    cmd.args([
        "account",
        "get-access-token",
        "--resource",
        MANAGEMENT_RESOURCE,
        "--output",
        "json",
    ]);
    Ok(cmd)
}

fn parse_cli_output(stdout: &[u8]) -> Result<AccessToken, CredentialError> {
    let parsed: CliToken = serde_json::from_slice(stdout)
        .map_err(|e| CredentialError::InvalidOutput(e.to_string()))?;
    if parsed.access_token.is_empty() {
        return Err(CredentialError::InvalidOutput(
            "accessToken is empty".to_string(),
        ));
    }
    Ok(AccessToken {
        token: parsed.access_token,
        subscription: parsed.subscription.filter(|s| !s.is_empty()),
    })
}

/// Obtains a bearer token from the ambient session.
///
/// # Errors
///
/// Returns `Err` if no token variable is set and the Azure CLI is missing,
/// fails, or prints something other than a token document.
pub async fn acquire_token() -> Result<AccessToken, CredentialError> {
    if let Ok(token) = std::env::var(TOKEN_ENV) {
        if token.trim().is_empty() {
            return Err(CredentialError::EmptyToken);
        }
        info!("Using bearer token from {TOKEN_ENV}");
        return Ok(AccessToken {
            token: token.trim().to_string(),
            subscription: None,
        });
    }

    debug!("Requesting management token from Azure CLI");
    let output = create_token_command()?
        .stdin(std::process::Stdio::null())
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(CredentialError::CliFailed(if stderr.is_empty() {
            format!("exit status {}", output.status)
        } else {
            stderr
        }));
    }

    let token = parse_cli_output(&output.stdout)?;
    info!("Using Azure CLI session");
    Ok(token)
}

/// Picks the subscription: explicit setting, then `AZURE_SUBSCRIPTION_ID`,
/// then whatever the CLI session reported.
pub fn resolve_subscription(configured: Option<&str>, session: Option<&str>) -> Option<String> {
    configured
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| {
            std::env::var(SUBSCRIPTION_ENV)
                .ok()
                .filter(|s| !s.is_empty())
        })
        .or_else(|| session.filter(|s| !s.is_empty()).map(str::to_string))
}

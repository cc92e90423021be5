//! Command-line interface parsing for cachewarden
//!
//! This module handles parsing of CLI arguments using clap and turning the
//! `fetch` subcommand's arguments into an intercepted request.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reqwest::Method;
use thiserror::Error;

use crate::http::Request;
use crate::version::VersionToken;

/// Methods accepted by the `fetch` subcommand
const METHODS: &[&str] = &["GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"];

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// The specified HTTP method is not recognized
    #[error("Invalid method: '{0}'. Valid methods: GET, HEAD, POST, PUT, PATCH, DELETE, OPTIONS")]
    InvalidMethod(String),

    /// A request body was given for a GET or HEAD request
    #[error("A request body cannot be sent with {0}")]
    UnexpectedBody(String),
}

/// cachewarden - versioned request cache with offline fallbacks
#[derive(Parser, Debug)]
#[command(name = "cachewarden")]
#[command(about = "Versioned request cache with install/activate lifecycle and offline fallbacks")]
#[command(version)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(
        long,
        short,
        value_name = "PATH",
        default_value = "cachewarden.toml",
        env = "CACHEWARDEN_CONFIG"
    )]
    pub config: PathBuf,

    /// Version token of the build being served (overrides the config file)
    #[arg(long = "version-token", value_name = "TOKEN", env = "CACHEWARDEN_VERSION")]
    pub version_token: Option<VersionToken>,

    /// Directory of the disk cache (overrides the config file)
    #[arg(long, value_name = "DIR", env = "CACHEWARDEN_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Log lifecycle and strategy decisions
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Install and activate the configured version
    Deploy,

    /// Send one request through the active version
    ///
    /// Examples:
    ///   cachewarden fetch /app.js
    ///   cachewarden fetch --navigate /lessons/3
    ///   cachewarden fetch -X POST -d '{"done":true}' /api/progress
    Fetch {
        /// URL, absolute or relative to the configured origin
        url: String,

        /// Treat the request as a document navigation
        #[arg(long)]
        navigate: bool,

        /// HTTP method
        #[arg(long, short = 'X', default_value = "GET")]
        method: String,

        /// Request body
        #[arg(long, short = 'd')]
        data: Option<String>,
    },

    /// List cache generations and their entry counts
    Generations,
}

/// Parses a method argument, case-insensitively
pub fn parse_method_arg(s: &str) -> Result<Method, CliError> {
    let upper = s.to_ascii_uppercase();
    if !METHODS.contains(&upper.as_str()) {
        return Err(CliError::InvalidMethod(s.to_string()));
    }
    Method::from_bytes(upper.as_bytes()).map_err(|_| CliError::InvalidMethod(s.to_string()))
}

/// Builds the request described by `fetch` arguments
pub fn build_request(
    url: &str,
    navigate: bool,
    method: &str,
    data: Option<&str>,
) -> Result<Request, CliError> {
    let method = parse_method_arg(method)?;
    if data.is_some() && (method == Method::GET || method == Method::HEAD) {
        return Err(CliError::UnexpectedBody(method.to_string()));
    }

    let mut request = if navigate && method == Method::GET {
        Request::navigate(url)
    } else {
        Request::new(method, url)
    };
    if let Some(data) = data {
        request = request.with_body(data.to_string());
    }
    Ok(request)
}

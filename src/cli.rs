//! CLI argument parsing, validation, and startup helpers.

use crate::ServerConfig;
use crate::jwt::TokenLifetimes;
use crate::rate_limit::RateLimitConfig;
use crate::users::{MemoryDirectory, hash_password};
use clap::Parser;
use std::io::BufRead;
use std::sync::Arc;
use tracing::{error, info};
use url::Url;

const MIN_SECRET_LENGTH: usize = 32;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "sessionward",
    about = "Session service with access tokens, refresh tokens, and inactivity expiry"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "7291")]
    pub port: u16,

    /// JSON file listing users with argon2 password hashes
    #[arg(short, long, env = "USERS_FILE", default_value = "users.json")]
    pub users_file: String,

    /// Public origin of the service (e.g., "https://example.com"). HTTPS enables Secure cookies
    #[arg(long, env = "PUBLIC_ORIGIN", default_value = "http://localhost:7291")]
    pub public_origin: String,

    /// Path to file containing the access token secret. Prefer the ACCESS_SECRET env var
    #[arg(long)]
    pub access_secret_file: Option<String>,

    /// Path to file containing the refresh token secret. Prefer the REFRESH_SECRET env var
    #[arg(long)]
    pub refresh_secret_file: Option<String>,

    /// Path to file containing the activity cookie secret. Prefer the COOKIE_SECRET env var
    #[arg(long)]
    pub cookie_secret_file: Option<String>,

    /// Access token lifetime in minutes
    #[arg(long, env = "ACCESS_TTL_MINUTES", default_value = "15")]
    pub access_ttl_minutes: u64,

    /// Refresh token lifetime in days
    #[arg(long, env = "REFRESH_TTL_DAYS", default_value = "14")]
    pub refresh_ttl_days: u64,

    /// Idle minutes after which a session must log in again
    #[arg(long, env = "INACTIVITY_MINUTES", default_value = "30")]
    pub inactivity_minutes: u64,

    /// Rate limit logins by the first X-Forwarded-For hop (only behind a trusted proxy)
    #[arg(long)]
    pub trust_forwarded_for: bool,

    /// Read a password from stdin, print its argon2 hash for the users file, and exit
    #[arg(long)]
    pub hash_password: bool,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load a secret from environment variable `env_var` or from `file`.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_secret(env_var: &str, file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var(env_var) {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var(env_var) };
        secret
    } else if let Some(path) = file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read secret file");
                return None;
            }
        }
    } else {
        error!(
            env_var,
            "Secret is required. Set the environment variable (recommended) or use the matching --*-secret-file flag"
        );
        return None;
    };

    if secret.len() < MIN_SECRET_LENGTH {
        error!(
            env_var,
            "Secret is shorter than {} characters. Use a longer secret", MIN_SECRET_LENGTH
        );
        return None;
    }

    Some(secret)
}

/// Secrets for the three signers. Access and refresh must differ.
pub struct Secrets {
    pub access: String,
    pub refresh: String,
    pub cookie: String,
}

pub fn load_secrets(args: &Args) -> Option<Secrets> {
    let access = load_secret("ACCESS_SECRET", args.access_secret_file.as_deref())?;
    let refresh = load_secret("REFRESH_SECRET", args.refresh_secret_file.as_deref())?;
    let cookie = load_secret("COOKIE_SECRET", args.cookie_secret_file.as_deref())?;

    if access == refresh {
        error!("ACCESS_SECRET and REFRESH_SECRET must differ");
        return None;
    }

    Some(Secrets {
        access,
        refresh,
        cookie,
    })
}

/// Parse and validate the public origin URL.
/// Returns None and logs an error if validation fails.
pub fn validate_public_origin(public_origin: &str) -> Option<Url> {
    let url = match Url::parse(public_origin) {
        Ok(url) => url,
        Err(e) => {
            error!(origin = %public_origin, error = %e, "Invalid public-origin URL");
            return None;
        }
    };

    let is_https = url.scheme() == "https";
    let is_localhost = url.host_str() == Some("localhost");

    if !is_https && !is_localhost {
        error!("public-origin must use HTTPS for non-localhost deployments");
        return None;
    }

    Some(url)
}

/// Load the user directory, logging errors if it fails.
pub fn load_users(path: &str) -> Option<MemoryDirectory> {
    match MemoryDirectory::load(path) {
        Ok(users) => {
            info!(path = %path, users = users.len(), "User directory loaded");
            Some(users)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to load user directory");
            None
        }
    }
}

/// Handle the --hash-password flag: hash one line from stdin and print it.
pub fn handle_hash_password() {
    let mut line = String::new();
    if let Err(e) = std::io::stdin().lock().read_line(&mut line) {
        error!(error = %e, "Failed to read password from stdin");
        std::process::exit(1);
    }

    let password = line.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        error!("Password must not be empty");
        std::process::exit(1);
    }

    match hash_password(password) {
        Ok(hash) => println!("{}", hash),
        Err(e) => {
            error!(error = %e, "Failed to hash password");
            std::process::exit(1);
        }
    }
}

/// Build ServerConfig from validated arguments.
pub fn build_config(
    args: &Args,
    secrets: Secrets,
    public_origin: &Url,
    users: MemoryDirectory,
) -> ServerConfig {
    let secure_cookies = public_origin.scheme() == "https";

    ServerConfig {
        access_secret: secrets.access.into_bytes(),
        refresh_secret: secrets.refresh.into_bytes(),
        cookie_secret: secrets.cookie.into_bytes(),
        lifetimes: TokenLifetimes {
            access_secs: args.access_ttl_minutes.saturating_mul(60),
            refresh_secs: args.refresh_ttl_days.saturating_mul(24 * 60 * 60),
        },
        inactivity_secs: args.inactivity_minutes.saturating_mul(60),
        secure_cookies,
        users: Arc::new(users),
        rate_limit: RateLimitConfig::new(args.trust_forwarded_for),
        // The binary serves only the session endpoints; nothing sits behind a response cache.
        response_cache: None,
    }
}

//! CLI argument parsing, validation, and startup helpers.

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderName;
use clap::Parser;
use rand::Rng;
use rand::distr::Alphanumeric;
use tracing::{error, info};

use crate::ServerConfig;
use crate::auth::{AuthService, AuthSettings};
use crate::cache::{MemoryCache, SessionCache};
use crate::clock::{Clock, SystemClock};
use crate::db::{ADMIN_ROLE, Database};
use crate::password::PasswordHasher;

const MIN_JWT_SECRET_LENGTH: usize = 32;

/// Length of generated admin passwords.
const ADMIN_PASSWORD_LENGTH: usize = 20;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

/// Storage for blacklist, refresh sessions and failure counters.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CacheBackend {
    /// Shared through the database file, visible to every instance using it
    #[default]
    Sqlite,
    /// In-process only
    Memory,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "Gatehouse",
    about = "Bearer token authentication service with login lockout"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "GATEHOUSE_PORT", default_value = "8080")]
    pub port: u16,

    /// Path to SQLite database file (":memory:" for a throwaway database)
    #[arg(short, long, env = "GATEHOUSE_DATABASE", default_value = "gatehouse.db")]
    pub database: String,

    /// Path to file containing JWT secret. Prefer using JWT_SECRET env var instead
    #[arg(long)]
    pub jwt_secret_file: Option<String>,

    /// Access token lifetime in seconds
    #[arg(long, env = "GATEHOUSE_ACCESS_TTL_SECS", default_value = "3600", value_parser = clap::value_parser!(u64).range(1..))]
    pub access_ttl_secs: u64,

    /// Refresh token lifetime in seconds
    #[arg(long, env = "GATEHOUSE_REFRESH_TTL_SECS", default_value = "604800", value_parser = clap::value_parser!(u64).range(1..))]
    pub refresh_ttl_secs: u64,

    /// Consecutive failed logins that lock an account
    #[arg(long, env = "GATEHOUSE_MAX_LOGIN_FAILURES", default_value = "5", value_parser = clap::value_parser!(u32).range(1..))]
    pub max_login_failures: u32,

    /// How long a locked account stays locked, in minutes
    #[arg(long, env = "GATEHOUSE_LOCK_MINUTES", default_value = "30", value_parser = clap::value_parser!(u64).range(1..))]
    pub lock_minutes: u64,

    /// Header carrying the bearer token
    #[arg(long, env = "GATEHOUSE_TOKEN_HEADER", default_value = "Authorization", value_parser = parse_header_name)]
    pub token_header: HeaderName,

    /// Scheme word in front of the token
    #[arg(long, env = "GATEHOUSE_TOKEN_PREFIX", default_value = "Bearer", value_parser = validate_token_prefix)]
    pub token_prefix: String,

    /// Cache backend
    #[arg(long, env = "GATEHOUSE_CACHE", default_value = "sqlite")]
    pub cache: CacheBackend,

    /// Take the client IP from X-Forwarded-For (only behind a trusted proxy)
    #[arg(long, env = "GATEHOUSE_TRUST_FORWARDED_FOR")]
    pub trust_forwarded_for: bool,

    /// Login requests allowed per minute per IP
    #[arg(long, env = "GATEHOUSE_LOGIN_RATE_PER_MINUTE", default_value = "20")]
    pub login_rate_per_minute: u32,

    /// Registrations allowed per minute per IP
    #[arg(long, env = "GATEHOUSE_REGISTER_RATE_PER_MINUTE", default_value = "5")]
    pub register_rate_per_minute: u32,

    /// Create an admin user with a generated password and print it
    #[arg(long, value_name = "USERNAME")]
    pub create_admin: Option<String>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

fn parse_header_name(s: &str) -> Result<HeaderName, String> {
    HeaderName::try_from(s).map_err(|e| format!("Invalid header name {:?}: {}", s, e))
}

fn validate_token_prefix(s: &str) -> Result<String, String> {
    if s.is_empty() {
        return Err("Token prefix must not be empty".to_string());
    }
    if s.chars().any(|c| !c.is_ascii() || c.is_whitespace()) {
        return Err(format!("Token prefix contains invalid characters: {}", s));
    }
    Ok(s.to_string())
}

impl Args {
    /// Authentication settings from the parsed flags.
    pub fn auth_settings(&self) -> AuthSettings {
        AuthSettings {
            access_ttl: Duration::from_secs(self.access_ttl_secs),
            refresh_ttl: Duration::from_secs(self.refresh_ttl_secs),
            max_login_failures: self.max_login_failures,
            lock_duration: Duration::from_secs(self.lock_minutes.saturating_mul(60)),
            token_header: self.token_header.clone(),
            token_prefix: self.token_prefix.clone(),
        }
    }
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load JWT secret from environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_jwt_secret(jwt_secret_file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var("JWT_SECRET") {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var("JWT_SECRET") };
        secret
    } else if let Some(path) = jwt_secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read JWT secret file");
                return None;
            }
        }
    } else {
        error!(
            "JWT secret is required. Set JWT_SECRET environment variable (recommended) or use --jwt-secret-file"
        );
        return None;
    };

    if secret.len() < MIN_JWT_SECRET_LENGTH {
        error!(
            "JWT secret is shorter than {} characters. Use a longer secret",
            MIN_JWT_SECRET_LENGTH
        );
        return None;
    }

    Some(secret)
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}

fn generate_password() -> String {
    // Guarantee one character of each required class
    let mut rng = rand::rng();
    let random: String = (0..ADMIN_PASSWORD_LENGTH - 3)
        .map(|_| char::from(rng.sample(Alphanumeric)))
        .collect();
    format!("Aa1{}", random)
}

/// Handle the --create-admin flag: create an admin with a generated password.
/// Exits the process if the user cannot be created.
pub async fn handle_create_admin(db: &Database, jwt_secret: &str, username: &str) {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let service = AuthService::new(
        db,
        SessionCache::new(Arc::new(MemoryCache::new(clock.clone()))),
        jwt_secret.as_bytes(),
        PasswordHasher::default(),
        AuthSettings::default(),
        clock,
    );

    if let Err(e) = crate::auth::validate_username(username) {
        error!(username = %username, error = %e, "Invalid admin username");
        std::process::exit(1);
    }

    let password = generate_password();
    match service
        .create_user(username, None, &password, ADMIN_ROLE)
        .await
    {
        Ok(_) => {
            println!();
            println!("Admin user created: {}", username);
            println!("Password: {}", password);
            println!();
        }
        Err(e) => {
            error!(username = %username, error = %e, "Failed to create admin user");
            std::process::exit(1);
        }
    }
}

/// Build ServerConfig from validated arguments.
pub fn build_config(args: &Args, db: Database, jwt_secret: String) -> ServerConfig {
    ServerConfig {
        db,
        jwt_secret: jwt_secret.into_bytes(),
        settings: args.auth_settings(),
        cache_backend: args.cache,
        clock: Arc::new(SystemClock),
        password_hasher: PasswordHasher::default(),
        trust_forwarded_for: args.trust_forwarded_for,
        login_rate_per_minute: args.login_rate_per_minute,
        register_rate_per_minute: args.register_rate_per_minute,
    }
}

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

/// Server settings, read from `FINDER_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub storage_dir: PathBuf,
    pub public_url: String,
    pub max_photo_bytes: usize,
    pub token_ttl_days: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = lookup("FINDER_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("FINDER_JWT_SECRET is unset or still a placeholder; set it in your .env file");
        }

        let host = var("FINDER_HOST", "0.0.0.0");
        let port: u16 = var("FINDER_PORT", "3000")
            .parse()
            .context("FINDER_PORT must be a port number")?;
        let default_max_photo = finder_api::DEFAULT_MAX_PHOTO_BYTES.to_string();
        let max_photo_bytes: usize = var("FINDER_MAX_PHOTO_BYTES", &default_max_photo)
            .parse()
            .context("FINDER_MAX_PHOTO_BYTES must be a byte count")?;
        let token_ttl_days: i64 = var("FINDER_TOKEN_TTL_DAYS", "30")
            .parse()
            .context("FINDER_TOKEN_TTL_DAYS must be a whole number of days")?;
        if token_ttl_days <= 0 {
            bail!("FINDER_TOKEN_TTL_DAYS must be positive");
        }

        Ok(Self {
            public_url: var("FINDER_PUBLIC_URL", &format!("http://localhost:{}", port)),
            db_path: var("FINDER_DB_PATH", "finder.db").into(),
            storage_dir: var("FINDER_STORAGE_DIR", "./photo-storage").into(),
            host,
            port,
            jwt_secret,
            max_photo_bytes,
            token_ttl_days,
        })
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Used when `RUST_LOG` is unset. `vyn` covers every `vyn_*` crate by prefix.
pub const DEFAULT_LOG_FILTER: &str = "vyn=debug,tower_http=debug";

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    /// How long a push to a recipient may take before it counts as failed
    pub send_timeout: Duration,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = get("VYN_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("VYN_JWT_SECRET is unset or still a placeholder; it must match the auth service's secret");
        }

        let host = get("VYN_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = get("VYN_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("VYN_PORT must be a port number")?;
        let db_path: PathBuf = get("VYN_DB_PATH").unwrap_or_else(|| "vyn.db".into()).into();
        let send_timeout_ms: u64 = get("VYN_SEND_TIMEOUT_MS")
            .unwrap_or_else(|| "5000".into())
            .parse()
            .context("VYN_SEND_TIMEOUT_MS must be a number of milliseconds")?;

        Ok(Self {
            host,
            port,
            db_path,
            jwt_secret,
            send_timeout: Duration::from_millis(send_timeout_ms),
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .context("invalid VYN_HOST/VYN_PORT")
    }
}

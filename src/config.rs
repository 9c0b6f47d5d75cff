use std::{path::PathBuf, str::FromStr};

use anyhow::{bail, Context};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub handshake_ttl_secs: i64,
    pub session_ttl_secs: i64,
    pub remember_me_ttl_secs: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown STORE_BACKEND `{other}`"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_host: String,
    pub app_port: u16,
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub jwt: JwtConfig,
    /// Turns on `Secure` session cookies.
    pub production: bool,
    pub event_log_path: PathBuf,
    pub admin_setup_token: Option<String>,
    pub admin_assets_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let secret = get("SESSION_SECRET").context("SESSION_SECRET must be set")?;

        let store_backend = match get("STORE_BACKEND") {
            Some(v) => v.parse()?,
            None => StoreBackend::Postgres,
        };
        let database_url = get("DATABASE_URL");
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            bail!("DATABASE_URL must be set when STORE_BACKEND=postgres");
        }

        let jwt = JwtConfig {
            secret,
            issuer: get("JWT_ISSUER").unwrap_or_else(|| "vrdash".into()),
            audience: get("JWT_AUDIENCE").unwrap_or_else(|| "vrdash-admin".into()),
            handshake_ttl_secs: parse_or(&get, "HANDSHAKE_TTL_SECS", 60)?,
            session_ttl_secs: parse_or(&get, "SESSION_TTL_SECS", 24 * 60 * 60)?,
            remember_me_ttl_secs: parse_or(&get, "REMEMBER_ME_TTL_SECS", 30 * 24 * 60 * 60)?,
        };

        Ok(Self {
            app_host: get("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            app_port: parse_or(&get, "APP_PORT", 8080)?,
            store_backend,
            database_url,
            database_max_connections: parse_or(&get, "DATABASE_MAX_CONNECTIONS", 10)?,
            jwt,
            production: get("APP_ENV").is_some_and(|v| v.eq_ignore_ascii_case("production")),
            event_log_path: get("EVENT_LOG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("logs/app.log")),
            admin_setup_token: get("ADMIN_SETUP_TOKEN"),
            admin_assets_dir: get("ADMIN_ASSETS_DIR").map(PathBuf::from),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {key}: {e}")),
        None => Ok(default),
    }
}

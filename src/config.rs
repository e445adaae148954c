use std::env;

use thiserror::Error;

use crate::auth::JwtSettings;
use crate::scheduler::DEFAULT_INTERVAL_MINUTES;

const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("{0} must be at least 32 characters long")]
    WeakSecret(&'static str),
    #[error("invalid value {value:?} for {var}")]
    Invalid { var: &'static str, value: String },
    #[error("BOOTSTRAP_ADMIN_EMAIL and BOOTSTRAP_ADMIN_PASSWORD must be set together")]
    PartialAdmin,
}

/// Credentials for an admin account ensured at boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub jwt_ttl_hours: i64,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub bind_addr: String,
    pub port: u16,
    pub frontend_url: String,
    pub scheduler_enabled: bool,
    pub scheduler_interval_minutes: u64,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

fn var(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { var: name, value: raw }),
    }
}

fn flag(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match var(name).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid { var: name, value: v }),
        },
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = var("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        if jwt_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::WeakSecret("JWT_SECRET"));
        }

        let jwt_ttl_hours: i64 = parsed("JWT_TTL_HOURS", 24)?;
        if jwt_ttl_hours < 1 {
            return Err(ConfigError::Invalid { var: "JWT_TTL_HOURS", value: jwt_ttl_hours.to_string() });
        }
        let scheduler_interval_minutes: u64 = parsed("SCHEDULER_INTERVAL_MINUTES", DEFAULT_INTERVAL_MINUTES)?;
        if scheduler_interval_minutes == 0 {
            return Err(ConfigError::Invalid { var: "SCHEDULER_INTERVAL_MINUTES", value: "0".into() });
        }

        let bootstrap_admin = match (var("BOOTSTRAP_ADMIN_EMAIL"), var("BOOTSTRAP_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(BootstrapAdmin {
                email,
                password,
                name: var("BOOTSTRAP_ADMIN_NAME").unwrap_or_else(|| "Administrador".into()),
            }),
            (None, None) => None,
            _ => return Err(ConfigError::PartialAdmin),
        };

        Ok(AppConfig {
            jwt_secret,
            jwt_ttl_hours,
            database_url: var("DATABASE_URL"),
            db_max_connections: parsed("DB_MAX_CONNECTIONS", 5)?,
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed("PORT", 8080)?,
            frontend_url: var("FRONTEND_URL").unwrap_or_else(|| "http://localhost:5173".into()),
            scheduler_enabled: flag("SCHEDULER_ENABLED", true)?,
            scheduler_interval_minutes,
            bootstrap_admin,
        })
    }

    pub fn jwt_settings(&self) -> JwtSettings {
        JwtSettings { secret: self.jwt_secret.clone(), ttl: chrono::Duration::hours(self.jwt_ttl_hours) }
    }
}

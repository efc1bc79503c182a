use std::env;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8069;
pub const DEFAULT_DATABASE_PATH: &str = "socialnet.db";
pub const DEFAULT_JWT_SECRET: &str = "default_jwt_secret_change_me";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be a number, got {value:?}")]
    NotANumber { name: &'static str, value: String },
    #[error("WORKERS must be at least 1")]
    NoWorkers,
}

/// Server settings read from the environment
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub jwt_secret: String,
    pub workers: usize,
}

impl Config {
    /// Read `PORT`, `DATABASE_PATH`, `JWT_SECRET` and `WORKERS`.
    /// Call `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match lookup("PORT") {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::NotANumber { name: "PORT", value })?,
            None => DEFAULT_PORT,
        };

        let workers = match lookup("WORKERS") {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::NotANumber { name: "WORKERS", value })?,
            None => 1,
        };
        if workers == 0 {
            return Err(ConfigError::NoWorkers);
        }

        let database_path = lookup("DATABASE_PATH").unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string());

        let jwt_secret = lookup("JWT_SECRET").filter(|s| !s.is_empty()).unwrap_or_else(|| {
            log::warn!("JWT_SECRET not set, using default (not secure for production!)");
            DEFAULT_JWT_SECRET.to_string()
        });

        Ok(Self {
            port,
            database_path,
            jwt_secret,
            workers,
        })
    }
}

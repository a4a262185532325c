//! Service configuration parsed from environment variables.
//!
//! Every knob has a default so a bare `cargo run` serves the bundled catalog
//! with an in-memory account store. `DATABASE_URL` switches accounts to Postgres.

use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_CATALOG_PATH: &str = "data/raid_catalog.yaml";
/// Nominal raid lifetime. Advisory only; nothing expires raids on this timer.
pub const DEFAULT_RAID_SESSION_TTL_SECS: i64 = 2 * 24 * 60 * 60;
pub const DEFAULT_DEV_SESSION_KEY: &str = "dev";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub catalog_path: PathBuf,
    pub raid_session_ttl_secs: i64,
    /// Session key of the seeded account when running without Postgres.
    pub dev_session_key: String,
}

impl AppConfig {
    /// Build typed config from environment variables.
    ///
    /// Optional:
    /// - `PORT`: default 3000
    /// - `DATABASE_URL`: in-memory account store when absent
    /// - `DB_MAX_CONNECTIONS`: default 5
    /// - `RAID_CATALOG_PATH`: default `data/raid_catalog.yaml`
    /// - `RAID_SESSION_TTL_SECS`: default two days
    /// - `RAID_DEV_SESSION_KEY`: default `dev`
    #[must_use]
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());
        let catalog_path = std::env::var("RAID_CATALOG_PATH").map_or_else(|_| PathBuf::from(DEFAULT_CATALOG_PATH), PathBuf::from);
        let dev_session_key =
            std::env::var("RAID_DEV_SESSION_KEY").unwrap_or_else(|_| DEFAULT_DEV_SESSION_KEY.to_string());

        Self {
            port: env_parse("PORT", DEFAULT_PORT),
            database_url,
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            catalog_path,
            raid_session_ttl_secs: env_parse("RAID_SESSION_TTL_SECS", DEFAULT_RAID_SESSION_TTL_SECS),
            dev_session_key,
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

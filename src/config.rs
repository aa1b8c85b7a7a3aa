use crate::error::{AppError, Result};

pub const FEED_BASE_URL: &str =
    "https://site.api.espn.com/apis/site/v2/sports/football/nfl/scoreboard";

/// Score/schedule sync interval (seconds).
pub const SYNC_INTERVAL_SECS: u64 = 300;

/// Feed fetch timeout (seconds). One reconciliation run is expected to finish
/// well inside this budget.
pub const FEED_TIMEOUT_SECS: u64 = 20;

/// Regular-season feed query parameter (1=pre, 2=regular, 3=post).
pub const FEED_SEASON_TYPE: u8 = 2;

#[derive(Debug, Clone)]
pub struct Config {
    pub feed_url: String,
    pub log_level: String,
    pub db_path: String,
    /// Season to sync (SEASON_YEAR). Required — the core never guesses the
    /// season from the wall clock.
    pub season_year: i32,
    /// Sync loop interval override in seconds (SYNC_INTERVAL_SECS).
    pub sync_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            feed_url: std::env::var("FEED_URL").unwrap_or_else(|_| FEED_BASE_URL.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "pickem.db".to_string()),
            season_year: std::env::var("SEASON_YEAR")
                .map_err(|_| AppError::Config("SEASON_YEAR must be set".to_string()))?
                .parse::<i32>()
                .map_err(|_| AppError::Config("SEASON_YEAR must be an integer year".to_string()))?,
            sync_interval_secs: std::env::var("SYNC_INTERVAL_SECS")
                .unwrap_or_else(|_| SYNC_INTERVAL_SECS.to_string())
                .parse::<u64>()
                .unwrap_or(SYNC_INTERVAL_SECS),
        })
    }
}

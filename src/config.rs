use super::error::ConfigError;
use super::transition::TransitionPolicy;
use std::{env, fmt::Display, path::PathBuf, str::FromStr};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewConfig {
    pub db_path: PathBuf,
    pub log_filter: String,
    pub verifying_reentry: bool,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("payment_review.db"),
            log_filter: "info".to_owned(),
            verifying_reentry: true,
        }
    }
}

impl ReviewConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            db_path: try_load("REVIEW_DB_PATH", "payment_review.db")?,
            log_filter: try_load("REVIEW_LOG_FILTER", "info")?,
            verifying_reentry: try_load("REVIEW_VERIFYING_REENTRY", "true")?,
        })
    }

    pub fn policy(&self) -> TransitionPolicy {
        TransitionPolicy::new(self.verifying_reentry)
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn try_load<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let value = var(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    value.parse().map_err(|e: T::Err| {
        warn!("Invalid {key} value: {e}");
        ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }
    })
}

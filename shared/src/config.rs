use std::{env, fmt::Display, str::FromStr};

use tracing::{info, warn};

const DEFAULT_TABLE_NAME: &str = "ldl-portal";
const DEFAULT_COMMIT_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub table_name: String,
    /// Optimistic retries for the attendance transaction
    pub attendance_commit_attempts: u32,
    /// Trust `X-User-Id` when no JWT claim is present. Local development only.
    pub allow_identity_header: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let table_name = lookup("TABLE_NAME").unwrap_or_else(|| {
            info!("TABLE_NAME not set, using default: {DEFAULT_TABLE_NAME}");
            DEFAULT_TABLE_NAME.to_string()
        });

        let attendance_commit_attempts: u32 = try_load(
            &lookup,
            "ATTENDANCE_COMMIT_ATTEMPTS",
            DEFAULT_COMMIT_ATTEMPTS,
        );

        let allow_identity_header: bool = try_load(&lookup, "ALLOW_DEV_IDENTITY_HEADER", false);
        if allow_identity_header {
            warn!("ALLOW_DEV_IDENTITY_HEADER is set, X-User-Id is trusted without a token");
        }

        Self {
            table_name,
            attendance_commit_attempts: attendance_commit_attempts.max(1),
            allow_identity_header,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE_NAME.to_string(),
            attendance_commit_attempts: DEFAULT_COMMIT_ATTEMPTS,
            allow_identity_header: false,
        }
    }
}

fn try_load<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
            default
        }),
        None => {
            info!("{key} not set, using default: {default}");
            default
        }
    }
}

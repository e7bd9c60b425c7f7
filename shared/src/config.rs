use std::env;

const DEFAULT_TABLE_NAME: &str = "agosh-charity";
const DEFAULT_RECEIPTS_BUCKET: &str = "agosh-receipts";
const DEFAULT_SESSION_TTL_HOURS: i64 = 12;
const MIN_SESSION_SECRET_BYTES: usize = 32;
/// One year.
pub const MAX_SESSION_TTL_HOURS: i64 = 8760;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Dynamo,
    Memory,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub table_name: String,
    pub receipts_bucket: String,
    pub receipts_public_base_url: Option<String>,
    pub session_secret: String,
    pub session_ttl_hours: i64,
    pub store_backend: StoreBackend,
    pub cors_allow_origin: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read =
            |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let session_secret = read("SESSION_SECRET").ok_or(ConfigError::Missing("SESSION_SECRET"))?;
        if session_secret.len() < MIN_SESSION_SECRET_BYTES {
            return Err(ConfigError::Invalid {
                name: "SESSION_SECRET",
                reason: format!("must be at least {} bytes", MIN_SESSION_SECRET_BYTES),
            });
        }

        let session_ttl_hours = match read("SESSION_TTL_HOURS") {
            Some(raw) => match raw.parse::<i64>() {
                Ok(hours) if hours > 0 && hours <= MAX_SESSION_TTL_HOURS => hours,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "SESSION_TTL_HOURS",
                        reason: format!(
                            "expected between 1 and {} hours, got {:?}",
                            MAX_SESSION_TTL_HOURS, raw
                        ),
                    })
                }
            },
            None => DEFAULT_SESSION_TTL_HOURS,
        };

        let store_backend = match read("STORE_BACKEND").as_deref() {
            None | Some("dynamo") | Some("dynamodb") => StoreBackend::Dynamo,
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "STORE_BACKEND",
                    reason: format!("expected dynamo or memory, got {:?}", other),
                })
            }
        };

        Ok(Self {
            table_name: read("TABLE_NAME").unwrap_or_else(|| DEFAULT_TABLE_NAME.to_string()),
            receipts_bucket: read("RECEIPTS_BUCKET")
                .unwrap_or_else(|| DEFAULT_RECEIPTS_BUCKET.to_string()),
            receipts_public_base_url: read("RECEIPTS_PUBLIC_BASE_URL"),
            session_secret,
            session_ttl_hours,
            store_backend,
            cors_allow_origin: read("CORS_ALLOW_ORIGIN").unwrap_or_else(|| "*".to_string()),
        })
    }
}

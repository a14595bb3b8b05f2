use std::path::PathBuf;

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::users::password::PasswordScheme;

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// Which `UserStore` backs the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    File { path: PathBuf, seed: PathBuf },
    Postgres { database_url: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub store: StoreBackend,
    pub password_scheme: PasswordScheme,
    pub session: SessionConfig,
    pub stt_catalog_file: Option<PathBuf>,
    pub request_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let store = match std::env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "file".into())
            .as_str()
        {
            "file" => StoreBackend::File {
                path: std::env::var("USERS_FILE")
                    .unwrap_or_else(|_| "/tmp/users.json".into())
                    .into(),
                seed: std::env::var("USERS_SEED_FILE")
                    .unwrap_or_else(|_| "public/users.json".into())
                    .into(),
            },
            "postgres" => StoreBackend::Postgres {
                database_url: std::env::var("DATABASE_URL")
                    .context("DATABASE_URL is required for the postgres store")?,
            },
            other => bail!("unknown STORE_BACKEND {other:?}"),
        };

        let password_scheme = std::env::var("PASSWORD_SCHEME")
            .unwrap_or_else(|_| "plaintext".into())
            .parse::<PasswordScheme>()?;

        let session = SessionConfig {
            secret: std::env::var("SESSION_SECRET").context("SESSION_SECRET is required")?,
            issuer: std::env::var("SESSION_ISSUER").unwrap_or_else(|_| "propal".into()),
            audience: std::env::var("SESSION_AUDIENCE")
                .unwrap_or_else(|_| "propal-users".into()),
            ttl_minutes: std::env::var("SESSION_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60 * 24),
        };

        Ok(Self {
            store,
            password_scheme,
            session,
            stt_catalog_file: std::env::var("STT_CATALOG_FILE").ok().map(PathBuf::from),
            request_timeout_secs: std::env::var("REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(10),
        })
    }
}

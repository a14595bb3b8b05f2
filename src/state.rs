use std::sync::Arc;

use crate::config::{AppConfig, StoreBackend};
use crate::storage::{FileStore, PgStore, UserStore};
use crate::stt::dto::SttCatalog;
use crate::users::password::PasswordScheme;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub catalog: Arc<SttCatalog>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let users = match &config.store {
            StoreBackend::File { path, seed } => {
                tracing::info!(path = %path.display(), "using file user store");
                Arc::new(FileStore::init(path.clone(), Some(seed.clone())).await?) as Arc<dyn UserStore>
            }
            StoreBackend::Postgres { database_url } => {
                tracing::info!("using postgres user store");
                Arc::new(PgStore::connect(database_url).await?) as Arc<dyn UserStore>
            }
        };

        let catalog = Arc::new(SttCatalog::load(config.stt_catalog_file.as_deref()).await?);

        Ok(Self {
            config,
            users,
            catalog,
        })
    }

    pub fn passwords(&self) -> PasswordScheme {
        self.config.password_scheme
    }

    #[cfg(test)]
    pub fn fake(users: Arc<dyn UserStore>, password_scheme: PasswordScheme) -> Self {
        use std::path::PathBuf;

        let config = Arc::new(AppConfig {
            store: StoreBackend::File {
                path: PathBuf::from("unused.json"),
                seed: PathBuf::from("unused-seed.json"),
            },
            password_scheme,
            session: crate::config::SessionConfig {
                secret: "test".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
            },
            stt_catalog_file: None,
            request_timeout_secs: 10,
        });

        Self {
            config,
            users,
            catalog: Arc::new(SttCatalog::bundled().expect("bundled catalog")),
        }
    }
}

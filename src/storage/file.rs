use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{find_collision, next_id, Mutation, StoreError, UniqueField, UserStore};
use crate::users::repo_types::{NewUser, User};

/// Whole collection as one pretty-printed JSON array on disk. The
/// writable copy is seeded from a bundled read-only file on first use.
pub struct FileStore {
    path: PathBuf,
    seed: Option<PathBuf>,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>, seed: Option<PathBuf>) -> Self {
        Self {
            path: path.into(),
            seed,
            lock: Mutex::new(()),
        }
    }

    /// Create the parent directory and seed the file if needed.
    pub async fn init(path: impl Into<PathBuf>, seed: Option<PathBuf>) -> anyhow::Result<Self> {
        let store = Self::new(path, seed);
        if let Some(parent) = store.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create {}", parent.display()))?;
        }
        store
            .ensure_seeded()
            .await
            .with_context(|| format!("seed {}", store.path.display()))?;
        Ok(store)
    }

    async fn ensure_seeded(&self) -> Result<(), StoreError> {
        if tokio::fs::try_exists(&self.path).await? {
            return Ok(());
        }
        let mut seed = self.seed.as_ref();
        if let Some(path) = seed {
            if !tokio::fs::try_exists(path).await? {
                seed = None;
            }
        }
        let data = match seed {
            Some(seed) => {
                info!(seed = %seed.display(), path = %self.path.display(), "seeding users file");
                tokio::fs::read(seed).await?
            }
            None => {
                warn!(path = %self.path.display(), "no seed file; starting with an empty collection");
                b"[]".to_vec()
            }
        };
        tokio::fs::write(&self.path, data).await?;
        Ok(())
    }

    async fn load(&self) -> Result<Vec<User>, StoreError> {
        self.ensure_seeded().await?;
        let data = tokio::fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&data)?)
    }

    async fn save(&self, users: &[User]) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(users)?;
        let tmp = tmp_path(&self.path);
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), count = users.len(), "users file written");
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[async_trait]
impl UserStore for FileStore {
    async fn list(&self) -> Result<Vec<User>, StoreError> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.into_iter().find(|u| u.username == username))
    }

    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        let _guard = self.lock.lock().await;
        let mut users = self.load().await?;
        if let Some(field) = find_collision(&users, Some(user.username.as_str()), &user.email, None) {
            return Err(StoreError::Duplicate(field));
        }
        let created = user.with_id(next_id(&users));
        users.push(created.clone());
        self.save(&users).await?;
        Ok(created)
    }

    async fn update(&self, username: &str, apply: Mutation) -> Result<User, StoreError> {
        let _guard = self.lock.lock().await;
        let mut users = self.load().await?;
        let idx = users
            .iter()
            .position(|u| u.username == username)
            .ok_or(StoreError::NotFound)?;

        let mut edited = users[idx].clone();
        apply(&mut edited).map_err(StoreError::Rejected)?;
        edited.id = users[idx].id;
        edited.username = users[idx].username.clone();

        if find_collision(&users, None, &edited.email, Some(username)).is_some() {
            return Err(StoreError::Duplicate(UniqueField::Email));
        }
        users[idx] = edited.clone();
        self.save(&users).await?;
        Ok(edited)
    }

    async fn replace_all(&self, users: Vec<User>) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        self.save(&users).await
    }
}

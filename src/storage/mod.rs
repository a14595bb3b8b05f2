mod file;
mod postgres;

pub use file::FileStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::users::repo_types::{NewUser, User};

/// Which unique column a write collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Username,
    Email,
}

/// In-place edit run by [`UserStore::update`] while the record is held.
/// An `Err` aborts the write and surfaces as `StoreError::Rejected`.
pub type Mutation = Box<dyn FnOnce(&mut User) -> anyhow::Result<()> + Send>;

pub fn mutation(f: impl FnOnce(&mut User) -> anyhow::Result<()> + Send + 'static) -> Mutation {
    Box::new(f)
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate {0:?}")]
    Duplicate(UniqueField),
    #[error("record not found")]
    NotFound,
    #[error("update rejected: {0}")]
    Rejected(anyhow::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
}

/// Narrow persistence interface for user records, keyed by username.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn list(&self) -> Result<Vec<User>, StoreError>;

    async fn get_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    /// Insert-if-absent. Assigns the next id and rejects a taken
    /// username or email in the same atomic step.
    async fn insert(&self, user: NewUser) -> Result<User, StoreError>;

    /// Read-modify-write of one record in a single atomic step. `id` and
    /// `username` are kept; the edited email must stay unique.
    async fn update(&self, username: &str, apply: Mutation) -> Result<User, StoreError>;

    /// Overwrite the whole collection.
    async fn replace_all(&self, users: Vec<User>) -> Result<(), StoreError>;
}

/// Max existing id plus one, or 1 for an empty collection.
pub fn next_id(users: &[User]) -> i64 {
    users.iter().map(|u| u.id).max().unwrap_or(0) + 1
}

/// First unique column already held by a record other than `skip_username`.
/// Emails compare case-insensitively.
pub(crate) fn find_collision(
    users: &[User],
    username: Option<&str>,
    email: &str,
    skip_username: Option<&str>,
) -> Option<UniqueField> {
    let others = move || {
        users
            .iter()
            .filter(move |u| Some(u.username.as_str()) != skip_username)
    };
    if let Some(username) = username {
        if others().any(|u| u.username == username) {
            return Some(UniqueField::Username);
        }
    }
    if others().any(|u| u.email.eq_ignore_ascii_case(email)) {
        return Some(UniqueField::Email);
    }
    None
}

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, types::Json, FromRow, PgPool, Postgres, Transaction};

use super::{Mutation, StoreError, UniqueField, UserStore};
use crate::{
    stt::dto::SttSettings,
    users::repo_types::{NewUser, User},
};

/// `users` table, one row per username.
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    username: String,
    email: String,
    phone: String,
    password: String,
    stt_settings: Option<Json<SttSettings>>,
}

impl From<UserRow> for User {
    fn from(r: UserRow) -> Self {
        Self {
            id: r.id,
            username: r.username,
            email: r.email,
            phone: r.phone,
            password: r.password,
            stt_settings: r.stt_settings.map(|Json(s)| s),
        }
    }
}

const SELECT_USER: &str = "SELECT id, username, email, phone, password, stt_settings FROM users";

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("connect to database")?;

        sqlx::migrate!("./migrations")
            .run(&db)
            .await
            .context("run migrations")?;
        tracing::info!("migrations applied");
        Ok(Self { db })
    }

    async fn insert_row(tx: &mut Transaction<'_, Postgres>, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, phone, password, stt_settings)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.phone)
        .bind(&user.password)
        .bind(user.stt_settings.clone().map(Json))
        .execute(&mut **tx)
        .await
        .map_err(map_unique)?;
        Ok(())
    }
}

/// Unique violations become `Duplicate`, keyed off the constraint name.
fn map_unique(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return StoreError::Duplicate(field_for_constraint(db_err.constraint()));
        }
    }
    StoreError::Database(err)
}

fn field_for_constraint(constraint: Option<&str>) -> UniqueField {
    match constraint {
        Some(name) if name.contains("email") => UniqueField::Email,
        _ => UniqueField::Username,
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn list(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!("{SELECT_USER} ORDER BY id"))
            .fetch_all(&self.db)
            .await?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!("{SELECT_USER} WHERE username = $1"))
            .bind(username)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.map(User::from))
    }

    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        let mut tx = self.db.begin().await?;
        // held until commit; concurrent inserts queue here
        sqlx::query("LOCK TABLE users IN SHARE ROW EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await?;

        let taken: Option<(bool,)> = sqlx::query_as(
            r#"
            SELECT username = $1
              FROM users
             WHERE username = $1 OR lower(email) = lower($2)
             ORDER BY (username = $1) DESC
             LIMIT 1
            "#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some((same_username,)) = taken {
            return Err(StoreError::Duplicate(if same_username {
                UniqueField::Username
            } else {
                UniqueField::Email
            }));
        }

        let (id,): (i64,) = sqlx::query_as("SELECT COALESCE(MAX(id), 0) + 1 FROM users")
            .fetch_one(&mut *tx)
            .await?;
        let created = user.with_id(id);
        Self::insert_row(&mut tx, &created).await?;
        tx.commit().await?;
        Ok(created)
    }

    async fn update(&self, username: &str, apply: Mutation) -> Result<User, StoreError> {
        let mut tx = self.db.begin().await?;
        let current: User =
            sqlx::query_as::<_, UserRow>(&format!("{SELECT_USER} WHERE username = $1 FOR UPDATE"))
                .bind(username)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(StoreError::NotFound)?
                .into();

        let mut edited = current.clone();
        apply(&mut edited).map_err(StoreError::Rejected)?;
        edited.id = current.id;
        edited.username = current.username;

        sqlx::query(
            r#"
            UPDATE users
               SET email = $2, phone = $3, password = $4, stt_settings = $5
             WHERE username = $1
            "#,
        )
        .bind(&edited.username)
        .bind(&edited.email)
        .bind(&edited.phone)
        .bind(&edited.password)
        .bind(edited.stt_settings.clone().map(Json))
        .execute(&mut *tx)
        .await
        .map_err(map_unique)?;
        tx.commit().await?;
        Ok(edited)
    }

    async fn replace_all(&self, users: Vec<User>) -> Result<(), StoreError> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM users").execute(&mut *tx).await?;
        for user in &users {
            Self::insert_row(&mut tx, user).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

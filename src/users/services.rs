use tracing::{error, info, warn};

use crate::{
    error::{ApiError, ApiResult},
    storage::{mutation, StoreError, UniqueField, UserStore},
    users::{
        dto::{BulkUserRequest, LoginRequest, ProfileUpdateRequest, SignupRequest},
        password::PasswordScheme,
        repo_types::{NewUser, User},
        validation::{validate_bulk, validate_login, validate_profile_update, validate_signup},
    },
};

const STORAGE_KEY_MESSAGE: &str = "Username cannot contain slashes, periods, or be empty";

/// Usernames key the stored records, so `.` and `/` never reach a store.
pub fn ensure_storage_key(username: &str) -> ApiResult<()> {
    if username.trim().is_empty() || username.contains(['.', '/']) {
        warn!(%username, "username is not a safe storage key");
        return Err(ApiError::field("username", STORAGE_KEY_MESSAGE));
    }
    Ok(())
}

/// Logs the store failure and hands the caller a generic message.
fn store_failure(context: &'static str) -> impl FnOnce(StoreError) -> ApiError {
    move |e| {
        error!(error = %e, "{context}");
        ApiError::Internal(context.to_string())
    }
}

/// An edit that refused to apply carries its own `ApiError`; anything
/// else it failed with is internal.
fn rejected(e: anyhow::Error, context: &'static str) -> ApiError {
    match e.downcast::<ApiError>() {
        Ok(api) => api,
        Err(e) => {
            error!(error = %e, "{context}");
            ApiError::Internal(context.to_string())
        }
    }
}

fn conflict(field: UniqueField) -> ApiError {
    match field {
        UniqueField::Username => ApiError::Conflict("Username already exists".into()),
        UniqueField::Email => ApiError::Conflict("Email already exists".into()),
    }
}

fn required(value: Option<String>, field: &str) -> ApiResult<String> {
    value.map(|v| v.trim().to_string()).ok_or_else(|| {
        error!(%field, "missing value after validation");
        ApiError::Internal(format!("Invalid value for field: {field}"))
    })
}

pub async fn list_users(store: &dyn UserStore) -> ApiResult<Vec<User>> {
    store.list().await.map_err(store_failure("Failed to fetch users"))
}

pub async fn create_user(
    store: &dyn UserStore,
    passwords: PasswordScheme,
    req: SignupRequest,
) -> ApiResult<User> {
    if let Some(errors) = validate_signup(&req) {
        warn!(?errors, "signup validation failed");
        return Err(ApiError::Validation(errors));
    }
    ensure_storage_key(req.username.as_deref().unwrap_or_default())?;

    let password = required(req.password, "password")?;
    let candidate = NewUser {
        username: required(req.username, "username")?,
        email: required(req.email, "email")?,
        phone: req.phone.map(|p| p.trim().to_string()).unwrap_or_default(),
        password: passwords.store(&password).map_err(|e| {
            error!(error = %e, "storing password failed");
            ApiError::Internal("Failed to create user".into())
        })?,
    };

    let user = store.insert(candidate).await.map_err(|e| match e {
        StoreError::Duplicate(field) => {
            warn!(?field, "signup conflicts with an existing user");
            conflict(field)
        }
        other => store_failure("Failed to create user")(other),
    })?;

    info!(user_id = user.id, username = %user.username, "user created");
    Ok(user)
}

pub async fn update_profile(
    store: &dyn UserStore,
    passwords: PasswordScheme,
    username: &str,
    req: ProfileUpdateRequest,
) -> ApiResult<User> {
    ensure_storage_key(username)?;
    if let Some(errors) = validate_profile_update(&req) {
        warn!(%username, ?errors, "profile validation failed");
        return Err(ApiError::Validation(errors));
    }

    let email = required(req.email, "email")?;
    let old_password = req
        .old_password
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty());
    let new_password = req
        .new_password
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|new| passwords.store(new))
        .transpose()
        .map_err(|e| {
            error!(error = %e, "storing password failed");
            ApiError::Internal("Failed to update user".into())
        })?;
    let password_changed = new_password.is_some();

    // old password is checked against the record as held by the store
    let edit = mutation(move |user| {
        if let Some(old) = old_password {
            if !passwords.verify(&old, &user.password)? {
                warn!("old password mismatch");
                return Err(ApiError::Auth("Old password is incorrect".into()).into());
            }
        }
        user.email = email;
        if let Some(stored) = new_password {
            user.password = stored;
        }
        Ok(())
    });

    let user = store.update(username, edit).await.map_err(|e| match e {
        StoreError::Rejected(e) => rejected(e, "Failed to update user"),
        StoreError::Duplicate(field) => conflict(field),
        StoreError::NotFound => ApiError::NotFound("User not found".into()),
        other => store_failure("Failed to update user")(other),
    })?;

    info!(user_id = user.id, %username, password_changed, "profile updated");
    Ok(user)
}

/// Whole-collection overwrite. Every element passes the same field
/// rules as a single write before anything is persisted.
pub async fn replace_all_users(
    store: &dyn UserStore,
    passwords: PasswordScheme,
    records: Vec<BulkUserRequest>,
) -> ApiResult<usize> {
    if let Some(errors) = validate_bulk(&records) {
        warn!(?errors, "bulk replace validation failed");
        return Err(ApiError::Validation(errors));
    }

    let mut users = Vec::with_capacity(records.len());
    for (i, rec) in records.into_iter().enumerate() {
        let username = required(rec.username, "username")?;
        if ensure_storage_key(&username).is_err() {
            return Err(ApiError::field(&format!("{i}.username"), STORAGE_KEY_MESSAGE));
        }
        users.push(User {
            id: rec
                .id
                .ok_or_else(|| ApiError::Internal("Invalid value for field: id".into()))?,
            username,
            email: required(rec.email, "email")?,
            phone: rec.phone.map(|p| p.trim().to_string()).unwrap_or_default(),
            password: passwords
                .keep_or_store(&required(rec.password, "password")?)
                .map_err(|e| {
                    error!(error = %e, "storing password failed");
                    ApiError::Internal("Failed to update users".into())
                })?,
            stt_settings: rec.stt_settings,
        });
    }

    let count = users.len();
    store
        .replace_all(users)
        .await
        .map_err(store_failure("Failed to update users"))?;
    info!(count, "user collection replaced");
    Ok(count)
}

/// Credential check behind `POST /api/login`. Unknown identifiers and
/// wrong passwords are reported identically.
pub async fn authenticate(
    store: &dyn UserStore,
    passwords: PasswordScheme,
    req: LoginRequest,
) -> ApiResult<User> {
    if let Some(errors) = validate_login(&req) {
        warn!(?errors, "login validation failed");
        return Err(ApiError::Validation(errors));
    }
    let login_id = req.login_id.as_deref().unwrap_or_default().trim();
    let password = req.password.as_deref().unwrap_or_default();
    let by_email = login_id.contains('@');

    let users = store.list().await.map_err(store_failure("Failed to fetch users"))?;
    let candidate = users.into_iter().find(|u| {
        if by_email {
            u.email.eq_ignore_ascii_case(login_id)
        } else {
            u.username == login_id
        }
    });

    let Some(user) = candidate else {
        warn!(%login_id, "login unknown identifier");
        return Err(ApiError::Auth("Invalid credentials".into()));
    };

    let ok = passwords.verify(password, &user.password).map_err(|e| {
        error!(error = %e, user_id = user.id, "password verification failed");
        ApiError::Internal("Failed to log in".into())
    })?;
    if !ok {
        warn!(user_id = user.id, "login invalid password");
        return Err(ApiError::Auth("Invalid credentials".into()));
    }

    info!(user_id = user.id, username = %user.username, "user logged in");
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{testing::Interleaved, FileStore};
    use crate::stt::dto::SttSettings;

    async fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::init(dir.path().join("users.json"), None).await.unwrap();
        (dir, store)
    }

    fn signup(username: &str, email: &str) -> SignupRequest {
        SignupRequest {
            username: Some(format!("  {username} ")),
            email: Some(format!("{email} ")),
            phone: None,
            password: Some("Str0ng!Pass".into()),
        }
    }

    fn seeded(id: i64, username: &str) -> User {
        NewUser {
            username: username.into(),
            email: format!("{username}@x.com"),
            phone: String::new(),
            password: "Str0ng!Pass".into(),
        }
        .with_id(id)
    }

    #[test]
    fn storage_key_check() {
        for bad in ["a.b", "a/b", "", "   ", "..", "/"] {
            assert!(matches!(ensure_storage_key(bad), Err(ApiError::Validation(_))), "{bad:?}");
        }
        assert!(ensure_storage_key("a_b-c").is_ok());
    }

    #[tokio::test]
    async fn create_normalizes_and_assigns_first_id() {
        let (_dir, store) = store().await;
        let user = create_user(&store, PasswordScheme::Plaintext, signup("alice", "alice@x.com"))
            .await
            .unwrap();
        assert_eq!(user.id, 1);
        assert_eq!(user.username, "alice");
        assert_eq!(user.email, "alice@x.com");
        assert_eq!(user.phone, "");
        assert_eq!(user.password, "Str0ng!Pass");
    }

    #[tokio::test]
    async fn create_assigns_max_id_plus_one() {
        let (_dir, store) = store().await;
        store
            .replace_all(vec![seeded(2, "two"), seeded(7, "seven"), seeded(5, "five")])
            .await
            .unwrap();
        let user = create_user(&store, PasswordScheme::Plaintext, signup("eight", "eight@x.com"))
            .await
            .unwrap();
        assert_eq!(user.id, 8);
    }

    #[tokio::test]
    async fn create_rejects_duplicate_username_and_email() {
        let (_dir, store) = store().await;
        create_user(&store, PasswordScheme::Plaintext, signup("alice", "alice@x.com"))
            .await
            .unwrap();

        let err = create_user(&store, PasswordScheme::Plaintext, signup("alice", "new@x.com"))
            .await
            .unwrap_err();
        assert!(matches!(&err, ApiError::Conflict(m) if m == "Username already exists"));

        let err = create_user(&store, PasswordScheme::Plaintext, signup("other", "alice@x.com"))
            .await
            .unwrap_err();
        assert!(matches!(&err, ApiError::Conflict(m) if m == "Email already exists"));

        let err = create_user(&store, PasswordScheme::Plaintext, signup("other", "Alice@X.com"))
            .await
            .unwrap_err();
        assert!(matches!(&err, ApiError::Conflict(m) if m == "Email already exists"));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_rejects_invalid_payload_before_store() {
        let (_dir, store) = store().await;
        let err = create_user(&store, PasswordScheme::Plaintext, signup("a.b", "ab@x.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(f) if f.contains_key("username")));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_with_argon2_stores_hash() {
        let (_dir, store) = store().await;
        let user = create_user(&store, PasswordScheme::Argon2, signup("alice", "alice@x.com"))
            .await
            .unwrap();
        assert!(user.password.starts_with("$argon2"));

        let req = LoginRequest {
            login_id: Some("alice".into()),
            password: Some("Str0ng!Pass".into()),
        };
        assert_eq!(authenticate(&store, PasswordScheme::Argon2, req).await.unwrap(), user);
    }

    #[tokio::test]
    async fn update_with_wrong_old_password_leaves_record() {
        let (_dir, store) = store().await;
        let before = create_user(&store, PasswordScheme::Plaintext, signup("alice", "alice@x.com"))
            .await
            .unwrap();

        let err = update_profile(
            &store,
            PasswordScheme::Plaintext,
            "alice",
            ProfileUpdateRequest {
                email: Some("changed@x.com".into()),
                old_password: Some("Wr0ng!Pass".into()),
                new_password: Some("N3w!Password".into()),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Auth(_)));
        assert_eq!(store.get_by_username("alice").await.unwrap(), Some(before));
    }

    #[tokio::test]
    async fn update_changes_email_and_password() {
        let (_dir, store) = store().await;
        let before = create_user(&store, PasswordScheme::Plaintext, signup("alice", "alice@x.com"))
            .await
            .unwrap();

        let after = update_profile(
            &store,
            PasswordScheme::Plaintext,
            "alice",
            ProfileUpdateRequest {
                email: Some(" alice@new.io ".into()),
                old_password: Some("Str0ng!Pass".into()),
                new_password: Some("N3w!Password".into()),
            },
        )
        .await
        .unwrap();
        assert_eq!(after.id, before.id);
        assert_eq!(after.username, "alice");
        assert_eq!(after.email, "alice@new.io");
        assert_eq!(after.password, "N3w!Password");
        assert_eq!(store.get_by_username("alice").await.unwrap(), Some(after));
    }

    #[tokio::test]
    async fn repeated_update_is_idempotent() {
        let (_dir, store) = store().await;
        create_user(&store, PasswordScheme::Plaintext, signup("alice", "alice@x.com"))
            .await
            .unwrap();
        let req = || ProfileUpdateRequest {
            email: Some("alice@y.com".into()),
            ..Default::default()
        };
        let first = update_profile(&store, PasswordScheme::Plaintext, "alice", req())
            .await
            .unwrap();
        let second = update_profile(&store, PasswordScheme::Plaintext, "alice", req())
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(store.list().await.unwrap(), vec![second]);
    }

    #[tokio::test]
    async fn update_keeps_settings_saved_after_the_read() {
        let (_dir, inner) = store().await;
        create_user(&inner, PasswordScheme::Plaintext, signup("alice", "alice@x.com"))
            .await
            .unwrap();
        let settings = SttSettings {
            provider: "deepgram".into(),
            model: "nova-2".into(),
            language: "en-US".into(),
        };
        let saved = settings.clone();
        let store = Interleaved::new(
            inner,
            mutation(move |u| {
                u.stt_settings = Some(saved);
                Ok(())
            }),
        );

        let after = update_profile(
            &store,
            PasswordScheme::Plaintext,
            "alice",
            ProfileUpdateRequest {
                email: Some("alice@new.io".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(after.email, "alice@new.io");
        assert_eq!(after.stt_settings, Some(settings.clone()));
        let stored = store.inner.get_by_username("alice").await.unwrap().unwrap();
        assert_eq!(stored.stt_settings, Some(settings));
    }

    #[tokio::test]
    async fn old_password_is_checked_against_the_latest_record() {
        let (_dir, inner) = store().await;
        create_user(&inner, PasswordScheme::Plaintext, signup("alice", "alice@x.com"))
            .await
            .unwrap();
        let store = Interleaved::new(
            inner,
            mutation(|u| {
                u.password = "Ch4nged!Pass".into();
                Ok(())
            }),
        );

        let err = update_profile(
            &store,
            PasswordScheme::Plaintext,
            "alice",
            ProfileUpdateRequest {
                email: Some("alice@x.com".into()),
                old_password: Some("Str0ng!Pass".into()),
                new_password: Some("N3w!Password".into()),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Auth(m) if m == "Old password is incorrect"));
        let stored = store.inner.get_by_username("alice").await.unwrap().unwrap();
        assert_eq!(stored.password, "Ch4nged!Pass");
    }

    #[tokio::test]
    async fn update_unknown_user_is_not_found() {
        let (_dir, store) = store().await;
        let err = update_profile(
            &store,
            PasswordScheme::Plaintext,
            "ghost",
            ProfileUpdateRequest {
                email: Some("ghost@x.com".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_rejects_email_of_another_user() {
        let (_dir, store) = store().await;
        create_user(&store, PasswordScheme::Plaintext, signup("alice", "alice@x.com"))
            .await
            .unwrap();
        create_user(&store, PasswordScheme::Plaintext, signup("bob", "bob@x.com"))
            .await
            .unwrap();
        let err = update_profile(
            &store,
            PasswordScheme::Plaintext,
            "alice",
            ProfileUpdateRequest {
                email: Some("bob@x.com".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn bulk_replace_rejects_invalid_element_without_writing() {
        let (_dir, store) = store().await;
        let original = create_user(&store, PasswordScheme::Plaintext, signup("alice", "alice@x.com"))
            .await
            .unwrap();

        let records = vec![
            BulkUserRequest {
                id: Some(1),
                username: Some("alice".into()),
                email: Some("alice@x.com".into()),
                phone: None,
                password: Some("Str0ng!Pass".into()),
                stt_settings: None,
            },
            BulkUserRequest {
                id: Some(2),
                username: Some("bob".into()),
                email: Some("bob@domain.xyz".into()),
                phone: None,
                password: Some("x".into()),
                stt_settings: None,
            },
        ];
        let err = replace_all_users(&store, PasswordScheme::Plaintext, records).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(f) if f.contains_key("1.email")));
        assert_eq!(store.list().await.unwrap(), vec![original]);
    }

    #[tokio::test]
    async fn bulk_replace_writes_normalized_collection() {
        let (_dir, store) = store().await;
        let records = vec![BulkUserRequest {
            id: Some(4),
            username: Some(" zed ".into()),
            email: Some("zed@x.com".into()),
            phone: Some(" +15551234 ".into()),
            password: Some("pw".into()),
            stt_settings: None,
        }];
        assert_eq!(replace_all_users(&store, PasswordScheme::Plaintext, records).await.unwrap(), 1);
        let users = store.list().await.unwrap();
        assert_eq!(users[0].username, "zed");
        assert_eq!(users[0].phone, "+15551234");
    }

    #[tokio::test]
    async fn bulk_replace_under_argon2_hashes_plain_passwords() {
        let (_dir, store) = store().await;
        let hashed = PasswordScheme::Argon2.store("0ther!Pass").unwrap();
        let rec = |id, username: &str, password: &str| BulkUserRequest {
            id: Some(id),
            username: Some(username.into()),
            email: Some(format!("{username}@x.com")),
            phone: None,
            password: Some(password.into()),
            stt_settings: None,
        };
        replace_all_users(
            &store,
            PasswordScheme::Argon2,
            vec![rec(1, "alice", "Str0ng!Pass"), rec(2, "bob", &hashed)],
        )
        .await
        .unwrap();

        let users = store.list().await.unwrap();
        assert!(users[0].password.starts_with("$argon2"));
        assert_eq!(users[1].password, hashed);

        let login = |id: &str, pw: &str| LoginRequest {
            login_id: Some(id.into()),
            password: Some(pw.into()),
        };
        let alice = authenticate(&store, PasswordScheme::Argon2, login("alice", "Str0ng!Pass"))
            .await
            .unwrap();
        assert_eq!(alice.id, 1);
        let bob = authenticate(&store, PasswordScheme::Argon2, login("bob", "0ther!Pass"))
            .await
            .unwrap();
        assert_eq!(bob.id, 2);
    }

    #[tokio::test]
    async fn login_by_username_or_email() {
        let (_dir, store) = store().await;
        let alice = create_user(&store, PasswordScheme::Plaintext, signup("alice", "alice@x.com"))
            .await
            .unwrap();
        let login = |id: &str, pw: &str| LoginRequest {
            login_id: Some(id.into()),
            password: Some(pw.into()),
        };

        let by_name = authenticate(&store, PasswordScheme::Plaintext, login("alice", "Str0ng!Pass"))
            .await
            .unwrap();
        assert_eq!(by_name, alice);
        let by_email = authenticate(&store, PasswordScheme::Plaintext, login("alice@x.com", "Str0ng!Pass"))
            .await
            .unwrap();
        assert_eq!(by_email, alice);
        let by_upper_email = authenticate(&store, PasswordScheme::Plaintext, login("ALICE@x.com", "Str0ng!Pass"))
            .await
            .unwrap();
        assert_eq!(by_upper_email, alice);

        let wrong = authenticate(&store, PasswordScheme::Plaintext, login("alice", "nope"))
            .await
            .unwrap_err();
        assert!(matches!(&wrong, ApiError::Auth(m) if m == "Invalid credentials"));
        let unknown = authenticate(&store, PasswordScheme::Plaintext, login("nobody", "Str0ng!Pass"))
            .await
            .unwrap_err();
        assert_eq!(unknown.to_string(), wrong.to_string());
    }
}

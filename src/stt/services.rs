use tracing::{error, info};

use crate::{
    error::{ApiError, ApiResult},
    storage::{mutation, StoreError, UserStore},
    stt::dto::{SttCatalog, SttSettings, SttSettingsRequest},
    users::{repo_types::User, services::ensure_storage_key},
};

async fn load_user(store: &dyn UserStore, username: &str) -> ApiResult<User> {
    ensure_storage_key(username)?;
    store
        .get_by_username(username)
        .await
        .map_err(|e| {
            error!(error = %e, %username, "load user failed");
            ApiError::Internal("Failed to load STT settings".into())
        })?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))
}

pub async fn saved_settings(store: &dyn UserStore, username: &str) -> ApiResult<SttSettings> {
    load_user(store, username)
        .await?
        .stt_settings
        .ok_or_else(|| ApiError::NotFound("No STT settings saved".into()))
}

pub async fn save_settings(
    store: &dyn UserStore,
    catalog: &SttCatalog,
    username: &str,
    req: SttSettingsRequest,
) -> ApiResult<SttSettings> {
    let settings = catalog.resolve(&req)?;
    ensure_storage_key(username)?;
    let saved = settings.clone();
    store
        .update(
            username,
            mutation(move |user| {
                user.stt_settings = Some(saved);
                Ok(())
            }),
        )
        .await
        .map_err(|e| match e {
            StoreError::NotFound => ApiError::NotFound("User not found".into()),
            other => {
                error!(error = %other, %username, "save STT settings failed");
                ApiError::Internal("Failed to save STT settings".into())
            }
        })?;
    info!(%username, provider = %settings.provider, model = %settings.model, "STT settings saved");
    Ok(settings)
}

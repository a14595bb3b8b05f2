use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::get,
    Json, Router,
};
use tracing::instrument;

use crate::{
    error::ApiResult,
    state::AppState,
    stt::{
        dto::{SttCatalog, SttSettings, SttSettingsRequest},
        services,
    },
    users::session::CurrentUser,
};

pub fn stt_routes() -> Router<AppState> {
    Router::new()
        .route("/stt", get(get_catalog))
        .route(
            "/users/:username/stt-settings",
            get(get_settings).put(put_settings),
        )
}

#[instrument(skip(state))]
pub async fn get_catalog(State(state): State<AppState>) -> Json<SttCatalog> {
    Json(state.catalog.as_ref().clone())
}

#[instrument(skip(state))]
pub async fn get_settings(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(username): Path<String>,
) -> ApiResult<Json<SttSettings>> {
    current.ensure_is(&username)?;
    let settings = services::saved_settings(state.users.as_ref(), &username).await?;
    Ok(Json(settings))
}

#[instrument(skip(state, payload))]
pub async fn put_settings(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(username): Path<String>,
    payload: Result<Json<SttSettingsRequest>, JsonRejection>,
) -> ApiResult<Json<SttSettings>> {
    current.ensure_is(&username)?;
    let Json(req) = payload?;
    let settings =
        services::save_settings(state.users.as_ref(), &state.catalog, &username, req).await?;
    Ok(Json(settings))
}

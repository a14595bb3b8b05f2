use axum::{
    extract::{rejection::JsonRejection, FromRef, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use tracing::{error, instrument};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
    users::{
        dto::{LoginRequest, MessageResponse, ProfileUpdateRequest, UserEnvelope, UsersPayload},
        repo_types::User,
        services,
        session::{Session, SessionKeys},
    },
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_or_replace_users))
        .route("/users/:username", put(update_user))
}

pub fn login_routes() -> Router<AppState> {
    Router::new().route("/login", post(login))
}

#[instrument(skip(state))]
pub async fn list_users(State(state): State<AppState>) -> ApiResult<Json<Vec<User>>> {
    let users = services::list_users(state.users.as_ref()).await?;
    Ok(Json(users))
}

/// A single object is a signup; an array replaces the whole collection.
#[instrument(skip(state, payload))]
pub async fn create_or_replace_users(
    State(state): State<AppState>,
    payload: Result<Json<UsersPayload>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(payload) = payload?;
    match payload {
        UsersPayload::One(req) => {
            let user = services::create_user(state.users.as_ref(), state.passwords(), req).await?;
            Ok((StatusCode::CREATED, Json(user)).into_response())
        }
        UsersPayload::Many(records) => {
            services::replace_all_users(state.users.as_ref(), state.passwords(), records).await?;
            Ok(Json(MessageResponse {
                message: "Users updated successfully",
            })
            .into_response())
        }
    }
}

#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
    payload: Result<Json<ProfileUpdateRequest>, JsonRejection>,
) -> ApiResult<Json<UserEnvelope>> {
    let Json(req) = payload?;
    let user =
        services::update_profile(state.users.as_ref(), state.passwords(), &username, req).await?;
    Ok(Json(UserEnvelope { user }))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<Json<Session>> {
    let Json(req) = payload?;
    let user = services::authenticate(state.users.as_ref(), state.passwords(), req).await?;
    let session = SessionKeys::from_ref(&state).open(user).map_err(|e| {
        error!(error = %e, "session sign failed");
        ApiError::Internal("Failed to log in".into())
    })?;
    Ok(Json(session))
}

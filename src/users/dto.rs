use serde::{Deserialize, Serialize};

use crate::stt::dto::SttSettings;
use crate::users::repo_types::User;

/// Request body for signup. Fields are optional so that missing ones
/// surface as validation messages instead of a parse failure.
#[derive(Debug, Default, Deserialize)]
pub struct SignupRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
}

/// One element of a bulk replace.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUserRequest {
    pub id: Option<i64>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
    pub stt_settings: Option<SttSettings>,
}

/// `POST /api/users` accepts a single signup or a whole collection.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum UsersPayload {
    Many(Vec<BulkUserRequest>),
    One(SignupRequest),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdateRequest {
    pub email: Option<String>,
    pub old_password: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub login_id: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserEnvelope {
    pub user: User,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

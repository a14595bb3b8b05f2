use serde::{Deserialize, Serialize};

use crate::stt::dto::SttSettings;

/// User record as persisted by every `UserStore` backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    pub password: String, // plaintext or PHC string, see users::password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stt_settings: Option<SttSettings>,
}

/// A normalized signup waiting for the store to assign its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub phone: String,
    pub password: String,
}

impl NewUser {
    pub fn with_id(self, id: i64) -> User {
        User {
            id,
            username: self.username,
            email: self.email,
            phone: self.phone,
            password: self.password,
            stt_settings: None,
        }
    }
}

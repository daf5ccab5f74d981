use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub google_id: Option<String>,
    pub etlab_username: Option<String>,
    pub profile_photo_url: Option<String>,
    pub is_verified: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl User {
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }
}

/// Fields required to create a user. Everything else starts empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub password_hash: Option<String>,
    pub google_id: Option<String>,
    pub etlab_username: Option<String>,
    pub profile_photo_url: Option<String>,
    pub is_verified: bool,
}

/// Partial update of a user row.
///
/// `None` leaves a column untouched. For nullable columns the inner option
/// distinguishes "set to NULL" (`Some(None)`) from "set to value".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPatch {
    pub email: Option<String>,
    pub name: Option<String>,
    pub phone: Option<Option<String>>,
    pub password_hash: Option<String>,
    pub google_id: Option<Option<String>>,
    pub etlab_username: Option<String>,
    pub profile_photo_url: Option<Option<String>>,
    pub is_verified: Option<bool>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        *self == UserPatch::default()
    }
}

/// The user as returned to clients. Never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublicUser {
    pub id: String,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub google_id: Option<String>,
    pub etlab_username: Option<String>,
    pub profile_photo_url: Option<String>,
    pub is_verified: bool,
    pub has_password: bool,
    pub created_at: i64,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            phone: user.phone.clone(),
            google_id: user.google_id.clone(),
            etlab_username: user.etlab_username.clone(),
            profile_photo_url: user.profile_photo_url.clone(),
            is_verified: user.is_verified,
            has_password: user.has_password(),
            created_at: user.created_at,
        }
    }
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        PublicUser::from(&user)
    }
}

use axum::{
    extract::State,
    http::HeaderMap,
    Extension,
};
use serde::Deserialize;

use super::{client_metadata, ApiQuery, ApiResponse};
use crate::error::Result;
use crate::middleware::CurrentUser;
use crate::models::PublicUser;
use crate::services::auth_service::GoogleLogin;
use crate::services::google_oauth::AuthorizationRequest;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct InitiateQuery {
    #[serde(default)]
    pub signup: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
}

/// GET /auth/google?signup=true|false - Build the Google consent URL
pub async fn initiate(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<InitiateQuery>,
) -> Result<ApiResponse<AuthorizationRequest>> {
    let request = state
        .auth_service
        .google_authorization_url(query.signup.unwrap_or(false))?;
    Ok(ApiResponse::ok(request))
}

/// GET /auth/google/callback?code=...&state=...
///
/// Signs in the Google user, linking or creating the account as needed.
/// `is_new_user` tells the client whether an account was created.
pub async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiQuery(query): ApiQuery<CallbackQuery>,
) -> Result<ApiResponse<GoogleLogin>> {
    let login = state
        .auth_service
        .google_callback(
            query.code.as_deref(),
            query.state.as_deref(),
            &client_metadata(&headers),
        )
        .await?;
    Ok(ApiResponse::ok(login))
}

pub async fn disconnect(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<ApiResponse<PublicUser>> {
    let updated = state.auth_service.disconnect_google(&user).await?;
    Ok(ApiResponse::with_message(
        updated,
        "Google account disconnected successfully",
    ))
}

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Extension,
};
use serde::Deserialize;

use super::{client_metadata, ApiJson, ApiResponse};
use crate::error::Result;
use crate::middleware::CurrentUser;
use crate::models::PasskeySummary;
use crate::services::passkey_service::{
    LoginOptions, PublicKeyCredential, RegisteredPasskey, RegistrationOptions,
};
use crate::services::AuthSession;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RegistrationVerifyRequest {
    pub credential: PublicKeyCredential,
    #[serde(default)]
    pub device_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginStartRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginVerifyRequest {
    pub email: String,
    pub credential: PublicKeyCredential,
}

pub async fn registration_start(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<ApiResponse<RegistrationOptions>> {
    let options = state.passkey_service.registration_start(&user).await?;
    Ok(ApiResponse::ok(options))
}

/// POST /auth/passkey/register/verify
///
/// The challenge echoed in `clientDataJSON` must have been issued to the caller.
pub async fn registration_verify(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    ApiJson(request): ApiJson<RegistrationVerifyRequest>,
) -> Result<ApiResponse<RegisteredPasskey>> {
    let registered = state
        .passkey_service
        .registration_verify(&user, request.credential, request.device_name)
        .await?;
    Ok(ApiResponse::with_message(
        registered,
        "Passkey registered successfully",
    ))
}

pub async fn login_start(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<LoginStartRequest>,
) -> Result<ApiResponse<LoginOptions>> {
    let options = state.passkey_service.login_start(&request.email).await?;
    Ok(ApiResponse::ok(options))
}

pub async fn login_verify(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<LoginVerifyRequest>,
) -> Result<ApiResponse<AuthSession>> {
    let session = state
        .passkey_service
        .login_verify(
            &request.email,
            request.credential,
            &client_metadata(&headers),
        )
        .await?;
    Ok(ApiResponse::with_message(session, "Login successful"))
}

pub async fn list_passkeys(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<ApiResponse<Vec<PasskeySummary>>> {
    Ok(ApiResponse::ok(state.passkey_service.list_passkeys(&user).await?))
}

/// DELETE /auth/passkeys/{id}
///
/// Answers 404 for ids that are unknown or belong to another user.
pub async fn delete_passkey(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<ApiResponse<()>> {
    state.passkey_service.delete_passkey(&user, &id).await?;
    Ok(ApiResponse::message("Passkey deleted successfully"))
}

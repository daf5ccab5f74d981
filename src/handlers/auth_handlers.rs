use axum::{extract::State, http::HeaderMap, Extension};
use serde::Deserialize;

use super::{client_metadata, ApiJson, ApiResponse};
use crate::error::Result;
use crate::middleware::CurrentUser;
use crate::models::PublicUser;
use crate::services::auth_service::{
    ProfileUpdate, RefreshedAccess, SignupCompletion, SignupRequest,
};
use crate::services::AuthSession;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetVerifyRequest {
    pub token: String,
    pub new_password: String,
}

/// POST /auth/signup - Create an account with email, name and password
///
/// ## Response (200 OK)
/// Access and refresh tokens plus the public user.
///
/// ## Errors
/// - 400 if the email is already registered or the input is invalid
pub async fn signup(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<SignupRequest>,
) -> Result<ApiResponse<AuthSession>> {
    let session = state
        .auth_service
        .signup(request, &client_metadata(&headers))
        .await?;
    Ok(ApiResponse::with_message(
        session,
        "Account created successfully",
    ))
}

/// POST /auth/signup/complete - Set a password on an account created through EtLab
pub async fn complete_signup(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(completion): ApiJson<SignupCompletion>,
) -> Result<ApiResponse<AuthSession>> {
    let session = state
        .auth_service
        .complete_signup(completion, &client_metadata(&headers))
        .await?;
    Ok(ApiResponse::with_message(
        session,
        "Account setup completed successfully",
    ))
}

/// POST /auth/login
///
/// Unknown emails and wrong passwords both answer 401 "Invalid credentials".
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<LoginRequest>,
) -> Result<ApiResponse<AuthSession>> {
    let session = state
        .auth_service
        .login(&request.email, &request.password, &client_metadata(&headers))
        .await?;
    Ok(ApiResponse::with_message(session, "Login successful"))
}

/// POST /auth/refresh - Exchange a refresh token for a new access token
pub async fn refresh(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<RefreshRequest>,
) -> Result<ApiResponse<RefreshedAccess>> {
    let refreshed = state
        .auth_service
        .refresh_access_token(&request.refresh_token)
        .await?;
    Ok(ApiResponse::ok(refreshed))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ApiResponse<()> {
    state.auth_service.logout(&user);
    ApiResponse::message("Logged out successfully. Please delete the token from client storage.")
}

pub async fn me(Extension(CurrentUser(user)): Extension<CurrentUser>) -> ApiResponse<PublicUser> {
    ApiResponse::ok(PublicUser::from(user))
}

/// PUT /auth/profile - Partial update of name, email, phone and photo
///
/// `profile_photo` accepts `null` (remove), a base64 image data URI (upload)
/// or an absolute http(s) URL (stored as-is).
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    ApiJson(update): ApiJson<ProfileUpdate>,
) -> Result<ApiResponse<PublicUser>> {
    let updated = state.auth_service.update_profile(&user, update).await?;
    Ok(ApiResponse::with_message(
        updated,
        "Profile updated successfully",
    ))
}

/// POST /auth/password/reset
///
/// Answers the same message whether or not the email exists.
pub async fn request_password_reset(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<PasswordResetRequest>,
) -> Result<ApiResponse<()>> {
    state
        .auth_service
        .request_password_reset(&request.email)
        .await?;
    Ok(ApiResponse::message(
        "If an account with that email exists, a password reset link has been sent.",
    ))
}

pub async fn complete_password_reset(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<PasswordResetVerifyRequest>,
) -> Result<ApiResponse<()>> {
    state
        .auth_service
        .complete_password_reset(&request.token, &request.new_password)
        .await?;
    Ok(ApiResponse::message(
        "Password has been reset successfully. Please login with your new password.",
    ))
}

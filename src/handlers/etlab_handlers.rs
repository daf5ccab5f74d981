use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use super::{ApiJson, ApiResponse};
use crate::error::Result;
use crate::middleware::authenticate_headers;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct EtLabVerifyRequest {
    pub username: String,
    pub password: String,
}

/// POST /auth/etlab/verify - Verify student-portal credentials
///
/// With a bearer token the portal identity is linked to the caller's account.
/// Without an `Authorization` header this is the signup path: the matching
/// account is found or created and a signup token is returned. A bearer
/// header that fails verification answers 401.
///
/// ## Errors
/// - 401 for invalid portal credentials
/// - 502 / 503 / 504 when the portal fails, is unreachable or times out
pub async fn verify(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<EtLabVerifyRequest>,
) -> Result<Response> {
    if headers.contains_key(header::AUTHORIZATION) {
        let user = authenticate_headers(&state, &headers).await?;
        let linked = state
            .auth_service
            .link_etlab_identity(&user, &request.username, &request.password)
            .await?;
        return Ok(
            ApiResponse::with_message(linked, "EtLab account linked successfully").into_response(),
        );
    }

    let signup = state
        .auth_service
        .verify_etlab_signup(&request.username, &request.password)
        .await?;
    Ok(ApiResponse::with_message(signup, "EtLab credentials verified").into_response())
}

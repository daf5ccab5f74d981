pub mod auth_handlers;
pub mod etlab_handlers;
pub mod google_handlers;
pub mod passkey_handlers;

use axum::{
    extract::{FromRequest, FromRequestParts, Query, Request},
    http::{request::Parts, HeaderMap},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post, put},
    Router,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::AppError;
use crate::middleware::{add_security_headers, require_auth};
use crate::models::ClientMetadata;
use crate::AppState;

/// JSON body extractor whose rejections use the standard error envelope.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(AppError::Validation(format!(
                "Invalid request body: {}",
                rejection.body_text()
            ))),
        }
    }
}

/// Query string extractor with the same envelope on rejection.
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(ApiQuery(value)),
            Err(rejection) => Err(AppError::Validation(format!(
                "Invalid query string: {}",
                rejection.body_text()
            ))),
        }
    }
}

/// Success envelope: `{"success": true, "data": ..., "message": ...}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn with_message(data: T, message: &str) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message.to_string()),
        }
    }
}

impl ApiResponse<()> {
    pub fn message(message: &str) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(message.to_string()),
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// Client IP and user agent recorded with new refresh tokens.
pub fn client_metadata(headers: &HeaderMap) -> ClientMetadata {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let ip_address = header("cf-connecting-ip").or_else(|| {
        header("x-forwarded-for").and_then(|list| {
            list.split(',')
                .next()
                .map(|ip| ip.trim().to_string())
                .filter(|ip| !ip.is_empty())
        })
    });

    ClientMetadata {
        ip_address,
        user_agent: header("user-agent"),
    }
}

/// All `/auth` routes. Protected routes run behind [`require_auth`].
pub fn auth_router(state: AppState) -> Router {
    let auth_layer = middleware::from_fn_with_state(state.clone(), require_auth);

    let protected = Router::new()
        .route("/auth/logout", post(auth_handlers::logout))
        .route("/auth/me", get(auth_handlers::me))
        .route("/auth/profile", put(auth_handlers::update_profile))
        .route(
            "/auth/passkey/register/start",
            post(passkey_handlers::registration_start),
        )
        .route(
            "/auth/passkey/register/verify",
            post(passkey_handlers::registration_verify),
        )
        .route("/auth/passkeys", get(passkey_handlers::list_passkeys))
        .route("/auth/passkeys/{id}", delete(passkey_handlers::delete_passkey))
        .route_layer(auth_layer.clone());

    Router::new()
        .route("/auth/signup", post(auth_handlers::signup))
        .route("/auth/signup/complete", post(auth_handlers::complete_signup))
        .route("/auth/login", post(auth_handlers::login))
        .route("/auth/refresh", post(auth_handlers::refresh))
        .route(
            "/auth/password/reset",
            post(auth_handlers::request_password_reset),
        )
        .route(
            "/auth/password/reset/verify",
            post(auth_handlers::complete_password_reset),
        )
        .route("/auth/etlab/verify", post(etlab_handlers::verify))
        .route(
            "/auth/google",
            get(google_handlers::initiate)
                .merge(delete(google_handlers::disconnect).route_layer(auth_layer)),
        )
        .route("/auth/google/callback", get(google_handlers::callback))
        .route("/auth/passkey/login/start", post(passkey_handlers::login_start))
        .route(
            "/auth/passkey/login/verify",
            post(passkey_handlers::login_verify),
        )
        .merge(protected)
        .layer(middleware::from_fn(add_security_headers))
        .with_state(state)
}

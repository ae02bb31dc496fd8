//! Password login.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;

use super::error::{AuthError, ErrorBody};
use super::policy::RequestContext;
use super::service;
use super::state::AuthState;
use super::types::{LoginRequest, SessionResponse};

/// Exchange an identifier and password for tokens.
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    params(
        ("x-device-id" = String, Header, description = "Client-stable device id"),
        ("x-app-mode" = String, Header, description = "prod, staging, debug or release")
    ),
    responses(
        (status = 200, description = "Logged in", body = SessionResponse),
        (status = 400, description = "Invalid identifier", body = ErrorBody),
        (status = 401, description = "Invalid credentials", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    if let Err(err) = RequestContext::from_headers(&headers) {
        return err.into_response();
    }

    let request: LoginRequest = match payload {
        Some(Json(payload)) => payload,
        None => return AuthError::MissingPayload.into_response(),
    };

    match service::login(&auth_state, request).await {
        Ok((account, tokens)) => (
            StatusCode::OK,
            Json(SessionResponse {
                user: (&account).into(),
                tokens,
            }),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

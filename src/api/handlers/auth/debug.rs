//! QA helper exposing the latest stored OTP.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::warn;

use super::error::{AuthError, ErrorBody};
use super::service;
use super::state::AuthState;
use super::types::{DebugOtpRequest, DebugOtpResponse};

pub const DEBUG_SECRET_HEADER: &str = "x-debug-secret";

/// Return the latest unverified OTP for an identifier.
///
/// Without `--debug-endpoints` or a matching `x-debug-secret` the route answers a
/// bare 404.
#[utoipa::path(
    post,
    path = "/auth/debug-get-otp",
    request_body = DebugOtpRequest,
    params(
        ("x-debug-secret" = Option<String>, Header, description = "Shared QA secret")
    ),
    responses(
        (status = 200, description = "Latest stored OTP", body = DebugOtpResponse),
        (status = 400, description = "Invalid identifier or no OTP", body = ErrorBody),
        (status = 404, description = "Debug endpoints disabled")
    ),
    tag = "auth"
)]
pub async fn debug_get_otp(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<DebugOtpRequest>>,
) -> impl IntoResponse {
    let presented = headers
        .get(DEBUG_SECRET_HEADER)
        .and_then(|value| value.to_str().ok());
    if !auth_state.config().debug_access_allowed(presented) {
        if presented.is_some() {
            warn!("debug OTP lookup refused: secret mismatch");
        }
        return StatusCode::NOT_FOUND.into_response();
    }

    let request: DebugOtpRequest = match payload {
        Some(Json(payload)) => payload,
        None => return AuthError::MissingPayload.into_response(),
    };

    match service::debug_latest_otp(&auth_state, &request.identifier).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => err.into_response(),
    }
}

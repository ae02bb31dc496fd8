//! Registration endpoint.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;

use super::error::{AuthError, ErrorBody};
use super::policy::RequestContext;
use super::service::{self, SignupOutcome};
use super::state::AuthState;
use super::types::{OtpChallengeResponse, RegistrationResponse, SignupRequest};

/// Register with an email or phone number.
///
/// Returns 201 with tokens when the OTP step is bypassed, otherwise 200 with the
/// OTP challenge.
#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = SignupRequest,
    params(
        ("x-device-id" = String, Header, description = "Client-stable device id"),
        ("x-app-mode" = String, Header, description = "prod, staging, debug or release")
    ),
    responses(
        (status = 200, description = "OTP issued", body = OtpChallengeResponse),
        (status = 201, description = "Account created without OTP", body = RegistrationResponse),
        (status = 400, description = "Validation failure or conflict", body = ErrorBody),
        (status = 401, description = "Malformed bearer token", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn signup(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<SignupRequest>>,
) -> impl IntoResponse {
    let ctx = match RequestContext::from_headers(&headers) {
        Ok(ctx) => ctx,
        Err(err) => return err.into_response(),
    };

    let request: SignupRequest = match payload {
        Some(Json(payload)) => payload,
        None => return AuthError::MissingPayload.into_response(),
    };

    match service::signup(&auth_state, &ctx, request).await {
        Ok(SignupOutcome::Registered(registration)) => (
            StatusCode::CREATED,
            Json(RegistrationResponse {
                message: "Registration successful".to_string(),
                user: (&registration.account).into(),
                tokens: registration.tokens,
                upgraded: registration.upgraded,
            }),
        )
            .into_response(),
        Ok(SignupOutcome::Challenge(challenge)) => (StatusCode::OK, Json(challenge)).into_response(),
        Err(err) => err.into_response(),
    }
}

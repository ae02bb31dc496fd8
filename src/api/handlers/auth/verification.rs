//! OTP verification and resend endpoints.

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
use super::types::{OtpChallengeResponse, RegistrationResponse, ResendOtpRequest, VerifyOtpRequest};

/// Verify the latest OTP for an identifier and materialize the account.
///
/// A fresh account answers 201; an upgraded guest answers 200.
#[utoipa::path(
    post,
    path = "/auth/verify-otp",
    request_body = VerifyOtpRequest,
    params(
        ("x-device-id" = String, Header, description = "Client-stable device id"),
        ("x-app-mode" = String, Header, description = "prod, staging, debug or release")
    ),
    responses(
        (status = 200, description = "Guest account upgraded", body = RegistrationResponse),
        (status = 201, description = "Account created", body = RegistrationResponse),
        (status = 400, description = "Missing, expired or invalid OTP, or no pending signup", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn verify_otp(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyOtpRequest>>,
) -> impl IntoResponse {
    let ctx = match RequestContext::from_headers(&headers) {
        Ok(ctx) => ctx,
        Err(err) => return err.into_response(),
    };

    let request: VerifyOtpRequest = match payload {
        Some(Json(payload)) => payload,
        None => return AuthError::MissingPayload.into_response(),
    };

    match service::verify_otp(&auth_state, &ctx, request).await {
        Ok(registration) => {
            let (status, message) = if registration.upgraded {
                (StatusCode::OK, "Guest account upgraded")
            } else {
                (StatusCode::CREATED, "Registration successful")
            };
            (
                status,
                Json(RegistrationResponse {
                    message: message.to_string(),
                    user: (&registration.account).into(),
                    tokens: registration.tokens,
                    upgraded: registration.upgraded,
                }),
            )
                .into_response()
        }
        Err(err) => err.into_response(),
    }
}

/// Issue a fresh OTP, invalidating every earlier code for the identifier.
#[utoipa::path(
    post,
    path = "/auth/resend-otp",
    request_body = ResendOtpRequest,
    params(
        ("x-device-id" = String, Header, description = "Client-stable device id"),
        ("x-app-mode" = String, Header, description = "prod, staging, debug or release")
    ),
    responses(
        (status = 200, description = "OTP reissued or bypassed", body = OtpChallengeResponse),
        (status = 400, description = "Invalid identifier", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn resend_otp(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResendOtpRequest>>,
) -> impl IntoResponse {
    let ctx = match RequestContext::from_headers(&headers) {
        Ok(ctx) => ctx,
        Err(err) => return err.into_response(),
    };

    let request: ResendOtpRequest = match payload {
        Some(Json(payload)) => payload,
        None => return AuthError::MissingPayload.into_response(),
    };

    match service::resend_otp(&auth_state, &ctx, request).await {
        Ok(challenge) => (StatusCode::OK, Json(challenge)).into_response(),
        Err(err) => err.into_response(),
    }
}

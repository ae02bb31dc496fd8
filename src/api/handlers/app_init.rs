//! Guest bootstrap.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;

use super::auth::{AuthState, ErrorBody, bootstrap_guest, policy::RequestContext, types::GuestResponse};

/// Return the account bound to `x-device-id`, creating a guest on first contact.
#[utoipa::path(
    post,
    path = "/app-init",
    params(
        ("x-device-id" = String, Header, description = "Client-stable device id"),
        ("x-app-mode" = String, Header, description = "prod, staging, debug or release")
    ),
    responses(
        (status = 200, description = "Existing account for the device", body = GuestResponse),
        (status = 201, description = "Guest account created", body = GuestResponse),
        (status = 400, description = "Missing or invalid headers", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn app_init(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    let ctx = match RequestContext::from_headers(&headers) {
        Ok(ctx) => ctx,
        Err(err) => return err.into_response(),
    };

    match bootstrap_guest(&auth_state, &ctx).await {
        Ok((resolution, tokens)) => {
            let status = if resolution.created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            (
                status,
                Json(GuestResponse {
                    user: (&resolution.account).into(),
                    tokens,
                    created: resolution.created,
                }),
            )
                .into_response()
        }
        Err(err) => err.into_response(),
    }
}

//! Typed errors for the signup/verification pipeline.
//!
//! Provider failures never show up here: the provider chain recovers from them and
//! attaches a diagnostic note instead.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("x-device-id header is required")]
    MissingDeviceId,
    #[error("x-app-mode header must be one of: prod, staging, debug, release")]
    InvalidAppMode,
    #[error("Authorization header must use the Bearer scheme")]
    InvalidBearer,
    #[error("Missing payload")]
    MissingPayload,
    #[error("{0}")]
    Validation(String),
    #[error("Phone number must contain exactly 10 digits")]
    InvalidPhoneFormat,
    #[error("{0}")]
    Conflict(String),
    #[error("Invalid OTP")]
    InvalidOtp,
    #[error("OTP expired")]
    OtpExpired,
    #[error("No OTP found for identifier")]
    NoOtpFound,
    #[error("Signup data not found")]
    SignupDataMissing,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// JSON body returned for every failed auth request.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

impl AuthError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials | Self::InvalidBearer => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingDeviceId => "missing_device_id",
            Self::InvalidAppMode => "invalid_app_mode",
            Self::InvalidBearer => "invalid_bearer",
            Self::MissingPayload | Self::Validation(_) => "validation_error",
            Self::InvalidPhoneFormat => "invalid_phone_format",
            Self::Conflict(_) => "conflict",
            Self::InvalidOtp => "invalid_otp",
            Self::OtpExpired => "otp_expired",
            Self::NoOtpFound => "no_otp_found",
            Self::SignupDataMissing => "signup_data_missing",
            Self::InvalidCredentials => "invalid_credentials",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Internal(err) => {
                error!("auth request failed: {err:#}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorBody {
            error: message,
            code: self.code().to_string(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, anyhow};
    use axum::body::to_bytes;

    #[test]
    fn taxonomy_maps_to_status_codes() {
        assert_eq!(AuthError::MissingDeviceId.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AuthError::InvalidOtp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AuthError::SignupDataMissing.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AuthError::conflict("Email already registered").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AuthError::InvalidCredentials.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::Internal(anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn internal_errors_are_sanitized() -> Result<()> {
        let response =
            AuthError::Internal(anyhow!("connection refused: 10.0.0.3:5432")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let body: ErrorBody = serde_json::from_slice(&body)?;
        assert_eq!(body.error, "Internal server error");
        assert_eq!(body.code, "internal_error");
        Ok(())
    }

    #[tokio::test]
    async fn client_errors_keep_their_message() -> Result<()> {
        let response = AuthError::SignupDataMissing.into_response();
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let body: ErrorBody = serde_json::from_slice(&body)?;
        assert_eq!(body.error, "Signup data not found");
        assert_eq!(body.code, "signup_data_missing");
        Ok(())
    }
}

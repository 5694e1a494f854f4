use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use shared::{AppError, ErrorCategory, ErrorResponse, TokenError};
use thiserror::Error;

/// ハンドラが返すエラー。`{"success": false, "error": ...}` として返す
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub AppError);

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self(AppError::Validation(message.into()))
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self(AppError::Authentication(message.into()))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self(AppError::NotFound(message.into()))
    }
}

impl From<domain::DomainError> for ApiError {
    fn from(error: domain::DomainError) -> Self {
        Self(error.into())
    }
}

impl From<TokenError> for ApiError {
    fn from(error: TokenError) -> Self {
        tracing::debug!(error = %error, "トークン検証に失敗しました");
        Self::unauthorized("Invalid or expired token")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if self.0.metadata().category != ErrorCategory::Client {
            tracing::error!(error = %self.0, "リクエスト処理中にエラーが発生しました");
        }
        (status, Json(ErrorResponse::from_app_error(&self.0))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_follows_error_kind() {
        let response = ApiError::not_found("todo 1").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = ApiError(AppError::Storage("poisoned".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = ApiError::from(TokenError::Expired).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

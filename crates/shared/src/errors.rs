use serde::{Deserialize, Serialize};
use thiserror::Error;

/// アプリケーション全体で使用される包括的なエラー型
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    // 入力エラー
    #[error("Validation failed: {0}")]
    Validation(String),

    // 認証・認可エラー
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    // リソースエラー
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    // 通信エラー
    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout occurred: {0}")]
    Timeout(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    // ローカル環境のエラー
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// エラーの分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// クライアントエラー（4xx相当）
    Client,
    /// サーバーエラー（5xx相当）
    Server,
    /// 一時的なエラー（通信断など）
    Transient,
}

/// エラーの重要度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// エラーメタデータ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMetadata {
    /// エラーコード
    pub code: &'static str,
    /// エラー分類
    pub category: ErrorCategory,
    /// エラー重要度
    pub severity: ErrorSeverity,
    /// 後で同じ操作をやり直せば成功し得るか
    pub retryable: bool,
}

impl ErrorMetadata {
    const fn new(
        code: &'static str,
        category: ErrorCategory,
        severity: ErrorSeverity,
        retryable: bool,
    ) -> Self {
        Self {
            code,
            category,
            severity,
            retryable,
        }
    }
}

impl AppError {
    /// エラーメタデータを取得
    pub fn metadata(&self) -> ErrorMetadata {
        use ErrorCategory::*;
        use ErrorSeverity::*;

        match self {
            AppError::Validation(_) => ErrorMetadata::new("VALIDATION_ERROR", Client, Info, false),
            AppError::Authentication(_) => {
                ErrorMetadata::new("AUTHENTICATION_ERROR", Client, Warning, false)
            }
            AppError::Authorization(_) => {
                ErrorMetadata::new("AUTHORIZATION_ERROR", Client, Warning, false)
            }
            AppError::NotFound(_) => ErrorMetadata::new("NOT_FOUND", Client, Info, false),
            AppError::Conflict(_) => ErrorMetadata::new("CONFLICT", Client, Info, false),
            AppError::Network(_) => ErrorMetadata::new("NETWORK_ERROR", Transient, Error, true),
            AppError::Timeout(_) => ErrorMetadata::new("TIMEOUT", Transient, Error, true),
            AppError::Server { .. } => ErrorMetadata::new("SERVER_ERROR", Server, Error, true),
            AppError::Storage(_) => ErrorMetadata::new("STORAGE_ERROR", Server, Error, false),
            AppError::Serialization(_) => {
                ErrorMetadata::new("SERIALIZATION_ERROR", Server, Error, false)
            }
            AppError::Configuration(_) => {
                ErrorMetadata::new("CONFIGURATION_ERROR", Server, Critical, false)
            }
            AppError::Cancelled => ErrorMetadata::new("CANCELLED", Client, Info, false),
            AppError::Internal(_) => ErrorMetadata::new("INTERNAL_ERROR", Server, Critical, false),
        }
    }

    /// HTTPステータスコードを取得
    pub fn http_status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) => 400,
            AppError::Authentication(_) => 401,
            AppError::Authorization(_) => 403,
            AppError::NotFound(_) => 404,
            AppError::Conflict(_) => 409,
            AppError::Timeout(_) => 504,
            AppError::Network(_) => 503,
            AppError::Server { status, .. } => *status,
            _ => 500,
        }
    }

    /// ユーザー向けメッセージを取得
    pub fn user_message(&self) -> String {
        match self {
            AppError::Validation(msg) => msg.clone(),
            AppError::Authentication(_) => "Invalid credentials".to_string(),
            AppError::Authorization(_) => "You are not allowed to do that".to_string(),
            AppError::NotFound(_) => "Not found".to_string(),
            AppError::Conflict(msg) => msg.clone(),
            AppError::Network(_) | AppError::Timeout(_) => {
                "Could not reach the server. Please try again".to_string()
            }
            _ => "Something went wrong".to_string(),
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self, AppError::Authentication(_))
    }

    /// HTTP ステータスと応答ボディからエラーを分類する
    ///
    /// ボディが `{"error": ...}` または `{"message": ...}` の JSON であればその文言を使う。
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = extract_message(body).unwrap_or_else(|| format!("HTTP {status}"));
        match status {
            400 | 422 => AppError::Validation(message),
            401 => AppError::Authentication(message),
            403 => AppError::Authorization(message),
            404 => AppError::NotFound(message),
            409 => AppError::Conflict(message),
            408 | 504 => AppError::Timeout(message),
            _ => AppError::Server { status, message },
        }
    }
}

fn extract_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["error", "message"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
}

impl From<domain::DomainError> for AppError {
    fn from(error: domain::DomainError) -> Self {
        AppError::Validation(error.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::Serialization(error.to_string())
    }
}

/// API のエラーレスポンス `{"success": false, "error": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }

    /// AppErrorからErrorResponseを作成
    ///
    /// サーバー内部の詳細はクライアントに返さない。
    pub fn from_app_error(error: &AppError) -> Self {
        match error.metadata().category {
            ErrorCategory::Client => match error {
                AppError::Validation(msg)
                | AppError::Authentication(msg)
                | AppError::Authorization(msg)
                | AppError::NotFound(msg)
                | AppError::Conflict(msg) => Self::new(msg.clone()),
                other => Self::new(other.user_message()),
            },
            _ => Self::new("Internal server error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_metadata() {
        let error = AppError::NotFound("test".to_string());
        let metadata = error.metadata();

        assert_eq!(metadata.code, "NOT_FOUND");
        assert_eq!(metadata.category, ErrorCategory::Client);
        assert!(!metadata.retryable);
    }

    #[test]
    fn test_network_errors_are_transient() {
        let metadata = AppError::Network("connection refused".to_string()).metadata();

        assert_eq!(metadata.category, ErrorCategory::Transient);
        assert!(metadata.retryable);
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(AppError::NotFound("x".into()).http_status_code(), 404);
        assert_eq!(AppError::Authentication("x".into()).http_status_code(), 401);
        assert_eq!(AppError::Conflict("x".into()).http_status_code(), 409);
        assert_eq!(AppError::Validation("x".into()).http_status_code(), 400);
        assert_eq!(AppError::Internal("x".into()).http_status_code(), 500);
    }

    #[test]
    fn test_from_status_classifies_responses() {
        let error = AppError::from_status(401, r#"{"success":false,"error":"Incorrect Credentials"}"#);
        assert_eq!(error, AppError::Authentication("Incorrect Credentials".into()));

        let error = AppError::from_status(401, r#"{"success":false,"message":"Invalid or expired token"}"#);
        assert_eq!(error, AppError::Authentication("Invalid or expired token".into()));

        assert!(matches!(AppError::from_status(409, "{}"), AppError::Conflict(_)));
        assert!(matches!(AppError::from_status(400, ""), AppError::Validation(_)));
        assert_eq!(
            AppError::from_status(502, "<html>bad gateway</html>"),
            AppError::Server {
                status: 502,
                message: "HTTP 502".into()
            }
        );
    }

    #[test]
    fn test_error_response_hides_server_details() {
        let response = ErrorResponse::from_app_error(&AppError::Storage("disk full".into()));
        assert_eq!(response.error, "Internal server error");
        assert!(!response.success);

        let response = ErrorResponse::from_app_error(&AppError::Conflict(
            "A user with this email already exists.".into(),
        ));
        assert_eq!(response.error, "A user with this email already exists.");
    }

    #[test]
    fn test_domain_error_becomes_validation() {
        let error: AppError = domain::DomainError::InvalidTitle("empty".into()).into();
        assert!(matches!(error, AppError::Validation(_)));
    }
}

use crate::errors::DomainError;
use crate::todo::string_or_number;
use serde::{Deserialize, Serialize};
use std::fmt;

/// パスワードの最小文字数
pub const MIN_PASSWORD_LEN: usize = 6;

/// ログインユーザーのプロフィール
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl UserProfile {
    /// サインイン応答にユーザー情報が無い場合のプロフィール
    pub fn from_email(email: &str) -> Self {
        Self {
            id: email.to_string(),
            email: email.to_string(),
            name: None,
        }
    }
}

/// 現在のセッション（トークンとユーザー）
///
/// どちらも無い状態がログアウト状態。
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub token: Option<String>,
    pub user: Option<UserProfile>,
}

impl Session {
    pub fn new(token: Option<String>, user: Option<UserProfile>) -> Self {
        Self { token, user }
    }

    /// トークンまたはユーザーのどちらかがあれば認証済みとみなす
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some() || self.user.is_some()
    }

    pub fn is_empty(&self) -> bool {
        !self.is_authenticated()
    }
}

// トークンをログに出さない
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("user", &self.user)
            .finish()
    }
}

/// ログイン・サインアップ入力
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: &str, password: &str) -> Result<Self, DomainError> {
        Ok(Self {
            email: validate_email(email)?,
            password: validate_password(password)?,
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub fn validate_email(email: &str) -> Result<String, DomainError> {
    let trimmed = email.trim();
    if trimmed.is_empty() {
        return Err(DomainError::InvalidEmail("email is required".to_string()));
    }
    match trimmed.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
            Ok(trimmed.to_string())
        }
        _ => Err(DomainError::InvalidEmail(format!(
            "enter a valid email: {trimmed}"
        ))),
    }
}

pub fn validate_password(password: &str) -> Result<String, DomainError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(DomainError::InvalidPassword(format!(
            "minimum {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(password.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_presence() {
        assert!(Session::default().is_empty());
        assert!(Session::new(Some("t".into()), None).is_authenticated());
        assert!(Session::new(None, Some(UserProfile::from_email("a@b.c"))).is_authenticated());
    }

    #[test]
    fn test_session_debug_redacts_token() {
        let session = Session::new(Some("secret-token".into()), None);
        let printed = format!("{session:?}");
        assert!(!printed.contains("secret-token"));
    }

    #[test]
    fn test_credentials_validation() {
        assert!(Credentials::new("user@example.com", "hunter22").is_ok());
        assert!(matches!(
            Credentials::new("", "hunter22"),
            Err(DomainError::InvalidEmail(_))
        ));
        assert!(matches!(
            Credentials::new("no-at-sign", "hunter22"),
            Err(DomainError::InvalidEmail(_))
        ));
        assert!(matches!(
            Credentials::new("user@example.com", "12345"),
            Err(DomainError::InvalidPassword(_))
        ));
    }

    #[test]
    fn test_user_profile_accepts_numeric_id() {
        let user: UserProfile =
            serde_json::from_str(r#"{"id":3,"email":"a@b.c","name":"Ann"}"#).unwrap();
        assert_eq!(user.id, "3");
        assert_eq!(user.name.as_deref(), Some("Ann"));
    }
}

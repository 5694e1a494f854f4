//! JWT の発行と検証（API サーバー側で使用）

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// ユーザー ID
    pub sub: String,
    pub email: String,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token missing or malformed")]
    Malformed,
    #[error("token expired")]
    Expired,
    #[error("token is too old to refresh")]
    RefreshWindowElapsed,
    #[error("token verification failed: {0}")]
    Jwt(jsonwebtoken::errors::Error),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(error: jsonwebtoken::errors::Error) -> Self {
        match error.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Jwt(error),
        }
    }
}

/// HS256 でトークンを署名・検証する
#[derive(Clone)]
pub struct TokenIssuer {
    enc: EncodingKey,
    dec: DecodingKey,
    ttl: Duration,
    refresh_window: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, ttl: Duration, refresh_window: Duration) -> Self {
        Self {
            enc: EncodingKey::from_secret(secret.as_bytes()),
            dec: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
            refresh_window,
        }
    }

    pub fn issue(&self, user_id: &str, email: &str) -> Result<String, TokenError> {
        self.issue_at(user_id, email, Utc::now())
    }

    /// 発行時刻を指定してトークンを作る
    pub fn issue_at(
        &self,
        user_id: &str,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let iat = now.timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            iat,
            exp: iat + self.ttl.as_secs() as i64,
        };
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.enc,
        )?)
    }

    /// 署名と有効期限を検証する
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        if token.trim().is_empty() {
            return Err(TokenError::Malformed);
        }
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        let data = jsonwebtoken::decode::<Claims>(token, &self.dec, &validation)?;
        Ok(data.claims)
    }

    /// リフレッシュ用の検証。署名が正しく、期限切れからリフレッシュ猶予内であれば受け付ける
    pub fn verify_for_refresh(&self, token: &str) -> Result<Claims, TokenError> {
        if token.trim().is_empty() {
            return Err(TokenError::Malformed);
        }
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        let claims = jsonwebtoken::decode::<Claims>(token, &self.dec, &validation)?.claims;

        let deadline = claims.exp + self.refresh_window.as_secs() as i64;
        if Utc::now().timestamp() > deadline {
            return Err(TokenError::RefreshWindowElapsed);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(
            "test-secret",
            Duration::from_secs(60),
            Duration::from_secs(3600),
        )
    }

    #[test]
    fn test_issue_and_verify() {
        let issuer = issuer();
        let token = issuer.issue("7", "a@b.c").unwrap();

        let claims = issuer.verify(&token).unwrap();
        assert_eq!(claims.sub, "7");
        assert_eq!(claims.email, "a@b.c");
        assert_eq!(claims.exp - claims.iat, 60);
    }

    #[test]
    fn test_expired_token_is_rejected_but_refreshable() {
        let issuer = issuer();
        let issued = Utc::now() - chrono::Duration::minutes(10);
        let token = issuer.issue_at("7", "a@b.c", issued).unwrap();

        assert!(matches!(issuer.verify(&token), Err(TokenError::Expired)));
        assert_eq!(issuer.verify_for_refresh(&token).unwrap().sub, "7");
    }

    #[test]
    fn test_refresh_window_elapsed() {
        let issuer = issuer();
        let issued = Utc::now() - chrono::Duration::hours(3);
        let token = issuer.issue_at("7", "a@b.c", issued).unwrap();

        assert!(matches!(
            issuer.verify_for_refresh(&token),
            Err(TokenError::RefreshWindowElapsed)
        ));
    }

    #[test]
    fn test_foreign_signature_is_rejected() {
        let other = TokenIssuer::new("other", Duration::from_secs(60), Duration::from_secs(60));
        let token = other.issue("7", "a@b.c").unwrap();

        assert!(matches!(issuer().verify(&token), Err(TokenError::Jwt(_))));
        assert!(matches!(issuer().verify(""), Err(TokenError::Malformed)));
    }
}

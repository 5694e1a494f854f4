//! パスワードハッシュ（Argon2id, PHC 文字列で保存）

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, ParamsBuilder, Version};
use shared::AppError;

#[derive(Debug, Clone)]
pub struct PasswordHashing {
    params: Params,
}

impl Default for PasswordHashing {
    fn default() -> Self {
        Self {
            params: Params::DEFAULT,
        }
    }
}

impl PasswordHashing {
    /// コストを下げた設定（テスト用）
    pub fn fast() -> Result<Self, AppError> {
        let params = ParamsBuilder::new()
            .m_cost(1024)
            .t_cost(1)
            .p_cost(1)
            .build()
            .map_err(|e| AppError::Configuration(format!("invalid argon2 params: {e}")))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    pub fn hash(&self, password: &str) -> Result<String, AppError> {
        let salt = SaltString::encode_b64(uuid::Uuid::new_v4().as_bytes())
            .map_err(|e| AppError::Internal(format!("salt encoding failed: {e}")))?;
        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AppError::Internal(format!("argon2 hashing failed: {e}")))
    }

    /// 保存済みハッシュと照合する。ハッシュが壊れている場合も不一致として扱う
    pub fn verify(&self, password: &str, stored: &str) -> bool {
        match PasswordHash::new(stored) {
            Ok(parsed) => self
                .argon2()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                tracing::warn!(error = %e, "保存済みパスワードハッシュを解析できません");
                false
            }
        }
    }

    /// `hash` をブロッキング用スレッドで実行する
    pub async fn hash_off_runtime(&self, password: String) -> Result<String, AppError> {
        let hashing = self.clone();
        tokio::task::spawn_blocking(move || hashing.hash(&password))
            .await
            .map_err(|e| AppError::Internal(format!("password hashing task failed: {e}")))?
    }

    /// `verify` をブロッキング用スレッドで実行する。タスクが失敗した場合は不一致
    pub async fn verify_off_runtime(&self, password: String, stored: String) -> bool {
        let hashing = self.clone();
        match tokio::task::spawn_blocking(move || hashing.verify(&password, &stored)).await {
            Ok(matched) => matched,
            Err(e) => {
                tracing::error!(error = %e, "パスワード照合タスクが失敗しました");
                false
            }
        }
    }
}

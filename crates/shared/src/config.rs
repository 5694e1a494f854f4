use crate::errors::AppError;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// 開発環境でのみ使う JWT 署名鍵
const DEV_JWT_SECRET: &str = "userSecret";

/// クライアント側の設定
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API のベース URL。未設定ならローカルモード
    pub api_base_url: Option<String>,
    /// 永続化ファイルを置くディレクトリ
    pub state_dir: PathBuf,
    pub request_timeout: Duration,
    /// 削除の取り消し猶予
    pub delete_grace: Duration,
    /// 未認証時のリダイレクト先
    pub landing_path: String,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 任意の参照関数から設定を組み立てる（テストでは環境変数を汚さずに使う）
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_base_url = lookup("TODO_API_BASE_URL")
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());

        let state_dir = lookup("TODO_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = lookup("HOME").unwrap_or_else(|| ".".to_string());
                PathBuf::from(home).join(".todo-client")
            });

        Ok(ClientConfig {
            api_base_url,
            state_dir,
            request_timeout: Duration::from_millis(parse_number(
                &lookup,
                "TODO_REQUEST_TIMEOUT_MS",
                10_000,
            )?),
            delete_grace: Duration::from_millis(parse_number(
                &lookup,
                "TODO_DELETE_GRACE_MS",
                5_000,
            )?),
            landing_path: lookup("TODO_LANDING_PATH").unwrap_or_else(|| "/".to_string()),
        })
    }

    /// バックエンドが設定されているか
    pub fn has_remote_api(&self) -> bool {
        self.api_base_url.is_some()
    }
}

/// API サーバー側の設定
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub environment: String,
    pub jwt_secret: String,
    /// CORS で許可するオリジン
    pub allowed_origin: String,
    pub token_ttl: Duration,
    /// 期限切れトークンをリフレッシュできる期間
    pub refresh_window: Duration,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "dev".to_string());

        let jwt_secret = match lookup("JWT_USER_SECRET").filter(|s| !s.is_empty()) {
            Some(secret) => secret,
            None if environment == "dev" => {
                tracing::warn!("JWT_USER_SECRET が未設定のため開発用の署名鍵を使用します");
                DEV_JWT_SECRET.to_string()
            }
            None => {
                return Err(AppError::Configuration(
                    "JWT_USER_SECRET is not defined".to_string(),
                ))
            }
        };

        Ok(ServerConfig {
            port: parse_number(&lookup, "PORT", 3000)?,
            environment,
            jwt_secret,
            allowed_origin: lookup("FRONT_END_URL")
                .unwrap_or_else(|| "http://localhost:5173".to_string()),
            token_ttl: Duration::from_secs(parse_number(&lookup, "TOKEN_TTL_SECS", 86_400)?),
            refresh_window: Duration::from_secs(parse_number(
                &lookup,
                "REFRESH_WINDOW_SECS",
                604_800,
            )?),
        })
    }
}

fn parse_number<F, T>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Configuration(format!("{key} must be a number, got {raw:?}"))),
        None => Ok(default),
    }
}

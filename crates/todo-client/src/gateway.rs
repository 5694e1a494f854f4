//! API への送信口
//!
//! すべてのリクエストに保存済みトークンを `Authorization: Bearer` で付与し、
//! 401 を受けたときはトークンのリフレッシュを一度だけ行ってから再送する。
//! 同時に複数のリクエストが 401 を受けても、リフレッシュ呼び出しは常に一本に束ねられる。

use crate::credentials::CredentialStore;
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use shared::{AppError, ClientConfig};
use std::mem;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

pub const SIGNUP_PATH: &str = "/api/v1/user/signup";
pub const SIGNIN_PATH: &str = "/api/v1/user/signin";
pub const VALIDATE_TOKEN_PATH: &str = "/api/v1/user/validate-token";
pub const REFRESH_PATH: &str = "/api/v1/user/refresh";
pub const TODO_PATH: &str = "/api/v1/todo";

/// リフレッシュの対象外となるエンドポイント
const PUBLIC_PATHS: [&str; 4] = [SIGNUP_PATH, SIGNIN_PATH, VALIDATE_TOKEN_PATH, REFRESH_PATH];

/// 送信するリクエスト
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    /// 401 のときにリフレッシュして再送するか
    pub refreshable: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            body: None,
            refreshable: !PUBLIC_PATHS.contains(&path),
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: &str, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn put(path: &str, body: Value) -> Self {
        Self::new(Method::PUT, path).with_body(body)
    }

    pub fn delete(path: &str, body: Value) -> Self {
        Self::new(Method::DELETE, path).with_body(body)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    token: Option<String>,
}

/// 進行中のリフレッシュの状態
enum RefreshSlot {
    Idle,
    /// リフレッシュ完了を待っている呼び出し元。`true` はリフレッシュ成功
    InFlight(Vec<oneshot::Sender<bool>>),
}

/// 401 後の再送方針
enum RetryPlan {
    /// 別のリクエストが既にトークンを更新している
    Immediately,
    /// 進行中のリフレッシュに合流する
    Wait(oneshot::Receiver<bool>),
    /// 自分がリフレッシュを行う
    Refresh,
    /// セッションが消えているので再送しない
    GiveUp,
}

/// HTTP クライアント
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<CredentialStore>,
    refresh: Mutex<RefreshSlot>,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        config: &ClientConfig,
        credentials: Arc<CredentialStore>,
    ) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AppError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            refresh: Mutex::new(RefreshSlot::Idle),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// リクエストを送信し、成功時の JSON ボディを `T` として返す
    ///
    /// 401 以外のエラーはそのまま呼び出し元に返す。どのリクエストも再送は最大一回。
    pub async fn send<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, AppError> {
        let sent_with = self.credentials.token();
        let response = self.execute(&request, sent_with.as_deref()).await?;

        if response.status() != StatusCode::UNAUTHORIZED || !request.refreshable {
            return decode(response).await;
        }
        let original = error_from(response).await;

        // トークン無しで 401 になった場合はリフレッシュのしようがない
        let Some(sent_with) = sent_with else {
            return Err(original);
        };

        let refreshed = match self.plan_retry(&sent_with) {
            RetryPlan::Immediately => true,
            RetryPlan::Wait(rx) => {
                debug!(path = %request.path, "進行中のトークンリフレッシュを待機します");
                rx.await.unwrap_or(false)
            }
            RetryPlan::Refresh => self.refresh_token(&sent_with).await,
            RetryPlan::GiveUp => false,
        };
        if !refreshed {
            return Err(original);
        }

        debug!(path = %request.path, "リフレッシュ後のトークンで再送します");
        let token = self.credentials.token();
        let response = self.execute(&request, token.as_deref()).await?;
        decode(response).await
    }

    fn plan_retry(&self, sent_with: &str) -> RetryPlan {
        let mut slot = self.refresh.lock().unwrap_or_else(PoisonError::into_inner);

        // リフレッシュ完了時はスロットを戻す前にトークンを保存するため、
        // ロック下でトークンを比べれば完了済みのリフレッシュを取りこぼさない
        match self.credentials.token() {
            None => return RetryPlan::GiveUp,
            Some(current) if current != sent_with => return RetryPlan::Immediately,
            Some(_) => {}
        }

        match &mut *slot {
            RefreshSlot::InFlight(waiters) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                RetryPlan::Wait(rx)
            }
            RefreshSlot::Idle => {
                *slot = RefreshSlot::InFlight(Vec::new());
                RetryPlan::Refresh
            }
        }
    }

    /// リフレッシュを実行し、待機中の呼び出し元へ結果を配る
    async fn refresh_token(&self, current: &str) -> bool {
        let guard = RefreshGuard {
            slot: &self.refresh,
            refreshed: false,
        };

        info!("トークンをリフレッシュします");
        let request = ApiRequest::new(Method::POST, REFRESH_PATH);
        let outcome = match self.execute(&request, Some(current)).await {
            Ok(response) => decode::<RefreshResponse>(response).await,
            Err(e) => Err(e),
        };

        let refreshed = match outcome {
            Ok(RefreshResponse { token: Some(token) }) if !token.is_empty() => {
                self.credentials.set_token(Some(&token));
                info!("トークンリフレッシュ成功");
                true
            }
            Ok(_) => {
                // 新しいトークンが返らない場合は現在のトークンのまま再送する
                warn!("リフレッシュ応答にトークンが含まれていません");
                true
            }
            Err(e) => {
                warn!(error = %e, "トークンリフレッシュ失敗。セッションを破棄します");
                self.credentials.clear_all();
                false
            }
        };
        guard.finish(refreshed);
        refreshed
    }

    async fn execute(&self, request: &ApiRequest, token: Option<&str>) -> Result<Response, AppError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self.http.request(request.method.clone(), &url);
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!(method = %request.method, path = %request.path, "API リクエスト送信");
        builder.send().await.map_err(transport_error)
    }
}

/// リフレッシュ担当のタスクが途中で破棄されてもスロットを空きに戻す
struct RefreshGuard<'a> {
    slot: &'a Mutex<RefreshSlot>,
    refreshed: bool,
}

impl RefreshGuard<'_> {
    fn finish(mut self, refreshed: bool) {
        self.refreshed = refreshed;
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        let waiters = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            match mem::replace(&mut *slot, RefreshSlot::Idle) {
                RefreshSlot::InFlight(waiters) => waiters,
                RefreshSlot::Idle => Vec::new(),
            }
        };
        for waiter in waiters {
            let _ = waiter.send(self.refreshed);
        }
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, AppError> {
    if !response.status().is_success() {
        return Err(error_from(response).await);
    }
    let body = response.text().await.map_err(transport_error)?;
    let body = if body.trim().is_empty() { "null" } else { body.as_str() };
    Ok(serde_json::from_str(body)?)
}

async fn error_from(response: Response) -> AppError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    AppError::from_status(status, &body)
}

fn transport_error(error: reqwest::Error) -> AppError {
    if error.is_timeout() {
        AppError::Timeout(error.to_string())
    } else {
        AppError::Network(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_endpoints_are_not_refreshable() {
        assert!(!ApiRequest::post(SIGNIN_PATH, Value::Null).refreshable);
        assert!(!ApiRequest::get(VALIDATE_TOKEN_PATH).refreshable);
        assert!(!ApiRequest::new(Method::POST, REFRESH_PATH).refreshable);
        assert!(ApiRequest::get(TODO_PATH).refreshable);
    }

    #[tokio::test]
    async fn test_transport_failure_maps_to_network_error() {
        let storage = Arc::new(crate::storage::MemoryStorage::new());
        let credentials = Arc::new(CredentialStore::new(storage));
        let config = ClientConfig::from_lookup(|_| None).unwrap();
        // 接続を受け付けないポート
        let client = ApiClient::new("http://127.0.0.1:1", &config, credentials).unwrap();

        let result = client.send::<Value>(ApiRequest::get(TODO_PATH)).await;
        assert!(matches!(result, Err(AppError::Network(_))));
    }
}

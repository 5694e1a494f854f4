//! ログイン・サインアップ・ログアウトと現在のセッション状態

use crate::credentials::CredentialStore;
use crate::gateway::{ApiClient, ApiRequest, SIGNIN_PATH, SIGNUP_PATH, VALIDATE_TOKEN_PATH};
use crate::notify::{Notification, Notifier};
use domain::{Credentials, Session, UserProfile};
use serde::Deserialize;
use serde_json::{json, Value};
use shared::AppError;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct SigninResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    user: Option<UserProfile>,
}

/// UI に公開するセッション状態
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub user: Option<UserProfile>,
    pub authenticated: bool,
    /// login / signup / logout のいずれかが実行中
    pub loading: bool,
}

/// ページ表示時のトークン検証結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCheck {
    Valid,
    /// サーバーに拒否された。セッションは破棄済み
    Invalid,
    NoToken,
    /// サーバーに到達できなかった。セッションは保持する
    Unreachable,
    /// 検証中に取り消された。副作用なし
    Cancelled,
}

/// セッション操作の窓口
///
/// バックエンドが設定されていない場合はモックモードとして動作し、
/// ログインはローカルのデモセッションを作り、サインアップは常に成功する。
pub struct SessionController {
    api: Option<Arc<ApiClient>>,
    credentials: Arc<CredentialStore>,
    notifier: Arc<dyn Notifier>,
    loading: watch::Sender<usize>,
}

impl SessionController {
    pub fn new(
        api: Option<Arc<ApiClient>>,
        credentials: Arc<CredentialStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (loading, _) = watch::channel(0);
        Self {
            api,
            credentials,
            notifier,
            loading,
        }
    }

    pub fn is_mock(&self) -> bool {
        self.api.is_none()
    }

    /// 起動時に保存済みセッションを読み込む
    pub fn restore(&self) -> Session {
        let session = self.credentials.session();
        info!(authenticated = session.is_authenticated(), "保存済みセッションを復元しました");
        session
    }

    pub fn state(&self) -> SessionState {
        let session = self.credentials.session();
        SessionState {
            authenticated: session.is_authenticated(),
            user: session.user,
            loading: *self.loading.borrow() > 0,
        }
    }

    pub fn subscribe(&self) -> SessionWatch {
        SessionWatch {
            session: self.credentials.subscribe(),
            loading: self.loading.subscribe(),
        }
    }

    /// ログインしてセッションを保存する
    ///
    /// 失敗時は通知を出してからエラーを返す。既存のセッションには触れない。
    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile, AppError> {
        let credentials = Credentials::new(email, password)?;
        let _loading = self.begin();

        let result = match &self.api {
            Some(api) => self.remote_login(api, &credentials).await,
            None => {
                let user = UserProfile::from_email(&credentials.email);
                let token = format!("local-{}", ulid::Ulid::new());
                Ok((token, user))
            }
        };

        match result {
            Ok((token, user)) => {
                self.credentials.set_session(&token, &user);
                info!(email = %user.email, "ログインしました");
                self.notifier
                    .notify(Notification::info("Signed in").with_description("Welcome back!"));
                Ok(user)
            }
            Err(e) => {
                warn!(error = %e, "ログインに失敗しました");
                self.notifier.notify(
                    Notification::error("Sign in failed").with_description(e.user_message()),
                );
                Err(e)
            }
        }
    }

    async fn remote_login(
        &self,
        api: &ApiClient,
        credentials: &Credentials,
    ) -> Result<(String, UserProfile), AppError> {
        let body = json!({ "email": credentials.email, "password": credentials.password });
        let response: SigninResponse = api.send(ApiRequest::post(SIGNIN_PATH, body)).await?;

        let token = match response.token {
            Some(token) if response.success && !token.is_empty() => token,
            _ => {
                return Err(AppError::Authentication(
                    response
                        .message
                        .unwrap_or_else(|| "Incorrect Credentials".to_string()),
                ))
            }
        };
        let user = response.user.unwrap_or_else(|| {
            UserProfile::from_email(response.email.as_deref().unwrap_or(&credentials.email))
        });
        Ok((token, user))
    }

    /// アカウントを作成する。セッションは作らない
    pub async fn signup(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<(), AppError> {
        let credentials = Credentials::new(email, password)?;
        let name = name.map(str::trim).filter(|name| !name.is_empty());
        let _loading = self.begin();

        let result = match &self.api {
            Some(api) => {
                let body = json!({
                    "email": credentials.email,
                    "password": credentials.password,
                    "name": name,
                });
                api.send::<Value>(ApiRequest::post(SIGNUP_PATH, body))
                    .await
                    .map(|_| ())
            }
            None => Ok(()),
        };

        match result {
            Ok(()) => {
                info!(email = %credentials.email, "サインアップしました");
                self.notifier.notify(
                    Notification::info("Signup successful")
                        .with_description("Please login to continue"),
                );
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "サインアップに失敗しました");
                self.notifier.notify(
                    Notification::error("Signup failed").with_description(e.user_message()),
                );
                Err(e)
            }
        }
    }

    /// ローカルのセッションを破棄する。ネットワークには触れず、失敗もしない
    pub fn logout(&self) {
        let _loading = self.begin();
        self.credentials.clear_all();
        info!("ログアウトしました");
    }

    /// 保存済みトークンをサーバーで検証する
    ///
    /// `cancel` が先に取り消された場合は結果を適用せず `Cancelled` を返す。
    pub async fn validate_token(&self, cancel: &CancellationToken) -> TokenCheck {
        let Some(token) = self.credentials.token() else {
            return TokenCheck::NoToken;
        };
        let Some(api) = &self.api else {
            return TokenCheck::Valid;
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return TokenCheck::Cancelled,
            result = api.send::<Value>(ApiRequest::get(VALIDATE_TOKEN_PATH)) => result,
        };

        let rejected = match result {
            Ok(body) => body.get("success").and_then(Value::as_bool) == Some(false),
            Err(e) if e.is_auth_failure() => true,
            Err(e) => {
                warn!(error = %e, "トークンを検証できませんでした");
                return TokenCheck::Unreachable;
            }
        };
        if !rejected {
            return TokenCheck::Valid;
        }

        // 検証中に再ログインしていたら新しいセッションは消さない
        if self.credentials.token().as_deref() == Some(token.as_str()) {
            warn!("トークンが無効なためセッションを破棄します");
            self.credentials.clear_all();
        }
        TokenCheck::Invalid
    }

    fn begin(&self) -> LoadingGuard<'_> {
        self.loading.send_modify(|count| *count += 1);
        LoadingGuard {
            loading: &self.loading,
        }
    }
}

struct LoadingGuard<'a> {
    loading: &'a watch::Sender<usize>,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.loading
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}

/// セッションと loading の変化をまとめて待つ購読口
pub struct SessionWatch {
    session: watch::Receiver<Session>,
    loading: watch::Receiver<usize>,
}

impl SessionWatch {
    pub fn current(&mut self) -> SessionState {
        let session = self.session.borrow_and_update().clone();
        SessionState {
            authenticated: session.is_authenticated(),
            user: session.user,
            loading: *self.loading.borrow_and_update() > 0,
        }
    }

    /// 次の変化を待つ。送信側が破棄されたら `None`
    pub async fn changed(&mut self) -> Option<SessionState> {
        let result = tokio::select! {
            r = self.session.changed() => r,
            r = self.loading.changed() => r,
        };
        result.ok()?;
        Some(self.current())
    }
}

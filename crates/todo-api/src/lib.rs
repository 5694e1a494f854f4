//! Todo クライアント向けの HTTP API（axum）
//!
//! ユーザー登録・サインイン・トークン検証/リフレッシュと、ユーザーごとの Todo CRUD を提供します。
//! Todo の更新と削除は所有者のみ可能で、他人の Todo は 404 になります。

pub mod auth;
pub mod error;
pub mod handlers;
pub mod password;
pub mod repository;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use password::PasswordHashing;
use repository::{InMemoryRepository, Repository};
use shared::{AppError, ServerConfig, TokenIssuer};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// アプリケーションの共有状態
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repository>,
    pub tokens: TokenIssuer,
    pub passwords: PasswordHashing,
    /// CORS で許可するオリジン。`None` なら CORS ヘッダを付けない
    pub allowed_origin: Option<HeaderValue>,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repository>, tokens: TokenIssuer, passwords: PasswordHashing) -> Self {
        Self {
            repo,
            tokens,
            passwords,
            allowed_origin: None,
        }
    }

    /// 設定からインメモリの状態を組み立てる
    pub fn from_config(config: &ServerConfig) -> Result<Self, AppError> {
        let tokens = TokenIssuer::new(&config.jwt_secret, config.token_ttl, config.refresh_window);
        let origin = config.allowed_origin.parse::<HeaderValue>().map_err(|e| {
            AppError::Configuration(format!(
                "`{}` is not a valid CORS origin: {e}",
                config.allowed_origin
            ))
        })?;

        let mut state = Self::new(
            Arc::new(InMemoryRepository::new()),
            tokens,
            PasswordHashing::default(),
        );
        state.allowed_origin = Some(origin);
        Ok(state)
    }
}

/// ルータを構築して返します
pub fn app(state: AppState) -> Router {
    let cors = state.allowed_origin.clone().map(|origin| {
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true)
    });

    let router = Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/user/signup", post(handlers::signup))
        .route("/api/v1/user/signin", post(handlers::signin))
        .route("/api/v1/user/validate-token", get(handlers::validate_token))
        .route("/api/v1/user/refresh", post(handlers::refresh))
        .route(
            "/api/v1/todo",
            get(handlers::list_todos)
                .post(handlers::create_todo)
                .put(handlers::update_todo)
                .delete(handlers::delete_todo),
        )
        .with_state(state);

    match cors {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

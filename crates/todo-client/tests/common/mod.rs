#![allow(dead_code)]

use axum::Router;
use shared::{ClientConfig, TokenIssuer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use todo_api::{password::PasswordHashing, repository::InMemoryRepository, AppState};
use todo_client::{CredentialStore, MemoryStorage};

pub const SECRET: &str = "client-test-secret";

/// ルータを 127.0.0.1 の空きポートで起動し、ベース URL を返す
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

pub fn issuer() -> TokenIssuer {
    TokenIssuer::new(SECRET, Duration::from_secs(60), Duration::from_secs(600))
}

/// 参照実装の API サーバーを起動する
pub async fn spawn_api() -> String {
    let state = AppState::new(
        Arc::new(InMemoryRepository::new()),
        issuer(),
        PasswordHashing::fast().unwrap(),
    );
    serve(todo_api::app(state)).await
}

pub fn config(base_url: Option<&str>, grace_ms: u64) -> ClientConfig {
    let base_url = base_url.map(str::to_string);
    ClientConfig::from_lookup(move |key| match key {
        "TODO_API_BASE_URL" => base_url.clone(),
        "TODO_DELETE_GRACE_MS" => Some(grace_ms.to_string()),
        "TODO_REQUEST_TIMEOUT_MS" => Some("5000".to_string()),
        _ => None,
    })
    .unwrap()
}

pub fn memory_credentials() -> Arc<CredentialStore> {
    Arc::new(CredentialStore::new(Arc::new(MemoryStorage::new())))
}

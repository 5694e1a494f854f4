use crate::credentials::CredentialStore;
use crate::gateway::ApiClient;
use crate::guard::{Navigator, RouteGuard};
use crate::notify::{Notifier, TracingNotifier};
use crate::session::SessionController;
use crate::storage::{FileStorage, Storage};
use crate::sync::{LocalTodoStore, RemoteTodoStore, StoreMode, TodoStore, TodoSyncEngine};
use shared::{AppError, ClientConfig};
use std::sync::Arc;
use tracing::info;

/// クライアントの構成要素一式
///
/// 保存先（リモート / ローカル）は構築時に一度だけ決まる。
pub struct TodoApp {
    pub config: ClientConfig,
    pub credentials: Arc<CredentialStore>,
    pub api: Option<Arc<ApiClient>>,
    pub session: SessionController,
    pub todos: TodoSyncEngine,
}

impl TodoApp {
    /// 設定に従い、状態ディレクトリのファイルストアを使って構築する
    pub fn from_config(config: ClientConfig) -> Result<Self, AppError> {
        let storage = Arc::new(FileStorage::open(&config.state_dir)?);
        Self::with_storage(config, storage, Arc::new(TracingNotifier))
    }

    pub fn with_storage(
        config: ClientConfig,
        storage: Arc<dyn Storage>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, AppError> {
        let credentials = Arc::new(CredentialStore::new(storage.clone()));

        let api = match &config.api_base_url {
            Some(base_url) => Some(Arc::new(ApiClient::new(
                base_url,
                &config,
                credentials.clone(),
            )?)),
            None => None,
        };

        let store: Arc<dyn TodoStore> = match &api {
            Some(api) => Arc::new(RemoteTodoStore::new(api.clone())),
            None => Arc::new(LocalTodoStore::new(storage)),
        };
        let todos = TodoSyncEngine::new(store, notifier.clone(), config.delete_grace);
        let session = SessionController::new(api.clone(), credentials.clone(), notifier);

        info!(
            mode = ?todos.mode(),
            base_url = config.api_base_url.as_deref().unwrap_or("-"),
            "クライアントを初期化しました"
        );

        Ok(Self {
            config,
            credentials,
            api,
            session,
            todos,
        })
    }

    pub fn mode(&self) -> StoreMode {
        self.todos.mode()
    }

    /// 設定のランディングパスへリダイレクトするガードを作る
    pub fn guard<N: Navigator>(&self, navigator: N) -> RouteGuard<N> {
        RouteGuard::new(navigator, self.config.landing_path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::GuardState;
    use crate::notify::NotificationLog;

    #[tokio::test]
    async fn test_local_mode_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::from_lookup(|key| match key {
            "TODO_STATE_DIR" => Some(dir.path().display().to_string()),
            _ => None,
        })
        .unwrap();
        let app = TodoApp::from_config(config.clone()).unwrap();
        assert_eq!(app.mode(), StoreMode::Local);

        app.session.login("ann@example.com", "secret1").await.unwrap();
        app.todos.create("Buy milk").await.unwrap();

        // 再起動後もセッションと一覧が残る
        let restarted = TodoApp::from_config(config).unwrap();
        let mut guard = restarted.guard(|_: &str| panic!("unexpected redirect"));
        assert_eq!(guard.restore(&restarted.credentials), GuardState::Authenticated);
        restarted.todos.refresh().await.unwrap();
        assert_eq!(restarted.todos.list()[0].title, "Buy milk");
    }

    #[tokio::test]
    async fn test_remote_mode_selected_by_base_url() {
        let config = ClientConfig::from_lookup(|key| match key {
            "TODO_API_BASE_URL" => Some("http://127.0.0.1:9".to_string()),
            _ => None,
        })
        .unwrap();
        let app = TodoApp::with_storage(
            config,
            Arc::new(crate::storage::MemoryStorage::new()),
            Arc::new(NotificationLog::new()),
        )
        .unwrap();

        assert_eq!(app.mode(), StoreMode::Remote);
        assert!(!app.session.is_mock());
    }
}

//! Todo の保存先
//!
//! 起動時にリモート（API）かローカル（永続化ストア）のどちらかを一度だけ選ぶ。
//! 同期エンジンはこのトレイトだけを通して保存先に触れる。

use crate::gateway::{ApiClient, ApiRequest, TODO_PATH};
use crate::storage::Storage;
use async_trait::async_trait;
use chrono::Utc;
use domain::{validate_title, Todo, TodoId};
use serde_json::{json, Value};
use shared::AppError;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// ローカルモードの Todo 一覧を保存するキー
pub const TODOS_KEY: &str = "todos_data_v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    Remote,
    Local,
}

#[async_trait]
pub trait TodoStore: Send + Sync {
    fn mode(&self) -> StoreMode;

    /// 新しい順の一覧
    async fn list(&self) -> Result<Vec<Todo>, AppError>;

    async fn create(&self, title: &str) -> Result<Todo, AppError>;

    /// `todo.id` の項目をタイトルと完了状態で上書きし、保存後の値を返す
    async fn update(&self, todo: &Todo) -> Result<Todo, AppError>;

    async fn delete(&self, id: &TodoId) -> Result<(), AppError>;
}

/// API を保存先とする実装
pub struct RemoteTodoStore {
    api: Arc<ApiClient>,
}

impl RemoteTodoStore {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl TodoStore for RemoteTodoStore {
    fn mode(&self) -> StoreMode {
        StoreMode::Remote
    }

    async fn list(&self) -> Result<Vec<Todo>, AppError> {
        self.api.send(ApiRequest::get(TODO_PATH)).await
    }

    async fn create(&self, title: &str) -> Result<Todo, AppError> {
        let body = json!({ "title": title, "completed": false });
        self.api.send(ApiRequest::post(TODO_PATH, body)).await
    }

    async fn update(&self, todo: &Todo) -> Result<Todo, AppError> {
        let body = serde_json::to_value(todo)?;
        self.api.send(ApiRequest::put(TODO_PATH, body)).await
    }

    async fn delete(&self, id: &TodoId) -> Result<(), AppError> {
        self.api
            .send::<Value>(ApiRequest::delete(TODO_PATH, json!({ "id": id })))
            .await
            .map(|_| ())
    }
}

/// 認証情報と同じ永続化ストアに一覧を保存する実装
pub struct LocalTodoStore {
    storage: Arc<dyn Storage>,
    // 読み込みから書き戻しまでを直列化する
    lock: Mutex<()>,
}

impl LocalTodoStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            lock: Mutex::new(()),
        }
    }

    fn read(&self) -> Vec<Todo> {
        let Some(raw) = self.storage.get(TODOS_KEY) else {
            return Vec::new();
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(error = %e, "保存済みの Todo 一覧が壊れているため空として扱います");
            Vec::new()
        })
    }

    fn write(&self, todos: &[Todo]) -> Result<(), AppError> {
        let raw = serde_json::to_string(todos)?;
        self.storage.set(TODOS_KEY, raw)
    }

    fn modify<T>(&self, f: impl FnOnce(&mut Vec<Todo>) -> Result<T, AppError>) -> Result<T, AppError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut todos = self.read();
        let result = f(&mut todos)?;
        self.write(&todos)?;
        Ok(result)
    }
}

#[async_trait]
impl TodoStore for LocalTodoStore {
    fn mode(&self) -> StoreMode {
        StoreMode::Local
    }

    async fn list(&self) -> Result<Vec<Todo>, AppError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read())
    }

    async fn create(&self, title: &str) -> Result<Todo, AppError> {
        let todo = Todo::new(title)?;
        self.modify(|todos| {
            todos.insert(0, todo.clone());
            Ok(())
        })?;
        debug!(todo_id = %todo.id, "ローカルに Todo を作成しました");
        Ok(todo)
    }

    async fn update(&self, todo: &Todo) -> Result<Todo, AppError> {
        let title = validate_title(&todo.title)?;
        self.modify(|todos| {
            let stored = todos
                .iter_mut()
                .find(|t| t.id == todo.id)
                .ok_or_else(|| AppError::NotFound(format!("todo {}", todo.id)))?;
            stored.title = title;
            stored.completed = todo.completed;
            stored.touch(Utc::now());
            Ok(stored.clone())
        })
    }

    async fn delete(&self, id: &TodoId) -> Result<(), AppError> {
        self.modify(|todos| {
            let index = todos
                .iter()
                .position(|t| &t.id == id)
                .ok_or_else(|| AppError::NotFound(format!("todo {id}")))?;
            todos.remove(index);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn local() -> (Arc<MemoryStorage>, LocalTodoStore) {
        let storage = Arc::new(MemoryStorage::new());
        (storage.clone(), LocalTodoStore::new(storage))
    }

    #[tokio::test]
    async fn test_local_create_prepends_and_persists() {
        let (storage, store) = local();

        let first = store.create("first").await.unwrap();
        let second = store.create("second").await.unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed, vec![second, first]);
        assert!(storage.get(TODOS_KEY).is_some());
    }

    #[tokio::test]
    async fn test_local_update_and_delete() {
        let (_, store) = local();
        let mut todo = store.create("task").await.unwrap();

        todo.completed = true;
        todo.title = "renamed".into();
        let saved = store.update(&todo).await.unwrap();
        assert!(saved.completed);
        assert_eq!(saved.title, "renamed");
        assert!(saved.updated_at >= saved.created_at);

        store.delete(&todo.id).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
        assert!(matches!(
            store.delete(&todo.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_local_corrupt_list_reads_as_empty() {
        let (storage, store) = local();
        storage.set(TODOS_KEY, "[{".into()).unwrap();

        assert!(store.list().await.unwrap().is_empty());
        // 次の書き込みで自己修復する
        store.create("fresh").await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_local_create_rejects_blank_title() {
        let (_, store) = local();
        assert!(matches!(
            store.create("  ").await,
            Err(AppError::Validation(_))
        ));
    }
}

//! ユーザーと Todo の保存層

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::AppError;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: u64,
    pub email: String,
    pub name: Option<String>,
    pub password_hash: String,
}

/// 保存された Todo。ID は整数で返す
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoRecord {
    pub id: u64,
    pub title: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user_id: u64,
}

/// Todo の部分更新
#[derive(Debug, Clone, Default)]
pub struct TodoChanges {
    pub title: Option<String>,
    pub completed: Option<bool>,
}

/// 保存層の抽象
///
/// Todo の更新・削除は所有者を条件に含め、他人の Todo は存在しないものとして扱う。
pub trait Repository: Send + Sync {
    /// 同じメールアドレスが既にあれば `Conflict`
    fn create_user(
        &self,
        email: &str,
        name: Option<&str>,
        password_hash: &str,
    ) -> Result<UserRecord, AppError>;

    fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, AppError>;

    fn find_user(&self, id: u64) -> Result<Option<UserRecord>, AppError>;

    fn create_todo(&self, user_id: u64, title: &str, completed: bool)
        -> Result<TodoRecord, AppError>;

    /// 新しい順
    fn list_todos(&self, user_id: u64) -> Result<Vec<TodoRecord>, AppError>;

    fn update_todo(
        &self,
        user_id: u64,
        id: u64,
        changes: TodoChanges,
    ) -> Result<TodoRecord, AppError>;

    fn delete_todo(&self, user_id: u64, id: u64) -> Result<(), AppError>;
}

#[derive(Debug, Default)]
struct Tables {
    next_user_id: u64,
    next_todo_id: u64,
    users: BTreeMap<u64, UserRecord>,
    todos: BTreeMap<u64, TodoRecord>,
}

/// インメモリ実装（開発/テスト用）
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    tables: Mutex<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, AppError> {
        self.tables
            .lock()
            .map_err(|_| AppError::Storage("repository lock poisoned".to_string()))
    }
}

fn todo_not_found(id: u64) -> AppError {
    AppError::NotFound(format!("Todo {id} not found"))
}

impl Repository for InMemoryRepository {
    fn create_user(
        &self,
        email: &str,
        name: Option<&str>,
        password_hash: &str,
    ) -> Result<UserRecord, AppError> {
        let mut tables = self.tables()?;
        if tables
            .users
            .values()
            .any(|user| user.email.eq_ignore_ascii_case(email))
        {
            return Err(AppError::Conflict(
                "A user with this email already exists.".to_string(),
            ));
        }

        tables.next_user_id += 1;
        let user = UserRecord {
            id: tables.next_user_id,
            email: email.to_string(),
            name: name.map(str::to_string),
            password_hash: password_hash.to_string(),
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, AppError> {
        Ok(self
            .tables()?
            .users
            .values()
            .find(|user| user.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    fn find_user(&self, id: u64) -> Result<Option<UserRecord>, AppError> {
        Ok(self.tables()?.users.get(&id).cloned())
    }

    fn create_todo(
        &self,
        user_id: u64,
        title: &str,
        completed: bool,
    ) -> Result<TodoRecord, AppError> {
        let mut tables = self.tables()?;
        tables.next_todo_id += 1;
        let now = Utc::now();
        let todo = TodoRecord {
            id: tables.next_todo_id,
            title: title.to_string(),
            completed,
            created_at: now,
            updated_at: now,
            user_id,
        };
        tables.todos.insert(todo.id, todo.clone());
        Ok(todo)
    }

    fn list_todos(&self, user_id: u64) -> Result<Vec<TodoRecord>, AppError> {
        let tables = self.tables()?;
        let mut todos: Vec<TodoRecord> = tables
            .todos
            .values()
            .filter(|todo| todo.user_id == user_id)
            .cloned()
            .collect();
        // ID は作成順に増えるので、作成日時が同じでも ID で新しい順に並ぶ
        todos.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(todos)
    }

    fn update_todo(
        &self,
        user_id: u64,
        id: u64,
        changes: TodoChanges,
    ) -> Result<TodoRecord, AppError> {
        let mut tables = self.tables()?;
        let todo = tables
            .todos
            .get_mut(&id)
            .filter(|todo| todo.user_id == user_id)
            .ok_or_else(|| todo_not_found(id))?;

        if let Some(title) = changes.title {
            todo.title = title;
        }
        if let Some(completed) = changes.completed {
            todo.completed = completed;
        }
        todo.updated_at = Utc::now().max(todo.created_at);
        Ok(todo.clone())
    }

    fn delete_todo(&self, user_id: u64, id: u64) -> Result<(), AppError> {
        let mut tables = self.tables()?;
        match tables.todos.get(&id) {
            Some(todo) if todo.user_id == user_id => {
                tables.todos.remove(&id);
                Ok(())
            }
            _ => Err(todo_not_found(id)),
        }
    }
}

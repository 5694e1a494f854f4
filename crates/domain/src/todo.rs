use crate::errors::DomainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Todo の識別子
///
/// ローカルモードでは ULID を生成する。リモートの API は整数 ID を返すことがあるため、
/// JSON の文字列・数値どちらからでも復元し、常に文字列として書き出す。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TodoId(String);

impl TodoId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn parse(id: &str) -> Result<Self, DomainError> {
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(DomainError::InvalidTodoId("empty id".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// ULID 形式の ID であれば生成時刻（ミリ秒）を返す
    pub fn timestamp_ms(&self) -> Option<u64> {
        ulid::Ulid::from_string(&self.0)
            .ok()
            .map(|ulid| ulid.timestamp_ms())
    }
}

impl Default for TodoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TodoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TodoId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl<'de> Deserialize<'de> for TodoId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        string_or_number(deserializer).map(Self)
    }
}

/// 文字列または整数の JSON 値を文字列として読み込む
pub fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Signed(i64),
        Unsigned(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Signed(n) => n.to_string(),
        Raw::Unsigned(n) => n.to_string(),
    })
}

/// タイトルを検証し、前後の空白を除いた値を返す
pub fn validate_title(title: &str) -> Result<String, DomainError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(DomainError::InvalidTitle(
            "title must not be empty".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

/// Todo 項目
///
/// 不変条件:
/// - `id` は作成後に変更されない
/// - `updated_at >= created_at`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
    pub id: TodoId,
    pub title: String,
    #[serde(default)]
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Todo {
    /// ローカルで新しい Todo を作成する（ID はクライアント生成）
    pub fn new(title: &str) -> Result<Self, DomainError> {
        let title = validate_title(title)?;
        let now = Utc::now();
        Ok(Self {
            id: TodoId::new(),
            title,
            completed: false,
            created_at: now,
            updated_at: now,
        })
    }

    /// タイトルを変更する。空タイトルや同一タイトルの場合は `false` を返し何もしない
    pub fn rename(&mut self, title: &str) -> bool {
        let trimmed = title.trim();
        if trimmed.is_empty() || trimmed == self.title {
            return false;
        }
        self.title = trimmed.to_string();
        self.touch(Utc::now());
        true
    }

    pub fn set_completed(&mut self, completed: bool) {
        self.completed = completed;
        self.touch(Utc::now());
    }

    /// 更新日時を進める。`created_at` より前には戻さない
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at.max(self.created_at);
    }

    /// タイトルがクエリを大文字小文字を区別せず含むか
    pub fn matches(&self, query: &str) -> bool {
        self.title.to_lowercase().contains(&query.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_todo_trims_title_and_starts_pending() {
        let todo = Todo::new("  Buy milk ").unwrap();

        assert_eq!(todo.title, "Buy milk");
        assert!(!todo.completed);
        assert_eq!(todo.created_at, todo.updated_at);
        assert_eq!(todo.id.as_str().len(), 26);
        assert!(todo.id.timestamp_ms().is_some());
    }

    #[test]
    fn test_new_todo_rejects_blank_title() {
        assert!(matches!(
            Todo::new("   "),
            Err(DomainError::InvalidTitle(_))
        ));
    }

    #[test]
    fn test_rename_ignores_blank_and_unchanged_titles() {
        let mut todo = Todo::new("Task").unwrap();

        assert!(!todo.rename(""));
        assert!(!todo.rename(" Task "));
        assert!(todo.rename("Other"));
        assert_eq!(todo.title, "Other");
    }

    #[test]
    fn test_touch_never_moves_before_created_at() {
        let mut todo = Todo::new("Task").unwrap();
        let created = todo.created_at;

        todo.touch(created - Duration::hours(1));
        assert_eq!(todo.updated_at, created);

        todo.touch(created + Duration::hours(1));
        assert!(todo.updated_at > todo.created_at);
    }

    #[test]
    fn test_id_deserializes_from_number_or_string() {
        // 元のバックエンドは整数 ID を返す
        let json = r#"{"id":42,"title":"A","completed":true,
            "createdAt":"2024-01-01T00:00:00Z","updatedAt":"2024-01-02T00:00:00Z","userId":7}"#;
        let todo: Todo = serde_json::from_str(json).unwrap();
        assert_eq!(todo.id.as_str(), "42");
        assert!(todo.completed);

        let json = r#"{"id":"01HZX","title":"B",
            "createdAt":"2024-01-01T00:00:00Z","updatedAt":"2024-01-01T00:00:00Z"}"#;
        let todo: Todo = serde_json::from_str(json).unwrap();
        assert_eq!(todo.id.as_str(), "01HZX");
        assert!(!todo.completed);
    }

    #[test]
    fn test_todo_serializes_camel_case() {
        let todo = Todo::new("Task").unwrap();
        let value = serde_json::to_value(&todo).unwrap();

        assert!(value.get("createdAt").is_some());
        assert!(value.get("updatedAt").is_some());
        assert!(value["id"].is_string());
    }

    #[test]
    fn test_parse_rejects_empty_id() {
        assert!(TodoId::parse(" ").is_err());
        assert_eq!(TodoId::parse(" 12 ").unwrap().as_str(), "12");
    }
}

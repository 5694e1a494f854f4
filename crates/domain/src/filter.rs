//! 一覧画面向けのクライアント側フィルタ
//!
//! どの関数も入力の一覧を変更せず、元の相対順序を保った部分列を返す。

use crate::errors::DomainError;
use crate::todo::Todo;
use std::str::FromStr;

/// タイトルがクエリを大文字小文字を区別せず含む項目だけを返す
pub fn filter_todos(todos: &[Todo], query: &str) -> Vec<Todo> {
    todos
        .iter()
        .filter(|todo| todo.matches(query))
        .cloned()
        .collect()
}

/// 状態タブ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tab {
    #[default]
    All,
    Pending,
    Completed,
}

impl Tab {
    pub fn includes(self, todo: &Todo) -> bool {
        match self {
            Tab::All => true,
            Tab::Pending => !todo.completed,
            Tab::Completed => todo.completed,
        }
    }

    /// フィルタ済み一覧をさらにタブで絞り込む
    pub fn select(self, todos: &[Todo]) -> Vec<Todo> {
        todos
            .iter()
            .filter(|todo| self.includes(todo))
            .cloned()
            .collect()
    }
}

impl FromStr for Tab {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Tab::All),
            "pending" => Ok(Tab::Pending),
            "completed" | "done" => Ok(Tab::Completed),
            other => Err(DomainError::Validation(format!("unknown tab: {other}"))),
        }
    }
}

/// タブごとの件数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TabCounts {
    pub all: usize,
    pub pending: usize,
    pub completed: usize,
}

pub fn tab_counts(todos: &[Todo]) -> TabCounts {
    let completed = todos.iter().filter(|todo| todo.completed).count();
    TabCounts {
        all: todos.len(),
        pending: todos.len() - completed,
        completed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn todo(title: &str, completed: bool) -> Todo {
        let mut todo = Todo::new(title).unwrap();
        todo.completed = completed;
        todo
    }

    #[test]
    fn test_filter_is_case_insensitive_substring() {
        let list = vec![todo("Buy milk", false), todo("clean Desk", false)];

        let filtered = filter_todos(&list, "de");

        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].title, "clean Desk");
    }

    #[test]
    fn test_empty_query_returns_everything() {
        let list = vec![todo("A", false), todo("B", true)];
        assert_eq!(filter_todos(&list, ""), list);
    }

    #[test]
    fn test_tab_selection_and_counts() {
        let list = vec![todo("A", false), todo("B", true), todo("C", false)];

        assert_eq!(Tab::Pending.select(&list).len(), 2);
        assert_eq!(Tab::Completed.select(&list)[0].title, "B");
        assert_eq!(
            tab_counts(&list),
            TabCounts {
                all: 3,
                pending: 2,
                completed: 1
            }
        );
    }

    #[test]
    fn test_tab_from_str() {
        assert_eq!("Pending".parse::<Tab>().unwrap(), Tab::Pending);
        assert_eq!("done".parse::<Tab>().unwrap(), Tab::Completed);
        assert!("archived".parse::<Tab>().is_err());
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // フィルタ結果はクエリを含む項目と完全に一致し、元の順序を保つ
            #[test]
            fn filter_matches_exactly_and_preserves_order(
                titles in proptest::collection::vec("[a-zA-Z ]{1,12}", 0..20),
                query in "[a-zA-Z]{0,3}",
            ) {
                let list: Vec<Todo> = titles
                    .iter()
                    .filter(|t| !t.trim().is_empty())
                    .map(|t| todo(t, false))
                    .collect();

                let filtered = filter_todos(&list, &query);
                let expected: Vec<Todo> = list
                    .iter()
                    .filter(|t| t.title.to_lowercase().contains(&query.to_lowercase()))
                    .cloned()
                    .collect();

                prop_assert_eq!(filtered, expected);
            }
        }
    }
}

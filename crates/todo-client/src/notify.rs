//! ユーザー向け通知（トースト）

use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Variant {
    #[default]
    Default,
    /// 失敗を知らせる通知
    Destructive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub description: Option<String>,
    pub variant: Variant,
}

impl Notification {
    pub fn info(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            variant: Variant::Default,
        }
    }

    pub fn error(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            variant: Variant::Destructive,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.variant == Variant::Destructive
    }
}

/// 通知の出力先
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

impl<F> Notifier for F
where
    F: Fn(Notification) + Send + Sync,
{
    fn notify(&self, notification: Notification) {
        self(notification)
    }
}

/// 通知をログに流すだけの実装
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        let description = notification.description.as_deref().unwrap_or("");
        match notification.variant {
            Variant::Default => info!(title = %notification.title, description, "notification"),
            Variant::Destructive => warn!(title = %notification.title, description, "notification"),
        }
    }
}

/// 通知を記録しておく実装。UI がまとめて取り出す
#[derive(Debug, Default)]
pub struct NotificationLog {
    entries: Mutex<Vec<Notification>>,
}

impl NotificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<Notification> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 記録済みの通知を取り出して空にする
    pub fn drain(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.entries.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn titles(&self) -> Vec<String> {
        self.snapshot().into_iter().map(|n| n.title).collect()
    }

    pub fn contains(&self, title: &str) -> bool {
        self.snapshot().iter().any(|n| n.title == title)
    }
}

impl Notifier for NotificationLog {
    fn notify(&self, notification: Notification) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
    }
}

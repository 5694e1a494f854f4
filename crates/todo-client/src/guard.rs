//! 保護されたビューの表示可否を決めるガード

use crate::credentials::CredentialStore;
use domain::Session;
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GuardState {
    /// セッション復元前
    #[default]
    Unknown,
    Authenticated,
    Unauthenticated,
}

/// 画面遷移の実行先
pub trait Navigator: Send + Sync {
    /// 履歴を残さずに `path` へ遷移する
    fn replace(&self, path: &str);
}

impl<F> Navigator for F
where
    F: Fn(&str) + Send + Sync,
{
    fn replace(&self, path: &str) {
        self(path)
    }
}

/// ルートガード
///
/// 未認証になった時点で一度だけランディングページへリダイレクトし、
/// 保護されたコンテンツは描画しない。
pub struct RouteGuard<N> {
    navigator: N,
    landing_path: String,
    state: GuardState,
}

impl<N: Navigator> RouteGuard<N> {
    pub fn new(navigator: N, landing_path: impl Into<String>) -> Self {
        Self {
            navigator,
            landing_path: landing_path.into(),
            state: GuardState::Unknown,
        }
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    /// 保存済みセッションを参照して `Unknown` から遷移する。二回目以降は現在の状態を返す
    pub fn restore(&mut self, credentials: &CredentialStore) -> GuardState {
        if self.state != GuardState::Unknown {
            return self.state;
        }
        self.evaluate(&credentials.session())
    }

    /// セッションから状態を再評価する
    pub fn evaluate(&mut self, session: &Session) -> GuardState {
        let next = if session.is_authenticated() {
            GuardState::Authenticated
        } else {
            GuardState::Unauthenticated
        };

        if next == GuardState::Unauthenticated && self.state != GuardState::Unauthenticated {
            info!(to = %self.landing_path, "未認証のためリダイレクトします");
            self.navigator.replace(&self.landing_path);
        }
        if next != self.state {
            debug!(from = ?self.state, to = ?next, "ガード状態が変化しました");
        }
        self.state = next;
        next
    }

    /// 認証済みのときだけ `content` を描画する
    pub fn render<T>(&self, content: impl FnOnce() -> T) -> Option<T> {
        match self.state {
            GuardState::Authenticated => Some(content()),
            _ => None,
        }
    }

    /// セッションの変化を追いかけ、未認証になったら（リダイレクト後に）戻る
    pub async fn follow(&mut self, mut changes: watch::Receiver<Session>) -> GuardState {
        loop {
            let session = changes.borrow_and_update().clone();
            if self.evaluate(&session) == GuardState::Unauthenticated {
                return GuardState::Unauthenticated;
            }
            if changes.changed().await.is_err() {
                return self.state;
            }
        }
    }
}

use crate::storage::Storage;
use domain::{Session, UserProfile};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::warn;

pub const TOKEN_KEY: &str = "auth_token";
pub const USER_KEY: &str = "auth_user";

/// 認証トークンとユーザープロフィールの永続化
///
/// 永続化されたセッションを変更するのはこの型だけで、変更のたびに
/// 最新の [`Session`] を購読者へ通知する。どの操作も失敗を呼び出し元に返さない。
/// 書き込みに失敗した場合はログに残し、プロセス内の状態は更新後の値を保つ。
pub struct CredentialStore {
    storage: Arc<dyn Storage>,
    changes: watch::Sender<Session>,
    // 書き込みと通知を直列化し、token と user が片方だけ消えた状態を見せない
    write_lock: Mutex<()>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        let initial = Session::new(read_token(storage.as_ref()), read_user(storage.as_ref()));
        let (changes, _) = watch::channel(initial);
        Self {
            storage,
            changes,
            write_lock: Mutex::new(()),
        }
    }

    pub fn token(&self) -> Option<String> {
        read_token(self.storage.as_ref())
    }

    pub fn set_token(&self, token: Option<&str>) {
        self.write(&[(TOKEN_KEY, token.map(str::to_string))]);
    }

    /// 保存済みユーザー。壊れたデータは存在しないものとして扱う
    pub fn user(&self) -> Option<UserProfile> {
        read_user(self.storage.as_ref())
    }

    pub fn set_user(&self, user: Option<&UserProfile>) {
        let value = match user.map(serde_json::to_string).transpose() {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "ユーザー情報のシリアライズに失敗しました");
                return;
            }
        };
        self.write(&[(USER_KEY, value)]);
    }

    /// トークンとユーザーを同時に保存する
    pub fn set_session(&self, token: &str, user: &UserProfile) {
        let user = match serde_json::to_string(user) {
            Ok(user) => user,
            Err(e) => {
                warn!(error = %e, "ユーザー情報のシリアライズに失敗しました");
                return;
            }
        };
        self.write(&[(TOKEN_KEY, Some(token.to_string())), (USER_KEY, Some(user))]);
    }

    /// トークンとユーザーを一度に削除する
    pub fn clear_all(&self) {
        self.write(&[(TOKEN_KEY, None), (USER_KEY, None)]);
    }

    pub fn session(&self) -> Session {
        Session::new(self.token(), self.user())
    }

    /// セッションの変更を購読する
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.changes.subscribe()
    }

    fn write(&self, changes: &[(&str, Option<String>)]) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = self.storage.apply(changes) {
            warn!(error = %e, "認証情報の保存に失敗しました");
        }
        self.changes.send_replace(self.session());
    }
}

fn read_token(storage: &dyn Storage) -> Option<String> {
    storage.get(TOKEN_KEY).filter(|token| !token.is_empty())
}

fn read_user(storage: &dyn Storage) -> Option<UserProfile> {
    let raw = storage.get(USER_KEY)?;
    match serde_json::from_str::<Option<UserProfile>>(&raw) {
        Ok(user) => user,
        Err(e) => {
            warn!(error = %e, "保存済みユーザー情報が壊れているため無視します");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn store() -> (Arc<MemoryStorage>, CredentialStore) {
        let storage = Arc::new(MemoryStorage::new());
        let store = CredentialStore::new(storage.clone());
        (storage, store)
    }

    fn user() -> UserProfile {
        UserProfile {
            id: "1".into(),
            email: "ann@example.com".into(),
            name: Some("Ann".into()),
        }
    }

    #[test]
    fn test_token_round_trip_and_removal() {
        let (_, store) = store();

        store.set_token(Some("abc"));
        assert_eq!(store.token().as_deref(), Some("abc"));

        store.set_token(None);
        assert_eq!(store.token(), None);
        // 冪等
        store.set_token(None);
        assert_eq!(store.token(), None);
    }

    #[test]
    fn test_corrupt_user_reads_as_absent() {
        let (storage, store) = store();
        storage.set(USER_KEY, "{broken".into()).unwrap();

        assert_eq!(store.user(), None);
        assert!(store.session().is_empty());
    }

    #[test]
    fn test_clear_all_removes_both() {
        let (_, store) = store();
        store.set_session("abc", &user());
        assert!(store.session().is_authenticated());

        store.clear_all();

        assert_eq!(store.token(), None);
        assert_eq!(store.user(), None);
    }

    #[test]
    fn test_subscribers_see_every_change() {
        let (_, store) = store();
        let rx = store.subscribe();

        store.set_session("abc", &user());
        assert_eq!(rx.borrow().user, Some(user()));
        assert_eq!(rx.borrow().token.as_deref(), Some("abc"));

        store.clear_all();
        assert!(rx.borrow().is_empty());
    }

    #[test]
    fn test_restores_persisted_session() {
        let storage = Arc::new(MemoryStorage::new());
        CredentialStore::new(storage.clone()).set_session("abc", &user());

        let restored = CredentialStore::new(storage);
        assert_eq!(restored.session().user, Some(user()));
        let rx = restored.subscribe();
        assert_eq!(rx.borrow().token.as_deref(), Some("abc"));
    }
}

//! Todo API のクライアントコア
//!
//! 認証情報の保存、トークンのリフレッシュつき API 呼び出し、セッション操作、
//! ルートガード、楽観的更新と取り消し可能な削除を備えた Todo 同期エンジンを提供する。

pub mod app;
pub mod credentials;
pub mod gateway;
pub mod guard;
pub mod notify;
pub mod session;
pub mod storage;
pub mod sync;

pub use app::TodoApp;
pub use credentials::CredentialStore;
pub use gateway::{ApiClient, ApiRequest};
pub use guard::{GuardState, Navigator, RouteGuard};
pub use notify::{Notification, NotificationLog, Notifier, TracingNotifier, Variant};
pub use session::{SessionController, SessionState, SessionWatch, TokenCheck};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use sync::{StoreMode, TodoStore, TodoSyncEngine};

//! Todo 同期エンジン
//!
//! 画面に表示する Todo 一覧の唯一の所有者。タイトル変更と完了切り替えは楽観的に
//! 反映してから保存先へ送り、失敗したら一覧を取り直して保存先の状態に合わせる。
//! 削除は猶予期間つきの二段階で、期間内なら保存先に触れずに取り消せる。

use super::scheduled::ScheduledTask;
use super::store::{StoreMode, TodoStore};
use crate::notify::{Notification, Notifier};
use domain::{filter_todos, tab_counts, validate_title, Tab, TabCounts, Todo, TodoId};
use shared::AppError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// 削除待ちの項目
#[derive(Debug)]
pub struct PendingDeletion {
    pub todo: Todo,
    /// 削除前の一覧上の位置
    pub index: usize,
    pub deadline: Instant,
    phase: Phase,
    task: Option<ScheduledTask>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// 猶予期間中。取り消し可能
    Waiting,
    /// 保存先へ削除を送信中
    Committing,
}

/// 楽観的に書き換えた一フィールドの前後の値
#[derive(Debug, Clone)]
enum Revert {
    Title { from: String, to: String },
    Completed { from: bool },
}

impl Revert {
    /// 書き換え後の値をもう一度適用する
    fn reapply(&self, todo: &mut Todo) {
        match self {
            Revert::Title { to, .. } => todo.title = to.clone(),
            Revert::Completed { from } => todo.completed = !*from,
        }
    }
}

/// 保存先の応答を待っている楽観的変更
#[derive(Debug)]
struct InFlight {
    seq: u64,
    id: TodoId,
    revert: Revert,
}

/// `edit` が一覧に反映した変更
struct Optimistic {
    seq: u64,
    todo: Todo,
    revert: Revert,
}

/// フィルタ・タブ適用後の表示内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TodoView {
    pub items: Vec<Todo>,
    /// クエリで絞り込んだ一覧に対するタブごとの件数
    pub counts: TabCounts,
}

struct Inner {
    store: Arc<dyn TodoStore>,
    notifier: Arc<dyn Notifier>,
    grace: Duration,
    todos: watch::Sender<Vec<Todo>>,
    pending: Mutex<HashMap<TodoId, PendingDeletion>>,
    in_flight: Mutex<Vec<InFlight>>,
    next_seq: AtomicU64,
    /// 保存先で確定した削除の回数
    deletions: AtomicU64,
    tracker: TaskTracker,
}

/// 同期エンジン。clone しても同じ一覧を共有する
///
/// ロック順序は `pending` → `in_flight` → `todos`。
#[derive(Clone)]
pub struct TodoSyncEngine {
    inner: Arc<Inner>,
}

impl TodoSyncEngine {
    pub fn new(store: Arc<dyn TodoStore>, notifier: Arc<dyn Notifier>, grace: Duration) -> Self {
        let (todos, _) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(Inner {
                store,
                notifier,
                grace,
                todos,
                pending: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(Vec::new()),
                next_seq: AtomicU64::new(0),
                deletions: AtomicU64::new(0),
                tracker: TaskTracker::new(),
            }),
        }
    }

    pub fn mode(&self) -> StoreMode {
        self.inner.store.mode()
    }

    pub fn grace(&self) -> Duration {
        self.inner.grace
    }

    /// 保存先から一覧を取り直す
    ///
    /// 削除待ちの項目は含めず、応答待ちの楽観的変更は取得結果の上に載せ直す。
    /// 取得中に削除が確定した場合、その一覧は削除前のものかもしれないので取り直す。
    pub async fn refresh(&self) -> Result<(), AppError> {
        loop {
            let generation = self.inner.deletions.load(Ordering::SeqCst);
            let fresh = self.inner.store.list().await?;

            let pending = self.pending();
            if self.inner.deletions.load(Ordering::SeqCst) != generation {
                debug!("取得中に削除が確定したため一覧を取り直します");
                continue;
            }
            let in_flight = self.in_flight();
            let mut visible: Vec<Todo> = fresh
                .into_iter()
                .filter(|todo| !pending.contains_key(&todo.id))
                .collect();
            for entry in in_flight.iter() {
                if let Some(todo) = visible.iter_mut().find(|t| t.id == entry.id) {
                    entry.revert.reapply(todo);
                }
            }
            debug!(count = visible.len(), in_flight = in_flight.len(), "Todo 一覧を更新しました");
            self.inner.todos.send_replace(visible);
            return Ok(());
        }
    }

    pub fn list(&self) -> Vec<Todo> {
        self.inner.todos.borrow().clone()
    }

    pub fn get(&self, id: &TodoId) -> Option<Todo> {
        self.inner.todos.borrow().iter().find(|t| &t.id == id).cloned()
    }

    /// タイトルにクエリを含む項目。一覧自体は変更しない
    pub fn filter(&self, query: &str) -> Vec<Todo> {
        filter_todos(&self.inner.todos.borrow(), query)
    }

    pub fn view(&self, query: &str, tab: Tab) -> TodoView {
        let filtered = self.filter(query);
        TodoView {
            counts: tab_counts(&filtered),
            items: tab.select(&filtered),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Todo>> {
        self.inner.todos.subscribe()
    }

    pub fn is_pending(&self, id: &TodoId) -> bool {
        self.pending().contains_key(id)
    }

    /// Todo を作成する
    ///
    /// リモートでは作成後に一覧を取り直し、保存先の順序と ID に合わせる。
    pub async fn create(&self, title: &str) -> Result<Todo, AppError> {
        let title = validate_title(title)?;

        let created = match self.inner.store.create(&title).await {
            Ok(created) => created,
            Err(e) => {
                warn!(error = %e, "Todo の作成に失敗しました");
                self.inner.notifier.notify(
                    Notification::error("Failed to add todo").with_description(e.user_message()),
                );
                return Err(e);
            }
        };

        let refetched = match self.inner.store.mode() {
            StoreMode::Remote => match self.refresh().await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "作成後の一覧取得に失敗しました");
                    false
                }
            },
            StoreMode::Local => false,
        };
        if !refetched {
            let todo = created.clone();
            self.inner.todos.send_modify(|list| {
                if !list.iter().any(|t| t.id == todo.id) {
                    list.insert(0, todo);
                }
            });
        }

        info!(todo_id = %created.id, "Todo を作成しました");
        self.inner.notifier.notify(Notification::info("Todo added"));
        Ok(created)
    }

    /// タイトルを変更する。空や同一のタイトルなら何もせず `false` を返す
    pub async fn rename(&self, id: &TodoId, title: &str) -> Result<bool, AppError> {
        let Some(optimistic) = self.edit(id, |todo| {
            let from = todo.title.clone();
            todo.rename(title).then(|| Revert::Title {
                from,
                to: todo.title.clone(),
            })
        })?
        else {
            return Ok(false);
        };

        self.commit(optimistic, "Todo updated").await?;
        Ok(true)
    }

    /// 完了状態を切り替え、切り替え後の値を返す
    pub async fn toggle(&self, id: &TodoId) -> Result<bool, AppError> {
        let optimistic = self
            .edit(id, |todo| {
                let from = todo.completed;
                todo.set_completed(!from);
                Some(Revert::Completed { from })
            })?
            .ok_or_else(|| AppError::NotFound(format!("todo {id}")))?;

        let completed = optimistic.todo.completed;
        let message = if completed { "Marked complete" } else { "Marked pending" };
        self.commit(optimistic, message).await?;
        Ok(completed)
    }

    /// 一覧上の一項目を書き換え、応答待ちの変更として登録する
    ///
    /// `f` が `None` を返した場合は何も変えずに `Ok(None)`。
    fn edit(
        &self,
        id: &TodoId,
        f: impl FnOnce(&mut Todo) -> Option<Revert>,
    ) -> Result<Option<Optimistic>, AppError> {
        let mut in_flight = self.in_flight();
        let mut found = false;
        let mut edited = None;
        self.inner.todos.send_if_modified(|list| {
            let Some(todo) = list.iter_mut().find(|t| &t.id == id) else {
                return false;
            };
            found = true;
            let revert = f(todo);
            let changed = revert.is_some();
            edited = revert.map(|revert| (todo.clone(), revert));
            changed
        });
        if !found {
            return Err(AppError::NotFound(format!("todo {id}")));
        }
        let Some((todo, revert)) = edited else {
            return Ok(None);
        };

        let seq = self.inner.next_seq.fetch_add(1, Ordering::SeqCst);
        in_flight.push(InFlight {
            seq,
            id: id.clone(),
            revert: revert.clone(),
        });
        Ok(Some(Optimistic { seq, todo, revert }))
    }

    async fn commit(&self, optimistic: Optimistic, message: &str) -> Result<(), AppError> {
        let Optimistic { seq, todo, revert } = optimistic;
        let result = self.inner.store.update(&todo).await;
        self.in_flight().retain(|entry| entry.seq != seq);

        match result {
            Ok(saved) => {
                // 変更したフィールド以外は触らず、保存先の更新日時だけ取り込む
                self.inner.todos.send_if_modified(|list| {
                    match list.iter_mut().find(|t| t.id == todo.id) {
                        Some(local) => {
                            local.touch(saved.updated_at);
                            true
                        }
                        None => false,
                    }
                });
                debug!(todo_id = %todo.id, "Todo を更新しました");
                self.inner.notifier.notify(Notification::info(message));
                Ok(())
            }
            Err(e) => {
                warn!(todo_id = %todo.id, error = %e, "Todo の更新に失敗したため一覧を取り直します");
                if let Err(refetch) = self.refresh().await {
                    warn!(error = %refetch, "一覧の再取得にも失敗したため変更を取り消します");
                    self.revert(&todo.id, &revert);
                }
                self.inner.notifier.notify(
                    Notification::error("Failed to update").with_description(e.user_message()),
                );
                Err(e)
            }
        }
    }

    fn revert(&self, id: &TodoId, revert: &Revert) {
        self.inner.todos.send_if_modified(|list| {
            let Some(todo) = list.iter_mut().find(|t| &t.id == id) else {
                return false;
            };
            match revert {
                // その後の別の変更は残す
                Revert::Title { from, to } if &todo.title == to => {
                    todo.title = from.clone();
                    true
                }
                Revert::Completed { from } if todo.completed != *from => {
                    todo.completed = *from;
                    true
                }
                _ => false,
            }
        });
    }

    /// 削除の第一段階。一覧から即座に取り除き、猶予期間後に保存先から削除する
    pub fn delete(&self, id: &TodoId) -> Result<(), AppError> {
        let mut pending = self.pending();
        let Some(index) = self.inner.todos.borrow().iter().position(|t| &t.id == id) else {
            return Err(AppError::NotFound(format!("todo {id}")));
        };

        // pending のロックを持ったまま登録するため、タイマーは登録より先に動かない
        let engine = self.clone();
        let target = id.clone();
        let task = ScheduledTask::after(&self.inner.tracker, self.inner.grace, async move {
            engine.expire(target).await;
        })?;

        let mut removed = None;
        self.inner.todos.send_if_modified(|list| {
            if index < list.len() && &list[index].id == id {
                removed = Some(list.remove(index));
                true
            } else {
                false
            }
        });
        let Some(todo) = removed else {
            task.cancel();
            return Err(AppError::NotFound(format!("todo {id}")));
        };

        pending.insert(
            id.clone(),
            PendingDeletion {
                todo,
                index,
                deadline: Instant::now() + self.inner.grace,
                phase: Phase::Waiting,
                task: Some(task),
            },
        );
        drop(pending);

        info!(todo_id = %id, grace_ms = self.inner.grace.as_millis() as u64, "Todo を削除待ちにしました");
        self.inner.notifier.notify(
            Notification::info("Todo removed")
                .with_description(format!("Undo within {}s", self.inner.grace.as_secs())),
        );
        Ok(())
    }

    /// 猶予期間中の削除を取り消す。取り消せた場合だけ `true`
    pub fn undo_delete(&self, id: &TodoId) -> bool {
        let mut pending = self.pending();
        match pending.get(id) {
            Some(entry) if entry.phase == Phase::Waiting => {}
            _ => return false,
        }
        let Some(mut entry) = pending.remove(id) else {
            return false;
        };
        if let Some(task) = entry.task.take() {
            task.cancel();
        }
        self.reinsert(entry.index, entry.todo);
        info!(todo_id = %id, "削除を取り消しました");
        true
    }

    /// 猶予期間が過ぎた削除を保存先へ送る
    async fn expire(&self, id: TodoId) {
        let target = {
            let mut pending = self.pending();
            match pending.get_mut(&id) {
                Some(entry) if entry.phase == Phase::Waiting => {
                    entry.phase = Phase::Committing;
                    entry.task = None;
                    entry.todo.id.clone()
                }
                _ => return,
            }
        };

        let result = self.inner.store.delete(&target).await;

        let mut pending = self.pending();
        let Some(entry) = pending.remove(&id) else {
            return;
        };
        match result {
            Ok(()) => {
                self.inner.deletions.fetch_add(1, Ordering::SeqCst);
                drop(pending);
                info!(todo_id = %id, "Todo を削除しました");
                self.inner.notifier.notify(Notification::info("Todo deleted"));
            }
            Err(e) => {
                self.reinsert(entry.index, entry.todo);
                drop(pending);
                warn!(todo_id = %id, error = %e, "Todo の削除に失敗したため一覧に戻します");
                self.inner.notifier.notify(
                    Notification::error("Failed to delete").with_description(e.user_message()),
                );
            }
        }
    }

    /// 予定された削除がすべて終わるまで待つ
    pub async fn settle(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.tracker.reopen();
    }

    /// 元の位置（一覧の長さで切り詰め）に戻す
    fn reinsert(&self, index: usize, todo: Todo) {
        self.inner.todos.send_modify(|list| {
            if list.iter().any(|t| t.id == todo.id) {
                return;
            }
            let at = index.min(list.len());
            list.insert(at, todo);
        });
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<TodoId, PendingDeletion>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn in_flight(&self) -> MutexGuard<'_, Vec<InFlight>> {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotificationLog;
    use crate::storage::MemoryStorage;
    use crate::sync::store::LocalTodoStore;

    async fn local_engine() -> (Arc<NotificationLog>, TodoSyncEngine) {
        let log = Arc::new(NotificationLog::new());
        let store = Arc::new(LocalTodoStore::new(Arc::new(MemoryStorage::new())));
        let engine = TodoSyncEngine::new(store, log.clone(), Duration::from_secs(5));
        engine.refresh().await.unwrap();
        (log, engine)
    }

    #[tokio::test]
    async fn test_local_create_prepends() {
        let (log, engine) = local_engine().await;

        engine.create("Buy milk").await.unwrap();
        engine.create("clean Desk").await.unwrap();

        let titles: Vec<_> = engine.list().into_iter().map(|t| t.title).collect();
        assert_eq!(titles, ["clean Desk", "Buy milk"]);
        assert_eq!(log.titles(), ["Todo added", "Todo added"]);
    }

    #[tokio::test]
    async fn test_blank_title_is_rejected() {
        let (_, engine) = local_engine().await;
        assert!(matches!(
            engine.create("   ").await,
            Err(AppError::Validation(_))
        ));
        assert!(engine.list().is_empty());
    }

    #[tokio::test]
    async fn test_view_filters_and_counts() {
        let (_, engine) = local_engine().await;
        engine.create("Buy milk").await.unwrap();
        let desk = engine.create("clean Desk").await.unwrap();
        engine.create("Deploy").await.unwrap();
        engine.toggle(&desk.id).await.unwrap();

        let view = engine.view("de", Tab::Completed);
        assert_eq!(view.items.len(), 1);
        assert_eq!(view.items[0].title, "clean Desk");
        assert_eq!(view.counts.all, 2);
        assert_eq!(view.counts.pending, 1);
        assert_eq!(view.counts.completed, 1);
        assert_eq!(engine.list().len(), 3);
    }

    #[tokio::test]
    async fn test_rename_noop_rules() {
        let (log, engine) = local_engine().await;
        let todo = engine.create("Task").await.unwrap();
        log.drain();

        assert!(!engine.rename(&todo.id, "  ").await.unwrap());
        assert!(!engine.rename(&todo.id, "Task").await.unwrap());
        assert!(log.snapshot().is_empty());

        assert!(engine.rename(&todo.id, "Other").await.unwrap());
        assert_eq!(engine.get(&todo.id).unwrap().title, "Other");
        assert_eq!(log.titles(), ["Todo updated"]);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let (_, engine) = local_engine().await;
        let missing = TodoId::from("missing");

        assert!(matches!(engine.toggle(&missing).await, Err(AppError::NotFound(_))));
        assert!(matches!(engine.delete(&missing), Err(AppError::NotFound(_))));
        assert!(!engine.undo_delete(&missing));
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_delete_commits_after_grace() {
        let (log, engine) = local_engine().await;
        let todo = engine.create("Task").await.unwrap();

        engine.delete(&todo.id).unwrap();
        assert!(engine.list().is_empty());
        assert!(engine.is_pending(&todo.id));

        engine.settle().await;

        assert!(!engine.is_pending(&todo.id));
        assert!(!engine.undo_delete(&todo.id));
        engine.refresh().await.unwrap();
        assert!(engine.list().is_empty());
        assert!(log.contains("Todo deleted"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_undo_restores_original_position() {
        let (_, engine) = local_engine().await;
        engine.create("c").await.unwrap();
        let middle = engine.create("b").await.unwrap();
        engine.create("a").await.unwrap();
        let before = engine.list();

        engine.delete(&middle.id).unwrap();
        assert!(engine.undo_delete(&middle.id));
        assert!(!engine.undo_delete(&middle.id));

        assert_eq!(engine.list(), before);
        engine.settle().await;
        engine.refresh().await.unwrap();
        assert_eq!(engine.list(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_does_not_resurrect_pending_delete() {
        let (_, engine) = local_engine().await;
        let todo = engine.create("Task").await.unwrap();

        engine.delete(&todo.id).unwrap();
        engine.refresh().await.unwrap();

        assert!(engine.list().is_empty());
        assert!(engine.undo_delete(&todo.id));
        assert_eq!(engine.list().len(), 1);
    }
}

use shared::AppError;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// 遅延実行されるタスクのハンドル
///
/// 取り消しは一度だけ有効で、二回目以降は何もしない。
/// 待機が終わって処理が始まった後の取り消しは処理を止めない。
#[derive(Debug)]
pub struct ScheduledTask {
    token: CancellationToken,
    cancelled: AtomicBool,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// `delay` 経過後に `action` を実行する
    pub fn after<F>(tracker: &TaskTracker, delay: Duration, action: F) -> Result<Self, AppError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let runtime = Handle::try_current()
            .map_err(|e| AppError::Internal(format!("no async runtime to schedule on: {e}")))?;

        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tracker.spawn_on(
            async move {
                tokio::select! {
                    biased;
                    _ = child.cancelled() => {}
                    _ = tokio::time::sleep(delay) => action.await,
                }
            },
            &runtime,
        );

        Ok(Self {
            token,
            cancelled: AtomicBool::new(false),
            handle,
        })
    }

    /// 取り消す。最初の呼び出しだけ `true` を返す
    pub fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_runs_after_delay() {
        let tracker = TaskTracker::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();

        let task = ScheduledTask::after(&tracker, Duration::from_secs(5), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tracker.close();
        tracker.wait().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent() {
        let tracker = TaskTracker::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();

        let task = ScheduledTask::after(&tracker, Duration::from_secs(5), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        assert!(task.cancel());
        assert!(!task.cancel());
        assert!(task.is_cancelled());

        tracker.close();
        tracker.wait().await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_requires_runtime() {
        let tracker = TaskTracker::new();
        let result = ScheduledTask::after(&tracker, Duration::from_secs(1), async {});
        assert!(matches!(result, Err(AppError::Internal(_))));
    }
}

//! 永続化キーバリューストア
//!
//! 認証情報とローカルモードの Todo 一覧は同じストアの別キーに保存される。

use shared::AppError;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

/// 保存ファイル名
const STATE_FILE: &str = "state.json";

/// キーバリューストアの抽象
///
/// `apply` に渡した変更はまとめて反映され、途中の状態が観測されることはない。
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// 複数キーの更新を一括で反映する。`None` はキーの削除
    fn apply(&self, changes: &[(&str, Option<String>)]) -> Result<(), AppError>;

    fn set(&self, key: &str, value: String) -> Result<(), AppError> {
        self.apply(&[(key, Some(value))])
    }

    fn remove(&self, key: &str) -> Result<(), AppError> {
        self.apply(&[(key, None)])
    }
}

fn apply_changes(entries: &mut BTreeMap<String, String>, changes: &[(&str, Option<String>)]) {
    for (key, value) in changes {
        match value {
            Some(value) => {
                entries.insert((*key).to_string(), value.clone());
            }
            None => {
                entries.remove(*key);
            }
        }
    }
}

/// メモリ上のストア（テスト・一時利用向け）
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn apply(&self, changes: &[(&str, Option<String>)]) -> Result<(), AppError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        apply_changes(&mut entries, changes);
        Ok(())
    }
}

/// 単一の JSON ファイルに保存するストア
///
/// 書き込みは一時ファイルへ書いてから rename するため、プロセスが途中で落ちても
/// 古い内容か新しい内容のどちらかが残る。
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStorage {
    /// ディレクトリ内の状態ファイルを開く。無ければ空のストアとして扱う
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, AppError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| {
            AppError::Storage(format!("failed to create {}: {e}", dir.display()))
        })?;

        let path = dir.join(STATE_FILE);
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                // 壊れたファイルは空として扱い、次回の書き込みで上書きされる
                warn!(path = %path.display(), error = %e, "状態ファイルが壊れているため無視します");
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(AppError::Storage(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };

        debug!(path = %path.display(), keys = entries.len(), "状態ファイルを読み込みました");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), AppError> {
        let raw = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, raw)
            .and_then(|_| fs::rename(&tmp, &self.path))
            .map_err(|e| AppError::Storage(format!("failed to write {}: {e}", self.path.display())))
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn apply(&self, changes: &[(&str, Option<String>)]) -> Result<(), AppError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        apply_changes(&mut entries, changes);
        self.persist(&entries)
    }
}

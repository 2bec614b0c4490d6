//! SnapshotStore port - タスク snapshot の保存先
//!
//! 再起動後も履歴を読めるようにする。実装は `impls` にある（InMemory / File）。

use async_trait::async_trait;

use crate::domain::{TaskId, TaskSnapshot};
use crate::error::Result;

/// SnapshotStore はタスク snapshot の永続化フック
///
/// # 契約
/// - キューは状態遷移ごとにロック外で `save` を呼ぶ。同じタスクの save は順不同で届く
/// - 実装は `revision` が最大の snapshot を保持し、古いものは捨てる
///   （[`TaskSnapshot::is_superseded_by`]）
/// - メモリからの eviction では snapshot を消さない。store が全履歴を持つ
/// - 失敗はログに出すだけで、呼び出し元のキュー操作は失敗させない
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Insert or replace the snapshot for `snapshot.id`, unless the stored
    /// one has a higher revision.
    async fn save(&self, snapshot: &TaskSnapshot) -> Result<()>;

    async fn load(&self, id: TaskId) -> Result<Option<TaskSnapshot>>;

    /// All stored snapshots, oldest task first.
    async fn load_all(&self) -> Result<Vec<TaskSnapshot>>;

    /// Removing a missing id is not an error.
    async fn remove(&self, id: TaskId) -> Result<()>;
}

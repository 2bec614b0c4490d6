//! Ports の実装
//!
//! - [`InMemorySnapshotStore`]: テスト・組み込み用
//! - [`FileSnapshotStore`]: ディレクトリ配下にタスクごとの JSON ファイル

pub mod file_store;
pub mod memory_store;

pub use self::file_store::FileSnapshotStore;
pub use self::memory_store::InMemorySnapshotStore;

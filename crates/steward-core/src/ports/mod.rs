//! Ports - 時刻と永続化の差し替え口
//!
//! キューはこれらの trait だけに依存する。
//! - 本番: [`SystemClock`] + ファイル store
//! - テスト: [`FixedClock`] + InMemory store

pub mod clock;
pub mod snapshot_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::snapshot_store::SnapshotStore;

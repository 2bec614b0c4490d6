//! steward-core
//!
//! コンテンツ管理エージェントの非同期実行コア。
//!
//! # モジュール構成
//! - **domain**: タスクモデル（ids, state, schedule, task, status / snapshot ビュー）
//! - **runtime**: callable、TaskContext、interrupter、progress
//! - **queue**: `TaskQueue` port、FIFO 実装、dispatch loop
//! - **ports**: clock と snapshot store の差し替え口
//! - **impls**: InMemory / File の snapshot store
//! - **content**: handler container、dispatcher、report
//! - **observability**: 状態ごとの件数
//! - **error**: クレートのエラー型

pub mod content;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod runtime;

pub use domain::{Schedule, Task, TaskId, TaskState, TaskStatus};
pub use error::{Result, StewardError};
pub use queue::{Criteria, FifoTaskQueue, QueueConfig, TaskQueue};

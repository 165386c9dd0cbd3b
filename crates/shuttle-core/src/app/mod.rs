//! App - アプリケーション層
//!
//! ports を組み合わせてキューエンジンを実装します。
//!
//! # 主要コンポーネント
//! - **QueueManagerBuilder**: 構築とワイヤリング（fail-fast 検証）
//! - **QueueManager**: submit / cancel / status と broker のライフサイクル
//! - **worker_loop**: consume → claim → execute → settle → ack
//! - **publisher_loop**: 遅延再実行の解放と再 publish
//! - **reaper_loop**: 起動時の回収 sweep
//! - **gc_loop**: 終了済み record の削除

pub mod builder;
mod gc_loop;
pub mod manager;
mod publisher_loop;
pub mod reaper_loop;
pub mod status;
mod worker_loop;

pub use self::builder::{BuildError, QueueManagerBuilder};
pub use self::manager::{ManagerHandle, QueueManager};
pub use self::reaper_loop::RecoveryReport;
pub use self::status::{QueueCounts, StatusSnapshot};

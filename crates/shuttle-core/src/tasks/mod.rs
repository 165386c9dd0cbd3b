//! Tasks - handler contract, registry and wire payload
//!
//! # 二層構造
//! - **TaskHandler**: task kind ごとの処理単位（object-safe）
//! - **TaskRegistry**: `TaskKind -> (handler, policy)` の対応表（build 後は固定）

pub mod codec;
pub mod handler;
pub mod registry;

pub use self::codec::{PayloadCodec, TaskPayload};
pub use self::handler::{TaskContext, TaskHandler};
pub use self::registry::{RegistryEntry, TaskRegistry};

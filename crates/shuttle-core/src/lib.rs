//! shuttle-core
//!
//! broker を介した永続的なバックグラウンドタスクエンジン
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task_kind, record, state, outcome, ticket, errors）
//! - **ports**: 抽象化レイヤー（MessageRecordStore, BrokerGateway, TicketStore, Clock, IdGenerator）
//! - **impls**: in-memory 実装（開発用・テスト用）
//! - **tasks**: TaskHandler trait, TaskRegistry, PayloadCodec
//! - **queue**: TaskPolicy, BackoffPolicy, StoreWriter（CAS 書き込み）
//! - **app**: QueueManagerBuilder, QueueManager と各ループ
//! - **handlers**: 同梱 handler（PURGE_EXPIRED_TICKETS）
//! - **config**: EngineConfig の読み込みと検証
//! - **observability**: tracing の初期化
//!
//! # 原則
//! - record store が唯一の正（broker が運ぶのは `{ id, task_kind }` のみ）
//! - handler 実行前に PROCESSING を書き込むので、再配送された payload が二重実行されることはない

pub mod app;
pub mod config;
pub mod domain;
pub mod handlers;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod tasks;

pub use crate::app::{
    BuildError, ManagerHandle, QueueCounts, QueueManager, QueueManagerBuilder, RecoveryReport,
    StatusSnapshot,
};
pub use crate::config::{ConfigError, EngineConfig};
pub use crate::domain::{
    EngineError, HandlerOutcome, MessageId, MessageRecord, MessageStatus, Properties, TaskKind,
};
pub use crate::queue::{BackoffPolicy, TaskPolicy};
pub use crate::tasks::{TaskContext, TaskHandler};

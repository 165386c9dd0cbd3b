//! Queue policies and the write path shared by every loop.
//!
//! - retry: backoff delays (fixed / exponential)
//! - policy: per task-kind limits (concurrency, budget, retry cap)
//! - transition: compare-and-set writes with bounded store retries

pub mod policy;
pub mod retry;
pub mod transition;

pub use self::policy::TaskPolicy;
pub use self::retry::BackoffPolicy;
pub use self::transition::StoreWriter;

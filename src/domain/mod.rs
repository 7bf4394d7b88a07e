//! 领域模型模块
//!
//! 纯数据结构，不依赖 tokio 或 SSH

pub mod hook;
pub mod host;
pub mod progress;
pub mod task;

// Re-exports for convenience
pub use hook::{Hook, HookCondition, HookContext, HookPoint, HookResult};
pub use host::Host;
pub use progress::{ProgressEvent, ProgressUpdate, TaskStatus};
pub use task::{HostState, Phase, Task, TaskResult};

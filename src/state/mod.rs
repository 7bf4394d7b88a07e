//! 运行时状态模块
//!
//! 保存一次配置运行中各主机的状态迁移与任务结果

pub mod ledger;

pub use ledger::{HostRecord, PhaseResult, ResultLedger};

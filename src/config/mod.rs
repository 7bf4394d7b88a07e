//! 配置模块
//!
//! 配置对象、连接参数与重试策略

pub mod env;
pub mod provision;
pub mod retry;

pub use env::ConnectionDefaults;
pub use provision::{Environment, HookEntry, HooksConfig, ProvisionConfig, User};
pub use retry::RetryPolicy;

//! 生命周期钩子
//!
//! 注册表负责加载，管理器负责执行

pub mod manager;
pub mod registry;

pub use manager::HookManager;
pub use registry::HookRegistry;

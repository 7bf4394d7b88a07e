//! 服务层模块
//!
//! 包含核心业务逻辑：校验、任务执行、阶段编排、钩子与进度

pub mod executor;
pub mod hooks;
pub mod progress;
pub mod provisioner;
pub mod setup;
pub mod validator;

pub use executor::TaskExecutor;
pub use hooks::{HookManager, HookRegistry};
pub use progress::{ChannelReporter, ConsoleReporter, JsonReporter, NullReporter, ProgressReporter};
pub use provisioner::{provision, Provisioner, Schedule};
pub use setup::HostSetup;
pub use validator::RequirementsValidator;

//! Shango Provision - 远程主机配置编排引擎
//!
//! 通过 SSH 对一个或多个环境中的主机执行幂等、可重试的配置步骤，
//! 并在生命周期挂载点执行用户钩子

pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod services;
pub mod state;

pub use config::{ConnectionDefaults, ProvisionConfig, RetryPolicy};
pub use error::{ProvisionError, Result};
pub use services::{provision, Provisioner, Schedule};

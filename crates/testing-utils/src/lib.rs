//! # Scheduler Testing Utils
//!
//! 各crate共用的测试支撑：内存版协作者、测试数据构建器、Redis测试容器和常用等待工具。
//!
//! ```toml
//! [dev-dependencies]
//! scheduler-testing-utils = { path = "../testing-utils" }
//! ```
//!
//! ```text
//! use scheduler_testing_utils::{MockTaskRepository, ParentTaskBuilder, TestEnv};
//! ```

pub mod builders;
pub mod containers;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use containers::*;
pub use helpers::*;
pub use mocks::*;

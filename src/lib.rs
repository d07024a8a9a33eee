//! 运维任务编排引擎
//!
//! 进程入口使用的组装层：[`app::Application`] 负责创建并连接各个组件，
//! [`shutdown::ShutdownManager`] 负责广播关闭信号。

pub mod app;
pub mod shutdown;

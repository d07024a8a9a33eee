//! 工作池与远程执行适配器

pub mod adapters;
pub mod components;
pub mod pool;

pub use adapters::{AdapterRegistry, JenkinsAdapter, JenkinsClient, OpenSshShell, SshAdapter};
pub use components::{
    AdmissionController, AdmissionPermit, GateDecision, JobLifecycleManager, NextRunResolver,
};
pub use pool::WorkerPool;

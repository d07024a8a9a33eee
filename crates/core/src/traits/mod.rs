pub mod adapter;
pub mod build_system;
pub mod job_store;
pub mod remote_shell;
pub mod repository;
pub mod target;

pub use adapter::*;
pub use build_system::*;
pub use job_store::*;
pub use remote_shell::*;
pub use repository::*;
pub use target::*;

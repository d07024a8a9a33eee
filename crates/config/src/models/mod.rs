pub mod adapters;
pub mod app_config;
pub mod database;
pub mod dispatcher;
pub mod job_store;
pub mod logging;
pub mod targets;
pub mod worker_pool;

pub use adapters::*;
pub use app_config::*;
pub use database::*;
pub use dispatcher::*;
pub use job_store::*;
pub use logging::*;
pub use targets::*;
pub use worker_pool::*;

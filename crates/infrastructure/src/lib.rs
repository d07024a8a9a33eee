pub mod database;
pub mod in_memory_store;
pub mod job_store_factory;
pub mod priority_queue;
pub mod redis_store;
pub mod target_catalog;

pub use database::*;
pub use in_memory_store::InMemoryJobStore;
pub use job_store_factory::JobStoreFactory;
pub use priority_queue::{LaneLengths, PriorityQueue, RetryDrain, DEFAULT_KEY_PREFIX};
pub use redis_store::RedisJobStore;
pub use target_catalog::StaticTargetResolver;

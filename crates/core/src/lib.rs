pub mod cancel;
pub mod errors;
pub mod lifecycle;
pub mod models;
pub mod traits;

pub use cancel::{CancelHandle, CancelSignal};
pub use errors::*;
pub use models::*;
pub use traits::*;

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

pub mod admission;
pub mod lifecycle;

pub use admission::{AdmissionController, AdmissionPermit};
pub use lifecycle::{GateDecision, JobLifecycleManager, NextRunResolver};

//! Job coordination: one mining job per model, run sequentially or by a
//! bounded pool of workers, with results persisted per model

pub mod coordinator;
pub mod store;
pub mod worker;

pub use coordinator::{JobCoordinator, MiningRun};
pub use store::{GraspRecord, LocalResultStore, ResultStore, SavedResult};
pub use worker::{JobReport, JobStatus, ModelJob};

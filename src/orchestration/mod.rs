//! Stateful coordination around the pure decision engine.

pub mod coordinator;
pub mod events;
pub mod gate;
pub mod runner;

pub use coordinator::{
    BatchOutcome, BulkAdjustment, CoordinatorError, ItemToggle, RestoreResult, ResumeFrom,
    ToggleCoordinator,
};
pub use events::PriceEvents;
pub use gate::CycleGate;
pub use runner::{ItemFailure, RunError, RunOptions, RunStats, Runner, RunnerSettings};

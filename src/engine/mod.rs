//! Pure computation engine for pricing decisions.

pub mod decision;

pub use decision::{decide, Decision, DecisionError, HoldReason, Transition};

pub mod api;
pub mod config;
pub mod datasource;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;

pub use config::{Config, DropThreshold, PricingPolicy};
pub use datasource::{
    DataSourceError, HttpStorefront, MockRevenueSource, MockStorefront, PriceCommit,
    RevenueSource, Storefront,
};
pub use db::{init_db, Repository};
pub use domain::{Decimal, ItemId, PricingRecord, PricingState, StoreId, TimeMs};
pub use engine::{decide, Decision, Transition};
pub use error::AppError;
pub use orchestration::{CycleGate, PriceEvents, RunStats, Runner, ToggleCoordinator};

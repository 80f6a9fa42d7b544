//! Domain types for the automated pricing controller.
//!
//! This module provides:
//! - Lossless money handling via the Decimal wrapper
//! - Domain primitives: TimeMs, ItemId, StoreId
//! - The per-item PricingRecord and its state enum
//! - Revenue signals, undo snapshots, and price change events

pub mod decimal;
pub mod price_change;
pub mod primitives;
pub mod record;
pub mod signal;
pub mod snapshot;

pub use decimal::Decimal;
pub use price_change::{ChangeReason, PriceChange};
pub use primitives::{ItemId, StoreId, TimeMs};
pub use record::{validate_prices, LimitsUpdate, PricingRecord, PricingState, ValidationError};
pub use signal::RevenueSignal;
pub use snapshot::{Snapshot, SnapshotAction, SnapshotBatch};

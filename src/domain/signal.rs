//! Windowed revenue comparison supplied by the revenue collaborator.

use crate::domain::Decimal;
use serde::{Deserialize, Serialize};

/// Revenue and units for the current window and the window before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueSignal {
    pub current_period_revenue: Decimal,
    pub previous_period_revenue: Decimal,
    pub current_period_units: i64,
    pub previous_period_units: i64,
}

impl RevenueSignal {
    pub fn new(current_period_revenue: Decimal, previous_period_revenue: Decimal) -> Self {
        Self {
            current_period_revenue,
            previous_period_revenue,
            current_period_units: 0,
            previous_period_units: 0,
        }
    }

    pub fn with_units(mut self, current: i64, previous: i64) -> Self {
        self.current_period_units = current;
        self.previous_period_units = previous;
        self
    }

    /// Name of the first field carrying a negative value, if any.
    pub fn invalid_field(&self) -> Option<&'static str> {
        if self.current_period_revenue.is_negative() {
            Some("currentPeriodRevenue")
        } else if self.previous_period_revenue.is_negative() {
            Some("previousPeriodRevenue")
        } else if self.current_period_units < 0 {
            Some("currentPeriodUnits")
        } else if self.previous_period_units < 0 {
            Some("previousPeriodUnits")
        } else {
            None
        }
    }
}

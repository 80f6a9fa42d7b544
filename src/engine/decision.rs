//! Pure decision function: record + revenue signal + clock -> transition.
//!
//! No I/O and no clock reads beyond the `now` argument, so the runner can
//! recompute a decision on retry and get the same answer.

use crate::config::{DropThreshold, PricingPolicy};
use crate::domain::{Decimal, PricingRecord, PricingState, RevenueSignal, TimeMs};
use serde::Serialize;
use thiserror::Error;

/// What a cycle does to one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Transition {
    Hold(HoldReason),
    Increase,
    Revert,
    /// Revert wait elapsed; back to `Increasing` without a price change.
    Rearm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum HoldReason {
    AtCeiling,
    RevertWait,
    NothingToRevert,
}

/// Result of `decide`: the transition plus every field it writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub transition: Transition,
    /// `Some` only when the price changes.
    pub new_price: Option<Decimal>,
    pub next_state: PricingState,
    pub next_price_change: TimeMs,
    pub revert_wait_until: Option<TimeMs>,
    pub previous_price: Option<Decimal>,
}

impl Decision {
    /// The record as it looks after this decision is committed.
    pub fn apply_to(&self, record: &PricingRecord) -> PricingRecord {
        let mut next = record.clone();
        if let Some(price) = self.new_price {
            next.current_price = price;
        }
        next.current_state = self.next_state;
        next.next_price_change = self.next_price_change;
        next.revert_wait_until = self.revert_wait_until;
        next.previous_price = self.previous_price;
        next
    }

    pub fn changes_price(&self) -> bool {
        self.new_price.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecisionError {
    #[error("data quality: {field} is negative or malformed")]
    DataQuality { field: &'static str },
    #[error("item is not eligible: {0}")]
    NotEligible(&'static str),
}

/// Decide the next transition for `record` at `now`.
///
/// # Errors
/// `DataQuality` when the signal carries negative values (the price must not
/// move), `NotEligible` when the record is disabled or still cooling down.
pub fn decide(
    record: &PricingRecord,
    signal: &RevenueSignal,
    now: TimeMs,
    policy: &PricingPolicy,
) -> Result<Decision, DecisionError> {
    if !record.auto_pricing_enabled {
        return Err(DecisionError::NotEligible("auto-pricing disabled"));
    }
    if now < record.next_price_change {
        return Err(DecisionError::NotEligible("cool-down not elapsed"));
    }
    if let Some(field) = signal.invalid_field() {
        return Err(DecisionError::DataQuality { field });
    }

    let next_price_change = now.plus_ms(policy.period_ms);
    let pending_wait = record.revert_wait_until.filter(|until| now < *until);

    let hold = |reason: HoldReason, next_state: PricingState| Decision {
        transition: Transition::Hold(reason),
        new_price: None,
        next_state,
        next_price_change,
        revert_wait_until: pending_wait,
        previous_price: record.previous_price,
    };

    if pending_wait.is_some() {
        return Ok(hold(HoldReason::RevertWait, record.current_state));
    }

    if record.current_state == PricingState::RevertPending {
        return Ok(Decision {
            transition: Transition::Rearm,
            new_price: None,
            next_state: PricingState::Increasing,
            next_price_change,
            revert_wait_until: None,
            previous_price: record.previous_price,
        });
    }

    if revenue_dropped(signal, policy.drop_threshold) {
        let floor = record.starting_price;
        let target = record.previous_price.unwrap_or(floor).max(floor);
        if target >= record.current_price {
            return Ok(hold(HoldReason::NothingToRevert, PricingState::Holding));
        }
        return Ok(Decision {
            transition: Transition::Revert,
            new_price: Some(target),
            next_state: PricingState::RevertPending,
            next_price_change,
            revert_wait_until: Some(now.plus_ms(policy.revert_wait_ms)),
            previous_price: None,
        });
    }

    let stepped = (record.current_price * (Decimal::one() + policy.increment_pct)).round_cents();
    let new_price = stepped.min(record.max_price);
    if new_price <= record.current_price {
        return Ok(hold(HoldReason::AtCeiling, record.current_state));
    }

    Ok(Decision {
        transition: Transition::Increase,
        new_price: Some(new_price),
        next_state: PricingState::Increasing,
        next_price_change,
        revert_wait_until: None,
        previous_price: Some(record.current_price),
    })
}

/// A zero previous period is "no baseline" and never counts as a drop.
fn revenue_dropped(signal: &RevenueSignal, threshold: DropThreshold) -> bool {
    let previous = signal.previous_period_revenue;
    if previous.is_zero() {
        return false;
    }
    let drop = previous - signal.current_period_revenue;
    if !drop.is_positive() {
        return false;
    }
    match threshold {
        DropThreshold::Percent(pct) => drop.checked_div(previous).is_some_and(|ratio| ratio > pct),
        DropThreshold::Absolute(amount) => drop > amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ItemId, StoreId};

    const DAY: i64 = 86_400_000;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn policy() -> PricingPolicy {
        PricingPolicy {
            increment_pct: d("0.08"),
            drop_threshold: DropThreshold::Percent(d("0.10")),
            period_ms: DAY,
            revert_wait_ms: 2 * DAY,
        }
    }

    fn record(price: &str) -> PricingRecord {
        let mut r = PricingRecord::new_from_catalog(
            ItemId::new("sku-1"),
            StoreId::new("default"),
            d("24.99"),
            d("49.98"),
            d("10"),
            TimeMs::new(0),
        );
        r.current_price = d(price);
        r.auto_pricing_enabled = true;
        r
    }

    fn signal(current: &str, previous: &str) -> RevenueSignal {
        RevenueSignal::new(d(current), d(previous))
    }

    #[test]
    fn test_increase_rounds_to_cents() {
        let now = TimeMs::new(DAY);
        let decision = decide(&record("24.99"), &signal("3200", "3000"), now, &policy()).unwrap();
        assert_eq!(decision.transition, Transition::Increase);
        assert_eq!(decision.new_price, Some(d("26.99")));
        assert_eq!(decision.previous_price, Some(d("24.99")));
        assert_eq!(decision.next_state, PricingState::Increasing);
        assert_eq!(decision.next_price_change, TimeMs::new(2 * DAY));
    }

    #[test]
    fn test_revert_after_drop() {
        let mut r = record("26.99");
        r.previous_price = Some(d("24.99"));
        let now = TimeMs::new(DAY);
        let decision = decide(&r, &signal("2400", "3000"), now, &policy()).unwrap();
        assert_eq!(decision.transition, Transition::Revert);
        assert_eq!(decision.new_price, Some(d("24.99")));
        assert_eq!(decision.next_state, PricingState::RevertPending);
        assert_eq!(decision.revert_wait_until, Some(TimeMs::new(3 * DAY)));
        assert_eq!(decision.previous_price, None);
    }

    #[test]
    fn test_drop_within_threshold_still_increases() {
        let decision =
            decide(&record("24.99"), &signal("2800", "3000"), TimeMs::new(0), &policy()).unwrap();
        assert_eq!(decision.transition, Transition::Increase);
    }

    #[test]
    fn test_absolute_threshold() {
        let mut p = policy();
        p.drop_threshold = DropThreshold::Absolute(d("500"));
        let mut r = record("26.99");
        r.previous_price = Some(d("24.99"));
        let small = decide(&r, &signal("2600", "3000"), TimeMs::new(0), &p).unwrap();
        assert_eq!(small.transition, Transition::Increase);
        let large = decide(&r, &signal("2400", "3000"), TimeMs::new(0), &p).unwrap();
        assert_eq!(large.transition, Transition::Revert);
    }

    #[test]
    fn test_zero_baseline_increases() {
        let decision =
            decide(&record("24.99"), &signal("0", "0"), TimeMs::new(0), &policy()).unwrap();
        assert_eq!(decision.transition, Transition::Increase);
    }

    #[test]
    fn test_ceiling_holds_and_advances_schedule() {
        let now = TimeMs::new(5 * DAY);
        let decision = decide(&record("49.98"), &signal("3200", "3000"), now, &policy()).unwrap();
        assert_eq!(decision.transition, Transition::Hold(HoldReason::AtCeiling));
        assert_eq!(decision.new_price, None);
        assert_eq!(decision.next_state, PricingState::Increasing);
        assert_eq!(decision.next_price_change, TimeMs::new(6 * DAY));
    }

    #[test]
    fn test_increase_clamped_to_ceiling() {
        let decision =
            decide(&record("48"), &signal("3200", "3000"), TimeMs::new(0), &policy()).unwrap();
        assert_eq!(decision.new_price, Some(d("49.98")));
    }

    #[test]
    fn test_drop_at_starting_price_moves_to_holding() {
        let decision =
            decide(&record("24.99"), &signal("1000", "3000"), TimeMs::new(0), &policy()).unwrap();
        assert_eq!(decision.transition, Transition::Hold(HoldReason::NothingToRevert));
        assert_eq!(decision.next_state, PricingState::Holding);
        assert_eq!(decision.new_price, None);
    }

    #[test]
    fn test_holding_recovers_to_increasing() {
        let mut r = record("24.99");
        r.current_state = PricingState::Holding;
        let decision = decide(&r, &signal("3000", "3000"), TimeMs::new(0), &policy()).unwrap();
        assert_eq!(decision.transition, Transition::Increase);
        assert_eq!(decision.next_state, PricingState::Increasing);
    }

    #[test]
    fn test_revert_pending_waits_then_rearms() {
        let mut r = record("24.99");
        r.current_state = PricingState::RevertPending;
        r.revert_wait_until = Some(TimeMs::new(2 * DAY));
        r.next_price_change = TimeMs::new(DAY);

        let waiting = decide(&r, &signal("3200", "3000"), TimeMs::new(DAY), &policy()).unwrap();
        assert_eq!(waiting.transition, Transition::Hold(HoldReason::RevertWait));
        assert_eq!(waiting.next_state, PricingState::RevertPending);
        assert_eq!(waiting.revert_wait_until, Some(TimeMs::new(2 * DAY)));

        let rearmed =
            decide(&r, &signal("3200", "3000"), TimeMs::new(2 * DAY), &policy()).unwrap();
        assert_eq!(rearmed.transition, Transition::Rearm);
        assert_eq!(rearmed.next_state, PricingState::Increasing);
        assert_eq!(rearmed.revert_wait_until, None);
        assert_eq!(rearmed.new_price, None);
    }

    #[test]
    fn test_negative_revenue_is_data_quality_error() {
        let err =
            decide(&record("24.99"), &signal("-1", "3000"), TimeMs::new(0), &policy()).unwrap_err();
        assert_eq!(
            err,
            DecisionError::DataQuality {
                field: "currentPeriodRevenue"
            }
        );
    }

    #[test]
    fn test_ineligible_inputs_rejected() {
        let mut r = record("24.99");
        r.next_price_change = TimeMs::new(DAY);
        assert!(matches!(
            decide(&r, &signal("1", "1"), TimeMs::new(DAY - 1), &policy()),
            Err(DecisionError::NotEligible(_))
        ));
        r.auto_pricing_enabled = false;
        assert!(matches!(
            decide(&r, &signal("1", "1"), TimeMs::new(DAY), &policy()),
            Err(DecisionError::NotEligible(_))
        ));
    }

    #[test]
    fn test_decide_is_deterministic() {
        let mut r = record("26.99");
        r.previous_price = Some(d("24.99"));
        let s = signal("2400", "3000");
        let a = decide(&r, &s, TimeMs::new(DAY), &policy());
        let b = decide(&r, &s, TimeMs::new(DAY), &policy());
        assert_eq!(a, b);
    }

    #[test]
    fn test_repeated_increases_never_exceed_ceiling() {
        let mut r = record("24.99");
        let mut now = TimeMs::new(0);
        for _ in 0..50 {
            let decision = decide(&r, &signal("3200", "3000"), now, &policy()).unwrap();
            let next = decision.apply_to(&r);
            assert!(next.current_price <= next.max_price);
            assert!(next.next_price_change > r.next_price_change);
            now = next.next_price_change;
            r = next;
        }
        assert_eq!(r.current_price, d("49.98"));
    }

    #[test]
    fn test_reverts_never_drop_below_starting_price() {
        let mut r = record("24.99");
        let mut now = TimeMs::new(0);
        let signals = [
            signal("3200", "3000"),
            signal("3300", "3200"),
            signal("100", "3300"),
            signal("3300", "3200"),
            signal("3300", "3300"),
            signal("10", "3300"),
            signal("5", "3300"),
        ];
        for s in signals.iter().cycle().take(40) {
            let decision = decide(&r, s, now, &policy()).unwrap();
            let next = decision.apply_to(&r);
            assert!(next.current_price >= next.starting_price);
            assert!(next.current_price <= next.max_price);
            now = next.next_price_change.max(next.revert_wait_until.unwrap_or(now));
            r = next;
        }
    }
}

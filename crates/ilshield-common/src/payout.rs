//! Payout Calculator
//!
//! Pure impermanent-loss payout formula:
//!
//! ```text
//! hodl   = x0·p + y0
//! lp     = x1·p + y1 + fees
//! IL     = max(0, hodl − lp)
//! payout = min(IL − IL·deductible_bps/10000, hodl·cap_bps/10000)
//! ```
//!
//! Prices are fixed point with [`PRICE_SCALE`]. Subtractions clamp at zero, divisions
//! floor, and any multiplication overflow is an error so callers fail closed.

use crate::error::PayoutError;
use crate::types::position::PositionSnapshot;
use crate::types::Amount;
use crate::{BPS_DENOMINATOR, PRICE_SCALE};
use serde::{Deserialize, Serialize};

/// Deductible and cap applied to a loss
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutTerms {
    pub deductible_bps: u16,
    pub cap_bps: u16,
}

impl PayoutTerms {
    pub fn new(deductible_bps: u16, cap_bps: u16) -> Result<Self, PayoutError> {
        let terms = Self {
            deductible_bps,
            cap_bps,
        };
        terms.validate()?;
        Ok(terms)
    }

    pub fn validate(&self) -> Result<(), PayoutError> {
        for bps in [self.deductible_bps, self.cap_bps] {
            if u128::from(bps) > BPS_DENOMINATOR {
                return Err(PayoutError::BasisPointsOutOfRange(bps));
            }
        }
        Ok(())
    }
}

/// Every intermediate value of the payout formula
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutBreakdown {
    pub hodl_value: Amount,
    pub lp_value: Amount,
    pub impermanent_loss: Amount,
    pub deductible_amount: Amount,
    pub payout_before_cap: Amount,
    pub cap_amount: Amount,
    pub payout: Amount,
}

impl PayoutBreakdown {
    /// Canonical little-endian encoding used in audit hashes
    pub fn canonical_bytes(&self) -> [u8; 112] {
        let mut out = [0u8; 112];
        let fields = [
            self.hodl_value,
            self.lp_value,
            self.impermanent_loss,
            self.deductible_amount,
            self.payout_before_cap,
            self.cap_amount,
            self.payout,
        ];
        for (i, field) in fields.iter().enumerate() {
            out[i * 16..(i + 1) * 16].copy_from_slice(&field.to_le_bytes());
        }
        out
    }
}

/// `amount · price / PRICE_SCALE`, failing on overflow
#[inline]
fn price_mul(amount: Amount, price: u128) -> Result<Amount, PayoutError> {
    amount
        .checked_mul(price)
        .map(|v| v / PRICE_SCALE)
        .ok_or(PayoutError::Overflow)
}

/// `amount · bps / 10000`, failing on overflow
#[inline]
fn bps_mul(amount: Amount, bps: u16) -> Result<Amount, PayoutError> {
    amount
        .checked_mul(u128::from(bps))
        .map(|v| v / BPS_DENOMINATOR)
        .ok_or(PayoutError::Overflow)
}

/// Value of the entry position had it simply been held
pub fn hodl_value(x0: Amount, y0: Amount, price_at_exit: u128) -> Result<Amount, PayoutError> {
    price_mul(x0, price_at_exit)?
        .checked_add(y0)
        .ok_or(PayoutError::Overflow)
}

/// Value of the withdrawn LP position including earned fees
pub fn lp_value(
    x1: Amount,
    y1: Amount,
    fees_earned: Amount,
    price_at_exit: u128,
) -> Result<Amount, PayoutError> {
    price_mul(x1, price_at_exit)?
        .checked_add(y1)
        .and_then(|v| v.checked_add(fees_earned))
        .ok_or(PayoutError::Overflow)
}

/// Apply deductible and cap to already valued positions
pub fn payout_from_values(
    hodl: Amount,
    lp: Amount,
    terms: PayoutTerms,
) -> Result<PayoutBreakdown, PayoutError> {
    terms.validate()?;

    let impermanent_loss = hodl.saturating_sub(lp);
    let deductible_amount = bps_mul(impermanent_loss, terms.deductible_bps)?;
    let payout_before_cap = impermanent_loss.saturating_sub(deductible_amount);
    let cap_amount = bps_mul(hodl, terms.cap_bps)?;
    let payout = payout_before_cap.min(cap_amount);

    Ok(PayoutBreakdown {
        hodl_value: hodl,
        lp_value: lp,
        impermanent_loss,
        deductible_amount,
        payout_before_cap,
        cap_amount,
        payout,
    })
}

/// Full payout for an entry/exit position pair at the exit price
pub fn compute_payout(
    entry: &PositionSnapshot,
    exit: &PositionSnapshot,
    price_at_exit: u128,
    terms: PayoutTerms,
) -> Result<PayoutBreakdown, PayoutError> {
    let hodl = hodl_value(entry.amount_x, entry.amount_y, price_at_exit)?;
    let lp = lp_value(
        exit.amount_x,
        exit.amount_y,
        exit.fees_earned,
        price_at_exit,
    )?;
    payout_from_values(hodl, lp, terms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn terms(deductible_bps: u16, cap_bps: u16) -> PayoutTerms {
        PayoutTerms::new(deductible_bps, cap_bps).unwrap()
    }

    #[test]
    fn test_reference_scenario() {
        let b = payout_from_values(1000, 700, terms(1000, 5000)).unwrap();
        assert_eq!(b.impermanent_loss, 300);
        assert_eq!(b.deductible_amount, 30);
        assert_eq!(b.payout_before_cap, 270);
        assert_eq!(b.cap_amount, 500);
        assert_eq!(b.payout, 270);
    }

    #[test]
    fn test_no_loss_pays_nothing() {
        let b = payout_from_values(1000, 1000, terms(1000, 5000)).unwrap();
        assert_eq!(b.impermanent_loss, 0);
        assert_eq!(b.payout, 0);

        // LP out-earning hodl clamps instead of erroring
        let b = payout_from_values(1000, 1200, terms(1000, 5000)).unwrap();
        assert_eq!(b.impermanent_loss, 0);
    }

    #[test]
    fn test_cap_binds() {
        let b = payout_from_values(1000, 100, terms(0, 2000)).unwrap();
        assert_eq!(b.payout_before_cap, 900);
        assert_eq!(b.cap_amount, 200);
        assert_eq!(b.payout, 200);
    }

    #[test]
    fn test_division_floors() {
        // 333 * 1000 / 10000 = 33.3 -> 33
        let b = payout_from_values(1000, 667, terms(1000, 10_000)).unwrap();
        assert_eq!(b.deductible_amount, 33);
        assert_eq!(b.payout, 300);
    }

    #[test]
    fn test_positions_at_scaled_price() {
        let price = 2 * PRICE_SCALE;
        let entry = PositionSnapshot::new(250, 500, 0);
        let exit = PositionSnapshot::new(100, 500, 0);
        let b = compute_payout(&entry, &exit, price, terms(1000, 5000)).unwrap();
        assert_eq!(b.hodl_value, 1000);
        assert_eq!(b.lp_value, 700);
        assert_eq!(b.payout, 270);
    }

    #[test]
    fn test_fees_offset_loss() {
        let entry = PositionSnapshot::new(0, 1000, 0);
        let exit = PositionSnapshot::new(0, 700, 300);
        let b = compute_payout(&entry, &exit, PRICE_SCALE, terms(1000, 5000)).unwrap();
        assert_eq!(b.impermanent_loss, 0);
    }

    #[test]
    fn test_overflow_fails_closed() {
        let entry = PositionSnapshot::new(u128::MAX, 0, 0);
        let exit = PositionSnapshot::new(0, 0, 0);
        let result = compute_payout(&entry, &exit, 2 * PRICE_SCALE, terms(0, 10_000));
        assert_eq!(result, Err(PayoutError::Overflow));
    }

    #[test]
    fn test_terms_out_of_range() {
        assert_eq!(
            PayoutTerms::new(10_001, 0),
            Err(PayoutError::BasisPointsOutOfRange(10_001))
        );
        assert!(PayoutTerms::new(10_000, 10_000).is_ok());
    }

    proptest! {
        #[test]
        fn prop_payout_bounded(
            hodl in 0u128..1_000_000_000_000_000_000_000u128,
            lp in 0u128..1_000_000_000_000_000_000_000u128,
            deductible in 0u16..=10_000,
            cap in 0u16..=10_000,
        ) {
            let b = payout_from_values(hodl, lp, PayoutTerms { deductible_bps: deductible, cap_bps: cap }).unwrap();
            prop_assert!(b.payout <= b.impermanent_loss);
            prop_assert!(b.payout <= b.cap_amount);
            prop_assert!(b.impermanent_loss <= hodl);
            prop_assert_eq!(b.impermanent_loss, hodl.saturating_sub(lp));
        }
    }
}

//! Price reference sanity checks
//!
//! A claim is only computed against a price that is positive, recent, and not from the
//! future, cited from a trusted feed when trusted feeds are configured. Observations
//! recorded from the feed form a per-pair series; a claimed price must sit within the
//! deviation limit of the nearest recorded observation.

use crate::config::PriceFeedSettings;
use dashmap::DashMap;
use ilshield_common::{error::ComputeError, PriceReference, BPS_DENOMINATOR};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// One observation in a price series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub price: u128,
    pub observed_at: i64,
}

/// Result of checking a price series
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesValidation {
    pub valid: bool,
    /// Prices after the first whose step from their predecessor is within the threshold
    pub accepted: Vec<u128>,
}

impl From<&PriceReference> for PricePoint {
    fn from(reference: &PriceReference) -> Self {
        Self {
            price: reference.price,
            observed_at: reference.observed_at,
        }
    }
}

/// Validates price references against staleness and deviation limits
#[derive(Debug)]
pub struct PriceFeedValidator {
    settings: PriceFeedSettings,
    /// Recent feed observations per pair, oldest first
    observations: DashMap<String, VecDeque<PricePoint>>,
}

impl PriceFeedValidator {
    pub fn new(settings: PriceFeedSettings) -> Self {
        Self {
            settings,
            observations: DashMap::new(),
        }
    }

    pub fn is_trusted(&self, source: &str) -> bool {
        self.settings.trusted_sources.is_empty()
            || self.settings.trusted_sources.iter().any(|s| s == source)
    }

    /// Append a feed observation to its pair's series
    ///
    /// Observations must come from a trusted source and advance the series in time.
    pub fn record_observation(&self, reference: &PriceReference) -> Result<(), ComputeError> {
        if reference.price == 0 {
            return Err(ComputeError::InvalidPriceReference("price is zero".into()));
        }
        self.check_source(reference)?;

        let mut series = self.observations.entry(reference.pair.clone()).or_default();
        if let Some(last) = series.back() {
            if reference.observed_at <= last.observed_at {
                return Err(ComputeError::InvalidPriceReference(format!(
                    "observation at {} does not advance {} past {}",
                    reference.observed_at, reference.pair, last.observed_at
                )));
            }
        }
        series.push_back(PricePoint::from(reference));
        while series.len() > self.settings.series_window.max(1) {
            series.pop_front();
        }
        debug!(pair = %reference.pair, price = %reference.price, "Price observation recorded");
        Ok(())
    }

    /// Recorded observations for `pair`, oldest first
    pub fn observations(&self, pair: &str) -> Vec<PricePoint> {
        self.observations
            .get(pair)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Check a single reference at time `now_ms`
    pub fn validate_reference(&self, reference: &PriceReference, now_ms: i64) -> Result<(), ComputeError> {
        if reference.price == 0 {
            return Err(ComputeError::InvalidPriceReference("price is zero".into()));
        }
        if reference.observed_at > now_ms {
            return Err(ComputeError::InvalidPriceReference(format!(
                "observation at {} is in the future",
                reference.observed_at
            )));
        }
        let age = now_ms.saturating_sub(reference.observed_at);
        if age > self.settings.max_staleness_ms {
            return Err(ComputeError::InvalidPriceReference(format!(
                "observation is {}ms old, limit {}ms",
                age, self.settings.max_staleness_ms
            )));
        }
        self.check_source(reference)?;
        self.check_against_series(reference)
    }

    /// Check a series with the configured deviation limit
    pub fn validate_series(&self, points: &[PricePoint]) -> SeriesValidation {
        validate_series(points, self.settings.max_deviation_bps)
    }

    fn check_source(&self, reference: &PriceReference) -> Result<(), ComputeError> {
        if self.is_trusted(&reference.source) {
            return Ok(());
        }
        Err(ComputeError::InvalidPriceReference(format!(
            "source {:?} is not a trusted feed",
            reference.source
        )))
    }

    /// Step from the nearest recorded observation must stay within the deviation limit
    fn check_against_series(&self, reference: &PriceReference) -> Result<(), ComputeError> {
        let series = match self.observations.get(&reference.pair) {
            Some(series) => series,
            None => return Ok(()),
        };
        let claimed = PricePoint::from(reference);

        let steps = match series.iter().rev().find(|p| p.observed_at <= claimed.observed_at) {
            Some(anchor) if anchor.observed_at == claimed.observed_at => {
                if anchor.price == claimed.price {
                    return Ok(());
                }
                return Err(ComputeError::InvalidPriceReference(format!(
                    "price {} disagrees with recorded observation {} at {}",
                    claimed.price, anchor.price, anchor.observed_at
                )));
            }
            Some(anchor) => [*anchor, claimed],
            None => match series.front() {
                Some(first) => [claimed, *first],
                None => return Ok(()),
            },
        };

        if self.validate_series(&steps).valid {
            Ok(())
        } else {
            Err(ComputeError::InvalidPriceReference(format!(
                "price {} deviates more than {} bps from the recorded {} series",
                claimed.price, self.settings.max_deviation_bps, reference.pair
            )))
        }
    }
}

/// Check ordering and step deviation of a price series
///
/// The series is invalid if it is empty, if timestamps are not strictly increasing, if
/// any predecessor price is zero, or if any step deviates by more than
/// `max_deviation_bps`. Out-of-threshold steps are left out of `accepted`.
pub fn validate_series(points: &[PricePoint], max_deviation_bps: u16) -> SeriesValidation {
    if points.is_empty() {
        return SeriesValidation {
            valid: false,
            accepted: Vec::new(),
        };
    }

    let mut valid = true;
    let mut accepted = Vec::with_capacity(points.len());

    for pair in points.windows(2) {
        let (prev, curr) = (pair[0], pair[1]);

        if curr.observed_at <= prev.observed_at {
            valid = false;
        }

        if prev.price == 0 {
            valid = false;
            continue;
        }

        let diff = prev.price.abs_diff(curr.price);
        let deviation = diff
            .checked_mul(BPS_DENOMINATOR)
            .map(|v| v / prev.price)
            .unwrap_or(u128::MAX);

        if deviation > u128::from(max_deviation_bps) {
            valid = false;
        } else {
            accepted.push(curr.price);
        }
    }

    SeriesValidation { valid, accepted }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> PriceFeedValidator {
        PriceFeedValidator::new(PriceFeedSettings {
            max_staleness_ms: 1_000,
            max_deviation_bps: 500,
            ..PriceFeedSettings::default()
        })
    }

    fn trusting(sources: &[&str]) -> PriceFeedValidator {
        PriceFeedValidator::new(PriceFeedSettings {
            max_staleness_ms: 1_000,
            max_deviation_bps: 500,
            trusted_sources: sources.iter().map(|s| s.to_string()).collect(),
            series_window: 3,
        })
    }

    fn reference(price: u128, observed_at: i64) -> PriceReference {
        PriceReference {
            pair: "ETH/USDC".into(),
            price,
            observed_at,
            source: "test".into(),
        }
    }

    fn from_source(price: u128, observed_at: i64, source: &str) -> PriceReference {
        PriceReference {
            source: source.into(),
            ..reference(price, observed_at)
        }
    }

    fn pt(price: u128, observed_at: i64) -> PricePoint {
        PricePoint { price, observed_at }
    }

    #[test]
    fn test_reference_checks() {
        let v = validator();
        assert!(v.validate_reference(&reference(100, 9_500), 10_000).is_ok());
        assert!(v.validate_reference(&reference(0, 9_500), 10_000).is_err());
        assert!(v.validate_reference(&reference(100, 8_000), 10_000).is_err());
        assert!(v.validate_reference(&reference(100, 10_001), 10_000).is_err());
    }

    #[test]
    fn test_untrusted_source_refused() {
        let v = trusting(&["twap"]);
        assert!(v.validate_reference(&from_source(100, 9_500, "twap"), 10_000).is_ok());
        assert!(matches!(
            v.validate_reference(&from_source(100, 9_500, "self-reported"), 10_000),
            Err(ComputeError::InvalidPriceReference(_))
        ));
        assert!(v.record_observation(&from_source(100, 9_000, "self-reported")).is_err());
        assert!(v.observations("ETH/USDC").is_empty());

        // No configured feeds accepts any source
        assert!(validator()
            .validate_reference(&from_source(100, 9_500, "anything"), 10_000)
            .is_ok());
    }

    #[test]
    fn test_claimed_price_checked_against_recorded_series() {
        let v = trusting(&["twap"]);
        v.record_observation(&from_source(1_000, 9_200, "twap")).unwrap();
        v.record_observation(&from_source(1_020, 9_400, "twap")).unwrap();

        // Within 500 bps of the 9_400 observation
        assert!(v.validate_reference(&from_source(1_060, 9_500, "twap"), 10_000).is_ok());
        // A 50% spike over the last recorded price
        assert!(matches!(
            v.validate_reference(&from_source(1_530, 9_500, "twap"), 10_000),
            Err(ComputeError::InvalidPriceReference(_))
        ));
        // Same timestamp as a recorded observation must agree exactly
        assert!(v.validate_reference(&from_source(1_020, 9_400, "twap"), 10_000).is_ok());
        assert!(v.validate_reference(&from_source(1_021, 9_400, "twap"), 10_000).is_err());
        // Older than every recorded point is compared with the earliest
        assert!(v.validate_reference(&from_source(1_000, 9_100, "twap"), 10_000).is_ok());
        assert!(v.validate_reference(&from_source(700, 9_100, "twap"), 10_000).is_err());
        // Other pairs have no series yet
        let other = PriceReference {
            pair: "BTC/USDC".into(),
            ..from_source(9_999_999, 9_500, "twap")
        };
        assert!(v.validate_reference(&other, 10_000).is_ok());
    }

    #[test]
    fn test_observations_advance_and_roll() {
        let v = trusting(&["twap"]);
        for (i, price) in [1_000u128, 1_010, 1_020, 1_030].iter().enumerate() {
            v.record_observation(&from_source(*price, 1 + i as i64, "twap")).unwrap();
        }
        assert!(v.record_observation(&from_source(1_030, 4, "twap")).is_err());
        assert!(v.record_observation(&from_source(0, 5, "twap")).is_err());

        let kept: Vec<u128> = v.observations("ETH/USDC").iter().map(|p| p.price).collect();
        assert_eq!(kept, vec![1_010, 1_020, 1_030]);
    }

    #[test]
    fn test_series_within_threshold() {
        let result = validator().validate_series(&[pt(1_000, 1), pt(1_040, 2), pt(1_000, 3)]);
        assert!(result.valid);
        assert_eq!(result.accepted, vec![1_040, 1_000]);
    }

    #[test]
    fn test_series_spike_dropped() {
        // 1000 -> 1100 is a 1000 bps jump
        let result = validator().validate_series(&[pt(1_000, 1), pt(1_100, 2), pt(1_120, 3)]);
        assert!(!result.valid);
        assert_eq!(result.accepted, vec![1_120]);
    }

    #[test]
    fn test_series_ordering_and_zero() {
        assert!(!validator().validate_series(&[pt(1_000, 2), pt(1_000, 2)]).valid);

        let zero = validator().validate_series(&[pt(0, 1), pt(1_000, 2)]);
        assert!(!zero.valid);
        assert!(zero.accepted.is_empty());

        assert!(!validator().validate_series(&[]).valid);
        assert!(validator().validate_series(&[pt(5, 1)]).valid);
    }
}

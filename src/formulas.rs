//! Exercise math library
//!
//! Pure, deterministic helpers shared by the session prescriber, the context
//! aggregator and the periodization planner. Values shown to users are
//! rounded through `rust_decimal` so that `112.5` stays `112.5` and
//! half-way cases round away from zero.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Default smallest loadable weight step (kg)
pub const DEFAULT_INCREMENT_KG: f64 = 2.5;

/// Brzycki is only used up to this many reps; its denominator vanishes at 37
const BRZYCKI_MAX_REPS: u32 = 36;

/// Relative slope (per period, against the mean) below which a trend is flat
const STABLE_TREND_THRESHOLD: f64 = 0.01;

/// Maximum improvement (%) across a series that still counts as a plateau
const PLATEAU_MAX_GAIN_PCT: f64 = 1.0;

/// Round to a fixed number of decimal places, half away from zero.
///
/// Non-finite values are returned unchanged.
pub fn round_to_places(value: f64, places: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    Decimal::from_f64(value)
        .map(|d| d.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}

fn round2(value: f64) -> f64 {
    round_to_places(value, 2)
}

/// Estimate a one-rep max from a performed set.
///
/// * `reps == 1` returns the weight itself
/// * `1 < reps <= 36` uses Brzycki: `w × 36 / (37 − r)`
/// * anything else falls back to Epley: `w × (1 + r / 30)`
///
/// Returns 0 for non-positive weight or zero reps.
pub fn estimate_one_rep_max(weight: f64, reps: u32) -> f64 {
    if !weight.is_finite() || weight <= 0.0 || reps == 0 {
        return 0.0;
    }
    if reps == 1 {
        return weight;
    }

    let r = reps as f64;
    if reps <= BRZYCKI_MAX_REPS {
        let brzycki = weight * 36.0 / (37.0 - r);
        if brzycki.is_finite() && brzycki > 0.0 {
            return round2(brzycki);
        }
    }

    round2(weight * (1.0 + r / 30.0))
}

/// sets × reps × weight, with any missing factor counted as zero
pub fn volume_load(sets: Option<u32>, reps: Option<u32>, weight: Option<f64>) -> f64 {
    let sets = sets.unwrap_or(0) as f64;
    let reps = reps.unwrap_or(0) as f64;
    let weight = weight.filter(|w| w.is_finite()).unwrap_or(0.0).max(0.0);
    round2(sets * reps * weight)
}

/// Ordinary least-squares slope of `y` over `x`.
///
/// Returns 0 with fewer than two points or a degenerate denominator.
pub fn trend_slope(points: &[(f64, f64)]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    let n = points.len() as f64;
    let (sum_x, sum_y, sum_xy, sum_xx) = points.iter().fold(
        (0.0, 0.0, 0.0, 0.0),
        |(sx, sy, sxy, sxx), (x, y)| (sx + x, sy + y, sxy + x * y, sxx + x * x),
    );

    let slope = (n * sum_xy - sum_x * sum_y) / (n * sum_xx - sum_x * sum_x);
    if slope.is_finite() {
        slope
    } else {
        0.0
    }
}

/// Consistency of a series as `100 − 100 × coefficient of variation`, in 0..=100
pub fn consistency_score(values: &[f64]) -> u8 {
    if values.len() < 2 {
        return 100;
    }

    let mean = values.iter().mean();
    if mean == 0.0 || !mean.is_finite() {
        return 100;
    }

    let std_dev = values.iter().population_std_dev();
    let score = 100.0 - 100.0 * (std_dev / mean);
    if !score.is_finite() {
        return 0;
    }
    score.round().clamp(0.0, 100.0) as u8
}

/// Percentage change from `previous` to `current`.
///
/// With `previous == 0` the change is 100 if `current` is positive, else 0.
pub fn percentage_change(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        return if current > 0.0 { 100.0 } else { 0.0 };
    }
    round2((current - previous) / previous * 100.0)
}

/// Snap a load to the nearest multiple of `increment`.
///
/// Non-positive or non-finite increments fall back to 2.5 kg; the result is
/// never negative.
pub fn round_to_increment(value: f64, increment: f64) -> f64 {
    let increment = if increment.is_finite() && increment > 0.0 {
        increment
    } else {
        DEFAULT_INCREMENT_KG
    };
    if !value.is_finite() || value <= 0.0 {
        return 0.0;
    }
    (value / increment).round() * increment
}

/// Metric a personal record is judged on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrMetric {
    Weight,
    Volume,
    OneRm,
}

/// A performance to compare for PR detection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SetPerformance {
    pub weight: f64,
    pub reps: u32,
    pub sets: u32,
}

impl SetPerformance {
    pub fn metric(&self, kind: PrMetric) -> f64 {
        match kind {
            PrMetric::Weight => self.weight,
            PrMetric::Volume => volume_load(Some(self.sets), Some(self.reps), Some(self.weight)),
            PrMetric::OneRm => estimate_one_rep_max(self.weight, self.reps),
        }
    }
}

/// Strictly better than the best so far on the chosen metric.
///
/// A missing best counts as zero.
pub fn is_personal_record(current: &SetPerformance, best: Option<&SetPerformance>, kind: PrMetric) -> bool {
    let best_value = best.map_or(0.0, |b| b.metric(kind));
    current.metric(kind) > best_value
}

/// Direction of a trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Stable,
    Decreasing,
}

/// Classify a slope relative to the series mean (±1% per period is stable)
pub fn trend_direction(slope: f64, mean: f64) -> TrendDirection {
    let relative = slope / mean.abs().max(1.0);
    if relative > STABLE_TREND_THRESHOLD {
        TrendDirection::Increasing
    } else if relative < -STABLE_TREND_THRESHOLD {
        TrendDirection::Decreasing
    } else {
        TrendDirection::Stable
    }
}

/// True when a series (oldest first) has at least two points and the newest
/// value improved on the oldest by 1% or less.
pub fn detect_plateau(series: &[f64]) -> bool {
    if series.len() < 2 {
        return false;
    }
    let first = series[0];
    let last = series[series.len() - 1];
    if !first.is_finite() || !last.is_finite() || first <= 0.0 {
        return false;
    }
    percentage_change(last, first) <= PLATEAU_MAX_GAIN_PCT
}

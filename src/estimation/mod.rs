//! Completion-time estimation from past session observations.
//!
//! The estimator is a pure function over recorded observations. It never
//! mutates anything, so calling it twice with the same inputs always
//! produces the same estimate.

use serde::Serialize;

/// A single recorded unit of evidence: one session against a material.
///
/// `partial` marks sessions that ended without completing their planned
/// work (abandoned sessions). Partial observations inform the spread of
/// the estimate but not its central value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub duration_seconds: f64,
    pub size_units: f64,
    pub partial: bool,
}

/// Tuning knobs for the estimator. Defaults match the service defaults;
/// the config layer can override them per deployment.
#[derive(Debug, Clone, Copy)]
pub struct EstimationPolicy {
    /// Fallback pace when no completed observations exist yet.
    pub default_seconds_per_unit: f64,
    /// Observations beyond `k * IQR` from the quartiles are down-weighted.
    pub outlier_iqr_multiplier: f64,
    /// Weight of a down-weighted outlier in the central estimate.
    pub outlier_weight: f64,
    /// Weight of a partial observation in the central estimate.
    pub partial_weight: f64,
}

impl Default for EstimationPolicy {
    fn default() -> Self {
        Self {
            default_seconds_per_unit: 60.0,
            outlier_iqr_multiplier: 1.5,
            outlier_weight: 0.25,
            partial_weight: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Estimate {
    pub point_seconds: f64,
    pub band_low_seconds: f64,
    pub band_high_seconds: f64,
    pub rate_seconds_per_unit: f64,
    pub confidence: f64,
    pub confidence_level: ConfidenceLevel,
    pub low_confidence: bool,
    pub sample_count: usize,
    pub completed_count: usize,
    pub formatted: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
    VeryLow,
}

impl ConfidenceLevel {
    fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Self::High
        } else if score >= 0.6 {
            Self::Medium
        } else if score >= 0.4 {
            Self::Low
        } else {
            Self::VeryLow
        }
    }
}

/// Estimate the time to get through `size_units` of work, given the
/// observations recorded so far.
pub fn estimate(size_units: f64, observations: &[Observation], policy: &EstimationPolicy) -> Estimate {
    let size = size_units.max(0.0);

    // Per-unit pace of every usable observation. Zero-size or zero-length
    // sessions carry no pace information and are skipped outright.
    let mut all_rates: Vec<f64> = Vec::new();
    let mut completed_rates: Vec<f64> = Vec::new();
    for obs in observations {
        if obs.size_units <= 0.0 || obs.duration_seconds <= 0.0 {
            continue;
        }
        let rate = obs.duration_seconds / obs.size_units;
        all_rates.push(rate);
        if !obs.partial {
            completed_rates.push(rate);
        }
    }

    let sample_count = all_rates.len();
    let completed_count = completed_rates.len();

    if completed_count == 0 {
        // Nothing completed yet: fall back to the default pace and say so.
        let rate = policy.default_seconds_per_unit;
        let point = rate * size;
        return Estimate {
            point_seconds: point,
            band_low_seconds: point * 0.5,
            band_high_seconds: point * 2.0,
            rate_seconds_per_unit: rate,
            confidence: 0.0,
            confidence_level: ConfidenceLevel::VeryLow,
            low_confidence: true,
            sample_count,
            completed_count,
            formatted: format_duration(point),
        };
    }

    completed_rates.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    all_rates.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    // Tukey fences over the completed paces decide which observations get
    // down-weighted rather than discarded.
    let completed_q1 = quantile(&completed_rates, 0.25);
    let completed_q3 = quantile(&completed_rates, 0.75);
    let iqr = completed_q3 - completed_q1;
    let fence_low = completed_q1 - policy.outlier_iqr_multiplier * iqr;
    let fence_high = completed_q3 + policy.outlier_iqr_multiplier * iqr;

    let mut weighted: Vec<(f64, f64)> = Vec::with_capacity(sample_count);
    for obs in observations {
        if obs.size_units <= 0.0 || obs.duration_seconds <= 0.0 {
            continue;
        }
        let rate = obs.duration_seconds / obs.size_units;
        let weight = if obs.partial {
            policy.partial_weight
        } else if rate < fence_low || rate > fence_high {
            policy.outlier_weight
        } else {
            1.0
        };
        weighted.push((rate, weight));
    }

    let rate = weighted_median(&weighted).unwrap_or(policy.default_seconds_per_unit);
    let point = rate * size;

    // The band tracks the spread of everything observed, partials included,
    // then widens as needed so it always brackets the point.
    let band_q1 = quantile(&all_rates, 0.25);
    let band_q3 = quantile(&all_rates, 0.75);
    let band_low = (band_q1 * size).min(point);
    let band_high = (band_q3 * size).max(point);

    // Confidence grows with completed samples and shrinks with spread:
    // up to 0.5 from sample count, up to 0.5 from tightness of the paces.
    let sample_term = 0.1 * (completed_count.min(5) as f64);
    let median_all = quantile(&all_rates, 0.5);
    let relative_spread = if median_all > 0.0 {
        ((band_q3 - band_q1) / median_all).min(1.0)
    } else {
        1.0
    };
    let dispersion_term = 0.5 * (1.0 - relative_spread);
    let confidence = (sample_term + dispersion_term).clamp(0.0, 1.0);

    Estimate {
        point_seconds: point,
        band_low_seconds: band_low,
        band_high_seconds: band_high,
        rate_seconds_per_unit: rate,
        confidence,
        confidence_level: ConfidenceLevel::from_score(confidence),
        low_confidence: false,
        sample_count,
        completed_count,
        formatted: format_duration(point),
    }
}

/// Linear-interpolated quantile over an ascending-sorted slice.
fn quantile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let pos = p.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            if lo == hi {
                sorted[lo]
            } else {
                let frac = pos - lo as f64;
                sorted[lo] * (1.0 - frac) + sorted[hi] * frac
            }
        }
    }
}

/// Weighted median of `(value, weight)` pairs. Returns `None` when the
/// total weight is zero.
fn weighted_median(pairs: &[(f64, f64)]) -> Option<f64> {
    let total: f64 = pairs.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return None;
    }
    let mut sorted: Vec<(f64, f64)> = pairs.iter().copied().filter(|(_, w)| *w > 0.0).collect();
    sorted.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let half = total / 2.0;
    let mut acc = 0.0;
    for (i, (value, weight)) in sorted.iter().enumerate() {
        acc += weight;
        if acc > half {
            return Some(*value);
        }
        if (acc - half).abs() < f64::EPSILON {
            // Cumulative weight lands exactly on the midpoint: average with
            // the next value, as the unweighted even-count median would.
            if let Some((next, _)) = sorted.get(i + 1) {
                return Some((value + next) / 2.0);
            }
            return Some(*value);
        }
    }
    sorted.last().map(|(v, _)| *v)
}

/// Human-readable duration, e.g. "2h 5m", "45m", "<1m".
pub fn format_duration(seconds: f64) -> String {
    let total_minutes = (seconds.max(0.0) / 60.0).round() as u64;
    if total_minutes == 0 {
        return "<1m".to_string();
    }
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;
    if hours == 0 {
        format!("{minutes}m")
    } else if minutes == 0 {
        format!("{hours}h")
    } else {
        format!("{hours}h {minutes}m")
    }
}

//! Numeric auto-banding
//!
//! Distinct values are walked in risk order (ascending when high values are
//! riskier, descending otherwise). Each target segment takes a contiguous
//! run of values starting where the previous band stopped, and the band's
//! own rate (its numerator over its denominator) has to stay under the
//! segment's cap. A band is grown in rounds:
//!
//! 1. forward pass: extend to the furthest position, up to the current
//!    limit, at which the band rate is still under the cap;
//! 2. backward pass: trim from the right back past the last position at
//!    which the running band rate reached the cap, so a band never relies
//!    on a tail of safe values to dilute a risky one. The trimmed end
//!    becomes the limit for the next forward pass.
//!
//! Rounds repeat until the backward pass leaves the band untouched or the
//! iteration limit is hit. The last target absorbs whatever is left.

use super::{rate, BandTarget, RateStats};

/// Interval `(lower, upper]` assigned to one segment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumericBand {
    pub segment: usize,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumericBandOptions {
    pub high_value_high_risk: bool,
    /// Lower bound of the first interval; defaults to the minimum value minus one
    pub floor: Option<f64>,
    /// Upper bound of the last interval; defaults to the maximum value
    pub ceiling: Option<f64>,
    pub max_iterations: usize,
}

impl Default for NumericBandOptions {
    fn default() -> Self {
        Self {
            high_value_high_risk: true,
            floor: None,
            ceiling: None,
            max_iterations: 100,
        }
    }
}

/// Prefix sums over the risk-ordered values
struct Cumulative {
    numerator: Vec<f64>,
    denominator: Vec<f64>,
}

impl Cumulative {
    fn new(stats: &[&RateStats<f64>]) -> Self {
        let mut numerator = Vec::with_capacity(stats.len() + 1);
        let mut denominator = Vec::with_capacity(stats.len() + 1);
        numerator.push(0.0);
        denominator.push(0.0);
        for s in stats {
            numerator.push(numerator[numerator.len() - 1] + s.numerator);
            denominator.push(denominator[denominator.len() - 1] + s.denominator);
        }
        Self {
            numerator,
            denominator,
        }
    }

    /// Rate of positions `start..=end`
    fn rate(&self, start: usize, end: usize) -> f64 {
        rate(
            self.numerator[end + 1] - self.numerator[start],
            self.denominator[end + 1] - self.denominator[start],
        )
    }
}

/// Furthest end in `start..=limit` whose band rate is under `cap`
fn forward_pass(cum: &Cumulative, start: usize, limit: usize, cap: f64) -> Option<usize> {
    (start..=limit).rev().find(|&end| cum.rate(start, end) < cap)
}

/// Trim `start..=end` back past the last position where the running rate
/// reaches `cap`; `None` when even the first value does.
fn backward_pass(cum: &Cumulative, start: usize, end: usize, cap: f64) -> Option<usize> {
    match (start..=end).rev().find(|&k| cum.rate(start, k) >= cap) {
        Some(breach) => breach.checked_sub(1).filter(|&k| k >= start),
        None => Some(end),
    }
}

/// End position of the band starting at `start`, or `None` when no prefix fits
fn select_band(
    cum: &Cumulative,
    start: usize,
    len: usize,
    cap: f64,
    max_iterations: usize,
) -> Option<usize> {
    let mut limit = len - 1;
    let mut rounds = 0;
    loop {
        rounds += 1;
        let forward = forward_pass(cum, start, limit, cap)?;
        match backward_pass(cum, start, forward, cap)? {
            trimmed if trimmed == forward => {
                log::trace!("Band {}..={} settled after {} round(s)", start, forward, rounds);
                return Some(forward);
            }
            _ if rounds >= max_iterations => return Some(forward),
            trimmed => limit = trimmed,
        }
    }
}

/// Band the distinct values in `stats` (sorted ascending by value) against
/// the ordered `targets`.
///
/// Bands come back in target order. Targets whose band would be empty are
/// skipped; together the bands cover `(floor, ceiling]`.
pub fn create_auto_numeric_bands(
    stats: &[RateStats<f64>],
    targets: &[BandTarget],
    options: &NumericBandOptions,
) -> Vec<NumericBand> {
    if stats.is_empty() || targets.is_empty() {
        return Vec::new();
    }

    let ordered: Vec<&RateStats<f64>> = if options.high_value_high_risk {
        stats.iter().collect()
    } else {
        stats.iter().rev().collect()
    };
    let len = ordered.len();
    let cum = Cumulative::new(&ordered);

    let mut spans: Vec<(usize, usize, usize)> = Vec::new();
    let mut start = 0;
    for (i, target) in targets.iter().enumerate() {
        if start >= len {
            break;
        }
        let end = if i + 1 == targets.len() {
            Some(len - 1)
        } else {
            select_band(&cum, start, len, target.cap, options.max_iterations)
        };
        if let Some(end) = end {
            spans.push((target.segment, start, end));
            start = end + 1;
        }
    }

    let min = stats[0].key;
    let max = stats[len - 1].key;
    let floor = options.floor.unwrap_or(min - 1.0);
    let ceiling = options.ceiling.unwrap_or(max);

    spans
        .into_iter()
        .map(|(segment, start, end)| {
            let (lower, upper) = if options.high_value_high_risk {
                let lower = if start == 0 { floor } else { ordered[start - 1].key };
                let upper = if end == len - 1 { ceiling } else { ordered[end].key };
                (lower, upper)
            } else {
                let lower = if end == len - 1 { floor } else { ordered[end + 1].key };
                let upper = if start == 0 { ceiling } else { ordered[start].key };
                (lower, upper)
            };
            NumericBand { segment, lower, upper }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Values `0..n`, each with a denominator of 1000
    fn uniform(n: usize, numerator_of: impl Fn(f64) -> f64) -> Vec<RateStats<f64>> {
        (0..n)
            .map(|i| {
                let v = i as f64;
                RateStats {
                    key: v,
                    numerator: numerator_of(v),
                    denominator: 1000.0,
                }
            })
            .collect()
    }

    fn targets(caps: &[f64]) -> Vec<BandTarget> {
        caps.iter()
            .enumerate()
            .map(|(segment, &cap)| BandTarget { segment, cap })
            .collect()
    }

    /// Rate of the values inside `band`
    fn band_rate(stats: &[RateStats<f64>], band: &NumericBand) -> f64 {
        let (n, d) = stats
            .iter()
            .filter(|s| s.key > band.lower && s.key <= band.upper)
            .fold((0.0, 0.0), |acc, s| (acc.0 + s.numerator, acc.1 + s.denominator));
        n / d
    }

    #[test]
    fn test_bands_are_contiguous_and_cover_range() {
        let stats = uniform(100, |v| 5.0 + 0.5 * v);
        let bands = create_auto_numeric_bands(
            &stats,
            &targets(&[0.01, 0.02, 0.03, 0.04, f64::INFINITY]),
            &NumericBandOptions::default(),
        );
        assert_eq!(bands.len(), 5);
        assert_eq!(bands[0].lower, -1.0);
        assert_eq!(bands[4].upper, 99.0);
        for pair in bands.windows(2) {
            assert_eq!(pair[0].upper, pair[1].lower);
            assert!(pair[0].upper < pair[1].upper);
        }
    }

    #[test]
    fn test_first_band_rate_under_cap() {
        let stats = uniform(100, |v| v * 10.0);
        let bands = create_auto_numeric_bands(&stats, &targets(&[0.048, 0.10]), &NumericBandOptions::default());
        assert_eq!(bands.len(), 2);
        let (n, d) = stats
            .iter()
            .filter(|s| s.key > bands[0].lower && s.key <= bands[0].upper)
            .fold((0.0, 0.0), |acc, s| (acc.0 + s.numerator, acc.1 + s.denominator));
        assert!(n / d < 0.048);
        // Adding the next value would breach the cap
        let next = bands[0].upper + 1.0;
        let extra = stats.iter().find(|s| s.key == next).unwrap();
        assert!((n + extra.numerator) / (d + extra.denominator) >= 0.048);
    }

    #[test]
    fn test_every_band_rate_under_its_own_cap() {
        let stats = uniform(100, |v| v);
        let caps = [0.02, 0.04, f64::INFINITY];
        let bands = create_auto_numeric_bands(&stats, &targets(&caps), &NumericBandOptions::default());

        assert_eq!((bands[0].lower, bands[0].upper), (-1.0, 39.0));
        for band in &bands[..bands.len() - 1] {
            let observed = band_rate(&stats, band);
            assert!(
                observed < caps[band.segment],
                "segment {} rate {} breaches cap {}",
                band.segment,
                observed,
                caps[band.segment]
            );
        }
        // Values from 40 up average at least 4%, so segment 1 is skipped
        assert_eq!(bands.len(), 2);
        assert_eq!(bands[1].segment, 2);
        assert_eq!((bands[1].lower, bands[1].upper), (39.0, 99.0));
    }

    #[test]
    fn test_isolated_spike_is_not_absorbed() {
        // Value 2 sits at 5% against a 1% cap, with safe values on both sides
        let mut stats = uniform(10, |_| 0.0);
        stats[2].numerator = 50.0;
        let bands = create_auto_numeric_bands(&stats, &targets(&[0.01, 1.0]), &NumericBandOptions::default());
        assert_eq!(bands.len(), 2);
        assert_eq!((bands[0].lower, bands[0].upper), (-1.0, 1.0));
        assert_eq!((bands[1].lower, bands[1].upper), (1.0, 9.0));
    }

    #[test]
    fn test_backward_pass_needs_a_second_round() {
        // Value 1 sits at 90% against a 2% cap; the safe tail dilutes it
        let mut stats = uniform(50, |_| 0.0);
        stats[1].numerator = 900.0;
        let caps = targets(&[0.02, f64::INFINITY]);

        let single_round = NumericBandOptions {
            max_iterations: 1,
            ..Default::default()
        };
        let diluted = create_auto_numeric_bands(&stats, &caps, &single_round);
        assert_eq!(diluted.len(), 1, "one forward pass swallows every value");
        assert_eq!((diluted[0].lower, diluted[0].upper), (-1.0, 49.0));

        let settled = create_auto_numeric_bands(&stats, &caps, &NumericBandOptions::default());
        assert_eq!(settled.len(), 2);
        assert_eq!((settled[0].segment, settled[0].lower, settled[0].upper), (0, -1.0, 0.0));
        assert_eq!((settled[1].segment, settled[1].lower, settled[1].upper), (1, 0.0, 49.0));
        assert!(band_rate(&stats, &settled[0]) < 0.02);
    }

    #[test]
    fn test_risky_first_value_leaves_segment_empty() {
        let mut stats = uniform(50, |_| 0.0);
        stats[0].numerator = 900.0;
        let bands = create_auto_numeric_bands(&stats, &targets(&[0.02, 1.0]), &NumericBandOptions::default());
        assert_eq!(bands.len(), 1);
        assert_eq!(bands[0].segment, 1);
    }

    #[test]
    fn test_empty_selection_skips_segment() {
        let stats = uniform(5, |_| 500.0);
        let bands = create_auto_numeric_bands(&stats, &targets(&[0.01, 0.02, 1.0]), &NumericBandOptions::default());
        assert_eq!(bands.len(), 1);
        assert_eq!(bands[0].segment, 2);
        assert_eq!((bands[0].lower, bands[0].upper), (-1.0, 4.0));
    }

    #[test]
    fn test_descending_direction() {
        let stats = uniform(100, |v| (99.0 - v) * 10.0);
        let options = NumericBandOptions {
            high_value_high_risk: false,
            ..Default::default()
        };
        let bands = create_auto_numeric_bands(&stats, &targets(&[0.05, 1.0]), &options);
        assert_eq!(bands.len(), 2);
        // Low-risk band holds the high values
        assert_eq!(bands[0].upper, 99.0);
        assert_eq!(bands[1].lower, -1.0);
        assert_eq!(bands[1].upper, bands[0].lower);
    }

    #[test]
    fn test_floor_and_ceiling_override() {
        let stats = uniform(10, |v| v * 10.0);
        let options = NumericBandOptions {
            floor: Some(-50.0),
            ceiling: Some(500.0),
            ..Default::default()
        };
        let bands = create_auto_numeric_bands(&stats, &targets(&[0.02, 1.0]), &options);
        assert_eq!(bands[0].lower, -50.0);
        assert_eq!(bands.last().unwrap().upper, 500.0);
    }
}

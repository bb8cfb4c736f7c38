//! Categorical auto-banding
//!
//! Categories are sorted by observed rate and handed out to segments in
//! that order: each segment takes categories while the rate of its own
//! members stays under its cap, and stops at the first one that would
//! breach it.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use super::{rate, BandTarget, RateStats};

#[derive(Debug, Clone, PartialEq)]
pub struct CategoricalBand {
    pub segment: usize,
    pub members: BTreeSet<String>,
}

/// Rate-ascending order, label as tie-break
fn by_rate(a: &&RateStats<String>, b: &&RateStats<String>) -> Ordering {
    a.rate().total_cmp(&b.rate()).then_with(|| a.key.cmp(&b.key))
}

pub fn create_auto_categorical_bands(stats: &[RateStats<String>], targets: &[BandTarget]) -> Vec<CategoricalBand> {
    let mut ordered: Vec<&RateStats<String>> = stats.iter().collect();
    ordered.sort_by(by_rate);

    let mut bands = Vec::new();
    let mut start = 0;
    for (i, target) in targets.iter().enumerate() {
        if start >= ordered.len() {
            break;
        }
        let end = if i + 1 == targets.len() {
            ordered.len()
        } else {
            let (mut numerator, mut denominator) = (0.0, 0.0);
            let mut end = start;
            while end < ordered.len() {
                let candidate = ordered[end];
                let n = numerator + candidate.numerator;
                let d = denominator + candidate.denominator;
                if rate(n, d) >= target.cap {
                    break;
                }
                numerator = n;
                denominator = d;
                end += 1;
            }
            end
        };
        if end > start {
            bands.push(CategoricalBand {
                segment: target.segment,
                members: ordered[start..end].iter().map(|s| s.key.clone()).collect(),
            });
            start = end;
        }
    }
    bands
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(label: &str, numerator: f64, denominator: f64) -> RateStats<String> {
        RateStats {
            key: label.to_string(),
            numerator,
            denominator,
        }
    }

    fn members(band: &CategoricalBand) -> Vec<&str> {
        band.members.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_categories_sorted_by_rate() {
        let stats = vec![
            category("high", 30.0, 100.0),
            category("low", 1.0, 100.0),
            category("mid", 8.0, 100.0),
        ];
        let targets = vec![
            BandTarget { segment: 0, cap: 0.03 },
            BandTarget { segment: 1, cap: 0.10 },
            BandTarget { segment: 2, cap: 1.0 },
        ];
        let bands = create_auto_categorical_bands(&stats, &targets);
        assert_eq!(bands.len(), 3);
        assert_eq!(members(&bands[0]), vec!["low"]);
        assert_eq!(members(&bands[1]), vec!["mid"]);
        assert_eq!(members(&bands[2]), vec!["high"]);
    }

    #[test]
    fn test_stops_at_first_violation() {
        let stats = vec![
            category("a", 1.0, 100.0),
            category("b", 3.0, 100.0),
            category("c", 20.0, 100.0),
        ];
        let targets = vec![
            BandTarget { segment: 4, cap: 0.03 },
            BandTarget { segment: 7, cap: 1.0 },
        ];
        let bands = create_auto_categorical_bands(&stats, &targets);
        // a+b = 2% is under the cap, adding c would breach it
        assert_eq!(members(&bands[0]), vec!["a", "b"]);
        assert_eq!(bands[1].segment, 7);
        assert_eq!(members(&bands[1]), vec!["c"]);
    }

    #[test]
    fn test_each_band_rate_restarts_at_its_first_member() {
        let stats = vec![
            category("a", 1.0, 100.0),
            category("b", 6.0, 100.0),
            category("c", 15.0, 100.0),
            category("d", 40.0, 100.0),
        ];
        let targets = vec![
            BandTarget { segment: 0, cap: 0.03 },
            BandTarget { segment: 1, cap: 0.10 },
            BandTarget { segment: 2, cap: 1.0 },
        ];
        let bands = create_auto_categorical_bands(&stats, &targets);
        // Pooled with "a" and "b", "c" would average 7.3%; with "b" alone it breaches 10%
        assert_eq!(members(&bands[0]), vec!["a"]);
        assert_eq!(members(&bands[1]), vec!["b"]);
        assert_eq!(members(&bands[2]), vec!["c", "d"]);
        for band in &bands[..2] {
            let (n, d) = stats
                .iter()
                .filter(|s| band.members.contains(&s.key))
                .fold((0.0, 0.0), |acc, s| (acc.0 + s.numerator, acc.1 + s.denominator));
            assert!(n / d < targets[band.segment].cap);
        }
    }

    #[test]
    fn test_empty_segment_skipped() {
        let stats = vec![category("x", 50.0, 100.0)];
        let targets = vec![
            BandTarget { segment: 0, cap: 0.01 },
            BandTarget { segment: 1, cap: 1.0 },
        ];
        let bands = create_auto_categorical_bands(&stats, &targets);
        assert_eq!(bands.len(), 1);
        assert_eq!(bands[0].segment, 1);
    }
}

//! Priority Resolution
//!
//! Resolves a job's effective priority from its base priority and cultural
//! boosts. Boosts accumulate fractionally before a single round, so a
//! base-5 job with ceremony (+2) and indigenous (+1.5) boosts lands on 9,
//! not 8.

use super::job::{JobOptions, MAX_PRIORITY};

/// Boost for jobs submitted on behalf of an elder
const ELDER_BOOST: f64 = 3.0;
/// Boost for ceremony-related jobs
const CEREMONY_BOOST: f64 = 2.0;
/// Boost for jobs concerning indigenous data
const INDIGENOUS_BOOST: f64 = 1.5;

/// Stateless priority calculator
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityCalculator;

impl PriorityCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Resolve the effective priority for a submission. Boosts stack, the
    /// result rounds half-up and clamps to 0..=10.
    pub fn resolve(&self, options: &JobOptions) -> u8 {
        let mut priority = options.priority.min(MAX_PRIORITY) as f64;

        if options.elder_request {
            priority += ELDER_BOOST;
        }
        if options.ceremony_related {
            priority += CEREMONY_BOOST;
        }
        if options.indigenous_job {
            priority += INDIGENOUS_BOOST;
        }

        (priority + 0.5).floor().min(MAX_PRIORITY as f64) as u8
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn options(priority: u8, elder: bool, ceremony: bool, indigenous: bool) -> JobOptions {
        JobOptions {
            priority,
            elder_request: elder,
            ceremony_related: ceremony,
            indigenous_job: indigenous,
            ..Default::default()
        }
    }

    #[test]
    fn test_no_boosts_returns_base() {
        let calc = PriorityCalculator::new();
        assert_eq!(calc.resolve(&options(5, false, false, false)), 5);
        assert_eq!(calc.resolve(&options(0, false, false, false)), 0);
    }

    #[test]
    fn test_individual_boosts() {
        let calc = PriorityCalculator::new();
        assert_eq!(calc.resolve(&options(2, true, false, false)), 5);
        assert_eq!(calc.resolve(&options(2, false, true, false)), 4);
        // +1.5 rounds half-up
        assert_eq!(calc.resolve(&options(2, false, false, true)), 4);
    }

    #[test]
    fn test_fractional_boosts_accumulate_before_rounding() {
        let calc = PriorityCalculator::new();
        // 5 + 2 + 1.5 = 8.5, rounds to 9
        assert_eq!(calc.resolve(&options(5, false, true, true)), 9);
    }

    #[test]
    fn test_cap_at_max() {
        let calc = PriorityCalculator::new();
        // 8 + 3 + 2 + 1.5 = 14.5, clamps to 10
        assert_eq!(calc.resolve(&options(8, true, true, true)), 10);
        assert_eq!(calc.resolve(&options(10, true, false, false)), 10);
    }

    #[test]
    fn test_base_above_max_clamps_first() {
        let calc = PriorityCalculator::new();
        assert_eq!(calc.resolve(&options(200, false, false, false)), 10);
    }
}

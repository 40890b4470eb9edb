// The level curve - pure math, no I/O.
//
// Canonical formula: a level L requires 20 * L * (L + 1) total experience.
// `level_for_exp` is its exact inverse: the largest level whose requirement
// is at or below the given experience. The two functions must stay inverses
// of each other; everything else in the leveling system leans on that.

/// The quadratic, computed wide so no reachable input can overflow.
fn required(level: u64) -> u128 {
    20 * level as u128 * (level as u128 + 1)
}

/// Total experience required to reach `level`.
///
/// `exp_for_level(0) == 0`; strictly increasing in `level`.
pub fn exp_for_level(level: u32) -> u64 {
    required(level as u64).try_into().unwrap_or(u64::MAX)
}

/// Total experience required to reach the level after `level`.
pub fn exp_for_next_level(level: u32) -> u64 {
    exp_for_level(level + 1)
}

/// The largest `level` such that `exp_for_level(level) <= exp`.
///
/// Uses the closed-form inverse of the quadratic as a starting guess, then
/// nudges with integer comparisons so float rounding can never break the
/// round-trip invariant.
pub fn level_for_exp(exp: u64) -> u32 {
    let target = exp as u128;
    // 20L^2 + 20L <= exp  =>  L <= (sqrt(1 + exp/5) - 1) / 2
    let mut level = (((1.0 + exp as f64 / 5.0).sqrt() - 1.0) / 2.0).floor() as u64;

    while required(level + 1) <= target {
        level += 1;
    }
    while level > 0 && required(level) > target {
        level -= 1;
    }
    level as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_zero_requires_nothing() {
        assert_eq!(exp_for_level(0), 0);
        assert_eq!(level_for_exp(0), 0);
    }

    #[test]
    fn known_thresholds() {
        // 20 * L * (L + 1)
        assert_eq!(exp_for_level(1), 40);
        assert_eq!(exp_for_level(2), 120);
        assert_eq!(exp_for_level(5), 600);
        assert_eq!(exp_for_level(10), 2200);
        assert_eq!(exp_for_level(100), 202_000);
    }

    #[test]
    fn requirement_is_strictly_increasing() {
        for level in 0..1000 {
            assert!(exp_for_level(level) < exp_for_level(level + 1));
        }
    }

    #[test]
    fn round_trips_at_every_threshold() {
        for level in 0..=500 {
            assert_eq!(level_for_exp(exp_for_level(level)), level);
        }
    }

    #[test]
    fn one_below_a_threshold_stays_on_the_previous_level() {
        for level in 1..=500 {
            assert_eq!(level_for_exp(exp_for_level(level) - 1), level - 1);
        }
    }

    #[test]
    fn level_is_monotonic_in_exp() {
        let mut previous = level_for_exp(0);
        for exp in 1..50_000u64 {
            let current = level_for_exp(exp);
            assert!(current >= previous, "level regressed at exp {exp}");
            previous = current;
        }
    }

    #[test]
    fn forty_exp_is_exactly_level_one() {
        assert_eq!(level_for_exp(39), 0);
        assert_eq!(level_for_exp(40), 1);
        assert_eq!(level_for_exp(41), 1);
    }

    #[test]
    fn extreme_experience_does_not_panic() {
        let level = level_for_exp(u64::MAX);
        assert!(level > 0);
        assert!(exp_for_level(level) <= u64::MAX);
    }
}

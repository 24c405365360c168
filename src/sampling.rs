//! Random draws used by the sensor tick
//!
//! Every function takes the caller's RNG so each device worker owns its own
//! generator and tests can seed one.

use crate::types::{AlertGate, FieldRange, IntervalPolicy};
use rand::Rng;
use std::time::Duration;

/// Uniform draw in `[lower, upper]` rounded to two decimals
pub fn next_reading<R: Rng + ?Sized>(rng: &mut R, lower: f64, upper: f64) -> f64 {
    if upper <= lower {
        return round2(lower);
    }
    // bounds that are not whole hundredths can round past the range
    round2(rng.gen_range(lower..=upper)).clamp(lower, upper)
}

pub fn draw_range<R: Rng + ?Sized>(rng: &mut R, range: &FieldRange) -> f64 {
    next_reading(rng, range.min, range.max)
}

/// Draws one of `gate.outcomes` equally likely outcomes, `true_outcomes` of which are true
pub fn draw_gate<R: Rng + ?Sized>(rng: &mut R, gate: &AlertGate) -> bool {
    if gate.outcomes == 0 {
        return false;
    }
    rng.gen_range(0..gate.outcomes) < gate.true_outcomes
}

pub fn draw_interval<R: Rng + ?Sized>(rng: &mut R, policy: IntervalPolicy) -> Duration {
    match policy {
        IntervalPolicy::Fixed(d) => d,
        IntervalPolicy::UniformSecs { min, max } if max > min => {
            Duration::from_secs(rng.gen_range(min..=max))
        }
        IntervalPolicy::UniformSecs { min, .. } => Duration::from_secs(min),
    }
}

/// Simulated actuator processing latency
pub fn draw_millis<R: Rng + ?Sized>(rng: &mut R, (min, max): (u64, u64)) -> Duration {
    if max > min {
        Duration::from_millis(rng.gen_range(min..=max))
    } else {
        Duration::from_millis(min)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn gate(true_outcomes: u32) -> AlertGate {
        AlertGate {
            field: "alert".to_string(),
            true_outcomes,
            outcomes: 8,
            publish_when_false: true,
            enabled_field: None,
        }
    }

    #[test]
    fn test_readings_have_two_decimals() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let v = next_reading(&mut rng, 10.0, 30.0);
            assert!((10.0..=30.0).contains(&v));
            assert!(((v * 100.0).round() - v * 100.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_degenerate_range() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!((next_reading(&mut rng, 5.0, 5.0) - 5.0).abs() < f64::EPSILON);
        assert_eq!(
            draw_interval(&mut rng, IntervalPolicy::UniformSecs { min: 3, max: 3 }),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn test_gate_extremes() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            assert!(!draw_gate(&mut rng, &gate(0)));
            assert!(draw_gate(&mut rng, &gate(8)));
        }
    }

    #[test]
    fn test_gate_weighting() {
        let mut rng = StdRng::seed_from_u64(11);
        let rare = (0..8000).filter(|_| draw_gate(&mut rng, &gate(1))).count();
        let common = (0..8000).filter(|_| draw_gate(&mut rng, &gate(5))).count();
        // expected 1000 and 5000
        assert!((700..1300).contains(&rare), "rare = {rare}");
        assert!((4600..5400).contains(&common), "common = {common}");
    }

    #[test]
    fn test_interval_bounds() {
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..200 {
            let d = draw_interval(&mut rng, IntervalPolicy::UniformSecs { min: 10, max: 15 });
            assert!(d >= Duration::from_secs(10) && d <= Duration::from_secs(15));
        }
        assert_eq!(
            draw_interval(&mut rng, IntervalPolicy::Fixed(Duration::from_millis(250))),
            Duration::from_millis(250)
        );
    }
}

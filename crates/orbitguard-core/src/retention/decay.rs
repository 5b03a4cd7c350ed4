//! Exponential decay of retention weight with event age.

/// Retention weight for an event `age_seconds` old.
///
/// `exp(-lambda * age)`. Negative ages (clock skew) count as zero, so the
/// weight never exceeds 1.
pub fn weight(decay_lambda: f64, age_seconds: f64) -> f64 {
    (-decay_lambda * age_seconds.max(0.0)).exp()
}

/// Age at which the weight halves.
pub fn half_life_seconds(decay_lambda: f64) -> f64 {
    std::f64::consts::LN_2 / decay_lambda
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const LAMBDA: f64 = 1.0e-4;

    #[test]
    fn test_weight_at_zero_is_one() {
        assert_eq!(weight(LAMBDA, 0.0), 1.0);
    }

    #[test]
    fn test_weight_strictly_decreasing() {
        let mut prev = weight(LAMBDA, 0.0);
        for age in [1.0, 10.0, 100.0, 1_000.0, 10_000.0, 100_000.0] {
            let w = weight(LAMBDA, age);
            assert!(w < prev, "weight({age}) = {w} not below {prev}");
            prev = w;
        }
    }

    #[test]
    fn test_weight_tends_to_zero() {
        assert!(weight(LAMBDA, 1.0e7) < 1.0e-40);
    }

    #[test]
    fn test_negative_age_clamps() {
        assert_eq!(weight(LAMBDA, -50.0), 1.0);
    }

    #[test]
    fn test_half_life() {
        let h = half_life_seconds(LAMBDA);
        assert_relative_eq!(weight(LAMBDA, h), 0.5, epsilon = 1e-12);
    }
}

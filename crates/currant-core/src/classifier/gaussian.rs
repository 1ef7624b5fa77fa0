use serde::{Deserialize, Serialize};

/// Smallest standard deviation used when evaluating a density. Keeps
/// single-valued attributes from producing infinite log-likelihoods.
pub const STD_FLOOR: f64 = 0.05;

const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_8;

/// Weighted running mean and variance (Welford).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GaussianEstimator {
    weight: f64,
    mean: f64,
    variance_sum: f64,
}

impl GaussianEstimator {
    pub fn add(&mut self, value: f64, weight: f64) {
        if self.weight > 0.0 {
            self.weight += weight;
            let last_mean = self.mean;
            self.mean += weight * (value - last_mean) / self.weight;
            self.variance_sum += weight * (value - last_mean) * (value - self.mean);
        } else {
            self.mean = value;
            self.weight = weight;
        }
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn variance(&self) -> f64 {
        if self.weight > 1.0 {
            (self.variance_sum / (self.weight - 1.0)).max(0.0)
        } else {
            0.0
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Log of the normal density at `value`, with the deviation floored at
    /// [`STD_FLOOR`].
    pub fn log_density(&self, value: f64) -> f64 {
        let sd = self.std_dev().max(STD_FLOOR);
        let z = (value - self.mean) / sd;
        -0.5 * z * z - sd.ln() - LN_SQRT_2PI
    }

    /// Estimated observed weight with a value `<= threshold`.
    pub fn weight_at_or_below(&self, threshold: f64) -> f64 {
        if self.weight <= 0.0 {
            return 0.0;
        }
        let sd = self.std_dev();
        if sd > 0.0 {
            (normal_cdf((threshold - self.mean) / sd) * self.weight).clamp(0.0, self.weight)
        } else if threshold >= self.mean {
            self.weight
        } else {
            0.0
        }
    }
}

pub fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

/// Abramowitz and Stegun 7.1.26, absolute error below 1.5e-7.
pub fn erf(x: f64) -> f64 {
    const P: f64 = 0.327_591_1;
    const A1: f64 = 0.254_829_592;
    const A2: f64 = -0.284_496_736;
    const A3: f64 = 1.421_413_741;
    const A4: f64 = -1.453_152_027;
    const A5: f64 = 1.061_405_429;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let poly = ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t;
    sign * (1.0 - poly * (-x * x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_moments() {
        let mut g = GaussianEstimator::default();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            g.add(v, 1.0);
        }
        assert_eq!(g.weight(), 8.0);
        assert!((g.mean() - 5.0).abs() < 1e-12);
        // sample variance of the classic example: 32 / 7
        assert!((g.variance() - 32.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn erf_matches_reference_points() {
        assert!(erf(0.0).abs() < 1e-6);
        assert!((erf(1.0) - 0.842_700_79).abs() < 1e-6);
        assert!((erf(-1.0) + 0.842_700_79).abs() < 1e-6);
        assert!((normal_cdf(1.96) - 0.975).abs() < 1e-3);
    }

    #[test]
    fn weight_split_for_degenerate_estimator() {
        let mut g = GaussianEstimator::default();
        g.add(3.0, 1.0);
        g.add(3.0, 1.0);
        assert_eq!(g.weight_at_or_below(2.0), 0.0);
        assert_eq!(g.weight_at_or_below(3.0), 2.0);
        assert!(g.log_density(3.0).is_finite());
    }

    #[test]
    fn weight_split_is_half_at_mean() {
        let mut g = GaussianEstimator::default();
        for v in [1.0, 2.0, 3.0] {
            g.add(v, 1.0);
        }
        assert!((g.weight_at_or_below(2.0) - 1.5).abs() < 1e-6);
    }
}

/// Thurstone-Mosteller pairwise model with Gaussian merit beliefs.
///
/// Each item's latent merit is believed to be `N(mean, variance)`. A judge
/// perceives each item's merit through `N(0, β²)` noise; the left item wins
/// when the perceived difference exceeds the draw margin `ε`, loses when it
/// is below `-ε`, and ties otherwise.
///
/// The exact posterior after one judgment is not Gaussian, so it is projected
/// back onto a Gaussian by matching the first two moments (assumed-density
/// filtering). The projection is closed form, deterministic and cheap, which
/// keeps replay a pure fold over the event log.
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_DRAW_MARGIN, DEFAULT_JUDGE_NOISE, DEFAULT_MIN_VARIANCE, DEFAULT_PRIOR_MEAN,
    DEFAULT_PRIOR_VARIANCE, MIN_LIKELIHOOD_MASS, SOFT_OUTCOME_EPSILON,
};
use crate::error::BeliefError;
use crate::types::Outcome;

const SQRT_2: f64 = std::f64::consts::SQRT_2;
const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;

/// Parameters of the pairwise model. Part of the belief state: replaying a
/// log under different parameters produces a different state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub prior_mean: f64,
    pub prior_variance: f64,
    /// β: per-item perception noise standard deviation.
    pub judge_noise: f64,
    /// ε: half-width of the tie band on the merit difference.
    pub draw_margin: f64,
    pub min_variance: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            prior_mean: DEFAULT_PRIOR_MEAN,
            prior_variance: DEFAULT_PRIOR_VARIANCE,
            judge_noise: DEFAULT_JUDGE_NOISE,
            draw_margin: DEFAULT_DRAW_MARGIN,
            min_variance: DEFAULT_MIN_VARIANCE,
        }
    }
}

impl ModelConfig {
    /// Returns a description of the first invalid field, if any.
    pub fn validate(&self) -> Result<(), String> {
        let positive = |name: &str, v: f64| {
            if v.is_finite() && v > 0.0 { Ok(()) } else { Err(format!("{name} must be finite and > 0, got {v}")) }
        };
        if !self.prior_mean.is_finite() {
            return Err(format!("prior_mean must be finite, got {}", self.prior_mean));
        }
        positive("prior_variance", self.prior_variance)?;
        positive("judge_noise", self.judge_noise)?;
        positive("draw_margin", self.draw_margin)?;
        positive("min_variance", self.min_variance)?;
        if self.min_variance > self.prior_variance {
            return Err("min_variance must not exceed prior_variance".to_string());
        }
        Ok(())
    }

    pub fn prior(&self) -> Gaussian {
        Gaussian { mean: self.prior_mean, variance: self.prior_variance }
    }

    /// Variance of the perceived merit difference between two items.
    fn difference_variance(&self, left: &Gaussian, right: &Gaussian) -> f64 {
        2.0 * self.judge_noise * self.judge_noise + left.variance + right.variance
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gaussian {
    pub mean: f64,
    pub variance: f64,
}

impl Gaussian {
    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }
}

pub fn normal_pdf(x: f64) -> f64 {
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

pub fn normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / SQRT_2)
}

/// Complementary error function, Chebyshev fit with fractional error below
/// 1.2e-7 everywhere. The `exp(-z²)` factor keeps tail values relatively
/// accurate until they underflow.
fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let poly = -z * z - 1.265_512_23
        + t * (1.000_023_68
            + t * (0.374_091_96
                + t * (0.096_784_18
                    + t * (-0.186_288_06
                        + t * (0.278_868_07
                            + t * (-1.135_203_98
                                + t * (1.488_515_87 + t * (-0.822_152_23 + t * 0.170_872_77))))))));
    let ans = t * poly.exp();
    if x >= 0.0 { ans } else { 2.0 - ans }
}

/// Mean and variance corrections in units of the difference scale `c`.
#[derive(Debug, Clone, Copy)]
struct Correction {
    v: f64,
    w: f64,
}

/// Left wins when the difference exceeds the margin: likelihood `Φ(x)`.
fn decisive(x: f64) -> Correction {
    let mass = normal_cdf(x);
    if mass < MIN_LIKELIHOOD_MASS {
        // lim x→-∞ of φ(x)/Φ(x) is -x, and w → 1.
        return Correction { v: -x, w: 1.0 };
    }
    let v = normal_pdf(x) / mass;
    Correction { v, w: v * (v + x) }
}

fn draw(t: f64, a: f64) -> Correction {
    let abs_t = t.abs();
    let sign = if t < 0.0 { -1.0 } else { 1.0 };
    let upper = a - abs_t;
    let lower = -a - abs_t;
    let mass = normal_cdf(upper) - normal_cdf(lower);
    if mass < MIN_LIKELIHOOD_MASS {
        return Correction { v: upper * sign, w: 1.0 };
    }
    let v = (normal_pdf(lower) - normal_pdf(upper)) / mass;
    let w = v * v + (upper * normal_pdf(upper) - lower * normal_pdf(lower)) / mass;
    Correction { v: v * sign, w }
}

/// Soft outcome: likelihood `p·Φ(t-a) + (1-p)·Φ(-t-a)`.
fn mixture(p: f64, t: f64, a: f64) -> Correction {
    let p = p.clamp(SOFT_OUTCOME_EPSILON, 1.0 - SOFT_OUTCOME_EPSILON);
    let win_x = t - a;
    let loss_x = t + a;
    let mass = p * normal_cdf(win_x) + (1.0 - p) * normal_cdf(-loss_x);
    if mass < MIN_LIKELIHOOD_MASS {
        return if p >= 0.5 { decisive(win_x) } else { mirror(decisive(-loss_x)) };
    }
    let d1 = p * normal_pdf(win_x) - (1.0 - p) * normal_pdf(loss_x);
    let d2 = -p * win_x * normal_pdf(win_x) + (1.0 - p) * loss_x * normal_pdf(loss_x);
    let v = d1 / mass;
    Correction { v, w: v * v - d2 / mass }
}

fn mirror(c: Correction) -> Correction {
    Correction { v: -c.v, w: c.w }
}

fn correction(outcome: Outcome, t: f64, a: f64) -> Result<Correction, BeliefError> {
    Ok(match outcome {
        Outcome::LeftWins => decisive(t - a),
        Outcome::RightWins => mirror(decisive(-t - a)),
        Outcome::Tie => draw(t, a),
        Outcome::Probability(p) if !p.is_finite() || !(0.0..=1.0).contains(&p) => {
            return Err(BeliefError::UnknownOutcome(format!("probability {p}")));
        }
        Outcome::Probability(p) if p == 1.0 => decisive(t - a),
        Outcome::Probability(p) if p == 0.0 => mirror(decisive(-t - a)),
        Outcome::Probability(p) => mixture(p, t, a),
    })
}

/// Shrink a variance by `1 - (σ²/c²)·w`. The factor is clamped into [0, 1]
/// so a surprising soft outcome can never inflate a belief, and the result
/// never drops below the floor.
fn shrink(variance: f64, c2: f64, w: f64, floor: f64) -> f64 {
    let factor = (1.0 - variance / c2 * w).clamp(0.0, 1.0);
    (variance * factor).max(floor)
}

/// One-step posterior for a judged pair, from the left item's point of view.
///
/// Returns `Err(UnknownOutcome)` for a probability outside `[0, 1]`; the
/// inputs are left untouched in that case.
pub fn update(
    model: &ModelConfig,
    left: &Gaussian,
    right: &Gaussian,
    outcome: Outcome,
) -> Result<(Gaussian, Gaussian), BeliefError> {
    let c2 = model.difference_variance(left, right);
    let c = c2.sqrt();
    let t = (left.mean - right.mean) / c;
    let a = model.draw_margin / c;
    let Correction { v, w } = correction(outcome, t, a)?;

    let new_left = Gaussian {
        mean: left.mean + left.variance / c * v,
        variance: shrink(left.variance, c2, w, model.min_variance),
    };
    let new_right = Gaussian {
        mean: right.mean - right.variance / c * v,
        variance: shrink(right.variance, c2, w, model.min_variance),
    };
    Ok((new_left, new_right))
}

/// Predictive probabilities of (left wins, tie, right wins) for the next judgment.
pub fn predict(model: &ModelConfig, left: &Gaussian, right: &Gaussian) -> (f64, f64, f64) {
    let c = model.difference_variance(left, right).sqrt();
    let t = (left.mean - right.mean) / c;
    let a = model.draw_margin / c;
    let win = normal_cdf(t - a);
    let loss = normal_cdf(-t - a);
    (win, (1.0 - win - loss).max(0.0), loss)
}

/// P(the item with belief `higher` truly has more merit than `lower`).
pub fn order_probability(higher: &Gaussian, lower: &Gaussian) -> f64 {
    let spread = (higher.variance + lower.variance).sqrt();
    normal_cdf((higher.mean - lower.mean) / spread)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prior() -> Gaussian {
        ModelConfig::default().prior()
    }

    #[test]
    fn test_normal_cdf_reference_values() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-7);
        assert!((normal_cdf(1.0) - 0.841_344_746).abs() < 1e-6);
        assert!((normal_cdf(-1.96) - 0.024_997_9).abs() < 1e-6);
        assert!(normal_cdf(-40.0) >= 0.0);
        assert!((normal_cdf(40.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_win_moves_means_apart_and_shrinks_variance() {
        let model = ModelConfig::default();
        let (l, r) = update(&model, &prior(), &prior(), Outcome::LeftWins).unwrap();
        assert!(l.mean > 0.0);
        assert!(r.mean < 0.0);
        assert!((l.mean + r.mean).abs() < 1e-12, "symmetric update");
        assert!(l.variance < 1.0 && r.variance < 1.0);
    }

    #[test]
    fn test_right_win_mirrors_left_win() {
        let model = ModelConfig::default();
        let a = Gaussian { mean: 0.3, variance: 0.8 };
        let b = Gaussian { mean: -0.1, variance: 0.5 };
        let (l1, r1) = update(&model, &a, &b, Outcome::LeftWins).unwrap();
        let (r2, l2) = update(&model, &b, &a, Outcome::RightWins).unwrap();
        assert!((l1.mean - l2.mean).abs() < 1e-12);
        assert!((r1.mean - r2.mean).abs() < 1e-12);
        assert!((l1.variance - l2.variance).abs() < 1e-12);
    }

    #[test]
    fn test_tie_pulls_means_together() {
        let model = ModelConfig::default();
        let strong = Gaussian { mean: 1.0, variance: 0.5 };
        let weak = Gaussian { mean: -1.0, variance: 0.5 };
        let (s, w) = update(&model, &strong, &weak, Outcome::Tie).unwrap();
        assert!(s.mean < 1.0);
        assert!(w.mean > -1.0);
        assert!(s.variance <= 0.5 && w.variance <= 0.5);
    }

    #[test]
    fn test_even_probability_is_nearly_a_tie_in_means() {
        let model = ModelConfig::default();
        let (l, r) = update(&model, &prior(), &prior(), Outcome::Probability(0.5)).unwrap();
        assert!(l.mean.abs() < 1e-12 && r.mean.abs() < 1e-12);
        assert!(l.variance <= 1.0);
    }

    #[test]
    fn test_soft_outcome_is_weaker_than_decisive() {
        let model = ModelConfig::default();
        let (soft, _) = update(&model, &prior(), &prior(), Outcome::Probability(0.8)).unwrap();
        let (hard, _) = update(&model, &prior(), &prior(), Outcome::LeftWins).unwrap();
        assert!(soft.mean > 0.0);
        assert!(soft.mean < hard.mean);
    }

    #[test]
    fn test_extreme_upset_stays_finite() {
        let model = ModelConfig::default();
        let favourite = Gaussian { mean: 30.0, variance: 0.01 };
        let underdog = Gaussian { mean: -30.0, variance: 0.01 };
        for outcome in [Outcome::RightWins, Outcome::Tie, Outcome::Probability(1e-9)] {
            let (f, u) = update(&model, &favourite, &underdog, outcome).unwrap();
            assert!(f.mean.is_finite() && u.mean.is_finite(), "{outcome:?}");
            assert!(f.variance >= model.min_variance && f.variance <= 0.01);
        }
    }

    #[test]
    fn test_repeated_wins_keep_variance_bounded() {
        let model = ModelConfig::default();
        let mut a = prior();
        let mut b = prior();
        for _ in 0..10_000 {
            let (na, nb) = update(&model, &a, &b, Outcome::LeftWins).unwrap();
            a = na;
            b = nb;
        }
        assert!(a.variance >= model.min_variance && a.variance <= 1.0);
        assert!(a.mean.is_finite() && a.mean > b.mean);
    }

    #[test]
    fn test_invalid_probability_is_unknown_outcome() {
        let model = ModelConfig::default();
        let err = update(&model, &prior(), &prior(), Outcome::Probability(f64::NAN)).unwrap_err();
        assert!(matches!(err, BeliefError::UnknownOutcome(_)));
    }

    #[test]
    fn test_predict_sums_to_one() {
        let model = ModelConfig::default();
        let (w, d, l) = predict(&model, &Gaussian { mean: 0.4, variance: 0.3 }, &prior());
        assert!((w + d + l - 1.0).abs() < 1e-6);
        assert!(w > l);
    }

    #[test]
    fn test_model_validation() {
        assert!(ModelConfig::default().validate().is_ok());
        let bad = ModelConfig { draw_margin: 0.0, ..ModelConfig::default() };
        assert!(bad.validate().is_err());
        let bad = ModelConfig { min_variance: 2.0, ..ModelConfig::default() };
        assert!(bad.validate().is_err());
    }
}

//! # Stopping Rules
//!
//! When the candidate p-values of an iteration look like draws from
//! Uniform(0, 1), no edge carries more signal than chance and the loop
//! stops. The comparison is a one-sample two-sided Kolmogorov-Smirnov test.
//!
//! ## Timing
//! - `BeforeCommit`: evaluated on the raw candidates; the triggering
//!   iteration's winner is discarded.
//! - `AfterCommit`: evaluated once the winner is committed; the factor is kept.
//!
//! ## KS distribution
//! Exact Marsaglia-Tsang-Wang (2003) CDF for n < 100, the asymptotic
//! Kolmogorov series beyond that.

use nalgebra::DMatrix;
use serde::Serialize;

/// When the rule is consulted relative to committing the winner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopTiming {
    BeforeCommit,
    AfterCommit,
}

/// Iteration-level stopping rule.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopRule {
    KolmogorovSmirnov { threshold: f64, timing: StopTiming },
}

impl StopRule {
    pub const DEFAULT_KS_THRESHOLD: f64 = 0.01;

    pub fn ks(timing: StopTiming) -> Self {
        Self::KolmogorovSmirnov {
            threshold: Self::DEFAULT_KS_THRESHOLD,
            timing,
        }
    }

    pub fn timing(&self) -> StopTiming {
        match self {
            Self::KolmogorovSmirnov { timing, .. } => *timing,
        }
    }

    /// Evaluate the rule on one iteration's candidate p-values.
    pub fn evaluate(&self, p_values: &[f64]) -> StopDecision {
        match self {
            Self::KolmogorovSmirnov { threshold, .. } => {
                let finite: Vec<f64> = p_values.iter().copied().filter(|p| p.is_finite()).collect();
                if finite.is_empty() {
                    return StopDecision {
                        stop: true,
                        ks: None,
                    };
                }
                let ks = ks_uniform_test(&finite);
                StopDecision {
                    stop: ks.p_value > *threshold,
                    ks: Some(ks),
                }
            }
        }
    }
}

/// Outcome of a stopping-rule evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct StopDecision {
    pub stop: bool,
    /// `None` when no finite p-value was available to test
    pub ks: Option<KsTest>,
}

/// One-sample Kolmogorov-Smirnov test result.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct KsTest {
    pub statistic: f64,
    pub p_value: f64,
    pub n: usize,
}

/// Two-sided KS test of `sample` against Uniform(0, 1).
pub fn ks_uniform_test(sample: &[f64]) -> KsTest {
    let mut sorted: Vec<f64> = sample.iter().map(|x| x.clamp(0.0, 1.0)).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    let nf = n as f64;

    let statistic = sorted
        .iter()
        .enumerate()
        .map(|(i, &x)| {
            let above = (i + 1) as f64 / nf - x;
            let below = x - i as f64 / nf;
            above.max(below)
        })
        .fold(0.0, f64::max);

    let p_value = if n == 0 {
        1.0
    } else if n < 100 {
        1.0 - kolmogorov_cdf_exact(n, statistic)
    } else {
        kolmogorov_sf_asymptotic(nf.sqrt() * statistic)
    };

    KsTest {
        statistic,
        p_value: p_value.clamp(0.0, 1.0),
        n,
    }
}

/// P(D_n < d) by the Marsaglia-Tsang-Wang matrix-power method.
pub fn kolmogorov_cdf_exact(n: usize, d: f64) -> f64 {
    if d <= 0.0 {
        return 0.0;
    }
    if d >= 1.0 {
        return 1.0;
    }
    let nf = n as f64;
    let k = (nf * d) as usize + 1;
    let m = 2 * k - 1;
    let h = k as f64 - nf * d;

    let mut hm = DMatrix::from_fn(m, m, |i, j| if i + 1 >= j { 1.0 } else { 0.0 });
    for i in 0..m {
        hm[(i, 0)] -= h.powi(i as i32 + 1);
        hm[(m - 1, i)] -= h.powi((m - i) as i32);
    }
    if 2.0 * h - 1.0 > 0.0 {
        hm[(m - 1, 0)] += (2.0 * h - 1.0).powi(m as i32);
    }
    for i in 0..m {
        for j in 0..m {
            if i + 1 > j {
                for g in 1..=(i + 1 - j) {
                    hm[(i, j)] /= g as f64;
                }
            }
        }
    }

    let (q, mut exponent) = matrix_power(&hm, 0, n);
    let mut s = q[(k - 1, k - 1)];
    for i in 1..=n {
        s = s * i as f64 / nf;
        if s < 1e-140 {
            s *= 1e140;
            exponent -= 140;
        }
    }
    (s * 10f64.powi(exponent)).clamp(0.0, 1.0)
}

/// `A^n` with a decimal exponent carried separately to avoid overflow.
fn matrix_power(a: &DMatrix<f64>, a_exp: i32, n: usize) -> (DMatrix<f64>, i32) {
    if n == 1 {
        return (a.clone(), a_exp);
    }
    let (half, half_exp) = matrix_power(a, a_exp, n / 2);
    let squared = &half * &half;
    let (mut v, mut v_exp) = if n % 2 == 0 {
        (squared, 2 * half_exp)
    } else {
        (a * squared, a_exp + 2 * half_exp)
    };
    let mid = a.nrows() / 2;
    if v[(mid, mid)] > 1e140 {
        v *= 1e-140;
        v_exp += 140;
    }
    (v, v_exp)
}

/// P(K > x) for the limiting Kolmogorov distribution.
pub fn kolmogorov_sf_asymptotic(x: f64) -> f64 {
    if x <= 0.0 {
        return 1.0;
    }
    let mut sum = 0.0;
    for k in 1..=100 {
        let kf = k as f64;
        let term = (-2.0 * kf * kf * x * x).exp();
        sum += if k % 2 == 1 { term } else { -term };
        if term < 1e-16 {
            break;
        }
    }
    (2.0 * sum).clamp(0.0, 1.0)
}

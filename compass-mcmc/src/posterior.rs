//! Posterior predictive proportions from the retained responder trace.
//!
//! For every retained iteration `t` of individual `i`,
//!
//! ```text
//! p_s ~ Dir(c_s + n_s),  c_s[k] = alpha_s[k] if gamma[i,k,t] = 1 or k is the residual
//!                                  alpha_u[k] otherwise
//! p_u ~ Dir(alpha_u + n_u)
//! ```
//!
//! and the residual is dropped from every reported vector.

use crate::chain::GammaTrace;
use crate::data::{CategoriesMatrix, PairedCounts};
use crate::engine::McmcFit;
use crate::error::{invalid_input, CompassError, Result};
use ndarray::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::Gamma;
use rayon::prelude::*;

/// Proportions of one individual over the responder-capable categories.
#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorDraw {
    pub p_s: Array1<f64>,
    pub p_u: Array1<f64>,
    /// `p_s - p_u`
    pub diff: Array1<f64>,
    /// `ln p_s - ln p_u`
    pub logd: Array1<f64>,
}

impl PosteriorDraw {
    fn zeros(kk1: usize) -> Self {
        Self {
            p_s: Array1::zeros(kk1),
            p_u: Array1::zeros(kk1),
            diff: Array1::zeros(kk1),
            logd: Array1::zeros(kk1),
        }
    }

    fn from_proportions(p_s: &Array1<f64>, p_u: &Array1<f64>) -> Self {
        let kk1 = p_s.len() - 1;
        let p_s = p_s.slice(s![..kk1]).to_owned();
        let p_u = p_u.slice(s![..kk1]).to_owned();
        let diff = &p_s - &p_u;
        let logd = p_s.mapv(f64::ln) - p_u.mapv(f64::ln);
        Self {
            p_s,
            p_u,
            diff,
            logd,
        }
    }

    fn accumulate(&mut self, other: &PosteriorDraw) {
        self.p_s += &other.p_s;
        self.p_u += &other.p_u;
        self.diff += &other.diff;
        self.logd += &other.logd;
    }

    fn scale(&mut self, a: f64) {
        self.p_s *= a;
        self.p_u *= a;
        self.diff *= a;
        self.logd *= a;
    }
}

/// Normalized Gamma variates, floored so that logs stay finite.
fn sample_dirichlet(conc: &Array1<f64>, rng: &mut impl Rng) -> Result<Array1<f64>> {
    let mut x = Array1::<f64>::zeros(conc.len());
    for (k, (xk, &a)) in x.iter_mut().zip(conc.iter()).enumerate() {
        let gam = Gamma::new(a, 1.0)
            .map_err(|_| CompassError::NumericDegeneracy { category: k, value: a })?;
        *xk = rng.sample(gam);
    }

    let tot = x.sum();
    if !(tot.is_finite() && tot > 0.0) {
        return Err(CompassError::NumericDegeneracy {
            category: conc.len(),
            value: tot,
        });
    }
    x.mapv_inplace(|v| (v / tot).max(f64::MIN_POSITIVE));
    Ok(x)
}

/// Visit one posterior draw per retained iteration.
///
/// * `gamma_trace_row` - (K-1) × T responder states of the individual
/// * `alpha_u` - baseline concentration (length K)
/// * `alpha_s` - responder concentration (length K)
/// * `n_s`, `n_u` - the individual's counts (length K)
fn visit_draws<F>(
    gamma_trace_row: ArrayView2<u8>,
    alpha_u: ArrayView1<f64>,
    alpha_s: ArrayView1<f64>,
    n_s: ArrayView1<f64>,
    n_u: ArrayView1<f64>,
    rng: &mut impl Rng,
    mut visit: F,
) -> Result<()>
where
    F: FnMut(PosteriorDraw),
{
    let kk = alpha_u.len();
    let (kk1, ntime) = gamma_trace_row.dim();
    if kk1 + 1 != kk || alpha_s.len() != kk || n_s.len() != kk || n_u.len() != kk {
        return invalid_input(format!(
            "trace has {} categories but concentrations/counts have {}",
            kk1 + 1,
            kk
        ));
    }

    let conc_u = &alpha_u + &n_u;
    let mut conc_s = Array1::<f64>::zeros(kk);

    for t in 0..ntime {
        let gamma_t = gamma_trace_row.column(t);
        for k in 0..kk {
            let responding = k == kk1 || gamma_t[k] == 1;
            let alpha = if responding { alpha_s[k] } else { alpha_u[k] };
            conc_s[k] = alpha + n_s[k];
        }
        let p_s = sample_dirichlet(&conc_s, rng)?;
        let p_u = sample_dirichlet(&conc_u, rng)?;
        visit(PosteriorDraw::from_proportions(&p_s, &p_u));
    }
    Ok(())
}

/// One draw per retained iteration.
pub fn predict_full(
    gamma_trace_row: ArrayView2<u8>,
    alpha_u: ArrayView1<f64>,
    alpha_s: ArrayView1<f64>,
    n_s: ArrayView1<f64>,
    n_u: ArrayView1<f64>,
    rng: &mut impl Rng,
) -> Result<Vec<PosteriorDraw>> {
    let mut draws = Vec::with_capacity(gamma_trace_row.ncols());
    visit_draws(gamma_trace_row, alpha_u, alpha_s, n_s, n_u, rng, |d| {
        draws.push(d)
    })?;
    Ok(draws)
}

/// Mean of [`predict_full`] over iterations, without keeping the draws.
pub fn predict_summary(
    gamma_trace_row: ArrayView2<u8>,
    alpha_u: ArrayView1<f64>,
    alpha_s: ArrayView1<f64>,
    n_s: ArrayView1<f64>,
    n_u: ArrayView1<f64>,
    rng: &mut impl Rng,
) -> Result<PosteriorDraw> {
    let ntime = gamma_trace_row.ncols();
    let mut mean = PosteriorDraw::zeros(gamma_trace_row.nrows());
    visit_draws(gamma_trace_row, alpha_u, alpha_s, n_s, n_u, rng, |d| {
        mean.accumulate(&d)
    })?;
    mean.scale(1.0 / ntime.max(1) as f64);
    Ok(mean)
}

/// Binds a finished fit to the data it was fitted on.
pub struct PosteriorPredictor<'a> {
    fit: &'a McmcFit,
    data: &'a PairedCounts,
}

impl<'a> PosteriorPredictor<'a> {
    pub fn new(
        fit: &'a McmcFit,
        data: &'a PairedCounts,
        categories: &CategoriesMatrix,
    ) -> Result<Self> {
        categories.check_counts(data)?;
        let trace = &fit.gamma_trace;
        if trace.num_individuals() != data.num_individuals()
            || trace.num_categories() + 1 != data.num_categories()
        {
            return invalid_input(format!(
                "fit of {} × {} does not match data of {} × {}",
                trace.num_individuals(),
                trace.num_categories() + 1,
                data.num_individuals(),
                data.num_categories()
            ));
        }
        Ok(Self { fit, data })
    }

    fn check_individual(&self, individual: usize) -> Result<()> {
        if individual >= self.data.num_individuals() {
            return invalid_input(format!(
                "individual {} out of {}",
                individual,
                self.data.num_individuals()
            ));
        }
        Ok(())
    }

    pub fn predict_full(&self, individual: usize, rng: &mut impl Rng) -> Result<Vec<PosteriorDraw>> {
        self.check_individual(individual)?;
        predict_full(
            self.fit.gamma_trace.individual(individual),
            self.fit.alpha_u.view(),
            self.fit.alpha_s.view(),
            self.data.stim.row(individual),
            self.data.unstim.row(individual),
            rng,
        )
    }

    pub fn predict_summary(&self, individual: usize, rng: &mut impl Rng) -> Result<PosteriorDraw> {
        self.check_individual(individual)?;
        predict_summary(
            self.fit.gamma_trace.individual(individual),
            self.fit.alpha_u.view(),
            self.fit.alpha_s.view(),
            self.data.stim.row(individual),
            self.data.unstim.row(individual),
            rng,
        )
    }

    /// Summaries of every individual; individual `i` uses seed `seed + i`.
    pub fn predict_all(&self, seed: u64) -> Result<Vec<PosteriorDraw>> {
        (0..self.data.num_individuals())
            .into_par_iter()
            .map(|i| {
                let mut rng = SmallRng::seed_from_u64(seed.wrapping_add(i as u64));
                self.predict_summary(i, &mut rng)
            })
            .collect()
    }
}

/// Responder probabilities and the derived per-individual scores.
#[derive(Debug, Clone)]
pub struct ResponderSummary {
    /// individual × (K-1) posterior mean of gamma
    pub probability: Array2<f64>,
    /// FS: responder probability mass over the `2^M - 1` possible subsets
    pub functionality: Array1<f64>,
    /// PFS: the same, weighting each subset by its degree
    pub polyfunctionality: Array1<f64>,
}

impl ResponderSummary {
    pub fn from_trace(trace: &GammaTrace, categories: &CategoriesMatrix) -> Result<Self> {
        let kk1 = trace.num_categories();
        if kk1 + 1 != categories.num_categories() {
            return invalid_input(format!(
                "trace has {} categories, categories matrix has {}",
                kk1 + 1,
                categories.num_categories()
            ));
        }

        let probability = trace.posterior_mean();
        let mm = categories.num_markers();
        let n_subsets = (2f64).powi(mm as i32) - 1.0;

        let weights: Array1<f64> = (0..kk1)
            .map(|k| {
                let d = categories.degree(k);
                d as f64 / binomial(mm, d)
            })
            .collect();
        let pfs_scale = if mm > 0 {
            2.0 / (mm * (mm + 1)) as f64
        } else {
            0.0
        };

        let functionality = probability.sum_axis(Axis(1)) / n_subsets;
        let polyfunctionality = probability.dot(&weights) * pfs_scale;

        Ok(Self {
            probability,
            functionality,
            polyfunctionality,
        })
    }
}

fn binomial(n: usize, k: usize) -> f64 {
    let k = k.min(n - k);
    (0..k).fold(1.0, |acc, j| acc * (n - j) as f64 / (j + 1) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn trace_row() -> Array2<u8> {
        array![[1u8, 1, 0, 1, 0, 1], [0, 0, 0, 1, 1, 0]]
    }

    #[test]
    fn summary_is_mean_of_full() {
        let gamma = trace_row();
        let alpha_s = array![5.0, 3.0, 80.0];
        let alpha_u = array![4.0, 3.0, 120.0];
        let n_s = array![50.0, 10.0, 940.0];
        let n_u = array![5.0, 12.0, 983.0];

        let mut rng = SmallRng::seed_from_u64(17);
        let full = predict_full(
            gamma.view(),
            alpha_u.view(),
            alpha_s.view(),
            n_s.view(),
            n_u.view(),
            &mut rng,
        )
        .unwrap();
        assert_eq!(full.len(), 6);

        let mut rng = SmallRng::seed_from_u64(17);
        let summary = predict_summary(
            gamma.view(),
            alpha_u.view(),
            alpha_s.view(),
            n_s.view(),
            n_u.view(),
            &mut rng,
        )
        .unwrap();

        for k in 0..2 {
            let m = full.iter().map(|d| d.diff[k]).sum::<f64>() / 6.0;
            assert_abs_diff_eq!(summary.diff[k], m, epsilon = 1e-12);
            let m = full.iter().map(|d| d.logd[k]).sum::<f64>() / 6.0;
            assert_abs_diff_eq!(summary.logd[k], m, epsilon = 1e-12);
        }
    }

    #[test]
    fn residual_is_dropped() {
        let gamma = trace_row();
        let conc = array![1.0, 1.0, 1.0];
        let counts = array![0.0, 0.0, 10.0];
        let mut rng = SmallRng::seed_from_u64(1);
        let draws = predict_full(
            gamma.view(),
            conc.view(),
            conc.view(),
            counts.view(),
            counts.view(),
            &mut rng,
        )
        .unwrap();
        for d in draws {
            assert_eq!(d.diff.len(), 2);
            assert_eq!(d.logd.len(), 2);
            assert!(d.logd.iter().all(|x| x.is_finite()));
            assert!(d.p_s.sum() < 1.0);
        }
    }

    #[test]
    fn mismatched_lengths_rejected() {
        let gamma = trace_row();
        let conc = array![1.0, 1.0];
        let mut rng = SmallRng::seed_from_u64(1);
        assert!(predict_full(
            gamma.view(),
            conc.view(),
            conc.view(),
            conc.view(),
            conc.view(),
            &mut rng
        )
        .is_err());
    }

    #[test]
    fn scores_of_a_full_design() {
        let cats = CategoriesMatrix::full_design(vec!["A".into(), "B".into()]).unwrap();
        // A, B, A&B, residual
        let mut trace = GammaTrace::new(2, 3, 2);
        trace.record(0, array![[1u8, 1, 1], [0, 0, 1]].view());
        trace.record(1, array![[1u8, 1, 1], [0, 0, 0]].view());

        let summary = ResponderSummary::from_trace(&trace, &cats).unwrap();
        assert_abs_diff_eq!(summary.functionality[0], 1.0);
        assert_abs_diff_eq!(summary.functionality[1], 0.5 / 3.0);

        // weights 1/2, 1/2, 2/1 scaled by 2/(2*3)
        assert_abs_diff_eq!(summary.polyfunctionality[0], 1.0);
        assert_abs_diff_eq!(summary.polyfunctionality[1], 0.5 * 2.0 / 3.0);
    }

    #[test]
    fn binomial_coefficients() {
        assert_abs_diff_eq!(binomial(4, 2), 6.0);
        assert_abs_diff_eq!(binomial(5, 0), 1.0);
        assert_abs_diff_eq!(binomial(5, 5), 1.0);
    }
}

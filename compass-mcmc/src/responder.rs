//! Gibbs update of the responder indicators.
//!
//! For individual `i` and category `k`, the conditional posterior of
//! `gamma[i,k]` is Bernoulli with log odds
//!
//! ```text
//! llik_i(gamma_ik = 1) - llik_i(gamma_ik = 0)
//!   + ln (m_k + pb1) - ln (Istar - m_k + pb2)
//! ```
//!
//! where the category's responder probability has been integrated out
//! under its Beta(pb1, pb2) prior, `m_k` counts the other individuals
//! currently responding in `k` and `Istar` the other eligible ones.

use crate::chain::FlipCounter;
use crate::config::{MixturePrior, UpdatePolicy};
use crate::data::PairedCounts;
use crate::likelihood::{toggle_log_ratio, ResponderBlock};
use ndarray::prelude::*;
use rand::Rng;

/// Sufficient statistics of the mixing prior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponderMargins {
    /// number of responders per category
    pub mk: Vec<usize>,
    /// number of eligible individuals
    pub istar: usize,
}

impl ResponderMargins {
    pub fn from_state(gamma: ArrayView2<u8>) -> Self {
        let mk = gamma
            .columns()
            .into_iter()
            .map(|c| c.iter().filter(|&&g| g == 1).count())
            .collect();
        Self {
            mk,
            istar: gamma.nrows(),
        }
    }

    /// Total number of responder entries
    pub fn mkstar(&self) -> usize {
        self.mk.iter().sum()
    }

    /// Collapsed Beta-Bernoulli prior log odds of `gamma[i,k] = 1`,
    /// leaving out individual `i` whose current state is `own`.
    pub fn log_prior_odds(&self, k: usize, own: u8, prior: &MixturePrior) -> f64 {
        let others = self.istar.saturating_sub(1) as f64;
        let m = (self.mk[k] - own as usize) as f64;
        (m + prior.pb1).ln() - (others - m + prior.pb2).ln()
    }

    fn apply_flip(&mut self, k: usize, new_state: u8) {
        if new_state == 1 {
            self.mk[k] += 1;
        } else {
            self.mk[k] -= 1;
        }
    }
}

/// Stochastic-search sampler of the responder matrix.
#[derive(Debug, Clone, Copy)]
pub struct ResponderSampler {
    pub prior: MixturePrior,
    pub policy: UpdatePolicy,
}

impl ResponderSampler {
    pub fn new(prior: MixturePrior, policy: UpdatePolicy) -> Self {
        Self { prior, policy }
    }

    /// One sweep over every individual and responder-capable category.
    ///
    /// Returns the number of indicators that changed state. `margins`
    /// must describe `gamma` on entry and describes it again on exit.
    ///
    /// * `gamma` - individual × (K-1) responder matrix (modified in place)
    /// * `data` - paired counts
    /// * `alpha_s` - responder concentration
    /// * `alpha_u` - baseline concentration
    /// * `margins` - responder counts per category
    /// * `counter` - visit/flip diagnostics
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &self,
        gamma: &mut Array2<u8>,
        data: &PairedCounts,
        alpha_s: ArrayView1<f64>,
        alpha_u: ArrayView1<f64>,
        margins: &mut ResponderMargins,
        counter: &mut FlipCounter,
        rng: &mut impl Rng,
    ) -> usize {
        let (nn, kk1) = gamma.dim();
        debug_assert_eq!(kk1 + 1, data.num_categories());

        // pooled updates see the margins of the previous sweep
        let frozen = match self.policy {
            UpdatePolicy::Pooled => Some(margins.clone()),
            UpdatePolicy::Individual => None,
        };

        let mut flips = 0;

        for i in 0..nn {
            let n_s = data.stim.row(i);
            let n_u = data.unstim.row(i);

            let mut block = ResponderBlock::collect(n_s, n_u, gamma.row(i), alpha_s, alpha_u);

            for k in 0..kk1 {
                let old = gamma[[i, k]];
                if old == 1 {
                    block.remove(n_s[k], n_u[k], alpha_s[k], alpha_u[k]);
                }

                let llik_ratio = toggle_log_ratio(&block, n_s[k], n_u[k], alpha_s[k], alpha_u[k]);
                let prior_odds = frozen
                    .as_ref()
                    .unwrap_or(&*margins)
                    .log_prior_odds(k, old, &self.prior);

                let p_one = logistic(llik_ratio + prior_odds);
                let new = if rng.random::<f64>() < p_one { 1u8 } else { 0u8 };

                if new == 1 {
                    block.add(n_s[k], n_u[k], alpha_s[k], alpha_u[k]);
                }

                counter.record(new != old);
                if new != old {
                    gamma[[i, k]] = new;
                    margins.apply_flip(k, new);
                    flips += 1;
                }
            }
        }

        flips
    }
}

#[inline]
fn logistic(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CountMatrix;
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn disparity_data(n: usize) -> PairedCounts {
        // category 0: strong stimulation effect, category 1: none
        let stim = Array2::from_shape_fn((n, 3), |(_, k)| [300, 20, 9680][k]);
        let unstim = Array2::from_shape_fn((n, 3), |(_, k)| [5, 20, 9975][k]);
        PairedCounts::new(CountMatrix::new(stim).unwrap(), CountMatrix::new(unstim).unwrap())
            .unwrap()
    }

    #[test]
    fn margins_track_state() {
        let gamma = array![[1u8, 0, 1], [1, 1, 0]];
        let margins = ResponderMargins::from_state(gamma.view());
        assert_eq!(margins.mk, vec![2, 1, 1]);
        assert_eq!(margins.istar, 2);
        assert_eq!(margins.mkstar(), 4);

        let prior = MixturePrior { pb1: 1.0, pb2: 1.0 };
        // individual 0 in category 0: one other responder out of one other
        assert_abs_diff_eq!(margins.log_prior_odds(0, 1, &prior), (2.0f64 / 1.0).ln());
        // individual 0 in category 1: individual 1 responds
        assert_abs_diff_eq!(margins.log_prior_odds(1, 0, &prior), (2.0f64 / 1.0).ln());
    }

    #[test]
    fn logistic_is_stable() {
        assert_abs_diff_eq!(logistic(0.0), 0.5);
        assert!(logistic(800.0) <= 1.0);
        assert!(logistic(-800.0) >= 0.0);
        assert!(logistic(-800.0).is_finite());
    }

    #[test]
    fn sweep_separates_responders() {
        for policy in [UpdatePolicy::Individual, UpdatePolicy::Pooled] {
            let data = disparity_data(10);
            let sampler = ResponderSampler::new(MixturePrior::default(), policy);

            let alpha_s = array![10.0, 10.0, 100.0];
            let alpha_u = array![10.0, 10.0, 150.0];

            let mut gamma = Array2::<u8>::zeros((10, 2));
            gamma.column_mut(1).fill(1);
            let mut margins = ResponderMargins::from_state(gamma.view());
            let mut counter = FlipCounter::default();
            let mut rng = SmallRng::seed_from_u64(3);

            for _ in 0..20 {
                sampler.update(
                    &mut gamma,
                    &data,
                    alpha_s.view(),
                    alpha_u.view(),
                    &mut margins,
                    &mut counter,
                    &mut rng,
                );
                assert!(gamma.iter().all(|&g| g <= 1));
                assert_eq!(margins, ResponderMargins::from_state(gamma.view()));
            }

            assert!(gamma.column(0).iter().all(|&g| g == 1), "{:?}", policy);
            assert!(counter.visits == 20 * 10 * 2);
            assert!(counter.flips >= 10);
        }
    }
}

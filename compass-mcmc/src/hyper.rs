//! Metropolis-Hastings updates of the condition-level concentration vectors.
//!
//! Each category is proposed separately on the log scale,
//! `ln α' = ln α + N(0, σ²)`, under an Exponential(λ) prior. The
//! acceptance ratio only touches the individuals whose likelihood
//! depends on the coordinate being moved, using the block sums of
//! [`crate::likelihood::ResponderBlock`].

use crate::chain::AcceptanceCounter;
use crate::config::{ProposalScale, ProposalSchedule};
use crate::data::PairedCounts;
use crate::error::{CompassError, Result};
use crate::likelihood::*;
use ndarray::prelude::*;
use rand::Rng;
use rand_distr::StandardNormal;

/// Random-walk sampler for one concentration vector.
#[derive(Debug, Clone, Copy)]
pub struct HyperparameterSampler {
    /// Exponential prior rate
    pub lambda: f64,
    pub scale: ProposalScale,
    pub schedule: ProposalSchedule,
}

impl HyperparameterSampler {
    pub fn new(lambda: f64, scale: ProposalScale, schedule: ProposalSchedule) -> Self {
        Self {
            lambda,
            scale,
            schedule,
        }
    }

    /// Probability of drawing the wide variance at `iteration`
    pub fn wide_probability(&self, iteration: usize) -> f64 {
        match self.schedule {
            ProposalSchedule::Fixed => self.scale.p_wide,
            ProposalSchedule::Adaptive { taper } => {
                self.scale.p_wide * taper / (taper + iteration as f64)
            }
        }
    }

    pub fn proposal_variance(&self, iteration: usize, rng: &mut impl Rng) -> f64 {
        let p_wide = self.wide_probability(iteration);
        if p_wide > 0.0 && rng.random::<f64>() < p_wide {
            self.scale.wide
        } else {
            self.scale.narrow
        }
    }

    /// Draw a log-scale proposal and its log prior ratio including the
    /// Jacobian of the log transform.
    fn propose(
        &self,
        k: usize,
        old: f64,
        iteration: usize,
        rng: &mut impl Rng,
    ) -> Result<(f64, f64)> {
        let sd = self.proposal_variance(iteration, rng).sqrt();
        let z: f64 = rng.sample(StandardNormal);
        let log_new = old.ln() + sd * z;
        let new = log_new.exp();
        check_concentration(k, new)?;

        let log_prior = -self.lambda * (new - old) + (log_new - old.ln());
        Ok((new, log_prior))
    }

    /// Update `alpha_s` in place; returns which categories moved.
    ///
    /// Only individuals with category `k` in their responder block
    /// contribute to the acceptance ratio of `alpha_s[k]`.
    #[allow(clippy::too_many_arguments)]
    pub fn update_alpha_s(
        &self,
        alpha_s: &mut Array1<f64>,
        alpha_u: ArrayView1<f64>,
        data: &PairedCounts,
        gamma: ArrayView2<u8>,
        iteration: usize,
        counter: &mut AcceptanceCounter,
        rng: &mut impl Rng,
    ) -> Result<Vec<bool>> {
        let nn = data.num_individuals();
        let kk = data.num_categories();

        let mut blocks: Vec<ResponderBlock> = (0..nn)
            .map(|i| {
                ResponderBlock::collect(
                    data.stim.row(i),
                    data.unstim.row(i),
                    gamma.row(i),
                    alpha_s.view(),
                    alpha_u,
                )
            })
            .collect();

        let mut accepted = vec![false; kk];

        for k in 0..kk {
            let old = alpha_s[k];
            let (new, log_prior) = self.propose(k, old, iteration, rng)?;

            let mut llik_ratio = 0.0;
            for i in 0..nn {
                if in_responder_block(gamma.row(i), k) {
                    llik_ratio +=
                        alpha_s_log_ratio(&blocks[i], data.stim.counts()[[i, k]], old, new);
                }
            }

            let log_accept = llik_ratio + log_prior;
            if log_accept.is_nan() {
                return Err(CompassError::NumericDegeneracy {
                    category: k,
                    value: new,
                });
            }

            let u: f64 = rng.random();
            if u.ln() < log_accept {
                alpha_s[k] = new;
                for i in 0..nn {
                    if in_responder_block(gamma.row(i), k) {
                        blocks[i].alpha_s += new - old;
                    }
                }
                accepted[k] = true;
            }
            counter.record(k, accepted[k]);
        }

        check_total(alpha_s.view())?;
        Ok(accepted)
    }

    /// Update `alpha_u` in place; returns which categories moved.
    ///
    /// Every individual contributes: `alpha_u` parameterizes the shared
    /// baseline proportions of both conditions.
    #[allow(clippy::too_many_arguments)]
    pub fn update_alpha_u(
        &self,
        alpha_u: &mut Array1<f64>,
        alpha_s: ArrayView1<f64>,
        data: &PairedCounts,
        gamma: ArrayView2<u8>,
        iteration: usize,
        counter: &mut AcceptanceCounter,
        rng: &mut impl Rng,
    ) -> Result<Vec<bool>> {
        let nn = data.num_individuals();
        let kk = data.num_categories();

        let mut blocks: Vec<ResponderBlock> = (0..nn)
            .map(|i| {
                ResponderBlock::collect(
                    data.stim.row(i),
                    data.unstim.row(i),
                    gamma.row(i),
                    alpha_s,
                    alpha_u.view(),
                )
            })
            .collect();

        let total_cells: Vec<f64> = (0..nn)
            .map(|i| data.stim.totals()[i] + data.unstim.totals()[i])
            .collect();

        let mut total_alpha = alpha_u.sum();
        let mut accepted = vec![false; kk];

        for k in 0..kk {
            let old = alpha_u[k];
            let (new, log_prior) = self.propose(k, old, iteration, rng)?;

            let prop = BaselineProposal {
                total_old: total_alpha,
                total_new: total_alpha - old + new,
                old,
                new,
            };
            check_concentration(k, prop.total_new)?;

            let mut llik_ratio = 0.0;
            for i in 0..nn {
                llik_ratio += alpha_u_log_ratio(
                    &prop,
                    &blocks[i],
                    total_cells[i],
                    in_responder_block(gamma.row(i), k),
                    data.stim.counts()[[i, k]],
                    data.unstim.counts()[[i, k]],
                );
            }

            let log_accept = llik_ratio + log_prior;
            if log_accept.is_nan() {
                return Err(CompassError::NumericDegeneracy {
                    category: k,
                    value: new,
                });
            }

            let u: f64 = rng.random();
            if u.ln() < log_accept {
                alpha_u[k] = new;
                total_alpha = prop.total_new;
                for i in 0..nn {
                    if in_responder_block(gamma.row(i), k) {
                        blocks[i].alpha_u += new - old;
                    }
                }
                accepted[k] = true;
            }
            counter.record(k, accepted[k]);
        }

        check_total(alpha_u.view())?;
        Ok(accepted)
    }
}

/// A concentration must be a normal (non-zero, non-subnormal, finite)
/// positive float.
fn check_concentration(k: usize, value: f64) -> Result<()> {
    if value.is_normal() && value > 0.0 {
        Ok(())
    } else {
        Err(CompassError::NumericDegeneracy { category: k, value })
    }
}

fn check_total(alpha: ArrayView1<f64>) -> Result<()> {
    let total = alpha.sum();
    check_concentration(alpha.len(), total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CountMatrix;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn toy_data() -> PairedCounts {
        let stim = CountMatrix::new(array![[40, 5, 955], [35, 8, 957], [2, 6, 992]]).unwrap();
        let unstim = CountMatrix::new(array![[3, 6, 991], [4, 7, 989], [2, 5, 993]]).unwrap();
        PairedCounts::new(stim, unstim).unwrap()
    }

    #[test]
    fn tiny_variance_accepts_almost_everything() {
        let data = toy_data();
        let gamma = array![[1u8, 0], [1, 0], [0, 0]];
        let sampler =
            HyperparameterSampler::new(1e-3, ProposalScale::single(1e-12), ProposalSchedule::Fixed);

        let mut rng = SmallRng::seed_from_u64(7);
        let mut alpha_s = array![10.0, 10.0, 100.0];
        let mut alpha_u = array![10.0, 10.0, 150.0];
        let mut acc_s = AcceptanceCounter::new(3);
        let mut acc_u = AcceptanceCounter::new(3);

        for t in 0..200 {
            sampler
                .update_alpha_s(&mut alpha_s, alpha_u.view(), &data, gamma.view(), t, &mut acc_s, &mut rng)
                .unwrap();
            sampler
                .update_alpha_u(&mut alpha_u, alpha_s.view(), &data, gamma.view(), t, &mut acc_u, &mut rng)
                .unwrap();
        }

        assert!(acc_s.overall_rate() > 0.95, "{:?}", acc_s.rates());
        assert!(acc_u.overall_rate() > 0.95, "{:?}", acc_u.rates());
    }

    #[test]
    fn concentrations_stay_positive() {
        let data = toy_data();
        let gamma = array![[1u8, 1], [1, 0], [0, 1]];
        let sampler = HyperparameterSampler::new(
            1e-3,
            ProposalScale {
                wide: 1.0,
                narrow: 0.1,
                p_wide: 0.5,
            },
            ProposalSchedule::Adaptive { taper: 10.0 },
        );

        let mut rng = SmallRng::seed_from_u64(11);
        let mut alpha_s = array![10.0, 10.0, 100.0];
        let mut alpha_u = array![10.0, 10.0, 150.0];
        let mut acc_s = AcceptanceCounter::new(3);
        let mut acc_u = AcceptanceCounter::new(3);

        for t in 0..500 {
            sampler
                .update_alpha_s(&mut alpha_s, alpha_u.view(), &data, gamma.view(), t, &mut acc_s, &mut rng)
                .unwrap();
            sampler
                .update_alpha_u(&mut alpha_u, alpha_s.view(), &data, gamma.view(), t, &mut acc_u, &mut rng)
                .unwrap();
            assert!(alpha_s.iter().all(|&a| a > 0.0 && a.is_finite()));
            assert!(alpha_u.iter().all(|&a| a > 0.0 && a.is_finite()));
        }

        for r in acc_s.rates().into_iter().chain(acc_u.rates()) {
            assert!((0.0..=1.0).contains(&r));
        }
    }

    #[test]
    fn adaptive_schedule_tapers() {
        let sampler = HyperparameterSampler::new(
            1.0,
            ProposalScale {
                wide: 1.0,
                narrow: 0.01,
                p_wide: 0.5,
            },
            ProposalSchedule::Adaptive { taper: 100.0 },
        );
        assert_eq!(sampler.wide_probability(0), 0.5);
        assert!((sampler.wide_probability(100) - 0.25).abs() < 1e-12);
        assert!(sampler.wide_probability(100_000) < 1e-3);

        let fixed = HyperparameterSampler {
            schedule: ProposalSchedule::Fixed,
            ..sampler
        };
        assert_eq!(fixed.wide_probability(100_000), 0.5);
    }

    #[test]
    fn degenerate_concentration_is_fatal() {
        assert!(check_concentration(0, 0.0).is_err());
        assert!(check_concentration(0, f64::INFINITY).is_err());
        assert!(check_concentration(0, f64::MIN_POSITIVE / 2.0).is_err());
        assert!(check_concentration(0, 1e-300).is_ok());
    }
}

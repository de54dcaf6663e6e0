//! Starting values of the chain.

use crate::config::{AlphaInit, InitPolicy};
use crate::data::PairedCounts;
use ndarray::prelude::*;

/// Concentration vectors of length `kk` with the residual set apart.
pub fn initial_alphas(kk: usize, init: &AlphaInit) -> (Array1<f64>, Array1<f64>) {
    let mut alpha_s = Array1::from_elem(kk, init.value);
    let mut alpha_u = Array1::from_elem(kk, init.value);
    alpha_s[kk - 1] = init.residual_s;
    alpha_u[kk - 1] = init.residual_u;
    (alpha_s, alpha_u)
}

/// Individual × (K-1) starting responder matrix.
pub fn initial_responders(data: &PairedCounts, policy: &InitPolicy) -> Array2<u8> {
    let nn = data.num_individuals();
    let kk1 = data.num_categories() - 1;
    let tot_s = data.stim.totals();
    let tot_u = data.unstim.totals();

    Array2::from_shape_fn((nn, kk1), |(i, k)| {
        let n_s = data.stim.counts()[[i, k]];
        let n_u = data.unstim.counts()[[i, k]];
        match *policy {
            InitPolicy::Default => proportion_rule(n_s, tot_s[i], n_u, tot_u[i]),
            InitPolicy::Fisher { threshold, z } => {
                if (n_s == 0.0) != (n_u == 0.0) {
                    proportion_rule(n_s, tot_s[i], n_u, tot_u[i])
                } else if log_odds_lower_bound(n_s, tot_s[i], n_u, tot_u[i], z) > threshold {
                    1
                } else {
                    0
                }
            }
        }
    })
}

/// 1 unless the unstimulated proportion is at least as large
fn proportion_rule(n_s: f64, tot_s: f64, n_u: f64, tot_u: f64) -> u8 {
    if n_s / tot_s > n_u / tot_u {
        1
    } else {
        0
    }
}

/// One-sided lower confidence bound of the log odds ratio of being in
/// the category under stimulation vs. without, with the Haldane 0.5
/// correction.
///
/// * `n_s` - stimulated cells in the category, out of `tot_s`
/// * `n_u` - unstimulated cells in the category, out of `tot_u`
/// * `z` - standard normal quantile of the bound
pub fn log_odds_lower_bound(n_s: f64, tot_s: f64, n_u: f64, tot_u: f64, z: f64) -> f64 {
    let a = n_s + 0.5;
    let b = (tot_s - n_s) + 0.5;
    let c = n_u + 0.5;
    let d = (tot_u - n_u) + 0.5;
    let log_or = a.ln() + d.ln() - b.ln() - c.ln();
    let se = (1.0 / a + 1.0 / b + 1.0 / c + 1.0 / d).sqrt();
    log_or - z * se
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CountMatrix;

    fn data() -> PairedCounts {
        let stim = CountMatrix::new(array![[50, 11, 0, 939], [3, 10, 5, 982]]).unwrap();
        let unstim = CountMatrix::new(array![[5, 10, 4, 981], [3, 10, 0, 987]]).unwrap();
        PairedCounts::new(stim, unstim).unwrap()
    }

    #[test]
    fn default_marks_higher_stimulated_proportion() {
        let gamma = initial_responders(&data(), &InitPolicy::Default);
        assert_eq!(gamma, array![[1u8, 1, 0], [0, 0, 1]]);
    }

    #[test]
    fn fisher_requires_significant_excess() {
        let gamma = initial_responders(&data(), &InitPolicy::fisher());
        // 50 vs 5 is clearly enriched, 11 vs 10 is not; zero cells fall
        // back to comparing proportions
        assert_eq!(gamma, array![[1u8, 0, 0], [0, 0, 1]]);
    }

    #[test]
    fn residual_gets_its_own_alpha() {
        let (alpha_s, alpha_u) = initial_alphas(4, &AlphaInit::default());
        assert_eq!(alpha_s.to_vec(), vec![10.0, 10.0, 10.0, 100.0]);
        assert_eq!(alpha_u.to_vec(), vec![10.0, 10.0, 10.0, 150.0]);
    }

    #[test]
    fn bound_grows_with_evidence() {
        let weak = log_odds_lower_bound(12.0, 1000.0, 10.0, 1000.0, 1.645);
        let strong = log_odds_lower_bound(120.0, 10000.0, 10.0, 10000.0, 1.645);
        assert!(weak < 0.0);
        assert!(strong > 1.0);
    }
}

//! Dirichlet-Multinomial likelihood kernels.
//!
//! # Marginal likelihood of one individual
//!
//! With responder block `A = {k : gamma_k = 1} ∪ {residual}` and baseline
//! block `B` (the rest), integrating out the baseline proportions `p_u`
//! and the responder proportions within `A` gives
//!
//! ```text
//! llik = DM(n_u + n_s on B, merged A bin | alpha_u on B, Σ_A alpha_u)
//!      + DM(n_u on A | alpha_u on A)
//!      + DM(n_s on A | alpha_s on A)
//! ```
//!
//! where `DM` is the kernel below (multinomial coefficients dropped).
//! The `lnΓ(Σ_A alpha_u)` terms of the first two blocks cancel.

use ndarray::prelude::*;
use special::Gamma as SpecialGamma;

#[inline]
pub fn ln_gamma(x: f64) -> f64 {
    SpecialGamma::ln_gamma(x).0
}

/// Log Dirichlet-Multinomial probability of `x` given `alpha`, including
/// the multinomial coefficient.
pub fn dirichlet_multinomial_log_likelihood(x: ArrayView1<f64>, alpha: ArrayView1<f64>) -> f64 {
    let n = x.sum();
    let coef = ln_gamma(n + 1.0) - x.iter().map(|&xk| ln_gamma(xk + 1.0)).sum::<f64>();
    coef + dirichlet_multinomial_log_kernel(x, alpha)
}

/// Dirichlet-Multinomial log-likelihood without the multinomial
/// coefficient, which is invariant in `alpha`.
///
/// ```text
/// lnΓ(Σα) - lnΓ(Σx + Σα) + Σ_k [lnΓ(x_k + α_k) - lnΓ(α_k)]
/// ```
pub fn dirichlet_multinomial_log_kernel(x: ArrayView1<f64>, alpha: ArrayView1<f64>) -> f64 {
    debug_assert_eq!(x.len(), alpha.len());
    let sum_alpha = alpha.sum();
    let n = x.sum();
    let mut ret = ln_gamma(sum_alpha) - ln_gamma(n + sum_alpha);
    for (&xk, &ak) in x.iter().zip(alpha.iter()) {
        ret += ln_gamma(xk + ak) - ln_gamma(ak);
    }
    ret
}

/// `kernel(x | alpha_new) - kernel(x | alpha_old)`
///
/// Entries where the two concentration vectors agree are skipped, so a
/// single-coordinate proposal costs four `lnΓ` evaluations plus the
/// totals.
pub fn dirichlet_multinomial_log_ratio(
    x: ArrayView1<f64>,
    alpha_new: ArrayView1<f64>,
    alpha_old: ArrayView1<f64>,
) -> f64 {
    debug_assert_eq!(alpha_new.len(), alpha_old.len());
    let n = x.sum();
    let sum_new = alpha_new.sum();
    let sum_old = alpha_old.sum();

    let mut ret = (ln_gamma(sum_new) - ln_gamma(sum_old))
        - (ln_gamma(n + sum_new) - ln_gamma(n + sum_old));

    for ((&xk, &a1), &a0) in x.iter().zip(alpha_new.iter()).zip(alpha_old.iter()) {
        if a1 != a0 {
            ret += (ln_gamma(xk + a1) - ln_gamma(a1)) - (ln_gamma(xk + a0) - ln_gamma(a0));
        }
    }
    ret
}

/// Whether category `k` belongs to the responder block. `gamma` has one
/// entry per responder-capable category; the residual is always in.
#[inline]
pub fn in_responder_block(gamma: ArrayView1<u8>, k: usize) -> bool {
    k >= gamma.len() || gamma[k] == 1
}

/// Closed-form marginal log-likelihood (kernel form) of one individual.
///
/// * `n_s` - stimulated counts (length K)
/// * `n_u` - unstimulated counts (length K)
/// * `gamma` - responder indicators (length K-1)
/// * `alpha_s` - responder concentration (length K)
/// * `alpha_u` - baseline concentration (length K)
pub fn individual_log_likelihood(
    n_s: ArrayView1<f64>,
    n_u: ArrayView1<f64>,
    gamma: ArrayView1<u8>,
    alpha_s: ArrayView1<f64>,
    alpha_u: ArrayView1<f64>,
) -> f64 {
    let total_alpha_u = alpha_u.sum();
    let total_cells = n_s.sum() + n_u.sum();
    let block = ResponderBlock::collect(n_s, n_u, gamma, alpha_s, alpha_u);

    let mut ret = ln_gamma(total_alpha_u) - ln_gamma(total_alpha_u + total_cells);

    for k in 0..n_s.len() {
        let (au, as_) = (alpha_u[k], alpha_s[k]);
        if in_responder_block(gamma, k) {
            ret += ln_gamma(au + n_u[k]) - ln_gamma(au);
            ret += ln_gamma(as_ + n_s[k]) - ln_gamma(as_);
        } else {
            ret += ln_gamma(au + n_u[k] + n_s[k]) - ln_gamma(au);
        }
    }

    ret + block.merged_terms()
}

/// Sums over the responder block of one individual.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResponderBlock {
    /// Σ_A alpha_s
    pub alpha_s: f64,
    /// Σ_A alpha_u
    pub alpha_u: f64,
    /// Σ_A n_s
    pub stim: f64,
    /// Σ_A n_u
    pub unstim: f64,
}

impl ResponderBlock {
    pub fn collect(
        n_s: ArrayView1<f64>,
        n_u: ArrayView1<f64>,
        gamma: ArrayView1<u8>,
        alpha_s: ArrayView1<f64>,
        alpha_u: ArrayView1<f64>,
    ) -> Self {
        let mut block = Self::default();
        for k in 0..n_s.len() {
            if in_responder_block(gamma, k) {
                block.add(n_s[k], n_u[k], alpha_s[k], alpha_u[k]);
            }
        }
        block
    }

    #[inline]
    pub fn add(&mut self, n_s: f64, n_u: f64, alpha_s: f64, alpha_u: f64) {
        self.alpha_s += alpha_s;
        self.alpha_u += alpha_u;
        self.stim += n_s;
        self.unstim += n_u;
    }

    #[inline]
    pub fn remove(&mut self, n_s: f64, n_u: f64, alpha_s: f64, alpha_u: f64) {
        self.alpha_s -= alpha_s;
        self.alpha_u -= alpha_u;
        self.stim -= n_s;
        self.unstim -= n_u;
    }

    /// Terms of the marginal likelihood that couple the whole block
    fn merged_terms(&self) -> f64 {
        ln_gamma(self.alpha_u + self.stim + self.unstim) - ln_gamma(self.alpha_u + self.unstim)
            + ln_gamma(self.alpha_s)
            - ln_gamma(self.alpha_s + self.stim)
    }
}

/// `llik(gamma_k = 1) - llik(gamma_k = 0)` for one individual.
///
/// * `without_k` - block sums with category `k` left out
/// * `n_s`, `n_u` - counts of category `k`
/// * `alpha_s`, `alpha_u` - concentrations of category `k`
pub fn toggle_log_ratio(
    without_k: &ResponderBlock,
    n_s: f64,
    n_u: f64,
    alpha_s: f64,
    alpha_u: f64,
) -> f64 {
    let mut with_k = *without_k;
    with_k.add(n_s, n_u, alpha_s, alpha_u);

    let local = ln_gamma(alpha_u + n_u) - ln_gamma(alpha_u + n_u + n_s)
        + ln_gamma(alpha_s + n_s)
        - ln_gamma(alpha_s);

    local + with_k.merged_terms() - without_k.merged_terms()
}

/// Change of one individual's log-likelihood when `alpha_s[k]` moves
/// from `old` to `new`. Only valid when `k` is in the responder block.
pub fn alpha_s_log_ratio(block: &ResponderBlock, n_s: f64, old: f64, new: f64) -> f64 {
    let sum_old = block.alpha_s;
    let sum_new = block.alpha_s - old + new;
    (ln_gamma(sum_new) - ln_gamma(sum_old))
        - (ln_gamma(sum_new + block.stim) - ln_gamma(sum_old + block.stim))
        + (ln_gamma(new + n_s) - ln_gamma(new))
        - (ln_gamma(old + n_s) - ln_gamma(old))
}

/// What one individual contributes to an `alpha_u[k]` proposal.
pub struct BaselineProposal {
    /// Σ_k alpha_u before the move
    pub total_old: f64,
    /// Σ_k alpha_u after the move
    pub total_new: f64,
    pub old: f64,
    pub new: f64,
}

/// Change of one individual's log-likelihood when `alpha_u[k]` moves.
///
/// * `block` - responder block sums of this individual
/// * `total_cells` - N_s + N_u of this individual
/// * `in_block` - whether `k` is in the responder block
/// * `n_s`, `n_u` - counts of category `k`
pub fn alpha_u_log_ratio(
    prop: &BaselineProposal,
    block: &ResponderBlock,
    total_cells: f64,
    in_block: bool,
    n_s: f64,
    n_u: f64,
) -> f64 {
    let (old, new) = (prop.old, prop.new);

    let shared = (ln_gamma(prop.total_new) - ln_gamma(prop.total_old))
        - (ln_gamma(prop.total_new + total_cells) - ln_gamma(prop.total_old + total_cells));

    if in_block {
        let sum_old = block.alpha_u;
        let sum_new = block.alpha_u - old + new;
        let merged = block.stim + block.unstim;
        shared
            + (ln_gamma(sum_new + merged) - ln_gamma(sum_old + merged))
            - (ln_gamma(sum_new + block.unstim) - ln_gamma(sum_old + block.unstim))
            + (ln_gamma(new + n_u) - ln_gamma(new))
            - (ln_gamma(old + n_u) - ln_gamma(old))
    } else {
        shared + (ln_gamma(new + n_u + n_s) - ln_gamma(new))
            - (ln_gamma(old + n_u + n_s) - ln_gamma(old))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn example() -> (Array1<f64>, Array1<f64>, Array1<f64>, Array1<f64>) {
        let n_s = array![30.0, 4.0, 0.0, 12.0, 900.0];
        let n_u = array![3.0, 5.0, 1.0, 10.0, 1100.0];
        let alpha_s = array![2.0, 0.7, 1.5, 3.0, 100.0];
        let alpha_u = array![1.0, 2.5, 0.3, 4.0, 150.0];
        (n_s, n_u, alpha_s, alpha_u)
    }

    #[test]
    fn beta_binomial_special_case() {
        // BetaBinomial(k=2 | n=3, a=1, b=1) = 1/4
        let x = array![2.0, 1.0];
        let alpha = array![1.0, 1.0];
        let llik = dirichlet_multinomial_log_likelihood(x.view(), alpha.view());
        assert_abs_diff_eq!(llik, 0.25f64.ln(), epsilon = 1e-10);
    }

    #[test]
    fn probabilities_sum_to_one() {
        let alpha = array![0.5, 2.0, 1.5];
        let n = 4;
        let mut total = 0.0;
        for a in 0..=n {
            for b in 0..=(n - a) {
                let x = array![a as f64, b as f64, (n - a - b) as f64];
                total += dirichlet_multinomial_log_likelihood(x.view(), alpha.view()).exp();
            }
        }
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn ratio_matches_kernel_difference() {
        let x = array![10.0, 0.0, 3.0, 250.0];
        let old = array![1.0, 2.0, 0.5, 80.0];
        let mut new = old.clone();
        new[2] = 0.9;

        let expected = dirichlet_multinomial_log_kernel(x.view(), new.view())
            - dirichlet_multinomial_log_kernel(x.view(), old.view());
        let ratio = dirichlet_multinomial_log_ratio(x.view(), new.view(), old.view());
        assert_abs_diff_eq!(ratio, expected, epsilon = 1e-9);

        let coef_free = dirichlet_multinomial_log_likelihood(x.view(), new.view())
            - dirichlet_multinomial_log_likelihood(x.view(), old.view());
        assert_abs_diff_eq!(ratio, coef_free, epsilon = 1e-9);
    }

    /// The closed form must agree with the three-block decomposition.
    #[test]
    fn closed_form_matches_block_decomposition() {
        let (n_s, n_u, alpha_s, alpha_u) = example();
        let gamma = array![1u8, 0, 0, 1];
        let kk = n_s.len();

        let a: Vec<usize> = (0..kk).filter(|&k| in_responder_block(gamma.view(), k)).collect();
        let b: Vec<usize> = (0..kk).filter(|&k| !in_responder_block(gamma.view(), k)).collect();

        let mut x_shared: Vec<f64> = b.iter().map(|&k| n_s[k] + n_u[k]).collect();
        let mut a_shared: Vec<f64> = b.iter().map(|&k| alpha_u[k]).collect();
        x_shared.push(a.iter().map(|&k| n_s[k] + n_u[k]).sum());
        a_shared.push(a.iter().map(|&k| alpha_u[k]).sum());

        let pick = |v: &Array1<f64>| Array1::from_iter(a.iter().map(|&k| v[k]));

        let expected = dirichlet_multinomial_log_kernel(
            Array1::from(x_shared).view(),
            Array1::from(a_shared).view(),
        ) + dirichlet_multinomial_log_kernel(pick(&n_u).view(), pick(&alpha_u).view())
            + dirichlet_multinomial_log_kernel(pick(&n_s).view(), pick(&alpha_s).view());

        let llik = individual_log_likelihood(
            n_s.view(),
            n_u.view(),
            gamma.view(),
            alpha_s.view(),
            alpha_u.view(),
        );
        assert_abs_diff_eq!(llik, expected, epsilon = 1e-8);
    }

    #[test]
    fn toggle_matches_brute_force() {
        let (n_s, n_u, alpha_s, alpha_u) = example();
        let gamma = array![1u8, 0, 1, 0];

        for k in 0..gamma.len() {
            let mut on = gamma.clone();
            on[k] = 1;
            let mut off = gamma.clone();
            off[k] = 0;

            let llik = |g: &Array1<u8>| {
                individual_log_likelihood(
                    n_s.view(),
                    n_u.view(),
                    g.view(),
                    alpha_s.view(),
                    alpha_u.view(),
                )
            };
            let expected = llik(&on) - llik(&off);

            let block = ResponderBlock::collect(
                n_s.view(),
                n_u.view(),
                off.view(),
                alpha_s.view(),
                alpha_u.view(),
            );
            let delta = toggle_log_ratio(&block, n_s[k], n_u[k], alpha_s[k], alpha_u[k]);
            assert_abs_diff_eq!(delta, expected, epsilon = 1e-8);
        }
    }

    #[test]
    fn alpha_s_ratio_matches_brute_force() {
        let (n_s, n_u, alpha_s, alpha_u) = example();
        let gamma = array![1u8, 0, 0, 1];
        let block = ResponderBlock::collect(
            n_s.view(),
            n_u.view(),
            gamma.view(),
            alpha_s.view(),
            alpha_u.view(),
        );

        for k in [0usize, 3, 4] {
            let mut proposed = alpha_s.clone();
            proposed[k] *= 1.7;
            let expected = individual_log_likelihood(
                n_s.view(),
                n_u.view(),
                gamma.view(),
                proposed.view(),
                alpha_u.view(),
            ) - individual_log_likelihood(
                n_s.view(),
                n_u.view(),
                gamma.view(),
                alpha_s.view(),
                alpha_u.view(),
            );
            let delta = alpha_s_log_ratio(&block, n_s[k], alpha_s[k], proposed[k]);
            assert_abs_diff_eq!(delta, expected, epsilon = 1e-8);
        }
    }

    #[test]
    fn alpha_u_ratio_matches_brute_force() {
        let (n_s, n_u, alpha_s, alpha_u) = example();
        let gamma = array![1u8, 0, 0, 1];
        let block = ResponderBlock::collect(
            n_s.view(),
            n_u.view(),
            gamma.view(),
            alpha_s.view(),
            alpha_u.view(),
        );
        let total_cells = n_s.sum() + n_u.sum();

        for k in 0..n_s.len() {
            let mut proposed = alpha_u.clone();
            proposed[k] *= 0.6;
            let expected = individual_log_likelihood(
                n_s.view(),
                n_u.view(),
                gamma.view(),
                alpha_s.view(),
                proposed.view(),
            ) - individual_log_likelihood(
                n_s.view(),
                n_u.view(),
                gamma.view(),
                alpha_s.view(),
                alpha_u.view(),
            );
            let prop = BaselineProposal {
                total_old: alpha_u.sum(),
                total_new: proposed.sum(),
                old: alpha_u[k],
                new: proposed[k],
            };
            let delta = alpha_u_log_ratio(
                &prop,
                &block,
                total_cells,
                in_responder_block(gamma.view(), k),
                n_s[k],
                n_u[k],
            );
            assert_abs_diff_eq!(delta, expected, epsilon = 1e-8);
        }
    }
}

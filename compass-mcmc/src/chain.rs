use ndarray::prelude::*;
use serde::Serialize;

/// Concentration vectors recorded at every iteration.
#[derive(Debug, Clone, Default)]
pub struct ConcentrationTrace {
    pub samples: Vec<Array1<f64>>,
}

impl ConcentrationTrace {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            samples: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, alpha: &Array1<f64>) {
        self.samples.push(alpha.clone());
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    /// Element-wise posterior mean across samples.
    pub fn posterior_mean(&self) -> Vec<f64> {
        let n = self.n_samples();
        if n == 0 {
            return vec![];
        }
        let mut mean = vec![0.0f64; self.samples[0].len()];
        for sample in &self.samples {
            for (m, &v) in mean.iter_mut().zip(sample.iter()) {
                *m += v;
            }
        }
        let inv_n = 1.0 / n as f64;
        for m in &mut mean {
            *m *= inv_n;
        }
        mean
    }

    /// Element-wise posterior variance across samples.
    pub fn posterior_variance(&self) -> Vec<f64> {
        let n = self.n_samples();
        if n < 2 {
            return vec![];
        }
        let mean = self.posterior_mean();
        let mut var = vec![0.0f64; mean.len()];
        for sample in &self.samples {
            for ((v, &s), &m) in var.iter_mut().zip(sample.iter()).zip(mean.iter()) {
                *v += (s - m) * (s - m);
            }
        }
        let inv = 1.0 / (n - 1) as f64;
        for v in &mut var {
            *v *= inv;
        }
        var
    }

    /// Element-wise quantile (0 <= q <= 1) across samples.
    pub fn quantile(&self, q: f64) -> Vec<f64> {
        let n = self.n_samples();
        if n == 0 {
            return vec![];
        }
        let d = self.samples[0].len();
        let idx = (q * (n - 1) as f64).clamp(0.0, (n - 1) as f64);
        let lo = idx.floor() as usize;
        let hi = idx.ceil() as usize;

        (0..d)
            .map(|j| {
                let mut vals: Vec<f64> = self.samples.iter().map(|s| s[j]).collect();
                vals.sort_unstable_by(|a, b| a.total_cmp(b));
                if lo == hi {
                    vals[lo]
                } else {
                    let frac = idx - lo as f64;
                    vals[lo] * (1.0 - frac) + vals[hi] * frac
                }
            })
            .collect()
    }
}

/// Responder indicators after every iteration: individual × category ×
/// iteration, residual excluded.
#[derive(Debug, Clone)]
pub struct GammaTrace {
    data: Array3<u8>,
}

impl GammaTrace {
    pub fn new(n_individuals: usize, n_responder_categories: usize, n_iterations: usize) -> Self {
        Self {
            data: Array3::zeros((n_individuals, n_responder_categories, n_iterations)),
        }
    }

    pub fn record(&mut self, t: usize, gamma: ArrayView2<u8>) {
        self.data.index_axis_mut(Axis(2), t).assign(&gamma);
    }

    pub fn num_individuals(&self) -> usize {
        self.data.dim().0
    }

    pub fn num_categories(&self) -> usize {
        self.data.dim().1
    }

    pub fn num_iterations(&self) -> usize {
        self.data.dim().2
    }

    /// category × iteration slice of one individual
    pub fn individual(&self, i: usize) -> ArrayView2<'_, u8> {
        self.data.index_axis(Axis(0), i)
    }

    /// individual × category state at iteration `t`
    pub fn iteration(&self, t: usize) -> ArrayView2<'_, u8> {
        self.data.index_axis(Axis(2), t)
    }

    pub fn data(&self) -> &Array3<u8> {
        &self.data
    }

    /// Posterior responder probability per individual and category
    pub fn posterior_mean(&self) -> Array2<f64> {
        let n = self.num_iterations().max(1) as f64;
        self.data.mapv(|x| x as f64).sum_axis(Axis(2)) / n
    }
}

/// Metropolis-Hastings proposal counts per category.
#[derive(Debug, Clone, Default)]
pub struct AcceptanceCounter {
    pub proposed: Vec<usize>,
    pub accepted: Vec<usize>,
}

impl AcceptanceCounter {
    pub fn new(n_categories: usize) -> Self {
        Self {
            proposed: vec![0; n_categories],
            accepted: vec![0; n_categories],
        }
    }

    pub fn record(&mut self, k: usize, accepted: bool) {
        self.proposed[k] += 1;
        if accepted {
            self.accepted[k] += 1;
        }
    }

    pub fn rates(&self) -> Vec<f64> {
        self.proposed
            .iter()
            .zip(self.accepted.iter())
            .map(|(&p, &a)| if p > 0 { a as f64 / p as f64 } else { 0.0 })
            .collect()
    }

    pub fn overall_rate(&self) -> f64 {
        let p: usize = self.proposed.iter().sum();
        let a: usize = self.accepted.iter().sum();
        if p > 0 {
            a as f64 / p as f64
        } else {
            0.0
        }
    }
}

/// Responder indicator draws and how many of them changed state.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlipCounter {
    pub visits: usize,
    pub flips: usize,
}

impl FlipCounter {
    pub fn record(&mut self, flipped: bool) {
        self.visits += 1;
        if flipped {
            self.flips += 1;
        }
    }

    pub fn rate(&self) -> f64 {
        if self.visits > 0 {
            self.flips as f64 / self.visits as f64
        } else {
            0.0
        }
    }
}

/// Per-replication diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct AcceptanceSummary {
    pub alpha_s: Vec<f64>,
    pub alpha_u: Vec<f64>,
    pub alpha_s_overall: f64,
    pub alpha_u_overall: f64,
    pub gamma_flip_rate: f64,
}

impl AcceptanceSummary {
    pub fn new(alpha_s: &AcceptanceCounter, alpha_u: &AcceptanceCounter, gamma: &FlipCounter) -> Self {
        Self {
            alpha_s: alpha_s.rates(),
            alpha_u: alpha_u.rates(),
            alpha_s_overall: alpha_s.overall_rate(),
            alpha_u_overall: alpha_u.overall_rate(),
            gamma_flip_rate: gamma.rate(),
        }
    }
}

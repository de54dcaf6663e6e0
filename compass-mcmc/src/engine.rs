//! Chain orchestration.
//!
//! The engine owns every piece of mutable chain state. One iteration
//! updates `alpha_s`, then `alpha_u`, then the responder matrix, in
//! that order. Only the last replication keeps its trace.

use crate::chain::*;
use crate::config::{McmcConfig, ReplicationPolicy};
use crate::data::{CategoriesMatrix, PairedCounts};
use crate::error::{invalid_config, Result};
use crate::hyper::HyperparameterSampler;
use crate::init::{initial_alphas, initial_responders};
use crate::responder::{ResponderMargins, ResponderSampler};

use indicatif::{ProgressBar, ProgressDrawTarget};
use log::{debug, info};
use ndarray::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

const LOG_EVERY: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Initializing,
    Sampling,
    ReplicationBoundary,
    Terminal,
}

/// Mutable state of one chain.
#[derive(Debug, Clone)]
pub struct ChainState {
    pub alpha_s: Array1<f64>,
    pub alpha_u: Array1<f64>,
    /// individual × (K-1)
    pub gamma: Array2<u8>,
    pub margins: ResponderMargins,
}

/// Acceptance bookkeeping of one replication.
#[derive(Debug, Clone)]
pub struct SweepCounters {
    pub alpha_s: AcceptanceCounter,
    pub alpha_u: AcceptanceCounter,
    pub gamma: FlipCounter,
}

impl SweepCounters {
    pub fn new(n_categories: usize) -> Self {
        Self {
            alpha_s: AcceptanceCounter::new(n_categories),
            alpha_u: AcceptanceCounter::new(n_categories),
            gamma: FlipCounter::default(),
        }
    }

    pub fn summary(&self) -> AcceptanceSummary {
        AcceptanceSummary::new(&self.alpha_s, &self.alpha_u, &self.gamma)
    }
}

struct RetainedTrace {
    gamma: GammaTrace,
    alpha_s: ConcentrationTrace,
    alpha_u: ConcentrationTrace,
}

struct ReplicationOutput {
    state: ChainState,
    acceptance: AcceptanceSummary,
    trace: Option<RetainedTrace>,
}

/// What survives a run.
#[derive(Debug, Clone)]
pub struct McmcFit {
    pub alpha_s: Array1<f64>,
    pub alpha_u: Array1<f64>,
    /// individual × (K-1) × iteration, last replication
    pub gamma_trace: GammaTrace,
    pub alpha_s_trace: ConcentrationTrace,
    pub alpha_u_trace: ConcentrationTrace,
    /// diagnostics of the retained replication
    pub acceptance: AcceptanceSummary,
    pub replication_acceptance: Vec<AcceptanceSummary>,
}

impl McmcFit {
    /// Posterior responder probability, individual × (K-1)
    pub fn responder_probability(&self) -> Array2<f64> {
        self.gamma_trace.posterior_mean()
    }
}

pub struct McmcEngine<'a> {
    data: &'a PairedCounts,
    config: McmcConfig,
    hyper_s: HyperparameterSampler,
    hyper_u: HyperparameterSampler,
    responder: ResponderSampler,
    phase: EnginePhase,
}

impl<'a> McmcEngine<'a> {
    /// Validate inputs and configuration before anything is sampled.
    pub fn new(
        data: &'a PairedCounts,
        categories: &CategoriesMatrix,
        config: McmcConfig,
    ) -> Result<Self> {
        config.validate()?;
        categories.check_counts(data)?;

        let hyper_s =
            HyperparameterSampler::new(config.lambda_s, config.proposal_s, config.schedule);
        let hyper_u =
            HyperparameterSampler::new(config.lambda_u, config.proposal_u, config.schedule);
        let responder = ResponderSampler::new(config.mixture, config.update);

        Ok(Self {
            data,
            config,
            hyper_s,
            hyper_u,
            responder,
            phase: EnginePhase::Initializing,
        })
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    pub fn config(&self) -> &McmcConfig {
        &self.config
    }

    fn transition(&mut self, next: EnginePhase) {
        debug!("{:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    pub fn initial_state(&self) -> ChainState {
        let (alpha_s, alpha_u) =
            initial_alphas(self.data.num_categories(), &self.config.alpha_init);
        let gamma = initial_responders(self.data, &self.config.init);
        let margins = ResponderMargins::from_state(gamma.view());
        ChainState {
            alpha_s,
            alpha_u,
            gamma,
            margins,
        }
    }

    /// One full iteration. Returns the number of responder flips.
    pub fn sweep(
        &self,
        state: &mut ChainState,
        iteration: usize,
        counters: &mut SweepCounters,
        rng: &mut impl Rng,
    ) -> Result<usize> {
        let ChainState {
            alpha_s,
            alpha_u,
            gamma,
            margins,
        } = state;

        self.hyper_s.update_alpha_s(
            alpha_s,
            alpha_u.view(),
            self.data,
            gamma.view(),
            iteration,
            &mut counters.alpha_s,
            rng,
        )?;

        self.hyper_u.update_alpha_u(
            alpha_u,
            alpha_s.view(),
            self.data,
            gamma.view(),
            iteration,
            &mut counters.alpha_u,
            rng,
        )?;

        let flips = self.responder.update(
            gamma,
            self.data,
            alpha_s.view(),
            alpha_u.view(),
            margins,
            &mut counters.gamma,
            rng,
        );

        Ok(flips)
    }

    fn run_replication(
        &self,
        mut state: ChainState,
        offset: usize,
        retain: bool,
        rng: &mut impl Rng,
        pb: &ProgressBar,
    ) -> Result<ReplicationOutput> {
        let niter = self.config.iterations;
        let (nn, kk1) = state.gamma.dim();
        let mut counters = SweepCounters::new(kk1 + 1);

        let mut trace = retain.then(|| RetainedTrace {
            gamma: GammaTrace::new(nn, kk1, niter),
            alpha_s: ConcentrationTrace::with_capacity(niter),
            alpha_u: ConcentrationTrace::with_capacity(niter),
        });

        for t in 0..niter {
            let flips = self.sweep(&mut state, offset + t, &mut counters, rng)?;

            if let Some(tr) = trace.as_mut() {
                tr.gamma.record(t, state.gamma.view());
                tr.alpha_s.push(&state.alpha_s);
                tr.alpha_u.push(&state.alpha_u);
            }

            if (t + 1) % LOG_EVERY == 0 {
                debug!(
                    "[{}] flips: {}, responders: {}, Σalpha_s: {:.3}, Σalpha_u: {:.3}",
                    offset + t + 1,
                    flips,
                    state.margins.mkstar(),
                    state.alpha_s.sum(),
                    state.alpha_u.sum()
                );
            }
            pb.inc(1);
        }

        let acceptance = counters.summary();
        Ok(ReplicationOutput {
            state,
            acceptance,
            trace,
        })
    }

    fn run_independent(&self, pb: &ProgressBar) -> Result<Vec<ReplicationOutput>> {
        let nrep = self.config.replications;
        (0..nrep)
            .into_par_iter()
            .map(|r| {
                let mut rng = SmallRng::seed_from_u64(self.config.seed.wrapping_add(r as u64));
                let state = self.initial_state();
                self.run_replication(state, 0, r + 1 == nrep, &mut rng, pb)
            })
            .collect()
    }

    fn run_continued(&mut self, pb: &ProgressBar) -> Result<Vec<ReplicationOutput>> {
        let nrep = self.config.replications;
        let mut rng = SmallRng::seed_from_u64(self.config.seed);
        let mut state = self.initial_state();
        let mut outputs = Vec::with_capacity(nrep);

        for r in 0..nrep {
            if r > 0 {
                self.transition(EnginePhase::ReplicationBoundary);
                self.transition(EnginePhase::Sampling);
            }
            let offset = r * self.config.iterations;
            let out = self.run_replication(state, offset, r + 1 == nrep, &mut rng, pb)?;
            state = out.state.clone();
            outputs.push(out);
        }
        Ok(outputs)
    }

    /// Run every replication and keep the last one.
    pub fn run(&mut self) -> Result<McmcFit> {
        let nrep = self.config.replications;
        let niter = self.config.iterations;

        info!(
            "{} individuals, {} categories; {} replication(s) × {} iterations",
            self.data.num_individuals(),
            self.data.num_categories(),
            nrep,
            niter
        );

        let pb = ProgressBar::new((nrep * niter) as u64);
        if !self.config.show_progress {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }

        self.transition(EnginePhase::Sampling);
        let outputs = match self.config.replication {
            ReplicationPolicy::Independent => self.run_independent(&pb)?,
            ReplicationPolicy::Continued => self.run_continued(&pb)?,
        };
        pb.finish_and_clear();
        self.transition(EnginePhase::ReplicationBoundary);

        for (r, out) in outputs.iter().enumerate() {
            info!(
                "replication {}/{}: alpha_s acceptance {:.3}, alpha_u acceptance {:.3}, gamma flips {:.4}",
                r + 1,
                nrep,
                out.acceptance.alpha_s_overall,
                out.acceptance.alpha_u_overall,
                out.acceptance.gamma_flip_rate
            );
        }

        let replication_acceptance: Vec<AcceptanceSummary> =
            outputs.iter().map(|o| o.acceptance.clone()).collect();

        let mut outputs = outputs;
        let Some(ReplicationOutput {
            state,
            acceptance,
            trace: Some(trace),
        }) = outputs.pop()
        else {
            return invalid_config("no replication retained a trace");
        };

        self.transition(EnginePhase::Terminal);

        Ok(McmcFit {
            alpha_s: state.alpha_s,
            alpha_u: state.alpha_u,
            gamma_trace: trace.gamma,
            alpha_s_trace: trace.alpha_s,
            alpha_u_trace: trace.alpha_u,
            acceptance,
            replication_acceptance,
        })
    }
}

/// Build an engine and run it to completion.
pub fn fit(
    data: &PairedCounts,
    categories: &CategoriesMatrix,
    config: McmcConfig,
) -> Result<McmcFit> {
    McmcEngine::new(data, categories, config)?.run()
}

use crate::common::*;
use crate::io::*;

use compass_mcmc::chain::AcceptanceSummary;
use compass_mcmc::*;

use clap::Parser;
use ndarray::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::Serialize;
use std::io::Write;

#[derive(Parser, Debug, Clone)]
pub struct FitArgs {
    /// stimulated counts: header `id<TAB>category...`, one row per
    /// individual (`.tsv` or `.tsv.gz`)
    #[arg(long, short = 's', required = true)]
    pub stim: Box<str>,

    /// unstimulated counts, same individuals and categories in the
    /// same order as `--stim`
    #[arg(long, short = 'u', required = true)]
    pub unstim: Box<str>,

    /// categories matrix: header `category<TAB>marker...`, one 0/1 row
    /// per category, residual (all-negative) category last
    #[arg(long, short = 'c', required = true)]
    pub categories: Box<str>,

    /// output header
    #[arg(long, short, required = true)]
    pub out: Box<str>,

    /// number of iterations per replication
    #[arg(long, short = 'i', default_value_t = 40_000)]
    pub iter: usize,

    /// number of replications; only the last one is kept
    #[arg(long, short = 'r', default_value_t = 8)]
    pub replications: usize,

    /// random seed
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// exponential prior rate on the stimulated concentration
    #[arg(long, default_value_t = 1e-3)]
    pub lambda_s: f64,

    /// exponential prior rate on the unstimulated concentration
    #[arg(long, default_value_t = 1e-3)]
    pub lambda_u: f64,

    /// wide log-scale proposal variance
    #[arg(long, default_value_t = 0.04)]
    pub var_wide: f64,

    /// narrow log-scale proposal variance
    #[arg(long, default_value_t = 0.0025)]
    pub var_narrow: f64,

    /// probability of the wide proposal (at the first iteration if adaptive)
    #[arg(long, default_value_t = 0.1)]
    pub p_wide: f64,

    /// iterations until the wide-proposal probability halves
    #[arg(long, default_value_t = 1000.0)]
    pub taper: f64,

    /// keep the wide-proposal probability constant
    #[arg(long, default_value_t = false)]
    pub fixed_variance: bool,

    /// hyperparameter pb1 in Beta(pb1, pb2) of the responder probability
    #[arg(long, default_value_t = 1.5)]
    pub pb1: f64,

    /// hyperparameter pb2 in Beta(pb1, pb2) of the responder probability
    #[arg(long, default_value_t = 1.5)]
    pub pb2: f64,

    /// refresh responder counts once per sweep rather than after every draw
    #[arg(long, default_value_t = false)]
    pub pooled: bool,

    /// start responders from a log odds-ratio lower bound
    #[arg(long, default_value_t = false)]
    pub init_fisher: bool,

    /// warm-start each replication from the previous one
    #[arg(long, default_value_t = false)]
    pub continued: bool,

    /// maximum number of threads
    #[arg(long, default_value_t = 16)]
    pub threads: usize,

    /// show progress bar
    #[arg(long, default_value_t = false)]
    pub progress: bool,

    /// verbosity
    #[arg(long, short)]
    pub verbose: bool,
}

impl FitArgs {
    pub fn mcmc_config(&self) -> McmcConfig {
        let scale = ProposalScale {
            wide: self.var_wide,
            narrow: self.var_narrow,
            p_wide: self.p_wide,
        };
        McmcConfig {
            iterations: self.iter,
            replications: self.replications,
            seed: self.seed,
            lambda_s: self.lambda_s,
            lambda_u: self.lambda_u,
            proposal_s: scale,
            proposal_u: scale,
            schedule: if self.fixed_variance {
                ProposalSchedule::Fixed
            } else {
                ProposalSchedule::Adaptive { taper: self.taper }
            },
            mixture: MixturePrior {
                pb1: self.pb1,
                pb2: self.pb2,
            },
            update: if self.pooled {
                UpdatePolicy::Pooled
            } else {
                UpdatePolicy::Individual
            },
            init: if self.init_fisher {
                InitPolicy::fisher()
            } else {
                InitPolicy::Default
            },
            replication: if self.continued {
                ReplicationPolicy::Continued
            } else {
                ReplicationPolicy::Independent
            },
            alpha_init: AlphaInit::default(),
            show_progress: self.progress,
        }
    }
}

#[derive(Serialize)]
struct FitSummary<'a> {
    config: &'a McmcConfig,
    individuals: &'a [Box<str>],
    categories: &'a [Box<str>],
    alpha_s: Vec<f64>,
    alpha_u: Vec<f64>,
    acceptance: &'a AcceptanceSummary,
    replication_acceptance: &'a [AcceptanceSummary],
}

pub fn run_fit(args: FitArgs) -> anyhow::Result<()> {
    if args.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let max_threads = num_cpus::get().min(args.threads.max(1));
    ThreadPoolBuilder::new()
        .num_threads(max_threads)
        .build_global()?;
    info!("will use {} threads", rayon::current_num_threads());

    fit_and_write(&args)
}

/// Read inputs, run the sampler, write every output under `args.out`
pub fn fit_and_write(args: &FitArgs) -> anyhow::Result<()> {
    let stim = read_count_tsv(&args.stim)?;
    let unstim = read_count_tsv(&args.unstim)?;
    let categories = read_categories_tsv(&args.categories)?;

    if stim.col_names != unstim.col_names {
        return Err(anyhow::anyhow!(
            "stimulated and unstimulated files list different categories"
        ));
    }
    if stim.row_names != unstim.row_names {
        return Err(anyhow::anyhow!(
            "stimulated and unstimulated files list different individuals"
        ));
    }
    if categories.category_names() != stim.col_names.as_slice() {
        return Err(anyhow::anyhow!(
            "count columns must match the categories matrix rows in order"
        ));
    }

    let individuals = stim.row_names;
    let category_names = stim.col_names;
    info!(
        "read {} individuals × {} categories ({} markers)",
        individuals.len(),
        category_names.len(),
        categories.num_markers()
    );

    let data = PairedCounts::new(CountMatrix::new(stim.data)?, CountMatrix::new(unstim.data)?)?;

    let config = args.mcmc_config();
    let mut engine = McmcEngine::new(&data, &categories, config.clone())?;
    let fit = engine.run()?;

    let acc = &fit.acceptance;
    if acc.alpha_s_overall < 0.05 || acc.alpha_u_overall < 0.05 {
        warn!(
            "low acceptance (alpha_s {:.3}, alpha_u {:.3}); consider smaller proposal variances",
            acc.alpha_s_overall, acc.alpha_u_overall
        );
    }

    info!("posterior predictive draws");
    let predictor = PosteriorPredictor::new(&fit, &data, &categories)?;
    let draws = predictor.predict_all(config.seed)?;
    let scores = ResponderSummary::from_trace(&fit.gamma_trace, &categories)?;

    let out: &str = &args.out;
    mkdir(out)?;

    let responder_names = &category_names[..category_names.len() - 1];
    let nn = individuals.len();
    let kk1 = responder_names.len();

    let alpha = ndarray::stack(Axis(1), &[fit.alpha_s.view(), fit.alpha_u.view()])?;
    write_named_tsv(
        &format!("{}.alpha.tsv", out),
        "category",
        &category_names,
        &["alpha_s".into(), "alpha_u".into()],
        alpha.view(),
    )?;

    write_named_tsv(
        &format!("{}.gamma.tsv", out),
        "id",
        &individuals,
        responder_names,
        scores.probability.view(),
    )?;

    let fs_pfs = ndarray::stack(
        Axis(1),
        &[scores.functionality.view(), scores.polyfunctionality.view()],
    )?;
    write_named_tsv(
        &format!("{}.scores.tsv", out),
        "id",
        &individuals,
        &["FS".into(), "PFS".into()],
        fs_pfs.view(),
    )?;

    let diff = Array2::from_shape_fn((nn, kk1), |(i, k)| draws[i].diff[k]);
    write_named_tsv(
        &format!("{}.diff.tsv", out),
        "id",
        &individuals,
        responder_names,
        diff.view(),
    )?;

    let logd = Array2::from_shape_fn((nn, kk1), |(i, k)| draws[i].logd[k]);
    write_named_tsv(
        &format!("{}.logd.tsv", out),
        "id",
        &individuals,
        responder_names,
        logd.view(),
    )?;

    let summary = FitSummary {
        config: &config,
        individuals: &individuals,
        categories: &category_names,
        alpha_s: fit.alpha_s.to_vec(),
        alpha_u: fit.alpha_u.to_vec(),
        acceptance: &fit.acceptance,
        replication_acceptance: &fit.replication_acceptance,
    };
    let mut buf = open_buf_writer(&format!("{}.fit.json", out))?;
    serde_json::to_writer_pretty(&mut buf, &summary)?;
    buf.flush()?;

    info!("done");
    Ok(())
}

use crate::common::*;
use crate::io::*;

use compass_mcmc::CategoriesMatrix;

use clap::Parser;
use ndarray::prelude::*;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Binomial, Distribution, Gamma, Uniform};

#[derive(Parser, Debug, Clone)]
pub struct SimArgs {
    /// number of individuals
    #[arg(short = 'n', long, default_value_t = 20)]
    pub n_indv: usize,

    /// number of markers; all 2^M combinations become categories
    #[arg(short = 'm', long, default_value_t = 3)]
    pub n_markers: usize,

    /// number of categories with a stimulation effect
    #[arg(short = 'a', long, default_value_t = 2)]
    pub n_responding: usize,

    /// probability that an individual responds in a responding category
    #[arg(long, default_value_t = 0.5)]
    pub response_rate: f64,

    /// fold increase of the responder concentration
    #[arg(long, default_value_t = 10.0)]
    pub effect: f64,

    /// baseline concentration of the residual category
    #[arg(long, default_value_t = 500.0)]
    pub residual_alpha: f64,

    /// number of cells per individual and condition
    #[arg(short, long, default_value_t = 10_000)]
    pub depth: u64,

    /// random seed
    #[arg(long, default_value_t = 42)]
    pub rseed: u64,

    /// output header
    #[arg(long, short, required = true)]
    pub out: Box<str>,

    /// verbosity
    #[arg(long, short)]
    pub verbose: bool,
}

pub struct SimOut {
    pub categories: CategoriesMatrix,
    pub stim: Array2<i64>,
    pub unstim: Array2<i64>,
    /// individual × (K-1)
    pub gamma: Array2<u8>,
    pub alpha_s: Array1<f64>,
    pub alpha_u: Array1<f64>,
}

fn sample_dirichlet(alpha: &[f64], rng: &mut impl Rng) -> anyhow::Result<Vec<f64>> {
    let mut x = Vec::with_capacity(alpha.len());
    for &a in alpha {
        x.push(Gamma::new(a, 1.0)?.sample(rng));
    }
    let tot: f64 = x.iter().sum();
    Ok(x.into_iter().map(|v| v / tot).collect())
}

/// sequential binomial draws
fn sample_multinomial(depth: u64, prob: &[f64], rng: &mut impl Rng) -> anyhow::Result<Vec<i64>> {
    let mut remaining = depth;
    let mut mass = 1.0;
    let mut counts = vec![0i64; prob.len()];
    let last = prob.len() - 1;

    for (k, &p) in prob.iter().enumerate() {
        if k == last || remaining == 0 {
            counts[k] = remaining as i64;
            remaining = 0;
            continue;
        }
        let q = if mass > 0.0 { (p / mass).clamp(0.0, 1.0) } else { 0.0 };
        let x = Binomial::new(remaining, q)?.sample(rng);
        counts[k] = x as i64;
        remaining -= x;
        mass -= p;
    }
    Ok(counts)
}

/// Draw paired counts from the responder mixture model.
///
/// `p_u ~ Dir(alpha_u)`; where `gamma = 0` the stimulated proportions
/// equal `p_u`, elsewhere (and in the residual) the remaining mass is
/// split by `Dir(alpha_s)`.
pub fn generate_compass_data(args: &SimArgs) -> anyhow::Result<SimOut> {
    let mm = args.n_markers;
    let nn = args.n_indv;
    if nn == 0 {
        return Err(anyhow::anyhow!("need at least one individual"));
    }
    if !(0.0..=1.0).contains(&args.response_rate) {
        return Err(anyhow::anyhow!("response rate must be in [0, 1]"));
    }

    let markers: Vec<Box<str>> = (1..=mm).map(|j| format!("M{}", j).into_boxed_str()).collect();
    let categories = CategoriesMatrix::full_design(markers)?;
    let kk = categories.num_categories();
    let kk1 = kk - 1;

    let mut rng = SmallRng::seed_from_u64(args.rseed);

    let runif = Uniform::new(1.0, 10.0)?;
    let mut alpha_u: Array1<f64> = (0..kk).map(|_| runif.sample(&mut rng)).collect();
    alpha_u[kk1] = args.residual_alpha;

    let mut order: Vec<usize> = (0..kk1).collect();
    order.shuffle(&mut rng);
    let responding = &order[..args.n_responding.min(kk1)];

    let mut alpha_s = alpha_u.clone();
    for &k in responding {
        alpha_s[k] *= args.effect;
    }
    info!("responding categories: {:?}", responding);

    let mut stim = Array2::<i64>::zeros((nn, kk));
    let mut unstim = Array2::<i64>::zeros((nn, kk));
    let mut gamma = Array2::<u8>::zeros((nn, kk1));

    for i in 0..nn {
        for &k in responding {
            if rng.random::<f64>() < args.response_rate {
                gamma[[i, k]] = 1;
            }
        }

        let p_u = sample_dirichlet(&alpha_u.to_vec(), &mut rng)?;

        let block: Vec<usize> = (0..kk).filter(|&k| k == kk1 || gamma[[i, k]] == 1).collect();
        let block_alpha: Vec<f64> = block.iter().map(|&k| alpha_s[k]).collect();
        let q = sample_dirichlet(&block_alpha, &mut rng)?;
        let free_mass: f64 = block.iter().map(|&k| p_u[k]).sum();

        let mut p_s = p_u.clone();
        for (&k, &qk) in block.iter().zip(q.iter()) {
            p_s[k] = free_mass * qk;
        }

        let n_u = sample_multinomial(args.depth, &p_u, &mut rng)?;
        let n_s = sample_multinomial(args.depth, &p_s, &mut rng)?;
        unstim.row_mut(i).assign(&Array1::from(n_u));
        stim.row_mut(i).assign(&Array1::from(n_s));
    }

    Ok(SimOut {
        categories,
        stim,
        unstim,
        gamma,
        alpha_s,
        alpha_u,
    })
}

pub fn run_sim_compass_data(args: SimArgs) -> anyhow::Result<()> {
    if args.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    write_sim_compass_data(&args)
}

/// Simulate and write `{out}.stim.tsv.gz`, `{out}.unstim.tsv.gz`,
/// `{out}.categories.tsv` and the true parameters
pub fn write_sim_compass_data(args: &SimArgs) -> anyhow::Result<()> {
    info!("simulating {} individuals...", args.n_indv);
    let sim = generate_compass_data(args)?;
    info!("successfully simulated");

    let out: &str = &args.out;
    mkdir(out)?;

    let individuals: Vec<Box<str>> = (0..args.n_indv).map(|i| format!("indv{}", i).into_boxed_str()).collect();
    let cat_names = sim.categories.category_names();
    let kk1 = cat_names.len() - 1;

    write_named_tsv(
        &format!("{}.stim.tsv.gz", out),
        "id",
        &individuals,
        cat_names,
        sim.stim.view(),
    )?;
    write_named_tsv(
        &format!("{}.unstim.tsv.gz", out),
        "id",
        &individuals,
        cat_names,
        sim.unstim.view(),
    )?;
    write_categories_tsv(&format!("{}.categories.tsv", out), &sim.categories)?;
    write_named_tsv(
        &format!("{}.true_gamma.tsv", out),
        "id",
        &individuals,
        &cat_names[..kk1],
        sim.gamma.view(),
    )?;

    let alpha = ndarray::stack(Axis(1), &[sim.alpha_s.view(), sim.alpha_u.view()])?;
    write_named_tsv(
        &format!("{}.true_alpha.tsv", out),
        "category",
        cat_names,
        &["alpha_s".into(), "alpha_u".into()],
        alpha.view(),
    )?;

    info!("wrote {}.*", out);
    Ok(())
}

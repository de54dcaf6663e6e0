//! Responder mixture model for paired stimulated/unstimulated cell counts.
//!
//! Every individual contributes a row of category counts under both
//! conditions. Unstimulated proportions follow `Dir(alpha_u)`; in the
//! categories where the individual responds (`gamma = 1`, plus the
//! residual) the stimulated proportions are redrawn from `Dir(alpha_s)`
//! restricted to the remaining mass, elsewhere they equal the
//! unstimulated ones. Proportions are integrated out, leaving a
//! closed-form Dirichlet-multinomial likelihood over `(alpha_s,
//! alpha_u, gamma)`.
//!
//! # Inference
//!
//! Metropolis-Hastings on log concentrations, a collapsed Gibbs sweep
//! over the responder indicators, replications with deterministic
//! seeds, and posterior predictive proportions from the retained trace.
//!
//! # References
//!
//! Lin, Finak et al. (2015). "COMPASS identifies T-cell subsets
//! correlated with clinical outcomes." Nature Biotechnology 33, 610-616.

/// Error type shared by every module
pub mod error;

/// Count matrices and the categories design
pub mod data;

/// Dirichlet-multinomial log-likelihoods and their incremental ratios
pub mod likelihood;

/// Sampler settings
pub mod config;

/// Traces and acceptance diagnostics
pub mod chain;

/// Metropolis-Hastings update of the concentration vectors
pub mod hyper;

/// Gibbs update of the responder indicators
pub mod responder;

/// Starting values
pub mod init;

/// Replications and the per-iteration update order
pub mod engine;

/// Posterior predictive proportions and responder scores
pub mod posterior;

pub use config::*;
pub use data::{CategoriesMatrix, CountMatrix, PairedCounts};
pub use engine::{fit, EnginePhase, McmcEngine, McmcFit};
pub use error::{CompassError, Result};
pub use posterior::{PosteriorDraw, PosteriorPredictor, ResponderSummary};

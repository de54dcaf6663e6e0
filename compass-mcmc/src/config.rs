use crate::error::{invalid_config, Result};
use serde::Serialize;

/// Upper bound on any log-scale proposal variance. Beyond this a single
/// random-walk step can push a concentration out of floating-point range.
pub const MAX_PROPOSAL_VARIANCE: f64 = 4.0;

/// Two log-scale random-walk variances mixed with probability `p_wide`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ProposalScale {
    pub wide: f64,
    pub narrow: f64,
    pub p_wide: f64,
}

impl Default for ProposalScale {
    fn default() -> Self {
        Self {
            wide: 0.04,
            narrow: 0.0025,
            p_wide: 0.1,
        }
    }
}

impl ProposalScale {
    /// Same variance for every step
    pub fn single(var: f64) -> Self {
        Self {
            wide: var,
            narrow: var,
            p_wide: 0.0,
        }
    }
}

/// How the hyperparameter samplers pick the proposal variance.
#[derive(Debug, Clone, Copy, Serialize)]
pub enum ProposalSchedule {
    /// plain Metropolis-Hastings with a constant wide/narrow mixture
    Fixed,
    /// the wide variance is chosen with probability
    /// `p_wide * taper / (taper + t)` at iteration `t`
    Adaptive { taper: f64 },
}

/// Beta(pb1, pb2) prior on each category's responder probability.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MixturePrior {
    pub pb1: f64,
    pub pb2: f64,
}

impl Default for MixturePrior {
    fn default() -> Self {
        Self { pb1: 1.5, pb2: 1.5 }
    }
}

/// When the responder counts of the mixing prior are refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpdatePolicy {
    /// after every single indicator draw
    Individual,
    /// once per sweep
    Pooled,
}

/// Starting responder matrix.
#[derive(Debug, Clone, Copy, Serialize)]
pub enum InitPolicy {
    /// responder unless the unstimulated proportion is at least as large
    Default,
    /// responder if the one-sided lower confidence bound of the log odds
    /// ratio (stimulated vs. unstimulated) exceeds `threshold`
    Fisher { threshold: f64, z: f64 },
}

impl InitPolicy {
    /// Lower 95% bound must be positive
    pub fn fisher() -> Self {
        InitPolicy::Fisher {
            threshold: 0.0,
            z: 1.645,
        }
    }
}

/// What happens between replications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReplicationPolicy {
    /// fresh initialization with seed `seed + r`; may run concurrently
    Independent,
    /// warm start from the previous replication's final state
    Continued,
}

/// Starting concentrations: `value` everywhere but the residual.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AlphaInit {
    pub value: f64,
    pub residual_s: f64,
    pub residual_u: f64,
}

impl Default for AlphaInit {
    fn default() -> Self {
        Self {
            value: 10.0,
            residual_s: 100.0,
            residual_u: 150.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct McmcConfig {
    pub iterations: usize,
    pub replications: usize,
    pub seed: u64,
    /// Exponential prior rate on `alpha_s`
    pub lambda_s: f64,
    /// Exponential prior rate on `alpha_u`
    pub lambda_u: f64,
    pub proposal_s: ProposalScale,
    pub proposal_u: ProposalScale,
    pub schedule: ProposalSchedule,
    pub mixture: MixturePrior,
    pub update: UpdatePolicy,
    pub init: InitPolicy,
    pub replication: ReplicationPolicy,
    pub alpha_init: AlphaInit,
    pub show_progress: bool,
}

impl Default for McmcConfig {
    fn default() -> Self {
        Self {
            iterations: 40_000,
            replications: 8,
            seed: 42,
            lambda_s: 1e-3,
            lambda_u: 1e-3,
            proposal_s: ProposalScale::default(),
            proposal_u: ProposalScale::default(),
            schedule: ProposalSchedule::Adaptive { taper: 1_000.0 },
            mixture: MixturePrior::default(),
            update: UpdatePolicy::Individual,
            init: InitPolicy::Default,
            replication: ReplicationPolicy::Independent,
            alpha_init: AlphaInit::default(),
            show_progress: false,
        }
    }
}

impl McmcConfig {
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return invalid_config("iterations must be positive");
        }
        if self.replications == 0 {
            return invalid_config("replications must be positive");
        }
        positive("lambda_s", self.lambda_s)?;
        positive("lambda_u", self.lambda_u)?;

        for (name, scale) in [("alpha_s", &self.proposal_s), ("alpha_u", &self.proposal_u)] {
            for var in [scale.wide, scale.narrow] {
                if !(var > 0.0 && var <= MAX_PROPOSAL_VARIANCE) {
                    return invalid_config(format!(
                        "{} proposal variance {} outside (0, {}]",
                        name, var, MAX_PROPOSAL_VARIANCE
                    ));
                }
            }
            if !(0.0..=1.0).contains(&scale.p_wide) {
                return invalid_config(format!(
                    "{} wide-proposal probability {} outside [0, 1]",
                    name, scale.p_wide
                ));
            }
        }

        if let ProposalSchedule::Adaptive { taper } = self.schedule {
            positive("taper", taper)?;
        }

        positive("pb1", self.mixture.pb1)?;
        positive("pb2", self.mixture.pb2)?;

        if let InitPolicy::Fisher { threshold, z } = self.init {
            if !threshold.is_finite() || !(z >= 0.0 && z.is_finite()) {
                return invalid_config(format!(
                    "bad log-odds initialization threshold {} / z {}",
                    threshold, z
                ));
            }
        }

        positive("initial alpha", self.alpha_init.value)?;
        positive("initial residual alpha_s", self.alpha_init.residual_s)?;
        positive("initial residual alpha_u", self.alpha_init.residual_u)?;
        Ok(())
    }
}

fn positive(name: &str, x: f64) -> Result<()> {
    if x > 0.0 && x.is_finite() {
        Ok(())
    } else {
        invalid_config(format!("{} must be positive and finite, got {}", name, x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(McmcConfig::default().validate().is_ok());
    }

    #[test]
    fn proposal_variance_is_bounded() {
        let mut config = McmcConfig::default();
        config.proposal_s.wide = 10.0;
        assert!(config.validate().is_err());

        config.proposal_s.wide = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_iterations_rejected() {
        let config = McmcConfig {
            iterations: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn nonpositive_beta_prior_rejected() {
        let config = McmcConfig {
            mixture: MixturePrior { pb1: 0.0, pb2: 1.0 },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

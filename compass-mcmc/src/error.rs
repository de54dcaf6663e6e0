use thiserror::Error;

/// Errors raised by the responder mixture sampler.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompassError {
    /// Count or categories data rejected before sampling starts
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Sampler settings out of their admissible range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A concentration parameter under/overflowed during a proposal
    #[error("numeric degeneracy at category {category}: concentration = {value}")]
    NumericDegeneracy { category: usize, value: f64 },
}

pub type Result<T> = std::result::Result<T, CompassError>;

pub(crate) fn invalid_input<T>(msg: impl Into<String>) -> Result<T> {
    Err(CompassError::InvalidInput(msg.into()))
}

pub(crate) fn invalid_config<T>(msg: impl Into<String>) -> Result<T> {
    Err(CompassError::InvalidConfig(msg.into()))
}

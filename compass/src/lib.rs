mod common;

/// Tab-separated count and categories tables, optionally gzipped
pub mod io;

/// `compass fit`
pub mod run_fit;

/// `compass simulate`
pub mod run_sim;

//! # Errors
//!
//! $$
//! \text{InputError} \to \text{caller},\qquad \text{Infeasible} \to \texttt{SolveOutcome}
//! $$
//!
//! Errors that surface to the caller. Numerical trouble and solver failures are
//! absorbed internally and only show up as an infeasibility report.

use thiserror::Error;

/// Errors raised by estimators, clustering and optimizers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PortfolioError {
  /// Malformed input (non-finite values, duplicate names, too few rows, ...).
  #[error("invalid input: {0}")]
  InvalidInput(String),
  /// Two inputs disagree on a dimension.
  #[error("dimension mismatch in {context}: expected {expected}, found {found}")]
  DimensionMismatch {
    context: &'static str,
    expected: usize,
    found: usize,
  },
  /// A method, measure or model name could not be parsed.
  #[error("unsupported method: {0}")]
  UnsupportedMethod(String),
  /// A parameter required by the requested path was not supplied.
  #[error("missing parameter: {0}")]
  MissingParameter(&'static str),
  /// A session artifact was read before it was estimated.
  #[error("{0} has not been estimated")]
  NotEstimated(&'static str),
  /// Linear algebra failed with no fallback left.
  #[error("numerical failure: {0}")]
  Numerical(String),
}

pub type Result<T> = std::result::Result<T, PortfolioError>;

impl PortfolioError {
  pub(crate) fn invalid(msg: impl Into<String>) -> Self {
    Self::InvalidInput(msg.into())
  }

  pub(crate) fn mismatch(context: &'static str, expected: usize, found: usize) -> Self {
    Self::DimensionMismatch {
      context,
      expected,
      found,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn display_includes_context() {
    let err = PortfolioError::mismatch("weights", 3, 2);
    assert_eq!(
      err.to_string(),
      "dimension mismatch in weights: expected 3, found 2"
    );
  }

  #[test]
  fn is_std_error() {
    let err: Box<dyn std::error::Error> = Box::new(PortfolioError::MissingParameter("factors"));
    assert!(err.to_string().contains("factors"));
  }
}

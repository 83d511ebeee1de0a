//! # mesokin-core
//!
//! Shared types for the mesokin stochastic-kinetics workspace.
//!
//! ## Analysis pipeline
//!
//! | Stage | Crate | Output |
//! |-------|-------|--------|
//! | Model | mesokin-ast | reaction network |
//! | Transform | mesokin-trafo | reduced network |
//! | Expansion | mesokin-sse | RE/LNA/EMRE/IOS ODE systems |
//! | Evaluation | mesokin-eval | compiled update vectors |
//! | Sampling | mesokin-ssa | ensemble trajectories |
//! | Analysis | mesokin-solve | steady states, parameter scans |
//!
//! This crate holds what every stage shares: the error type, scalar
//! aliases, physical constants and the right-hand-side contract consumed
//! by the ODE steppers.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Common errors raised by the analysis pipeline.
///
/// Every variant carries a message naming the offending definition or
/// operation; numeric failures also name the symptom (e.g. the leading
/// Jacobian eigenvalue).
#[derive(Debug, Error)]
pub enum MesokinError {
    /// The network uses a construct outside the supported model fragment.
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// The network is internally inconsistent.
    #[error("Semantic error: {0}")]
    SemanticError(String),

    /// The expression compiler could not translate an expression.
    #[error("Compile error: {0}")]
    CompileError(String),

    /// A numerical analysis failed at runtime.
    #[error("Numeric error: {0}")]
    NumericError(String),

    /// An internal invariant was violated. Always fatal.
    #[error("Internal error: {0}")]
    InternalError(String),

    /// Model file could not be parsed.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// IO failure while reading or writing a model file.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MesokinError>;

/// Simulated time.
pub type Time = f64;

/// Concentration (substance per volume).
pub type Concentration = f64;

/// State vector for ODE systems.
pub type StateVector = Array1<f64>;

/// Avogadro's number (1/mol).
pub const AVOGADRO: f64 = 6.02214179e23;

/// ODE system trait: the handoff between the symbolic models and the
/// numerical steppers.
pub trait OdeSystem {
    /// System dimension.
    fn dimension(&self) -> usize;

    /// Evaluate the right-hand side: dx/dt = f(t, x), written into `dx`.
    fn evaluate(&mut self, x: &StateVector, t: Time, dx: &mut StateVector) -> Result<()>;

    /// Evaluate the Jacobian of the right-hand side at `x` into `jac`.
    ///
    /// The default reports the Jacobian as unavailable; steppers that
    /// need one must be handed a system that implements it.
    fn evaluate_jacobian(
        &mut self,
        _x: &StateVector,
        _t: Time,
        _jac: &mut Array2<f64>,
    ) -> Result<()> {
        Err(MesokinError::InternalError(
            "system does not provide a Jacobian".to_string(),
        ))
    }
}

/// Time series of one observable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Time points
    pub time: Vec<Time>,
    /// Values at each time point
    pub values: Vec<f64>,
    /// Observable name
    pub name: String,
}

impl TimeSeries {
    pub fn new(name: &str) -> Self {
        Self {
            time: Vec::new(),
            values: Vec::new(),
            name: name.to_string(),
        }
    }

    pub fn push(&mut self, t: Time, v: f64) {
        self.time.push(t);
        self.values.push(v);
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
}

/// Number of entries in the packed lower triangle of an `n`-square
/// symmetric matrix.
pub fn packed_len(n: usize) -> usize {
    n * (n + 1) / 2
}

/// Number of entries in the fully symmetric rank-3 packing of dimension
/// `n` (indices `i >= j >= k`).
pub fn packed3_len(n: usize) -> usize {
    n * (n + 1) * (n + 2) / 6
}

/// Flat offset of `(i, j)` with `i >= j` in colexicographic packing.
pub fn packed_index(i: usize, j: usize) -> usize {
    debug_assert!(i >= j);
    i * (i + 1) / 2 + j
}

/// Flat offset of `(i, j, k)` with `i >= j >= k` in colexicographic
/// packing.
pub fn packed3_index(i: usize, j: usize, k: usize) -> usize {
    debug_assert!(i >= j && j >= k);
    i * (i + 1) * (i + 2) / 6 + j * (j + 1) / 2 + k
}

/// Sort three indices descending and return their packed offset.
pub fn packed3_index_any(i: usize, j: usize, k: usize) -> usize {
    let mut v = [i, j, k];
    v.sort_unstable_by(|a, b| b.cmp(a));
    packed3_index(v[0], v[1], v[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_indexing() {
        // (0,0) (1,0) (1,1) (2,0) (2,1) (2,2)
        assert_eq!(packed_index(0, 0), 0);
        assert_eq!(packed_index(1, 0), 1);
        assert_eq!(packed_index(1, 1), 2);
        assert_eq!(packed_index(2, 2), 5);
        assert_eq!(packed_len(3), 6);
    }

    #[test]
    fn test_packed3_indexing() {
        let n = 4;
        let mut seen = vec![false; packed3_len(n)];
        for i in 0..n {
            for j in 0..=i {
                for k in 0..=j {
                    let idx = packed3_index(i, j, k);
                    assert!(!seen[idx]);
                    seen[idx] = true;
                    assert_eq!(packed3_index_any(k, i, j), idx);
                }
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_time_series() {
        let mut ts = TimeSeries::new("X");
        ts.push(0.0, 10.0);
        ts.push(0.1, 9.0);
        assert_eq!(ts.len(), 2);
    }
}

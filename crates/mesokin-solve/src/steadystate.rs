//! Steady-state analysis of the SSE hierarchy.
//!
//! The nonlinear rate-equation root is found by the damped Newton /
//! relaxation hybrid; every higher block of the expansion is then a
//! linear solve in its own unknowns: the coefficient matrix is the
//! derivative of the (linear) block update with all higher unknowns set
//! to zero — for the covariance block this is the packed form of the
//! Lyapunov system `J C + C J^T + B = 0`.

use crate::newton::{HybridSolver, SolverStatus};
use mesokin_core::{packed_len, MesokinError, OdeSystem, Result};
use mesokin_eval::bci::Bci;
use mesokin_eval::Engine;
use mesokin_expr::{Substitution, ValueMap};
use mesokin_sse::{CompiledSse, FullState, PreparedSse, SseModel};
use nalgebra::{Complex, DMatrix, DVector};
use ndarray::{Array1, Array2};
use std::collections::HashMap;
use std::marker::PhantomData;
use tracing::info;

/// Result of a steady-state analysis.
#[derive(Debug, Clone)]
pub struct SteadyState {
    /// The reduced SSE state at the fixed point.
    pub reduced: Array1<f64>,
    /// Observables in the original species order.
    pub full: FullState,
    /// Newton iterations spent on the rate-equation root.
    pub iterations: usize,
    /// Rate-equation Jacobian at the root.
    pub jacobian: Array2<f64>,
    /// Its eigenvalues; all real parts are strictly negative.
    pub eigenvalues: Vec<Complex<f64>>,
}

/// Steady-state driver over one SSE model.
pub struct SteadyStateAnalysis<E: Engine = Bci> {
    model: SseModel,
    pub max_iterations: usize,
    pub epsilon: f64,
    pub max_time: f64,
    pub min_time_step: f64,
    // fn-pointer phantom keeps the driver Send + Sync for any engine
    _engine: PhantomData<fn() -> E>,
}

// manual impl: the engine marker itself has no state to clone
impl<E: Engine> Clone for SteadyStateAnalysis<E> {
    fn clone(&self) -> Self {
        Self {
            model: self.model.clone(),
            max_iterations: self.max_iterations,
            epsilon: self.epsilon,
            max_time: self.max_time,
            min_time_step: self.min_time_step,
            _engine: PhantomData,
        }
    }
}

impl<E: Engine> SteadyStateAnalysis<E> {
    pub fn new(model: SseModel) -> Self {
        Self {
            model,
            max_iterations: 100,
            epsilon: 1e-9,
            max_time: 1e9,
            min_time_step: 1e-1,
            _engine: PhantomData,
        }
    }

    pub fn model(&self) -> &SseModel {
        &self.model
    }

    pub fn solve(&self) -> Result<SteadyState> {
        self.solve_with(&Substitution::new())
    }

    /// Solve with parameter overrides (used by scans).
    pub fn solve_with(&self, overrides: &Substitution) -> Result<SteadyState> {
        let prepared = self.model.prepare(overrides)?;
        let n = self.model.system().num_independent();
        let dim = prepared.dim;

        // the rate equations close over the first n state variables
        let re_prepared = PreparedSse {
            dim: n,
            update: prepared.update[..n].to_vec(),
            jacobian: prepared.jacobian[..n]
                .iter()
                .map(|row| row[..n].to_vec())
                .collect(),
            state_index: prepared
                .state_index
                .iter()
                .filter(|(_, &i)| i < n)
                .map(|(s, &i)| (*s, i))
                .collect::<HashMap<_, _>>(),
            initial_state: Array1::from_iter(prepared.initial_state.iter().take(n).copied()),
        };
        let mut re_system = CompiledSse::<E>::new(&re_prepared, 1)?;

        let mut conc = re_prepared.initial_state.clone();
        let mut hybrid = HybridSolver::new(n);
        hybrid.newton.params.max_iterations = self.max_iterations;
        hybrid.newton.params.epsilon = self.epsilon;

        let status = hybrid.solve(&mut re_system, &mut conc, self.max_time, self.min_time_step)?;
        let iterations = hybrid.newton.iterations();
        match status {
            SolverStatus::Success => {}
            SolverStatus::MaxIterationsReached => {
                return Err(MesokinError::NumericError(
                    "maximum iterations reached while solving for the steady state"
                        .to_string(),
                ))
            }
            SolverStatus::IterationFailed => {
                return Err(MesokinError::NumericError(
                    "line search failed while solving for the steady state".to_string(),
                ))
            }
        }
        info!(iterations, "rate-equation root found");

        if let Some(bad) = conc.iter().find(|v| **v < 0.0) {
            return Err(MesokinError::NumericError(format!(
                "negative steady-state concentration encountered ({})",
                bad
            )));
        }

        // stability of the deterministic fixed point
        let mut jacobian = Array2::zeros((n, n));
        re_system.evaluate_jacobian(&conc, 0.0, &mut jacobian)?;
        let m = DMatrix::from_row_iterator(n, n, jacobian.iter().copied());
        let eigenvalues: Vec<Complex<f64>> = m.complex_eigenvalues().iter().copied().collect();
        if let Some(unstable) = eigenvalues
            .iter()
            .filter(|e| e.re >= 0.0)
            .max_by(|a, b| a.re.partial_cmp(&b.re).unwrap())
        {
            return Err(MesokinError::NumericError(format!(
                "steady state is unstable; leading Jacobian eigenvalue {} + {}i",
                unstable.re, unstable.im
            )));
        }

        // successive linear solves for the expansion blocks
        let state_symbols = self.model.state_symbols();
        let mut values = ValueMap::new();
        for (i, sym) in state_symbols.iter().enumerate() {
            values.insert(*sym, if i < n { conc[i] } else { 0.0 });
        }
        if dim > n {
            let lna_len = packed_len(n);
            solve_linear_block(&prepared, state_symbols, &mut values, n, lna_len)?;
            let rest = dim - n - lna_len;
            if rest > 0 {
                solve_linear_block(&prepared, state_symbols, &mut values, n + lna_len, rest)?;
            }
        }

        let reduced = Array1::from_iter(state_symbols.iter().map(|s| values[s]));
        let full = self.model.full_state(&reduced, overrides)?;

        Ok(SteadyState {
            reduced,
            full,
            iterations,
            jacobian,
            eigenvalues,
        })
    }
}

/// Solve one linear expansion block: the unknowns are
/// `state[offset..offset+len]`, every lower block is already fixed in
/// `values` and every higher block is zero.
fn solve_linear_block(
    prepared: &PreparedSse,
    state_symbols: &[mesokin_expr::Symbol],
    values: &mut ValueMap,
    offset: usize,
    len: usize,
) -> Result<()> {
    let mut a = DVector::zeros(len);
    let mut b = DMatrix::zeros(len, len);
    for i in 0..len {
        let update = &prepared.update[offset + i];
        a[i] = update.eval(values)?;
        for j in 0..len {
            b[(i, j)] = prepared.jacobian[offset + i][offset + j].eval(values)?;
        }
    }

    let solution = b.full_piv_lu().solve(&(-&a)).ok_or_else(|| {
        MesokinError::NumericError(
            "singular coefficient matrix in an SSE steady-state block".to_string(),
        )
    })?;
    for i in 0..len {
        values.insert(state_symbols[offset + i], solution[i]);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mesokin_ast::fixtures;

    #[test]
    fn test_birth_death_re_steady_state() {
        let model = SseModel::re(&fixtures::birth_death(10.0, 1.0, 0.0)).unwrap();
        let analysis = SteadyStateAnalysis::<Bci>::new(model);
        let ss = analysis.solve().unwrap();
        assert_relative_eq!(ss.reduced[0], 10.0, max_relative = 1e-8);
        // stable fixed point with eigenvalue -gamma
        assert_eq!(ss.eigenvalues.len(), 1);
        assert_relative_eq!(ss.eigenvalues[0].re, -1.0, max_relative = 1e-8);
    }

    #[test]
    fn test_birth_death_lna_variance() {
        let model = SseModel::lna(&fixtures::birth_death(10.0, 1.0, 0.0)).unwrap();
        let analysis = SteadyStateAnalysis::<Bci>::new(model);
        let ss = analysis.solve().unwrap();
        // Poisson statistics: variance equals the mean, EMRE vanishes
        assert_relative_eq!(ss.reduced[0], 10.0, max_relative = 1e-8);
        assert_relative_eq!(ss.reduced[1], 10.0, max_relative = 1e-8);
        assert_relative_eq!(ss.reduced[2], 0.0, epsilon = 1e-9);
        let cov = ss.full.covariance.unwrap();
        assert_relative_eq!(cov[[0, 0]], 10.0, max_relative = 1e-8);
    }

    #[test]
    fn test_birth_death_ios_third_moment() {
        let model = SseModel::ios(&fixtures::birth_death(10.0, 1.0, 0.0)).unwrap();
        let analysis = SteadyStateAnalysis::<Bci>::new(model);
        let ss = analysis.solve().unwrap();
        // layout: [x, C, m, M, C', m']
        assert_relative_eq!(ss.reduced[3], 10.0, max_relative = 1e-7);
        assert_relative_eq!(ss.reduced[4], 0.0, epsilon = 1e-8);
        assert_relative_eq!(ss.reduced[5], 0.0, epsilon = 1e-8);
    }

    #[test]
    fn test_michaelis_menten_conserves_total_substrate() {
        let model = SseModel::re(&fixtures::michaelis_menten()).unwrap();
        let analysis = SteadyStateAnalysis::<Bci>::new(model);
        let ss = analysis.solve().unwrap();
        let c = &ss.full.concentrations;
        // S + ES + P = 100 to machine precision, E + ES = 10
        assert_relative_eq!(c[1] + c[2] + c[3], 100.0, max_relative = 1e-12);
        assert_relative_eq!(c[0] + c[2], 10.0, max_relative = 1e-12);
        // stable Jacobian
        for e in &ss.eigenvalues {
            assert!(e.re < 0.0);
        }
    }

    #[test]
    fn test_michaelis_menten_lna_runs() {
        let model = SseModel::lna(&fixtures::michaelis_menten()).unwrap();
        let analysis = SteadyStateAnalysis::<Bci>::new(model);
        let ss = analysis.solve().unwrap();
        let cov = ss.full.covariance.unwrap();
        // variances are non-negative and symmetric
        for i in 0..4 {
            assert!(cov[[i, i]] >= -1e-9);
            for j in 0..4 {
                assert_relative_eq!(cov[[i, j]], cov[[j, i]], epsilon = 1e-9);
            }
        }
    }
}

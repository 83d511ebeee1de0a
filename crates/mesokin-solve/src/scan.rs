//! Steady-state parameter scans.

use crate::steadystate::SteadyStateAnalysis;
use mesokin_core::{MesokinError, Result};
use mesokin_eval::Engine;
use mesokin_expr::{Expr, Substitution};
use ndarray::Array2;
use rayon::prelude::*;
use tracing::{debug, warn};

/// One parameter assignment of a scan.
pub type ParameterSet = Vec<(String, f64)>;

/// Sweeps the steady-state analysis over a list of parameter sets.
///
/// Sets are solved independently on a local thread pool; the symbolic
/// machinery is cloned per task, so results do not depend on the thread
/// count. A `NumericError` in one set yields a NaN-filled row and the
/// scan continues; every other error aborts the sweep.
pub struct ParameterScan<E: Engine> {
    analysis: SteadyStateAnalysis<E>,
    num_threads: usize,
}

impl<E: Engine> ParameterScan<E> {
    pub fn new(analysis: SteadyStateAnalysis<E>, num_threads: usize) -> Self {
        Self {
            analysis,
            num_threads: num_threads.max(1),
        }
    }

    /// Run the scan; one row of reduced steady-state coordinates per
    /// parameter set.
    pub fn scan(&self, sets: &[ParameterSet]) -> Result<Array2<f64>> {
        let dim = self.analysis.model().dimension();
        let symbols = self.analysis.model().system().model().symbols();

        // resolve identifiers once, before any parallel work
        let mut substitutions = Vec::with_capacity(sets.len());
        for set in sets {
            let mut map = Substitution::new();
            for (name, value) in set {
                let symbol = symbols.lookup(name).ok_or_else(|| {
                    MesokinError::SemanticError(format!("unknown scan parameter `{}`", name))
                })?;
                map.insert(symbol, Expr::num(*value));
            }
            substitutions.push(map);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_threads)
            .build()
            .map_err(|e| {
                MesokinError::InternalError(format!("cannot build thread pool: {}", e))
            })?;

        let rows: Vec<Result<Vec<f64>>> = pool.install(|| {
            substitutions
                .par_iter()
                .enumerate()
                .map(|(idx, overrides)| {
                    // the symbolic machinery is not shared across tasks
                    let analysis = self.analysis.clone();
                    match analysis.solve_with(overrides) {
                        Ok(ss) => {
                            debug!(set = idx, "scan point converged");
                            Ok(ss.reduced.to_vec())
                        }
                        Err(MesokinError::NumericError(msg)) => {
                            warn!(set = idx, %msg, "scan point failed; recording NaN");
                            Ok(vec![f64::NAN; dim])
                        }
                        Err(other) => Err(other),
                    }
                })
                .collect()
        });

        let mut result = Array2::zeros((sets.len(), dim));
        for (i, row) in rows.into_iter().enumerate() {
            for (j, v) in row?.into_iter().enumerate() {
                result[[i, j]] = v;
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesokin_ast::fixtures;
    use mesokin_eval::bci::Bci;
    use mesokin_sse::SseModel;

    fn mm_scan(num_threads: usize) -> Array2<f64> {
        let model = SseModel::lna(&fixtures::michaelis_menten()).unwrap();
        let scan = ParameterScan::<Bci>::new(SteadyStateAnalysis::new(model), num_threads);
        let sets: Vec<ParameterSet> = (0..8)
            .map(|i| vec![("k1".to_string(), 0.002 + 0.002 * i as f64)])
            .collect();
        scan.scan(&sets).unwrap()
    }

    #[test]
    fn test_scan_thread_count_non_interference() {
        let serial = mm_scan(1);
        let parallel = mm_scan(8);
        assert_eq!(serial.shape(), parallel.shape());
        for (a, b) in serial.iter().zip(parallel.iter()) {
            assert!(
                (a == b) || (a.is_nan() && b.is_nan()),
                "scan results differ between thread counts: {} vs {}",
                a,
                b
            );
        }
    }

    #[test]
    fn test_scan_failure_yields_nan_row() {
        let model = SseModel::re(&fixtures::birth_death(10.0, 1.0, 0.0)).unwrap();
        let scan = ParameterScan::<Bci>::new(SteadyStateAnalysis::new(model), 2);
        // gamma < 0 has no stable positive fixed point
        let sets: Vec<ParameterSet> = vec![
            vec![("gamma".to_string(), 1.0)],
            vec![("gamma".to_string(), -1.0)],
            vec![("gamma".to_string(), 2.0)],
        ];
        let result = scan.scan(&sets).unwrap();
        assert!((result[[0, 0]] - 10.0).abs() < 1e-6);
        assert!(result[[1, 0]].is_nan());
        assert!((result[[2, 0]] - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_scan_unknown_parameter_is_fatal() {
        let model = SseModel::re(&fixtures::birth_death(10.0, 1.0, 0.0)).unwrap();
        let scan = ParameterScan::<Bci>::new(SteadyStateAnalysis::new(model), 1);
        let sets: Vec<ParameterSet> = vec![vec![("missing".to_string(), 1.0)]];
        assert!(scan.scan(&sets).is_err());
    }
}

//! Time-averaged SSA parameter scans.
//!
//! One single-realization simulator per parameter set, advanced past a
//! transient and then sampled by a running time average of mean and
//! covariance. Sets are independent, so the sweep is parallel across
//! the local pool.

use crate::methods::{OptimizedSsa, Simulator};
use crate::simulator::SimulatorBase;
use mesokin_ast::Model;
use mesokin_core::{packed_len, MesokinError, Result};
use mesokin_eval::Engine;
use mesokin_expr::Expr;
use ndarray::Array2;
use rayon::prelude::*;
use tracing::debug;

/// One parameter assignment: `(parameter identifier, value)` pairs.
pub type ParameterSet = Vec<(String, f64)>;

/// Stationary-statistics scan over parameter sets.
pub struct SsaParameterScan<E: Engine> {
    simulators: Vec<OptimizedSsa<E>>,
    /// Running sample count of the time average.
    samples: usize,
    mean: Array2<f64>,
    /// Packed co-moment sums of the Welford recursion, one row per set.
    comoment: Array2<f64>,
    covariance: Array2<f64>,
    num_threads: usize,
}

impl<E: Engine> SsaParameterScan<E> {
    /// Build one simulator per parameter set and advance it past the
    /// transient.
    pub fn new(
        model: &Model,
        parameter_sets: &[ParameterSet],
        transient_time: f64,
        seed: u64,
        num_threads: usize,
        opt_level: usize,
    ) -> Result<Self> {
        let num_threads = num_threads.max(1);
        let mut simulators = Vec::with_capacity(parameter_sets.len());
        for (idx, set) in parameter_sets.iter().enumerate() {
            let mut scanned = model.clone();
            for (name, value) in set {
                let symbol = scanned.symbols().lookup(name).ok_or_else(|| {
                    MesokinError::SemanticError(format!("unknown scan parameter `{}`", name))
                })?;
                let parameter = scanned.parameter_mut(symbol).ok_or_else(|| {
                    MesokinError::SemanticError(format!("`{}` is not a parameter", name))
                })?;
                parameter.value = Some(Expr::num(*value));
            }
            // per-set simulators run single-threaded; the scan itself
            // is the parallel axis
            simulators.push(OptimizedSsa::<E>::new(
                &scanned,
                1,
                seed.wrapping_add(idx as u64),
                1,
                opt_level,
            )?);
        }

        let num_species = simulators
            .first()
            .map(|s| s.base().num_species())
            .unwrap_or(0);
        let mut scan = Self {
            simulators,
            samples: 0,
            mean: Array2::zeros((parameter_sets.len(), num_species)),
            comoment: Array2::zeros((parameter_sets.len(), packed_len(num_species))),
            covariance: Array2::zeros((parameter_sets.len(), packed_len(num_species))),
            num_threads,
        };

        if transient_time > 0.0 {
            debug!(transient_time, "advancing scan ensembles past the transient");
            scan.advance(transient_time)?;
        }
        Ok(scan)
    }

    fn advance(&mut self, dt: f64) -> Result<()> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_threads)
            .build()
            .map_err(|e| {
                MesokinError::InternalError(format!("cannot build thread pool: {}", e))
            })?;
        pool.install(|| {
            self.simulators
                .par_iter_mut()
                .try_for_each(|sim| sim.run(dt))
        })
    }

    /// Advance every set by `dt` and fold the end state into the
    /// running time averages.
    pub fn run(&mut self, dt: f64) -> Result<()> {
        self.advance(dt)?;
        self.samples += 1;
        for row in 0..self.simulators.len() {
            let state: Vec<f64> = self.simulators[row].base().state().row(0).to_vec();
            self.fold_sample(row, &state);
        }
        Ok(())
    }

    /// Pairwise Welford update: the co-moment sum grows by the
    /// deviation from the pre-update mean times the deviation from the
    /// post-update mean, which keeps the population covariance exact at
    /// every sample count.
    fn fold_sample(&mut self, row: usize, state: &[f64]) {
        let n = self.samples as f64;
        let width = state.len();
        let mut delta_old = vec![0.0; width];
        let mut delta_new = vec![0.0; width];
        for j in 0..width {
            delta_old[j] = state[j] - self.mean[[row, j]];
            self.mean[[row, j]] += delta_old[j] / n;
            delta_new[j] = state[j] - self.mean[[row, j]];
        }
        let mut idx = 0;
        for j in 0..width {
            for k in 0..=j {
                self.comoment[[row, idx]] += delta_old[j] * delta_new[k];
                self.covariance[[row, idx]] = self.comoment[[row, idx]] / n;
                idx += 1;
            }
        }
    }

    /// Per-set time-averaged means, one row per parameter set.
    pub fn mean(&self) -> &Array2<f64> {
        &self.mean
    }

    /// Per-set packed time-averaged covariances.
    pub fn covariance(&self) -> &Array2<f64> {
        &self.covariance
    }

    pub fn reset_statistics(&mut self) {
        self.samples = 0;
        self.mean.fill(0.0);
        self.comoment.fill(0.0);
        self.covariance.fill(0.0);
    }

    pub fn bases(&self) -> impl Iterator<Item = &SimulatorBase> {
        self.simulators.iter().map(|s| s.base())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesokin_ast::fixtures;
    use mesokin_eval::bci::Bci;

    #[test]
    fn test_scan_tracks_parameter_dependence() {
        let model = fixtures::birth_death(10.0, 1.0, 10.0);
        let sets: Vec<ParameterSet> = vec![
            vec![("k".to_string(), 5.0)],
            vec![("k".to_string(), 20.0)],
        ];
        let mut scan = SsaParameterScan::<Bci>::new(&model, &sets, 5.0, 77, 2, 1).unwrap();
        for _ in 0..400 {
            scan.run(0.5).unwrap();
        }
        let mean = scan.mean();
        // stationary means k/gamma = 5 and 20
        assert!((mean[[0, 0]] - 5.0).abs() < 1.5);
        assert!((mean[[1, 0]] - 20.0).abs() < 3.0);
        assert!(mean[[1, 0]] > mean[[0, 0]]);
        // Poissonian stationary statistics: variance equals the mean
        let cov = scan.covariance();
        assert!((cov[[0, 0]] - 5.0).abs() < 3.0);
        assert!((cov[[1, 0]] - 20.0).abs() < 10.0);
        assert!(cov[[1, 0]] > cov[[0, 0]]);
    }

    #[test]
    fn test_running_covariance_matches_batch() {
        // x = [0, 2] has population variance 1; x = [0, 2, 4] has 8/3
        let model = fixtures::birth_death(10.0, 1.0, 10.0);
        let sets: Vec<ParameterSet> = vec![vec![("k".to_string(), 10.0)]];
        let mut scan = SsaParameterScan::<Bci>::new(&model, &sets, 0.0, 1, 1, 0).unwrap();
        for (i, x) in [0.0, 2.0, 4.0].into_iter().enumerate() {
            scan.samples += 1;
            scan.fold_sample(0, &[x]);
            if i == 1 {
                assert!((scan.covariance[[0, 0]] - 1.0).abs() < 1e-12);
            }
        }
        assert!((scan.covariance[[0, 0]] - 8.0 / 3.0).abs() < 1e-12);
        assert!((scan.mean[[0, 0]] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_parameter_rejected() {
        let model = fixtures::birth_death(10.0, 1.0, 10.0);
        let sets: Vec<ParameterSet> = vec![vec![("nope".to_string(), 1.0)]];
        assert!(SsaParameterScan::<Bci>::new(&model, &sets, 0.0, 1, 1, 0).is_err());
    }
}

//! Shared simulator state: the prepared network, compiled propensities,
//! the ensemble matrix and its statistics.

use mesokin_ast::Model;
use mesokin_core::{packed_index, MesokinError, Result};
use mesokin_eval::InputIndex;
use mesokin_expr::{Expr, Symbol};
use mesokin_trafo::{
    assert_analysis_fragment, convert_to_irreversible, extensive_species, particle_numbers,
    ConstantFolder,
};
use ndarray::{Array1, Array2};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::collections::BTreeMap;

/// Shared state of every stochastic simulator.
///
/// The ensemble is an `N x num_species` matrix of particle counts; each
/// realization carries its own clock and its own deterministically
/// seeded RNG, so trajectories do not depend on how realizations are
/// scheduled across worker threads.
pub struct SimulatorBase {
    model: Model,
    species_symbols: Vec<Symbol>,
    state_index: InputIndex,
    /// Numeric propensity expressions over the species symbols.
    propensities: Vec<Expr>,
    stoichiometry: Array2<f64>,
    reactant_stoichiometry: Array2<f64>,
    /// Compartment volume per species, for concentration statistics.
    omega: Array1<f64>,
    /// Particle counts, one row per realization.
    pub(crate) ensemble: Array2<f64>,
    /// Internal clock of each realization.
    pub(crate) times: Vec<f64>,
    /// Realizations whose total propensity dropped to zero in the last
    /// run.
    pub(crate) frozen: Vec<bool>,
    pub(crate) rngs: Vec<SmallRng>,
    num_threads: usize,
    opt_level: usize,
}

impl SimulatorBase {
    /// Prepare `input` for jump-process simulation and initialize the
    /// ensemble.
    pub fn new(
        input: &Model,
        ensemble_size: usize,
        seed: u64,
        num_threads: usize,
        opt_level: usize,
    ) -> Result<Self> {
        if ensemble_size == 0 {
            return Err(MesokinError::SemanticError(
                "ensemble size must be positive".to_string(),
            ));
        }
        let mut model = input.clone();
        convert_to_irreversible(&mut model)?;
        assert_analysis_fragment(&model)?;
        extensive_species(&mut model)?;
        particle_numbers(&mut model)?;

        let folder = ConstantFolder::new(&model)?;
        let propensities: Vec<Expr> = model
            .propensities()?
            .iter()
            .map(|p| folder.apply(p))
            .collect();

        let stoichiometry = model.stoichiometry_matrix()?;
        let reactant_stoichiometry = model.reactant_stoichiometry_matrix()?;

        let species_symbols: Vec<Symbol> = model.species().iter().map(|s| s.symbol).collect();
        let state_index: InputIndex = species_symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (*s, i))
            .collect();

        // initial particle numbers, rounded to integers
        let initial = model.initial_species_values()?;
        let mut counts = Vec::with_capacity(initial.len());
        for (value, species) in initial.iter().zip(model.species()) {
            if !value.is_finite() || *value < 0.0 {
                return Err(MesokinError::NumericError(format!(
                    "initial particle number of species `{}` evaluates to {}",
                    species.id, value
                )));
            }
            let rounded = value.round();
            if (value - rounded).abs() > 1e-6 {
                return Err(MesokinError::NumericError(format!(
                    "initial particle number of species `{}` is not an integer ({})",
                    species.id, value
                )));
            }
            counts.push(rounded);
        }

        let mut ensemble = Array2::zeros((ensemble_size, counts.len()));
        for mut row in ensemble.outer_iter_mut() {
            for (j, c) in counts.iter().enumerate() {
                row[j] = *c;
            }
        }

        let mut omega = Array1::zeros(species_symbols.len());
        for (i, s) in model.species().iter().enumerate() {
            let compartment = model
                .compartment_of(s)
                .initial
                .clone()
                .ok_or_else(|| {
                    MesokinError::SemanticError(format!(
                        "compartment of species `{}` has no volume",
                        s.id
                    ))
                })?;
            omega[i] = model.evaluate_initial_value(&compartment)?;
        }

        // one deterministically derived RNG per realization
        let rngs = (0..ensemble_size)
            .map(|sid| SmallRng::seed_from_u64(splitmix64(seed ^ (sid as u64).wrapping_mul(0x9e3779b97f4a7c15))))
            .collect();

        Ok(Self {
            model,
            species_symbols,
            state_index,
            propensities,
            stoichiometry,
            reactant_stoichiometry,
            omega,
            ensemble,
            times: vec![0.0; ensemble_size],
            frozen: vec![false; ensemble_size],
            rngs,
            num_threads: num_threads.max(1),
            opt_level,
        })
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn num_species(&self) -> usize {
        self.species_symbols.len()
    }

    pub fn num_reactions(&self) -> usize {
        self.propensities.len()
    }

    pub fn ensemble_size(&self) -> usize {
        self.ensemble.nrows()
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn opt_level(&self) -> usize {
        self.opt_level
    }

    pub fn state_index(&self) -> &InputIndex {
        &self.state_index
    }

    pub fn propensities(&self) -> &[Expr] {
        &self.propensities
    }

    pub fn stoichiometry(&self) -> &Array2<f64> {
        &self.stoichiometry
    }

    /// Sparse column of the stoichiometry: `(species, change)` pairs.
    pub fn stoichiometry_column(&self, reaction: usize) -> Vec<(usize, f64)> {
        (0..self.num_species())
            .filter_map(|i| {
                let v = self.stoichiometry[[i, reaction]];
                (v != 0.0).then_some((i, v))
            })
            .collect()
    }

    /// Dependency graph: `affected[j]` lists the propensities that must
    /// be refreshed after reaction `j` fires. Reaction `j` affects
    /// propensity `i` iff some species read by law `i` (as reactant or
    /// expression operand) is changed by `j`.
    pub fn dependency_graph(&self) -> Vec<Vec<usize>> {
        let n_reac = self.num_reactions();
        let mut affected = vec![Vec::new(); n_reac];
        for j in 0..n_reac {
            for i in 0..n_reac {
                let mut depends = false;
                for (k, sym) in self.species_symbols.iter().enumerate() {
                    let reads = self.reactant_stoichiometry[[k, i]] != 0.0
                        || self.propensities[i].has(*sym);
                    if reads && self.stoichiometry[[k, j]] != 0.0 {
                        depends = true;
                        break;
                    }
                }
                if depends {
                    affected[j].push(i);
                }
            }
        }
        affected
    }

    /// The ensemble particle-count matrix.
    pub fn state(&self) -> &Array2<f64> {
        &self.ensemble
    }

    /// Internal clock of each realization.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Realizations whose total propensity vanished during the last run.
    pub fn frozen_count(&self) -> usize {
        self.frozen.iter().filter(|&&f| f).count()
    }

    /// Ensemble mean and packed lower-triangular covariance of the
    /// species concentrations, plus per-species skewness.
    pub fn stats(&self) -> (Array1<f64>, Array1<f64>, Array1<f64>) {
        let n = self.num_species();
        let size = self.ensemble_size() as f64;

        let mut mean = Array1::zeros(n);
        for row in self.ensemble.outer_iter() {
            for j in 0..n {
                mean[j] += row[j] / self.omega[j];
            }
        }
        mean /= size;

        let mut cov = Array1::zeros(packed_index(n - 1, n - 1) + 1);
        let mut third = Array1::<f64>::zeros(n);
        for row in self.ensemble.outer_iter() {
            for j in 0..n {
                let dj = row[j] / self.omega[j] - mean[j];
                third[j] += dj * dj * dj;
                for k in 0..=j {
                    let dk = row[k] / self.omega[k] - mean[k];
                    cov[packed_index(j, k)] += dj * dk;
                }
            }
        }
        let denom = (size - 1.0).max(1.0);
        cov /= denom;
        let mut skewness = Array1::zeros(n);
        for j in 0..n {
            let var = cov[packed_index(j, j)];
            skewness[j] = if var > 0.0 {
                (third[j] / size) / var.powf(1.5)
            } else {
                0.0
            };
        }
        (mean, cov, skewness)
    }

    /// Frequency histogram of one species over the current ensemble.
    pub fn histogram(&self, species: usize) -> BTreeMap<i64, usize> {
        let mut hist = BTreeMap::new();
        for row in self.ensemble.outer_iter() {
            *hist.entry(row[species] as i64).or_insert(0) += 1;
        }
        hist
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e3779b97f4a7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesokin_ast::fixtures;

    #[test]
    fn test_initialization() {
        let model = fixtures::michaelis_menten();
        let base = SimulatorBase::new(&model, 8, 1234, 1, 0).unwrap();
        assert_eq!(base.ensemble_size(), 8);
        assert_eq!(base.num_species(), 4);
        for row in base.state().outer_iter() {
            assert_eq!(row[0], 10.0);
            assert_eq!(row[1], 100.0);
            assert_eq!(row[2], 0.0);
            assert_eq!(row[3], 0.0);
        }
        assert_eq!(base.frozen_count(), 0);
    }

    #[test]
    fn test_negative_initial_rejected() {
        let model = fixtures::birth_death(10.0, 1.0, -1.0);
        assert!(matches!(
            SimulatorBase::new(&model, 4, 1, 1, 0),
            Err(MesokinError::NumericError(_))
        ));
    }

    #[test]
    fn test_fractional_initial_rejected() {
        let model = fixtures::birth_death(10.0, 1.0, 2.5);
        assert!(matches!(
            SimulatorBase::new(&model, 4, 1, 1, 0),
            Err(MesokinError::NumericError(_))
        ));
    }

    #[test]
    fn test_dependency_graph_birth_death() {
        let model = fixtures::birth_death(10.0, 1.0, 0.0);
        let base = SimulatorBase::new(&model, 1, 1, 1, 0).unwrap();
        let deps = base.dependency_graph();
        // birth changes X which the death law reads; the zero-order
        // birth law reads nothing
        assert_eq!(deps[0], vec![1]);
        assert_eq!(deps[1], vec![1]);
    }

    #[test]
    fn test_dependency_graph_michaelis_menten() {
        let model = fixtures::michaelis_menten();
        let base = SimulatorBase::new(&model, 1, 1, 1, 0).unwrap();
        let deps = base.dependency_graph();
        // binding changes E, S, ES: all three laws read one of them
        assert_eq!(deps[0], vec![0, 1, 2]);
        // unbinding and catalysis likewise touch E/S/ES
        assert_eq!(deps[1], vec![0, 1, 2]);
        assert_eq!(deps[2], vec![0, 1, 2]);
    }

    #[test]
    fn test_histogram() {
        let model = fixtures::birth_death(10.0, 1.0, 7.0);
        let base = SimulatorBase::new(&model, 5, 1, 1, 0).unwrap();
        let hist = base.histogram(0);
        assert_eq!(hist.get(&7), Some(&5));
    }
}

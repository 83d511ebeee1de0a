//! The three SSA variants behind one stepper contract.
//!
//! All variants advance every realization from its own clock by exactly
//! `dt` per `run` call. Realizations are embarrassingly parallel and are
//! distributed over a local rayon pool; compiled propensity code, the
//! dependency graph and the stoichiometry are shared read-only, while
//! the propensity buffer and interpreter live per worker and the RNG
//! per realization.

use crate::simulator::SimulatorBase;
use mesokin_ast::Model;
use mesokin_core::{MesokinError, Result};
use mesokin_eval::{compile_vector, Engine, EngineCompiler, EngineInterpreter};
use rand::rngs::SmallRng;
use rand::Rng;
use rand_distr::Exp1;
use rayon::prelude::*;

/// Common contract of the stochastic simulators.
pub trait Simulator {
    /// Advance every realization by exactly `dt`.
    fn run(&mut self, dt: f64) -> Result<()>;

    /// Shared simulator state (ensemble, statistics, clocks).
    fn base(&self) -> &SimulatorBase;
}

/// One realization's mutable slice of the ensemble.
type Realization<'a> = (
    ndarray::ArrayViewMut1<'a, f64>,
    &'a mut SmallRng,
    &'a mut f64,
    &'a mut bool,
);

fn realizations(base: &mut SimulatorBase) -> Vec<Realization<'_>> {
    base.ensemble
        .outer_iter_mut()
        .zip(base.rngs.iter_mut())
        .zip(base.times.iter_mut())
        .zip(base.frozen.iter_mut())
        .map(|(((row, rng), time), frozen)| (row, rng, time, frozen))
        .collect()
}

fn build_pool(num_threads: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .map_err(|e| MesokinError::InternalError(format!("cannot build thread pool: {}", e)))
}

fn check_finite(prop: &[f64], reaction_ids: &[String]) -> Result<()> {
    for (i, p) in prop.iter().enumerate() {
        if !p.is_finite() {
            return Err(MesokinError::NumericError(format!(
                "propensity of reaction `{}` evaluated to {}",
                reaction_ids[i], p
            )));
        }
    }
    Ok(())
}

/// Inverse-CDF selection of the firing reaction.
fn select_reaction(prop: &[f64], a0: f64, rng: &mut SmallRng) -> usize {
    let r = rng.gen::<f64>() * a0;
    let mut sum = prop[0];
    let mut mu = 0;
    while sum < r && mu + 1 < prop.len() {
        mu += 1;
        sum += prop[mu];
    }
    mu
}

/// Compile the per-reaction dependency codes plus the full-vector code.
fn compile_dependency_codes<E: Engine>(
    base: &SimulatorBase,
) -> Result<(Vec<E::Code>, E::Code, Vec<Vec<usize>>)> {
    let affected = base.dependency_graph();
    let mut codes = Vec::with_capacity(base.num_reactions());
    for deps in &affected {
        let mut compiler = E::Compiler::new(base.state_index().clone());
        for &i in deps {
            compiler.compile_into(&base.propensities()[i], i)?;
        }
        codes.push(compiler.finalize(base.opt_level())?);
    }
    let all_code = compile_vector::<E>(base.propensities(), base.state_index(), base.opt_level())?;
    Ok((codes, all_code, affected))
}

fn reaction_ids(base: &SimulatorBase) -> Vec<String> {
    base.model().reactions().iter().map(|r| r.id.clone()).collect()
}

// =============================================================================
// DIRECT METHOD
// =============================================================================

/// Direct-method SSA: every step re-evaluates all propensities.
pub struct DirectSsa<E: Engine> {
    base: SimulatorBase,
    code: E::Code,
    columns: Vec<Vec<(usize, f64)>>,
    reaction_ids: Vec<String>,
}

impl<E: Engine> DirectSsa<E> {
    pub fn new(
        model: &Model,
        ensemble_size: usize,
        seed: u64,
        num_threads: usize,
        opt_level: usize,
    ) -> Result<Self> {
        let base = SimulatorBase::new(model, ensemble_size, seed, num_threads, opt_level)?;
        let code = compile_vector::<E>(base.propensities(), base.state_index(), opt_level)?;
        let columns = (0..base.num_reactions())
            .map(|j| base.stoichiometry_column(j))
            .collect();
        let reaction_ids = reaction_ids(&base);
        Ok(Self {
            base,
            code,
            columns,
            reaction_ids,
        })
    }
}

impl<E: Engine> Simulator for DirectSsa<E> {
    fn run(&mut self, dt: f64) -> Result<()> {
        let code = &self.code;
        let columns = &self.columns;
        let ids = &self.reaction_ids;
        let n_reac = self.base.num_reactions();
        let pool = build_pool(self.base.num_threads())?;

        let items = realizations(&mut self.base);
        pool.install(|| {
            items.into_par_iter().try_for_each_init(
                || (E::Interpreter::new(), vec![0.0; n_reac]),
                |(interp, prop), (mut row, rng, time, frozen)| -> Result<()> {
                    let state = row.as_slice_mut().expect("ensemble rows are contiguous");
                    let target = *time + dt;
                    *frozen = false;
                    loop {
                        interp.run(code, state, prop);
                        check_finite(prop, ids)?;
                        let a0: f64 = prop.iter().sum();
                        if a0 <= 0.0 {
                            *frozen = true;
                            break;
                        }
                        let tau = rng.sample::<f64, _>(Exp1) / a0;
                        if *time + tau > target {
                            break;
                        }
                        *time += tau;
                        let mu = select_reaction(prop, a0, rng);
                        for &(s, v) in &columns[mu] {
                            state[s] += v;
                        }
                    }
                    *time = target;
                    Ok(())
                },
            )
        })
    }

    fn base(&self) -> &SimulatorBase {
        &self.base
    }
}

// =============================================================================
// OPTIMIZED (DEPENDENCY-GRAPH) METHOD
// =============================================================================

/// Dependency-graph SSA: after firing reaction `mu` only the affected
/// propensities are recomputed.
pub struct OptimizedSsa<E: Engine> {
    base: SimulatorBase,
    codes: Vec<E::Code>,
    all_code: E::Code,
    columns: Vec<Vec<(usize, f64)>>,
    reaction_ids: Vec<String>,
}

impl<E: Engine> OptimizedSsa<E> {
    pub fn new(
        model: &Model,
        ensemble_size: usize,
        seed: u64,
        num_threads: usize,
        opt_level: usize,
    ) -> Result<Self> {
        let base = SimulatorBase::new(model, ensemble_size, seed, num_threads, opt_level)?;
        let (codes, all_code, _) = compile_dependency_codes::<E>(&base)?;
        let columns = (0..base.num_reactions())
            .map(|j| base.stoichiometry_column(j))
            .collect();
        let reaction_ids = reaction_ids(&base);
        Ok(Self {
            base,
            codes,
            all_code,
            columns,
            reaction_ids,
        })
    }
}

impl<E: Engine> Simulator for OptimizedSsa<E> {
    fn run(&mut self, dt: f64) -> Result<()> {
        let codes = &self.codes;
        let all_code = &self.all_code;
        let columns = &self.columns;
        let ids = &self.reaction_ids;
        let n_reac = self.base.num_reactions();
        let pool = build_pool(self.base.num_threads())?;

        let items = realizations(&mut self.base);
        pool.install(|| {
            items.into_par_iter().try_for_each_init(
                || (E::Interpreter::new(), vec![0.0; n_reac]),
                |(interp, prop), (mut row, rng, time, frozen)| -> Result<()> {
                    let state = row.as_slice_mut().expect("ensemble rows are contiguous");
                    let target = *time + dt;
                    *frozen = false;

                    // refresh the full propensity vector once per run
                    interp.run(all_code, state, prop);
                    check_finite(prop, ids)?;

                    loop {
                        let a0: f64 = prop.iter().sum();
                        if a0 <= 0.0 {
                            *frozen = true;
                            break;
                        }
                        let tau = rng.sample::<f64, _>(Exp1) / a0;
                        if *time + tau > target {
                            break;
                        }
                        *time += tau;
                        let mu = select_reaction(prop, a0, rng);
                        for &(s, v) in &columns[mu] {
                            state[s] += v;
                        }
                        // only the dependent propensities change
                        interp.run(&codes[mu], state, prop);
                        check_finite(prop, ids)?;
                    }
                    *time = target;
                    Ok(())
                },
            )
        })
    }

    fn base(&self) -> &SimulatorBase {
        &self.base
    }
}

// =============================================================================
// NEXT-REACTION METHOD
// =============================================================================

/// Next-reaction SSA: keeps an absolute firing time per reaction and
/// redraws only the times flagged by the dependency graph.
pub struct NextReactionSsa<E: Engine> {
    base: SimulatorBase,
    codes: Vec<E::Code>,
    all_code: E::Code,
    affected: Vec<Vec<usize>>,
    columns: Vec<Vec<(usize, f64)>>,
    reaction_ids: Vec<String>,
    /// Absolute firing times, one vector per realization.
    taus: Vec<Vec<f64>>,
}

impl<E: Engine> NextReactionSsa<E> {
    pub fn new(
        model: &Model,
        ensemble_size: usize,
        seed: u64,
        num_threads: usize,
        opt_level: usize,
    ) -> Result<Self> {
        let base = SimulatorBase::new(model, ensemble_size, seed, num_threads, opt_level)?;
        let (codes, all_code, affected) = compile_dependency_codes::<E>(&base)?;
        let columns = (0..base.num_reactions())
            .map(|j| base.stoichiometry_column(j))
            .collect();
        let reaction_ids = reaction_ids(&base);
        let taus = vec![vec![f64::INFINITY; base.num_reactions()]; ensemble_size];
        Ok(Self {
            base,
            codes,
            all_code,
            affected,
            columns,
            reaction_ids,
            taus,
        })
    }
}

impl<E: Engine> Simulator for NextReactionSsa<E> {
    fn run(&mut self, dt: f64) -> Result<()> {
        let codes = &self.codes;
        let all_code = &self.all_code;
        let affected = &self.affected;
        let columns = &self.columns;
        let ids = &self.reaction_ids;
        let n_reac = self.base.num_reactions();
        let pool = build_pool(self.base.num_threads())?;

        let items: Vec<_> = realizations(&mut self.base)
            .into_iter()
            .zip(self.taus.iter_mut())
            .collect();
        pool.install(|| {
            items.into_par_iter().try_for_each_init(
                || (E::Interpreter::new(), vec![0.0; n_reac]),
                |(interp, prop), ((mut row, rng, time, frozen), taus)| -> Result<()> {
                    let state = row.as_slice_mut().expect("ensemble rows are contiguous");
                    let target = *time + dt;
                    *frozen = false;

                    interp.run(all_code, state, prop);
                    check_finite(prop, ids)?;
                    for j in 0..n_reac {
                        taus[j] = *time + rng.sample::<f64, _>(Exp1) / prop[j];
                    }

                    loop {
                        let mut mu = 0;
                        for j in 1..n_reac {
                            if taus[j] < taus[mu] {
                                mu = j;
                            }
                        }
                        let t_min = taus[mu];
                        if !t_min.is_finite() {
                            *frozen = true;
                            break;
                        }
                        if t_min > target {
                            break;
                        }
                        *time = t_min;
                        for &(s, v) in &columns[mu] {
                            state[s] += v;
                        }
                        interp.run(&codes[mu], state, prop);
                        check_finite(prop, ids)?;
                        for &i in &affected[mu] {
                            taus[i] = *time + rng.sample::<f64, _>(Exp1) / prop[i];
                        }
                        if !affected[mu].contains(&mu) {
                            taus[mu] = *time + rng.sample::<f64, _>(Exp1) / prop[mu];
                        }
                    }
                    *time = target;
                    Ok(())
                },
            )
        })
    }

    fn base(&self) -> &SimulatorBase {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mesokin_ast::fixtures;
    use mesokin_core::packed_index;
    use mesokin_eval::bci::Bci;

    #[test]
    fn test_determinism_same_seed() {
        let model = fixtures::birth_death(10.0, 1.0, 10.0);
        let mut a = OptimizedSsa::<Bci>::new(&model, 32, 99, 1, 1).unwrap();
        let mut b = OptimizedSsa::<Bci>::new(&model, 32, 99, 1, 1).unwrap();
        a.run(5.0).unwrap();
        b.run(5.0).unwrap();
        assert_eq!(a.base().state(), b.base().state());
        // repeated runs continue the trajectories deterministically
        a.run(5.0).unwrap();
        b.run(5.0).unwrap();
        assert_eq!(a.base().state(), b.base().state());
    }

    #[test]
    fn test_thread_count_does_not_change_results() {
        let model = fixtures::michaelis_menten();
        let mut one = OptimizedSsa::<Bci>::new(&model, 16, 7, 1, 1).unwrap();
        let mut four = OptimizedSsa::<Bci>::new(&model, 16, 7, 4, 1).unwrap();
        one.run(2.0).unwrap();
        four.run(2.0).unwrap();
        assert_eq!(one.base().state(), four.base().state());
    }

    #[test]
    fn test_birth_death_mean_and_variance() {
        let model = fixtures::birth_death(10.0, 1.0, 10.0);
        let mut sim = OptimizedSsa::<Bci>::new(&model, 3000, 2024, 4, 1).unwrap();
        sim.run(10.0).unwrap();
        let (mean, cov, _) = sim.base().stats();
        // Poisson(10): mean 10, variance 10
        assert_relative_eq!(mean[0], 10.0, epsilon = 0.35);
        assert_relative_eq!(cov[packed_index(0, 0)], 10.0, epsilon = 1.5);
    }

    #[test]
    fn test_direct_and_next_reaction_agree_in_distribution() {
        let model = fixtures::birth_death(10.0, 1.0, 10.0);
        let mut direct = DirectSsa::<Bci>::new(&model, 2000, 5, 4, 1).unwrap();
        let mut next = NextReactionSsa::<Bci>::new(&model, 2000, 6, 4, 1).unwrap();
        direct.run(8.0).unwrap();
        next.run(8.0).unwrap();
        let (mean_d, cov_d, _) = direct.base().stats();
        let (mean_n, cov_n, _) = next.base().stats();
        // both sample the same stationary law within a few sigma/sqrt(N)
        assert_relative_eq!(mean_d[0], mean_n[0], epsilon = 0.45);
        assert_relative_eq!(cov_d[0], cov_n[0], epsilon = 2.0);
    }

    #[test]
    fn test_conservation_is_exact_per_realization() {
        let model = fixtures::michaelis_menten();
        let mut sim = NextReactionSsa::<Bci>::new(&model, 64, 11, 2, 1).unwrap();
        sim.run(5.0).unwrap();
        for row in sim.base().state().outer_iter() {
            // E + ES and S + ES + P are integers conserved exactly
            assert_eq!(row[0] + row[2], 10.0);
            assert_eq!(row[1] + row[2] + row[3], 100.0);
        }
    }

    #[test]
    fn test_extinct_realizations_freeze() {
        // pure death: every realization reaches zero and freezes
        let model = fixtures::birth_death(0.0, 1.0, 5.0);
        let mut sim = DirectSsa::<Bci>::new(&model, 16, 3, 1, 0).unwrap();
        sim.run(200.0).unwrap();
        assert_eq!(sim.base().frozen_count(), 16);
        for row in sim.base().state().outer_iter() {
            assert_eq!(row[0], 0.0);
        }
        // clocks still advanced to the target
        for &t in sim.base().times() {
            assert_relative_eq!(t, 200.0);
        }
    }

    #[test]
    fn test_methods_preserve_integer_counts() {
        let model = fixtures::birth_death(10.0, 1.0, 0.0);
        let mut sim = DirectSsa::<Bci>::new(&model, 8, 1, 1, 0).unwrap();
        sim.run(3.0).unwrap();
        for row in sim.base().state().outer_iter() {
            assert_eq!(row[0], row[0].round());
            assert!(row[0] >= 0.0);
        }
    }
}

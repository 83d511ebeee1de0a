//! # mesokin-sse
//!
//! The system-size expansion derivation engine.
//!
//! From a reaction network this crate derives, symbolically and once
//! per model, the hierarchy of ODE systems describing the network's
//! statistics at growing order in the inverse system size:
//!
//! * **RE** — deterministic rate equations,
//! * **LNA** — linear-noise covariances with EMRE mean corrections,
//! * **IOS** — third central moments plus second-order covariance and
//!   mean corrections.
//!
//! The pipeline: conservation analysis removes dependent species,
//! propensities are Laurent-expanded in the inverse volume, the reduced
//! rates are differentiated into the coefficient family (Jacobians,
//! Hessians, third derivatives, diffusion tensors), and the per-level
//! update vectors are assembled entry by entry in colexicographic
//! packing. The result compiles through `mesokin-eval` and runs behind
//! the `OdeSystem` contract.

pub mod adapter;
pub mod conservation;
pub mod expansion;
pub mod models;
pub mod system;

pub use adapter::CompiledSse;
pub use conservation::ConservationData;
pub use expansion::{expand_propensities, ExpandedRates};
pub use models::{FullState, PreparedSse, SseLevel, SseModel};
pub use system::SseSystem;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mesokin_ast::fixtures;
    use mesokin_core::OdeSystem;
    use mesokin_eval::bci::Bci;
    use mesokin_eval::direct::Direct;
    use mesokin_expr::Substitution;
    use ndarray::{Array1, Array2};

    fn evaluate_update(model: &SseModel, state: &[f64]) -> Vec<f64> {
        let prepared = model.prepare(&Substitution::new()).unwrap();
        let mut system = CompiledSse::<Bci>::new(&prepared, 1).unwrap();
        let x = Array1::from_vec(state.to_vec());
        let mut dx = Array1::zeros(state.len());
        system.evaluate(&x, 0.0, &mut dx).unwrap();
        dx.to_vec()
    }

    #[test]
    fn test_birth_death_re_update() {
        let model = SseModel::re(&fixtures::birth_death(10.0, 1.0, 0.0)).unwrap();
        assert_eq!(model.dimension(), 1);
        let dx = evaluate_update(&model, &[3.0]);
        assert_relative_eq!(dx[0], 7.0, max_relative = 1e-12);
    }

    #[test]
    fn test_birth_death_lna_stationarity() {
        // at the fixed point x* = 10 the Poissonian variance 10 makes
        // the covariance update vanish; the EMRE correction is zero for
        // a linear network
        let model = SseModel::lna(&fixtures::birth_death(10.0, 1.0, 0.0)).unwrap();
        assert_eq!(model.dimension(), 3);
        let dx = evaluate_update(&model, &[10.0, 10.0, 0.0]);
        for v in dx {
            assert_relative_eq!(v, 0.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_birth_death_ios_poisson_stationarity() {
        // the stationary distribution is Poisson(10): variance 10 and
        // third central moment 10 annihilate every update block
        let model = SseModel::ios(&fixtures::birth_death(10.0, 1.0, 0.0)).unwrap();
        assert_eq!(model.dimension(), 6);
        let dx = evaluate_update(&model, &[10.0, 10.0, 0.0, 10.0, 0.0, 0.0]);
        for v in dx {
            assert_relative_eq!(v, 0.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_michaelis_menten_dimensions() {
        let mm = fixtures::michaelis_menten();
        let re = SseModel::re(&mm).unwrap();
        assert_eq!(re.dimension(), 2);
        let lna = SseModel::lna(&mm).unwrap();
        assert_eq!(lna.dimension(), 2 + 3 + 2);
        let ios = SseModel::ios(&mm).unwrap();
        assert_eq!(ios.dimension(), 2 + 3 + 2 + 4 + 3 + 2);
    }

    #[test]
    fn test_michaelis_menten_conservation_in_full_state() {
        let mm = fixtures::michaelis_menten();
        let model = SseModel::re(&mm).unwrap();
        let none = Substitution::new();
        let x0 = model.initial_state(&none).unwrap();
        let full = model.full_state(&x0, &none).unwrap();
        // reconstruction at t=0 returns the initial amounts (V = 1)
        let expected = [10.0, 100.0, 0.0, 0.0];
        for (got, want) in full.concentrations.iter().zip(expected.iter()) {
            assert_relative_eq!(got, want, epsilon = 1e-9);
        }
        // S + ES + P = 100 exactly
        let total = full.concentrations[1] + full.concentrations[2] + full.concentrations[3];
        assert_relative_eq!(total, 100.0, max_relative = 1e-12);
    }

    #[test]
    fn test_engines_agree_on_ios_update() {
        let mm = fixtures::michaelis_menten();
        let model = SseModel::ios(&mm).unwrap();
        let prepared = model.prepare(&Substitution::new()).unwrap();
        let mut bci = CompiledSse::<Bci>::new(&prepared, 1).unwrap();
        let mut direct = CompiledSse::<Direct>::new(&prepared, 0).unwrap();

        let dim = model.dimension();
        // a handful of deterministic pseudo-random states
        let mut seed = 0x9e3779b97f4a7c15u64;
        let mut next = || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((seed >> 11) as f64 / (1u64 << 53) as f64) * 4.0 + 0.1
        };
        for _ in 0..20 {
            let x = Array1::from_iter((0..dim).map(|_| next()));
            let mut dx_a = Array1::zeros(dim);
            let mut dx_b = Array1::zeros(dim);
            bci.evaluate(&x, 0.0, &mut dx_a).unwrap();
            direct.evaluate(&x, 0.0, &mut dx_b).unwrap();
            for (a, b) in dx_a.iter().zip(dx_b.iter()) {
                assert_relative_eq!(a, b, max_relative = 1e-12, epsilon = 1e-12);
            }

            let mut jac_a = Array2::zeros((dim, dim));
            let mut jac_b = Array2::zeros((dim, dim));
            bci.evaluate_jacobian(&x, 0.0, &mut jac_a).unwrap();
            direct.evaluate_jacobian(&x, 0.0, &mut jac_b).unwrap();
            for (a, b) in jac_a.iter().zip(jac_b.iter()) {
                assert_relative_eq!(a, b, max_relative = 1e-12, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_reversible_split_same_re_update() {
        // S1 <-> S2 split into two irreversible reactions leaves the
        // deterministic dynamics unchanged
        let model = SseModel::re(&fixtures::reversible_pair(1.0, 0.5, 10.0, 2.0)).unwrap();
        // conservation: S1 + S2 fixed, one independent species
        assert_eq!(model.dimension(), 1);
        let dx = evaluate_update(&model, &[4.0]);
        // with S1 independent: dS1/dt = -k1*S1 + k2*S2 = -k1*S1 + k2*(12 - S1)
        let expected = -1.0 * 4.0 + 0.5 * (12.0 - 4.0);
        assert_relative_eq!(dx[0], expected, max_relative = 1e-12);
    }
}

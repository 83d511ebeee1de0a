//! Time-course integration of a compiled SSE model.

use crate::ode::rkf45_integrate;
use mesokin_core::Result;
use mesokin_eval::Engine;
use mesokin_expr::Substitution;
use mesokin_sse::{CompiledSse, FullState, SseModel};
use ndarray::Array1;

/// Integrate the model from `t0` to `t_end` and report the
/// reconstructed observables on `steps` equidistant output points
/// (the initial state included).
pub fn integrate_time_course<E: Engine>(
    model: &SseModel,
    t0: f64,
    t_end: f64,
    steps: usize,
    opt_level: usize,
) -> Result<Vec<(f64, FullState)>> {
    let overrides = Substitution::new();
    let prepared = model.prepare(&overrides)?;
    let mut system = CompiledSse::<E>::new(&prepared, opt_level)?;

    let mut x: Array1<f64> = prepared.initial_state.clone();
    let dt = (t_end - t0) / steps.max(1) as f64;

    let mut out = Vec::with_capacity(steps + 1);
    out.push((t0, model.full_state(&x, &overrides)?));
    let mut t = t0;
    for _ in 0..steps {
        rkf45_integrate(&mut system, &mut x, t, t + dt, 1e-8, 1e-12)?;
        t += dt;
        out.push((t, model.full_state(&x, &overrides)?));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mesokin_ast::fixtures;
    use mesokin_eval::bci::Bci;
    use mesokin_eval::direct::Direct;
    use mesokin_trafo::convert_to_irreversible;

    #[test]
    fn test_conservation_identity_along_trajectory() {
        let model = SseModel::re(&fixtures::michaelis_menten()).unwrap();
        let trajectory = integrate_time_course::<Bci>(&model, 0.0, 20.0, 20, 1).unwrap();
        for (_, full) in &trajectory {
            let c = &full.concentrations;
            assert_relative_eq!(c[0] + c[2], 10.0, max_relative = 1e-6);
            assert_relative_eq!(c[1] + c[2] + c[3], 100.0, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_birth_death_relaxation() {
        let model = SseModel::re(&fixtures::birth_death(10.0, 1.0, 0.0)).unwrap();
        let trajectory = integrate_time_course::<Bci>(&model, 0.0, 10.0, 10, 1).unwrap();
        // x(t) = 10 (1 - exp(-t))
        for (t, full) in &trajectory {
            let expected = 10.0 * (1.0 - (-t).exp());
            assert_relative_eq!(full.concentrations[0], expected, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_split_model_matches_reversible_input() {
        // splitting S1 <-> S2 ahead of time changes nothing downstream
        let reversible = fixtures::reversible_pair(1.0, 0.5, 30.0, 0.0);
        let mut split = reversible.clone();
        convert_to_irreversible(&mut split).unwrap();

        let a = SseModel::re(&reversible).unwrap();
        let b = SseModel::re(&split).unwrap();
        let ta = integrate_time_course::<Bci>(&a, 0.0, 5.0, 10, 1).unwrap();
        let tb = integrate_time_course::<Bci>(&b, 0.0, 5.0, 10, 1).unwrap();
        for ((_, fa), (_, fb)) in ta.iter().zip(tb.iter()) {
            for (x, y) in fa.concentrations.iter().zip(fb.concentrations.iter()) {
                assert_relative_eq!(x, y, max_relative = 1e-9, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_engines_agree_integrating_ios() {
        let model = SseModel::ios(&fixtures::birth_death(10.0, 1.0, 5.0)).unwrap();
        let bci = integrate_time_course::<Bci>(&model, 0.0, 5.0, 5, 1).unwrap();
        let direct = integrate_time_course::<Direct>(&model, 0.0, 5.0, 5, 0).unwrap();
        for ((_, fa), (_, fb)) in bci.iter().zip(direct.iter()) {
            assert_relative_eq!(
                fa.concentrations[0],
                fb.concentrations[0],
                max_relative = 1e-9,
                epsilon = 1e-9
            );
            let ca = fa.covariance.as_ref().unwrap();
            let cb = fb.covariance.as_ref().unwrap();
            assert_relative_eq!(ca[[0, 0]], cb[[0, 0]], max_relative = 1e-9, epsilon = 1e-9);
        }
    }
}

//! Explicit ODE steppers over the `OdeSystem` contract.
//!
//! A fixed-step classic Runge-Kutta for output-grid integration and an
//! adaptive Runge-Kutta-Fehlberg 4(5) used between outputs and for the
//! hybrid solver's relaxation steps. The stiff production integrator is
//! an external collaborator; only this stepper contract is owned here.

use mesokin_core::{MesokinError, OdeSystem, Result, StateVector, Time};
use ndarray::Array1;

/// One classic fourth-order Runge-Kutta step, in place.
pub fn rk4_step<S: OdeSystem>(
    system: &mut S,
    x: &mut StateVector,
    t: Time,
    dt: f64,
) -> Result<()> {
    let dim = x.len();
    let mut k1 = Array1::zeros(dim);
    let mut k2 = Array1::zeros(dim);
    let mut k3 = Array1::zeros(dim);
    let mut k4 = Array1::zeros(dim);

    system.evaluate(x, t, &mut k1)?;
    let x2 = &*x + &(&k1 * (dt / 2.0));
    system.evaluate(&x2, t + dt / 2.0, &mut k2)?;
    let x3 = &*x + &(&k2 * (dt / 2.0));
    system.evaluate(&x3, t + dt / 2.0, &mut k3)?;
    let x4 = &*x + &(&k3 * dt);
    system.evaluate(&x4, t + dt, &mut k4)?;

    *x = &*x + &((k1 + k2 * 2.0 + k3 * 2.0 + k4) * (dt / 6.0));
    Ok(())
}

/// Adaptive Runge-Kutta-Fehlberg 4(5) integration from `t0` to `t1`,
/// in place.
pub fn rkf45_integrate<S: OdeSystem>(
    system: &mut S,
    x: &mut StateVector,
    t0: Time,
    t1: Time,
    rtol: f64,
    atol: f64,
) -> Result<()> {
    // Fehlberg tableau
    const A: [[f64; 5]; 5] = [
        [1.0 / 4.0, 0.0, 0.0, 0.0, 0.0],
        [3.0 / 32.0, 9.0 / 32.0, 0.0, 0.0, 0.0],
        [1932.0 / 2197.0, -7200.0 / 2197.0, 7296.0 / 2197.0, 0.0, 0.0],
        [439.0 / 216.0, -8.0, 3680.0 / 513.0, -845.0 / 4104.0, 0.0],
        [-8.0 / 27.0, 2.0, -3544.0 / 2565.0, 1859.0 / 4104.0, -11.0 / 40.0],
    ];
    const C: [f64; 5] = [1.0 / 4.0, 3.0 / 8.0, 12.0 / 13.0, 1.0, 1.0 / 2.0];
    const B5: [f64; 6] = [
        16.0 / 135.0,
        0.0,
        6656.0 / 12825.0,
        28561.0 / 56430.0,
        -9.0 / 50.0,
        2.0 / 55.0,
    ];
    const B4: [f64; 6] = [
        25.0 / 216.0,
        0.0,
        1408.0 / 2565.0,
        2197.0 / 4104.0,
        -1.0 / 5.0,
        0.0,
    ];

    let dim = x.len();
    let span = t1 - t0;
    if span <= 0.0 {
        return Ok(());
    }
    let mut t = t0;
    let mut dt = (span / 16.0).min(span);
    let dt_min = span * 1e-12;
    let max_steps = 1_000_000usize;

    let mut k: Vec<Array1<f64>> = (0..6).map(|_| Array1::zeros(dim)).collect();

    for _ in 0..max_steps {
        if t >= t1 {
            return Ok(());
        }
        dt = dt.min(t1 - t);

        system.evaluate(x, t, &mut k[0])?;
        for stage in 0..5 {
            let mut xs = x.clone();
            for (j, kj) in k.iter().enumerate().take(stage + 1) {
                let a = A[stage][j];
                if a != 0.0 {
                    xs = xs + kj * (a * dt);
                }
            }
            let (head, tail) = k.split_at_mut(stage + 1);
            let _ = head;
            system.evaluate(&xs, t + C[stage] * dt, &mut tail[0])?;
        }

        // fifth-order solution and embedded error estimate
        let mut x5 = x.clone();
        let mut x4 = x.clone();
        for (j, kj) in k.iter().enumerate() {
            if B5[j] != 0.0 {
                x5 = x5 + kj * (B5[j] * dt);
            }
            if B4[j] != 0.0 {
                x4 = x4 + kj * (B4[j] * dt);
            }
        }

        let mut err = 0.0f64;
        for i in 0..dim {
            let scale = atol + rtol * x5[i].abs().max(x[i].abs());
            err = err.max(((x5[i] - x4[i]) / scale).abs());
        }

        if err <= 1.0 || dt <= dt_min {
            t += dt;
            *x = x5;
        }
        let factor = if err > 0.0 {
            (0.9 * err.powf(-0.2)).clamp(0.2, 5.0)
        } else {
            5.0
        };
        dt = (dt * factor).max(dt_min);
    }

    Err(MesokinError::NumericError(format!(
        "adaptive integration exceeded the step budget before reaching t = {}",
        t1
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    /// dx/dt = -x, solution x0 * exp(-t)
    struct Decay;

    impl OdeSystem for Decay {
        fn dimension(&self) -> usize {
            1
        }

        fn evaluate(&mut self, x: &StateVector, _t: Time, dx: &mut StateVector) -> Result<()> {
            dx[0] = -x[0];
            Ok(())
        }

        fn evaluate_jacobian(
            &mut self,
            _x: &StateVector,
            _t: Time,
            jac: &mut Array2<f64>,
        ) -> Result<()> {
            jac[[0, 0]] = -1.0;
            Ok(())
        }
    }

    #[test]
    fn test_rk4_decay() {
        let mut x = Array1::from_vec(vec![1.0]);
        let dt = 0.01;
        for i in 0..100 {
            rk4_step(&mut Decay, &mut x, i as f64 * dt, dt).unwrap();
        }
        assert_relative_eq!(x[0], (-1.0f64).exp(), max_relative = 1e-8);
    }

    #[test]
    fn test_rkf45_decay() {
        let mut x = Array1::from_vec(vec![1.0]);
        rkf45_integrate(&mut Decay, &mut x, 0.0, 5.0, 1e-9, 1e-12).unwrap();
        assert_relative_eq!(x[0], (-5.0f64).exp(), max_relative = 1e-7);
    }

    /// harmonic oscillator keeps its energy
    struct Oscillator;

    impl OdeSystem for Oscillator {
        fn dimension(&self) -> usize {
            2
        }

        fn evaluate(&mut self, x: &StateVector, _t: Time, dx: &mut StateVector) -> Result<()> {
            dx[0] = x[1];
            dx[1] = -x[0];
            Ok(())
        }
    }

    #[test]
    fn test_rkf45_oscillator_energy() {
        let mut x = Array1::from_vec(vec![1.0, 0.0]);
        rkf45_integrate(&mut Oscillator, &mut x, 0.0, 10.0, 1e-10, 1e-12).unwrap();
        let energy = x[0] * x[0] + x[1] * x[1];
        assert_relative_eq!(energy, 1.0, max_relative = 1e-7);
    }
}

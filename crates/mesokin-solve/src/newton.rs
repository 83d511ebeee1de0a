//! Damped Newton-Raphson with cubic backtracking line search, and the
//! hybrid solver that escapes poor starting points with ODE relaxation
//! steps of geometrically growing length.

use crate::ode::rkf45_integrate;
use mesokin_core::{MesokinError, OdeSystem, Result, StateVector};
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2};
use tracing::debug;

/// Solver outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverStatus {
    Success,
    MaxIterationsReached,
    IterationFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineSearchStatus {
    Ok,
    Converged,
    Failed,
    RoundOffProblem,
}

/// Tolerances of the damped Newton iteration.
#[derive(Debug, Clone)]
pub struct NewtonParams {
    pub max_iterations: usize,
    pub epsilon: f64,
    /// Sufficient-decrease constant of the line search.
    pub alf: f64,
    pub tolx: f64,
    pub tolmin: f64,
    /// Maximum scaled step length.
    pub stpmx: f64,
}

impl NewtonParams {
    pub fn new(dimension: usize) -> Self {
        Self {
            max_iterations: 100 * (dimension + 1),
            epsilon: 1e-9,
            alf: 1e-4,
            tolx: f64::EPSILON,
            tolmin: 1e-12,
            stpmx: 100.0,
        }
    }
}

/// Newton-Raphson root finder for `f(x) = 0` with `f` and its Jacobian
/// supplied by an [`OdeSystem`].
pub struct NewtonRaphson {
    pub params: NewtonParams,
    iterations: usize,
    jacobian: Array2<f64>,
    residual: Array1<f64>,
}

impl NewtonRaphson {
    pub fn new(dimension: usize) -> Self {
        Self {
            params: NewtonParams::new(dimension),
            iterations: 0,
            jacobian: Array2::zeros((dimension, dimension)),
            residual: Array1::zeros(dimension),
        }
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Jacobian at the last evaluated point.
    pub fn jacobian(&self) -> &Array2<f64> {
        &self.jacobian
    }

    pub fn solve<S: OdeSystem>(&mut self, system: &mut S, x: &mut StateVector) -> Result<SolverStatus> {
        let dim = x.len();
        system.evaluate(x, 0.0, &mut self.residual)?;

        let norm = x.iter().map(|v| v * v).sum::<f64>().sqrt();
        let stpmax = self.params.stpmx * norm.max(dim as f64);

        for k in 0..self.params.max_iterations {
            let x_old = x.clone();
            let lcheck = self.newton_step(system, &x_old, x, stpmax)?;

            // convergence of the residual
            let fmax = self.residual.iter().fold(0.0f64, |m, v| m.max(v.abs()));
            if fmax < self.params.epsilon {
                self.iterations = k + 1;
                return Ok(SolverStatus::Success);
            }

            match lcheck {
                LineSearchStatus::Converged => {
                    self.iterations = k + 1;
                    return Ok(SolverStatus::Success);
                }
                LineSearchStatus::RoundOffProblem | LineSearchStatus::Failed => {
                    return Ok(SolverStatus::IterationFailed)
                }
                LineSearchStatus::Ok => {}
            }

            // convergence of the step
            let mut test = 0.0f64;
            for i in 0..dim {
                let temp = (x[i] - x_old[i]).abs() / x[i].abs().max(1.0);
                test = test.max(temp);
            }
            if test < self.params.tolx {
                self.iterations = k + 1;
                return Ok(SolverStatus::Success);
            }
        }

        Ok(SolverStatus::MaxIterationsReached)
    }

    fn newton_step<S: OdeSystem>(
        &mut self,
        system: &mut S,
        x_old: &StateVector,
        x: &mut StateVector,
        stpmax: f64,
    ) -> Result<LineSearchStatus> {
        let dim = x_old.len();
        system.evaluate(x_old, 0.0, &mut self.residual)?;
        system.evaluate_jacobian(x_old, 0.0, &mut self.jacobian)?;

        let f_old = 0.5 * self.residual.iter().map(|v| v * v).sum::<f64>();

        // steepest-descent direction of 1/2 |f|^2
        let jac = DMatrix::from_row_iterator(dim, dim, self.jacobian.iter().copied());
        let f_vec = DVector::from_iterator(dim, self.residual.iter().copied());
        let nablaf = jac.transpose() * &f_vec;

        // solve J dx = -f
        let dx = jac
            .full_piv_lu()
            .solve(&(-&f_vec))
            .ok_or_else(|| {
                MesokinError::NumericError(
                    "singular Jacobian in Newton iteration".to_string(),
                )
            })?;
        let mut dx = Array1::from_iter(dx.iter().copied());

        let lcheck = self.line_search(system, x_old, x, &mut dx, f_old, &nablaf, stpmax)?;

        if lcheck == LineSearchStatus::Failed {
            // spurious convergence: the gradient itself vanished
            let f_new = 0.5 * self.residual.iter().map(|v| v * v).sum::<f64>();
            let den = f_new.max(0.5 * dim as f64);
            let mut test = 0.0f64;
            for i in 0..dim {
                let temp = nablaf[i].abs() * x[i].abs().max(1.0) / den;
                test = test.max(temp);
            }
            if test < self.params.tolmin {
                return Ok(LineSearchStatus::Failed);
            }
            return Ok(LineSearchStatus::Converged);
        }

        Ok(lcheck)
    }

    /// Cubic-interpolation backtracking line search.
    #[allow(clippy::too_many_arguments)]
    fn line_search<S: OdeSystem>(
        &mut self,
        system: &mut S,
        x_old: &StateVector,
        x: &mut StateVector,
        dx: &mut Array1<f64>,
        f_old: f64,
        nablaf: &DVector<f64>,
        stpmax: f64,
    ) -> Result<LineSearchStatus> {
        let dim = x_old.len();

        let norm = dx.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > stpmax {
            *dx *= stpmax / norm;
        }

        let slope: f64 = (0..dim).map(|i| nablaf[i] * dx[i]).sum();
        if slope >= 0.0 {
            return Ok(LineSearchStatus::RoundOffProblem);
        }

        let mut test = 0.0f64;
        for i in 0..dim {
            let temp = dx[i].abs() / x_old[i].abs().max(1.0);
            test = test.max(temp);
        }
        let lambda_min = self.params.tolx / test;

        let mut lambda: f64 = 1.0;
        let mut lambda2 = 0.0;
        let mut f2 = 0.0;
        loop {
            *x = x_old + &(&*dx * lambda);
            system.evaluate(x, 0.0, &mut self.residual)?;
            let f = 0.5 * self.residual.iter().map(|v| v * v).sum::<f64>();

            if lambda < lambda_min {
                *x = x_old.clone();
                return Ok(LineSearchStatus::Failed);
            } else if f <= f_old + self.params.alf * lambda * slope {
                return Ok(LineSearchStatus::Ok);
            }

            // backtrack: quadratic model first, cubic afterwards
            let tmp_lambda = if lambda == 1.0 {
                -slope / (2.0 * (f - f_old - slope))
            } else {
                let rhs1 = f - f_old - lambda * slope;
                let rhs2 = f2 - f_old - lambda2 * slope;
                let a = (rhs1 / (lambda * lambda) - rhs2 / (lambda2 * lambda2))
                    / (lambda - lambda2);
                let b = (-lambda2 * rhs1 / (lambda * lambda)
                    + lambda * rhs2 / (lambda2 * lambda2))
                    / (lambda - lambda2);
                if a == 0.0 {
                    -slope / (2.0 * b)
                } else {
                    let disc = b * b - 3.0 * a * slope;
                    if disc < 0.0 {
                        0.5 * lambda
                    } else if b <= 0.0 {
                        (-b + disc.sqrt()) / (3.0 * a)
                    } else {
                        -slope / (b + disc.sqrt())
                    }
                }
            };
            let tmp_lambda = tmp_lambda.min(0.5 * lambda);

            lambda2 = lambda;
            f2 = f;
            lambda = tmp_lambda.max(0.1 * lambda);
        }
    }
}

/// Newton iteration alternating with explicit relaxation: when a Newton
/// attempt fails, the state is integrated forward for a step of
/// geometrically growing length and the iteration restarts from there.
pub struct HybridSolver {
    pub newton: NewtonRaphson,
}

impl HybridSolver {
    pub fn new(dimension: usize) -> Self {
        let mut newton = NewtonRaphson::new(dimension);
        newton.params.max_iterations = 100;
        Self { newton }
    }

    pub fn solve<S: OdeSystem>(
        &mut self,
        system: &mut S,
        x: &mut StateVector,
        max_time: f64,
        min_time_step: f64,
    ) -> Result<SolverStatus> {
        let mut dt = min_time_step;
        let mut t = 0.0;
        let mut last = SolverStatus::MaxIterationsReached;
        while t < max_time.max(dt) {
            // a singular Jacobian is just a failed attempt here; the
            // relaxation step may move the state off the singularity
            let status = match self.newton.solve(system, x) {
                Ok(s) => s,
                Err(MesokinError::NumericError(_)) => SolverStatus::IterationFailed,
                Err(e) => return Err(e),
            };
            debug!(?status, iterations = self.newton.iterations(), "Newton attempt");
            if status == SolverStatus::Success {
                return Ok(SolverStatus::Success);
            }
            last = status;

            debug!(dt, "relaxation step");
            rkf45_integrate(system, x, 0.0, dt, 1e-8, 1e-10)?;
            t += dt;
            dt *= 10.0;
        }
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mesokin_core::Time;

    /// f(x, y) = (x^2 + y - 3, y - 2x); root at (1.28..., 2.56...) and
    /// a second one in the negative quadrant.
    struct Quadratic;

    impl OdeSystem for Quadratic {
        fn dimension(&self) -> usize {
            2
        }

        fn evaluate(&mut self, x: &StateVector, _t: Time, dx: &mut StateVector) -> Result<()> {
            dx[0] = x[0] * x[0] + x[1] - 3.0;
            dx[1] = x[1] - 2.0 * x[0];
            Ok(())
        }

        fn evaluate_jacobian(
            &mut self,
            x: &StateVector,
            _t: Time,
            jac: &mut Array2<f64>,
        ) -> Result<()> {
            jac[[0, 0]] = 2.0 * x[0];
            jac[[0, 1]] = 1.0;
            jac[[1, 0]] = -2.0;
            jac[[1, 1]] = 1.0;
            Ok(())
        }
    }

    #[test]
    fn test_newton_quadratic_root() {
        let mut solver = NewtonRaphson::new(2);
        let mut x = Array1::from_vec(vec![2.0, 2.0]);
        let status = solver.solve(&mut Quadratic, &mut x).unwrap();
        assert_eq!(status, SolverStatus::Success);
        // residual vanishes
        assert_relative_eq!(x[0] * x[0] + x[1] - 3.0, 0.0, epsilon = 1e-7);
        assert_relative_eq!(x[1] - 2.0 * x[0], 0.0, epsilon = 1e-7);
    }

    /// dx/dt = 1 - x^3: single stable root at x = 1.
    struct Cubic;

    impl OdeSystem for Cubic {
        fn dimension(&self) -> usize {
            1
        }

        fn evaluate(&mut self, x: &StateVector, _t: Time, dx: &mut StateVector) -> Result<()> {
            dx[0] = 1.0 - x[0] * x[0] * x[0];
            Ok(())
        }

        fn evaluate_jacobian(
            &mut self,
            x: &StateVector,
            _t: Time,
            jac: &mut Array2<f64>,
        ) -> Result<()> {
            jac[[0, 0]] = -3.0 * x[0] * x[0];
            Ok(())
        }
    }

    #[test]
    fn test_hybrid_solver_escapes_bad_guess() {
        // Newton from x = 0 has a singular Jacobian; the relaxation
        // step moves the state into the basin
        let mut solver = HybridSolver::new(1);
        let mut x = Array1::from_vec(vec![0.0]);
        let status = solver.solve(&mut Cubic, &mut x, 1e6, 0.1).unwrap();
        assert_eq!(status, SolverStatus::Success);
        assert_relative_eq!(x[0], 1.0, epsilon = 1e-7);
    }
}

//! # mesokin-solve
//!
//! Numerical drivers over the SSE hierarchy: explicit ODE steppers, a
//! damped Newton / relaxation hybrid for the rate-equation root,
//! steady-state analysis of all expansion blocks and parallel
//! parameter scans.
//!
//! The division of labour: `mesokin-sse` derives the symbolic update
//! vectors, `mesokin-eval` compiles them, and this crate drives the
//! compiled systems — time courses through adaptive Runge-Kutta, fixed
//! points through Newton with backtracking line search and successive
//! linear solves for the covariance and correction blocks.

pub mod newton;
pub mod ode;
pub mod scan;
pub mod steadystate;
pub mod timecourse;

pub use newton::{HybridSolver, NewtonParams, NewtonRaphson, SolverStatus};
pub use ode::{rk4_step, rkf45_integrate};
pub use scan::{ParameterScan, ParameterSet};
pub use steadystate::{SteadyState, SteadyStateAnalysis};
pub use timecourse::integrate_time_course;

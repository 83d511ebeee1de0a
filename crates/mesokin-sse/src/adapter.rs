//! Compiled ODE right-hand side.
//!
//! Wraps a prepared SSE model behind the [`OdeSystem`] contract: one
//! compiled vector evaluator for the update and one compiled matrix
//! evaluator for its Jacobian. The engine is a type parameter; swapping
//! the bytecode interpreter for the direct evaluator is a compile-time
//! choice with no runtime dispatch.

use crate::models::PreparedSse;
use mesokin_core::{OdeSystem, Result, StateVector, Time};
use mesokin_eval::{compile_matrix, compile_vector, Engine, EngineInterpreter, InputIndex};
use ndarray::Array2;

/// A compiled SSE right-hand side.
pub struct CompiledSse<E: Engine> {
    dim: usize,
    update_code: E::Code,
    jacobian_code: E::Code,
    interpreter: E::Interpreter,
}

impl<E: Engine> CompiledSse<E> {
    pub fn new(prepared: &PreparedSse, opt_level: usize) -> Result<Self> {
        let index: InputIndex = prepared.state_index.clone();
        let update_code = compile_vector::<E>(&prepared.update, &index, opt_level)?;
        let jacobian_code = compile_matrix::<E>(&prepared.jacobian, &index, opt_level)?;
        Ok(Self {
            dim: prepared.dim,
            update_code,
            jacobian_code,
            interpreter: E::Interpreter::new(),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }
}

impl<E: Engine> OdeSystem for CompiledSse<E> {
    fn dimension(&self) -> usize {
        self.dim
    }

    fn evaluate(&mut self, x: &StateVector, _t: Time, dx: &mut StateVector) -> Result<()> {
        self.interpreter.run(
            &self.update_code,
            x.as_slice().expect("state vector is contiguous"),
            dx.as_slice_mut().expect("derivative vector is contiguous"),
        );
        Ok(())
    }

    fn evaluate_jacobian(
        &mut self,
        x: &StateVector,
        _t: Time,
        jac: &mut Array2<f64>,
    ) -> Result<()> {
        self.interpreter.run(
            &self.jacobian_code,
            x.as_slice().expect("state vector is contiguous"),
            jac.as_slice_mut().expect("jacobian matrix is contiguous"),
        );
        Ok(())
    }
}

//! # mesokin-eval
//!
//! Compiled evaluation of symbolic expressions.
//!
//! The update vectors generated by the system-size expansion are
//! thousands of nodes; walking them with a tree visitor inside an ODE
//! right-hand side or an SSA inner loop is prohibitively slow. This
//! crate compiles a vector (or matrix) of expressions into an immutable
//! code object that maps a dense input vector to a dense output in one
//! linear pass.
//!
//! Two engines share one contract, selected by type parameter with no
//! runtime dispatch:
//!
//! * [`bci::Bci`] — a stack-machine bytecode compiler and reentrant
//!   interpreter, the default for every hot loop;
//! * [`direct::Direct`] — straight tree-walking evaluation, the
//!   reference the bytecode must agree with.
//!
//! A code object is immutable and may be shared by any number of
//! interpreter instances; each interpreter instance is single-threaded.

pub mod bci;
pub mod direct;
pub mod instruction;

use mesokin_core::Result;
use mesokin_expr::{Expr, Symbol};
use std::collections::HashMap;

/// Position map from symbol identity to a slot in the input vector.
pub type InputIndex = HashMap<Symbol, usize>;

/// An evaluation engine: compiler plus interpreter over a shared code
/// type.
pub trait Engine: 'static {
    type Code: Send + Sync + 'static;
    type Compiler: EngineCompiler<Code = Self::Code>;
    type Interpreter: EngineInterpreter<Code = Self::Code>;
}

/// Compiles expressions, one output slot at a time, into a code object.
pub trait EngineCompiler: Sized {
    type Code;

    /// New compiler over the given input layout. Symbols not present in
    /// the index are a compile-time error.
    fn new(index: InputIndex) -> Self;

    /// Compile `expr` so its value is written to `output[slot]`.
    fn compile_into(&mut self, expr: &Expr, slot: usize) -> Result<()>;

    /// Compile `expr` into entry `(row, col)` of a row-major matrix
    /// output with `ncols` columns.
    fn compile_matrix_into(
        &mut self,
        expr: &Expr,
        row: usize,
        col: usize,
        ncols: usize,
    ) -> Result<()> {
        self.compile_into(expr, row * ncols + col)
    }

    /// Finish compilation at the given optimization level and hand out
    /// the immutable code object.
    fn finalize(self, opt_level: usize) -> Result<Self::Code>;
}

/// Executes a code object against caller-provided buffers.
///
/// `run` performs no allocation once the interpreter has been sized for
/// a code object; matrix-valued outputs are written through their
/// row-major flattening.
pub trait EngineInterpreter: Send {
    type Code;

    fn new() -> Self;

    fn run(&mut self, code: &Self::Code, input: &[f64], output: &mut [f64]);
}

/// Compile a vector of expressions in one call.
pub fn compile_vector<E: Engine>(
    exprs: &[Expr],
    index: &InputIndex,
    opt_level: usize,
) -> Result<E::Code> {
    let mut compiler = E::Compiler::new(index.clone());
    for (slot, expr) in exprs.iter().enumerate() {
        compiler.compile_into(expr, slot)?;
    }
    compiler.finalize(opt_level)
}

/// Compile a row-major matrix of expressions in one call.
pub fn compile_matrix<E: Engine>(
    exprs: &[Vec<Expr>],
    index: &InputIndex,
    opt_level: usize,
) -> Result<E::Code> {
    let ncols = exprs.first().map(|r| r.len()).unwrap_or(0);
    let mut compiler = E::Compiler::new(index.clone());
    for (row, row_exprs) in exprs.iter().enumerate() {
        for (col, expr) in row_exprs.iter().enumerate() {
            compiler.compile_matrix_into(expr, row, col, ncols)?;
        }
    }
    compiler.finalize(opt_level)
}

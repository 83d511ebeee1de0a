//! Direct tree-walking engine.
//!
//! Evaluates the expression trees as-is against the indexed input
//! vector. Far slower than the bytecode interpreter; it exists as the
//! reference implementation the bytecode must agree with, and to keep
//! engine selection a pure type-level choice.

use crate::{Engine, EngineCompiler, EngineInterpreter, InputIndex};
use mesokin_core::{MesokinError, Result};
use mesokin_expr::Expr;

/// The direct-evaluation engine.
pub struct Direct;

impl Engine for Direct {
    type Code = DirectCode;
    type Compiler = DirectCompiler;
    type Interpreter = DirectInterpreter;
}

/// "Compiled" object of the direct engine: the expressions themselves
/// with symbols rewritten to input slots.
#[derive(Debug, Clone, Default)]
pub struct DirectCode {
    slots: Vec<(usize, IndexedExpr)>,
    num_outputs: usize,
}

impl DirectCode {
    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }
}

/// Expression with symbols resolved to dense input positions.
#[derive(Debug, Clone)]
enum IndexedExpr {
    Const(f64),
    Input(usize),
    Add(Vec<IndexedExpr>),
    Mul(Vec<IndexedExpr>),
    Powi(Box<IndexedExpr>, i32),
    Pow(Box<IndexedExpr>, Box<IndexedExpr>),
    Exp(Box<IndexedExpr>),
    Log(Box<IndexedExpr>),
    Abs(Box<IndexedExpr>),
}

impl IndexedExpr {
    fn eval(&self, input: &[f64]) -> f64 {
        match self {
            IndexedExpr::Const(v) => *v,
            IndexedExpr::Input(i) => input[*i],
            IndexedExpr::Add(ts) => ts.iter().map(|t| t.eval(input)).sum(),
            IndexedExpr::Mul(fs) => fs.iter().map(|f| f.eval(input)).product(),
            IndexedExpr::Powi(b, n) => b.eval(input).powi(*n),
            IndexedExpr::Pow(b, e) => b.eval(input).powf(e.eval(input)),
            IndexedExpr::Exp(u) => u.eval(input).exp(),
            IndexedExpr::Log(u) => u.eval(input).ln(),
            IndexedExpr::Abs(u) => u.eval(input).abs(),
        }
    }
}

/// Compiler of the direct engine: resolves symbols, nothing more.
pub struct DirectCompiler {
    index: InputIndex,
    code: DirectCode,
}

impl EngineCompiler for DirectCompiler {
    type Code = DirectCode;

    fn new(index: InputIndex) -> Self {
        Self {
            index,
            code: DirectCode::default(),
        }
    }

    fn compile_into(&mut self, expr: &Expr, slot: usize) -> Result<()> {
        let indexed = self.resolve(expr)?;
        self.code.slots.push((slot, indexed));
        self.code.num_outputs = self.code.num_outputs.max(slot + 1);
        Ok(())
    }

    fn finalize(self, _opt_level: usize) -> Result<DirectCode> {
        Ok(self.code)
    }
}

impl DirectCompiler {
    fn resolve(&self, expr: &Expr) -> Result<IndexedExpr> {
        Ok(match expr {
            Expr::Const(n) => IndexedExpr::Const(n.to_f64()),
            Expr::Var(s) => {
                let slot = *self.index.get(s).ok_or_else(|| {
                    MesokinError::CompileError(format!(
                        "expression references symbol #{} which is not mapped to an input slot",
                        s.id()
                    ))
                })?;
                IndexedExpr::Input(slot)
            }
            Expr::Add(ts) => IndexedExpr::Add(
                ts.iter().map(|t| self.resolve(t)).collect::<Result<_>>()?,
            ),
            Expr::Mul(fs) => IndexedExpr::Mul(
                fs.iter().map(|f| self.resolve(f)).collect::<Result<_>>()?,
            ),
            Expr::Pow(b, n) => IndexedExpr::Powi(Box::new(self.resolve(b)?), *n),
            Expr::PowE(b, e) => IndexedExpr::Pow(
                Box::new(self.resolve(b)?),
                Box::new(self.resolve(e)?),
            ),
            Expr::Exp(u) => IndexedExpr::Exp(Box::new(self.resolve(u)?)),
            Expr::Log(u) => IndexedExpr::Log(Box::new(self.resolve(u)?)),
            Expr::Abs(u) => IndexedExpr::Abs(Box::new(self.resolve(u)?)),
        })
    }
}

/// Interpreter of the direct engine.
#[derive(Debug, Default)]
pub struct DirectInterpreter;

impl EngineInterpreter for DirectInterpreter {
    type Code = DirectCode;

    fn new() -> Self {
        Self
    }

    fn run(&mut self, code: &DirectCode, input: &[f64], output: &mut [f64]) {
        for (slot, expr) in &code.slots {
            output[*slot] = expr.eval(input);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bci::{Bci, Interpreter};
    use crate::compile_vector;
    use approx::assert_relative_eq;
    use mesokin_expr::{parse_expression, SymbolTable};
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_direct_matches_bytecode_on_random_inputs() {
        let sources = [
            "k1 * x * y - k2 * z",
            "exp(-x) / (1 + y^(2))",
            "abs(x - y) * log(1 + z^(4))",
            "(x + y + z)^(3) - x * y * z",
        ];
        let mut table = SymbolTable::new();
        let exprs: Vec<_> = sources
            .iter()
            .map(|s| parse_expression(s, &mut table).unwrap())
            .collect();
        let mut symbols = std::collections::BTreeSet::new();
        for e in &exprs {
            symbols.extend(e.symbols());
        }
        let index: InputIndex = symbols.iter().enumerate().map(|(i, s)| (*s, i)).collect();

        let direct_code = compile_vector::<Direct>(&exprs, &index, 0).unwrap();
        let bci_code = compile_vector::<Bci>(&exprs, &index, 1).unwrap();

        let mut direct = DirectInterpreter::new();
        let mut bci = Interpreter::new();
        let mut rng = SmallRng::seed_from_u64(42);

        for _ in 0..100 {
            let input: Vec<f64> = (0..index.len()).map(|_| rng.gen_range(0.1..4.0)).collect();
            let mut out_a = vec![0.0; exprs.len()];
            let mut out_b = vec![0.0; exprs.len()];
            direct.run(&direct_code, &input, &mut out_a);
            bci.run(&bci_code, &input, &mut out_b);
            for (a, b) in out_a.iter().zip(out_b.iter()) {
                assert_relative_eq!(a, b, max_relative = 1e-12);
            }
        }
    }

    #[test]
    fn test_direct_unknown_symbol() {
        let mut table = SymbolTable::new();
        let e = parse_expression("x + y", &mut table).unwrap();
        let mut index = InputIndex::new();
        index.insert(table.lookup("x").unwrap(), 0);
        let mut compiler = DirectCompiler::new(index);
        assert!(compiler.compile_into(&e, 0).is_err());
    }
}

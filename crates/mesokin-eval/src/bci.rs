//! Bytecode compiler and interpreter.
//!
//! Compilation interns every subexpression in a hash-consed table, so
//! the expression forest becomes a DAG; a node consumed more than once
//! is computed once and parked in a temp slot. Emission is a post-order
//! walk of the DAG per output slot.
//!
//! Optimization levels:
//!
//! * `0` — direct emission.
//! * `1` — constant subgraphs collapse to immediates, commutative chains
//!   are reordered deepest-first to shorten the live-value window,
//!   integer powers up to four become multiplies, and `-1 *` / `^(-1)`
//!   factors lower to `Neg`/`Sub`/`Div`.

use crate::instruction::Instruction;
use crate::{Engine, EngineCompiler, EngineInterpreter, InputIndex};
use mesokin_core::{MesokinError, Result};
use mesokin_expr::Expr;
use std::collections::HashMap;

/// The bytecode engine.
pub struct Bci;

impl Engine for Bci {
    type Code = Code;
    type Compiler = Compiler;
    type Interpreter = Interpreter;
}

/// Immutable compiled code object.
#[derive(Debug, Clone, Default)]
pub struct Code {
    instructions: Vec<Instruction>,
    num_temps: usize,
    max_stack: usize,
    num_outputs: usize,
}

impl Code {
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }

    pub fn max_stack(&self) -> usize {
        self.max_stack
    }

    pub fn num_temps(&self) -> usize {
        self.num_temps
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

// =============================================================================
// COMPILER
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum NodeKey {
    /// Immediate constant, keyed by bit pattern.
    Const(u64),
    /// Input vector slot.
    Input(u32),
    /// Flattened commutative chain.
    Nary(NaryOp, Vec<u32>),
    /// Integer power of a node.
    Pow(u32, i32),
    Unary(UnaryOp, u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum NaryOp {
    Add,
    Mul,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum UnaryOp {
    Exp,
    Log,
    Abs,
}

#[derive(Debug, Clone)]
struct Node {
    key: NodeKey,
    uses: u32,
}

/// Bytecode compiler with hash-consed subexpression sharing.
pub struct Compiler {
    index: InputIndex,
    interned: HashMap<NodeKey, u32>,
    nodes: Vec<Node>,
    roots: Vec<(u32, u32)>,
    num_outputs: usize,
}

impl EngineCompiler for Compiler {
    type Code = Code;

    fn new(index: InputIndex) -> Self {
        Self {
            index,
            interned: HashMap::new(),
            nodes: Vec::new(),
            roots: Vec::new(),
            num_outputs: 0,
        }
    }

    fn compile_into(&mut self, expr: &Expr, slot: usize) -> Result<()> {
        let id = self.intern_expr(expr)?;
        self.nodes[id as usize].uses += 1;
        self.roots.push((id, slot as u32));
        self.num_outputs = self.num_outputs.max(slot + 1);
        Ok(())
    }

    fn finalize(self, opt_level: usize) -> Result<Code> {
        Emitter::new(self, opt_level).emit()
    }
}

impl Compiler {
    fn intern_node(&mut self, key: NodeKey) -> u32 {
        if let Some(&id) = self.interned.get(&key) {
            return id;
        }
        let id = self.nodes.len() as u32;
        self.nodes.push(Node { key: key.clone(), uses: 0 });
        self.interned.insert(key, id);
        id
    }

    fn child(&mut self, expr: &Expr) -> Result<u32> {
        let id = self.intern_expr(expr)?;
        self.nodes[id as usize].uses += 1;
        Ok(id)
    }

    fn intern_expr(&mut self, expr: &Expr) -> Result<u32> {
        let key = match expr {
            Expr::Const(n) => NodeKey::Const(n.to_f64().to_bits()),
            Expr::Var(s) => {
                let slot = *self.index.get(s).ok_or_else(|| {
                    MesokinError::CompileError(format!(
                        "expression references symbol #{} which is not mapped to an input slot",
                        s.id()
                    ))
                })?;
                NodeKey::Input(slot as u32)
            }
            Expr::Add(ts) => {
                let mut ids = Vec::with_capacity(ts.len());
                for t in ts {
                    ids.push(self.child(t)?);
                }
                NodeKey::Nary(NaryOp::Add, ids)
            }
            Expr::Mul(fs) => {
                let mut ids = Vec::with_capacity(fs.len());
                for f in fs {
                    ids.push(self.child(f)?);
                }
                NodeKey::Nary(NaryOp::Mul, ids)
            }
            Expr::Pow(b, n) => {
                let base = self.child(b)?;
                NodeKey::Pow(base, *n)
            }
            Expr::PowE(b, e) => {
                // b^e lowers to exp(e * log(b))
                let lowered = Expr::Exp(Box::new(Expr::mul(vec![
                    (**e).clone(),
                    Expr::Log(b.clone()),
                ])));
                return self.intern_expr(&lowered);
            }
            Expr::Exp(u) => NodeKey::Unary(UnaryOp::Exp, self.child(u)?),
            Expr::Log(u) => NodeKey::Unary(UnaryOp::Log, self.child(u)?),
            Expr::Abs(u) => NodeKey::Unary(UnaryOp::Abs, self.child(u)?),
        };
        Ok(self.intern_node(key))
    }
}

/// Post-order DAG emission.
struct Emitter {
    nodes: Vec<Node>,
    roots: Vec<(u32, u32)>,
    num_outputs: usize,
    opt_level: usize,

    const_val: Vec<Option<f64>>,
    depth: Vec<u32>,
    temp_slot: Vec<Option<u32>>,
    computed: Vec<bool>,
    next_temp: u32,
    out: Vec<Instruction>,
}

impl Emitter {
    fn new(compiler: Compiler, opt_level: usize) -> Self {
        let n = compiler.nodes.len();
        Self {
            nodes: compiler.nodes,
            roots: compiler.roots,
            num_outputs: compiler.num_outputs,
            opt_level,
            const_val: vec![None; n],
            depth: vec![1; n],
            temp_slot: vec![None; n],
            computed: vec![false; n],
            next_temp: 0,
            out: Vec::new(),
        }
    }

    fn emit(mut self) -> Result<Code> {
        self.analyze();

        // multi-use non-leaf nodes get a temp slot up front
        for id in 0..self.nodes.len() {
            let leaf = matches!(self.nodes[id].key, NodeKey::Const(_) | NodeKey::Input(_));
            let folded = self.opt_level >= 1 && self.const_val[id].is_some();
            if self.nodes[id].uses > 1 && !leaf && !folded {
                self.temp_slot[id] = Some(self.next_temp);
                self.next_temp += 1;
            }
        }

        let roots = self.roots.clone();
        for (id, slot) in roots {
            self.emit_node(id);
            self.out.push(Instruction::StoreOutput(slot));
        }

        // stack high-water mark
        let mut depth = 0i32;
        let mut max = 0i32;
        for instr in &self.out {
            // a binary op peaks before popping
            depth += instr.stack_effect();
            max = max.max(depth);
        }
        debug_assert_eq!(depth, 0);

        Ok(Code {
            instructions: self.out,
            num_temps: self.next_temp as usize,
            max_stack: max as usize,
            num_outputs: self.num_outputs,
        })
    }

    /// Propagate constant subgraphs and stack depths bottom-up; node ids
    /// are already topologically ordered by construction.
    fn analyze(&mut self) {
        for id in 0..self.nodes.len() {
            let (cval, d) = match &self.nodes[id].key {
                NodeKey::Const(bits) => (Some(f64::from_bits(*bits)), 1),
                NodeKey::Input(_) => (None, 1),
                NodeKey::Nary(op, children) => {
                    let mut val = match op {
                        NaryOp::Add => Some(0.0),
                        NaryOp::Mul => Some(1.0),
                    };
                    for &c in children {
                        val = match (val, self.const_val[c as usize]) {
                            (Some(acc), Some(v)) => Some(match op {
                                NaryOp::Add => acc + v,
                                NaryOp::Mul => acc * v,
                            }),
                            _ => None,
                        };
                    }
                    let mut d = 0u32;
                    for (i, &c) in children.iter().enumerate() {
                        let extra = if i == 0 { 0 } else { 1 };
                        d = d.max(self.depth[c as usize] + extra);
                    }
                    (val, d)
                }
                NodeKey::Pow(c, n) => (
                    self.const_val[*c as usize].map(|v| v.powi(*n)),
                    self.depth[*c as usize],
                ),
                NodeKey::Unary(op, c) => {
                    let val = self.const_val[*c as usize].map(|v| match op {
                        UnaryOp::Exp => v.exp(),
                        UnaryOp::Log => v.ln(),
                        UnaryOp::Abs => v.abs(),
                    });
                    (val, self.depth[*c as usize])
                }
            };
            self.const_val[id] = cval;
            self.depth[id] = d;
        }
    }

    fn emit_node(&mut self, id: u32) {
        let idx = id as usize;
        if self.computed[idx] {
            if let Some(t) = self.temp_slot[idx] {
                self.out.push(Instruction::LoadTemp(t));
                return;
            }
        }

        if self.opt_level >= 1 {
            if let Some(v) = self.const_val[idx] {
                self.out.push(Instruction::LoadConst(v));
                return;
            }
        }

        match self.nodes[idx].key.clone() {
            NodeKey::Const(bits) => {
                self.out.push(Instruction::LoadConst(f64::from_bits(bits)));
                return;
            }
            NodeKey::Input(slot) => {
                self.out.push(Instruction::LoadInput(slot));
                return;
            }
            NodeKey::Nary(op, mut children) => {
                if self.opt_level >= 1 {
                    // deepest child first keeps the live window short
                    children.sort_by(|&a, &b| {
                        self.depth[b as usize].cmp(&self.depth[a as usize])
                    });
                }
                self.emit_chain(op, &children);
            }
            NodeKey::Pow(base, n) => self.emit_pow(base, n),
            NodeKey::Unary(op, child) => {
                self.emit_node(child);
                self.out.push(match op {
                    UnaryOp::Exp => Instruction::Exp,
                    UnaryOp::Log => Instruction::Log,
                    UnaryOp::Abs => Instruction::Abs,
                });
            }
        }

        if let Some(t) = self.temp_slot[idx] {
            self.out.push(Instruction::StoreTemp(t));
        }
        self.computed[idx] = true;
    }

    /// Does node `id` hold the immediate constant -1?
    fn is_minus_one(&self, id: u32) -> bool {
        matches!(
            self.nodes[id as usize].key,
            NodeKey::Const(bits) if bits == (-1.0f64).to_bits()
        )
    }

    /// The denominator node of a single-use reciprocal factor, if any.
    fn reciprocal_of(&self, id: u32) -> Option<u32> {
        match self.nodes[id as usize].key {
            NodeKey::Pow(inner, -1) if self.temp_slot[id as usize].is_none() => Some(inner),
            _ => None,
        }
    }

    /// The positive part of a single-use `-1 * x` term, if any.
    fn negated_term_of(&self, id: u32) -> Option<u32> {
        match &self.nodes[id as usize].key {
            NodeKey::Nary(NaryOp::Mul, inner)
                if inner.len() == 2
                    && self.is_minus_one(inner[0])
                    && self.temp_slot[id as usize].is_none() =>
            {
                Some(inner[1])
            }
            _ => None,
        }
    }

    fn emit_chain(&mut self, op: NaryOp, children: &[u32]) {
        let mut first = true;
        let mut negate_after = false;

        for &c in children {
            // -1 coefficient in a product lowers to a final negation
            if self.opt_level >= 1
                && op == NaryOp::Mul
                && children.len() > 1
                && self.is_minus_one(c)
            {
                negate_after = true;
                continue;
            }
            // x^(-1) factors lower to a division
            if self.opt_level >= 1 && op == NaryOp::Mul && !first {
                if let Some(denominator) = self.reciprocal_of(c) {
                    self.emit_node(denominator);
                    self.out.push(Instruction::Div);
                    continue;
                }
            }
            // negated terms of a sum lower to a subtraction
            if self.opt_level >= 1 && op == NaryOp::Add && !first {
                if let Some(positive) = self.negated_term_of(c) {
                    self.emit_node(positive);
                    self.out.push(Instruction::Sub);
                    continue;
                }
            }

            self.emit_node(c);
            if !first {
                self.out.push(match op {
                    NaryOp::Add => Instruction::Add,
                    NaryOp::Mul => Instruction::Mul,
                });
            }
            first = false;
        }

        if first {
            // every factor was folded away; the chain value is its identity
            self.out.push(Instruction::LoadConst(match op {
                NaryOp::Add => 0.0,
                NaryOp::Mul => 1.0,
            }));
        }
        if negate_after {
            self.out.push(Instruction::Neg);
        }
    }

    fn emit_pow(&mut self, base: u32, n: i32) {
        self.emit_node(base);
        if self.opt_level >= 1 && (2..=4).contains(&n) {
            // strength reduction: small powers become multiplies through
            // a scratch temp
            let t = match self.temp_slot[base as usize] {
                Some(t) => t,
                None => {
                    let t = self.next_temp;
                    self.next_temp += 1;
                    self.out.push(Instruction::StoreTemp(t));
                    t
                }
            };
            for _ in 1..n {
                self.out.push(Instruction::LoadTemp(t));
                self.out.push(Instruction::Mul);
            }
        } else {
            self.out.push(Instruction::Powi(n));
        }
    }
}

// =============================================================================
// INTERPRETER
// =============================================================================

/// Reentrant stack-machine interpreter.
///
/// Holds no per-call allocations: the stack and temp buffers are resized
/// to the code object's compile-time bounds on first use and reused.
#[derive(Debug, Default)]
pub struct Interpreter {
    stack: Vec<f64>,
    temps: Vec<f64>,
}

impl EngineInterpreter for Interpreter {
    type Code = Code;

    fn new() -> Self {
        Self::default()
    }

    fn run(&mut self, code: &Code, input: &[f64], output: &mut [f64]) {
        debug_assert!(output.len() >= code.num_outputs);
        self.stack.clear();
        self.stack.reserve(code.max_stack);
        if self.temps.len() < code.num_temps {
            self.temps.resize(code.num_temps, 0.0);
        }

        for instr in &code.instructions {
            match *instr {
                Instruction::LoadConst(v) => self.stack.push(v),
                Instruction::LoadInput(i) => self.stack.push(input[i as usize]),
                Instruction::LoadTemp(i) => self.stack.push(self.temps[i as usize]),
                Instruction::StoreTemp(i) => {
                    self.temps[i as usize] = *self.stack.last().unwrap();
                }
                Instruction::StoreOutput(i) => {
                    output[i as usize] = self.stack.pop().unwrap();
                }
                Instruction::Add => {
                    let b = self.stack.pop().unwrap();
                    *self.stack.last_mut().unwrap() += b;
                }
                Instruction::Sub => {
                    let b = self.stack.pop().unwrap();
                    *self.stack.last_mut().unwrap() -= b;
                }
                Instruction::Mul => {
                    let b = self.stack.pop().unwrap();
                    *self.stack.last_mut().unwrap() *= b;
                }
                Instruction::Div => {
                    let b = self.stack.pop().unwrap();
                    *self.stack.last_mut().unwrap() /= b;
                }
                Instruction::Neg => {
                    let a = self.stack.last_mut().unwrap();
                    *a = -*a;
                }
                Instruction::Exp => {
                    let a = self.stack.last_mut().unwrap();
                    *a = a.exp();
                }
                Instruction::Log => {
                    let a = self.stack.last_mut().unwrap();
                    *a = a.ln();
                }
                Instruction::Abs => {
                    let a = self.stack.last_mut().unwrap();
                    *a = a.abs();
                }
                Instruction::Powi(n) => {
                    let a = self.stack.last_mut().unwrap();
                    *a = a.powi(n);
                }
            }
        }
        debug_assert!(self.stack.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile_vector;
    use approx::assert_relative_eq;
    use mesokin_expr::{parse_expression, SymbolTable, ValueMap};

    fn setup(exprs: &[&str]) -> (Vec<Expr>, InputIndex) {
        let mut table = SymbolTable::new();
        let parsed: Vec<Expr> = exprs
            .iter()
            .map(|e| parse_expression(e, &mut table).unwrap())
            .collect();
        // index every free symbol in id (first-appearance) order
        let mut symbols = std::collections::BTreeSet::new();
        for e in &parsed {
            symbols.extend(e.symbols());
        }
        let index = symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (*s, i))
            .collect();
        (parsed, index)
    }

    fn eval_reference(exprs: &[Expr], index: &InputIndex, input: &[f64]) -> Vec<f64> {
        let mut values = ValueMap::new();
        for (s, i) in index {
            values.insert(*s, input[*i]);
        }
        exprs.iter().map(|e| e.eval(&values).unwrap()).collect()
    }

    fn check_all_levels(sources: &[&str], input_hint: &[f64]) {
        let (exprs, index) = setup(sources);
        let n_in = index.len();
        let input: Vec<f64> = (0..n_in)
            .map(|i| input_hint.get(i).copied().unwrap_or(0.5 + i as f64))
            .collect();
        let expected = eval_reference(&exprs, &index, &input);

        for opt in [0usize, 1] {
            let code = compile_vector::<Bci>(&exprs, &index, opt).unwrap();
            let mut interp = Interpreter::new();
            let mut output = vec![0.0; code.num_outputs()];
            interp.run(&code, &input, &mut output);
            for (got, want) in output.iter().zip(expected.iter()) {
                assert_relative_eq!(got, want, max_relative = 1e-14);
            }
        }
    }

    #[test]
    fn test_basic_arithmetic() {
        check_all_levels(
            &["a + b * c", "a - b / c", "a * a * a", "2 * a + 3"],
            &[1.7, 2.3, 0.9],
        );
    }

    #[test]
    fn test_transcendentals_and_powers() {
        check_all_levels(
            &["exp(-a) * b", "log(a + 1) + abs(0 - b)", "a^(4) + a^(-2)", "(a + b)^(2)"],
            &[0.8, 1.9],
        );
    }

    #[test]
    fn test_shared_subexpressions_use_temps() {
        // exp(a + b) and the sum a + b are both consumed twice
        let (exprs, index) = setup(&["exp(a + b) * (a + b)", "exp(a + b) + c"]);
        let code = compile_vector::<Bci>(&exprs, &index, 0).unwrap();
        assert!(code.num_temps() >= 1);

        let input = [1.5, 2.5, 3.5];
        let mut output = [0.0; 2];
        let mut interp = Interpreter::new();
        interp.run(&code, &input, &mut output);
        let expected = eval_reference(&exprs, &index, &input);
        assert_relative_eq!(output[0], expected[0], max_relative = 1e-14);
        assert_relative_eq!(output[1], expected[1], max_relative = 1e-14);
    }

    #[test]
    fn test_constant_folding_at_opt1() {
        let (exprs, index) = setup(&["2 * 3 + 4 * a"]);
        let code0 = compile_vector::<Bci>(&exprs, &index, 0).unwrap();
        let code1 = compile_vector::<Bci>(&exprs, &index, 1).unwrap();
        assert!(code1.instructions().len() <= code0.instructions().len());
    }

    #[test]
    fn test_unknown_symbol_is_compile_error() {
        let mut table = SymbolTable::new();
        let e = parse_expression("a + b", &mut table).unwrap();
        let mut index = InputIndex::new();
        index.insert(table.lookup("a").unwrap(), 0);
        let mut compiler = Compiler::new(index);
        assert!(matches!(
            compiler.compile_into(&e, 0),
            Err(MesokinError::CompileError(_))
        ));
    }

    #[test]
    fn test_matrix_store() {
        let mut table = SymbolTable::new();
        let rows = vec![
            vec![
                parse_expression("a", &mut table).unwrap(),
                parse_expression("a + b", &mut table).unwrap(),
            ],
            vec![
                parse_expression("a * b", &mut table).unwrap(),
                parse_expression("b", &mut table).unwrap(),
            ],
        ];
        let mut index = InputIndex::new();
        index.insert(table.lookup("a").unwrap(), 0);
        index.insert(table.lookup("b").unwrap(), 1);
        let code = crate::compile_matrix::<Bci>(&rows, &index, 1).unwrap();
        let mut out = vec![0.0; 4];
        let mut interp = Interpreter::new();
        interp.run(&code, &[2.0, 5.0], &mut out);
        assert_eq!(out, vec![2.0, 7.0, 10.0, 5.0]);
    }

    #[test]
    fn test_interpreter_is_reusable() {
        let (exprs, index) = setup(&["a * b + 1"]);
        let code = compile_vector::<Bci>(&exprs, &index, 1).unwrap();
        let mut interp = Interpreter::new();
        let mut out = [0.0];
        for i in 0..10 {
            let input = [i as f64, 2.0];
            interp.run(&code, &input, &mut out);
            assert_relative_eq!(out[0], 2.0 * i as f64 + 1.0);
        }
    }
}

//! Algebraic expression trees.
//!
//! Trees are immutable; the smart constructors normalize while building:
//! constants are folded exactly (rational) or in `f64`, sums and products
//! are flattened and sorted into a canonical order, like terms of a sum
//! are merged and equal factors of a product are collected into integer
//! powers. Structural equality on the normalized form therefore equates
//! expressions modulo associativity and commutativity.

use crate::symbol::{Symbol, SymbolTable};
use crate::{Substitution, ValueMap};
use mesokin_core::{MesokinError, Result};
use num_rational::Ratio;
use num_traits::{CheckedAdd, CheckedMul, Signed, ToPrimitive, Zero};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// NUMBERS
// =============================================================================

/// Numeric constant: exact rational where possible, `f64` otherwise.
///
/// Rational arithmetic falls back to floating point on overflow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Rational(Ratio<i64>),
    Float(f64),
}

impl Number {
    pub const ZERO: Number = Number::Rational(Ratio::new_raw(0, 1));
    pub const ONE: Number = Number::Rational(Ratio::new_raw(1, 1));

    pub fn integer(n: i64) -> Number {
        Number::Rational(Ratio::from_integer(n))
    }

    pub fn to_f64(self) -> f64 {
        match self {
            Number::Rational(r) => r.to_f64().unwrap_or(f64::NAN),
            Number::Float(v) => v,
        }
    }

    pub fn is_zero(self) -> bool {
        match self {
            Number::Rational(r) => r.is_zero(),
            Number::Float(v) => v == 0.0,
        }
    }

    pub fn is_one(self) -> bool {
        match self {
            Number::Rational(r) => r == Ratio::from_integer(1),
            Number::Float(v) => v == 1.0,
        }
    }

    pub fn is_negative(self) -> bool {
        match self {
            Number::Rational(r) => r.is_negative(),
            Number::Float(v) => v < 0.0,
        }
    }

    pub fn add(self, other: Number) -> Number {
        match (self, other) {
            (Number::Rational(a), Number::Rational(b)) => match a.checked_add(&b) {
                Some(r) => Number::Rational(r),
                None => Number::Float(self.to_f64() + other.to_f64()),
            },
            _ => Number::Float(self.to_f64() + other.to_f64()),
        }
    }

    pub fn mul(self, other: Number) -> Number {
        match (self, other) {
            (Number::Rational(a), Number::Rational(b)) => match a.checked_mul(&b) {
                Some(r) => Number::Rational(r),
                None => Number::Float(self.to_f64() * other.to_f64()),
            },
            _ => Number::Float(self.to_f64() * other.to_f64()),
        }
    }

    pub fn neg(self) -> Number {
        match self {
            Number::Rational(r) => Number::Rational(-r),
            Number::Float(v) => Number::Float(-v),
        }
    }

    pub fn powi(self, n: i32) -> Number {
        match self {
            Number::Rational(r) => {
                if r.is_zero() && n < 0 {
                    return Number::Float(f64::INFINITY);
                }
                let base = if n < 0 { r.recip() } else { r };
                let mut acc = Ratio::from_integer(1);
                for _ in 0..n.unsigned_abs() {
                    match acc.checked_mul(&base) {
                        Some(next) => acc = next,
                        None => return Number::Float(self.to_f64().powi(n)),
                    }
                }
                Number::Rational(acc)
            }
            Number::Float(v) => Number::Float(v.powi(n)),
        }
    }

    pub fn abs(self) -> Number {
        match self {
            Number::Rational(r) => Number::Rational(r.abs()),
            Number::Float(v) => Number::Float(v.abs()),
        }
    }
}

// =============================================================================
// EXPRESSION TREE
// =============================================================================

/// Normalized algebraic expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Numeric constant.
    Const(Number),
    /// Interned symbol.
    Var(Symbol),
    /// Sum of at least two terms.
    Add(Vec<Expr>),
    /// Product of at least two factors.
    Mul(Vec<Expr>),
    /// Integer power (exponent never 0 or 1 after normalization).
    Pow(Box<Expr>, i32),
    /// Symbolic power.
    PowE(Box<Expr>, Box<Expr>),
    /// Exponential.
    Exp(Box<Expr>),
    /// Natural logarithm.
    Log(Box<Expr>),
    /// Absolute value.
    Abs(Box<Expr>),
}

/// Total canonical ordering used to sort the operands of commutative
/// operations.
fn rank(e: &Expr) -> u8 {
    match e {
        Expr::Const(_) => 0,
        Expr::Var(_) => 1,
        Expr::Pow(_, _) => 2,
        Expr::PowE(_, _) => 3,
        Expr::Exp(_) => 4,
        Expr::Log(_) => 5,
        Expr::Abs(_) => 6,
        Expr::Mul(_) => 7,
        Expr::Add(_) => 8,
    }
}

pub(crate) fn canonical_cmp(a: &Expr, b: &Expr) -> Ordering {
    match (a, b) {
        (Expr::Const(x), Expr::Const(y)) => x
            .to_f64()
            .partial_cmp(&y.to_f64())
            .unwrap_or(Ordering::Equal),
        (Expr::Var(x), Expr::Var(y)) => x.cmp(y),
        (Expr::Pow(bx, ex), Expr::Pow(by, ey)) => {
            canonical_cmp(bx, by).then(ex.cmp(ey))
        }
        (Expr::PowE(bx, ex), Expr::PowE(by, ey)) => {
            canonical_cmp(bx, by).then_with(|| canonical_cmp(ex, ey))
        }
        (Expr::Exp(x), Expr::Exp(y))
        | (Expr::Log(x), Expr::Log(y))
        | (Expr::Abs(x), Expr::Abs(y)) => canonical_cmp(x, y),
        (Expr::Add(xs), Expr::Add(ys)) | (Expr::Mul(xs), Expr::Mul(ys)) => {
            for (x, y) in xs.iter().zip(ys.iter()) {
                let ord = canonical_cmp(x, y);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            xs.len().cmp(&ys.len())
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

impl Expr {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    pub fn zero() -> Expr {
        Expr::Const(Number::ZERO)
    }

    pub fn one() -> Expr {
        Expr::Const(Number::ONE)
    }

    pub fn int(n: i64) -> Expr {
        Expr::Const(Number::integer(n))
    }

    pub fn rational(num: i64, den: i64) -> Expr {
        Expr::Const(Number::Rational(Ratio::new(num, den)))
    }

    pub fn num(v: f64) -> Expr {
        Expr::Const(Number::Float(v))
    }

    pub fn var(s: Symbol) -> Expr {
        Expr::Var(s)
    }

    /// Normalized sum: flattens, folds constants, merges like terms.
    pub fn add(terms: Vec<Expr>) -> Expr {
        let mut flat = Vec::with_capacity(terms.len());
        for t in terms {
            match t {
                Expr::Add(ts) => flat.extend(ts),
                other => flat.push(other),
            }
        }

        let mut constant = Number::ZERO;
        let mut merged: Vec<(Expr, Number)> = Vec::new();
        for t in flat {
            let (coeff, base) = t.split_coeff();
            if base.is_one() {
                constant = constant.add(coeff);
                continue;
            }
            match merged.binary_search_by(|(b, _)| canonical_cmp(b, &base)) {
                Ok(i) => merged[i].1 = merged[i].1.add(coeff),
                Err(i) => merged.insert(i, (base, coeff)),
            }
        }

        let mut out = Vec::new();
        if !constant.is_zero() {
            out.push(Expr::Const(constant));
        }
        for (base, coeff) in merged {
            if coeff.is_zero() {
                continue;
            }
            out.push(Expr::scale(coeff, base));
        }
        match out.len() {
            0 => Expr::zero(),
            1 => out.pop().unwrap(),
            _ => Expr::Add(out),
        }
    }

    pub fn sub(a: Expr, b: Expr) -> Expr {
        Expr::add(vec![a, Expr::neg(b)])
    }

    pub fn neg(a: Expr) -> Expr {
        Expr::mul(vec![Expr::int(-1), a])
    }

    /// Normalized product: flattens, folds constants, collects equal
    /// bases into integer powers.
    pub fn mul(factors: Vec<Expr>) -> Expr {
        let mut flat = Vec::with_capacity(factors.len());
        for f in factors {
            match f {
                Expr::Mul(fs) => flat.extend(fs),
                other => flat.push(other),
            }
        }

        let mut coeff = Number::ONE;
        let mut bases: Vec<(Expr, i32)> = Vec::new();
        let mut push_base = |bases: &mut Vec<(Expr, i32)>, base: Expr, e: i32| {
            match bases.binary_search_by(|(b, _)| canonical_cmp(b, &base)) {
                Ok(i) => bases[i].1 += e,
                Err(i) => bases.insert(i, (base, e)),
            }
        };
        for f in flat {
            match f {
                Expr::Const(n) => coeff = coeff.mul(n),
                Expr::Pow(b, e) => push_base(&mut bases, *b, e),
                other => push_base(&mut bases, other, 1),
            }
        }

        if coeff.is_zero() {
            return Expr::zero();
        }

        let mut out = Vec::new();
        if !coeff.is_one() {
            out.push(Expr::Const(coeff));
        }
        for (base, e) in bases {
            match e {
                0 => {}
                1 => out.push(base),
                _ => out.push(Expr::Pow(Box::new(base), e)),
            }
        }
        match out.len() {
            0 => Expr::one(),
            1 => out.pop().unwrap(),
            _ => Expr::Mul(out),
        }
    }

    pub fn div(a: Expr, b: Expr) -> Expr {
        Expr::mul(vec![a, Expr::powi(b, -1)])
    }

    /// Integer power with simplification.
    pub fn powi(base: Expr, n: i32) -> Expr {
        match n {
            0 => Expr::one(),
            1 => base,
            _ => match base {
                Expr::Const(c) => Expr::Const(c.powi(n)),
                Expr::Pow(b, m) => Expr::powi(*b, m.saturating_mul(n)),
                Expr::Mul(fs) => {
                    Expr::mul(fs.into_iter().map(|f| Expr::powi(f, n)).collect())
                }
                other => Expr::Pow(Box::new(other), n),
            },
        }
    }

    /// General power; collapses to [`Expr::powi`] for small integer
    /// exponents.
    pub fn pow(base: Expr, exponent: Expr) -> Expr {
        if let Expr::Const(Number::Rational(r)) = &exponent {
            if r.is_integer() {
                if let Some(n) = r.to_integer().to_i32() {
                    return Expr::powi(base, n);
                }
            }
        }
        PowSimplify::apply(base, exponent)
    }

    pub fn exp(arg: Expr) -> Expr {
        match arg {
            Expr::Const(n) if n.is_zero() => Expr::one(),
            Expr::Log(u) => *u,
            other => Expr::Exp(Box::new(other)),
        }
    }

    pub fn log(arg: Expr) -> Expr {
        match arg {
            Expr::Const(n) if n.is_one() => Expr::zero(),
            Expr::Exp(u) => *u,
            other => Expr::Log(Box::new(other)),
        }
    }

    pub fn abs(arg: Expr) -> Expr {
        match arg {
            Expr::Const(n) => Expr::Const(n.abs()),
            Expr::Abs(u) => Expr::Abs(u),
            other => Expr::Abs(Box::new(other)),
        }
    }

    fn scale(coeff: Number, base: Expr) -> Expr {
        if coeff.is_one() {
            base
        } else {
            Expr::mul(vec![Expr::Const(coeff), base])
        }
    }

    /// Split a term into its numeric coefficient and the remaining
    /// factor; `(c, 1)` for a pure constant.
    fn split_coeff(self) -> (Number, Expr) {
        match self {
            Expr::Const(n) => (n, Expr::one()),
            Expr::Mul(fs) => {
                let mut coeff = Number::ONE;
                let mut rest = Vec::with_capacity(fs.len());
                for f in fs {
                    match f {
                        Expr::Const(n) => coeff = coeff.mul(n),
                        other => rest.push(other),
                    }
                }
                let base = match rest.len() {
                    0 => Expr::one(),
                    1 => rest.pop().unwrap(),
                    _ => Expr::Mul(rest),
                };
                (coeff, base)
            }
            other => (Number::ONE, other),
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn is_zero(&self) -> bool {
        matches!(self, Expr::Const(n) if n.is_zero())
    }

    pub fn is_one(&self) -> bool {
        matches!(self, Expr::Const(n) if n.is_one())
    }

    /// Numeric value if the expression is a bare constant.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Expr::Const(n) => Some(n.to_f64()),
            _ => None,
        }
    }

    /// Exact rational value if the expression is a rational constant.
    pub fn as_rational(&self) -> Option<Ratio<i64>> {
        match self {
            Expr::Const(Number::Rational(r)) => Some(*r),
            _ => None,
        }
    }

    /// Does the expression reference `sym`?
    pub fn has(&self, sym: Symbol) -> bool {
        match self {
            Expr::Const(_) => false,
            Expr::Var(s) => *s == sym,
            Expr::Add(ts) | Expr::Mul(ts) => ts.iter().any(|t| t.has(sym)),
            Expr::Pow(b, _) => b.has(sym),
            Expr::PowE(b, e) => b.has(sym) || e.has(sym),
            Expr::Exp(u) | Expr::Log(u) | Expr::Abs(u) => u.has(sym),
        }
    }

    /// The set of free symbols.
    pub fn symbols(&self) -> BTreeSet<Symbol> {
        let mut set = BTreeSet::new();
        self.collect_symbols(&mut set);
        set
    }

    fn collect_symbols(&self, set: &mut BTreeSet<Symbol>) {
        match self {
            Expr::Const(_) => {}
            Expr::Var(s) => {
                set.insert(*s);
            }
            Expr::Add(ts) | Expr::Mul(ts) => {
                for t in ts {
                    t.collect_symbols(set);
                }
            }
            Expr::Pow(b, _) => b.collect_symbols(set),
            Expr::PowE(b, e) => {
                b.collect_symbols(set);
                e.collect_symbols(set);
            }
            Expr::Exp(u) | Expr::Log(u) | Expr::Abs(u) => u.collect_symbols(set),
        }
    }

    /// Node count, a cheap complexity measure.
    pub fn size(&self) -> usize {
        match self {
            Expr::Const(_) | Expr::Var(_) => 1,
            Expr::Add(ts) | Expr::Mul(ts) => 1 + ts.iter().map(Expr::size).sum::<usize>(),
            Expr::Pow(b, _) => 1 + b.size(),
            Expr::PowE(b, e) => 1 + b.size() + e.size(),
            Expr::Exp(u) | Expr::Log(u) | Expr::Abs(u) => 1 + u.size(),
        }
    }

    // -------------------------------------------------------------------------
    // Rewriting
    // -------------------------------------------------------------------------

    /// Simultaneous capture-free substitution.
    pub fn substitute(&self, map: &Substitution) -> Expr {
        match self {
            Expr::Const(_) => self.clone(),
            Expr::Var(s) => map.get(s).cloned().unwrap_or_else(|| self.clone()),
            Expr::Add(ts) => Expr::add(ts.iter().map(|t| t.substitute(map)).collect()),
            Expr::Mul(fs) => Expr::mul(fs.iter().map(|f| f.substitute(map)).collect()),
            Expr::Pow(b, n) => Expr::powi(b.substitute(map), *n),
            Expr::PowE(b, e) => Expr::pow(b.substitute(map), e.substitute(map)),
            Expr::Exp(u) => Expr::exp(u.substitute(map)),
            Expr::Log(u) => Expr::log(u.substitute(map)),
            Expr::Abs(u) => Expr::abs(u.substitute(map)),
        }
    }

    /// Replace a single symbol.
    pub fn substitute_symbol(&self, sym: Symbol, replacement: &Expr) -> Expr {
        let mut map = Substitution::new();
        map.insert(sym, replacement.clone());
        self.substitute(&map)
    }

    /// Partial derivative by `sym`.
    pub fn diff(&self, sym: Symbol) -> Expr {
        match self {
            Expr::Const(_) => Expr::zero(),
            Expr::Var(s) => {
                if *s == sym {
                    Expr::one()
                } else {
                    Expr::zero()
                }
            }
            Expr::Add(ts) => Expr::add(ts.iter().map(|t| t.diff(sym)).collect()),
            Expr::Mul(fs) => {
                let mut terms = Vec::with_capacity(fs.len());
                for (i, f) in fs.iter().enumerate() {
                    let d = f.diff(sym);
                    if d.is_zero() {
                        continue;
                    }
                    let mut factors = vec![d];
                    for (j, g) in fs.iter().enumerate() {
                        if i != j {
                            factors.push(g.clone());
                        }
                    }
                    terms.push(Expr::mul(factors));
                }
                Expr::add(terms)
            }
            Expr::Pow(b, n) => Expr::mul(vec![
                Expr::int(*n as i64),
                Expr::powi((**b).clone(), n - 1),
                b.diff(sym),
            ]),
            Expr::PowE(b, e) => {
                // d(b^e) = b^e * (e' log b + e b'/b)
                let inner = Expr::add(vec![
                    Expr::mul(vec![e.diff(sym), Expr::log((**b).clone())]),
                    Expr::mul(vec![
                        (**e).clone(),
                        b.diff(sym),
                        Expr::powi((**b).clone(), -1),
                    ]),
                ]);
                Expr::mul(vec![self.clone(), inner])
            }
            Expr::Exp(u) => Expr::mul(vec![u.diff(sym), self.clone()]),
            Expr::Log(u) => Expr::mul(vec![u.diff(sym), Expr::powi((**u).clone(), -1)]),
            Expr::Abs(u) => Expr::mul(vec![
                u.diff(sym),
                (**u).clone(),
                Expr::powi(Expr::abs((**u).clone()), -1),
            ]),
        }
    }

    /// Distribute products and small positive integer powers over sums.
    pub fn expand(&self) -> Expr {
        match self {
            Expr::Const(_) | Expr::Var(_) => self.clone(),
            Expr::Add(ts) => Expr::add(ts.iter().map(Expr::expand).collect()),
            Expr::Mul(fs) => {
                let expanded: Vec<Expr> = fs.iter().map(Expr::expand).collect();
                distribute(expanded)
            }
            Expr::Pow(b, n) => {
                let base = b.expand();
                if *n > 1 && *n <= 8 && matches!(base, Expr::Add(_)) {
                    let factors = vec![base; *n as usize];
                    distribute(factors)
                } else {
                    Expr::powi(base, *n)
                }
            }
            Expr::PowE(b, e) => Expr::pow(b.expand(), e.expand()),
            Expr::Exp(u) => Expr::exp(u.expand()),
            Expr::Log(u) => Expr::log(u.expand()),
            Expr::Abs(u) => Expr::abs(u.expand()),
        }
    }

    /// Integer-degree Laurent coefficients in `sym`.
    ///
    /// Fails when `sym` occurs outside a monomial position (inside
    /// `exp`/`log`/`abs`, in a symbolic power, or under a negative power
    /// of a composite) — the expansion-based passes treat that as "cannot
    /// expand", not as a model error.
    pub fn poly_coeffs(&self, sym: Symbol) -> Result<BTreeMap<i32, Expr>> {
        let expanded = self.expand();
        let terms: Vec<Expr> = match expanded {
            Expr::Add(ts) => ts,
            other => vec![other],
        };

        let mut groups: BTreeMap<i32, Vec<Expr>> = BTreeMap::new();
        for term in terms {
            let factors: Vec<Expr> = match term {
                Expr::Mul(fs) => fs,
                other => vec![other],
            };
            let mut degree = 0i32;
            let mut cofactors = Vec::with_capacity(factors.len());
            for f in factors {
                let monomial_degree = match &f {
                    Expr::Var(s) if *s == sym => Some(1),
                    Expr::Pow(b, n) if matches!(&**b, Expr::Var(s) if *s == sym) => Some(*n),
                    _ => None,
                };
                match monomial_degree {
                    Some(d) => degree += d,
                    None if !f.has(sym) => cofactors.push(f),
                    None => {
                        return Err(MesokinError::SemanticError(
                            "expression is not a Laurent polynomial in the requested symbol"
                                .to_string(),
                        ))
                    }
                }
            }
            groups.entry(degree).or_default().push(Expr::mul(cofactors));
        }

        Ok(groups
            .into_iter()
            .map(|(deg, terms)| (deg, Expr::add(terms)))
            .filter(|(_, e)| !e.is_zero())
            .collect())
    }

    /// Coefficient of `sym^degree`, zero when absent; the truncated-series
    /// accessor used by the propensity expansion.
    pub fn series_coeff(&self, sym: Symbol, degree: i32) -> Result<Expr> {
        Ok(self
            .poly_coeffs(sym)?
            .remove(&degree)
            .unwrap_or_else(Expr::zero))
    }

    // -------------------------------------------------------------------------
    // Numeric evaluation
    // -------------------------------------------------------------------------

    /// Reduce to a `f64` against a symbol-value table.
    pub fn eval(&self, values: &ValueMap) -> Result<f64> {
        match self {
            Expr::Const(n) => Ok(n.to_f64()),
            Expr::Var(s) => values.get(s).copied().ok_or_else(|| {
                MesokinError::SemanticError(format!(
                    "unresolved symbol #{} in numeric evaluation",
                    s.id()
                ))
            }),
            Expr::Add(ts) => {
                let mut acc = 0.0;
                for t in ts {
                    acc += t.eval(values)?;
                }
                Ok(acc)
            }
            Expr::Mul(fs) => {
                let mut acc = 1.0;
                for f in fs {
                    acc *= f.eval(values)?;
                }
                Ok(acc)
            }
            Expr::Pow(b, n) => Ok(b.eval(values)?.powi(*n)),
            Expr::PowE(b, e) => Ok(b.eval(values)?.powf(e.eval(values)?)),
            Expr::Exp(u) => Ok(u.eval(values)?.exp()),
            Expr::Log(u) => Ok(u.eval(values)?.ln()),
            Expr::Abs(u) => Ok(u.eval(values)?.abs()),
        }
    }

    // -------------------------------------------------------------------------
    // Printing
    // -------------------------------------------------------------------------

    /// Conventional infix form, parseable back into an equal tree.
    pub fn format(&self, table: &SymbolTable) -> String {
        self.format_prec(table, 0)
    }

    fn format_prec(&self, table: &SymbolTable, parent: u8) -> String {
        let (prec, s) = match self {
            Expr::Const(Number::Rational(r)) => {
                if r.is_integer() {
                    let prec = if r.is_negative() { 1 } else { 9 };
                    (prec, format!("{}", r.to_integer()))
                } else {
                    (2, format!("{}/{}", r.numer(), r.denom()))
                }
            }
            Expr::Const(Number::Float(v)) => {
                let prec = if *v < 0.0 { 1 } else { 9 };
                (prec, format_f64(*v))
            }
            Expr::Var(s) => (9, table.name(*s).to_string()),
            Expr::Add(ts) => {
                let mut out = String::new();
                for (i, t) in ts.iter().enumerate() {
                    let part = t.format_prec(table, 1);
                    if i == 0 {
                        out.push_str(&part);
                    } else if let Some(stripped) = part.strip_prefix('-') {
                        out.push_str(" - ");
                        out.push_str(stripped);
                    } else {
                        out.push_str(" + ");
                        out.push_str(&part);
                    }
                }
                (1, out)
            }
            Expr::Mul(fs) => {
                // print a leading -1 coefficient as a sign
                let (sign, rest): (&str, &[Expr]) = match fs.first() {
                    Some(Expr::Const(n)) if *n == Number::integer(-1) && fs.len() > 1 => {
                        ("-", &fs[1..])
                    }
                    _ => ("", &fs[..]),
                };
                let mut parts = Vec::with_capacity(rest.len());
                for f in rest {
                    if let Expr::Pow(b, n) = f {
                        if *n < 0 {
                            let denom = Expr::powi((**b).clone(), -n);
                            parts.push(format!("/ {}", denom.format_prec(table, 3)));
                            continue;
                        }
                    }
                    parts.push(f.format_prec(table, 2));
                }
                // ensure the product does not start with a division
                if parts.first().map(|p| p.starts_with('/')) == Some(true) {
                    parts.insert(0, "1".to_string());
                }
                let joined = parts
                    .iter()
                    .enumerate()
                    .map(|(i, p)| {
                        if i == 0 {
                            p.clone()
                        } else if p.starts_with('/') {
                            format!(" {}", p)
                        } else {
                            format!(" * {}", p)
                        }
                    })
                    .collect::<String>();
                let prec = if sign.is_empty() { 2 } else { 1 };
                (prec, format!("{}{}", sign, joined))
            }
            Expr::Pow(b, n) => (
                3,
                format!("{}^({})", b.format_prec(table, 4), n),
            ),
            Expr::PowE(b, e) => (
                3,
                format!(
                    "{}^({})",
                    b.format_prec(table, 4),
                    e.format_prec(table, 0)
                ),
            ),
            Expr::Exp(u) => (9, format!("exp({})", u.format_prec(table, 0))),
            Expr::Log(u) => (9, format!("log({})", u.format_prec(table, 0))),
            Expr::Abs(u) => (9, format!("abs({})", u.format_prec(table, 0))),
        };
        if prec < parent {
            format!("({})", s)
        } else {
            s
        }
    }
}

fn format_f64(v: f64) -> String {
    if v == v.trunc() && v.abs() < 1e15 {
        format!("{:.1}", v)
    } else {
        format!("{}", v)
    }
}

/// Cross-multiply a list of (possibly sum-valued) factors into a sum of
/// products.
fn distribute(factors: Vec<Expr>) -> Expr {
    let mut terms: Vec<Vec<Expr>> = vec![Vec::new()];
    for f in factors {
        match f {
            Expr::Add(ts) => {
                let mut next = Vec::with_capacity(terms.len() * ts.len());
                for t in &ts {
                    for existing in &terms {
                        let mut e = existing.clone();
                        e.push(t.clone());
                        next.push(e);
                    }
                }
                terms = next;
            }
            other => {
                for existing in &mut terms {
                    existing.push(other.clone());
                }
            }
        }
    }
    Expr::add(terms.into_iter().map(Expr::mul).collect())
}

/// Simplifications for symbolic powers kept out of the hot constructors.
struct PowSimplify;

impl PowSimplify {
    fn apply(base: Expr, exponent: Expr) -> Expr {
        if exponent.is_zero() {
            return Expr::one();
        }
        if exponent.is_one() {
            return base;
        }
        if base.is_one() {
            return Expr::one();
        }
        Expr::PowE(Box::new(base), Box::new(exponent))
    }
}

//! Infix expression parser.
//!
//! Parses the printable form emitted by [`Expr::format`] back into an
//! expression tree. Identifier resolution is delegated to a [`ParseCtx`]
//! so callers decide whether unknown names are interned (model loading)
//! or rejected (scoped resolution).

use crate::expr::Expr;
use crate::symbol::{Symbol, SymbolTable};
use mesokin_core::{MesokinError, Result};
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "expr.pest"]
struct ExprParser;

/// Identifier resolution hook for the parser.
pub trait ParseCtx {
    fn resolve(&mut self, name: &str) -> Result<Symbol>;
}

/// A bare symbol table interns every identifier it sees.
impl ParseCtx for SymbolTable {
    fn resolve(&mut self, name: &str) -> Result<Symbol> {
        Ok(self.intern(name))
    }
}

/// Parse an infix expression string.
pub fn parse_expression<C: ParseCtx>(input: &str, ctx: &mut C) -> Result<Expr> {
    let mut pairs = ExprParser::parse(Rule::input, input)
        .map_err(|e| MesokinError::ParseError(format!("invalid expression `{}`: {}", input, e)))?;
    let input_pair = pairs.next().ok_or_else(|| {
        MesokinError::ParseError(format!("empty expression `{}`", input))
    })?;
    let expr_pair = input_pair
        .into_inner()
        .find(|p| p.as_rule() == Rule::expr)
        .ok_or_else(|| MesokinError::ParseError(format!("empty expression `{}`", input)))?;
    build_expr(expr_pair, ctx)
}

fn build_expr<C: ParseCtx>(pair: Pair<Rule>, ctx: &mut C) -> Result<Expr> {
    match pair.as_rule() {
        Rule::expr => {
            let mut inner = pair.into_inner();
            let first = build_expr(inner.next().unwrap(), ctx)?;
            let mut terms = vec![first];
            while let Some(op) = inner.next() {
                let rhs = build_expr(inner.next().unwrap(), ctx)?;
                match op.as_str() {
                    "+" => terms.push(rhs),
                    _ => terms.push(Expr::neg(rhs)),
                }
            }
            Ok(Expr::add(terms))
        }
        Rule::term => {
            let mut inner = pair.into_inner();
            let first = build_expr(inner.next().unwrap(), ctx)?;
            let mut factors = vec![first];
            while let Some(op) = inner.next() {
                let rhs = build_expr(inner.next().unwrap(), ctx)?;
                match op.as_str() {
                    "*" => factors.push(rhs),
                    _ => factors.push(Expr::powi(rhs, -1)),
                }
            }
            Ok(Expr::mul(factors))
        }
        Rule::factor => build_expr(pair.into_inner().next().unwrap(), ctx),
        Rule::neg => {
            let inner = pair.into_inner().next().unwrap();
            Ok(Expr::neg(build_expr(inner, ctx)?))
        }
        Rule::power => {
            let mut inner = pair.into_inner();
            let base = build_expr(inner.next().unwrap(), ctx)?;
            match inner.next() {
                Some(exp) => Ok(Expr::pow(base, build_expr(exp, ctx)?)),
                None => Ok(base),
            }
        }
        Rule::atom => build_expr(pair.into_inner().next().unwrap(), ctx),
        Rule::call => {
            let mut inner = pair.into_inner();
            let func = inner.next().unwrap().as_str().to_string();
            let arg = build_expr(inner.next().unwrap(), ctx)?;
            match func.as_str() {
                "exp" => Ok(Expr::exp(arg)),
                "log" => Ok(Expr::log(arg)),
                "abs" => Ok(Expr::abs(arg)),
                other => Err(MesokinError::ParseError(format!(
                    "unsupported function `{}`",
                    other
                ))),
            }
        }
        Rule::ident => ctx.resolve(pair.as_str()).map(Expr::var),
        Rule::number => {
            let text = pair.as_str();
            if !text.contains('.') && !text.contains('e') && !text.contains('E') {
                match text.parse::<i64>() {
                    Ok(n) => Ok(Expr::int(n)),
                    Err(_) => parse_float(text),
                }
            } else {
                parse_float(text)
            }
        }
        other => Err(MesokinError::InternalError(format!(
            "unexpected parse node {:?}",
            other
        ))),
    }
}

fn parse_float(text: &str) -> Result<Expr> {
    text.parse::<f64>()
        .map(Expr::num)
        .map_err(|_| MesokinError::ParseError(format!("invalid number `{}`", text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arithmetic() {
        let mut table = SymbolTable::new();
        let e = parse_expression("k1 * S1 - k2 * S2", &mut table).unwrap();
        let k1 = table.lookup("k1").unwrap();
        let s1 = table.lookup("S1").unwrap();
        let k2 = table.lookup("k2").unwrap();
        let s2 = table.lookup("S2").unwrap();
        let expected = Expr::sub(
            Expr::mul(vec![Expr::var(k1), Expr::var(s1)]),
            Expr::mul(vec![Expr::var(k2), Expr::var(s2)]),
        );
        assert_eq!(e, expected);
    }

    #[test]
    fn test_parse_precedence() {
        let mut table = SymbolTable::new();
        let e = parse_expression("2 + 3 * 4", &mut table).unwrap();
        assert_eq!(e, Expr::int(14));
        let e = parse_expression("(2 + 3) * 4", &mut table).unwrap();
        assert_eq!(e, Expr::int(20));
        let e = parse_expression("2 ^ 3 ^ 2", &mut table).unwrap();
        // right-associative
        assert_eq!(e, Expr::int(512));
        let e = parse_expression("-2^2", &mut table).unwrap();
        assert_eq!(e, Expr::int(-4));
    }

    #[test]
    fn test_parse_division() {
        let mut table = SymbolTable::new();
        let e = parse_expression("vmax * S / (km + S)", &mut table).unwrap();
        let s = table.lookup("S").unwrap();
        let km = table.lookup("km").unwrap();
        let vmax = table.lookup("vmax").unwrap();
        let expected = Expr::div(
            Expr::mul(vec![Expr::var(vmax), Expr::var(s)]),
            Expr::add(vec![Expr::var(km), Expr::var(s)]),
        );
        assert_eq!(e, expected);
    }

    #[test]
    fn test_parse_functions() {
        let mut table = SymbolTable::new();
        let e = parse_expression("exp(-x) + log(y) + abs(z)", &mut table).unwrap();
        let syms = e.symbols();
        assert_eq!(syms.len(), 3);
        // a variable that merely starts with a function name
        let e = parse_expression("exponent + 1", &mut table).unwrap();
        assert!(table.lookup("exponent").is_some());
        assert!(!e.is_zero());
    }

    #[test]
    fn test_print_parse_roundtrip() {
        let mut table = SymbolTable::new();
        for text in [
            "k1 * S1 - k2 * S2",
            "vmax * S / (km + S)",
            "exp(-2 * x) * k",
            "x^(3) + 1/2 * y",
            "(a + b) * (a - b)",
            "k / (V * V)",
        ] {
            let e = parse_expression(text, &mut table).unwrap();
            let printed = e.format(&table);
            let reparsed = parse_expression(&printed, &mut table).unwrap();
            assert_eq!(e, reparsed, "round-trip failed for `{}` -> `{}`", text, printed);
        }
    }
}

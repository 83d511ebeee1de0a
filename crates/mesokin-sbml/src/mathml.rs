//! MathML subset: the operators the kinetic-law fragment needs.

use crate::xml::Element;
use mesokin_core::{MesokinError, Result};
use mesokin_expr::{Expr, Number, ParseCtx, SymbolTable};

/// Translate a `<math>` element (or a bare operand element) into an
/// expression, resolving identifiers through `ctx`.
pub fn read_math<C: ParseCtx>(math: &Element, ctx: &mut C) -> Result<Expr> {
    let operand = math.children.first().ok_or_else(|| {
        MesokinError::ParseError("empty <math> element".to_string())
    })?;
    read_operand(operand, ctx)
}

fn read_operand<C: ParseCtx>(node: &Element, ctx: &mut C) -> Result<Expr> {
    match node.local_name() {
        "ci" => ctx.resolve(node.text.trim()).map(Expr::var),
        "cn" => read_number(node),
        "apply" => read_apply(node, ctx),
        "csymbol" => {
            // the only csymbol of the fragment is simulation time
            ctx.resolve("time").map(Expr::var)
        }
        other => Err(MesokinError::UnsupportedFeature(format!(
            "MathML element <{}> is not part of the supported fragment",
            other
        ))),
    }
}

fn read_number(node: &Element) -> Result<Expr> {
    let text = node.text.trim();
    match node.attr("type") {
        Some("integer") | None if !text.contains(['.', 'e', 'E']) => text
            .parse::<i64>()
            .map(Expr::int)
            .map_err(|_| MesokinError::ParseError(format!("invalid <cn> value `{}`", text))),
        Some("rational") => {
            let mut parts = text.split('/');
            let numer = parts.next().unwrap_or("").trim().parse::<i64>();
            let denom = parts.next().unwrap_or("1").trim().parse::<i64>();
            match (numer, denom) {
                (Ok(n), Ok(d)) if d != 0 => Ok(Expr::rational(n, d)),
                _ => Err(MesokinError::ParseError(format!(
                    "invalid rational <cn> value `{}`",
                    text
                ))),
            }
        }
        _ => text
            .parse::<f64>()
            .map(Expr::num)
            .map_err(|_| MesokinError::ParseError(format!("invalid <cn> value `{}`", text))),
    }
}

fn read_apply<C: ParseCtx>(node: &Element, ctx: &mut C) -> Result<Expr> {
    let operator = node.children.first().ok_or_else(|| {
        MesokinError::ParseError("empty <apply> element".to_string())
    })?;
    let mut operands = Vec::with_capacity(node.children.len() - 1);
    for child in &node.children[1..] {
        operands.push(read_operand(child, ctx)?);
    }

    let op_name = operator.local_name().to_string();
    let count = operands.len();
    let arity_error = move |expected: &str| {
        MesokinError::ParseError(format!(
            "operator <{}> applied to {} operands, expected {}",
            op_name, count, expected
        ))
    };

    match operator.local_name() {
        "plus" => Ok(Expr::add(operands)),
        "times" => Ok(Expr::mul(operands)),
        "minus" => match operands.len() {
            1 => Ok(Expr::neg(operands.remove(0))),
            2 => {
                let b = operands.pop().unwrap();
                let a = operands.pop().unwrap();
                Ok(Expr::sub(a, b))
            }
            _ => Err(arity_error("1 or 2")),
        },
        "divide" => {
            if operands.len() != 2 {
                return Err(arity_error("2"));
            }
            let b = operands.pop().unwrap();
            let a = operands.pop().unwrap();
            Ok(Expr::div(a, b))
        }
        "power" => {
            if operands.len() != 2 {
                return Err(arity_error("2"));
            }
            let e = operands.pop().unwrap();
            let b = operands.pop().unwrap();
            Ok(Expr::pow(b, e))
        }
        "exp" => {
            if operands.len() != 1 {
                return Err(arity_error("1"));
            }
            Ok(Expr::exp(operands.pop().unwrap()))
        }
        "ln" => {
            if operands.len() != 1 {
                return Err(arity_error("1"));
            }
            Ok(Expr::log(operands.pop().unwrap()))
        }
        "abs" => {
            if operands.len() != 1 {
                return Err(arity_error("1"));
            }
            Ok(Expr::abs(operands.pop().unwrap()))
        }
        other => Err(MesokinError::UnsupportedFeature(format!(
            "MathML operator <{}> is not part of the supported fragment",
            other
        ))),
    }
}

/// Render an expression as MathML.
pub fn write_math(expr: &Expr, table: &SymbolTable, out: &mut String, indent: usize) {
    let pad = "  ".repeat(indent);
    match expr {
        Expr::Const(Number::Rational(r)) if !r.is_integer() => {
            out.push_str(&format!(
                "{}<cn type=\"rational\"> {}/{} </cn>\n",
                pad,
                r.numer(),
                r.denom()
            ));
        }
        Expr::Const(n) => {
            let v = n.to_f64();
            if v == v.trunc() && v.abs() < 1e15 {
                out.push_str(&format!(
                    "{}<cn type=\"integer\"> {} </cn>\n",
                    pad, v as i64
                ));
            } else {
                out.push_str(&format!("{}<cn> {} </cn>\n", pad, v));
            }
        }
        Expr::Var(s) => {
            out.push_str(&format!("{}<ci> {} </ci>\n", pad, table.name(*s)));
        }
        Expr::Add(ts) => write_apply("plus", ts, table, out, indent),
        Expr::Mul(fs) => write_apply("times", fs, table, out, indent),
        Expr::Pow(b, n) => {
            out.push_str(&format!("{}<apply>\n{}  <power/>\n", pad, pad));
            write_math(b, table, out, indent + 1);
            out.push_str(&format!("{}  <cn type=\"integer\"> {} </cn>\n", pad, n));
            out.push_str(&format!("{}</apply>\n", pad));
        }
        Expr::PowE(b, e) => {
            out.push_str(&format!("{}<apply>\n{}  <power/>\n", pad, pad));
            write_math(b, table, out, indent + 1);
            write_math(e, table, out, indent + 1);
            out.push_str(&format!("{}</apply>\n", pad));
        }
        Expr::Exp(u) => write_apply("exp", std::slice::from_ref(&**u), table, out, indent),
        Expr::Log(u) => write_apply("ln", std::slice::from_ref(&**u), table, out, indent),
        Expr::Abs(u) => write_apply("abs", std::slice::from_ref(&**u), table, out, indent),
    }
}

fn write_apply(op: &str, operands: &[Expr], table: &SymbolTable, out: &mut String, indent: usize) {
    let pad = "  ".repeat(indent);
    out.push_str(&format!("{}<apply>\n{}  <{}/>\n", pad, pad, op));
    for operand in operands {
        write_math(operand, table, out, indent + 1);
    }
    out.push_str(&format!("{}</apply>\n", pad));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse_document;

    #[test]
    fn test_read_mass_action() {
        let doc = r#"<math xmlns="http://www.w3.org/1998/Math/MathML">
            <apply><times/><ci>k1</ci><ci>S1</ci></apply></math>"#;
        let math = parse_document(doc).unwrap();
        let mut table = SymbolTable::new();
        let e = read_math(&math, &mut table).unwrap();
        let k1 = table.lookup("k1").unwrap();
        let s1 = table.lookup("S1").unwrap();
        assert_eq!(e, Expr::mul(vec![Expr::var(k1), Expr::var(s1)]));
    }

    #[test]
    fn test_read_nested_arithmetic() {
        let doc = r#"<math>
            <apply><divide/>
              <apply><minus/>
                <apply><times/><ci>k1</ci><ci>A</ci></apply>
                <apply><times/><ci>k2</ci><ci>B</ci></apply>
              </apply>
              <apply><plus/><cn type="integer">1</cn><ci>A</ci></apply>
            </apply></math>"#;
        let math = parse_document(doc).unwrap();
        let mut table = SymbolTable::new();
        let e = read_math(&math, &mut table).unwrap();
        assert_eq!(e.symbols().len(), 4);
    }

    #[test]
    fn test_roundtrip_through_mathml() {
        let mut table = SymbolTable::new();
        let k = table.intern("k");
        let x = table.intern("x");
        let original = Expr::add(vec![
            Expr::mul(vec![Expr::var(k), Expr::powi(Expr::var(x), 2)]),
            Expr::exp(Expr::neg(Expr::var(x))),
            Expr::rational(1, 2),
        ]);
        let mut xml = String::new();
        write_math(&original, &table, &mut xml, 0);
        let parsed = parse_document(&format!("<math>\n{}</math>", xml)).unwrap();
        let back = read_math(&parsed, &mut table).unwrap();
        assert_eq!(original, back);
    }

    #[test]
    fn test_unsupported_operator_named() {
        let doc = r#"<math><apply><sin/><ci>x</ci></apply></math>"#;
        let math = parse_document(doc).unwrap();
        let mut table = SymbolTable::new();
        let err = read_math(&math, &mut table).unwrap_err();
        assert!(err.to_string().contains("sin"));
    }
}

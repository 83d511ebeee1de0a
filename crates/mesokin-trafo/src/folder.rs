//! Constant folding.

use mesokin_ast::{Model, Rule};
use mesokin_core::{MesokinError, Result};
use mesokin_expr::{Expr, Substitution, Symbol};
use std::collections::HashSet;

/// Folds constant definitions into expressions.
///
/// The substitution table collects the value of every constant parameter
/// (model-scope and reaction-local), the initial value of every constant
/// compartment, and the right-hand side of every assignment rule, then
/// is closed under repeated substitution so chained definitions resolve
/// in one `apply`. A caller-supplied exclusion set holds selected
/// symbols out — parameter scans use this to keep their scan variables
/// symbolic.
#[derive(Debug, Clone)]
pub struct ConstantFolder {
    table: Substitution,
}

impl ConstantFolder {
    pub fn new(model: &Model) -> Result<Self> {
        Self::with_exclusions(model, &HashSet::new())
    }

    pub fn with_exclusions(model: &Model, exclude: &HashSet<Symbol>) -> Result<Self> {
        let mut table = Substitution::new();

        for p in model.parameters() {
            if exclude.contains(&p.symbol) {
                continue;
            }
            match &p.rule {
                Some(Rule::Assignment(rhs)) => {
                    table.insert(p.symbol, rhs.clone());
                }
                _ if p.constant => {
                    if let Some(v) = &p.value {
                        table.insert(p.symbol, v.clone());
                    }
                }
                _ => {}
            }
        }
        for r in model.reactions() {
            for p in &r.kinetic_law.local_parameters {
                if p.constant && !exclude.contains(&p.symbol) {
                    if let Some(v) = &p.value {
                        table.insert(p.symbol, v.clone());
                    }
                }
            }
        }
        for c in model.compartments() {
            if exclude.contains(&c.symbol) {
                continue;
            }
            match &c.rule {
                Some(Rule::Assignment(rhs)) => {
                    table.insert(c.symbol, rhs.clone());
                }
                _ if c.constant => {
                    if let Some(v) = &c.initial {
                        table.insert(c.symbol, v.clone());
                    }
                }
                _ => {}
            }
        }
        for s in model.species() {
            if let Some(Rule::Assignment(rhs)) = &s.rule {
                if !exclude.contains(&s.symbol) {
                    table.insert(s.symbol, rhs.clone());
                }
            }
        }

        // close the table under substitution so chains like
        // a -> 2*b, b -> 3 resolve in a single application
        let bound = table.len() + 1;
        for _ in 0..bound {
            let mut changed = false;
            let keys: Vec<Symbol> = table.keys().copied().collect();
            for key in keys {
                let value = table[&key].clone();
                let folded = value.substitute(&table);
                if folded != value {
                    table.insert(key, folded);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        for (key, value) in &table {
            if value.symbols().iter().any(|s| table.contains_key(s)) {
                return Err(MesokinError::SemanticError(format!(
                    "cyclic constant definition involving `{}`",
                    model.symbols().name(*key)
                )));
            }
        }

        Ok(Self { table })
    }

    /// Apply the folding table to an expression.
    pub fn apply(&self, expr: &Expr) -> Expr {
        expr.substitute(&self.table)
    }

    /// The substitution table itself.
    pub fn table(&self) -> &Substitution {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesokin_ast::fixtures;

    #[test]
    fn test_fold_parameters_and_volume() {
        let model = fixtures::michaelis_menten();
        let folder = ConstantFolder::new(&model).unwrap();
        let law = &model.reaction_at(0).kinetic_law.rate_law;
        let folded = folder.apply(law);
        // k1 is gone, the species remain
        let k1 = model.symbols().lookup("k1").unwrap();
        let e = model.symbols().lookup("E").unwrap();
        assert!(!folded.has(k1));
        assert!(folded.has(e));
    }

    #[test]
    fn test_exclusion_set() {
        let model = fixtures::michaelis_menten();
        let k1 = model.symbols().lookup("k1").unwrap();
        let mut exclude = HashSet::new();
        exclude.insert(k1);
        let folder = ConstantFolder::with_exclusions(&model, &exclude).unwrap();
        let folded = folder.apply(&model.reaction_at(0).kinetic_law.rate_law);
        assert!(folded.has(k1));
    }

    #[test]
    fn test_chained_constants_close() {
        let mut model = mesokin_ast::Model::new("t");
        model
            .add_parameter("a", true, Some(Expr::num(2.0)))
            .unwrap();
        let a = model.symbols().lookup("a").unwrap();
        model
            .add_parameter("b", true, Some(Expr::mul(vec![Expr::int(3), Expr::var(a)])))
            .unwrap();
        let b = model.symbols().lookup("b").unwrap();
        let folder = ConstantFolder::new(&model).unwrap();
        let folded = folder.apply(&Expr::var(b));
        assert_eq!(folded.as_number(), Some(6.0));
    }

    #[test]
    fn test_cyclic_definition_rejected() {
        let mut model = mesokin_ast::Model::new("t");
        let a = model.intern("a");
        let b = model.intern("b");
        model
            .add_parameter("a", true, Some(Expr::var(b)))
            .unwrap();
        model
            .add_parameter("b", true, Some(Expr::var(a)))
            .unwrap();
        assert!(ConstantFolder::new(&model).is_err());
    }
}

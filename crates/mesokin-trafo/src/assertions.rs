//! Assertion passes.
//!
//! Each assertion rejects models outside the supported fragment with an
//! `UnsupportedFeature` error naming the first offending definition.

use mesokin_ast::{Model, Rule};
use mesokin_core::{MesokinError, Result};

fn unsupported(msg: String) -> MesokinError {
    MesokinError::UnsupportedFeature(msg)
}

/// No variable may carry a rate rule.
pub fn assert_no_rate_rule(model: &Model) -> Result<()> {
    for c in model.compartments() {
        if matches!(c.rule, Some(Rule::Rate(_))) {
            return Err(unsupported(format!(
                "compartment `{}` has a rate rule",
                c.id
            )));
        }
    }
    for s in model.species() {
        if matches!(s.rule, Some(Rule::Rate(_))) {
            return Err(unsupported(format!("species `{}` has a rate rule", s.id)));
        }
    }
    for p in model.parameters() {
        if matches!(p.rule, Some(Rule::Rate(_))) {
            return Err(unsupported(format!("parameter `{}` has a rate rule", p.id)));
        }
    }
    Ok(())
}

/// No variable may carry an assignment rule.
pub fn assert_no_assignment_rule(model: &Model) -> Result<()> {
    for c in model.compartments() {
        if matches!(c.rule, Some(Rule::Assignment(_))) {
            return Err(unsupported(format!(
                "compartment `{}` has an assignment rule",
                c.id
            )));
        }
    }
    for s in model.species() {
        if matches!(s.rule, Some(Rule::Assignment(_))) {
            return Err(unsupported(format!(
                "species `{}` has an assignment rule",
                s.id
            )));
        }
    }
    for p in model.parameters() {
        if matches!(p.rule, Some(Rule::Assignment(_))) {
            return Err(unsupported(format!(
                "parameter `{}` has an assignment rule",
                p.id
            )));
        }
    }
    Ok(())
}

/// No species may be declared constant.
pub fn assert_no_constant_species(model: &Model) -> Result<()> {
    for s in model.species() {
        if s.constant {
            return Err(unsupported(format!("species `{}` is constant", s.id)));
        }
    }
    Ok(())
}

/// No reaction may be reversible; run the splitting pass first.
pub fn assert_no_reversible_reaction(model: &Model) -> Result<()> {
    for r in model.reactions() {
        if r.reversible {
            return Err(unsupported(format!("reaction `{}` is reversible", r.id)));
        }
    }
    Ok(())
}

/// Every parameter, global or reaction-local, must be constant and have
/// a value.
pub fn assert_constant_parameters(model: &Model) -> Result<()> {
    for p in model.parameters() {
        if !p.constant {
            return Err(unsupported(format!("parameter `{}` is not constant", p.id)));
        }
        if p.value.is_none() {
            return Err(unsupported(format!("parameter `{}` has no value", p.id)));
        }
    }
    for r in model.reactions() {
        for p in &r.kinetic_law.local_parameters {
            if !p.constant {
                return Err(unsupported(format!(
                    "local parameter `{}` of reaction `{}` is not constant",
                    p.id, r.id
                )));
            }
            if p.value.is_none() {
                return Err(unsupported(format!(
                    "local parameter `{}` of reaction `{}` has no value",
                    p.id, r.id
                )));
            }
        }
    }
    Ok(())
}

/// Every compartment must be constant.
pub fn assert_constant_compartments(model: &Model) -> Result<()> {
    for c in model.compartments() {
        if !c.constant {
            return Err(unsupported(format!(
                "compartment `{}` is not constant",
                c.id
            )));
        }
    }
    Ok(())
}

/// Every stoichiometry expression must be a rational constant.
pub fn assert_constant_stoichiometry(model: &Model) -> Result<()> {
    for r in model.reactions() {
        for (_, stoich) in r.reactants.iter().chain(r.products.iter()) {
            if stoich.as_number().filter(|v| v.is_finite()).is_none() {
                return Err(unsupported(format!(
                    "reaction `{}` has a non-constant stoichiometry",
                    r.id
                )));
            }
        }
    }
    Ok(())
}

/// No expression may depend explicitly on the time symbol.
pub fn assert_no_explicit_time_dependence(model: &Model) -> Result<()> {
    let time = model.time_symbol();
    for c in model.compartments() {
        if c.initial.as_ref().map(|e| e.has(time)).unwrap_or(false)
            || rule_has(&c.rule, time)
        {
            return Err(unsupported(format!(
                "compartment `{}` depends explicitly on time",
                c.id
            )));
        }
    }
    for s in model.species() {
        if s.initial.as_ref().map(|e| e.has(time)).unwrap_or(false)
            || rule_has(&s.rule, time)
        {
            return Err(unsupported(format!(
                "species `{}` depends explicitly on time",
                s.id
            )));
        }
    }
    for p in model.parameters() {
        if p.value.as_ref().map(|e| e.has(time)).unwrap_or(false) || rule_has(&p.rule, time) {
            return Err(unsupported(format!(
                "parameter `{}` depends explicitly on time",
                p.id
            )));
        }
    }
    for r in model.reactions() {
        if r.kinetic_law.rate_law.has(time) {
            return Err(unsupported(format!(
                "kinetic law of reaction `{}` depends explicitly on time",
                r.id
            )));
        }
        for p in &r.kinetic_law.local_parameters {
            if p.value.as_ref().map(|e| e.has(time)).unwrap_or(false) {
                return Err(unsupported(format!(
                    "local parameter `{}` of reaction `{}` depends explicitly on time",
                    p.id, r.id
                )));
            }
        }
    }
    Ok(())
}

fn rule_has(rule: &Option<Rule>, sym: mesokin_expr::Symbol) -> bool {
    match rule {
        Some(Rule::Assignment(e)) | Some(Rule::Rate(e)) => e.has(sym),
        None => false,
    }
}

/// The composite assertion required by the downstream algorithmic
/// passes: no rules, constant parameters, no explicit time dependence.
pub fn assert_reasonable_model(model: &Model) -> Result<()> {
    assert_no_rate_rule(model)?;
    assert_no_assignment_rule(model)?;
    assert_constant_parameters(model)?;
    assert_no_explicit_time_dependence(model)?;
    Ok(())
}

/// The full fragment required by the analysis back ends, on top of
/// [`assert_reasonable_model`]: irreversible reactions only, variable
/// species, constant compartments and constant stoichiometries.
pub fn assert_analysis_fragment(model: &Model) -> Result<()> {
    assert_reasonable_model(model)?;
    assert_no_reversible_reaction(model)?;
    assert_no_constant_species(model)?;
    assert_constant_compartments(model)?;
    assert_constant_stoichiometry(model)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesokin_ast::fixtures;
    use mesokin_ast::Rule;
    use mesokin_expr::Expr;

    #[test]
    fn test_reasonable_model_accepts_fixture() {
        let model = fixtures::michaelis_menten();
        assert!(assert_reasonable_model(&model).is_ok());
        assert!(assert_analysis_fragment(&model).is_ok());
    }

    #[test]
    fn test_reversible_rejected() {
        let model = fixtures::reversible_pair(1.0, 0.5, 10.0, 0.0);
        let err = assert_no_reversible_reaction(&model).unwrap_err();
        assert!(err.to_string().contains("iso"));
    }

    #[test]
    fn test_rate_rule_rejected() {
        let mut model = fixtures::birth_death(10.0, 1.0, 0.0);
        let x = model.symbols().lookup("X").unwrap();
        model.species_mut(x).unwrap().rule = Some(Rule::Rate(Expr::one()));
        let err = assert_no_rate_rule(&model).unwrap_err();
        assert!(err.to_string().contains("X"));
        assert!(assert_reasonable_model(&model).is_err());
    }

    #[test]
    fn test_unvalued_parameter_rejected() {
        let mut model = fixtures::birth_death(10.0, 1.0, 0.0);
        let k = model.symbols().lookup("k").unwrap();
        model.parameter_mut(k).unwrap().value = None;
        let err = assert_constant_parameters(&model).unwrap_err();
        assert!(err.to_string().contains('k'));
    }

    #[test]
    fn test_time_dependence_rejected() {
        let mut model = fixtures::birth_death(10.0, 1.0, 0.0);
        let time = model.time_symbol();
        let law = model.reaction_at(0).kinetic_law.rate_law.clone();
        model.reaction_at_mut(0).kinetic_law.rate_law =
            Expr::mul(vec![law, Expr::var(time)]);
        let err = assert_no_explicit_time_dependence(&model).unwrap_err();
        assert!(err.to_string().contains("birth"));
    }
}

//! SBML import of the supported fragment.
//!
//! Anything outside the fragment is rejected with a diagnostic naming
//! the element and construct; rules are imported so the transform
//! pipeline can reject them precisely later.

use crate::mathml::read_math;
use crate::xml::{parse_document, Element};
use mesokin_ast::{
    BaseUnit, KineticLaw, LawScope, Model, Parameter, ReactionBuilder, Rule, ScaledBaseUnit,
    Unit, UnitDefinition,
};
use mesokin_core::{MesokinError, Result};
use mesokin_expr::Expr;

/// Parse an SBML document into a model.
pub fn read_sbml(input: &str) -> Result<Model> {
    let root = parse_document(input)?;
    if root.local_name() != "sbml" {
        return Err(MesokinError::ParseError(format!(
            "expected <sbml> document, found <{}>",
            root.name
        )));
    }
    let model_el = root.child("model").ok_or_else(|| {
        MesokinError::ParseError("document has no <model> element".to_string())
    })?;

    reject_unsupported_lists(model_el)?;

    let id = model_el.attr("id").unwrap_or("model");
    let mut model = Model::new(id);

    if let Some(units) = model_el.child("listOfUnitDefinitions") {
        for def in units.children_named("unitDefinition") {
            read_unit_definition(def, &mut model)?;
        }
    }

    if let Some(compartments) = model_el.child("listOfCompartments") {
        for c in compartments.children_named("compartment") {
            let id = c.required_attr("id")?;
            let dimensions = c
                .attr("spatialDimensions")
                .map(|v| v.parse::<f64>().unwrap_or(3.0) as u8)
                .unwrap_or(3);
            let constant = c.attr("constant") != Some("false");
            let initial = c
                .attr("size")
                .map(parse_value)
                .transpose()?
                .map(Expr::num);
            model.add_compartment(id, dimensions, constant, initial)?;
        }
    }

    let mut amount_species = 0usize;
    let mut concentration_species = 0usize;
    if let Some(species_list) = model_el.child("listOfSpecies") {
        for s in species_list.children_named("species") {
            let id = s.required_attr("id")?;
            let compartment_id = s.required_attr("compartment")?;
            let compartment = model
                .symbols()
                .lookup(compartment_id)
                .ok_or_else(|| {
                    MesokinError::ParseError(format!(
                        "species `{}` references unknown compartment `{}`",
                        id, compartment_id
                    ))
                })?;
            let constant = s.attr("constant") == Some("true");
            let initial = match (s.attr("initialAmount"), s.attr("initialConcentration")) {
                (Some(v), None) => {
                    amount_species += 1;
                    Some(Expr::num(parse_value(v)?))
                }
                (None, Some(v)) => {
                    concentration_species += 1;
                    Some(Expr::num(parse_value(v)?))
                }
                (None, None) => None,
                (Some(_), Some(_)) => {
                    return Err(MesokinError::ParseError(format!(
                        "species `{}` declares both an amount and a concentration",
                        id
                    )))
                }
            };
            model.add_species(id, compartment, constant, initial)?;
        }
    }
    // the species mode is a model-wide switch of the fragment
    model.species_have_substance_units = match (amount_species, concentration_species) {
        (_, 0) => true,
        (0, _) => false,
        _ => {
            return Err(MesokinError::UnsupportedFeature(
                "models mixing amount and concentration species are not supported"
                    .to_string(),
            ))
        }
    };

    if let Some(parameters) = model_el.child("listOfParameters") {
        for p in parameters.children_named("parameter") {
            let id = p.required_attr("id")?;
            let constant = p.attr("constant") != Some("false");
            let value = p.attr("value").map(parse_value).transpose()?.map(Expr::num);
            model.add_parameter(id, constant, value)?;
        }
    }

    if let Some(reactions) = model_el.child("listOfReactions") {
        for r in reactions.children_named("reaction") {
            read_reaction(r, &mut model)?;
        }
    }

    if let Some(rules) = model_el.child("listOfRules") {
        for rule in &rules.children {
            read_rule(rule, &mut model)?;
        }
    }

    Ok(model)
}

fn reject_unsupported_lists(model_el: &Element) -> Result<()> {
    for unsupported in [
        "listOfEvents",
        "listOfConstraints",
        "listOfFunctionDefinitions",
        "listOfInitialAssignments",
    ] {
        if model_el.child(unsupported).is_some() {
            return Err(MesokinError::UnsupportedFeature(format!(
                "<{}> is not part of the supported fragment",
                unsupported
            )));
        }
    }
    Ok(())
}

fn parse_value(text: &str) -> Result<f64> {
    text.trim()
        .parse::<f64>()
        .map_err(|_| MesokinError::ParseError(format!("invalid numeric value `{}`", text)))
}

fn read_unit_definition(def: &Element, model: &mut Model) -> Result<()> {
    let id = def.required_attr("id")?.to_string();
    let mut factors = Vec::new();
    if let Some(list) = def.child("listOfUnits") {
        for unit in list.children_named("unit") {
            let kind = unit.required_attr("kind")?;
            let base = BaseUnit::from_name(kind).ok_or_else(|| {
                MesokinError::UnsupportedFeature(format!(
                    "base unit `{}` is not part of the supported fragment",
                    kind
                ))
            })?;
            factors.push(ScaledBaseUnit {
                base,
                multiplier: unit.attr("multiplier").map(parse_value).transpose()?.unwrap_or(1.0),
                scale: unit
                    .attr("scale")
                    .map(|v| v.parse::<i32>().unwrap_or(0))
                    .unwrap_or(0),
                exponent: unit
                    .attr("exponent")
                    .map(|v| v.parse::<f64>().unwrap_or(1.0) as i32)
                    .unwrap_or(1),
            });
        }
    }
    let unit = Unit::new(factors);
    // the five default units are recognized by their conventional ids
    if let Some(scaled) = unit.as_scaled_base() {
        if id == "substance" {
            model.set_substance_unit(*scaled);
        }
    }
    model.add_unit_definition(UnitDefinition { id, unit });
    Ok(())
}

fn read_reaction(r: &Element, model: &mut Model) -> Result<()> {
    let id = r.required_attr("id")?.to_string();
    let reversible = r.attr("reversible") != Some("false");

    let law_el = r.child("kineticLaw").ok_or_else(|| {
        MesokinError::UnsupportedFeature(format!(
            "reaction `{}` has no kinetic law",
            id
        ))
    })?;

    // local parameters open the nested kinetic-law scope
    let mut locals: Vec<Parameter> = Vec::new();
    for list_name in ["listOfLocalParameters", "listOfParameters"] {
        if let Some(list) = law_el.child(list_name) {
            for p in &list.children {
                let pid = p.required_attr("id")?;
                let value = p.attr("value").map(parse_value).transpose()?.map(Expr::num);
                locals.push(model.make_local_parameter(&id, pid, value));
            }
        }
    }

    let math = law_el.child("math").ok_or_else(|| {
        MesokinError::ParseError(format!("kinetic law of reaction `{}` has no <math>", id))
    })?;
    let rate_law = {
        let mut scope = LawScope::new(model, &locals, &format!("kinetic law of `{}`", id));
        read_math(math, &mut scope)?
    };

    let mut law = KineticLaw::new(rate_law);
    law.local_parameters = locals;
    let mut builder = ReactionBuilder::new(&id, law);
    builder.reversible = reversible;
    builder.name = r.attr("name").map(|s| s.to_string());

    for (list, is_reactant) in [("listOfReactants", true), ("listOfProducts", false)] {
        if let Some(refs) = r.child(list) {
            for sr in refs.children_named("speciesReference") {
                let species_id = sr.required_attr("species")?;
                let species = model.symbols().lookup(species_id).ok_or_else(|| {
                    MesokinError::ParseError(format!(
                        "reaction `{}` references unknown species `{}`",
                        id, species_id
                    ))
                })?;
                let stoichiometry = sr
                    .attr("stoichiometry")
                    .map(parse_value)
                    .transpose()?
                    .unwrap_or(1.0);
                let stoichiometry = if stoichiometry == stoichiometry.trunc() {
                    Expr::int(stoichiometry as i64)
                } else {
                    Expr::num(stoichiometry)
                };
                if is_reactant {
                    builder.reactants.push((species, stoichiometry));
                } else {
                    builder.products.push((species, stoichiometry));
                }
            }
        }
    }
    if let Some(modifiers) = r.child("listOfModifiers") {
        for m in modifiers.children_named("modifierSpeciesReference") {
            let species_id = m.required_attr("species")?;
            let species = model.symbols().lookup(species_id).ok_or_else(|| {
                MesokinError::ParseError(format!(
                    "reaction `{}` references unknown modifier `{}`",
                    id, species_id
                ))
            })?;
            builder.modifiers.push(species);
        }
    }

    model.add_reaction(builder)?;
    Ok(())
}

fn read_rule(rule: &Element, model: &mut Model) -> Result<()> {
    let kind = rule.local_name().to_string();
    let make = |expr: Expr| match kind.as_str() {
        "assignmentRule" => Ok(Rule::Assignment(expr)),
        "rateRule" => Ok(Rule::Rate(expr)),
        other => Err(MesokinError::UnsupportedFeature(format!(
            "<{}> is not part of the supported fragment",
            other
        ))),
    };

    let variable = rule.required_attr("variable")?.to_string();
    let math = rule.child("math").ok_or_else(|| {
        MesokinError::ParseError(format!("rule for `{}` has no <math>", variable))
    })?;
    let expr = {
        let mut scope = LawScope::new(model, &[], &format!("rule for `{}`", variable));
        read_math(math, &mut scope)?
    };
    let parsed = make(expr)?;

    let symbol = model.symbols().lookup(&variable).ok_or_else(|| {
        MesokinError::ParseError(format!("rule references unknown variable `{}`", variable))
    })?;
    if let Some(species) = model.species_mut(symbol) {
        if species.rule.is_some() {
            return Err(MesokinError::SemanticError(format!(
                "variable `{}` has more than one rule",
                variable
            )));
        }
        species.rule = Some(parsed);
    } else if let Some(parameter) = model.parameter_mut(symbol) {
        parameter.constant = false;
        parameter.rule = Some(parsed);
    } else if let Some(compartment) = model.compartment_mut(symbol) {
        compartment.rule = Some(parsed);
    } else {
        return Err(MesokinError::ParseError(format!(
            "rule references `{}` which is not a variable",
            variable
        )));
    }
    Ok(())
}

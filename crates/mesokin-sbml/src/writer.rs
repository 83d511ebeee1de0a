//! SBML export of the supported fragment.
//!
//! The exporter is the semantic inverse of the importer: a re-imported
//! document defines the same dynamics. Formatting is plain indented
//! text; the fragment has no constructs that need escaping beyond
//! identifiers, which are restricted to word characters anyway.

use crate::mathml::write_math;
use mesokin_ast::{Model, Rule};
use mesokin_core::Result;
use mesokin_expr::{Expr, Substitution};
use std::fmt::Write as _;

/// Serialize a model as an SBML document.
pub fn write_sbml(model: &Model) -> Result<String> {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(
        "<sbml xmlns=\"http://www.sbml.org/sbml/level3/version2/core\" level=\"3\" version=\"2\">\n",
    );
    let _ = writeln!(out, "  <model id=\"{}\">", model.id);

    if !model.unit_definitions().is_empty() {
        out.push_str("    <listOfUnitDefinitions>\n");
        for def in model.unit_definitions() {
            let _ = writeln!(out, "      <unitDefinition id=\"{}\">", def.id);
            out.push_str("        <listOfUnits>\n");
            for u in &def.unit.factors {
                let _ = writeln!(
                    out,
                    "          <unit kind=\"{}\" exponent=\"{}\" scale=\"{}\" multiplier=\"{}\"/>",
                    u.base.name(),
                    u.exponent,
                    u.scale,
                    u.multiplier
                );
            }
            out.push_str("        </listOfUnits>\n");
            out.push_str("      </unitDefinition>\n");
        }
        out.push_str("    </listOfUnitDefinitions>\n");
    }

    out.push_str("    <listOfCompartments>\n");
    for c in model.compartments() {
        let size = c
            .initial
            .as_ref()
            .and_then(|e| e.as_number())
            .map(|v| format!(" size=\"{}\"", v))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "      <compartment id=\"{}\" spatialDimensions=\"{}\" constant=\"{}\"{}/>",
            c.id, c.dimensions, c.constant, size
        );
    }
    out.push_str("    </listOfCompartments>\n");

    out.push_str("    <listOfSpecies>\n");
    let amount_attr = if model.species_have_substance_units {
        "initialAmount"
    } else {
        "initialConcentration"
    };
    for s in model.species() {
        let compartment = model.compartment_of(s);
        let initial = s
            .initial
            .as_ref()
            .and_then(|e| e.as_number())
            .map(|v| format!(" {}=\"{}\"", amount_attr, v))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "      <species id=\"{}\" compartment=\"{}\" constant=\"{}\" hasOnlySubstanceUnits=\"{}\"{}/>",
            s.id, compartment.id, s.constant, model.species_have_substance_units, initial
        );
    }
    out.push_str("    </listOfSpecies>\n");

    if model.num_parameters() > 0 {
        out.push_str("    <listOfParameters>\n");
        for p in model.parameters() {
            let value = p
                .value
                .as_ref()
                .and_then(|e| e.as_number())
                .map(|v| format!(" value=\"{}\"", v))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "      <parameter id=\"{}\" constant=\"{}\"{}/>",
                p.id, p.constant, value
            );
        }
        out.push_str("    </listOfParameters>\n");
    }

    let rules: Vec<_> = rule_entries(model);
    if !rules.is_empty() {
        out.push_str("    <listOfRules>\n");
        for (variable, rule) in rules {
            let (tag, expr) = match rule {
                Rule::Assignment(e) => ("assignmentRule", e),
                Rule::Rate(e) => ("rateRule", e),
            };
            let _ = writeln!(out, "      <{} variable=\"{}\">", tag, variable);
            out.push_str(
                "        <math xmlns=\"http://www.w3.org/1998/Math/MathML\">\n",
            );
            write_math(expr, model.symbols(), &mut out, 5);
            out.push_str("        </math>\n");
            let _ = writeln!(out, "      </{}>", tag);
        }
        out.push_str("    </listOfRules>\n");
    }

    out.push_str("    <listOfReactions>\n");
    for r in model.reactions() {
        let _ = writeln!(
            out,
            "      <reaction id=\"{}\" reversible=\"{}\">",
            r.id, r.reversible
        );
        for (tag, list) in [
            ("listOfReactants", &r.reactants),
            ("listOfProducts", &r.products),
        ] {
            if list.is_empty() {
                continue;
            }
            let _ = writeln!(out, "        <{}>", tag);
            for (species, stoichiometry) in list {
                let name = model.symbols().name(*species);
                let value = stoichiometry.as_number().unwrap_or(f64::NAN);
                let _ = writeln!(
                    out,
                    "          <speciesReference species=\"{}\" stoichiometry=\"{}\" constant=\"true\"/>",
                    name, value
                );
            }
            let _ = writeln!(out, "        </{}>", tag);
        }
        if !r.modifiers.is_empty() {
            out.push_str("        <listOfModifiers>\n");
            for m in &r.modifiers {
                let _ = writeln!(
                    out,
                    "          <modifierSpeciesReference species=\"{}\"/>",
                    model.symbols().name(*m)
                );
            }
            out.push_str("        </listOfModifiers>\n");
        }
        out.push_str("        <kineticLaw>\n");
        out.push_str("          <math xmlns=\"http://www.w3.org/1998/Math/MathML\">\n");
        // local parameters print under their bare id; the importer's
        // scope chain resolves locals first, so the meaning is kept
        let mut law_table = model.symbols().clone();
        let mut bare_names = Substitution::new();
        for p in &r.kinetic_law.local_parameters {
            let bare = law_table.intern(&p.id);
            bare_names.insert(p.symbol, Expr::var(bare));
        }
        let law = r.kinetic_law.rate_law.substitute(&bare_names);
        write_math(&law, &law_table, &mut out, 6);
        out.push_str("          </math>\n");
        if !r.kinetic_law.local_parameters.is_empty() {
            out.push_str("          <listOfLocalParameters>\n");
            for p in &r.kinetic_law.local_parameters {
                let value = p
                    .value
                    .as_ref()
                    .and_then(|e| e.as_number())
                    .map(|v| format!(" value=\"{}\"", v))
                    .unwrap_or_default();
                let _ = writeln!(
                    out,
                    "            <localParameter id=\"{}\"{}/>",
                    p.id, value
                );
            }
            out.push_str("          </listOfLocalParameters>\n");
        }
        out.push_str("        </kineticLaw>\n");
        out.push_str("      </reaction>\n");
    }
    out.push_str("    </listOfReactions>\n");

    out.push_str("  </model>\n");
    out.push_str("</sbml>\n");
    Ok(out)
}

fn rule_entries(model: &Model) -> Vec<(String, &Rule)> {
    let mut rules = Vec::new();
    for c in model.compartments() {
        if let Some(rule) = &c.rule {
            rules.push((c.id.clone(), rule));
        }
    }
    for s in model.species() {
        if let Some(rule) = &s.rule {
            rules.push((s.id.clone(), rule));
        }
    }
    for p in model.parameters() {
        if let Some(rule) = &p.rule {
            rules.push((p.id.clone(), rule));
        }
    }
    rules
}

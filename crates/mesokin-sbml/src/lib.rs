//! # mesokin-sbml
//!
//! SBML import and export of the model fragment the analysis pipeline
//! supports. Anything outside the fragment is rejected at import with a
//! diagnostic naming the element; round trips are semantic, not
//! byte-for-byte — a re-imported document defines identical dynamics.

pub mod mathml;
pub mod reader;
pub mod writer;
pub mod xml;

pub use reader::read_sbml;
pub use writer::write_sbml;

/// Read a model from an SBML file on disk.
pub fn read_sbml_file(path: &std::path::Path) -> mesokin_core::Result<mesokin_ast::Model> {
    let input = std::fs::read_to_string(path)?;
    read_sbml(&input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mesokin_ast::fixtures;
    use mesokin_expr::ValueMap;

    const BIRTH_DEATH: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<sbml xmlns="http://www.sbml.org/sbml/level3/version2/core" level="3" version="2">
  <model id="BirthDeath">
    <listOfCompartments>
      <compartment id="cell" spatialDimensions="3" constant="true" size="1"/>
    </listOfCompartments>
    <listOfSpecies>
      <species id="X" compartment="cell" constant="false" initialAmount="10"/>
    </listOfSpecies>
    <listOfParameters>
      <parameter id="k" constant="true" value="10"/>
      <parameter id="gamma" constant="true" value="1"/>
    </listOfParameters>
    <listOfReactions>
      <reaction id="birth" reversible="false">
        <listOfProducts>
          <speciesReference species="X" stoichiometry="1" constant="true"/>
        </listOfProducts>
        <kineticLaw>
          <math xmlns="http://www.w3.org/1998/Math/MathML">
            <ci> k </ci>
          </math>
        </kineticLaw>
      </reaction>
      <reaction id="death" reversible="false">
        <listOfReactants>
          <speciesReference species="X" stoichiometry="1" constant="true"/>
        </listOfReactants>
        <kineticLaw>
          <math xmlns="http://www.w3.org/1998/Math/MathML">
            <apply><times/><ci>gamma</ci><ci>X</ci></apply>
          </math>
        </kineticLaw>
      </reaction>
    </listOfReactions>
  </model>
</sbml>
"#;

    #[test]
    fn test_import_birth_death() {
        let model = read_sbml(BIRTH_DEATH).unwrap();
        assert_eq!(model.id, "BirthDeath");
        assert_eq!(model.num_species(), 1);
        assert_eq!(model.num_reactions(), 2);
        assert!(model.species_have_substance_units);
        let s = model.stoichiometry_matrix().unwrap();
        assert_eq!(s[[0, 0]], 1.0);
        assert_eq!(s[[0, 1]], -1.0);
        let x = model.symbols().lookup("X").unwrap();
        let init = model.species()[0].initial.clone().unwrap();
        assert_relative_eq!(model.evaluate_initial_value(&init).unwrap(), 10.0);
        let _ = x;
    }

    #[test]
    fn test_semantic_roundtrip() {
        let model = fixtures::michaelis_menten();
        let xml = write_sbml(&model).unwrap();
        let back = read_sbml(&xml).unwrap();

        assert_eq!(back.num_species(), model.num_species());
        assert_eq!(back.num_reactions(), model.num_reactions());
        assert_eq!(
            back.stoichiometry_matrix().unwrap(),
            model.stoichiometry_matrix().unwrap()
        );

        // identical propensity values at a common state
        let props_a = model.propensities().unwrap();
        let props_b = back.propensities().unwrap();
        let state = [("E", 7.0), ("S", 55.0), ("ES", 3.0), ("P", 42.0), ("cell", 1.0)];
        let values_for = |m: &mesokin_ast::Model| {
            let mut v = ValueMap::new();
            for (name, value) in &state {
                v.insert(m.symbols().lookup(name).unwrap(), *value);
            }
            // fold parameters through initial values
            for p in m.parameters() {
                let value = m
                    .evaluate_initial_value(p.value.as_ref().unwrap())
                    .unwrap();
                v.insert(p.symbol, value);
            }
            v
        };
        let va = values_for(&model);
        let vb = values_for(&back);
        for (a, b) in props_a.iter().zip(props_b.iter()) {
            assert_relative_eq!(
                a.eval(&va).unwrap(),
                b.eval(&vb).unwrap(),
                max_relative = 1e-12
            );
        }
    }

    #[test]
    fn test_roundtrip_with_local_parameters() {
        let mut model = fixtures::birth_death(1.0, 1.0, 5.0);
        // move the death rate into a reaction-local parameter
        let local = model.make_local_parameter("death", "rate", Some(mesokin_expr::Expr::num(2.5)));
        let x = model.symbols().lookup("X").unwrap();
        let law = mesokin_expr::Expr::mul(vec![
            mesokin_expr::Expr::var(local.symbol),
            mesokin_expr::Expr::var(x),
        ]);
        {
            let reaction = model.reaction_at_mut(1);
            reaction.kinetic_law.rate_law = law;
            reaction.kinetic_law.local_parameters = vec![local];
        }

        let xml = write_sbml(&model).unwrap();
        let back = read_sbml(&xml).unwrap();
        let props = back.propensities().unwrap();
        let x_back = back.symbols().lookup("X").unwrap();
        let mut values = ValueMap::new();
        values.insert(x_back, 4.0);
        assert_relative_eq!(props[1].eval(&values).unwrap(), 10.0);
    }

    #[test]
    fn test_unsupported_construct_rejected() {
        let doc = BIRTH_DEATH.replace(
            "<listOfReactions>",
            "<listOfEvents><event id=\"e\"/></listOfEvents><listOfReactions>",
        );
        let err = read_sbml(&doc).unwrap_err();
        assert!(err.to_string().contains("listOfEvents"));
    }

    #[test]
    fn test_rules_are_imported_for_rejection() {
        let doc = BIRTH_DEATH.replace(
            "</listOfReactions>",
            r#"</listOfReactions>
            <listOfRules>
              <rateRule variable="X">
                <math><cn type="integer">1</cn></math>
              </rateRule>
            </listOfRules>"#,
        );
        let model = read_sbml(&doc).unwrap();
        assert!(mesokin_trafo::assert_no_rate_rule(&model).is_err());
    }

    #[test]
    fn test_reversible_flag_roundtrip() {
        let model = fixtures::reversible_pair(1.0, 0.5, 10.0, 0.0);
        let xml = write_sbml(&model).unwrap();
        let back = read_sbml(&xml).unwrap();
        assert!(back.reactions()[0].reversible);
    }
}

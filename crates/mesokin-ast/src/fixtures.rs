//! Standard reaction networks used across the workspace tests and docs.
//!
//! All fixtures count molecules directly: their substance base unit is
//! `item`, so particle-number normalization is the identity.

use crate::model::{KineticLaw, Model, ReactionBuilder};
use crate::units::{BaseUnit, ScaledBaseUnit};
use mesokin_expr::Expr;

fn model_in_items(id: &str) -> Model {
    let mut model = Model::new(id);
    model.set_substance_unit(ScaledBaseUnit::base(BaseUnit::Item));
    model
}

/// Michaelis-Menten enzyme kinetics
/// `E + S <-> ES -> E + P` with mass-action elementary steps.
///
/// Conserved groups: `E + ES` and `S + ES + P`.
pub fn michaelis_menten() -> Model {
    michaelis_menten_with(10.0, 100.0, 0.01, 0.1, 0.1)
}

/// Michaelis-Menten with explicit totals and rate constants.
pub fn michaelis_menten_with(e_tot: f64, s_tot: f64, k1: f64, km1: f64, k2: f64) -> Model {
    let mut model = model_in_items("MichaelisMenten");
    let cell = model
        .add_compartment("cell", 3, true, Some(Expr::num(1.0)))
        .unwrap();
    let e = model
        .add_species("E", cell, false, Some(Expr::num(e_tot)))
        .unwrap();
    let s = model
        .add_species("S", cell, false, Some(Expr::num(s_tot)))
        .unwrap();
    let es = model.add_species("ES", cell, false, Some(Expr::num(0.0))).unwrap();
    let p = model.add_species("P", cell, false, Some(Expr::num(0.0))).unwrap();
    let k1 = model.add_parameter("k1", true, Some(Expr::num(k1))).unwrap();
    let km1 = model.add_parameter("km1", true, Some(Expr::num(km1))).unwrap();
    let k2 = model.add_parameter("k2", true, Some(Expr::num(k2))).unwrap();

    // bimolecular mass action in amounts scales inversely with volume
    let binding = Expr::div(
        Expr::mul(vec![Expr::var(k1), Expr::var(e), Expr::var(s)]),
        Expr::var(cell),
    );
    model
        .add_reaction(
            ReactionBuilder::new("binding", KineticLaw::new(binding))
                .reactant(e, 1)
                .reactant(s, 1)
                .product(es, 1),
        )
        .unwrap();

    let unbinding = Expr::mul(vec![Expr::var(km1), Expr::var(es)]);
    model
        .add_reaction(
            ReactionBuilder::new("unbinding", KineticLaw::new(unbinding))
                .reactant(es, 1)
                .product(e, 1)
                .product(s, 1),
        )
        .unwrap();

    let catalysis = Expr::mul(vec![Expr::var(k2), Expr::var(es)]);
    model
        .add_reaction(
            ReactionBuilder::new("catalysis", KineticLaw::new(catalysis))
                .reactant(es, 1)
                .product(e, 1)
                .product(p, 1),
        )
        .unwrap();

    model
}

/// Linear birth-death process `0 -> X` at rate `k`, `X -> 0` at rate
/// `gamma * X`. Steady state `X* = k/gamma` with Poissonian noise.
pub fn birth_death(k: f64, gamma: f64, x0: f64) -> Model {
    let mut model = model_in_items("BirthDeath");
    let cell = model
        .add_compartment("cell", 3, true, Some(Expr::num(1.0)))
        .unwrap();
    let x = model.add_species("X", cell, false, Some(Expr::num(x0))).unwrap();
    let k = model.add_parameter("k", true, Some(Expr::num(k))).unwrap();
    let gamma = model
        .add_parameter("gamma", true, Some(Expr::num(gamma)))
        .unwrap();

    model
        .add_reaction(
            ReactionBuilder::new("birth", KineticLaw::new(Expr::var(k))).product(x, 1),
        )
        .unwrap();

    let death = Expr::mul(vec![Expr::var(gamma), Expr::var(x)]);
    model
        .add_reaction(
            ReactionBuilder::new("death", KineticLaw::new(death)).reactant(x, 1),
        )
        .unwrap();

    model
}

/// A single reversible isomerization `S1 <-> S2` with net rate law
/// `k1*S1 - k2*S2`, for exercising the reversible-splitting pass.
pub fn reversible_pair(k1: f64, k2: f64, s1_0: f64, s2_0: f64) -> Model {
    let mut model = model_in_items("ReversiblePair");
    let cell = model
        .add_compartment("cell", 3, true, Some(Expr::num(1.0)))
        .unwrap();
    let s1 = model
        .add_species("S1", cell, false, Some(Expr::num(s1_0)))
        .unwrap();
    let s2 = model
        .add_species("S2", cell, false, Some(Expr::num(s2_0)))
        .unwrap();
    let k1 = model.add_parameter("k1", true, Some(Expr::num(k1))).unwrap();
    let k2 = model.add_parameter("k2", true, Some(Expr::num(k2))).unwrap();

    let law = Expr::sub(
        Expr::mul(vec![Expr::var(k1), Expr::var(s1)]),
        Expr::mul(vec![Expr::var(k2), Expr::var(s2)]),
    );
    model
        .add_reaction(
            ReactionBuilder::new("iso", KineticLaw::new(law))
                .reversible(true)
                .reactant(s1, 1)
                .product(s2, 1),
        )
        .unwrap();

    model
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_shapes() {
        let mm = michaelis_menten();
        assert_eq!(mm.num_species(), 4);
        assert_eq!(mm.num_reactions(), 3);
        let bd = birth_death(10.0, 1.0, 0.0);
        assert_eq!(bd.num_species(), 1);
        assert_eq!(bd.num_reactions(), 2);
        let rp = reversible_pair(1.0, 0.5, 10.0, 0.0);
        assert!(rp.reactions()[0].reversible);
    }
}

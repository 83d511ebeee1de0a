//! Reversible-to-irreversible reaction splitting.

use mesokin_ast::{KineticLaw, Model, ReactionBuilder};
use mesokin_core::{MesokinError, Result};
use mesokin_expr::{Expr, Substitution};

/// Split every reversible reaction `r` with net rate law `v` into an
/// irreversible forward half and an irreversible backward half with
/// reactant and product roles swapped.
///
/// The split works on the numerator of `v` over its common denominator:
/// substituting zero for all products isolates the forward part,
/// substituting zero for all reactants the backward part. If the two
/// parts do not recombine to the numerator the reaction cannot be split
/// and the pass fails naming it. Returns the number of reactions split;
/// a model without reversible reactions is left untouched.
pub fn convert_to_irreversible(model: &mut Model) -> Result<usize> {
    let mut count = 0;
    let mut backward_reactions = Vec::new();

    for i in 0..model.num_reactions() {
        if !model.reaction_at(i).reversible {
            continue;
        }
        let reaction = model.reaction_at(i);
        let id = reaction.id.clone();

        let (numerator, denominator) = as_fraction(&reaction.kinetic_law.rate_law);
        let numerator = numerator.expand();

        let mut product_zero = Substitution::new();
        for (s, _) in &reaction.products {
            product_zero.insert(*s, Expr::zero());
        }
        let mut reactant_zero = Substitution::new();
        for (s, _) in &reaction.reactants {
            reactant_zero.insert(*s, Expr::zero());
        }

        let forward = numerator.substitute(&product_zero);
        let backward = numerator.substitute(&reactant_zero);

        // every term of the numerator must land in exactly one half
        let recombined = Expr::add(vec![forward.clone(), backward.clone()]);
        if Expr::sub(recombined, numerator.clone()).expand() != Expr::zero() {
            return Err(MesokinError::UnsupportedFeature(format!(
                "reversible reaction `{}` cannot be split into irreversible halves",
                id
            )));
        }

        let forward_law = Expr::div(forward, denominator.clone());
        let backward_law = Expr::neg(Expr::div(backward, denominator));

        let reaction = model.reaction_at(i);
        let mut builder = ReactionBuilder::new(
            &format!("{}_rev", id),
            KineticLaw {
                rate_law: backward_law,
                local_parameters: reaction.kinetic_law.local_parameters.clone(),
            },
        );
        builder.name = reaction.name.as_ref().map(|n| format!("{} (reverse)", n));
        // swap reactant and product roles in the backward half
        builder.reactants = reaction.products.clone();
        builder.products = reaction.reactants.clone();
        builder.modifiers = reaction.modifiers.clone();
        backward_reactions.push(builder);

        let reaction = model.reaction_at_mut(i);
        reaction.reversible = false;
        reaction.kinetic_law.rate_law = forward_law;
        count += 1;
    }

    for builder in backward_reactions {
        model.add_reaction(builder)?;
    }
    Ok(count)
}

/// Split an expression into `(numerator, denominator)` without
/// simplification; sums are combined over the product of their term
/// denominators.
fn as_fraction(expr: &Expr) -> (Expr, Expr) {
    match expr {
        Expr::Mul(factors) => {
            let mut numer = Vec::new();
            let mut denom = Vec::new();
            for f in factors {
                match f {
                    Expr::Pow(base, n) if *n < 0 => {
                        denom.push(Expr::powi((**base).clone(), -n))
                    }
                    other => numer.push(other.clone()),
                }
            }
            (Expr::mul(numer), Expr::mul(denom))
        }
        Expr::Pow(base, n) if *n < 0 => (Expr::one(), Expr::powi((**base).clone(), -n)),
        Expr::Add(terms) => {
            let mut numer = Expr::zero();
            let mut denom = Expr::one();
            for t in terms {
                let (tn, td) = as_fraction(t);
                numer = Expr::add(vec![
                    Expr::mul(vec![numer, td.clone()]),
                    Expr::mul(vec![tn, denom.clone()]),
                ]);
                denom = Expr::mul(vec![denom, td]);
            }
            (numer, denom)
        }
        other => (other.clone(), Expr::one()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesokin_ast::fixtures;
    use mesokin_expr::Expr;

    #[test]
    fn test_split_mass_action() {
        let mut model = fixtures::reversible_pair(1.0, 0.5, 10.0, 0.0);
        let split = convert_to_irreversible(&mut model).unwrap();
        assert_eq!(split, 1);
        assert_eq!(model.num_reactions(), 2);

        let s1 = model.symbols().lookup("S1").unwrap();
        let s2 = model.symbols().lookup("S2").unwrap();
        let k1 = model.symbols().lookup("k1").unwrap();
        let k2 = model.symbols().lookup("k2").unwrap();

        let forward = model.reaction_at(0);
        assert!(!forward.reversible);
        assert_eq!(
            forward.kinetic_law.rate_law,
            Expr::mul(vec![Expr::var(k1), Expr::var(s1)])
        );

        let backward = model.reaction_at(1);
        assert_eq!(backward.id, "iso_rev");
        assert_eq!(
            backward.kinetic_law.rate_law,
            Expr::mul(vec![Expr::var(k2), Expr::var(s2)])
        );
        // roles swapped
        assert!(backward.has_reactant(s2));
        assert!(backward.has_product(s1));
    }

    #[test]
    fn test_split_idempotent() {
        let mut model = fixtures::reversible_pair(1.0, 0.5, 10.0, 0.0);
        convert_to_irreversible(&mut model).unwrap();
        let stoich = model.stoichiometry_matrix().unwrap();
        let split = convert_to_irreversible(&mut model).unwrap();
        assert_eq!(split, 0);
        assert_eq!(model.stoichiometry_matrix().unwrap(), stoich);
    }

    #[test]
    fn test_split_with_denominator() {
        // v = (k1*S1 - k2*S2) / (1 + S1)
        let mut model = fixtures::reversible_pair(1.0, 0.5, 10.0, 0.0);
        let s1 = model.symbols().lookup("S1").unwrap();
        let law = model.reaction_at(0).kinetic_law.rate_law.clone();
        model.reaction_at_mut(0).kinetic_law.rate_law = Expr::div(
            law,
            Expr::add(vec![Expr::one(), Expr::var(s1)]),
        );
        convert_to_irreversible(&mut model).unwrap();
        let k2 = model.symbols().lookup("k2").unwrap();
        let s2 = model.symbols().lookup("S2").unwrap();
        let backward = model.reaction_at(1);
        let expected = Expr::div(
            Expr::mul(vec![Expr::var(k2), Expr::var(s2)]),
            Expr::add(vec![Expr::one(), Expr::var(s1)]),
        );
        assert_eq!(backward.kinetic_law.rate_law, expected);
    }

    #[test]
    fn test_unsplittable_rejected() {
        // coupled term k*S1*S2 lands in neither half
        let mut model = fixtures::reversible_pair(1.0, 0.5, 10.0, 0.0);
        let s1 = model.symbols().lookup("S1").unwrap();
        let s2 = model.symbols().lookup("S2").unwrap();
        let law = model.reaction_at(0).kinetic_law.rate_law.clone();
        model.reaction_at_mut(0).kinetic_law.rate_law = Expr::add(vec![
            law,
            Expr::mul(vec![Expr::var(s1), Expr::var(s2)]),
        ]);
        let err = convert_to_irreversible(&mut model).unwrap_err();
        assert!(err.to_string().contains("iso"));
    }
}

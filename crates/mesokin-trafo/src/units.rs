//! Species unit normalization passes.
//!
//! The species mode is converted between extensive (amounts) and
//! intensive (concentrations) by substituting `x -> x * V` or
//! `x -> x / V` into every kinetic law, where `V` is the symbol of the
//! enclosing compartment. Substitution is simultaneous over all species,
//! so replacements are never re-substituted and capture cannot occur.
//! Initial-value expressions are rescaled alongside so they stay in the
//! species' own units.

use mesokin_ast::{BaseUnit, Model, ScaledBaseUnit};
use mesokin_core::{MesokinError, Result, AVOGADRO};
use mesokin_expr::{Expr, Substitution};

/// Convert species to intensive units (concentrations).
///
/// No-op when the model is already intensive.
pub fn intensive_species(model: &mut Model) -> Result<()> {
    if !model.species_have_substance_units {
        return Ok(());
    }
    model.species_have_substance_units = false;

    // x (amount) -> x (concentration) * V in every law
    let mut forward = Substitution::new();
    let mut volume_of = Vec::new();
    for s in model.species() {
        let volume = s.compartment;
        forward.insert(
            s.symbol,
            Expr::mul(vec![Expr::var(s.symbol), Expr::var(volume)]),
        );
        volume_of.push((s.symbol, volume));
    }
    apply_to_laws(model, &forward);

    // initial amount -> initial concentration
    for (species, volume) in volume_of {
        let s = model.species_mut(species).unwrap();
        if let Some(init) = s.initial.take() {
            s.initial = Some(Expr::div(init, Expr::var(volume)));
        }
    }
    Ok(())
}

/// Convert species to extensive units (amounts).
///
/// No-op when the model is already extensive.
pub fn extensive_species(model: &mut Model) -> Result<()> {
    if model.species_have_substance_units {
        return Ok(());
    }
    model.species_have_substance_units = true;

    let mut forward = Substitution::new();
    let mut volume_of = Vec::new();
    for s in model.species() {
        let volume = s.compartment;
        forward.insert(
            s.symbol,
            Expr::div(Expr::var(s.symbol), Expr::var(volume)),
        );
        volume_of.push((s.symbol, volume));
    }
    apply_to_laws(model, &forward);

    for (species, volume) in volume_of {
        let s = model.species_mut(species).unwrap();
        if let Some(init) = s.initial.take() {
            s.initial = Some(Expr::mul(vec![init, Expr::var(volume)]));
        }
    }
    Ok(())
}

/// Rescale an extensive model from its substance base unit to particle
/// numbers (base unit `item`).
///
/// With `m = multiplier * 10^scale * N_A` (the Avogadro factor applies
/// for mole-based units), species values become `x' = m * x`, initial
/// values are scaled accordingly and every kinetic law `a(x)` becomes
/// `m * a(x'/m)` so propensities are in molecules per time. Returns the
/// applied factor; a model already in single items is left untouched.
pub fn particle_numbers(model: &mut Model) -> Result<f64> {
    if !model.species_have_substance_units {
        return Err(MesokinError::InternalError(format!(
            "expected model in substance units, species are defined in {}",
            model.species_unit().dump()
        )));
    }

    let unit = *model.substance_unit();
    let mut multiplier = unit.factor();
    if unit.is_variant_of(BaseUnit::Mole) {
        multiplier *= AVOGADRO;
    }
    if multiplier == 1.0 && unit.is_variant_of(BaseUnit::Item) {
        return Ok(1.0);
    }

    // a'(x') = m * a(x'/m)
    let mut forward = Substitution::new();
    let species_syms: Vec<_> = model.species().iter().map(|s| s.symbol).collect();
    for &s in &species_syms {
        forward.insert(s, Expr::div(Expr::var(s), Expr::num(multiplier)));
    }
    for i in 0..model.num_reactions() {
        let law = &mut model.reaction_at_mut(i).kinetic_law.rate_law;
        *law = Expr::mul(vec![Expr::num(multiplier), law.substitute(&forward)]);
    }

    for &s in &species_syms {
        let species = model.species_mut(s).unwrap();
        if let Some(init) = species.initial.take() {
            species.initial = Some(Expr::mul(vec![Expr::num(multiplier), init]));
        }
    }

    model.set_substance_unit(ScaledBaseUnit::base(BaseUnit::Item));
    Ok(multiplier)
}

fn apply_to_laws(model: &mut Model, map: &Substitution) {
    for i in 0..model.num_reactions() {
        let law = &mut model.reaction_at_mut(i).kinetic_law.rate_law;
        *law = law.substitute(map);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mesokin_ast::fixtures;

    #[test]
    fn test_intensive_extensive_roundtrip() {
        let mut model = fixtures::michaelis_menten();
        let law0 = model.reaction_at(0).kinetic_law.rate_law.clone();

        intensive_species(&mut model).unwrap();
        assert!(!model.species_have_substance_units);
        let intensive_law = model.reaction_at(0).kinetic_law.rate_law.clone();
        assert_ne!(intensive_law, law0);

        // idempotent
        intensive_species(&mut model).unwrap();
        assert_eq!(model.reaction_at(0).kinetic_law.rate_law, intensive_law);

        extensive_species(&mut model).unwrap();
        assert!(model.species_have_substance_units);
        // V folds back out of the bilinear law
        assert_eq!(model.reaction_at(0).kinetic_law.rate_law.expand(), law0.expand());
    }

    #[test]
    fn test_intensive_law_carries_volume() {
        let mut model = fixtures::michaelis_menten();
        intensive_species(&mut model).unwrap();
        let cell = model.symbols().lookup("cell").unwrap();
        // the amount-based binding law k*E*S/V becomes k*[E]*[S]*V
        let law = &model.reaction_at(0).kinetic_law.rate_law;
        assert!(law.has(cell));
        // initial concentration of E is 10 / V with V = 1
        let e = model.symbols().lookup("E").unwrap();
        let idx = model.species_index(e).unwrap();
        let init = model.species()[idx].initial.clone().unwrap();
        assert_relative_eq!(model.evaluate_initial_value(&init).unwrap(), 10.0);
    }

    #[test]
    fn test_particle_numbers_mole_rescale() {
        let mut model = fixtures::birth_death(10.0, 1.0, 5.0);
        // express amounts in nanomole
        model.set_substance_unit(ScaledBaseUnit::new(BaseUnit::Mole, 1.0, -9, 1));
        let m = particle_numbers(&mut model).unwrap();
        assert_relative_eq!(m, 1e-9 * AVOGADRO);
        assert!(model.substance_unit().is_variant_of(BaseUnit::Item));

        // initial value scaled
        let x = model.symbols().lookup("X").unwrap();
        let init = model.species_mut(x).unwrap().initial.clone().unwrap();
        assert_relative_eq!(
            model.evaluate_initial_value(&init).unwrap(),
            5.0 * m,
            max_relative = 1e-12
        );

        // linear death propensity is invariant, zero-order birth scales
        let props = model.propensities().unwrap();
        let mut values = mesokin_expr::ValueMap::new();
        values.insert(x, 7.0);
        assert_relative_eq!(props[1].eval(&values).unwrap(), 7.0, max_relative = 1e-12);
        assert_relative_eq!(props[0].eval(&values).unwrap(), 10.0 * m, max_relative = 1e-9);
    }

    #[test]
    fn test_particle_numbers_requires_extensive() {
        let mut model = fixtures::birth_death(10.0, 1.0, 5.0);
        intensive_species(&mut model).unwrap();
        assert!(particle_numbers(&mut model).is_err());
    }

    #[test]
    fn test_particle_numbers_item_noop() {
        let mut model = fixtures::birth_death(10.0, 1.0, 5.0);
        model.set_substance_unit(ScaledBaseUnit::base(BaseUnit::Item));
        let law = model.reaction_at(1).kinetic_law.rate_law.clone();
        assert_relative_eq!(particle_numbers(&mut model).unwrap(), 1.0);
        assert_eq!(model.reaction_at(1).kinetic_law.rate_law, law);
    }
}

//! Propensity expansion in the inverse system size.
//!
//! Each intensive-units propensity is rewritten with the compartment
//! volume replaced by `1/omega` and read as a Laurent series in `omega`.
//! The leading coefficient gives the macroscopic rate, the next order
//! the first mesoscopic correction:
//!
//! * `rate    = V * coeff(omega, -1)`
//! * `rate1   =     coeff(omega,  0)`
//!
//! A propensity whose principal part reaches below `omega^-1`, whose
//! leading coefficient vanishes, or in which the volume appears
//! non-polynomially cannot be expanded; it is kept unmodified with a
//! zero correction. That fall-back is an expected alternative, not an
//! error.

use mesokin_ast::Model;
use mesokin_core::Result;
use mesokin_expr::{Expr, Substitution, Symbol};

/// Expanded propensities of a model in intensive units.
#[derive(Debug, Clone)]
pub struct ExpandedRates {
    /// Macroscopic rates `Omega * f_j(x)`.
    pub rates: Vec<Expr>,
    /// First-order corrections `f_j^(1)(x)`.
    pub rates1: Vec<Expr>,
}

/// Expand every propensity of `model` around infinite system size.
pub fn expand_propensities(model: &mut Model) -> Result<ExpandedRates> {
    let propensities = model.propensities()?;
    let compartments: Vec<Symbol> = model.compartments().iter().map(|c| c.symbol).collect();
    let omega = model.symbols_mut().fresh("omega");

    let mut rates = Vec::with_capacity(propensities.len());
    let mut rates1 = Vec::with_capacity(propensities.len());

    for propensity in &propensities {
        let mut rate = propensity.clone();
        let mut rate1 = Expr::zero();

        for &volume in &compartments {
            if !rate.has(volume) {
                continue;
            }
            match expand_in_volume(&rate, volume, omega) {
                Some((leading, correction)) => {
                    rate = Expr::mul(vec![Expr::var(volume), leading]);
                    rate1 = correction;
                }
                None => {
                    // not expandable; keep the unexpanded propensity
                    rate = propensity.clone();
                    rate1 = Expr::zero();
                }
            }
        }

        rates.push(rate);
        rates1.push(rate1);
    }

    Ok(ExpandedRates { rates, rates1 })
}

/// Laurent-expand `expr` in the inverse of `volume`; `None` when the
/// expansion does not exist or its leading term vanishes.
fn expand_in_volume(expr: &Expr, volume: Symbol, omega: Symbol) -> Option<(Expr, Expr)> {
    let mut to_inverse = Substitution::new();
    to_inverse.insert(volume, Expr::powi(Expr::var(omega), -1));
    let in_omega = expr.substitute(&to_inverse);

    let coeffs = match in_omega.poly_coeffs(omega) {
        Ok(c) => c,
        Err(_) => return None,
    };

    // terms below omega^-1 have no macroscopic limit
    if coeffs.keys().any(|&deg| deg < -1) {
        return None;
    }
    let leading = coeffs.get(&-1).cloned().unwrap_or_else(Expr::zero);
    if leading.is_zero() {
        return None;
    }
    let correction = coeffs.get(&0).cloned().unwrap_or_else(Expr::zero);
    Some((leading, correction))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesokin_ast::fixtures;
    use mesokin_trafo::intensive_species;

    #[test]
    fn test_bilinear_law_expands_with_zero_correction() {
        let mut model = fixtures::michaelis_menten();
        intensive_species(&mut model).unwrap();
        let expanded = expand_propensities(&mut model).unwrap();
        // deterministic mass-action input: no finite-size correction
        assert_eq!(expanded.rates.len(), 3);
        for r1 in &expanded.rates1 {
            assert!(r1.is_zero());
        }
        // the expanded rate carries one volume factor
        let cell = model.symbols().lookup("cell").unwrap();
        assert!(expanded.rates[0].has(cell));
    }

    #[test]
    fn test_microscopic_pair_law_yields_correction() {
        // a(x) = k * x * (x - 1/V): dimerization propensity written in
        // concentration units; correction is -k*x
        let mut model = fixtures::birth_death(1.0, 1.0, 10.0);
        intensive_species(&mut model).unwrap();
        let x = model.symbols().lookup("X").unwrap();
        let k = model.symbols().lookup("k").unwrap();
        let cell = model.symbols().lookup("cell").unwrap();
        let law = Expr::mul(vec![
            Expr::var(k),
            Expr::var(cell),
            Expr::var(x),
            Expr::sub(
                Expr::var(x),
                Expr::div(Expr::one(), Expr::var(cell)),
            ),
        ]);
        model.reaction_at_mut(0).kinetic_law.rate_law = law;
        let expanded = expand_propensities(&mut model).unwrap();

        let expected_leading = Expr::mul(vec![
            Expr::var(cell),
            Expr::var(k),
            Expr::powi(Expr::var(x), 2),
        ]);
        assert_eq!(expanded.rates[0].expand(), expected_leading.expand());
        let expected_correction =
            Expr::neg(Expr::mul(vec![Expr::var(k), Expr::var(x)]));
        assert_eq!(expanded.rates1[0], expected_correction);
    }

    #[test]
    fn test_unexpandable_law_falls_back() {
        let mut model = fixtures::birth_death(1.0, 1.0, 10.0);
        intensive_species(&mut model).unwrap();
        let cell = model.symbols().lookup("cell").unwrap();
        // exp(V) is not a Laurent polynomial in the volume
        let law = Expr::exp(Expr::var(cell));
        model.reaction_at_mut(0).kinetic_law.rate_law = law.clone();
        let expanded = expand_propensities(&mut model).unwrap();
        assert_eq!(expanded.rates[0], law);
        assert!(expanded.rates1[0].is_zero());
    }
}

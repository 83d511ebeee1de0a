//! Unit definitions.
//!
//! A unit is a product of scaled base units, each
//! `base * multiplier * 10^scale` raised to an integer exponent. The
//! model carries five default units (substance, volume, area, length,
//! time); the transform pipeline consults the substance unit to decide
//! whether propensities need the Avogadro rescaling.

use serde::{Deserialize, Serialize};

/// SI-style base unit kinds supported by the exchange format fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BaseUnit {
    Mole,
    Item,
    Litre,
    Metre,
    Second,
    Kilogram,
    Dimensionless,
}

impl BaseUnit {
    pub fn name(self) -> &'static str {
        match self {
            BaseUnit::Mole => "mole",
            BaseUnit::Item => "item",
            BaseUnit::Litre => "litre",
            BaseUnit::Metre => "metre",
            BaseUnit::Second => "second",
            BaseUnit::Kilogram => "kilogram",
            BaseUnit::Dimensionless => "dimensionless",
        }
    }

    pub fn from_name(name: &str) -> Option<BaseUnit> {
        match name {
            "mole" => Some(BaseUnit::Mole),
            "item" => Some(BaseUnit::Item),
            "litre" | "liter" => Some(BaseUnit::Litre),
            "metre" | "meter" => Some(BaseUnit::Metre),
            "second" => Some(BaseUnit::Second),
            "kilogram" => Some(BaseUnit::Kilogram),
            "dimensionless" => Some(BaseUnit::Dimensionless),
            _ => None,
        }
    }
}

/// One factor of a unit: `base * multiplier * 10^scale`, raised to
/// `exponent`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaledBaseUnit {
    pub base: BaseUnit,
    pub multiplier: f64,
    pub scale: i32,
    pub exponent: i32,
}

impl ScaledBaseUnit {
    pub fn new(base: BaseUnit, multiplier: f64, scale: i32, exponent: i32) -> Self {
        Self {
            base,
            multiplier,
            scale,
            exponent,
        }
    }

    /// Plain base unit to the first power.
    pub fn base(base: BaseUnit) -> Self {
        Self::new(base, 1.0, 0, 1)
    }

    /// Combined numeric factor `multiplier * 10^scale`.
    pub fn factor(&self) -> f64 {
        self.multiplier * 10f64.powi(self.scale)
    }

    pub fn is_variant_of(&self, base: BaseUnit) -> bool {
        self.base == base
    }
}

/// A unit as a product of scaled base units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub factors: Vec<ScaledBaseUnit>,
}

impl Unit {
    pub fn new(factors: Vec<ScaledBaseUnit>) -> Self {
        Self { factors }
    }

    pub fn single(base: BaseUnit) -> Self {
        Self {
            factors: vec![ScaledBaseUnit::base(base)],
        }
    }

    /// The single scaled base unit of a one-factor unit.
    pub fn as_scaled_base(&self) -> Option<&ScaledBaseUnit> {
        match self.factors.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    pub fn dump(&self) -> String {
        self.factors
            .iter()
            .map(|f| {
                if f.multiplier == 1.0 && f.scale == 0 && f.exponent == 1 {
                    f.base.name().to_string()
                } else {
                    format!(
                        "({}*{}e{})^{}",
                        f.base.name(),
                        f.multiplier,
                        f.scale,
                        f.exponent
                    )
                }
            })
            .collect::<Vec<_>>()
            .join("*")
    }
}

/// Named unit definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitDefinition {
    pub id: String,
    pub unit: Unit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_factor() {
        let milli_mole = ScaledBaseUnit::new(BaseUnit::Mole, 1.0, -3, 1);
        assert!((milli_mole.factor() - 1e-3).abs() < 1e-18);
        assert!(milli_mole.is_variant_of(BaseUnit::Mole));
    }

    #[test]
    fn test_unit_dump() {
        let u = Unit::single(BaseUnit::Litre);
        assert_eq!(u.dump(), "litre");
    }
}

//! The reaction network model and its definitions.

use crate::units::{BaseUnit, ScaledBaseUnit, Unit, UnitDefinition};
use mesokin_core::{MesokinError, Result};
use mesokin_expr::{Expr, ParseCtx, Substitution, Symbol, SymbolTable, ValueMap};
use ndarray::Array2;
use std::collections::HashMap;

// =============================================================================
// DEFINITIONS
// =============================================================================

/// Rule attached to a variable: either `x := e` (evaluated whenever `x`
/// is read) or `dx/dt = e`. At most one rule per variable.
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    Assignment(Expr),
    Rate(Expr),
}

/// Reaction vessel.
#[derive(Debug, Clone)]
pub struct Compartment {
    pub id: String,
    pub symbol: Symbol,
    /// Spatial dimensions, 0 through 3.
    pub dimensions: u8,
    pub constant: bool,
    pub initial: Option<Expr>,
    pub rule: Option<Rule>,
}

/// Chemical species. The symbol denotes an amount or a concentration
/// depending on the model-wide `species_have_substance_units` flag.
#[derive(Debug, Clone)]
pub struct Species {
    pub id: String,
    pub symbol: Symbol,
    pub compartment: Symbol,
    pub constant: bool,
    pub initial: Option<Expr>,
    pub rule: Option<Rule>,
}

/// Model- or reaction-scoped parameter.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub id: String,
    pub symbol: Symbol,
    pub constant: bool,
    pub value: Option<Expr>,
    pub rule: Option<Rule>,
}

/// Kinetic-law scope: rate law plus local parameters.
#[derive(Debug, Clone)]
pub struct KineticLaw {
    pub rate_law: Expr,
    pub local_parameters: Vec<Parameter>,
}

impl KineticLaw {
    pub fn new(rate_law: Expr) -> Self {
        Self {
            rate_law,
            local_parameters: Vec::new(),
        }
    }
}

/// Reaction with reactant/product multisets and a kinetic-law scope.
#[derive(Debug, Clone)]
pub struct Reaction {
    pub id: String,
    pub name: Option<String>,
    pub symbol: Symbol,
    pub reversible: bool,
    /// Species symbol paired with its stoichiometry expression.
    pub reactants: Vec<(Symbol, Expr)>,
    pub products: Vec<(Symbol, Expr)>,
    pub modifiers: Vec<Symbol>,
    pub kinetic_law: KineticLaw,
}

impl Reaction {
    pub fn has_reactant(&self, species: Symbol) -> bool {
        self.reactants.iter().any(|(s, _)| *s == species)
    }

    pub fn has_product(&self, species: Symbol) -> bool {
        self.products.iter().any(|(s, _)| *s == species)
    }

    pub fn reactant_stoichiometry(&self, species: Symbol) -> Option<&Expr> {
        self.reactants
            .iter()
            .find(|(s, _)| *s == species)
            .map(|(_, e)| e)
    }

    pub fn product_stoichiometry(&self, species: Symbol) -> Option<&Expr> {
        self.products
            .iter()
            .find(|(s, _)| *s == species)
            .map(|(_, e)| e)
    }

    pub fn add_reactant(&mut self, species: Symbol, stoichiometry: Expr) {
        match self.reactants.iter_mut().find(|(s, _)| *s == species) {
            Some((_, e)) => *e = Expr::add(vec![e.clone(), stoichiometry]),
            None => self.reactants.push((species, stoichiometry)),
        }
    }

    pub fn add_product(&mut self, species: Symbol, stoichiometry: Expr) {
        match self.products.iter_mut().find(|(s, _)| *s == species) {
            Some((_, e)) => *e = Expr::add(vec![e.clone(), stoichiometry]),
            None => self.products.push((species, stoichiometry)),
        }
    }
}

/// Borrowed view of any definition, for scope-chain lookups.
#[derive(Debug, Clone, Copy)]
pub enum Definition<'a> {
    Compartment(&'a Compartment),
    Species(&'a Species),
    Parameter(&'a Parameter),
    Reaction(&'a Reaction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Compartment(usize),
    Species(usize),
    Parameter(usize),
    Reaction(usize),
}

// =============================================================================
// MODEL
// =============================================================================

/// A reaction network: the root scope of all definitions.
///
/// Identifiers are unique within the model scope; reaction-local
/// parameters live in the nested kinetic-law scope and are interned
/// under `reaction_id.parameter_id` so their handles never collide with
/// model-scope symbols of the same short name.
#[derive(Debug, Clone)]
pub struct Model {
    pub id: String,
    symbols: SymbolTable,
    time_symbol: Symbol,

    compartments: Vec<Compartment>,
    species: Vec<Species>,
    parameters: Vec<Parameter>,
    reactions: Vec<Reaction>,
    unit_definitions: Vec<UnitDefinition>,
    index: HashMap<Symbol, Slot>,

    /// Species values are amounts (substance units) or concentrations.
    pub species_have_substance_units: bool,
    substance_unit: ScaledBaseUnit,
    volume_unit: ScaledBaseUnit,
    area_unit: ScaledBaseUnit,
    length_unit: ScaledBaseUnit,
    time_unit: ScaledBaseUnit,
}

impl Model {
    pub fn new(id: &str) -> Self {
        let mut symbols = SymbolTable::new();
        let time_symbol = symbols.intern("time");
        Self {
            id: id.to_string(),
            symbols,
            time_symbol,
            compartments: Vec::new(),
            species: Vec::new(),
            parameters: Vec::new(),
            reactions: Vec::new(),
            unit_definitions: Vec::new(),
            index: HashMap::new(),
            species_have_substance_units: true,
            substance_unit: ScaledBaseUnit::base(BaseUnit::Mole),
            volume_unit: ScaledBaseUnit::base(BaseUnit::Litre),
            area_unit: ScaledBaseUnit::new(BaseUnit::Metre, 1.0, 0, 2),
            length_unit: ScaledBaseUnit::base(BaseUnit::Metre),
            time_unit: ScaledBaseUnit::base(BaseUnit::Second),
        }
    }

    // -------------------------------------------------------------------------
    // Symbols and scope
    // -------------------------------------------------------------------------

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn symbols_mut(&mut self) -> &mut SymbolTable {
        &mut self.symbols
    }

    /// Intern an identifier without defining it.
    pub fn intern(&mut self, name: &str) -> Symbol {
        self.symbols.intern(name)
    }

    /// The designated time symbol of the model scope.
    pub fn time_symbol(&self) -> Symbol {
        self.time_symbol
    }

    fn define(&mut self, id: &str, slot: Slot) -> Result<Symbol> {
        let symbol = self.symbols.intern(id);
        if self.index.contains_key(&symbol) {
            return Err(MesokinError::SemanticError(format!(
                "identifier `{}` is already defined in model `{}`",
                id, self.id
            )));
        }
        self.index.insert(symbol, slot);
        Ok(symbol)
    }

    /// Look up a definition by identifier in the model scope.
    pub fn lookup(&self, id: &str) -> Option<Definition<'_>> {
        self.symbols
            .lookup(id)
            .and_then(|sym| self.lookup_symbol(sym))
    }

    /// Look up a definition by symbol.
    pub fn lookup_symbol(&self, symbol: Symbol) -> Option<Definition<'_>> {
        self.index.get(&symbol).map(|slot| match *slot {
            Slot::Compartment(i) => Definition::Compartment(&self.compartments[i]),
            Slot::Species(i) => Definition::Species(&self.species[i]),
            Slot::Parameter(i) => Definition::Parameter(&self.parameters[i]),
            Slot::Reaction(i) => Definition::Reaction(&self.reactions[i]),
        })
    }

    pub fn has(&self, id: &str) -> bool {
        self.lookup(id).is_some()
    }

    /// Remove a definition. Symbols stay interned; only the definition
    /// dies with its scope entry.
    pub fn remove(&mut self, symbol: Symbol) -> Result<()> {
        let slot = self.index.remove(&symbol).ok_or_else(|| {
            MesokinError::SemanticError(format!(
                "cannot remove undefined symbol `{}`",
                self.symbols.name(symbol)
            ))
        })?;
        match slot {
            Slot::Compartment(i) => {
                self.compartments.remove(i);
            }
            Slot::Species(i) => {
                self.species.remove(i);
            }
            Slot::Parameter(i) => {
                self.parameters.remove(i);
            }
            Slot::Reaction(i) => {
                self.reactions.remove(i);
            }
        }
        self.reindex();
        Ok(())
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (i, c) in self.compartments.iter().enumerate() {
            self.index.insert(c.symbol, Slot::Compartment(i));
        }
        for (i, s) in self.species.iter().enumerate() {
            self.index.insert(s.symbol, Slot::Species(i));
        }
        for (i, p) in self.parameters.iter().enumerate() {
            self.index.insert(p.symbol, Slot::Parameter(i));
        }
        for (i, r) in self.reactions.iter().enumerate() {
            self.index.insert(r.symbol, Slot::Reaction(i));
        }
    }

    // -------------------------------------------------------------------------
    // Adding definitions
    // -------------------------------------------------------------------------

    pub fn add_compartment(
        &mut self,
        id: &str,
        dimensions: u8,
        constant: bool,
        initial: Option<Expr>,
    ) -> Result<Symbol> {
        let symbol = self.define(id, Slot::Compartment(self.compartments.len()))?;
        self.compartments.push(Compartment {
            id: id.to_string(),
            symbol,
            dimensions,
            constant,
            initial,
            rule: None,
        });
        Ok(symbol)
    }

    pub fn add_species(
        &mut self,
        id: &str,
        compartment: Symbol,
        constant: bool,
        initial: Option<Expr>,
    ) -> Result<Symbol> {
        if !matches!(
            self.lookup_symbol(compartment),
            Some(Definition::Compartment(_))
        ) {
            return Err(MesokinError::SemanticError(format!(
                "species `{}` references undefined compartment",
                id
            )));
        }
        let symbol = self.define(id, Slot::Species(self.species.len()))?;
        self.species.push(Species {
            id: id.to_string(),
            symbol,
            compartment,
            constant,
            initial,
            rule: None,
        });
        Ok(symbol)
    }

    pub fn add_parameter(&mut self, id: &str, constant: bool, value: Option<Expr>) -> Result<Symbol> {
        let symbol = self.define(id, Slot::Parameter(self.parameters.len()))?;
        self.parameters.push(Parameter {
            id: id.to_string(),
            symbol,
            constant,
            value,
            rule: None,
        });
        Ok(symbol)
    }

    pub fn add_reaction(&mut self, reaction: ReactionBuilder) -> Result<Symbol> {
        let ReactionBuilder {
            id,
            name,
            reversible,
            reactants,
            products,
            modifiers,
            kinetic_law,
        } = reaction;
        for (species, _) in reactants.iter().chain(products.iter()) {
            if !matches!(self.lookup_symbol(*species), Some(Definition::Species(_))) {
                return Err(MesokinError::SemanticError(format!(
                    "reaction `{}` references an undefined species",
                    id
                )));
            }
        }
        let symbol = self.define(&id, Slot::Reaction(self.reactions.len()))?;
        self.reactions.push(Reaction {
            id,
            name,
            symbol,
            reversible,
            reactants,
            products,
            modifiers,
            kinetic_law,
        });
        Ok(symbol)
    }

    pub fn add_unit_definition(&mut self, def: UnitDefinition) {
        self.unit_definitions.push(def);
    }

    /// Intern a reaction-local parameter under the nested kinetic-law
    /// scope of `reaction_id`.
    pub fn make_local_parameter(
        &mut self,
        reaction_id: &str,
        id: &str,
        value: Option<Expr>,
    ) -> Parameter {
        let symbol = self.symbols.intern(&format!("{}.{}", reaction_id, id));
        Parameter {
            id: id.to_string(),
            symbol,
            constant: true,
            value,
            rule: None,
        }
    }

    // -------------------------------------------------------------------------
    // Access
    // -------------------------------------------------------------------------

    pub fn num_compartments(&self) -> usize {
        self.compartments.len()
    }

    pub fn num_species(&self) -> usize {
        self.species.len()
    }

    pub fn num_parameters(&self) -> usize {
        self.parameters.len()
    }

    pub fn num_reactions(&self) -> usize {
        self.reactions.len()
    }

    pub fn compartments(&self) -> &[Compartment] {
        &self.compartments
    }

    pub fn species(&self) -> &[Species] {
        &self.species
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn reactions(&self) -> &[Reaction] {
        &self.reactions
    }

    pub fn species_at(&self, i: usize) -> &Species {
        &self.species[i]
    }

    pub fn reaction_at(&self, i: usize) -> &Reaction {
        &self.reactions[i]
    }

    /// Index of a species symbol in model order.
    pub fn species_index(&self, symbol: Symbol) -> Option<usize> {
        match self.index.get(&symbol) {
            Some(Slot::Species(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn compartment_of(&self, species: &Species) -> &Compartment {
        match self.index.get(&species.compartment) {
            Some(Slot::Compartment(i)) => &self.compartments[*i],
            _ => unreachable!("species compartment is validated on insertion"),
        }
    }

    pub fn species_mut(&mut self, symbol: Symbol) -> Option<&mut Species> {
        match self.index.get(&symbol) {
            Some(Slot::Species(i)) => Some(&mut self.species[*i]),
            _ => None,
        }
    }

    pub fn parameter_mut(&mut self, symbol: Symbol) -> Option<&mut Parameter> {
        match self.index.get(&symbol) {
            Some(Slot::Parameter(i)) => Some(&mut self.parameters[*i]),
            _ => None,
        }
    }

    pub fn compartment_mut(&mut self, symbol: Symbol) -> Option<&mut Compartment> {
        match self.index.get(&symbol) {
            Some(Slot::Compartment(i)) => Some(&mut self.compartments[*i]),
            _ => None,
        }
    }

    pub fn reaction_at_mut(&mut self, i: usize) -> &mut Reaction {
        &mut self.reactions[i]
    }

    pub fn reactions_mut(&mut self) -> &mut [Reaction] {
        &mut self.reactions
    }

    // -------------------------------------------------------------------------
    // Units
    // -------------------------------------------------------------------------

    pub fn substance_unit(&self) -> &ScaledBaseUnit {
        &self.substance_unit
    }

    pub fn set_substance_unit(&mut self, unit: ScaledBaseUnit) {
        self.substance_unit = unit;
    }

    pub fn volume_unit(&self) -> &ScaledBaseUnit {
        &self.volume_unit
    }

    pub fn time_unit(&self) -> &ScaledBaseUnit {
        &self.time_unit
    }

    pub fn species_unit(&self) -> Unit {
        if self.species_have_substance_units {
            Unit::new(vec![self.substance_unit])
        } else {
            Unit::new(vec![
                self.substance_unit,
                ScaledBaseUnit {
                    exponent: -self.volume_unit.exponent,
                    ..self.volume_unit
                },
            ])
        }
    }

    pub fn unit_definitions(&self) -> &[UnitDefinition] {
        &self.unit_definitions
    }

    // -------------------------------------------------------------------------
    // Initial values
    // -------------------------------------------------------------------------

    /// Substitution table mapping every variable to the expression that
    /// defines its value at `t = 0`: an assignment rule if present,
    /// otherwise the initial-value expression.
    pub fn initial_value_substitution(&self) -> Substitution {
        let mut map = Substitution::new();
        for c in &self.compartments {
            if let Some(e) = definition_value(&c.rule, &c.initial) {
                map.insert(c.symbol, e);
            }
        }
        for s in &self.species {
            if let Some(e) = definition_value(&s.rule, &s.initial) {
                map.insert(s.symbol, e);
            }
        }
        for p in &self.parameters {
            if let Some(e) = definition_value(&p.rule, &p.value) {
                map.insert(p.symbol, e);
            }
        }
        for r in &self.reactions {
            for p in &r.kinetic_law.local_parameters {
                if let Some(e) = definition_value(&p.rule, &p.value) {
                    map.insert(p.symbol, e);
                }
            }
        }
        map
    }

    /// Substitute every variable by its initial-value expression
    /// transitively, then reduce to a number.
    pub fn evaluate_initial_value(&self, expr: &Expr) -> Result<f64> {
        let map = self.initial_value_substitution();
        let mut current = expr.clone();
        // transitive closure, bounded by the number of definitions
        for _ in 0..=map.len() {
            if !current.symbols().iter().any(|s| map.contains_key(s)) {
                break;
            }
            current = current.substitute(&map);
        }
        if current.symbols().iter().any(|s| map.contains_key(s)) {
            return Err(MesokinError::SemanticError(format!(
                "cyclic initial-value definition while evaluating in model `{}`",
                self.id
            )));
        }
        match current.eval(&ValueMap::new()) {
            Ok(v) => Ok(v),
            Err(_) => {
                let free = current
                    .symbols()
                    .iter()
                    .map(|s| self.symbols.name(*s).to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                Err(MesokinError::SemanticError(format!(
                    "initial value does not reduce to a number; unresolved: {}",
                    free
                )))
            }
        }
    }

    /// Initial amounts of all species in model order.
    pub fn initial_species_values(&self) -> Result<Vec<f64>> {
        self.species
            .iter()
            .map(|s| {
                let init = s.initial.clone().ok_or_else(|| {
                    MesokinError::SemanticError(format!(
                        "species `{}` has no initial value",
                        s.id
                    ))
                })?;
                self.evaluate_initial_value(&init)
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // Stoichiometry and propensities
    // -------------------------------------------------------------------------

    fn stoich_value(&self, reaction: &Reaction, expr: &Expr) -> Result<f64> {
        match expr.as_number() {
            Some(v) if v.is_finite() => Ok(v),
            _ => Err(MesokinError::SemanticError(format!(
                "non-constant stoichiometry in reaction `{}`",
                reaction.id
            ))),
        }
    }

    /// Net stoichiometry matrix (species x reactions).
    pub fn stoichiometry_matrix(&self) -> Result<Array2<f64>> {
        let mut matrix = Array2::zeros((self.species.len(), self.reactions.len()));
        for (j, reaction) in self.reactions.iter().enumerate() {
            for (species, stoich) in &reaction.reactants {
                let i = self.species_index(*species).unwrap();
                matrix[[i, j]] -= self.stoich_value(reaction, stoich)?;
            }
            for (species, stoich) in &reaction.products {
                let i = self.species_index(*species).unwrap();
                matrix[[i, j]] += self.stoich_value(reaction, stoich)?;
            }
        }
        Ok(matrix)
    }

    /// Reactant-side stoichiometry matrix (species x reactions).
    pub fn reactant_stoichiometry_matrix(&self) -> Result<Array2<f64>> {
        let mut matrix = Array2::zeros((self.species.len(), self.reactions.len()));
        for (j, reaction) in self.reactions.iter().enumerate() {
            for (species, stoich) in &reaction.reactants {
                let i = self.species_index(*species).unwrap();
                matrix[[i, j]] += self.stoich_value(reaction, stoich)?;
            }
        }
        Ok(matrix)
    }

    /// Propensity of each reaction: the rate law with reaction-local
    /// parameters folded in.
    pub fn propensities(&self) -> Result<Vec<Expr>> {
        self.reactions
            .iter()
            .map(|r| {
                let mut map = Substitution::new();
                for p in &r.kinetic_law.local_parameters {
                    let value = p.value.clone().ok_or_else(|| {
                        MesokinError::UnsupportedFeature(format!(
                            "local parameter `{}` of reaction `{}` has no value",
                            p.id, r.id
                        ))
                    })?;
                    map.insert(p.symbol, value);
                }
                Ok(r.kinetic_law.rate_law.substitute(&map))
            })
            .collect()
    }
}

fn definition_value(rule: &Option<Rule>, initial: &Option<Expr>) -> Option<Expr> {
    match rule {
        Some(Rule::Assignment(e)) => Some(e.clone()),
        _ => initial.clone(),
    }
}

/// Construction-time reaction data, validated by [`Model::add_reaction`].
#[derive(Debug, Clone)]
pub struct ReactionBuilder {
    pub id: String,
    pub name: Option<String>,
    pub reversible: bool,
    pub reactants: Vec<(Symbol, Expr)>,
    pub products: Vec<(Symbol, Expr)>,
    pub modifiers: Vec<Symbol>,
    pub kinetic_law: KineticLaw,
}

impl ReactionBuilder {
    pub fn new(id: &str, kinetic_law: KineticLaw) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            reversible: false,
            reactants: Vec::new(),
            products: Vec::new(),
            modifiers: Vec::new(),
            kinetic_law,
        }
    }

    pub fn reversible(mut self, yes: bool) -> Self {
        self.reversible = yes;
        self
    }

    pub fn reactant(mut self, species: Symbol, stoichiometry: i64) -> Self {
        self.reactants.push((species, Expr::int(stoichiometry)));
        self
    }

    pub fn product(mut self, species: Symbol, stoichiometry: i64) -> Self {
        self.products.push((species, Expr::int(stoichiometry)));
        self
    }

    pub fn modifier(mut self, species: Symbol) -> Self {
        self.modifiers.push(species);
        self
    }
}

// =============================================================================
// SCOPED RESOLUTION
// =============================================================================

/// Parse context resolving identifiers through the scope chain of a
/// kinetic law: local parameters first, then model-scope definitions and
/// the time symbol. Unknown identifiers are an error, never interned.
pub struct LawScope<'a> {
    model: &'a Model,
    locals: &'a [Parameter],
    context: String,
}

impl<'a> LawScope<'a> {
    pub fn new(model: &'a Model, locals: &'a [Parameter], context: &str) -> Self {
        Self {
            model,
            locals,
            context: context.to_string(),
        }
    }
}

impl ParseCtx for LawScope<'_> {
    fn resolve(&mut self, name: &str) -> Result<Symbol> {
        if let Some(p) = self.locals.iter().find(|p| p.id == name) {
            return Ok(p.symbol);
        }
        if name == "time" {
            return Ok(self.model.time_symbol());
        }
        if let Some(sym) = self.model.symbols().lookup(name) {
            if self.model.lookup_symbol(sym).is_some() {
                return Ok(sym);
            }
        }
        Err(MesokinError::SemanticError(format!(
            "unresolved symbol `{}` in {}",
            name, self.context
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::michaelis_menten;
    use approx::assert_relative_eq;
    use mesokin_expr::parse_expression;

    #[test]
    fn test_unique_identifiers() {
        let mut model = Model::new("test");
        model
            .add_compartment("c", 3, true, Some(Expr::num(1.0)))
            .unwrap();
        assert!(model.add_parameter("c", true, None).is_err());
    }

    #[test]
    fn test_lookup_and_remove() {
        let mut model = michaelis_menten();
        assert!(matches!(model.lookup("ES"), Some(Definition::Species(_))));
        assert!(matches!(
            model.lookup("binding"),
            Some(Definition::Reaction(_))
        ));
        let es = model.symbols().lookup("ES").unwrap();
        model.remove(es).unwrap();
        assert!(!model.has("ES"));
        // indices of the remaining species stay consistent
        let p = model.symbols().lookup("P").unwrap();
        assert_eq!(model.species_index(p), Some(2));
    }

    #[test]
    fn test_stoichiometry_matrix() {
        let model = michaelis_menten();
        let s = model.stoichiometry_matrix().unwrap();
        assert_eq!(s.shape(), &[4, 3]);
        // E: -1 +1 +1 ; S: -1 +1 0 ; ES: +1 -1 -1 ; P: 0 0 +1
        assert_eq!(s[[0, 0]], -1.0);
        assert_eq!(s[[0, 1]], 1.0);
        assert_eq!(s[[0, 2]], 1.0);
        assert_eq!(s[[2, 2]], -1.0);
        assert_eq!(s[[3, 2]], 1.0);
    }

    #[test]
    fn test_non_constant_stoichiometry_rejected() {
        let mut model = Model::new("bad");
        let c = model
            .add_compartment("c", 3, true, Some(Expr::num(1.0)))
            .unwrap();
        let a = model.add_species("A", c, false, Some(Expr::num(1.0))).unwrap();
        let k = model.add_parameter("k", true, Some(Expr::num(1.0))).unwrap();
        let mut builder = ReactionBuilder::new(
            "r",
            KineticLaw::new(Expr::mul(vec![Expr::var(k), Expr::var(a)])),
        );
        builder.reactants.push((a, Expr::var(k)));
        model.add_reaction(builder).unwrap();
        assert!(model.stoichiometry_matrix().is_err());
    }

    #[test]
    fn test_evaluate_initial_value_transitive() {
        let mut model = Model::new("t");
        model
            .add_parameter("a", true, Some(Expr::num(2.0)))
            .unwrap();
        let a = model.symbols().lookup("a").unwrap();
        model
            .add_parameter("b", true, Some(Expr::mul(vec![Expr::int(3), Expr::var(a)])))
            .unwrap();
        let b = model.symbols().lookup("b").unwrap();
        let v = model
            .evaluate_initial_value(&Expr::add(vec![Expr::var(b), Expr::one()]))
            .unwrap();
        assert_relative_eq!(v, 7.0);
    }

    #[test]
    fn test_evaluate_initial_value_unresolved() {
        let mut model = Model::new("t");
        model.add_parameter("a", true, None).unwrap();
        let a = model.symbols().lookup("a").unwrap();
        assert!(model.evaluate_initial_value(&Expr::var(a)).is_err());
    }

    #[test]
    fn test_law_scope_resolution() {
        let mut model = michaelis_menten();
        let local = model.make_local_parameter("binding", "kf", Some(Expr::num(1.0)));
        let locals = vec![local];
        let mut scope = LawScope::new(&model, &locals, "kinetic law of `binding`");
        let e = parse_expression("kf * E * S", &mut scope).unwrap();
        assert_eq!(e.symbols().len(), 3);
        assert!(parse_expression("unknown * E", &mut scope).is_err());
    }

    #[test]
    fn test_propensities_fold_locals() {
        let mut model = Model::new("t");
        let c = model
            .add_compartment("c", 3, true, Some(Expr::num(1.0)))
            .unwrap();
        let a = model.add_species("A", c, false, Some(Expr::num(5.0))).unwrap();
        let local = model.make_local_parameter("r", "k", Some(Expr::num(2.0)));
        let mut law = KineticLaw::new(Expr::mul(vec![Expr::var(local.symbol), Expr::var(a)]));
        law.local_parameters.push(local);
        model
            .add_reaction(ReactionBuilder::new("r", law).reactant(a, 1))
            .unwrap();
        let props = model.propensities().unwrap();
        assert_eq!(props[0], Expr::mul(vec![Expr::num(2.0), Expr::var(a)]));
    }
}

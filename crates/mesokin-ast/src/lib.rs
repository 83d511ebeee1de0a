//! # mesokin-ast
//!
//! Typed in-memory representation of a biochemical reaction network:
//! compartments, species, parameters, reactions with kinetic laws, rules
//! and unit definitions.
//!
//! The [`Model`] is the root scope; each reaction's kinetic law opens a
//! nested scope for its local parameters. Definitions are held in arenas
//! owned by the model and referenced from expressions by [`Symbol`]
//! identity, so expressions never dangle and traversals are plain
//! `match`es over the definition variants.

pub mod fixtures;
pub mod model;
pub mod units;

pub use model::{
    Compartment, Definition, KineticLaw, LawScope, Model, Parameter, Reaction,
    ReactionBuilder, Rule, Species,
};
pub use units::{BaseUnit, ScaledBaseUnit, Unit, UnitDefinition};

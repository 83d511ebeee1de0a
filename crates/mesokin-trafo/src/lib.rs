//! # mesokin-trafo
//!
//! Composable transformation passes over the reaction network model.
//!
//! A pass either *asserts* a property of the model (rejecting networks
//! outside the supported fragment with a typed error naming the offending
//! definition) or *rewrites* the model into a derived form. Every pass is
//! idempotent when its invariant already holds, so pipelines may be
//! re-applied safely.

pub mod assertions;
pub mod folder;
pub mod irreversible;
pub mod units;

pub use assertions::*;
pub use folder::ConstantFolder;
pub use irreversible::convert_to_irreversible;
pub use units::{extensive_species, intensive_species, particle_numbers};

//! # mesokin-ssa
//!
//! Parallel Monte-Carlo simulation of the jump process defined by a
//! reaction network.
//!
//! Three algorithmic variants share one stepper contract ([`Simulator`]):
//!
//! * [`DirectSsa`] — the direct method; every step re-evaluates all
//!   propensities.
//! * [`OptimizedSsa`] — the dependency-graph method; after a firing only
//!   the affected propensities are recomputed.
//! * [`NextReactionSsa`] — the next-reaction method with per-reaction
//!   absolute firing times and dependency-guided redraws.
//!
//! Every variant is generic over the evaluation engine of
//! `mesokin-eval`, so swapping the bytecode interpreter for the direct
//! evaluator is a type-level choice. Propensities are compiled once and
//! shared read-only by the whole ensemble; realizations own their RNG
//! and clock, which makes trajectories reproducible for any thread
//! count.

pub mod methods;
pub mod scan;
pub mod simulator;

pub use methods::{DirectSsa, NextReactionSsa, OptimizedSsa, Simulator};
pub use scan::{ParameterSet, SsaParameterScan};
pub use simulator::SimulatorBase;

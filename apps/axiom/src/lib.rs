//! # Axiom Runner
//!
//! The async shell around `axiom-core`: script loading, the tick scheduler,
//! the journal writer and the command line.

pub mod cli;
pub mod journal;
pub mod runner;
pub mod script;

#![allow(dead_code, non_snake_case, non_upper_case_globals)]

//! Compiler from a description of laser-driven TlF transitions to optical
//! Bloch equations, emitted as a Julia kernel and driven through a solver
//! session.

pub mod error;
pub mod spin;
pub mod hilbert;
pub mod molecule;
pub mod hamiltonian;
pub mod couplings;
pub mod symbolic;
pub mod lindblad;
pub mod parameters;
pub mod codegen;
pub mod config;
pub mod session;
pub mod scan;
pub mod system;

pub use error::{ ObeError, ObeResult };

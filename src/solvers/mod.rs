//! Numerical solvers
//!
//! - `sqp`: equality-constrained sequential quadratic programming

pub mod sqp;

pub use sqp::{minimize, LinearEquality, SmoothObjective, SqpOptions, SqpOutcome};

//! Crystal Module: Periodic Atomic Geometry
//!
//! A crystal is described by a unit cell whose three lattice vectors are the
//! rows of a 3×3 matrix L, and by atoms placed at fractional coordinates f.
//! The cartesian position of an atom is
//!
//!   r = Lᵀ · f = f₀·a + f₁·b + f₂·c
//!
//! and the cell tiles space under periodic boundary conditions (PBC).
//!
//! ## Two Notions of Distance
//!
//! - `Structure::distance`: minimum-image convention, wrapping fractional
//!   differences into [-0.5, 0.5]. Cheap, but only exact when the distance is
//!   below half the shortest in-cell width.
//!
//! - `neighbors::PeriodicNeighborIndex`: exact periodic search over explicit
//!   lattice images. This is the definition used for topological features.

mod source;
mod structure;

pub use source::ParsedStructure;
pub use structure::{Atom, Structure};

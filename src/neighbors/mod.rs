//! Neighbors Module: Exact Periodic Neighbor Search
//!
//! For every atom of a periodic structure, find all atoms (including their
//! lattice images) within a cutoff radius.
//!
//! ## Algorithm
//!
//! 1. Pick a conservative image count k = ⌈r_c / min(|a|, |b|, |c|)⌉ + 1
//! 2. Replicate the cell over (nₐ, n_b, n_c) ∈ [-k, k]³, remembering which
//!    original atom every replica images
//! 3. Build one k-d tree over the replicated cloud
//! 4. Radius-query the tree from every original atom
//! 5. Drop only the zero-displacement self match, keep periodic self-images
//! 6. Stable sort by distance (ties keep image-enumeration order), truncate
//!
//! Unlike the minimum-image convention used by `Structure::distance`, this
//! counts every image of an atom that lies within the cutoff, so it stays
//! correct when the cell is smaller than the cutoff.

mod periodic;

pub use periodic::{ImageCloud, Neighbor, PeriodicNeighborIndex};

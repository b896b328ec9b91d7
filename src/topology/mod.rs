//! Topology Module: Persistent Homology of Local Atomic Environments
//!
//! Implements the mathematical structures for topological data analysis:
//! - Vietoris-Rips filtration
//! - Exact persistent homology via boundary matrix reduction
//! - Betti feature vectors per atom
//!
//! ## Mathematical Background
//!
//! For every atom we take the point cloud X formed by the atom and its
//! periodic neighbors, and build the filtration of simplicial complexes
//! VR_ε(X) indexed by the scale parameter ε ≤ r_cutoff. Persistent homology
//! tracks the birth and death of connected components (H₀), loops (H₁) and
//! voids (H₂) across this filtration.
//!
//! ## Backends
//!
//! Feature extraction only sees the [`PersistenceBackend`] trait.
//! [`RipsPersistence`] is the built-in implementation and can be given its
//! own bounded thread pool.

mod vietoris_rips;
mod persistence;
mod betti;

pub use vietoris_rips::{Simplex, VietorisRips};
pub use persistence::{
    compute_persistence, PersistenceBackend, PersistenceDiagram, PersistencePair,
    PersistenceResult, RipsPersistence,
};
pub use betti::{
    BettiFeatureExtractor, BettiStatistics, Projection, BETTI_FEATURE_DIM, FEATURE_LAYOUT,
    MAX_HOMOLOGY_DIM, STATS_PER_PROJECTION,
};

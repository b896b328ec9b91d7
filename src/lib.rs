//! # Crystal-TDA
//!
//! Periodic Neighbor Search and Persistent-Homology Descriptors
//! for Point Defects in Crystals
//!
//! ## Framework
//!
//! This crate turns a periodic atomic structure (lattice + fractional
//! coordinates) into fixed-size per-atom descriptors for a downstream graph
//! model that predicts defect formation energies.
//!
//! ### Pipeline
//!
//! 1. **Structure**: immutable periodic geometry with minimum-image queries
//!
//! 2. **Periodic neighbor search**: exact radius search over explicit lattice
//!    images with a k-d tree, so small cells and large cutoffs stay correct
//!
//! 3. **Betti features**: for every atom, the persistence diagrams (H₀, H₁, H₂)
//!    of its local Vietoris-Rips complex, condensed to 35 statistics
//!
//! 4. **PCA**: one variance-ranked projection fit over a whole dataset and
//!    persisted in a fixed little-endian layout
//!
//! ```text
//! Structure → PeriodicNeighborIndex → BettiFeatureExtractor → N×35 → PcaReducer
//! ```
//!
//! ## References
//!
//! - Edelsbrunner & Harer, "Computational Topology" (2010)
//! - Bauer, "Ripser: efficient computation of Vietoris-Rips persistence
//!   barcodes", J. Appl. Comput. Topol. 5, 391 (2021)
//! - Xie & Grossman, PRL 120, 145301 (2018) - Crystal graph networks

pub mod config;
pub mod crystal;
pub mod error;
pub mod io;
pub mod neighbors;
pub mod pca;
pub mod pipeline;
pub mod topology;

pub use error::{Error, Result};

// Re-exports from crystal
pub use crystal::{Atom, ParsedStructure, Structure};

// Re-exports from neighbors
pub use neighbors::{ImageCloud, Neighbor, PeriodicNeighborIndex};

// Re-exports from topology
pub use topology::{
    // Features
    BettiFeatureExtractor,
    BettiStatistics,
    Projection,
    BETTI_FEATURE_DIM,
    // Persistence
    PersistenceBackend,
    PersistenceDiagram,
    PersistencePair,
    PersistenceResult,
    RipsPersistence,
    compute_persistence,
    // Complex construction
    VietorisRips,
};

// Re-exports from pca
pub use pca::{PcaModel, PcaReducer};

// Re-exports from io
pub use io::{load_feature_matrix, save_feature_matrix};

// Re-exports from config
pub use config::{FeatureConfig, NeighborConfig, Parallelism, PcaConfig, PipelineConfig};

// Re-exports from pipeline
pub use pipeline::{
    fit_dataset_pca,
    featurize_structures,
    process_dataset,
    stack_feature_matrices,
    DatasetReport,
    StructureId,
};

//! Betti Features: Per-Atom Topological Descriptors
//!
//! For every atom, the neighbors inside a topological cutoff form a local
//! point cloud. Its persistence diagrams in dimensions 0, 1 and 2 are
//! condensed into five statistics per projection:
//!
//! - β₀ (components): death times
//! - β₁ (loops): persistence, birth, death
//! - β₂ (voids): persistence, birth, death
//!
//! 7 projections × 5 statistics = 35 features per atom.

use ndarray::{s, Array1, Array2};
use rayon::prelude::*;

use super::persistence::{PersistenceBackend, PersistenceDiagram, PersistencePair, RipsPersistence};
use crate::config::{FeatureConfig, Parallelism};
use crate::crystal::Structure;
use crate::error::{Error, Result};
use crate::neighbors::PeriodicNeighborIndex;

/// Length of the per-atom feature vector
pub const BETTI_FEATURE_DIM: usize = 35;

/// Highest homology dimension computed
pub const MAX_HOMOLOGY_DIM: usize = 2;

/// Statistics per projection
pub const STATS_PER_PROJECTION: usize = 5;

/// Scalar read off a persistence pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    Birth,
    Death,
    Persistence,
}

impl Projection {
    #[inline]
    pub fn apply(self, pair: &PersistencePair) -> f64 {
        match self {
            Projection::Birth => pair.birth,
            Projection::Death => pair.death,
            Projection::Persistence => pair.persistence(),
        }
    }
}

/// Feature layout: (homology dimension, projection) in output order
pub const FEATURE_LAYOUT: [(usize, Projection); 7] = [
    (0, Projection::Death),
    (1, Projection::Persistence),
    (1, Projection::Birth),
    (1, Projection::Death),
    (2, Projection::Persistence),
    (2, Projection::Birth),
    (2, Projection::Death),
];

/// Summary of one projection of one diagram
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BettiStatistics {
    pub mean: f64,
    /// Population standard deviation
    pub std: f64,
    pub max: f64,
    pub min: f64,
    /// Sum scaled by the caller's weight
    pub weighted_sum: f64,
}

impl BettiStatistics {
    /// Statistics of a set of values; all zero when empty
    pub fn from_values(values: &[f64], weight: f64) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        let n = values.len() as f64;
        let sum: f64 = values.iter().sum();
        let mean = sum / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        Self {
            mean,
            std: variance.sqrt(),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            weighted_sum: sum * weight,
        }
    }

    /// Statistics over the finite pairs of a diagram
    pub fn from_diagram(diagram: &PersistenceDiagram, projection: Projection, weight: f64) -> Self {
        let values: Vec<f64> = diagram.finite().map(|p| projection.apply(p)).collect();
        Self::from_values(&values, weight)
    }

    /// [mean, std, max, min, weighted_sum]
    pub fn as_array(&self) -> [f64; STATS_PER_PROJECTION] {
        [self.mean, self.std, self.max, self.min, self.weighted_sum]
    }
}

/// Per-atom persistent-homology descriptor
#[derive(Debug, Clone)]
pub struct BettiFeatureExtractor<B = RipsPersistence> {
    /// Neighbor radius and filtration threshold (Å)
    r_cutoff: f64,
    /// Spread atoms over the global rayon pool
    parallel_atoms: bool,
    backend: B,
}

impl BettiFeatureExtractor<RipsPersistence> {
    /// Sequential extractor with the built-in persistence backend
    pub fn new(r_cutoff: f64) -> Result<Self> {
        Self::with_backend(r_cutoff, RipsPersistence::new())
    }

    /// Extractor honoring the configured cutoff and parallelism
    pub fn from_config(config: &FeatureConfig) -> Result<Self> {
        config.validate()?;
        match config.parallelism {
            Parallelism::Sequential | Parallelism::Structures => Self::new(config.r_cutoff),
            Parallelism::Atoms => Ok(Self::new(config.r_cutoff)?.with_parallel_atoms(true)),
            Parallelism::Persistence { threads } => {
                Self::with_backend(config.r_cutoff, RipsPersistence::with_threads(threads)?)
            }
        }
    }
}

impl<B: PersistenceBackend> BettiFeatureExtractor<B> {
    pub fn with_backend(r_cutoff: f64, backend: B) -> Result<Self> {
        if !(r_cutoff.is_finite() && r_cutoff > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "topological cutoff must be positive and finite, got {}",
                r_cutoff
            )));
        }
        Ok(Self {
            r_cutoff,
            parallel_atoms: false,
            backend,
        })
    }

    pub fn with_parallel_atoms(mut self, parallel: bool) -> Self {
        self.parallel_atoms = parallel;
        self
    }

    pub fn r_cutoff(&self) -> f64 {
        self.r_cutoff
    }

    pub fn parallel_atoms(&self) -> bool {
        self.parallel_atoms
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Unbounded neighbor lists at the topological cutoff
    pub fn neighbor_index(&self, structure: &Structure) -> Result<PeriodicNeighborIndex> {
        PeriodicNeighborIndex::new(
            structure,
            self.r_cutoff,
            usize::MAX,
            PeriodicNeighborIndex::DEFAULT_EPSILON,
        )
    }

    /// Atom position followed by every neighbor image, [1 + k, 3]
    pub fn local_point_cloud(
        &self,
        structure: &Structure,
        index: &PeriodicNeighborIndex,
        atom_idx: usize,
    ) -> Result<Array2<f64>> {
        let center = structure.atom(atom_idx)?.position;
        let neighbors = index.neighbors(atom_idx)?;

        let mut cloud = Array2::<f64>::zeros((neighbors.len() + 1, 3));
        for d in 0..3 {
            cloud[[0, d]] = center[d];
        }
        for (row, neighbor) in neighbors.iter().enumerate() {
            let p = center + neighbor.displacement;
            for d in 0..3 {
                cloud[[row + 1, d]] = p[d];
            }
        }

        Ok(cloud)
    }

    /// 35 features of one atom, building a neighbor index on the way
    pub fn atom_features(&self, structure: &Structure, atom_idx: usize) -> Result<Array1<f64>> {
        let index = self.neighbor_index(structure)?;
        self.atom_features_with_index(structure, &index, atom_idx)
    }

    /// 35 features of one atom from an index made by [`Self::neighbor_index`]
    pub fn atom_features_with_index(
        &self,
        structure: &Structure,
        index: &PeriodicNeighborIndex,
        atom_idx: usize,
    ) -> Result<Array1<f64>> {
        check_index(structure, index, self.r_cutoff)?;

        let element = structure.atom(atom_idx)?.element;
        let weight = 1.0 / structure.count(element)? as f64;

        let cloud = self.local_point_cloud(structure, index, atom_idx)?;
        let diagrams = self
            .backend
            .from_points(&cloud, self.r_cutoff, MAX_HOMOLOGY_DIM)?;

        let mut features = Array1::<f64>::zeros(BETTI_FEATURE_DIM);
        for (slot, &(dim, projection)) in FEATURE_LAYOUT.iter().enumerate() {
            let stats = BettiStatistics::from_diagram(diagrams.dim(dim), projection, weight);
            let offset = slot * STATS_PER_PROJECTION;
            for (k, value) in stats.as_array().into_iter().enumerate() {
                features[offset + k] = value;
            }
        }

        Ok(features)
    }

    /// [N, 35] matrix, one row per atom, with a single neighbor index
    pub fn structure_features(&self, structure: &Structure) -> Result<Array2<f64>> {
        let index = self.neighbor_index(structure)?;
        self.structure_features_with_index(structure, &index)
    }

    pub fn structure_features_with_index(
        &self,
        structure: &Structure,
        index: &PeriodicNeighborIndex,
    ) -> Result<Array2<f64>> {
        check_index(structure, index, self.r_cutoff)?;
        let n = structure.num_atoms();

        let rows: Vec<Array1<f64>> = if self.parallel_atoms {
            (0..n)
                .into_par_iter()
                .map(|i| self.atom_features_with_index(structure, index, i))
                .collect::<Result<_>>()?
        } else {
            (0..n)
                .map(|i| self.atom_features_with_index(structure, index, i))
                .collect::<Result<_>>()?
        };

        let mut features = Array2::<f64>::zeros((n, BETTI_FEATURE_DIM));
        for (i, row) in rows.iter().enumerate() {
            features.slice_mut(s![i, ..]).assign(row);
        }

        log::debug!(
            "betti features: {} atoms, r_cutoff = {:.3}, parallel atoms = {}",
            n,
            self.r_cutoff,
            self.parallel_atoms
        );

        Ok(features)
    }
}

/// The index must cover the structure, searched at the topological cutoff
/// with unbounded neighbor lists
fn check_index(structure: &Structure, index: &PeriodicNeighborIndex, r_cutoff: f64) -> Result<()> {
    if index.num_atoms() != structure.num_atoms() {
        return Err(Error::ShapeMismatch(format!(
            "neighbor index covers {} atoms but structure has {}",
            index.num_atoms(),
            structure.num_atoms()
        )));
    }
    if index.r_cutoff() != r_cutoff || index.max_neighbors() != usize::MAX {
        return Err(Error::InvalidParameter(format!(
            "neighbor index (r_cutoff = {}, max_neighbors = {}) was not built by \
             neighbor_index() for r_cutoff = {}",
            index.r_cutoff(),
            index.max_neighbors(),
            r_cutoff
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::{Matrix3, Vector3};

    fn simple_cubic(a: f64) -> Structure {
        Structure::new(Matrix3::from_diagonal_element(a), &[Vector3::zeros()], &[0]).unwrap()
    }

    fn rocksalt() -> Structure {
        Structure::new(
            Matrix3::from_diagonal_element(5.64),
            &[
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(0.5, 0.5, 0.0),
                Vector3::new(0.5, 0.0, 0.5),
                Vector3::new(0.0, 0.5, 0.5),
                Vector3::new(0.5, 0.0, 0.0),
                Vector3::new(0.0, 0.5, 0.0),
                Vector3::new(0.0, 0.0, 0.5),
                Vector3::new(0.5, 0.5, 0.5),
            ],
            &[0, 0, 0, 0, 1, 1, 1, 1],
        )
        .unwrap()
    }

    #[test]
    fn test_statistics_empty() {
        let empty = PersistenceDiagram::new();
        let stats = BettiStatistics::from_diagram(&empty, Projection::Death, 1.0);
        assert_eq!(stats, BettiStatistics::default());

        let only_essential = PersistenceDiagram::from(vec![
            PersistencePair::new(0.0, f64::INFINITY),
            PersistencePair::new(1.0, f64::INFINITY),
        ]);
        let stats = BettiStatistics::from_diagram(&only_essential, Projection::Persistence, 0.5);
        assert_eq!(stats.as_array(), [0.0; 5]);
    }

    #[test]
    fn test_statistics_single_pair() {
        let diagram = PersistenceDiagram::from(vec![PersistencePair::new(1.5, 2.5)]);

        for (projection, expected) in [
            (Projection::Birth, 1.5),
            (Projection::Death, 2.5),
            (Projection::Persistence, 1.0),
        ] {
            let stats = BettiStatistics::from_diagram(&diagram, projection, 0.25);
            assert_eq!(stats.mean, expected);
            assert_eq!(stats.max, expected);
            assert_eq!(stats.min, expected);
            assert_eq!(stats.std, 0.0);
            assert_abs_diff_eq!(stats.weighted_sum, expected * 0.25, epsilon = 1e-15);
        }
    }

    #[test]
    fn test_statistics_population_std() {
        let stats = BettiStatistics::from_values(&[1.0, 2.0, 3.0, 4.0], 0.5);
        assert_abs_diff_eq!(stats.mean, 2.5, epsilon = 1e-12);
        // Population variance = 1.25
        assert_abs_diff_eq!(stats.std, 1.25f64.sqrt(), epsilon = 1e-12);
        assert_eq!(stats.max, 4.0);
        assert_eq!(stats.min, 1.0);
        assert_abs_diff_eq!(stats.weighted_sum, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_feature_layout_covers_35() {
        assert_eq!(FEATURE_LAYOUT.len() * STATS_PER_PROJECTION, BETTI_FEATURE_DIM);
        assert_eq!(FEATURE_LAYOUT[0], (0, Projection::Death));
    }

    #[test]
    fn test_local_point_cloud() {
        let s = simple_cubic(1.0);
        let extractor = BettiFeatureExtractor::new(1.2).unwrap();
        let index = extractor.neighbor_index(&s).unwrap();
        let cloud = extractor.local_point_cloud(&s, &index, 0).unwrap();

        // Center plus six face images
        assert_eq!(cloud.dim(), (7, 3));
        assert_eq!(cloud.row(0).to_vec(), vec![0.0, 0.0, 0.0]);
        for row in 1..7 {
            let r = cloud.row(row);
            let norm = (r[0] * r[0] + r[1] * r[1] + r[2] * r[2]).sqrt();
            assert_abs_diff_eq!(norm, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_simple_cubic_star() {
        // Seven points, six spokes of length 1; spoke tips are √2 apart (> 1.2)
        let s = simple_cubic(1.0);
        let extractor = BettiFeatureExtractor::new(1.2).unwrap();
        let f = extractor.atom_features(&s, 0).unwrap();

        assert_eq!(f.len(), BETTI_FEATURE_DIM);
        // dim 0 deaths: six merges at 1.0
        assert_abs_diff_eq!(f[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(f[1], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(f[2], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(f[3], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(f[4], 6.0, epsilon = 1e-12);
        // No loops or voids form below √2
        for k in 5..BETTI_FEATURE_DIM {
            assert_eq!(f[k], 0.0, "feature {}", k);
        }
    }

    #[test]
    fn test_weight_uses_element_population() {
        let s = rocksalt();
        let extractor = BettiFeatureExtractor::new(3.0).unwrap();
        let f = extractor.atom_features(&s, 0).unwrap();

        // Six nearest neighbors at a/2 = 2.82; dim-0 sum = 6 × 2.82, weight 1/4
        assert_abs_diff_eq!(f[0], 2.82, epsilon = 1e-12);
        assert_abs_diff_eq!(f[4], 6.0 * 2.82 / 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_structure_features_shape_and_symmetry() {
        let s = rocksalt();
        let extractor = BettiFeatureExtractor::new(4.2).unwrap();
        let features = extractor.structure_features(&s).unwrap();

        assert_eq!(features.dim(), (8, BETTI_FEATURE_DIM));
        // Every site of ideal rock salt sees the same environment
        for i in 1..8 {
            for k in 0..BETTI_FEATURE_DIM {
                assert_abs_diff_eq!(features[[i, k]], features[[0, k]], epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_parallel_modes_agree() {
        let s = rocksalt().without_atom(3).unwrap();
        let sequential = BettiFeatureExtractor::new(4.2).unwrap();
        let atoms = BettiFeatureExtractor::new(4.2).unwrap().with_parallel_atoms(true);
        let persistence =
            BettiFeatureExtractor::with_backend(4.2, RipsPersistence::with_threads(2).unwrap())
                .unwrap();

        let expected = sequential.structure_features(&s).unwrap();
        assert_eq!(atoms.structure_features(&s).unwrap(), expected);
        assert_eq!(persistence.structure_features(&s).unwrap(), expected);
    }

    #[test]
    fn test_from_config() {
        let config = FeatureConfig {
            r_cutoff: 3.0,
            parallelism: Parallelism::Persistence { threads: 3 },
        };
        let extractor = BettiFeatureExtractor::from_config(&config).unwrap();
        assert_eq!(extractor.backend().num_threads(), 3);
        assert_eq!(extractor.r_cutoff(), 3.0);

        let bad = FeatureConfig {
            r_cutoff: 0.0,
            parallelism: Parallelism::Sequential,
        };
        assert!(BettiFeatureExtractor::from_config(&bad).is_err());
    }

    #[test]
    fn test_mismatched_index_rejected() {
        let extractor = BettiFeatureExtractor::new(2.0).unwrap();
        let small = simple_cubic(1.0);
        let index = extractor.neighbor_index(&small).unwrap();

        let result = extractor.structure_features_with_index(&rocksalt(), &index);
        assert!(matches!(result, Err(Error::ShapeMismatch(_))));

        let result = extractor.atom_features(&small, 5);
        assert!(matches!(result, Err(Error::AtomIndexOutOfRange { .. })));
    }

    #[test]
    fn test_foreign_index_rejected() {
        let s = rocksalt();
        let extractor = BettiFeatureExtractor::new(4.2).unwrap();

        // Graph neighbor lists: default cutoff and cap
        let graph = PeriodicNeighborIndex::with_defaults(&s).unwrap();
        let result = extractor.structure_features_with_index(&s, &graph);
        assert!(matches!(result, Err(Error::InvalidParameter(_))));

        // Right radius but truncated to the first shell
        let capped =
            PeriodicNeighborIndex::new(&s, 4.2, 6, PeriodicNeighborIndex::DEFAULT_EPSILON).unwrap();
        let result = extractor.atom_features_with_index(&s, &capped, 0);
        assert!(matches!(result, Err(Error::InvalidParameter(_))));

        // Right cap but another radius
        let wider = PeriodicNeighborIndex::new(&s, 5.0, usize::MAX, 1e-10).unwrap();
        assert!(extractor.structure_features_with_index(&s, &wider).is_err());

        let own = extractor.neighbor_index(&s).unwrap();
        assert_eq!(
            extractor.structure_features_with_index(&s, &own).unwrap(),
            extractor.structure_features(&s).unwrap()
        );
    }
}

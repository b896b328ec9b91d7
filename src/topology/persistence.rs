//! Persistent Homology of Vietoris-Rips Filtrations
//!
//! Birth/death pairs are computed with the standard algorithm: build the
//! filtered complex, reduce the boundary matrix over Z/2 by column
//! additions, then read pairs off the pivots.
//!
//! ## Algorithm Overview
//!
//! 1. Enumerate all simplices up to dimension `max_dim + 1` whose edges are
//!    no longer than the threshold
//! 2. Sort by (diameter, dimension, vertices)
//! 3. Reduce each boundary column against earlier pivots, dimension by
//!    dimension from the top; a simplex already used as a pivot is positive
//!    and its column is cleared instead of reduced
//! 4. A nonzero column j with lowest row i gives the pair (diam(i), diam(j))
//!    in dimension dim(i); zero columns that are never a pivot are essential
//!
//! Pairs with death == birth carry no information and are dropped.
//!
//! ## Reference
//!
//! Edelsbrunner, Letscher, Zomorodian (2002). "Topological Persistence
//! and Simplification". Discrete & Computational Geometry.
//!
//! Chen, Kerber (2011). "Persistent Homology Computation with a Twist".
//! EuroCG.

use ndarray::Array2;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::HashMap;
use std::sync::Arc;

use super::vietoris_rips::{Simplex, VietorisRips};
use crate::error::{Error, Result};

/// One (birth, death) interval; death is +∞ for features alive at the threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PersistencePair {
    pub birth: f64,
    pub death: f64,
}

impl PersistencePair {
    pub fn new(birth: f64, death: f64) -> Self {
        Self { birth, death }
    }

    pub fn persistence(&self) -> f64 {
        if self.death.is_infinite() {
            f64::INFINITY
        } else {
            self.death - self.birth
        }
    }

    pub fn is_essential(&self) -> bool {
        self.death.is_infinite()
    }
}

/// Unordered intervals of a single homology dimension
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistenceDiagram {
    pub pairs: Vec<PersistencePair>,
}

impl PersistenceDiagram {
    pub fn new() -> Self {
        Self { pairs: Vec::new() }
    }

    pub fn push(&mut self, pair: PersistencePair) {
        self.pairs.push(pair);
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Intervals that die within the threshold
    pub fn finite(&self) -> impl Iterator<Item = &PersistencePair> + '_ {
        self.pairs.iter().filter(|p| !p.is_essential())
    }

    /// Number of essential (infinite) intervals
    pub fn betti(&self) -> usize {
        self.pairs.iter().filter(|p| p.is_essential()).count()
    }
}

impl From<Vec<PersistencePair>> for PersistenceDiagram {
    fn from(pairs: Vec<PersistencePair>) -> Self {
        Self { pairs }
    }
}

static EMPTY_DIAGRAM: PersistenceDiagram = PersistenceDiagram { pairs: Vec::new() };

/// Diagrams for dimensions 0..=max_dim
#[derive(Debug, Clone, PartialEq)]
pub struct PersistenceResult {
    diagrams: Vec<PersistenceDiagram>,
}

impl PersistenceResult {
    pub fn new(diagrams: Vec<PersistenceDiagram>) -> Self {
        Self { diagrams }
    }

    /// Diagram for dimension d; empty if d was not computed
    pub fn dim(&self, d: usize) -> &PersistenceDiagram {
        self.diagrams.get(d).unwrap_or(&EMPTY_DIAGRAM)
    }

    pub fn num_dimensions(&self) -> usize {
        self.diagrams.len()
    }

    pub fn diagrams(&self) -> &[PersistenceDiagram] {
        &self.diagrams
    }
}

/// Anything that turns a distance matrix into Vietoris-Rips persistence diagrams
///
/// Implementations must use the `distance <= threshold` edge convention and
/// report every dimension-0 bar as born at 0.
pub trait PersistenceBackend: Send + Sync {
    /// Diagrams for dimensions 0..=max_dim from a symmetric distance matrix
    fn from_distances(
        &self,
        distances: &Array2<f64>,
        threshold: f64,
        max_dim: usize,
    ) -> Result<PersistenceResult>;

    /// Diagrams from an [N, D] point cloud under the Euclidean metric
    fn from_points(
        &self,
        points: &Array2<f64>,
        threshold: f64,
        max_dim: usize,
    ) -> Result<PersistenceResult> {
        let distances = VietorisRips::compute_distance_matrix(points);
        self.from_distances(&distances, threshold, max_dim)
    }
}

/// Sparse Z/2 column, rows kept sorted ascending
#[derive(Debug, Clone, Default)]
struct SparseColumn {
    rows: Vec<usize>,
}

impl SparseColumn {
    fn from_unsorted(mut rows: Vec<usize>) -> Self {
        rows.sort_unstable();
        Self { rows }
    }

    fn is_zero(&self) -> bool {
        self.rows.is_empty()
    }

    /// Lowest (maximum) nonzero row
    fn low(&self) -> Option<usize> {
        self.rows.last().copied()
    }

    /// Symmetric difference, i.e. addition over Z/2
    fn add_assign(&mut self, other: &SparseColumn) {
        let mut merged = Vec::with_capacity(self.rows.len() + other.rows.len());
        let (mut i, mut j) = (0, 0);
        while i < self.rows.len() && j < other.rows.len() {
            let (a, b) = (self.rows[i], other.rows[j]);
            if a < b {
                merged.push(a);
                i += 1;
            } else if b < a {
                merged.push(b);
                j += 1;
            } else {
                i += 1;
                j += 1;
            }
        }
        merged.extend_from_slice(&self.rows[i..]);
        merged.extend_from_slice(&other.rows[j..]);
        self.rows = merged;
    }
}

/// Standard-algorithm persistence with optional threaded simplex enumeration
#[derive(Debug, Clone)]
pub struct RipsPersistence {
    num_threads: usize,
    pool: Option<Arc<ThreadPool>>,
}

impl RipsPersistence {
    /// Single-threaded backend
    pub fn new() -> Self {
        Self {
            num_threads: 1,
            pool: None,
        }
    }

    /// Backend with a private pool of `num_threads` workers
    ///
    /// The pool is owned by this backend, so it never competes with a global
    /// pool used to parallelize over atoms or structures.
    pub fn with_threads(num_threads: usize) -> Result<Self> {
        if num_threads == 0 {
            return Err(Error::InvalidParameter(
                "persistence thread count must be at least 1".into(),
            ));
        }
        if num_threads == 1 {
            return Ok(Self::new());
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("rips-persistence-{}", i))
            .build()
            .map_err(|e| Error::InvalidParameter(format!("cannot build thread pool: {}", e)))?;

        Ok(Self {
            num_threads,
            pool: Some(Arc::new(pool)),
        })
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }
}

impl Default for RipsPersistence {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistenceBackend for RipsPersistence {
    fn from_distances(
        &self,
        distances: &Array2<f64>,
        threshold: f64,
        max_dim: usize,
    ) -> Result<PersistenceResult> {
        let vr = VietorisRips::from_distance_matrix(distances, threshold)?;

        // Step 1-2: filtered complex, one dimension above the highest homology asked for
        let simplices = vr.simplices(max_dim + 1, self.pool.as_deref());

        let index: HashMap<&[usize], usize> = simplices
            .iter()
            .enumerate()
            .map(|(i, s)| (s.vertices.as_slice(), i))
            .collect();

        // Step 3: reduce boundary matrix one dimension at a time, highest first.
        // A simplex that is already the pivot of a higher column reduces to
        // zero, so its column is cleared without being built.
        let mut columns = vec![SparseColumn::default(); simplices.len()];
        let mut low_to_col: HashMap<usize, usize> = HashMap::new();
        let mut cleared = 0usize;

        for dim in (1..=max_dim + 1).rev() {
            for (col_idx, simplex) in simplices.iter().enumerate() {
                if simplex.dimension() != dim {
                    continue;
                }
                if low_to_col.contains_key(&col_idx) {
                    cleared += 1;
                    continue;
                }

                let mut column = boundary(simplex, &index);
                while let Some(low_idx) = column.low() {
                    match low_to_col.get(&low_idx) {
                        Some(&pivot_col) => column.add_assign(&columns[pivot_col]),
                        None => break,
                    }
                }

                if let Some(low_idx) = column.low() {
                    low_to_col.insert(low_idx, col_idx);
                }
                columns[col_idx] = column;
            }
        }

        log::trace!(
            "reduced {} simplices up to dimension {}, {} columns cleared",
            simplices.len(),
            max_dim + 1,
            cleared
        );

        // Step 4: extract pairs
        let mut diagrams = vec![PersistenceDiagram::new(); max_dim + 1];

        for (col_idx, column) in columns.iter().enumerate() {
            let Some(low_idx) = column.low() else {
                continue;
            };
            let birth = &simplices[low_idx];
            let death = &simplices[col_idx];
            let dim = birth.dimension();

            if dim <= max_dim && death.diameter > birth.diameter {
                diagrams[dim].push(PersistencePair::new(birth.diameter, death.diameter));
            }
        }

        for (idx, simplex) in simplices.iter().enumerate() {
            let dim = simplex.dimension();
            if dim <= max_dim && columns[idx].is_zero() && !low_to_col.contains_key(&idx) {
                diagrams[dim].push(PersistencePair::new(simplex.diameter, f64::INFINITY));
            }
        }

        Ok(PersistenceResult::new(diagrams))
    }
}

/// Boundary column of a simplex in terms of filtration indices
fn boundary(simplex: &Simplex, index: &HashMap<&[usize], usize>) -> SparseColumn {
    if simplex.dimension() == 0 {
        return SparseColumn::default();
    }

    let mut face = Vec::with_capacity(simplex.vertices.len() - 1);
    let rows = (0..simplex.vertices.len())
        .filter_map(|skip| {
            face.clear();
            face.extend(
                simplex
                    .vertices
                    .iter()
                    .enumerate()
                    .filter(|&(k, _)| k != skip)
                    .map(|(_, &v)| v),
            );
            index.get(face.as_slice()).copied()
        })
        .collect();

    SparseColumn::from_unsorted(rows)
}

/// Persistence of a point cloud with the default single-threaded backend
pub fn compute_persistence(
    points: &Array2<f64>,
    threshold: f64,
    max_dim: usize,
) -> Result<PersistenceResult> {
    RipsPersistence::new().from_points(points, threshold, max_dim)
}

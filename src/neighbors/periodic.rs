//! Periodic image cloud and k-d tree backed neighbor lists.

use kdtree::distance::squared_euclidean;
use kdtree::KdTree;
use nalgebra::{Matrix3, Vector3};
use rayon::prelude::*;

use crate::config::NeighborConfig;
use crate::crystal::Structure;
use crate::error::{Error, Result};

/// Largest replicated cloud a single index will materialize
pub const MAX_IMAGE_POINTS: usize = 20_000_000;

/// A neighbor of some source atom
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    /// Index of the original (in-cell) atom this neighbor images
    pub index: usize,
    /// Euclidean distance to the source atom (Å)
    pub distance: f64,
    /// Image position minus source position
    pub displacement: Vector3<f64>,
}

/// Replicated cartesian positions with the original atom of every replica
#[derive(Debug, Clone)]
pub struct ImageCloud {
    positions: Vec<Vector3<f64>>,
    original: Vec<usize>,
}

impl ImageCloud {
    /// Translate every atom by all lattice vectors n·(a, b, c), n ∈ [-k, k]³
    ///
    /// Enumeration order is fixed: nₐ outermost, then n_b, n_c, then atoms.
    /// Fails when the cloud would exceed [`MAX_IMAGE_POINTS`].
    pub fn build(structure: &Structure, num_images: usize) -> Result<Self> {
        let total = num_images
            .checked_mul(2)
            .and_then(|n| n.checked_add(1))
            .and_then(|side| side.checked_pow(3))
            .and_then(|cells| cells.checked_mul(structure.num_atoms()))
            .filter(|&total| total <= MAX_IMAGE_POINTS)
            .ok_or_else(|| {
                Error::InvalidParameter(format!(
                    "{} images per direction over {} atoms exceeds {} cloud points; \
                     cutoff is too large for this cell",
                    num_images,
                    structure.num_atoms(),
                    MAX_IMAGE_POINTS
                ))
            })?;

        let k = num_images as i64;
        let mut positions = Vec::with_capacity(total);
        let mut original = Vec::with_capacity(total);

        let lattice = structure.lattice();
        for na in -k..=k {
            for nb in -k..=k {
                for nc in -k..=k {
                    let offset = (lattice.row(0) * na as f64
                        + lattice.row(1) * nb as f64
                        + lattice.row(2) * nc as f64)
                        .transpose();
                    for (i, atom) in structure.atoms().iter().enumerate() {
                        positions.push(atom.position + offset);
                        original.push(i);
                    }
                }
            }
        }

        Ok(Self { positions, original })
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn position(&self, idx: usize) -> &Vector3<f64> {
        &self.positions[idx]
    }

    pub fn original_index(&self, idx: usize) -> usize {
        self.original[idx]
    }

    /// k-d tree over the cloud, payload = cloud index
    fn spatial_index(&self) -> Result<KdTree<f64, usize, [f64; 3]>> {
        let mut tree = KdTree::new(3);
        for (idx, p) in self.positions.iter().enumerate() {
            tree.add([p.x, p.y, p.z], idx)
                .map_err(|e| Error::SpatialIndex(format!("{:?}", e)))?;
        }
        Ok(tree)
    }
}

/// Exact periodic neighbor lists for every atom of a structure
#[derive(Debug, Clone)]
pub struct PeriodicNeighborIndex {
    r_cutoff: f64,
    max_neighbors: usize,
    epsilon: f64,
    num_images: usize,
    lists: Vec<Vec<Neighbor>>,
}

impl PeriodicNeighborIndex {
    pub const DEFAULT_CUTOFF: f64 = 10.0;
    pub const DEFAULT_MAX_NEIGHBORS: usize = 20;
    pub const DEFAULT_EPSILON: f64 = 1e-10;

    /// Search all neighbors within `r_cutoff`, keep at most `max_neighbors`
    /// per atom. A match imaging the source atom itself is dropped only when
    /// it is closer than `epsilon`.
    pub fn new(
        structure: &Structure,
        r_cutoff: f64,
        max_neighbors: usize,
        epsilon: f64,
    ) -> Result<Self> {
        if !(r_cutoff.is_finite() && r_cutoff > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "cutoff radius must be positive and finite, got {}",
                r_cutoff
            )));
        }
        if !(epsilon.is_finite() && epsilon >= 0.0) {
            return Err(Error::InvalidParameter(format!(
                "self-match epsilon must be non-negative, got {}",
                epsilon
            )));
        }

        let num_images = Self::num_images(structure.lattice(), r_cutoff)?;
        let cloud = ImageCloud::build(structure, num_images)?;
        let tree = cloud.spatial_index()?;

        log::debug!(
            "image cloud: {} points ({} images per direction) for {} atoms, r_cutoff = {:.3}",
            cloud.len(),
            num_images,
            structure.num_atoms(),
            r_cutoff
        );

        let r_cutoff_sq = r_cutoff * r_cutoff;
        let lists = structure
            .atoms()
            .par_iter()
            .enumerate()
            .map(|(i, atom)| -> Result<Vec<Neighbor>> {
                let query = [atom.position.x, atom.position.y, atom.position.z];
                let matches = tree
                    .within(&query, r_cutoff_sq, &squared_euclidean)
                    .map_err(|e| Error::SpatialIndex(format!("{:?}", e)))?;

                let mut found: Vec<(usize, f64)> = matches
                    .into_iter()
                    .map(|(dist_sq, &cloud_idx)| (cloud_idx, dist_sq))
                    .filter(|&(cloud_idx, dist_sq)| {
                        !(cloud.original_index(cloud_idx) == i && dist_sq.sqrt() < epsilon)
                    })
                    .collect();

                // Ties fall back to image-enumeration order
                found.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
                found.truncate(max_neighbors);

                Ok(found
                    .into_iter()
                    .map(|(cloud_idx, dist_sq)| Neighbor {
                        index: cloud.original_index(cloud_idx),
                        distance: dist_sq.sqrt(),
                        displacement: cloud.position(cloud_idx) - atom.position,
                    })
                    .collect())
            })
            .collect::<Result<Vec<Vec<Neighbor>>>>()?;

        Ok(Self {
            r_cutoff,
            max_neighbors,
            epsilon,
            num_images,
            lists,
        })
    }

    /// Neighbor lists with cutoff 10 Å, 20 neighbors, epsilon 1e-10
    pub fn with_defaults(structure: &Structure) -> Result<Self> {
        Self::new(
            structure,
            Self::DEFAULT_CUTOFF,
            Self::DEFAULT_MAX_NEIGHBORS,
            Self::DEFAULT_EPSILON,
        )
    }

    /// Graph neighbor lists from the `[neighbors]` configuration section
    pub fn from_config(structure: &Structure, config: &NeighborConfig) -> Result<Self> {
        config.validate()?;
        Self::new(structure, config.r_cutoff, config.max_neighbors, config.epsilon)
    }

    /// Number of lattice images per direction needed to cover `r_cutoff`
    pub fn num_images(lattice: &Matrix3<f64>, r_cutoff: f64) -> Result<usize> {
        let l_min = lattice
            .row_iter()
            .map(|row| row.norm())
            .fold(f64::INFINITY, f64::min);

        if !(l_min.is_finite() && l_min > 0.0) {
            return Err(Error::DegenerateLattice(format!(
                "shortest lattice vector has length {}",
                l_min
            )));
        }

        Ok((r_cutoff / l_min).ceil() as usize + 1)
    }

    /// Sorted, truncated neighbors of `atom_idx`
    pub fn neighbors(&self, atom_idx: usize) -> Result<&[Neighbor]> {
        self.lists
            .get(atom_idx)
            .map(Vec::as_slice)
            .ok_or(Error::AtomIndexOutOfRange {
                index: atom_idx,
                len: self.lists.len(),
            })
    }

    pub fn num_atoms(&self) -> usize {
        self.lists.len()
    }

    pub fn r_cutoff(&self) -> f64 {
        self.r_cutoff
    }

    pub fn max_neighbors(&self) -> usize {
        self.max_neighbors
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Image count used to build the cloud
    pub fn images_per_direction(&self) -> usize {
        self.num_images
    }
}

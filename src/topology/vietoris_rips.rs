//! Vietoris-Rips Complex Construction
//!
//! The Vietoris-Rips complex VR_ε(X) is a simplicial complex where:
//! - 0-simplices are the points in X
//! - A k-simplex [v₀, ..., vₖ] exists iff d(vᵢ, vⱼ) ≤ ε for all i,j
//!
//! Every simplex enters the filtration at its diameter (longest edge), so
//! vertices are born at 0 and a simplex never precedes its faces.

use ndarray::Array2;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::collections::HashSet;

use crate::error::{Error, Result};

/// Vietoris-Rips filtration truncated at a distance threshold
#[derive(Debug, Clone)]
pub struct VietorisRips {
    /// Distance matrix (precomputed)
    distances: Array2<f64>,
    /// Largest edge admitted to the complex
    threshold: f64,
}

/// A simplex with its filtration value
#[derive(Debug, Clone, PartialEq)]
pub struct Simplex {
    /// Sorted vertex indices
    pub vertices: Vec<usize>,
    /// Longest edge among the vertices
    pub diameter: f64,
}

impl Simplex {
    pub fn dimension(&self) -> usize {
        self.vertices.len() - 1
    }
}

impl VietorisRips {
    /// Create a new VR filtration from a distance matrix
    pub fn new(distances: Array2<f64>, threshold: f64) -> Result<Self> {
        if distances.nrows() != distances.ncols() {
            return Err(Error::ShapeMismatch(format!(
                "distance matrix must be square, got {}x{}",
                distances.nrows(),
                distances.ncols()
            )));
        }
        if threshold.is_nan() || threshold < 0.0 {
            return Err(Error::InvalidParameter(format!(
                "filtration threshold must be non-negative, got {}",
                threshold
            )));
        }
        if distances.iter().any(|d| d.is_nan() || *d < 0.0) {
            return Err(Error::InvalidParameter(
                "distance matrix contains negative or NaN entries".into(),
            ));
        }

        Ok(Self { distances, threshold })
    }

    /// Create from a precomputed distance matrix
    pub fn from_distance_matrix(distances: &Array2<f64>, threshold: f64) -> Result<Self> {
        Self::new(distances.clone(), threshold)
    }

    /// Create from point cloud (computes distance matrix)
    pub fn from_points(points: &Array2<f64>, threshold: f64) -> Result<Self> {
        Self::new(Self::compute_distance_matrix(points), threshold)
    }

    /// Compute Euclidean distance matrix
    pub fn compute_distance_matrix(points: &Array2<f64>) -> Array2<f64> {
        let n = points.nrows();
        let dim = points.ncols();

        let mut dm = Array2::<f64>::zeros((n, n));

        for i in 0..n {
            for j in i + 1..n {
                let mut dist_sq = 0.0;
                for d in 0..dim {
                    let diff = points[[i, d]] - points[[j, d]];
                    dist_sq += diff * diff;
                }
                let dist = dist_sq.sqrt();
                dm[[i, j]] = dist;
                dm[[j, i]] = dist;
            }
        }

        dm
    }

    /// Number of points
    pub fn n_points(&self) -> usize {
        self.distances.nrows()
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn distances(&self) -> &Array2<f64> {
        &self.distances
    }

    #[inline]
    fn adjacent(&self, i: usize, j: usize) -> bool {
        self.distances[[i, j]] <= self.threshold
    }

    /// All edges (i < j) admitted by the threshold
    pub fn edges(&self) -> Vec<(usize, usize)> {
        let n = self.n_points();
        let mut edges = Vec::new();

        for i in 0..n {
            for j in i + 1..n {
                if self.adjacent(i, j) {
                    edges.push((i, j));
                }
            }
        }

        edges
    }

    /// Count connected components of the 1-skeleton using Union-Find
    pub fn count_components(&self) -> usize {
        let n = self.n_points();
        let mut parent: Vec<usize> = (0..n).collect();
        let mut rank = vec![0usize; n];

        fn find(parent: &mut [usize], i: usize) -> usize {
            if parent[i] != i {
                parent[i] = find(parent, parent[i]);
            }
            parent[i]
        }

        fn union(parent: &mut [usize], rank: &mut [usize], x: usize, y: usize) {
            let rx = find(parent, x);
            let ry = find(parent, y);
            if rx != ry {
                if rank[rx] < rank[ry] {
                    parent[rx] = ry;
                } else if rank[rx] > rank[ry] {
                    parent[ry] = rx;
                } else {
                    parent[ry] = rx;
                    rank[rx] += 1;
                }
            }
        }

        for (i, j) in self.edges() {
            union(&mut parent, &mut rank, i, j);
        }

        let mut roots = HashSet::new();
        for i in 0..n {
            roots.insert(find(&mut parent, i));
        }
        roots.len()
    }

    /// All simplices up to dimension `max_dim`, in filtration order
    ///
    /// Order is (diameter, dimension, lexicographic vertices), which is total,
    /// so the result does not depend on how enumeration was scheduled.
    pub fn simplices(&self, max_dim: usize, pool: Option<&ThreadPool>) -> Vec<Simplex> {
        let n = self.n_points();
        let max_size = max_dim + 1;

        let mut simplices: Vec<Simplex> = match pool {
            Some(pool) => pool.install(|| {
                (0..n)
                    .into_par_iter()
                    .flat_map_iter(|v| self.cliques_from(v, max_size))
                    .collect()
            }),
            None => (0..n).flat_map(|v| self.cliques_from(v, max_size)).collect(),
        };

        simplices.sort_unstable_by(|a, b| {
            a.diameter
                .total_cmp(&b.diameter)
                .then(a.vertices.len().cmp(&b.vertices.len()))
                .then_with(|| a.vertices.cmp(&b.vertices))
        });

        simplices
    }

    /// Cliques whose smallest vertex is `v`, with at most `max_size` vertices
    fn cliques_from(&self, v: usize, max_size: usize) -> Vec<Simplex> {
        let candidates: Vec<usize> = (v + 1..self.n_points())
            .filter(|&w| self.adjacent(v, w))
            .collect();

        let mut out = Vec::new();
        let mut current = vec![v];
        self.extend_clique(&mut current, 0.0, &candidates, max_size, &mut out);
        out
    }

    fn extend_clique(
        &self,
        current: &mut Vec<usize>,
        diameter: f64,
        candidates: &[usize],
        max_size: usize,
        out: &mut Vec<Simplex>,
    ) {
        out.push(Simplex {
            vertices: current.clone(),
            diameter,
        });
        if current.len() == max_size {
            return;
        }

        for (k, &w) in candidates.iter().enumerate() {
            let next: Vec<usize> = candidates[k + 1..]
                .iter()
                .copied()
                .filter(|&u| self.adjacent(w, u))
                .collect();
            let grown = current
                .iter()
                .map(|&u| self.distances[[u, w]])
                .fold(diameter, f64::max);

            current.push(w);
            self.extend_clique(current, grown, &next, max_size, out);
            current.pop();
        }
    }
}

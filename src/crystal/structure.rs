//! Immutable periodic structure with minimum-image distance queries.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use nalgebra::{Matrix3, Vector3};
use ndarray::Array2;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use super::ParsedStructure;
use crate::error::{Error, Result};

/// Smallest |det L| accepted as a non-degenerate cell (Å³)
const MIN_CELL_VOLUME: f64 = 1e-10;

/// A single atom of a periodic structure
#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    /// Element tag (index into the structure's symbol table)
    pub element: usize,
    /// Cartesian position (Å)
    pub position: Vector3<f64>,
    /// Fractional position, not necessarily wrapped into [0, 1)
    pub frac_position: Vector3<f64>,
}

/// Periodic atomic structure
///
/// Built once and never mutated; every derivation (supercell, vacancy,
/// rattling) returns a new instance.
#[derive(Debug, Clone)]
pub struct Structure {
    /// Lattice vectors a, b, c as rows
    lattice: Matrix3<f64>,
    /// Inverse of the lattice matrix
    inv_lattice: Matrix3<f64>,
    atoms: Vec<Atom>,
    /// Element symbols (may be empty when built from bare tags)
    symbols: Vec<String>,
    /// Population per element tag
    counts: BTreeMap<usize, usize>,
    /// Minimum-image distance matrix, filled on first request
    distances: OnceLock<Array2<f64>>,
}

impl Structure {
    /// Create a structure from a lattice, fractional positions and element tags
    pub fn new(
        lattice: Matrix3<f64>,
        frac_positions: &[Vector3<f64>],
        elements: &[usize],
    ) -> Result<Self> {
        Self::with_symbols(lattice, frac_positions, elements, Vec::new())
    }

    /// Create a structure that also carries an element symbol table
    pub fn with_symbols(
        lattice: Matrix3<f64>,
        frac_positions: &[Vector3<f64>],
        elements: &[usize],
        symbols: Vec<String>,
    ) -> Result<Self> {
        if frac_positions.len() != elements.len() {
            return Err(Error::ShapeMismatch(format!(
                "{} fractional positions but {} element tags",
                frac_positions.len(),
                elements.len()
            )));
        }
        if !symbols.is_empty() {
            if let Some(&bad) = elements.iter().find(|&&e| e >= symbols.len()) {
                return Err(Error::UnknownElement(bad));
            }
        }

        let inv_lattice = Self::check_lattice(&lattice)?;

        let mut atoms = Vec::with_capacity(frac_positions.len());
        let mut counts = BTreeMap::new();
        for (&frac, &element) in frac_positions.iter().zip(elements) {
            if !frac.iter().all(|x| x.is_finite()) {
                return Err(Error::InvalidParameter(format!(
                    "non-finite fractional position {:?}",
                    frac
                )));
            }
            atoms.push(Atom {
                element,
                position: lattice.transpose() * frac,
                frac_position: frac,
            });
            *counts.entry(element).or_insert(0) += 1;
        }

        Ok(Self {
            lattice,
            inv_lattice,
            atoms,
            symbols,
            counts,
            distances: OnceLock::new(),
        })
    }

    /// Build from the output of a structure-file reader
    pub fn from_parsed(parsed: &ParsedStructure) -> Result<Self> {
        parsed.validate()?;

        let frac: Vec<Vector3<f64>> = parsed
            .frac_coords
            .outer_iter()
            .map(|row| Vector3::new(row[0], row[1], row[2]))
            .collect();

        Self::with_symbols(parsed.lattice, &frac, &parsed.atom_types, parsed.elements.clone())
    }

    /// Reject zero-length lattice vectors and singular cells
    fn check_lattice(lattice: &Matrix3<f64>) -> Result<Matrix3<f64>> {
        if !lattice.iter().all(|x| x.is_finite()) {
            return Err(Error::DegenerateLattice("non-finite lattice entry".into()));
        }
        for (k, row) in lattice.row_iter().enumerate() {
            if row.norm() <= 0.0 {
                return Err(Error::DegenerateLattice(format!(
                    "lattice vector {} has zero length",
                    k
                )));
            }
        }
        let det = lattice.determinant();
        if det.abs() < MIN_CELL_VOLUME {
            return Err(Error::DegenerateLattice(format!(
                "cell volume {:.3e} is zero",
                det.abs()
            )));
        }
        lattice
            .try_inverse()
            .ok_or_else(|| Error::DegenerateLattice("lattice matrix is singular".into()))
    }

    /// Lattice matrix (rows = lattice vectors)
    pub fn lattice(&self) -> &Matrix3<f64> {
        &self.lattice
    }

    /// Inverse lattice matrix
    pub fn inverse_lattice(&self) -> &Matrix3<f64> {
        &self.inv_lattice
    }

    /// Cell volume |det L|
    pub fn volume(&self) -> f64 {
        self.lattice.determinant().abs()
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn num_atoms(&self) -> usize {
        self.atoms.len()
    }

    /// Element symbols, empty if the structure was built from bare tags
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Population of every element tag present
    pub fn element_counts(&self) -> &BTreeMap<usize, usize> {
        &self.counts
    }

    /// Atom by index
    pub fn atom(&self, i: usize) -> Result<&Atom> {
        self.atoms.get(i).ok_or(Error::AtomIndexOutOfRange {
            index: i,
            len: self.atoms.len(),
        })
    }

    /// Number of atoms carrying `element`
    pub fn count(&self, element: usize) -> Result<usize> {
        self.counts
            .get(&element)
            .copied()
            .ok_or(Error::UnknownElement(element))
    }

    /// Fractional → cartesian
    pub fn frac_to_cart(&self, frac: &Vector3<f64>) -> Vector3<f64> {
        self.lattice.transpose() * frac
    }

    /// Cartesian → fractional
    pub fn cart_to_frac(&self, cart: &Vector3<f64>) -> Vector3<f64> {
        self.inv_lattice.transpose() * cart
    }

    /// Minimum-image displacement from atom i to atom j
    ///
    /// Each fractional component of f_j - f_i is wrapped by subtracting the
    /// nearest integer before mapping back to cartesian space.
    pub fn displacement(&self, i: usize, j: usize) -> Result<Vector3<f64>> {
        let fi = self.atom(i)?.frac_position;
        let fj = self.atom(j)?.frac_position;
        Ok(self.frac_to_cart(&minimum_image(fj - fi)))
    }

    /// Minimum-image distance between atoms i and j
    pub fn distance(&self, i: usize, j: usize) -> Result<f64> {
        Ok(self.displacement(i, j)?.norm())
    }

    /// Dense symmetric minimum-image distance matrix, O(N²)
    pub fn compute_distance_matrix(&self) -> Array2<f64> {
        let n = self.atoms.len();
        let mut dm = Array2::<f64>::zeros((n, n));

        for i in 0..n {
            for j in i + 1..n {
                let delta = self.atoms[j].frac_position - self.atoms[i].frac_position;
                let d = self.frac_to_cart(&minimum_image(delta)).norm();
                dm[[i, j]] = d;
                dm[[j, i]] = d;
            }
        }

        dm
    }

    /// Cached distance matrix, computed on first access
    pub fn distance_matrix(&self) -> &Array2<f64> {
        self.distances.get_or_init(|| self.compute_distance_matrix())
    }

    /// Repeat the cell `na × nb × nc` times
    pub fn supercell(&self, na: usize, nb: usize, nc: usize) -> Result<Self> {
        if na == 0 || nb == 0 || nc == 0 {
            return Err(Error::InvalidParameter(format!(
                "supercell multipliers must be positive, got {}x{}x{}",
                na, nb, nc
            )));
        }

        let scale = Vector3::new(na as f64, nb as f64, nc as f64);
        let mut lattice = self.lattice;
        for k in 0..3 {
            let row = lattice.row(k) * scale[k];
            lattice.set_row(k, &row);
        }

        let n = self.atoms.len() * na * nb * nc;
        let mut frac = Vec::with_capacity(n);
        let mut elements = Vec::with_capacity(n);
        for ia in 0..na {
            for ib in 0..nb {
                for ic in 0..nc {
                    let shift = Vector3::new(ia as f64, ib as f64, ic as f64);
                    for atom in &self.atoms {
                        frac.push((atom.frac_position + shift).component_div(&scale));
                        elements.push(atom.element);
                    }
                }
            }
        }

        Self::with_symbols(lattice, &frac, &elements, self.symbols.clone())
    }

    /// Same structure with atom `idx` removed (a vacancy)
    pub fn without_atom(&self, idx: usize) -> Result<Self> {
        self.atom(idx)?;

        let (frac, elements): (Vec<_>, Vec<_>) = self
            .atoms
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != idx)
            .map(|(_, a)| (a.frac_position, a.element))
            .unzip();

        Self::with_symbols(self.lattice, &frac, &elements, self.symbols.clone())
    }

    /// Same lattice with every atom displaced by isotropic Gaussian noise
    ///
    /// `sigma` is the per-component standard deviation in Å.
    pub fn rattled<R: Rng + ?Sized>(&self, sigma: f64, rng: &mut R) -> Result<Self> {
        let normal = Normal::new(0.0, sigma).map_err(|e| {
            Error::InvalidParameter(format!("invalid rattle amplitude {}: {}", sigma, e))
        })?;

        let mut frac = Vec::with_capacity(self.atoms.len());
        let mut elements = Vec::with_capacity(self.atoms.len());
        for atom in &self.atoms {
            let kick = Vector3::new(normal.sample(rng), normal.sample(rng), normal.sample(rng));
            frac.push(self.cart_to_frac(&(atom.position + kick)));
            elements.push(atom.element);
        }

        Self::with_symbols(self.lattice, &frac, &elements, self.symbols.clone())
    }
}

/// Wrap each fractional component to its nearest-integer remainder
fn minimum_image(mut delta: Vector3<f64>) -> Vector3<f64> {
    for k in 0..3 {
        delta[k] -= delta[k].round();
    }
    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn body_centered(a: f64) -> Structure {
        Structure::new(
            Matrix3::from_diagonal_element(a),
            &[Vector3::zeros(), Vector3::new(0.5, 0.5, 0.5)],
            &[0, 1],
        )
        .unwrap()
    }

    #[test]
    fn test_cartesian_consistent_with_lattice() {
        #[rustfmt::skip]
        let lattice = Matrix3::new(
            4.0, 0.0, 0.0,
            1.0, 3.0, 0.0,
            0.5, 0.5, 6.0,
        );
        let s = Structure::new(lattice, &[Vector3::new(0.25, 0.5, 0.1)], &[0]).unwrap();
        // 0.25·a + 0.5·b + 0.1·c
        let expected = Vector3::new(1.0 + 0.5 + 0.05, 1.5 + 0.05, 0.6);
        assert_abs_diff_eq!((s.atoms()[0].position - expected).norm(), 0.0, epsilon = 1e-12);

        let back = s.cart_to_frac(&s.atoms()[0].position);
        assert_abs_diff_eq!((back - s.atoms()[0].frac_position).norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_minimum_image_wraps() {
        let s = Structure::new(
            Matrix3::from_diagonal_element(10.0),
            &[Vector3::new(0.05, 0.0, 0.0), Vector3::new(0.95, 0.0, 0.0)],
            &[0, 0],
        )
        .unwrap();

        let d = s.displacement(0, 1).unwrap();
        assert_abs_diff_eq!(d.x, -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(s.distance(0, 1).unwrap(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(s.distance(1, 0).unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_unwrapped_fractional_input() {
        let s = Structure::new(
            Matrix3::from_diagonal_element(5.0),
            &[Vector3::new(1.1, 0.0, 0.0), Vector3::new(-0.1, 0.0, 0.0)],
            &[0, 0],
        )
        .unwrap();
        assert_abs_diff_eq!(s.distance(0, 1).unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_distance_matrix_symmetric() {
        let s = body_centered(5.0);
        let dm = s.compute_distance_matrix();
        let expected = 5.0 * 3.0_f64.sqrt() / 2.0;

        assert_eq!(dm.shape(), &[2, 2]);
        assert_eq!(dm[[0, 0]], 0.0);
        assert_abs_diff_eq!(dm[[0, 1]], expected, epsilon = 1e-12);
        assert_eq!(dm[[0, 1]], dm[[1, 0]]);
        assert_eq!(s.distance_matrix(), &dm);
    }

    #[test]
    fn test_counts() {
        let s = Structure::new(
            Matrix3::from_diagonal_element(4.0),
            &[Vector3::zeros(), Vector3::new(0.5, 0.5, 0.0), Vector3::new(0.5, 0.0, 0.5)],
            &[3, 7, 3],
        )
        .unwrap();

        assert_eq!(s.count(3).unwrap(), 2);
        assert_eq!(s.count(7).unwrap(), 1);
        assert!(matches!(s.count(1), Err(Error::UnknownElement(1))));
    }

    #[test]
    fn test_out_of_range() {
        let s = body_centered(5.0);
        assert!(matches!(
            s.distance(0, 2),
            Err(Error::AtomIndexOutOfRange { index: 2, len: 2 })
        ));
    }

    #[test]
    fn test_degenerate_lattices() {
        #[rustfmt::skip]
        let flat = Matrix3::new(
            1.0, 0.0, 0.0,
            0.0, 1.0, 0.0,
            1.0, 1.0, 0.0,
        );
        assert!(matches!(
            Structure::new(flat, &[Vector3::zeros()], &[0]),
            Err(Error::DegenerateLattice(_))
        ));

        let mut zero_row = Matrix3::identity();
        zero_row.set_row(2, &Vector3::<f64>::zeros().transpose());
        assert!(matches!(
            Structure::new(zero_row, &[Vector3::zeros()], &[0]),
            Err(Error::DegenerateLattice(_))
        ));
    }

    #[test]
    fn test_symbols_validate_tags() {
        let result = Structure::with_symbols(
            Matrix3::identity(),
            &[Vector3::zeros()],
            &[2],
            vec!["Na".into(), "Cl".into()],
        );
        assert!(matches!(result, Err(Error::UnknownElement(2))));
    }

    #[test]
    fn test_supercell() {
        let s = body_centered(3.0);
        let sc = s.supercell(2, 1, 3).unwrap();

        assert_eq!(sc.num_atoms(), 12);
        assert_eq!(sc.count(0).unwrap(), 6);
        assert_abs_diff_eq!(sc.volume(), 6.0 * s.volume(), epsilon = 1e-9);
        // Nearest-neighbor distance is unchanged by tiling
        let nn = (1..sc.num_atoms())
            .map(|j| sc.distance(0, j).unwrap())
            .fold(f64::INFINITY, f64::min);
        assert_abs_diff_eq!(nn, 3.0 * 3.0_f64.sqrt() / 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_without_atom() {
        let s = body_centered(5.0);
        let vac = s.without_atom(1).unwrap();

        assert_eq!(vac.num_atoms(), 1);
        assert!(vac.count(1).is_err());
        assert_eq!(s.num_atoms(), 2);
    }

    #[test]
    fn test_rattled_is_new_and_reproducible() {
        let s = body_centered(5.0);
        let a = s.rattled(0.05, &mut StdRng::seed_from_u64(7)).unwrap();
        let b = s.rattled(0.05, &mut StdRng::seed_from_u64(7)).unwrap();

        assert_eq!(a.atoms(), b.atoms());
        assert_ne!(a.atoms()[0].position, s.atoms()[0].position);
        assert_eq!(a.lattice(), s.lattice());
    }

    #[test]
    fn test_from_parsed() {
        let parsed = ParsedStructure {
            lattice: Matrix3::from_diagonal_element(5.64),
            elements: vec!["Na".into(), "Cl".into()],
            counts: vec![1, 1],
            frac_coords: ndarray::array![[0.0, 0.0, 0.0], [0.5, 0.5, 0.5]],
            atom_types: vec![0, 1],
        };
        let s = Structure::from_parsed(&parsed).unwrap();

        assert_eq!(s.num_atoms(), 2);
        assert_eq!(s.symbols()[1], "Cl");
        assert_eq!(s.count(1).unwrap(), 1);
    }
}

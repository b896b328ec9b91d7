//! Parsed structure input handed over by file readers.
//!
//! Text formats (POSCAR, CIF, ...) are read elsewhere; this is the shape
//! they must produce before a [`Structure`](super::Structure) can be built.

use nalgebra::{Matrix3, Vector3};
use ndarray::Array2;

use crate::error::{Error, Result};

/// Lattice, element table and fractional coordinates as delivered by a parser.
#[derive(Debug, Clone)]
pub struct ParsedStructure {
    /// Lattice vectors as rows, already scaled
    pub lattice: Matrix3<f64>,
    /// Element symbols, indexed by element tag
    pub elements: Vec<String>,
    /// Atom count per element, parallel to `elements`
    pub counts: Vec<usize>,
    /// Fractional coordinates [N, 3]
    pub frac_coords: Array2<f64>,
    /// Element tag per atom
    pub atom_types: Vec<usize>,
}

impl ParsedStructure {
    /// Build from cartesian coordinates, converting through the inverse lattice.
    pub fn from_cartesian(
        lattice: Matrix3<f64>,
        elements: Vec<String>,
        counts: Vec<usize>,
        cart_coords: &Array2<f64>,
        atom_types: Vec<usize>,
    ) -> Result<Self> {
        if cart_coords.ncols() != 3 {
            return Err(Error::ShapeMismatch(format!(
                "cartesian coordinates must have 3 columns, got {}",
                cart_coords.ncols()
            )));
        }

        let inv_t = lattice
            .transpose()
            .try_inverse()
            .ok_or_else(|| Error::DegenerateLattice("lattice matrix is singular".into()))?;

        let mut frac_coords = Array2::<f64>::zeros((cart_coords.nrows(), 3));
        for (i, row) in cart_coords.outer_iter().enumerate() {
            let frac = inv_t * Vector3::new(row[0], row[1], row[2]);
            for d in 0..3 {
                frac_coords[[i, d]] = frac[d];
            }
        }

        Ok(Self {
            lattice,
            elements,
            counts,
            frac_coords,
            atom_types,
        })
    }

    /// Total number of atoms declared by the per-element counts
    pub fn total_atoms(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Check that counts, element table and per-atom arrays agree
    pub fn validate(&self) -> Result<()> {
        if self.frac_coords.ncols() != 3 {
            return Err(Error::ShapeMismatch(format!(
                "fractional coordinates must have 3 columns, got {}",
                self.frac_coords.ncols()
            )));
        }
        if self.frac_coords.nrows() != self.atom_types.len() {
            return Err(Error::ShapeMismatch(format!(
                "{} coordinate rows but {} atom types",
                self.frac_coords.nrows(),
                self.atom_types.len()
            )));
        }
        if self.counts.len() != self.elements.len() {
            return Err(Error::ShapeMismatch(format!(
                "{} element symbols but {} element counts",
                self.elements.len(),
                self.counts.len()
            )));
        }
        if self.total_atoms() != self.atom_types.len() {
            return Err(Error::ShapeMismatch(format!(
                "element counts sum to {} but {} atoms were given",
                self.total_atoms(),
                self.atom_types.len()
            )));
        }
        if let Some(&bad) = self.atom_types.iter().find(|&&t| t >= self.elements.len()) {
            return Err(Error::UnknownElement(bad));
        }
        Ok(())
    }
}

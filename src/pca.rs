//! PCA Reduction of Betti Feature Matrices
//!
//! Fit once over the stacked features of a whole dataset, then project every
//! structure with the same basis.
//!
//! ## Method
//!
//! X (N × 35) is centered by its column means and decomposed with a thin SVD,
//! X_c = U Σ Vᵀ. The leading right-singular vectors are the components and
//!
//!   ratio_k = (σ_k² / (N−1)) / Σ_j (σ_j² / (N−1))
//!
//! Each component is sign-normalized so its largest-magnitude entry is
//! positive, which makes repeated fits on the same data agree exactly.

use std::path::Path;

use nalgebra::DMatrix;
use ndarray::{Array1, Array2, Axis};

use crate::error::{Error, Result};
use crate::io::{create_writer, decode_len, encode_len, open_reader, LeWriter};
use crate::topology::BETTI_FEATURE_DIM;

/// Fitted projection: mean, components [D, k], explained-variance ratios [k]
#[derive(Debug, Clone, PartialEq)]
pub struct PcaModel {
    mean: Array1<f64>,
    components: Array2<f64>,
    explained_variance_ratio: Array1<f64>,
}

impl PcaModel {
    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    /// Orthonormal columns, descending explained variance
    pub fn components(&self) -> &Array2<f64> {
        &self.components
    }

    pub fn explained_variance_ratio(&self) -> &Array1<f64> {
        &self.explained_variance_ratio
    }

    pub fn n_components(&self) -> usize {
        self.components.ncols()
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    /// (X − mean) · components
    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.n_features() {
            return Err(Error::FeatureDimensionMismatch {
                expected: self.n_features(),
                found: x.ncols(),
            });
        }
        let centered = x - &self.mean;
        Ok(centered.dot(&self.components))
    }

    /// Binary layout, all little endian:
    /// i32 n_components · i32 len + f64 mean · i32 rows, i32 cols + row-major
    /// f64 components · i32 len + f64 ratios
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let n_components = encode_len(self.n_components(), "component count")?;
        let n_features = encode_len(self.n_features(), "feature count")?;

        let mut writer = create_writer(path)?;
        let write = |w: &mut LeWriter<_>| -> std::io::Result<()> {
            w.write_i32(n_components)?;
            w.write_i32(n_features)?;
            w.write_f64_all(self.mean.iter())?;
            w.write_i32(n_features)?;
            w.write_i32(n_components)?;
            w.write_f64_all(self.components.iter())?;
            w.write_i32(n_components)?;
            w.write_f64_all(self.explained_variance_ratio.iter())?;
            w.flush()
        };
        write(&mut writer).map_err(|e| Error::io(path, e))?;

        log::info!(
            "saved PCA model ({} features -> {} components) to {}",
            self.n_features(),
            self.n_components(),
            path.display()
        );
        Ok(())
    }

    /// Read a model written by [`PcaModel::save`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let (mut reader, _) = open_reader(path)?;
        let io_err = |e| Error::io(path, e);
        let format_err = |reason: String| Error::InvalidFormat {
            path: path.to_path_buf(),
            reason,
        };

        let n_components = decode_len(reader.read_i32().map_err(io_err)?, path, "component count")?;

        let mean_len = decode_len(reader.read_i32().map_err(io_err)?, path, "mean length")?;
        let mean = Array1::from(reader.read_f64_vec(mean_len).map_err(io_err)?);

        let rows = decode_len(reader.read_i32().map_err(io_err)?, path, "component rows")?;
        let cols = decode_len(reader.read_i32().map_err(io_err)?, path, "component columns")?;
        if rows != mean_len || cols != n_components {
            return Err(format_err(format!(
                "component matrix is {}x{}, expected {}x{}",
                rows, cols, mean_len, n_components
            )));
        }
        let values = reader.read_f64_vec(rows * cols).map_err(io_err)?;
        let components = Array2::from_shape_vec((rows, cols), values)
            .map_err(|e| format_err(e.to_string()))?;

        let ratio_len = decode_len(reader.read_i32().map_err(io_err)?, path, "ratio length")?;
        if ratio_len != n_components {
            return Err(format_err(format!(
                "{} variance ratios for {} components",
                ratio_len, n_components
            )));
        }
        let ratios = reader.read_f64_vec(ratio_len).map_err(io_err)?;
        let explained_variance_ratio = Array1::from(ratios);

        log::debug!(
            "loaded PCA model ({} features -> {} components) from {}",
            mean_len,
            n_components,
            path.display()
        );

        Ok(Self {
            mean,
            components,
            explained_variance_ratio,
        })
    }
}

/// PCA over Betti feature matrices; unusable until `fit` or `load`
#[derive(Debug, Clone, Default)]
pub struct PcaReducer {
    model: Option<PcaModel>,
}

impl PcaReducer {
    pub fn new() -> Self {
        Self { model: None }
    }

    /// Reducer wrapping an already fitted model
    pub fn from_model(model: PcaModel) -> Self {
        Self { model: Some(model) }
    }

    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    pub fn model(&self) -> Option<&PcaModel> {
        self.model.as_ref()
    }

    fn fitted(&self, operation: &'static str) -> Result<&PcaModel> {
        self.model.as_ref().ok_or(Error::NotFitted(operation))
    }

    /// Fit on an [N, 35] matrix, keeping `n_components` directions
    pub fn fit(&mut self, x: &Array2<f64>, n_components: usize) -> Result<&PcaModel> {
        let (rows, cols) = x.dim();
        if cols != BETTI_FEATURE_DIM {
            return Err(Error::FeatureDimensionMismatch {
                expected: BETTI_FEATURE_DIM,
                found: cols,
            });
        }
        if rows < 2 {
            return Err(Error::InvalidParameter(format!(
                "PCA needs at least 2 samples, got {}",
                rows
            )));
        }
        if n_components == 0 || n_components > rows.min(cols) {
            return Err(Error::InvalidParameter(format!(
                "n_components must be in 1..={}, got {}",
                rows.min(cols),
                n_components
            )));
        }

        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| Error::InvalidParameter("empty feature matrix".into()))?;
        let centered = x - &mean;

        let matrix = DMatrix::from_fn(rows, cols, |i, j| centered[[i, j]]);
        let svd = matrix.svd(false, true);
        let v_t = svd.v_t.ok_or_else(|| {
            Error::InvalidParameter("SVD returned no right singular vectors".into())
        })?;
        let singular = svd.singular_values;

        // Descending singular values, ties by position
        let mut order: Vec<usize> = (0..singular.len()).collect();
        order.sort_by(|&a, &b| singular[b].total_cmp(&singular[a]).then(a.cmp(&b)));

        let denom = (rows - 1) as f64;
        let variances: Vec<f64> = singular.iter().map(|s| s * s / denom).collect();
        let total: f64 = variances.iter().sum();
        if total <= 0.0 {
            log::warn!(
                "feature matrix has zero total variance; explained-variance ratios set to 0"
            );
        }

        let mut components = Array2::<f64>::zeros((cols, n_components));
        let mut ratios = Array1::<f64>::zeros(n_components);

        for (c, &k) in order.iter().take(n_components).enumerate() {
            let pivot = v_t
                .row(k)
                .iter()
                .copied()
                .fold(0.0f64, |acc, v| if v.abs() > acc.abs() { v } else { acc });
            let sign = if pivot < 0.0 { -1.0 } else { 1.0 };

            for j in 0..cols {
                components[[j, c]] = sign * v_t[(k, j)];
            }
            ratios[c] = if total > 0.0 { variances[k] / total } else { 0.0 };
        }

        log::info!(
            "PCA fit on {}x{} features: {} components explain {:.2}% of variance",
            rows,
            cols,
            n_components,
            100.0 * ratios.sum()
        );

        Ok(&*self.model.insert(PcaModel {
            mean,
            components,
            explained_variance_ratio: ratios,
        }))
    }

    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.fitted("transform")?.transform(x)
    }

    pub fn fit_transform(&mut self, x: &Array2<f64>, n_components: usize) -> Result<Array2<f64>> {
        self.fit(x, n_components)?;
        self.transform(x)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.fitted("save")?.save(path)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_model(PcaModel::load(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_features(rows: usize, seed: u64) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        // Anisotropic: column j scaled by 1/(j+1)
        Array2::from_shape_fn((rows, BETTI_FEATURE_DIM), |(_, j)| {
            rng.random_range(-1.0..1.0) / (j + 1) as f64
        })
    }

    #[test]
    fn test_single_direction() {
        let mut x = Array2::<f64>::zeros((4, BETTI_FEATURE_DIM));
        for (i, v) in [-1.0, 0.0, 1.0, 2.0].into_iter().enumerate() {
            x[[i, 0]] = v;
            x[[i, 7]] = 3.0;
        }

        let mut pca = PcaReducer::new();
        let projected = pca.fit_transform(&x, 1).unwrap();
        let model = pca.model().unwrap();

        assert_abs_diff_eq!(model.mean()[0], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(model.mean()[7], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(model.components()[[0, 0]], 1.0, epsilon = 1e-10);
        assert_abs_diff_eq!(model.explained_variance_ratio()[0], 1.0, epsilon = 1e-10);

        for (i, expected) in [-1.5, -0.5, 0.5, 1.5].into_iter().enumerate() {
            assert_abs_diff_eq!(projected[[i, 0]], expected, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_components_orthonormal_and_ratios_ordered() {
        let x = random_features(60, 11);
        let mut pca = PcaReducer::new();
        let model = pca.fit(&x, 6).unwrap();

        let gram = model.components().t().dot(model.components());
        for i in 0..6 {
            for j in 0..6 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(gram[[i, j]], expected, epsilon = 1e-10);
            }
        }

        let ratios = model.explained_variance_ratio();
        assert!(ratios.iter().all(|&r| r >= 0.0));
        assert!(ratios.sum() <= 1.0 + 1e-12);
        for w in ratios.as_slice().unwrap().windows(2) {
            assert!(w[0] >= w[1]);
        }
    }

    #[test]
    fn test_full_rank_ratios_sum_to_one() {
        let x = random_features(50, 3);
        let mut pca = PcaReducer::new();
        let model = pca.fit(&x, BETTI_FEATURE_DIM).unwrap();
        assert_abs_diff_eq!(model.explained_variance_ratio().sum(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_refit_is_deterministic() {
        let x = random_features(40, 5);
        let mut a = PcaReducer::new();
        let mut b = PcaReducer::new();
        assert_eq!(a.fit_transform(&x, 4).unwrap(), b.fit_transform(&x, 4).unwrap());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pca_model.bin");
        let x = random_features(30, 9);

        let mut pca = PcaReducer::new();
        let expected = pca.fit_transform(&x, 5).unwrap();
        pca.save(&path).unwrap();

        let loaded = PcaReducer::load(&path).unwrap();
        assert!(loaded.is_fitted());
        assert_eq!(loaded.model(), pca.model());
        assert_eq!(loaded.transform(&x).unwrap(), expected);
    }

    #[test]
    fn test_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pca_model.bin");
        let mut pca = PcaReducer::new();
        pca.fit(&random_features(10, 1), 2).unwrap();
        pca.save(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let d = BETTI_FEATURE_DIM;
        assert_eq!(bytes.len(), 4 + 4 + 8 * d + 8 + 8 * d * 2 + 4 + 8 * 2);
        assert_eq!(&bytes[0..4], &2i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &(d as i32).to_le_bytes());
    }

    #[test]
    fn test_truncated_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pca_model.bin");
        let mut pca = PcaReducer::new();
        pca.fit(&random_features(10, 2), 3).unwrap();
        pca.save(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 8]).unwrap();
        assert!(matches!(PcaReducer::load(&path), Err(Error::TruncatedFile { .. })));
    }

    #[test]
    fn test_not_fitted() {
        let pca = PcaReducer::new();
        let x = random_features(3, 0);

        let err = pca.transform(&x).unwrap_err();
        assert!(matches!(err, Error::NotFitted("transform")));
        assert_eq!(err.to_string(), "transform called before fit() or load()");
        assert!(matches!(pca.save("unused.bin"), Err(Error::NotFitted("save"))));
    }

    #[test]
    fn test_dimension_checks() {
        let mut pca = PcaReducer::new();
        let narrow = Array2::<f64>::zeros((10, 12));
        assert!(matches!(
            pca.fit(&narrow, 2),
            Err(Error::FeatureDimensionMismatch { expected: 35, found: 12 })
        ));

        let x = random_features(5, 4);
        assert!(matches!(pca.fit(&x, 6), Err(Error::InvalidParameter(_))));
        let single_row = x.slice(ndarray::s![..1, ..]).to_owned();
        assert!(matches!(pca.fit(&single_row, 1), Err(Error::InvalidParameter(_))));

        pca.fit(&x, 2).unwrap();
        assert!(matches!(
            pca.transform(&narrow),
            Err(Error::FeatureDimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_constant_features() {
        let x = Array2::<f64>::from_elem((4, BETTI_FEATURE_DIM), 2.0);
        let mut pca = PcaReducer::new();
        let model = pca.fit(&x, 2).unwrap();
        assert_eq!(model.explained_variance_ratio().to_vec(), vec![0.0, 0.0]);
    }
}

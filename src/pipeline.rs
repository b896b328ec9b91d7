//! Dataset Pipeline
//!
//! Structures are identified as `<base>_<variant>` (e.g. `12_3` is the third
//! defect variant of base structure 12; a bare `12` is variant 0). Every
//! structure is featurized independently, the per-structure matrices are
//! stacked in id order, and one PCA model is fit over all atoms.
//!
//! Output layout of [`process_dataset`]:
//!
//! ```text
//! <output>/betti/<base>_<variant>.bin   one N×35 matrix per structure
//! <output>/pca_model.bin                dataset-wide PCA model
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ndarray::{concatenate, Array2, ArrayView2, Axis};
use rayon::prelude::*;

use crate::config::{Parallelism, PipelineConfig};
use crate::crystal::Structure;
use crate::error::{Error, Result};
use crate::io::save_feature_matrix;
use crate::pca::PcaReducer;
use crate::topology::{BettiFeatureExtractor, PersistenceBackend, BETTI_FEATURE_DIM};

/// File name of the dataset-wide PCA model
pub const PCA_MODEL_FILE: &str = "pca_model.bin";

/// Subdirectory holding per-structure feature matrices
pub const BETTI_DIR: &str = "betti";

/// `<base>_<variant>` identifier, ordered numerically by (base, variant)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StructureId {
    pub base: u32,
    pub variant: u32,
}

impl StructureId {
    pub fn new(base: u32, variant: u32) -> Self {
        Self { base, variant }
    }

    /// Parse `"12_3"` or `"12"` (variant 0)
    pub fn parse(id: &str) -> Result<Self> {
        let number = |part: &str| {
            part.parse::<u32>().map_err(|_| {
                Error::InvalidParameter(format!("structure id '{}' is not <base>_<variant>", id))
            })
        };

        match id.split_once('_') {
            Some((base, variant)) => Ok(Self::new(number(base)?, number(variant)?)),
            None => Ok(Self::new(number(id)?, 0)),
        }
    }

    /// Id from a file stem, e.g. `betti/12_3.bin`
    pub fn from_path(path: &Path) -> Result<Self> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::InvalidParameter(format!("no file stem in {}", path.display())))?;
        Self::parse(stem)
    }

    /// `<base>_<variant>.bin`
    pub fn file_name(&self) -> String {
        format!("{}.bin", self)
    }
}

impl FromStr for StructureId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for StructureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.base, self.variant)
    }
}

/// Number of variants per base structure
pub fn variants_per_base<'a>(
    ids: impl IntoIterator<Item = &'a StructureId>,
) -> BTreeMap<u32, usize> {
    let mut counts = BTreeMap::new();
    for id in ids {
        *counts.entry(id.base).or_insert(0) += 1;
    }
    counts
}

/// N×35 features for every structure, returned in id order
///
/// With `across_structures` each structure runs on its own rayon worker;
/// the extractor should then be sequential at the atom level.
pub fn featurize_structures<B: PersistenceBackend>(
    extractor: &BettiFeatureExtractor<B>,
    structures: &[(StructureId, Structure)],
    across_structures: bool,
) -> Result<Vec<(StructureId, Array2<f64>)>> {
    if across_structures && extractor.parallel_atoms() {
        log::warn!("parallelizing both structures and atoms; workers will share one pool");
    }

    let mut ordered: Vec<&(StructureId, Structure)> = structures.iter().collect();
    ordered.sort_by_key(|(id, _)| *id);

    let run = |(id, structure): &(StructureId, Structure)| -> Result<(StructureId, Array2<f64>)> {
        let features = extractor.structure_features(structure)?;
        log::debug!("{}: {} atoms featurized", id, structure.num_atoms());
        Ok((*id, features))
    };

    if across_structures {
        ordered.into_par_iter().map(|entry| run(entry)).collect()
    } else {
        let per_base = variants_per_base(ordered.iter().map(|(id, _)| id));
        let total = ordered.len();
        let mut current_base = None;

        ordered
            .into_iter()
            .enumerate()
            .map(|(i, entry)| {
                if current_base != Some(entry.0.base) {
                    current_base = Some(entry.0.base);
                    log::info!(
                        "[{}/{}] processing structure {} ({} variants)",
                        i + 1,
                        total,
                        entry.0.base,
                        per_base.get(&entry.0.base).copied().unwrap_or(0)
                    );
                }
                run(entry)
            })
            .collect()
    }
}

/// Stack per-structure matrices row-wise into one [ΣN, 35] matrix
pub fn stack_feature_matrices(matrices: &[Array2<f64>]) -> Result<Array2<f64>> {
    if let Some(bad) = matrices.iter().find(|m| m.ncols() != BETTI_FEATURE_DIM) {
        return Err(Error::FeatureDimensionMismatch {
            expected: BETTI_FEATURE_DIM,
            found: bad.ncols(),
        });
    }
    if matrices.is_empty() {
        return Ok(Array2::zeros((0, BETTI_FEATURE_DIM)));
    }

    let views: Vec<ArrayView2<f64>> = matrices.iter().map(|m| m.view()).collect();
    concatenate(Axis(0), &views).map_err(|e| Error::ShapeMismatch(e.to_string()))
}

/// Fit one PCA model over the whole dataset
pub fn fit_dataset_pca(features: &Array2<f64>, n_components: usize) -> Result<PcaReducer> {
    log::info!("fitting PCA on {} atoms...", features.nrows());
    let mut pca = PcaReducer::new();
    pca.fit(features, n_components)?;
    Ok(pca)
}

/// What [`process_dataset`] produced
#[derive(Debug)]
pub struct DatasetReport {
    pub ids: Vec<StructureId>,
    pub total_atoms: usize,
    pub pca: PcaReducer,
    pub feature_files: Vec<PathBuf>,
    pub model_file: PathBuf,
}

impl DatasetReport {
    /// Sum of explained-variance ratios of the kept components
    pub fn explained_variance(&self) -> f64 {
        self.pca
            .model()
            .map(|m| m.explained_variance_ratio().sum())
            .unwrap_or(0.0)
    }
}

/// Featurize, save per-structure matrices, fit and save the PCA model
pub fn process_dataset(
    structures: &[(StructureId, Structure)],
    config: &PipelineConfig,
    output_dir: impl AsRef<Path>,
) -> Result<DatasetReport> {
    config.validate()?;
    let output_dir = output_dir.as_ref();
    let betti_dir = output_dir.join(BETTI_DIR);
    std::fs::create_dir_all(&betti_dir).map_err(|e| Error::io(&betti_dir, e))?;

    log::info!(
        "found {} structures from {} base structures",
        structures.len(),
        variants_per_base(structures.iter().map(|(id, _)| id)).len()
    );

    let extractor = BettiFeatureExtractor::from_config(&config.features)?;
    let across = config.features.parallelism == Parallelism::Structures;
    let featurized = featurize_structures(&extractor, structures, across)?;

    let mut feature_files = Vec::with_capacity(featurized.len());
    for (id, features) in &featurized {
        let path = betti_dir.join(id.file_name());
        save_feature_matrix(&path, features)?;
        feature_files.push(path);
    }

    let (ids, matrices): (Vec<StructureId>, Vec<Array2<f64>>) = featurized.into_iter().unzip();
    let all_features = stack_feature_matrices(&matrices)?;
    let pca = fit_dataset_pca(&all_features, config.pca.n_components)?;

    let model_file = output_dir.join(PCA_MODEL_FILE);
    pca.save(&model_file)?;

    let report = DatasetReport {
        ids,
        total_atoms: all_features.nrows(),
        pca,
        feature_files,
        model_file,
    };
    log::info!(
        "processed {} structures, {} atoms, explained variance {:.4}",
        report.ids.len(),
        report.total_atoms,
        report.explained_variance()
    );
    Ok(report)
}

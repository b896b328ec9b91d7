//! Fit the dataset-wide PCA model from saved Betti feature matrices.
//!
//! Reads every `<base>_<variant>.bin` in a directory (as written by
//! `save_feature_matrix`), stacks them in (base, variant) order and saves
//! `pca_model.bin`.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use crystal_tda::pipeline::{variants_per_base, PCA_MODEL_FILE};
use crystal_tda::{
    fit_dataset_pca, load_feature_matrix, stack_feature_matrices, PipelineConfig, StructureId,
};

#[derive(Parser, Debug)]
#[command(name = "fit_pca", about = "Fit PCA over per-structure Betti feature matrices")]
struct Args {
    /// Directory of <base>_<variant>.bin feature matrices
    #[arg(value_name = "BETTI_DIR")]
    input: PathBuf,

    /// Output model path (default: <BETTI_DIR>/../pca_model.bin)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Pipeline configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override [pca] n_components
    #[arg(short = 'n', long)]
    components: Option<usize>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(n) = args.components {
        config.pca.n_components = n;
    }
    config.validate()?;

    let mut entries = Vec::new();
    for entry in std::fs::read_dir(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?
    {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("bin") {
            continue;
        }
        match StructureId::from_path(&path) {
            Ok(id) => entries.push((id, path)),
            Err(e) => log::warn!("skipping {}: {}", path.display(), e),
        }
    }
    if entries.is_empty() {
        bail!("no <base>_<variant>.bin files in {}", args.input.display());
    }
    entries.sort();

    let per_base = variants_per_base(entries.iter().map(|(id, _)| id));
    log::info!(
        "found {} feature matrices from {} base structures",
        entries.len(),
        per_base.len()
    );

    let mut matrices = Vec::with_capacity(entries.len());
    for (id, path) in &entries {
        let features = load_feature_matrix(path)
            .with_context(|| format!("loading features of structure {}", id))?;
        matrices.push(features);
    }

    let all_features = stack_feature_matrices(&matrices)?;
    let pca = fit_dataset_pca(&all_features, config.pca.n_components)?;

    let output = match args.output {
        Some(path) => path,
        None => args
            .input
            .parent()
            .map(|p| p.join(PCA_MODEL_FILE))
            .unwrap_or_else(|| PathBuf::from(PCA_MODEL_FILE)),
    };
    pca.save(&output)?;

    if let Some(model) = pca.model() {
        log::info!("total atoms: {}", all_features.nrows());
        log::info!(
            "PCA explained variance ratio: {:.4}",
            model.explained_variance_ratio().sum()
        );
    }
    log::info!("model written to {}", output.display());

    Ok(())
}

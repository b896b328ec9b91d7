//! Rock-Salt Vacancy Dataset: Betti Features + PCA
//!
//! Builds a small synthetic defect dataset from a NaCl supercell (intact,
//! Na vacancy, Cl vacancy; ideal and thermally rattled), extracts the 35
//! per-atom Betti features for every structure and fits one PCA model over
//! all atoms.
//!
//! Atoms next to a vacancy lose part of their first coordination shell, so
//! their local H₀/H₁ statistics separate from bulk atoms along the leading
//! principal components.

use anyhow::Result;
use clap::Parser;
use nalgebra::{Matrix3, Vector3};
use ndarray::Axis;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crystal_tda::{
    featurize_structures, fit_dataset_pca, stack_feature_matrices, BettiFeatureExtractor,
    NeighborConfig, PeriodicNeighborIndex, Structure, StructureId,
};

#[derive(Parser, Debug)]
#[command(name = "rocksalt_betti", about = "Betti features of a synthetic NaCl vacancy dataset")]
struct Args {
    /// Conventional lattice constant (Å)
    #[arg(long, default_value_t = 5.64)]
    lattice: f64,

    /// Topological cutoff (Å)
    #[arg(long, default_value_t = 4.2)]
    cutoff: f64,

    /// Supercell repetitions along each axis
    #[arg(long, default_value_t = 2)]
    repeat: usize,

    /// Gaussian rattle amplitude for the thermal variants (Å)
    #[arg(long, default_value_t = 0.05)]
    sigma: f64,

    /// Principal components to keep
    #[arg(long, default_value_t = 6)]
    components: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn rocksalt_cell(a: f64) -> Result<Structure> {
    let na = [
        Vector3::new(0.0, 0.0, 0.0),
        Vector3::new(0.5, 0.5, 0.0),
        Vector3::new(0.5, 0.0, 0.5),
        Vector3::new(0.0, 0.5, 0.5),
    ];
    let cl: Vec<Vector3<f64>> = na.iter().map(|p| p + Vector3::new(0.5, 0.0, 0.0)).collect();

    let frac: Vec<Vector3<f64>> = na.iter().copied().chain(cl).collect();
    let elements = [0, 0, 0, 0, 1, 1, 1, 1];

    Ok(Structure::with_symbols(
        Matrix3::from_diagonal_element(a),
        &frac,
        &elements,
        vec!["Na".into(), "Cl".into()],
    )?)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    println!("═══════════════════════════════════════════════════════════════");
    println!("  Crystal-TDA: Rock-Salt Vacancy Dataset");
    println!("  Periodic Neighbors → Persistent Homology → PCA");
    println!("═══════════════════════════════════════════════════════════════\n");

    let bulk = rocksalt_cell(args.lattice)?.supercell(args.repeat, args.repeat, args.repeat)?;
    let n_na = bulk.count(0)?;
    let first_cl = bulk
        .atoms()
        .iter()
        .position(|a| a.element == 1)
        .ok_or_else(|| anyhow::anyhow!("supercell has no Cl site"))?;

    println!("System Parameters:");
    let r = args.repeat;
    println!("  a = {:.3} Å, {}×{}×{} supercell", args.lattice, r, r, r);
    println!("  N = {} atoms ({} Na, {} Cl)", bulk.num_atoms(), n_na, bulk.count(1)?);
    println!("  r_cutoff = {:.2} Å", args.cutoff);
    println!("  σ_rattle = {:.3} Å", args.sigma);
    println!();

    // First coordination shell of the intact crystal
    let shell_config = NeighborConfig {
        r_cutoff: args.cutoff,
        max_neighbors: 6,
        ..NeighborConfig::default()
    };
    let graph = PeriodicNeighborIndex::from_config(&bulk, &shell_config)?;
    let shell = graph.neighbors(0)?;
    println!("Neighbors of Na(0):");
    for nb in shell {
        println!(
            "  → {:>2} {:<2}  d = {:.4} Å",
            nb.index,
            bulk.symbols()[bulk.atoms()[nb.index].element],
            nb.distance
        );
    }
    println!();

    // Dataset: base 1 = ideal, base 2 = rattled; variant 0 intact, 1 Na vacancy, 2 Cl vacancy
    let mut rng = StdRng::seed_from_u64(args.seed);
    let thermal = bulk.rattled(args.sigma, &mut rng)?;

    let mut structures = Vec::new();
    for (base, parent) in [(1, &bulk), (2, &thermal)] {
        structures.push((StructureId::new(base, 0), parent.clone()));
        structures.push((StructureId::new(base, 1), parent.without_atom(0)?));
        structures.push((StructureId::new(base, 2), parent.without_atom(first_cl)?));
    }

    println!("══════════════════════════════════════════════════════════════");
    println!("  Betti Features");
    println!("══════════════════════════════════════════════════════════════\n");

    let extractor = BettiFeatureExtractor::new(args.cutoff)?;
    let featurized = featurize_structures(&extractor, &structures, true)?;

    println!("ID     atoms   ⟨H0 death⟩  ⟨H1 persistence⟩  ⟨H2 persistence⟩");
    println!("──────────────────────────────────────────────────────────────");
    for (id, features) in &featurized {
        let mean = features
            .mean_axis(Axis(0))
            .ok_or_else(|| anyhow::anyhow!("structure {} has no atoms", id))?;
        println!(
            "{:<6} {:>5}   {:>10.4}  {:>16.4}  {:>16.4}",
            id.to_string(),
            features.nrows(),
            mean[0],
            mean[5],
            mean[20]
        );
    }

    println!("\n══════════════════════════════════════════════════════════════");
    println!("  PCA over all atoms");
    println!("══════════════════════════════════════════════════════════════\n");

    let matrices: Vec<_> = featurized.iter().map(|(_, f)| f.clone()).collect();
    let all_features = stack_feature_matrices(&matrices)?;
    let pca = fit_dataset_pca(&all_features, args.components)?;

    if let Some(model) = pca.model() {
        let ratios = model.explained_variance_ratio();
        for (k, r) in ratios.iter().enumerate() {
            println!("  PC{}: {:6.2}%", k + 1, 100.0 * r);
        }
        println!("  Total: {:.2}%", 100.0 * ratios.sum());
    }

    // Vacancy neighbors against bulk along PC1
    println!("\nPC1 spread per structure:");
    for (id, features) in &featurized {
        let projected = pca.transform(features)?;
        let pc1 = projected.column(0);
        let min = pc1.iter().copied().fold(f64::INFINITY, f64::min);
        let max = pc1.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        println!("  {:<6} [{:+.4}, {:+.4}]", id.to_string(), min, max);
    }

    println!("\n═══════════════════════════════════════════════════════════════");
    println!("  Analysis Complete");
    println!("═══════════════════════════════════════════════════════════════");

    Ok(())
}

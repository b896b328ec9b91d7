//! Pipeline Configuration
//!
//! serde-based TOML configuration for neighbor search, topological feature
//! extraction and PCA. Every section is optional and falls back to defaults.
//!
//! # Example TOML
//! ```toml
//! [neighbors]
//! r_cutoff = 8.0
//! max_neighbors = 12
//!
//! [features]
//! r_cutoff = 6.0
//! parallelism = { mode = "persistence", threads = 4 }
//!
//! [pca]
//! n_components = 6
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::neighbors::PeriodicNeighborIndex;

/// Where threads are spent during feature extraction
///
/// Only one extraction level is parallel, so structure, atom and persistence
/// workers never oversubscribe each other. Building a neighbor index always
/// queries atoms on the global rayon pool; it runs before extraction and
/// nests inside structure workers without spawning extra threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Parallelism {
    /// Structures and atoms in order, single-threaded persistence
    #[default]
    Sequential,
    /// Whole structures spread over the global rayon pool
    Structures,
    /// Atoms spread over the global rayon pool
    Atoms,
    /// Atoms in order, persistence with its own bounded pool
    Persistence { threads: usize },
}

/// Root configuration
///
/// `[neighbors]` configures graph neighbor lists
/// ([`PeriodicNeighborIndex::from_config`]); topological features always
/// search at `[features] r_cutoff` without a neighbor cap.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Graph neighbor lists
    #[serde(default)]
    pub neighbors: NeighborConfig,

    /// Topological descriptors
    #[serde(default)]
    pub features: FeatureConfig,

    /// Dataset-wide reduction
    #[serde(default)]
    pub pca: PcaConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeighborConfig {
    pub r_cutoff: f64,
    pub max_neighbors: usize,
    pub epsilon: f64,
}

impl Default for NeighborConfig {
    fn default() -> Self {
        Self {
            r_cutoff: PeriodicNeighborIndex::DEFAULT_CUTOFF,
            max_neighbors: PeriodicNeighborIndex::DEFAULT_MAX_NEIGHBORS,
            epsilon: PeriodicNeighborIndex::DEFAULT_EPSILON,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Topological cutoff (Å), used as both neighbor radius and filtration threshold
    ///
    /// The 10 Å default gives local clouds of ~200 atoms in dense crystals,
    /// where one atom takes seconds; 4-6 Å covers the first shells.
    pub r_cutoff: f64,
    pub parallelism: Parallelism,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            r_cutoff: 10.0,
            parallelism: Parallelism::Sequential,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcaConfig {
    pub n_components: usize,
}

impl Default for PcaConfig {
    fn default() -> Self {
        Self { n_components: 6 }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        log::debug!("loaded configuration from {}", path.display());
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Serialize back to TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Semantic checks beyond parsing
    pub fn validate(&self) -> Result<()> {
        self.neighbors.validate()?;
        self.features.validate()?;
        self.pca.validate()
    }
}

fn check_cutoff(section: &str, r_cutoff: f64) -> Result<()> {
    if r_cutoff.is_finite() && r_cutoff > 0.0 {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "[{}] r_cutoff must be positive and finite, got {}",
            section, r_cutoff
        )))
    }
}

impl NeighborConfig {
    pub fn validate(&self) -> Result<()> {
        check_cutoff("neighbors", self.r_cutoff)?;
        if self.max_neighbors == 0 {
            return Err(Error::Config("[neighbors] max_neighbors must be at least 1".into()));
        }
        if !(self.epsilon.is_finite() && self.epsilon >= 0.0) {
            return Err(Error::Config(format!(
                "[neighbors] epsilon must be non-negative, got {}",
                self.epsilon
            )));
        }
        Ok(())
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> Result<()> {
        check_cutoff("features", self.r_cutoff)?;
        if let Parallelism::Persistence { threads: 0 } = self.parallelism {
            return Err(Error::Config(
                "[features] persistence parallelism needs at least 1 thread".into(),
            ));
        }
        Ok(())
    }
}

impl PcaConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_components == 0 {
            return Err(Error::Config("[pca] n_components must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.neighbors.r_cutoff, 10.0);
        assert_eq!(config.neighbors.max_neighbors, 20);
        assert_eq!(config.neighbors.epsilon, 1e-10);
        assert_eq!(config.features.parallelism, Parallelism::Sequential);
        assert_eq!(config.pca.n_components, 6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = PipelineConfig::from_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_partial_sections() {
        let config = PipelineConfig::from_str(
            r#"
            [features]
            r_cutoff = 6.5
            parallelism = { mode = "persistence", threads = 4 }

            [pca]
            n_components = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.features.r_cutoff, 6.5);
        assert_eq!(config.features.parallelism, Parallelism::Persistence { threads: 4 });
        assert_eq!(config.pca.n_components, 3);
        assert_eq!(config.neighbors, NeighborConfig::default());
    }

    #[test]
    fn test_structures_mode() {
        let toml = "[features]\nparallelism = { mode = \"structures\" }";
        let config = PipelineConfig::from_str(toml).unwrap();
        assert_eq!(config.features.parallelism, Parallelism::Structures);
    }

    #[test]
    fn test_atoms_mode() {
        let config = PipelineConfig::from_str(
            r#"
            [features.parallelism]
            mode = "atoms"
            "#,
        )
        .unwrap();
        assert_eq!(config.features.parallelism, Parallelism::Atoms);
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = PipelineConfig::default();
        config.features.parallelism = Parallelism::Persistence { threads: 2 };
        config.neighbors.max_neighbors = 12;

        let text = config.to_toml().unwrap();
        assert_eq!(PipelineConfig::from_str(&text).unwrap(), config);
    }

    #[test]
    fn test_validation_failures() {
        let mut config = PipelineConfig::default();
        config.features.r_cutoff = -1.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = PipelineConfig::default();
        config.features.parallelism = Parallelism::Persistence { threads: 0 };
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.pca.n_components = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.neighbors.max_neighbors = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(
            PipelineConfig::from_str("[pca]\nn_components = \"six\""),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[neighbors]\nr_cutoff = 4.5").unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.neighbors.r_cutoff, 4.5);

        let missing = PipelineConfig::from_file("/nonexistent/crystal_tda.toml");
        assert!(matches!(missing, Err(Error::Io { .. })));
    }
}

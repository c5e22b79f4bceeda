use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::classifier::KnownFunction;
use crate::reconcile::ReconcileScope;
use crate::run::{Coverage, RunSettings};
use crate::solver::DEFAULT_MAX_ITERATIONS;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnsafeDropConfig {
    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub reconcile: ReconcileConfig,

    #[serde(default)]
    pub classifier: ClassifierConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct AnalysisConfig {
    #[serde(default = "default_entry_points", alias = "entry_points")]
    pub entry_points: Vec<String>,

    #[serde(default = "default_parallel")]
    pub parallel: bool,

    #[serde(default)]
    pub coverage: Coverage,

    #[serde(default = "default_max_iterations", alias = "max_iterations")]
    pub max_iterations: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            entry_points: default_entry_points(),
            parallel: default_parallel(),
            coverage: Coverage::default(),
            max_iterations: default_max_iterations(),
        }
    }
}

impl AnalysisConfig {
    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            entry_points: self.entry_points.clone(),
            coverage: self.coverage,
            parallel: self.parallel,
            max_iterations: self.max_iterations,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconcileConfig {
    #[serde(default)]
    pub scope: ReconcileScope,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassifierConfig {
    /// Extra curated entries; they override builtins of the same name.
    #[serde(default)]
    pub known: Vec<KnownFunction>,
}

fn default_entry_points() -> Vec<String> {
    vec!["main".to_string()]
}

fn default_parallel() -> bool {
    true
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

pub const DEFAULT_CONFIG_FILE_NAME: &str = "unsafe-drop.toml";

pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
    let mut cur = Some(start_dir);
    while let Some(dir) = cur {
        let candidate = dir.join(DEFAULT_CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        cur = dir.parent();
    }
    None
}

pub fn parse_config(raw: &str) -> Result<UnsafeDropConfig> {
    let cfg: UnsafeDropConfig = toml::from_str(raw)?;
    anyhow::ensure!(
        !cfg.analysis.entry_points.is_empty(),
        "`analysis.entry-points` must name at least one function"
    );
    anyhow::ensure!(
        cfg.analysis.max_iterations > 0,
        "`analysis.max-iterations` must be positive"
    );
    for entry in &cfg.classifier.known {
        entry
            .validate()
            .map_err(|msg| anyhow::anyhow!("invalid `classifier.known` entry {msg}"))?;
    }
    Ok(cfg)
}

pub fn load_config_file(path: &Path) -> Result<UnsafeDropConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    parse_config(&raw).with_context(|| format!("failed to parse config file: {}", path.display()))
}

/// Explicit path wins; otherwise search upwards from `start_dir`.
pub fn load_config(
    explicit_path: Option<&Path>,
    start_dir: &Path,
) -> Result<Option<(PathBuf, UnsafeDropConfig)>> {
    if let Some(p) = explicit_path {
        let cfg = load_config_file(p)?;
        return Ok(Some((p.to_path_buf(), cfg)));
    }

    let Some(p) = find_config_file(start_dir) else {
        return Ok(None);
    };
    let cfg = load_config_file(&p)?;
    Ok(Some((p, cfg)))
}

use crate::corpus::MinimizationStrategy;
use crate::discovery::DiscoveryOptions;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Allocation key used when a target's package has no entry of its own.
pub const DEFAULT_ALLOCATION_KEY: &str = "default";

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct HarnessSettings {
    #[serde(default = "default_program")]
    pub program: PathBuf,
}

fn default_program() -> PathBuf {
    PathBuf::from("go")
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            program: default_program(),
        }
    }
}

/// Settings for one fuzzing campaign. Loaded once and not changed while the
/// campaign runs.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CampaignConfig {
    /// Package selection patterns handed to the package lister.
    #[serde(default = "default_packages")]
    pub packages: Vec<String>,
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
    #[serde(default = "default_corpus_dir")]
    pub corpus_dir: PathBuf,
    /// Where crash artifacts are preserved after the run workspace is removed.
    #[serde(default = "default_crash_dir")]
    pub crash_dir: PathBuf,
    /// When set, a JSON report of the campaign is written here.
    #[serde(default)]
    pub report_dir: Option<PathBuf>,
    /// Global time budget in seconds, split across targets by `time_allocation`.
    #[serde(default = "default_fuzz_time_secs")]
    pub fuzz_time_secs: u64,
    /// Passed through to the harness as its worker count.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Fraction of the global budget per package, with a `"default"` fallback.
    #[serde(default = "default_time_allocation")]
    pub time_allocation: HashMap<String, f64>,
    #[serde(default)]
    pub minimization: MinimizationStrategy,
    #[serde(default)]
    pub changed_only: bool,
    #[serde(default = "default_git_ref")]
    pub git_ref: String,
    #[serde(default)]
    pub harness: HarnessSettings,
}

fn default_packages() -> Vec<String> {
    vec!["./...".to_string()]
}
fn default_root_dir() -> PathBuf {
    PathBuf::from(".")
}
pub fn default_corpus_dir() -> PathBuf {
    PathBuf::from("./fuzz-corpus")
}
fn default_crash_dir() -> PathBuf {
    PathBuf::from("./fuzz-crashes")
}
pub fn default_fuzz_time_secs() -> u64 {
    300
}
pub fn default_parallelism() -> usize {
    4
}
fn default_time_allocation() -> HashMap<String, f64> {
    HashMap::from([(DEFAULT_ALLOCATION_KEY.to_string(), 1.0)])
}
fn default_git_ref() -> String {
    "HEAD~1".to_string()
}

impl CampaignConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: CampaignConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        for (package, fraction) in &self.time_allocation {
            if !fraction.is_finite() || *fraction < 0.0 {
                anyhow::bail!(
                    "time allocation for '{}' must be a non-negative number, got {}",
                    package,
                    fraction
                );
            }
        }
        if self.parallelism == 0 {
            anyhow::bail!("parallelism must be at least 1");
        }
        Ok(())
    }

    pub fn fuzz_time(&self) -> Duration {
        Duration::from_secs(self.fuzz_time_secs)
    }

    /// Fraction of the global budget for `package`: its own entry, else the
    /// `"default"` entry, else 0.
    pub fn allocation_for(&self, package: &str) -> f64 {
        self.time_allocation
            .get(package)
            .or_else(|| self.time_allocation.get(DEFAULT_ALLOCATION_KEY))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn discovery_options(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            root_dir: self.root_dir.clone(),
            patterns: self.packages.clone(),
            changed_only: self.changed_only,
            reference: self.git_ref.clone(),
        }
    }
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            packages: default_packages(),
            root_dir: default_root_dir(),
            corpus_dir: default_corpus_dir(),
            crash_dir: default_crash_dir(),
            report_dir: None,
            fuzz_time_secs: default_fuzz_time_secs(),
            parallelism: default_parallelism(),
            time_allocation: default_time_allocation(),
            minimization: MinimizationStrategy::default(),
            changed_only: false,
            git_ref: default_git_ref(),
            harness: HarnessSettings::default(),
        }
    }
}

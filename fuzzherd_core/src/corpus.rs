use crate::fsutil;
use crate::harness::{Harness, HarnessMode, HarnessRequest};
use crate::target::{Target, TargetKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Time budget handed to the harness for one minimization pass.
pub const MINIMIZE_BUDGET: Duration = Duration::from_secs(10);

/// Defines errors that can arise during corpus operations.
#[derive(Error, Debug)]
pub enum CorpusError {
    /// An I/O error occurred while creating, reading or copying into the
    /// persistent corpus tree. Contains a description including the path.
    #[error("Corpus I/O error: {0}")]
    Io(String),

    /// The harness's minimization mode failed or could not be started.
    /// Entries copied before minimization ran stay in place.
    #[error("Corpus minimization failed: {0}")]
    Minimization(String),
}

impl From<std::io::Error> for CorpusError {
    fn from(err: std::io::Error) -> Self {
        CorpusError::Io(err.to_string())
    }
}

/// How a target's corpus is reduced after new entries are imported.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MinimizationStrategy {
    /// Never minimize; the corpus only grows.
    #[default]
    None,
    /// Delegate to the harness's coverage-preserving minimization mode.
    Coverage,
}

impl fmt::Display for MinimizationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MinimizationStrategy::None => "none",
            MinimizationStrategy::Coverage => "coverage",
        })
    }
}

impl FromStr for MinimizationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(MinimizationStrategy::None),
            "coverage" => Ok(MinimizationStrategy::Coverage),
            other => Err(format!(
                "unknown minimization strategy '{other}' (expected 'none' or 'coverage')"
            )),
        }
    }
}

/// Outcome of one [`CorpusManager::import_entries`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Entries copied into the persistent directory.
    pub copied: usize,
    /// Entries skipped because a file of the same name already existed.
    pub skipped: usize,
}

/// Owns the persistent, per-target corpus tree below `base_dir`.
///
/// Each target gets `<base_dir>/<sanitized package>/<name>/` holding flat
/// input files named by the harness. Deduplication is by file name only.
///
/// Nothing here locks the tree: two managers sharing a `base_dir` can race on
/// directory creation and on copying the same file name.
pub struct CorpusManager {
    base_dir: PathBuf,
    /// Resolved directories, filled lazily by [`CorpusManager::resolve_directory`].
    target_dirs: HashMap<TargetKey, PathBuf>,
    minimization: MinimizationStrategy,
    harness: Rc<dyn Harness>,
}

impl CorpusManager {
    /// Creates the manager, creating `base_dir` if it does not exist yet.
    pub fn new(
        base_dir: impl Into<PathBuf>,
        minimization: MinimizationStrategy,
        harness: Rc<dyn Harness>,
    ) -> Result<Self, CorpusError> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).map_err(|e| {
            CorpusError::Io(format!(
                "Failed to create corpus directory at {:?}: {}",
                base_dir, e
            ))
        })?;
        Ok(Self {
            base_dir,
            target_dirs: HashMap::new(),
            minimization,
            harness,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Returns the persistent directory for `target`, creating it on first
    /// use. Later calls for the same `(package, name)` return the cached path
    /// without touching the filesystem.
    pub fn resolve_directory(&mut self, target: &Target) -> Result<PathBuf, CorpusError> {
        let key = target.key();
        if let Some(dir) = self.target_dirs.get(&key) {
            return Ok(dir.clone());
        }

        let dir = self
            .base_dir
            .join(target.sanitized_package())
            .join(&target.name);
        fs::create_dir_all(&dir).map_err(|e| {
            CorpusError::Io(format!(
                "Failed to create corpus directory for {} at {:?}: {}",
                target, dir, e
            ))
        })?;
        debug!(fuzz_target = %target, dir = ?dir, "resolved corpus directory");
        self.target_dirs.insert(key, dir.clone());
        Ok(dir)
    }

    /// Copies the non-directory entries of `source_dir` into the target's
    /// persistent directory. An entry whose name already exists there is
    /// skipped without comparing content.
    ///
    /// With [`MinimizationStrategy::Coverage`] the corpus is minimized
    /// afterwards; a minimization failure is returned as the error of this
    /// call even though the copies already happened.
    pub fn import_entries(
        &mut self,
        target: &Target,
        source_dir: &Path,
    ) -> Result<ImportSummary, CorpusError> {
        let target_dir = self.resolve_directory(target)?;
        let entries = fs::read_dir(source_dir).map_err(|e| {
            CorpusError::Io(format!(
                "Failed to read new entries directory {:?}: {}",
                source_dir, e
            ))
        })?;

        let mut summary = ImportSummary::default();
        for entry in entries {
            let entry = entry.map_err(|e| {
                CorpusError::Io(format!("Error reading entry in {:?}: {}", source_dir, e))
            })?;
            if entry.file_type()?.is_dir() {
                continue;
            }
            let dst = target_dir.join(entry.file_name());
            if dst.exists() {
                summary.skipped += 1;
                continue;
            }
            fs::copy(entry.path(), &dst).map_err(|e| {
                CorpusError::Io(format!(
                    "Failed to copy corpus entry {:?} to {:?}: {}",
                    entry.path(),
                    dst,
                    e
                ))
            })?;
            summary.copied += 1;
        }
        debug!(
            fuzz_target = %target,
            copied = summary.copied,
            skipped = summary.skipped,
            "imported corpus entries"
        );

        if self.minimization == MinimizationStrategy::Coverage {
            self.minimize(target)?;
        }
        Ok(summary)
    }

    /// Runs the harness's minimization mode over the target's persistent
    /// directory. Does nothing under [`MinimizationStrategy::None`].
    pub fn minimize(&mut self, target: &Target) -> Result<(), CorpusError> {
        if self.minimization == MinimizationStrategy::None {
            return Ok(());
        }
        let dir = self.resolve_directory(target)?;
        let request = HarnessRequest {
            target,
            mode: HarnessMode::Minimize {
                budget: MINIMIZE_BUDGET,
            },
            cache_root: &dir,
        };
        let outcome = self
            .harness
            .invoke(&request)
            .map_err(|e| CorpusError::Minimization(e.to_string()))?;
        if !outcome.success {
            let code = outcome
                .exit_code
                .map_or_else(|| "a signal".to_string(), |c| format!("code {c}"));
            warn!(fuzz_target = %target, "minimization exited with {code}");
            return Err(CorpusError::Minimization(format!(
                "harness exited with {code} for {target}"
            )));
        }
        info!(fuzz_target = %target, "corpus minimized");
        Ok(())
    }

    /// Number of input files currently stored for `target`.
    pub fn entry_count(&mut self, target: &Target) -> Result<usize, CorpusError> {
        let dir = self.resolve_directory(target)?;
        Ok(fsutil::count_files(&dir))
    }
}

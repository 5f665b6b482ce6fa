use crate::config::CampaignConfig;
use crate::corpus::{CorpusError, CorpusManager};
use crate::fsutil;
use crate::harness::{Harness, HarnessError, HarnessMode, HarnessRequest};
use crate::target::Target;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Subdirectory of the run workspace holding the staged corpus.
pub const WORKSPACE_CORPUS_DIR: &str = "corpus";
/// Subdirectory of the run workspace where the harness writes crash inputs.
pub const CRASHERS_DIR: &str = "crashers";
/// Files in the crashers directory with this suffix are harness diagnostics,
/// not inputs.
pub const SIDECAR_SUFFIX: &str = ".output";
/// Maximum length kept of a failing run's output.
pub const DIAGNOSTIC_LIMIT: usize = 1024;

/// Orchestration failures. These abort the current target and, in
/// [`FuzzEngine::run_all`], every target after it. A harness reporting a
/// failing fuzz test is not one of these.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The scratch workspace could not be created or populated.
    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error(transparent)]
    Corpus(#[from] CorpusError),

    #[error(transparent)]
    Harness(#[from] HarnessError),

    /// Adds the failing target's identity to an error from `run_all`.
    #[error("failed to run target {target}: {source}")]
    Target {
        target: String,
        #[source]
        source: Box<EngineError>,
    },
}

/// Outcome of one completed run. Never modified after creation.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub target: Rc<Target>,
    /// Wall-clock time spent in the harness.
    pub duration: Duration,
    pub success: bool,
    /// Harness output, truncated to [`DIAGNOSTIC_LIMIT`]. Empty on success.
    pub error_message: String,
    /// Preserved crash inputs, sorted by file name. Sidecars are not listed.
    pub crash_inputs: Vec<PathBuf>,
    /// Entries present in the workspace corpus after the run. This counts
    /// everything staged plus everything new, not only the delta.
    pub new_corpus_items: usize,
    /// Reserved. Coverage is not measured, so this is always `None`.
    pub coverage: Option<f64>,
}

/// Drives one isolated harness run per target, strictly in order.
pub struct FuzzEngine {
    config: CampaignConfig,
    targets: Vec<Rc<Target>>,
    corpus: CorpusManager,
    harness: Rc<dyn Harness>,
    results: Vec<RunResult>,
    workspace_parent: Option<PathBuf>,
}

impl FuzzEngine {
    pub fn new(
        config: CampaignConfig,
        targets: impl IntoIterator<Item = Target>,
        harness: Rc<dyn Harness>,
    ) -> Result<Self, EngineError> {
        let corpus = CorpusManager::new(&config.corpus_dir, config.minimization, harness.clone())?;
        Ok(Self {
            config,
            targets: targets.into_iter().map(Rc::new).collect(),
            corpus,
            harness,
            results: Vec::new(),
            workspace_parent: None,
        })
    }

    /// Creates run workspaces under `dir` instead of the system temp directory.
    pub fn with_workspace_parent(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace_parent = Some(dir.into());
        self
    }

    pub fn targets(&self) -> &[Rc<Target>] {
        &self.targets
    }

    pub fn results(&self) -> &[RunResult] {
        &self.results
    }

    /// Runs every target in discovery order. The first orchestration error
    /// stops the loop; results appended before it are kept.
    pub fn run_all(&mut self) -> Result<(), EngineError> {
        let targets = self.targets.clone();
        for target in &targets {
            let result = self.run_target(target).map_err(|e| EngineError::Target {
                target: target.to_string(),
                source: Box::new(e),
            })?;
            self.results.push(result);
        }
        Ok(())
    }

    /// `global budget × fraction`, where the fraction is the package's own
    /// allocation, else the `"default"` allocation, else 0.
    pub fn target_budget(&self, target: &Target) -> Duration {
        let fraction = self.config.allocation_for(&target.package);
        if !fraction.is_finite() || fraction <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(self.config.fuzz_time().as_secs_f64() * fraction)
            .unwrap_or(Duration::MAX)
    }

    /// Stages the corpus, runs the harness, harvests results and removes the
    /// workspace. Harness test failures are returned as a result with
    /// `success == false`; only orchestration failures are errors.
    pub fn run_target(&mut self, target: &Rc<Target>) -> Result<RunResult, EngineError> {
        // Dropping the TempDir removes the workspace on every return path.
        let workspace = self.create_workspace()?;
        let ws = workspace.path();

        let persistent = self.corpus.resolve_directory(target)?;
        let staged_corpus = ws.join(WORKSPACE_CORPUS_DIR);
        let staged = fsutil::copy_dir_recursive(&persistent, &staged_corpus).map_err(|e| {
            EngineError::Workspace(format!(
                "Failed to copy corpus {:?} into {:?}: {}",
                persistent, staged_corpus, e
            ))
        })?;
        fs::create_dir_all(ws.join(CRASHERS_DIR)).map_err(|e| {
            EngineError::Workspace(format!("Failed to create crashers directory: {}", e))
        })?;

        let budget = self.target_budget(target);
        info!(fuzz_target = %target, ?budget, staged, "fuzzing");

        let start = Instant::now();
        let outcome = self.harness.invoke(&HarnessRequest {
            target,
            mode: HarnessMode::Fuzz {
                budget,
                parallelism: self.config.parallelism,
            },
            cache_root: ws,
        });
        let duration = start.elapsed();
        let outcome = outcome?;

        let mut result = RunResult {
            target: Rc::clone(target),
            duration,
            success: outcome.success,
            error_message: String::new(),
            crash_inputs: Vec::new(),
            new_corpus_items: 0,
            coverage: None,
        };

        if !outcome.success {
            result.error_message = truncate(&outcome.output, DIAGNOSTIC_LIMIT);
            // Preservation failures must not cost the corpus import below.
            result.crash_inputs = match self.preserve_crashers(target, &ws.join(CRASHERS_DIR)) {
                Ok(paths) => paths,
                Err(e) => {
                    warn!(fuzz_target = %target, error = %e, "crash inputs not preserved");
                    Vec::new()
                }
            };
            warn!(
                fuzz_target = %target,
                exit_code = ?outcome.exit_code,
                crashers = result.crash_inputs.len(),
                "fuzz target failed"
            );
        }

        self.corpus.import_entries(target, &staged_corpus)?;
        result.new_corpus_items = fsutil::count_entries(&staged_corpus).unwrap_or(0);

        info!(
            fuzz_target = %target,
            success = result.success,
            duration = ?result.duration,
            corpus_items = result.new_corpus_items,
            "run finished"
        );
        debug!(workspace = ?ws, "removing workspace");
        Ok(result)
    }

    fn create_workspace(&self) -> Result<TempDir, EngineError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("fuzz-run-");
        let created = match &self.workspace_parent {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        };
        created.map_err(|e| EngineError::Workspace(format!("Failed to create temp directory: {}", e)))
    }

    /// Copies everything in `crashers` (inputs and sidecars) to the crash
    /// directory for `target` and returns the preserved input paths.
    fn preserve_crashers(&self, target: &Target, crashers: &Path) -> Result<Vec<PathBuf>, EngineError> {
        let names = crash_input_names(crashers)
            .map_err(|e| EngineError::Workspace(format!("Failed to scan {:?}: {}", crashers, e)))?;
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let dest = self
            .config
            .crash_dir
            .join(target.sanitized_package())
            .join(&target.name);
        fsutil::copy_dir_recursive(crashers, &dest).map_err(|e| {
            EngineError::Workspace(format!(
                "Failed to preserve crashers {:?} into {:?}: {}",
                crashers, dest, e
            ))
        })?;
        Ok(names.into_iter().map(|n| dest.join(n)).collect())
    }
}

/// Names of crash inputs in `dir`, sorted, excluding diagnostic sidecars.
/// A missing directory has no crash inputs.
pub fn crash_input_names(dir: &Path) -> std::io::Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(SIDECAR_SUFFIX) || entry.file_type()?.is_dir() {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

/// Cuts `s` to at most `max_len` bytes on a char boundary, ending in `...`
/// when anything was removed.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len.saturating_sub(3);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

use crate::target::Target;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Environment variable `go test` reads for its fuzz cache root.
pub const FUZZ_CACHE_ENV: &str = "GOFUZZCACHE";

/// The harness process could not be run or waited on. A process that ran
/// and exited non-zero is a [`HarnessOutcome`], not this error.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Failed to spawn harness '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("Failed to collect output of harness '{program}': {reason}")]
    Output { program: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessMode {
    /// Normal fuzzing run bounded by `budget`, with `parallelism` workers.
    Fuzz { budget: Duration, parallelism: usize },
    /// Corpus minimization bounded by `budget`. Output is discarded.
    Minimize { budget: Duration },
}

/// One invocation of the external harness against a target.
#[derive(Debug, Clone)]
pub struct HarnessRequest<'a> {
    pub target: &'a Target,
    pub mode: HarnessMode,
    /// Directory the harness uses as its cache/corpus root.
    pub cache_root: &'a Path,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarnessOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Combined stdout and stderr. Empty in minimize mode.
    pub output: String,
}

/// The external stochastic test harness.
pub trait Harness {
    fn invoke(&self, request: &HarnessRequest<'_>) -> Result<HarnessOutcome, HarnessError>;
}

/// [`Harness`] that shells out to `go test -fuzz`.
#[derive(Debug, Clone)]
pub struct GoTestHarness {
    program: PathBuf,
}

impl GoTestHarness {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Builds the command line for `request` without running it.
    pub fn command(&self, request: &HarnessRequest<'_>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["test", "-run", "^$"])
            .arg("-fuzz")
            .arg(format!("^{}$", request.target.name));
        match request.mode {
            HarnessMode::Fuzz {
                budget,
                parallelism,
            } => {
                cmd.arg("-fuzztime")
                    .arg(fuzztime_arg(budget))
                    .arg("-parallel")
                    .arg(parallelism.to_string());
            }
            HarnessMode::Minimize { budget } => {
                cmd.arg("-fuzztime")
                    .arg(fuzztime_arg(budget))
                    .arg("-fuzzminimizetime")
                    .arg(fuzztime_arg(budget));
            }
        }
        cmd.arg(&request.target.package)
            .env(FUZZ_CACHE_ENV, request.cache_root);
        cmd
    }
}

impl Harness for GoTestHarness {
    fn invoke(&self, request: &HarnessRequest<'_>) -> Result<HarnessOutcome, HarnessError> {
        let mut cmd = self.command(request);
        debug!(command = ?cmd, fuzz_target = %request.target, "invoking harness");
        let spawn_err = |e: std::io::Error| HarnessError::Spawn {
            program: self.program.display().to_string(),
            reason: e.to_string(),
        };

        match request.mode {
            HarnessMode::Minimize { .. } => {
                let status = cmd
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .map_err(spawn_err)?;
                Ok(HarnessOutcome {
                    success: status.success(),
                    exit_code: status.code(),
                    output: String::new(),
                })
            }
            HarnessMode::Fuzz { .. } => {
                // stdout and stderr share one pipe so output keeps write order.
                let (mut reader, writer) = io::pipe().map_err(spawn_err)?;
                let stderr_writer = writer.try_clone().map_err(spawn_err)?;
                let mut child = cmd
                    .stdin(Stdio::null())
                    .stdout(writer)
                    .stderr(stderr_writer)
                    .spawn()
                    .map_err(spawn_err)?;
                // The command still holds the write ends; reading would never see EOF.
                drop(cmd);

                let output_err = |e: io::Error| HarnessError::Output {
                    program: self.program.display().to_string(),
                    reason: e.to_string(),
                };
                let mut raw = Vec::new();
                reader.read_to_end(&mut raw).map_err(output_err)?;
                let status = child.wait().map_err(output_err)?;
                Ok(HarnessOutcome {
                    success: status.success(),
                    exit_code: status.code(),
                    output: String::from_utf8_lossy(&raw).into_owned(),
                })
            }
        }
    }
}

/// Formats a budget for `-fuzztime`. `go test` treats a zero duration as
/// "no limit", so a zero budget becomes a single iteration.
pub fn fuzztime_arg(budget: Duration) -> String {
    if budget.is_zero() {
        "1x".to_string()
    } else {
        format!("{}ms", budget.as_millis().max(1))
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use std::cell::RefCell;
    use std::fs;

    /// What a scripted invocation does inside the cache root before exiting.
    #[derive(Debug, Clone, Default)]
    pub struct Script {
        pub success: bool,
        pub output: String,
        pub corpus_files: Vec<(String, Vec<u8>)>,
        pub crashers: Vec<String>,
    }

    /// In-process harness that replays scripts per call and records requests.
    #[derive(Default)]
    pub struct ScriptedHarness {
        pub scripts: RefCell<Vec<Script>>,
        pub calls: RefCell<Vec<(String, HarnessMode, PathBuf)>>,
        /// Corpus files seen in the staged workspace at invocation time.
        pub staged: RefCell<Vec<Vec<String>>>,
        pub refuse_spawn: bool,
    }

    impl ScriptedHarness {
        pub fn with_scripts(scripts: Vec<Script>) -> Self {
            Self {
                scripts: RefCell::new(scripts),
                ..Default::default()
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.borrow().len()
        }
    }

    impl Harness for ScriptedHarness {
        fn invoke(&self, request: &HarnessRequest<'_>) -> Result<HarnessOutcome, HarnessError> {
            if self.refuse_spawn {
                return Err(HarnessError::Spawn {
                    program: "scripted".into(),
                    reason: "refused".into(),
                });
            }
            self.calls.borrow_mut().push((
                request.target.to_string(),
                request.mode,
                request.cache_root.to_path_buf(),
            ));
            let corpus = request.cache_root.join("corpus");
            let mut staged: Vec<String> = fs::read_dir(&corpus)
                .map(|rd| {
                    rd.filter_map(|e| e.ok())
                        .map(|e| e.file_name().to_string_lossy().into_owned())
                        .collect()
                })
                .unwrap_or_default();
            staged.sort();
            self.staged.borrow_mut().push(staged);

            let script = {
                let mut scripts = self.scripts.borrow_mut();
                if scripts.is_empty() {
                    Script {
                        success: true,
                        ..Default::default()
                    }
                } else {
                    scripts.remove(0)
                }
            };
            for (name, bytes) in &script.corpus_files {
                fs::create_dir_all(&corpus).unwrap();
                fs::write(corpus.join(name), bytes).unwrap();
            }
            if !script.crashers.is_empty() {
                let crashers = request.cache_root.join("crashers");
                fs::create_dir_all(&crashers).unwrap();
                for name in &script.crashers {
                    fs::write(crashers.join(name), name.as_bytes()).unwrap();
                }
            }
            Ok(HarnessOutcome {
                success: script.success,
                exit_code: Some(if script.success { 0 } else { 1 }),
                output: script.output,
            })
        }
    }
}

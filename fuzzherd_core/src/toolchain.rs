//! Subprocess-backed implementations of the discovery capabilities.

use crate::discovery::{ChangeDetector, DiscoveryError, PackageLister};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Runs `cmd` and returns its stdout, mapping spawn failures and non-zero
/// exits through `wrap`.
fn run_for_stdout(
    mut cmd: Command,
    wrap: fn(String) -> DiscoveryError,
) -> Result<String, DiscoveryError> {
    debug!(command = ?cmd, "running");
    let output = cmd
        .output()
        .map_err(|e| wrap(format!("Failed to spawn {:?}: {}", cmd.get_program(), e)))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(wrap(format!(
            "{:?} exited with {}: {}",
            cmd.get_program(),
            output.status,
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn non_empty_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty())
}

/// [`PackageLister`] backed by `go list`.
#[derive(Debug, Clone)]
pub struct GoPackageLister {
    program: PathBuf,
}

impl GoPackageLister {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl PackageLister for GoPackageLister {
    fn list_packages(&self, root: &Path, patterns: &[String]) -> Result<Vec<String>, DiscoveryError> {
        let mut packages = Vec::new();
        for pattern in patterns {
            let mut cmd = Command::new(&self.program);
            cmd.arg("list").arg(pattern).current_dir(root);
            let stdout = run_for_stdout(cmd, DiscoveryError::PackageListing)?;
            packages.extend(non_empty_lines(&stdout).map(String::from));
        }
        Ok(packages)
    }

    fn package_dir(&self, root: &Path, package: &str) -> Result<PathBuf, DiscoveryError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["list", "-f", "{{.Dir}}", package]).current_dir(root);
        let stdout = run_for_stdout(cmd, DiscoveryError::PackageListing)?;
        non_empty_lines(&stdout)
            .next()
            .map(PathBuf::from)
            .ok_or_else(|| {
                DiscoveryError::PackageListing(format!("no directory reported for {package}"))
            })
    }
}

/// [`ChangeDetector`] backed by `git diff --name-only`.
#[derive(Debug, Clone)]
pub struct GitChangeDetector {
    program: PathBuf,
}

impl GitChangeDetector {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }
}

impl Default for GitChangeDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeDetector for GitChangeDetector {
    fn changed_files(
        &self,
        root: &Path,
        reference: &str,
        file: &Path,
    ) -> Result<Vec<PathBuf>, DiscoveryError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["diff", "--name-only", reference, "--"])
            .arg(file)
            .current_dir(root);
        let stdout = run_for_stdout(cmd, DiscoveryError::ChangeDetection)?;
        Ok(non_empty_lines(&stdout).map(PathBuf::from).collect())
    }
}

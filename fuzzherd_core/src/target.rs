use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// A fuzzable entry point found during discovery.
///
/// Targets are immutable once created. Identity is the `(package, name)` pair,
/// see [`Target::key`].
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Package identifier as reported by the package lister (e.g. `example.com/pkg/codec`).
    pub package: String,
    /// Entry-point name passed to the harness.
    pub name: String,
    /// Source file holding the declaration.
    pub file_path: PathBuf,
    /// Name of the declared function. Equal to `name` for targets found by discovery.
    pub func_name: String,
    /// Leading documentation text of the declaration, if it had any.
    pub description: Option<String>,
}

/// Identity of a [`Target`]: owning package plus entry-point name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetKey {
    pub package: String,
    pub name: String,
}

impl Target {
    pub fn new(package: impl Into<String>, name: impl Into<String>, file_path: PathBuf) -> Self {
        let name = name.into();
        Self {
            package: package.into(),
            func_name: name.clone(),
            name,
            file_path,
            description: None,
        }
    }

    pub fn key(&self) -> TargetKey {
        TargetKey {
            package: self.package.clone(),
            name: self.name.clone(),
        }
    }

    /// Filesystem-safe form of the package identifier, used for per-target
    /// directories under the corpus and crash roots.
    pub fn sanitized_package(&self) -> String {
        sanitize_package(&self.package)
    }

    /// Returns true when `selector` names this target, either by package
    /// (`pkg/codec`) or by qualified name (`pkg/codec.FuzzDecode`).
    pub fn matches_selector(&self, selector: &str) -> bool {
        selector == self.package || selector == self.to_string()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.package, self.name)
    }
}

pub fn sanitize_package(package: &str) -> String {
    package.replace(['/', '\\'], "_")
}

use crate::source::GoSourceParser;
use crate::target::Target;
use crate::toolchain::{GitChangeDetector, GoPackageLister};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Errors that abort a discovery pass. No partial target list is returned
/// when any of these occurs.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// The package lister could not resolve the selection patterns.
    #[error("Failed to list packages: {0}")]
    PackageListing(String),

    /// A test source file could not be parsed into declarations.
    #[error("Failed to parse {file} (line {line}): {message}")]
    Parse {
        file: String,
        line: usize,
        message: String,
    },

    /// The change detector failed for a declaring file.
    #[error("Failed to check changes: {0}")]
    ChangeDetection(String),

    /// Reading a package directory or source file failed.
    #[error("Discovery I/O error: {0}")]
    Io(String),

    /// Wraps a failure inside one package with the package's identifier.
    #[error("Failed to find targets in {package}: {source}")]
    Package {
        package: String,
        #[source]
        source: Box<DiscoveryError>,
    },
}

/// Static shape of one parameter type, as far as target matching needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeExpr {
    Pointer(Box<TypeExpr>),
    /// A plain or package-qualified type name: `int`, `testing.F`.
    Named {
        qualifier: Option<String>,
        name: String,
    },
    /// Any other type, kept as text for diagnostics.
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: Option<String>,
    pub ty: TypeExpr,
}

/// One top-level function declaration reported by a [`SourceParser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub name: String,
    pub params: Vec<Param>,
    pub doc: Option<String>,
    /// Declarations with a receiver are never targets.
    pub is_method: bool,
    pub line: usize,
}

/// Resolves selection patterns to package identifiers and package directories.
pub trait PackageLister {
    fn list_packages(&self, root: &Path, patterns: &[String]) -> Result<Vec<String>, DiscoveryError>;
    fn package_dir(&self, root: &Path, package: &str) -> Result<PathBuf, DiscoveryError>;
}

/// Turns one source file into its list of top-level declarations.
pub trait SourceParser {
    fn parse_file(&self, path: &Path) -> Result<Vec<Declaration>, DiscoveryError>;
}

/// File-level diff query against a version-control reference.
pub trait ChangeDetector {
    /// Returns the paths among `file` that differ from `reference`. An empty
    /// list means unchanged.
    fn changed_files(
        &self,
        root: &Path,
        reference: &str,
        file: &Path,
    ) -> Result<Vec<PathBuf>, DiscoveryError>;
}

/// Which declarations count as fuzz targets: a name prefix plus the type of
/// the single harness-control parameter, which must be a pointer to
/// `context_type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuzzSignature {
    pub name_prefix: String,
    pub context_qualifier: Option<String>,
    pub context_type: String,
}

impl Default for FuzzSignature {
    /// `func FuzzXxx(f *testing.F)`
    fn default() -> Self {
        Self {
            name_prefix: "Fuzz".to_string(),
            context_qualifier: Some("testing".to_string()),
            context_type: "F".to_string(),
        }
    }
}

impl FuzzSignature {
    pub fn matches(&self, decl: &Declaration) -> bool {
        if decl.is_method || !decl.name.starts_with(&self.name_prefix) {
            return false;
        }
        let [param] = decl.params.as_slice() else {
            return false;
        };
        match &param.ty {
            TypeExpr::Pointer(inner) => matches!(
                inner.as_ref(),
                TypeExpr::Named { qualifier, name }
                    if *qualifier == self.context_qualifier && *name == self.context_type
            ),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub root_dir: PathBuf,
    pub patterns: Vec<String>,
    pub changed_only: bool,
    pub reference: String,
}

/// Finds fuzz targets in a source tree through injected capabilities.
pub struct TargetDiscoverer {
    lister: Box<dyn PackageLister>,
    parser: Box<dyn SourceParser>,
    changes: Box<dyn ChangeDetector>,
    signature: FuzzSignature,
    test_file_suffix: String,
}

impl TargetDiscoverer {
    pub fn new(
        lister: Box<dyn PackageLister>,
        parser: Box<dyn SourceParser>,
        changes: Box<dyn ChangeDetector>,
    ) -> Self {
        Self {
            lister,
            parser,
            changes,
            signature: FuzzSignature::default(),
            test_file_suffix: "_test.go".to_string(),
        }
    }

    /// Discoverer backed by `go list`, the in-process Go scanner and `git diff`.
    pub fn go(go_program: impl Into<PathBuf>) -> Self {
        Self::new(
            Box::new(GoPackageLister::new(go_program)),
            Box::new(GoSourceParser::new()),
            Box::new(GitChangeDetector::new()),
        )
    }

    pub fn with_signature(mut self, signature: FuzzSignature) -> Self {
        self.signature = signature;
        self
    }

    /// Runs one discovery pass. Output order is package enumeration order,
    /// then file name order, then declaration order within each file.
    /// Overlapping patterns can yield the same target twice; no dedup is done.
    pub fn discover(&self, options: &DiscoveryOptions) -> Result<Vec<Target>, DiscoveryError> {
        let packages = self
            .lister
            .list_packages(&options.root_dir, &options.patterns)?;
        debug!(count = packages.len(), "resolved packages");

        let mut targets = Vec::new();
        for package in &packages {
            let found = self
                .targets_in_package(&options.root_dir, package)
                .map_err(|e| DiscoveryError::Package {
                    package: package.clone(),
                    source: Box::new(e),
                })?;
            targets.extend(found);
        }

        if options.changed_only {
            let mut kept = Vec::with_capacity(targets.len());
            for target in targets {
                let changed =
                    self.changes
                        .changed_files(&options.root_dir, &options.reference, &target.file_path)?;
                if changed.is_empty() {
                    debug!(fuzz_target = %target, reference = %options.reference, "unchanged, skipping");
                } else {
                    kept.push(target);
                }
            }
            targets = kept;
        }

        info!(
            packages = packages.len(),
            targets = targets.len(),
            "discovery finished"
        );
        Ok(targets)
    }

    fn targets_in_package(&self, root: &Path, package: &str) -> Result<Vec<Target>, DiscoveryError> {
        let dir = self.lister.package_dir(root, package)?;
        let mut targets = Vec::new();
        for file in self.test_files(&dir)? {
            for decl in self.parser.parse_file(&file)? {
                if !self.signature.matches(&decl) {
                    continue;
                }
                let mut target = Target::new(package, decl.name, file.clone());
                target.description = decl.doc.filter(|d| !d.is_empty());
                targets.push(target);
            }
        }
        Ok(targets)
    }

    fn test_files(&self, dir: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
        let entries = fs::read_dir(dir).map_err(|e| {
            DiscoveryError::Io(format!("Failed to read package directory {:?}: {}", dir, e))
        })?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                DiscoveryError::Io(format!("Error reading entry in {:?}: {}", dir, e))
            })?;
            let path = entry.path();
            let is_test = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(&self.test_file_suffix));
            if is_test && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}


#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use super::*;
    use std::collections::HashSet;
    use tempfile::tempdir;

    fn options(changed_only: bool) -> DiscoveryOptions {
        DiscoveryOptions {
            root_dir: PathBuf::from("."),
            patterns: vec!["./...".to_string()],
            changed_only,
            reference: "HEAD~1".to_string(),
        }
    }

    fn harness_signature() -> FuzzSignature {
        FuzzSignature {
            name_prefix: "Fuzz".into(),
            context_qualifier: None,
            context_type: "HarnessF".into(),
        }
    }

    #[test]
    fn fuzz_function_with_doc_becomes_target() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("foo_test.go"),
            "package foo\n\n// finds foo bugs\nfunc FuzzFoo(f *HarnessF) {}\n\nfunc NotAFuzzFunc(x int) {}\n",
        )
        .unwrap();
        fs::write(dir.path().join("foo.go"), "package foo\nfunc FuzzIgnored(f *HarnessF) {}\n").unwrap();

        let discoverer = TargetDiscoverer::new(
            Box::new(StaticLister {
                packages: vec![("pkg/foo".into(), dir.path().to_path_buf())],
                fail: false,
            }),
            Box::new(GoSourceParser::new()),
            Box::new(StaticChanges::default()),
        )
        .with_signature(harness_signature());

        let targets = discoverer.discover(&options(false)).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].package, "pkg/foo");
        assert_eq!(targets[0].name, "FuzzFoo");
        assert_eq!(targets[0].func_name, "FuzzFoo");
        assert_eq!(targets[0].description.as_deref(), Some("finds foo bugs"));
        assert_eq!(targets[0].file_path, dir.path().join("foo_test.go"));
    }

    #[test]
    fn signature_rejects_wrong_shapes() {
        let sig = FuzzSignature::default();
        let ptr = |q: Option<&str>, n: &str| Param {
            name: Some("f".into()),
            ty: TypeExpr::Pointer(Box::new(TypeExpr::Named {
                qualifier: q.map(String::from),
                name: n.into(),
            })),
        };
        let decl = |name: &str, params: Vec<Param>, is_method: bool| Declaration {
            name: name.into(),
            params,
            doc: None,
            is_method,
            line: 1,
        };
        assert!(sig.matches(&decl("FuzzA", vec![ptr(Some("testing"), "F")], false)));
        assert!(!sig.matches(&decl("FuzzA", vec![ptr(Some("testing"), "T")], false)));
        assert!(!sig.matches(&decl("TestA", vec![ptr(Some("testing"), "F")], false)));
        assert!(!sig.matches(&decl("FuzzA", vec![ptr(Some("testing"), "F")], true)));
        assert!(!sig.matches(&decl(
            "FuzzA",
            vec![ptr(Some("testing"), "F"), ptr(Some("testing"), "F")],
            false
        )));
        assert!(!sig.matches(&decl(
            "FuzzA",
            vec![Param {
                name: None,
                ty: TypeExpr::Named {
                    qualifier: Some("testing".into()),
                    name: "F".into()
                }
            }],
            false
        )));
    }

    #[test]
    fn order_follows_packages_then_files_then_declarations() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        fs::write(
            a.path().join("z_test.go"),
            "package a\nfunc FuzzZ2(f *testing.F) {}\nfunc FuzzZ1(f *testing.F) {}\n",
        )
        .unwrap();
        fs::write(a.path().join("m_test.go"), "package a\nfunc FuzzM(f *testing.F) {}\n").unwrap();
        fs::write(b.path().join("b_test.go"), "package b\nfunc FuzzB(f *testing.F) {}\n").unwrap();

        let discoverer = TargetDiscoverer::new(
            Box::new(StaticLister {
                packages: vec![
                    ("pkg/b".into(), b.path().to_path_buf()),
                    ("pkg/a".into(), a.path().to_path_buf()),
                ],
                fail: false,
            }),
            Box::new(GoSourceParser::new()),
            Box::new(StaticChanges::default()),
        );
        let names: Vec<String> = discoverer
            .discover(&options(false))
            .unwrap()
            .into_iter()
            .map(|t| t.to_string())
            .collect();
        assert_eq!(
            names,
            vec!["pkg/b.FuzzB", "pkg/a.FuzzM", "pkg/a.FuzzZ2", "pkg/a.FuzzZ1"]
        );
    }

    #[test]
    fn one_bad_file_aborts_the_whole_pass() {
        let good = tempdir().unwrap();
        let bad = tempdir().unwrap();
        fs::write(good.path().join("g_test.go"), "package g\nfunc FuzzG(f *testing.F) {}\n").unwrap();
        fs::write(bad.path().join("b_test.go"), "package b\nfunc FuzzB(f *testing.F) {\n").unwrap();

        let discoverer = TargetDiscoverer::new(
            Box::new(StaticLister {
                packages: vec![
                    ("pkg/good".into(), good.path().to_path_buf()),
                    ("pkg/bad".into(), bad.path().to_path_buf()),
                ],
                fail: false,
            }),
            Box::new(GoSourceParser::new()),
            Box::new(StaticChanges::default()),
        );
        match discoverer.discover(&options(false)) {
            Err(DiscoveryError::Package { package, source }) => {
                assert_eq!(package, "pkg/bad");
                assert!(matches!(*source, DiscoveryError::Parse { .. }));
            }
            other => panic!("expected package error, got {other:?}"),
        }
    }

    #[test]
    fn listing_failure_is_a_discovery_error() {
        let discoverer = TargetDiscoverer::new(
            Box::new(StaticLister {
                packages: Vec::new(),
                fail: true,
            }),
            Box::new(GoSourceParser::new()),
            Box::new(StaticChanges::default()),
        );
        assert!(matches!(
            discoverer.discover(&options(false)),
            Err(DiscoveryError::PackageListing(_))
        ));
    }

    #[test]
    fn changed_only_keeps_targets_whose_file_differs() {
        let dir = tempdir().unwrap();
        let changed = dir.path().join("changed_test.go");
        let stable = dir.path().join("stable_test.go");
        fs::write(&changed, "package p\nfunc FuzzChanged(f *testing.F) {}\n").unwrap();
        fs::write(&stable, "package p\nfunc FuzzStable(f *testing.F) {}\n").unwrap();

        let detector = StaticChanges {
            changed: HashSet::from([changed.clone()]),
        };
        let discoverer = TargetDiscoverer::new(
            Box::new(StaticLister {
                packages: vec![("pkg/p".into(), dir.path().to_path_buf())],
                fail: false,
            }),
            Box::new(GoSourceParser::new()),
            Box::new(detector),
        );
        let targets = discoverer.discover(&options(true)).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].name, "FuzzChanged");

        let all = discoverer.discover(&options(false)).unwrap();
        assert_eq!(all.len(), 2);
    }
}

//! Loadable resources and their declared dependencies.
//!
//! The host publishes the resources it has loaded through a
//! [`ResourceCatalog`]; the shell replays them through a [`ResourceLoader`]
//! so its shadow evaluator knows the same names the host does.
//!
//! Script resources declare dependencies with header lines:
//!
//! ```text
//! // require: vectors.tsc
//! // require: ../shared/units.tsc
//! ```
//!
//! Paths are relative to the declaring script's directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::eval::{DiagnosticSink, Evaluator};

/// Header prefix declaring a script dependency.
pub const REQUIRE_DIRECTIVE: &str = "// require:";

/// An identifiable loadable unit and the identities it depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    /// Identity string (a file path for script resources).
    pub identity: String,
    /// Identities of the resources this one depends on.
    pub dependencies: Vec<String>,
}

impl ResourceHandle {
    /// Create a handle.
    pub fn new<I, S>(identity: impl Into<String>, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            identity: identity.into(),
            dependencies: dependencies.into_iter().map(Into::into).collect(),
        }
    }
}

/// Errors loading a single resource.
#[derive(Debug, Error)]
pub enum ResourceLoadError {
    /// The resource could not be read.
    #[error("failed to read {identity}: {source}")]
    Io {
        /// Identity of the resource.
        identity: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The resource was read but evaluating it failed.
    #[error("failed to evaluate {identity}: {message}")]
    Eval {
        /// Identity of the resource.
        identity: String,
        /// Rendered evaluation error.
        message: String,
    },
}

/// Source of the host's currently loaded resources.
pub trait ResourceCatalog: Send + Sync {
    /// Snapshot of the loaded resources at the time of the call.
    fn loaded_resources(&self) -> Vec<ResourceHandle>;
}

impl ResourceCatalog for Arc<dyn ResourceCatalog> {
    fn loaded_resources(&self) -> Vec<ResourceHandle> {
        (**self).loaded_resources()
    }
}

/// A fixed set of resources.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    handles: Vec<ResourceHandle>,
}

impl StaticCatalog {
    /// Create a catalog from handles.
    pub fn new(handles: Vec<ResourceHandle>) -> Self {
        Self { handles }
    }
}

impl ResourceCatalog for StaticCatalog {
    fn loaded_resources(&self) -> Vec<ResourceHandle> {
        self.handles.clone()
    }
}

/// Catalog of script files whose dependencies come from `// require:` headers.
///
/// Files are re-read on every call so the listing reflects the scripts as
/// they are when the shell asks.
#[derive(Debug, Clone, Default)]
pub struct FileCatalog {
    paths: Vec<PathBuf>,
}

impl FileCatalog {
    /// Create a catalog over the given script paths.
    pub fn new(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            paths: paths.into_iter().map(|p| normalize(&p)).collect(),
        }
    }

    /// Script paths in configuration order.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl ResourceCatalog for FileCatalog {
    fn loaded_resources(&self) -> Vec<ResourceHandle> {
        self.paths
            .iter()
            .map(|path| {
                let dependencies = match std::fs::read_to_string(path) {
                    Ok(source) => parse_requires(path, &source),
                    Err(e) => {
                        tracing::warn!("Failed to read resource {}: {}", path.display(), e);
                        Vec::new()
                    }
                };
                ResourceHandle {
                    identity: path.display().to_string(),
                    dependencies,
                }
            })
            .collect()
    }
}

/// Parse `// require:` header lines from a script.
///
/// Only the leading block of comment and blank lines is scanned.
pub fn parse_requires(path: &Path, source: &str) -> Vec<String> {
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    source
        .lines()
        .map(str::trim)
        .take_while(|line| line.is_empty() || line.starts_with("//"))
        .filter_map(|line| line.strip_prefix(REQUIRE_DIRECTIVE))
        .map(str::trim)
        .filter(|dep| !dep.is_empty())
        .map(|dep| normalize(&base.join(dep)).display().to_string())
        .collect()
}

/// Canonicalize when the file exists so identities compare equal regardless
/// of how the path was spelled.
fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Loads a resource by identity.
pub trait ResourceLoader {
    /// Load one resource.
    fn load(&mut self, identity: &str) -> Result<(), ResourceLoadError>;
}

/// Loads script resources by evaluating them into an evaluator.
pub struct ScriptLoader<'a> {
    evaluator: &'a dyn Evaluator,
    sink: &'a dyn DiagnosticSink,
}

impl std::fmt::Debug for ScriptLoader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptLoader").finish_non_exhaustive()
    }
}

impl<'a> ScriptLoader<'a> {
    /// Create a loader evaluating into `evaluator`, reporting diagnostics to `sink`.
    pub fn new(evaluator: &'a dyn Evaluator, sink: &'a dyn DiagnosticSink) -> Self {
        Self { evaluator, sink }
    }
}

impl ResourceLoader for ScriptLoader<'_> {
    fn load(&mut self, identity: &str) -> Result<(), ResourceLoadError> {
        let source = std::fs::read_to_string(identity).map_err(|source| ResourceLoadError::Io {
            identity: identity.to_string(),
            source,
        })?;
        let evaluation = self
            .evaluator
            .evaluate(&source, self.sink)
            .map_err(|e| ResourceLoadError::Eval {
                identity: identity.to_string(),
                message: e.render(),
            })?;
        if evaluation.continuation.is_some() {
            return Err(ResourceLoadError::Eval {
                identity: identity.to_string(),
                message: "incomplete script".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::eval::{NullSink, ScriptEvaluator};
    use crate::value::Value;

    #[test]
    fn test_parse_requires_reads_header_only() {
        let source = "// vector helpers\n// require: base.tsc\n\n\
                      // require: ./more.tsc\nx = 1;\n// require: ignored.tsc\n";
        let deps = parse_requires(Path::new("/scripts/vec.tsc"), source);
        assert_eq!(deps, vec!["/scripts/base.tsc", "/scripts/./more.tsc"]);
    }

    #[test]
    fn test_file_catalog_resolves_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base.tsc");
        let top = dir.path().join("top.tsc");
        std::fs::write(&base, "unit = 1;\n").unwrap();
        std::fs::write(&top, "// require: base.tsc\ntwo = unit + 1;\n").unwrap();

        let catalog = FileCatalog::new(vec![top.clone(), base.clone()]);
        assert_eq!(catalog.paths().len(), 2);
        let handles = catalog.loaded_resources();

        let base_id = std::fs::canonicalize(&base).unwrap().display().to_string();
        assert_eq!(handles.len(), 2);
        assert_eq!(handles[0].dependencies, vec![base_id.clone()]);
        assert_eq!(handles[1].identity, base_id);
        assert!(handles[1].dependencies.is_empty());
    }

    #[test]
    fn test_script_loader_defines_names() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("units.tsc");
        std::fs::write(&script, "kilo = 1000;\n").unwrap();

        let evaluator = ScriptEvaluator::new();
        let mut loader = ScriptLoader::new(&evaluator, &NullSink);
        loader.load(&script.display().to_string()).unwrap();

        let evaluation = evaluator.evaluate("kilo * 2;", &NullSink).unwrap();
        assert_eq!(evaluation.value, Some(Value::Int(2000)));
    }

    #[test]
    fn test_script_loader_reports_missing_file() {
        let evaluator = ScriptEvaluator::new();
        let mut loader = ScriptLoader::new(&evaluator, &NullSink);
        let err = loader.load("/nonexistent/nowhere.tsc").unwrap_err();
        assert!(matches!(err, ResourceLoadError::Io { .. }));
    }
}

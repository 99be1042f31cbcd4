//! Resolution of pipeline references.
//!
//! This module provides:
//! - The [`PipelineLookup`] trait used by pipeline inheritance
//! - [`LookupChain`], trying resolvers in order
//! - [`FileLookup`] for JSON files and [`StaticLookup`] for in-memory specs

use crate::errors::LookupError;
use crate::pipeline::PipelineSpec;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Resolves a reference to a pipeline specification.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PipelineLookup: Send + Sync {
    /// Looks up `reference`.
    async fn lookup(&self, reference: &str) -> Result<PipelineSpec, LookupError>;
}

/// Tries each resolver in order; the first success wins.
#[derive(Default, Clone)]
pub struct LookupChain {
    resolvers: Vec<Arc<dyn PipelineLookup>>,
}

impl LookupChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a resolver.
    #[must_use]
    pub fn with(mut self, resolver: Arc<dyn PipelineLookup>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    /// Returns the number of resolvers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    /// Returns true if the chain has no resolver.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

impl std::fmt::Debug for LookupChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookupChain")
            .field("resolvers", &self.resolvers.len())
            .finish()
    }
}

#[async_trait]
impl PipelineLookup for LookupChain {
    async fn lookup(&self, reference: &str) -> Result<PipelineSpec, LookupError> {
        let mut errors = Vec::with_capacity(self.resolvers.len());
        for resolver in &self.resolvers {
            match resolver.lookup(reference).await {
                Ok(spec) => return Ok(spec),
                Err(err) => {
                    debug!(reference, error = %err, "resolver declined");
                    errors.push(err);
                }
            }
        }
        Err(LookupError::Exhausted {
            reference: reference.to_string(),
            errors,
        })
    }
}

/// Reads JSON pipeline files relative to a base directory.
///
/// A reference without extension also matches `<reference>.json`.
#[derive(Debug, Clone)]
pub struct FileLookup {
    base: PathBuf,
}

impl FileLookup {
    /// Resolves references under `base`.
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn candidates(&self, reference: &str) -> Vec<PathBuf> {
        let path = self.base.join(reference);
        if Path::new(reference).extension().is_some() {
            vec![path]
        } else {
            vec![path.with_extension("json"), path]
        }
    }
}

#[async_trait]
impl PipelineLookup for FileLookup {
    async fn lookup(&self, reference: &str) -> Result<PipelineSpec, LookupError> {
        for path in self.candidates(reference) {
            let raw = match tokio::fs::read_to_string(&path).await {
                Ok(raw) => raw,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(LookupError::Io(err.to_string())),
            };

            let mut spec: PipelineSpec =
                serde_json::from_str(&raw).map_err(|e| LookupError::Decode {
                    reference: reference.to_string(),
                    message: e.to_string(),
                })?;
            if spec.name.is_empty() {
                spec.name = reference.to_string();
            }
            return Ok(spec);
        }

        Err(LookupError::NotFound {
            reference: reference.to_string(),
        })
    }
}

/// Serves pipeline specifications registered in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticLookup {
    specs: HashMap<String, PipelineSpec>,
}

impl StaticLookup {
    /// Creates an empty lookup.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `spec` under `reference`.
    #[must_use]
    pub fn with(mut self, reference: impl Into<String>, spec: PipelineSpec) -> Self {
        self.specs.insert(reference.into(), spec);
        self
    }
}

#[async_trait]
impl PipelineLookup for StaticLookup {
    async fn lookup(&self, reference: &str) -> Result<PipelineSpec, LookupError> {
        self.specs
            .get(reference)
            .cloned()
            .ok_or_else(|| LookupError::NotFound {
                reference: reference.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StepSpec;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn spec(name: &str) -> PipelineSpec {
        PipelineSpec::new(name).with_step(StepSpec::new("main"))
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let mut first = MockPipelineLookup::new();
        first.expect_lookup().returning(|reference| {
            Err(LookupError::NotFound {
                reference: reference.to_string(),
            })
        });
        let mut second = MockPipelineLookup::new();
        second
            .expect_lookup()
            .times(1)
            .returning(|_| Ok(spec("from-second")));
        let mut third = MockPipelineLookup::new();
        third.expect_lookup().never();

        let chain = LookupChain::new()
            .with(Arc::new(first))
            .with(Arc::new(second))
            .with(Arc::new(third));

        let found = chain.lookup("ci").await.unwrap();
        assert_eq!(found.name, "from-second");
    }

    #[tokio::test]
    async fn test_exhausted_joins_errors() {
        let chain = LookupChain::new()
            .with(Arc::new(StaticLookup::new()))
            .with(Arc::new(StaticLookup::new()));

        let err = chain.lookup("ci").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "could not lookup ref: \"ci\": pipeline \"ci\" not found; pipeline \"ci\" not found"
        );
    }

    #[tokio::test]
    async fn test_file_lookup() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("build.json"),
            r#"{"steps": [{"name": "main"}]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.json"), "{").unwrap();

        let lookup = FileLookup::new(dir.path());
        let found = lookup.lookup("build").await.unwrap();
        assert_eq!(found.name, "build");
        assert_eq!(found.steps.len(), 1);

        assert!(lookup.lookup("build.json").await.is_ok());
        assert!(matches!(
            lookup.lookup("missing").await,
            Err(LookupError::NotFound { .. })
        ));
        assert!(matches!(
            lookup.lookup("broken").await,
            Err(LookupError::Decode { .. })
        ));
    }

    #[test]
    fn test_static_lookup() {
        let lookup = StaticLookup::new().with("ci", spec("ci"));
        tokio_test::block_on(async {
            let found = tokio_test::assert_ok!(lookup.lookup("ci").await);
            assert_eq!(found, spec("ci"));
            tokio_test::assert_err!(lookup.lookup("other").await);
        });
    }
}

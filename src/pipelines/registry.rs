//! Static table from `(slug, version)` to an algorithm constructor.
//!
//! The table is fixed at compile time. A published `(slug, version)` pair
//! must keep producing the same pixels forever; behavior changes get a new
//! version row instead of editing an existing one.

use serde_json::Value;

use super::{
    AlgorithmIdentity, BetweenTheLines, PencilSketch, Pipeline, PipelineError, PipelineInstance,
    PopPoster, RenderAlgorithm,
};

type Constructor = fn(&Value) -> Result<Pipeline, PipelineError>;

/// One published algorithm version.
#[derive(Debug, Clone, Copy)]
pub struct RegistryEntry {
    pub identity: AlgorithmIdentity,
    construct: Constructor,
}

const STANDARD_ENTRIES: &[RegistryEntry] = &[
    RegistryEntry {
        identity: AlgorithmIdentity {
            slug: "pop-poster",
            name: "PopPoster",
            version: "1.0.0",
        },
        construct: pop_poster_v1,
    },
    RegistryEntry {
        identity: AlgorithmIdentity {
            slug: "pencil-sketch",
            name: "PencilSketch",
            version: "1.0.0",
        },
        construct: pencil_sketch_v1,
    },
    RegistryEntry {
        identity: AlgorithmIdentity {
            slug: "between-the-lines",
            name: "BetweenTheLines",
            version: "1.0.0",
        },
        construct: between_the_lines_v1,
    },
];

fn pop_poster_v1(overrides: &Value) -> Result<Pipeline, PipelineError> {
    PopPoster::with_overrides(overrides).map(Pipeline::PopPoster)
}

fn pencil_sketch_v1(overrides: &Value) -> Result<Pipeline, PipelineError> {
    PencilSketch::with_overrides(overrides).map(Pipeline::PencilSketch)
}

fn between_the_lines_v1(overrides: &Value) -> Result<Pipeline, PipelineError> {
    BetweenTheLines::with_overrides(overrides).map(Pipeline::BetweenTheLines)
}

/// Immutable pipeline registry, built once at startup and shared read-only.
#[derive(Debug, Clone, Copy)]
pub struct PipelineRegistry {
    entries: &'static [RegistryEntry],
}

impl Default for PipelineRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl PipelineRegistry {
    /// Registry with every published algorithm version.
    pub fn standard() -> Self {
        Self {
            entries: STANDARD_ENTRIES,
        }
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        self.entries
    }

    /// Construct the pipeline for `(slug, version)` with `overrides` merged
    /// onto its defaults.
    pub fn resolve(
        &self,
        slug: &str,
        version: &str,
        overrides: &Value,
    ) -> Result<PipelineInstance, PipelineError> {
        let mut versions = self.entries.iter().filter(|e| e.identity.slug == slug).peekable();
        if versions.peek().is_none() {
            return Err(PipelineError::UnknownStyle(slug.to_string()));
        }
        let entry = versions
            .find(|e| e.identity.version == version)
            .ok_or_else(|| PipelineError::UnknownVersion {
                slug: slug.to_string(),
                version: version.to_string(),
            })?;

        let pipeline = (entry.construct)(overrides)?;
        Ok(PipelineInstance::new(entry.identity, pipeline))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::{BetweenTheLinesConfig, PencilSketchConfig, PopPosterConfig};
    use serde_json::json;

    #[test]
    fn test_every_slug_resolves_to_defaults() {
        let registry = PipelineRegistry::standard();
        let cases = [
            ("pop-poster", serde_json::to_value(PopPosterConfig::default()).unwrap()),
            ("pencil-sketch", serde_json::to_value(PencilSketchConfig::default()).unwrap()),
            (
                "between-the-lines",
                serde_json::to_value(BetweenTheLinesConfig::default()).unwrap(),
            ),
        ];
        for (slug, defaults) in cases {
            let instance = registry.resolve(slug, "1.0.0", &json!({})).unwrap();
            assert_eq!(instance.identity().slug, slug);
            assert_eq!(instance.resolved_config().unwrap(), defaults);
        }
    }

    #[test]
    fn test_single_override_changes_only_that_key() {
        let registry = PipelineRegistry::standard();
        let instance = registry.resolve("pop-poster", "1.0.0", &json!({"clusters": 5})).unwrap();
        let mut expected = serde_json::to_value(PopPosterConfig::default()).unwrap();
        expected["clusters"] = json!(5);
        assert_eq!(instance.resolved_config().unwrap(), expected);
    }

    #[test]
    fn test_unknown_style() {
        let err = PipelineRegistry::standard()
            .resolve("watercolor", "1.0.0", &json!({}))
            .unwrap_err();
        assert_eq!(err, PipelineError::UnknownStyle("watercolor".to_string()));
    }

    #[test]
    fn test_unknown_version() {
        let err = PipelineRegistry::standard()
            .resolve("pencil-sketch", "9.9.9", &json!({}))
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnknownVersion { .. }));
    }

    #[test]
    fn test_unknown_key_fails_for_every_style() {
        let registry = PipelineRegistry::standard();
        for entry in registry.entries() {
            let result = registry.resolve(
                entry.identity.slug,
                entry.identity.version,
                &json!({"not_a_parameter": true}),
            );
            assert!(matches!(result, Err(PipelineError::InvalidConfiguration(_))));
        }
    }
}

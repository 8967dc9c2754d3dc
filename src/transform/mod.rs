//! The per-partition transform contract and a few built-in transforms.

mod builtin;

pub use builtin::{Demean, Identity, Multiply};

use crate::bundle::ConfigBundle;
use crate::model::RecordingSet;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Processing applied independently to each partition.
///
/// Implementations receive an owned partition plus that partition's config
/// bundle and return the transformed recordings. They run on the blocking
/// thread pool, so CPU-bound work is fine.
pub trait Transform: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn apply(&self, recordings: RecordingSet, config: &ConfigBundle) -> Result<RecordingSet>;
}

impl<F> Transform for F
where
    F: Fn(RecordingSet, &ConfigBundle) -> Result<RecordingSet> + Send + Sync,
{
    fn apply(&self, recordings: RecordingSet, config: &ConfigBundle) -> Result<RecordingSet> {
        self(recordings, config)
    }
}

/// Selection of a built-in transform from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformSpec {
    /// Return recordings unchanged
    Identity,

    /// Scale samples; `factor` falls back to the bundle's `factor` parameter
    Multiply {
        #[serde(default)]
        factor: Option<f64>,
    },

    /// Subtract each recording's mean
    Demean,
}

impl Default for TransformSpec {
    fn default() -> Self {
        TransformSpec::Identity
    }
}

impl TransformSpec {
    pub fn build(&self) -> Arc<dyn Transform> {
        match self {
            TransformSpec::Identity => Arc::new(Identity),
            TransformSpec::Multiply { factor } => Arc::new(Multiply { factor: *factor }),
            TransformSpec::Demean => Arc::new(Demean),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_from_yaml() {
        let spec: TransformSpec = serde_yaml::from_str("kind: multiply\nfactor: 2.0").unwrap();
        assert_eq!(spec, TransformSpec::Multiply { factor: Some(2.0) });

        let spec: TransformSpec = serde_yaml::from_str("kind: demean").unwrap();
        assert_eq!(spec, TransformSpec::Demean);
    }

    #[test]
    fn test_closure_is_a_transform() {
        let drop_all = |_: RecordingSet, _: &ConfigBundle| -> Result<RecordingSet> {
            Ok(RecordingSet::new())
        };
        let out = drop_all
            .apply(
                crate::partition::tests::scenario().0,
                &ConfigBundle::default(),
            )
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_build_names() {
        assert_eq!(TransformSpec::Identity.build().name(), "identity");
        assert_eq!(TransformSpec::Demean.build().name(), "demean");
    }
}

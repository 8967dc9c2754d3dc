//! Configuration bundles and their per-worker replication.
//!
//! A bundle carries the station catalog plus opaque named parameters for the
//! transform. Every worker gets its own owned copy with the catalog swapped
//! for that worker's sub-catalog; parameters are shared verbatim.

use crate::model::Catalog;
use crate::partition::{Partition, Partitions};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Parameters passed to the transform alongside a partition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigBundle {
    /// Station metadata; replaced per chunk before dispatch
    pub catalog: Catalog,

    /// Opaque pass-through parameters
    #[serde(default, with = "params_wire")]
    pub params: Map<String, Value>,
}

/// Parameters are self-describing JSON values. Binary formats cannot carry
/// those directly, so they travel as JSON text there.
mod params_wire {
    use serde::de::Error as _;
    use serde::ser::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::{Map, Value};

    pub fn serialize<S: Serializer>(
        params: &Map<String, Value>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            params.serialize(serializer)
        } else {
            let text = serde_json::to_string(params).map_err(S::Error::custom)?;
            serializer.serialize_str(&text)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Map<String, Value>, D::Error> {
        if deserializer.is_human_readable() {
            Map::deserialize(deserializer)
        } else {
            let text = String::deserialize(deserializer)?;
            serde_json::from_str(&text).map_err(D::Error::custom)
        }
    }
}

impl ConfigBundle {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            params: Map::new(),
        }
    }

    pub fn with_params(catalog: Catalog, params: Map<String, Value>) -> Self {
        Self { catalog, params }
    }

    /// Set a parameter, returning the bundle for chaining.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Numeric parameter, if present and numeric.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(Value::as_f64)
    }

    /// Boolean parameter, if present and boolean.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.params.get(key).and_then(Value::as_bool)
    }

    /// Owned copy of this bundle carrying `catalog` instead.
    pub fn for_catalog(&self, catalog: Catalog) -> ConfigBundle {
        ConfigBundle {
            catalog,
            params: self.params.clone(),
        }
    }
}

/// One worker's independent view of the work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchUnit {
    pub partition: Partition,
    pub config: ConfigBundle,
}

impl DispatchUnit {
    pub fn index(&self) -> usize {
        self.partition.index
    }
}

/// Replicate `bundle` once per catalog, each copy carrying its own
/// sub-catalog.
pub fn broadcast(bundle: &ConfigBundle, catalogs: &[Catalog]) -> Vec<ConfigBundle> {
    catalogs
        .iter()
        .map(|catalog| bundle.for_catalog(catalog.clone()))
        .collect()
}

/// Pair each partition with its own bundle copy.
pub fn dispatch_units(partitions: Partitions, bundle: &ConfigBundle) -> Vec<DispatchUnit> {
    partitions
        .into_iter()
        .map(|partition| {
            let config = bundle.for_catalog(partition.catalog.clone());
            DispatchUnit { partition, config }
        })
        .collect()
}

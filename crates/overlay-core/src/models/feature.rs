use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::geometry::Geometry;

/// Flat property map attached to a feature
pub type Properties = serde_json::Map<String, Value>;

/// Internal property keys that never leave the engine in presence tables
pub const INTERNAL_PROPERTY_KEYS: [&str; 4] = ["__oidx", "__byteLength", "__area", "__offset"];

/// A geometry with its properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub geometry: Geometry,
    #[serde(default)]
    pub properties: Properties,
}

impl Feature {
    pub fn new(geometry: Geometry) -> Self {
        Self { geometry, properties: Properties::new() }
    }

    pub fn with_properties(geometry: Geometry, properties: Properties) -> Self {
        Self { geometry, properties }
    }

    /// Builder-style property setter
    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// String form of a property used as a group key, if present and non-empty
    pub fn group_key(&self, property: &str) -> Option<String> {
        match self.properties.get(property)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

/// Location of a feature inside a source: `(offset, byte_length)`
pub type FeatureReference = (u64, Option<u64>);

/// A feature as yielded by a feature source, with storage metadata
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFeature {
    pub feature: Feature,
    /// Stable feature index used for counting and presence rows
    pub oidx: Option<i64>,
    /// Encoded size hint in bytes
    pub byte_length: Option<u64>,
    /// Stable offset inside the source
    pub offset: Option<u64>,
}

impl SourceFeature {
    pub fn new(feature: Feature) -> Self {
        Self { feature, oidx: None, byte_length: None, offset: None }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.feature.geometry
    }

    pub fn properties(&self) -> &Properties {
        &self.feature.properties
    }

    /// Precomputed area hint in square kilometers (`__area` property)
    pub fn area_hint_sq_km(&self) -> Option<f64> {
        self.feature
            .properties
            .get("__area")
            .and_then(Value::as_f64)
            .filter(|a| *a > 0.0)
    }
}

/// Copy the requested properties, dropping internal keys.
///
/// With no explicit key list every non-internal property is kept.
pub fn pick_properties(properties: &Properties, keys: Option<&[String]>) -> Properties {
    let mut picked = Properties::new();
    match keys {
        Some(keys) => {
            for key in keys {
                if INTERNAL_PROPERTY_KEYS.contains(&key.as_str()) {
                    continue;
                }
                picked.insert(key.clone(), properties.get(key).cloned().unwrap_or(Value::Null));
            }
        }
        None => {
            for (key, value) in properties {
                if !INTERNAL_PROPERTY_KEYS.contains(&key.as_str()) {
                    picked.insert(key.clone(), value.clone());
                }
            }
        }
    }
    picked
}

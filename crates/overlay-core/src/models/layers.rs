use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Geography identifier
pub type GeographyId = u32;

/// How a clipping layer is applied to a sketch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClippingOperation {
    Intersect,
    Difference,
}

impl ClippingOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClippingOperation::Intersect => "INTERSECT",
            ClippingOperation::Difference => "DIFFERENCE",
        }
    }
}

impl std::fmt::Display for ClippingOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reference layer participating in a geography
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClippingLayerOption {
    /// Source reference understood by the feature-source registry
    pub source: String,
    pub op: ClippingOperation,
    /// Optional CQL2 JSON filter applied to the layer's features
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cql2_query: Option<Value>,
    /// Estimated source size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_hint: Option<u64>,
}

impl ClippingLayerOption {
    pub fn intersect(source: impl Into<String>) -> Self {
        Self { source: source.into(), op: ClippingOperation::Intersect, cql2_query: None, weight_hint: None }
    }

    pub fn difference(source: impl Into<String>) -> Self {
        Self { source: source.into(), op: ClippingOperation::Difference, cql2_query: None, weight_hint: None }
    }

    /// Attach a CQL2 filter
    pub fn with_query(mut self, query: Value) -> Self {
        self.cql2_query = Some(query);
        self
    }

    pub fn with_weight_hint(mut self, weight_hint: u64) -> Self {
        self.weight_hint = Some(weight_hint);
        self
    }
}

/// A named region of interest built from clipping layers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeographySettings {
    pub id: GeographyId,
    pub clipping_layers: Vec<ClippingLayerOption>,
}

impl GeographySettings {
    pub fn new(id: GeographyId, clipping_layers: Vec<ClippingLayerOption>) -> Self {
        Self { id, clipping_layers }
    }

    pub fn has_intersect_layer(&self) -> bool {
        self.clipping_layers.iter().any(|l| l.op == ClippingOperation::Intersect)
    }
}

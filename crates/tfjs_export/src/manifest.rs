//! Serde model of a TF.js layers-model `model.json`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const LAYERS_MODEL_FORMAT: &str = "layers-model";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelJson {
    pub format: String,
    pub generated_by: String,
    pub converted_by: String,
    pub model_topology: Value,
    pub weights_manifest: Vec<WeightGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeightGroup {
    /// Shard files relative to `model.json`, in concatenation order.
    pub paths: Vec<String>,
    pub weights: Vec<WeightEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeightEntry {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: String,
}

impl ModelJson {
    pub fn new(model_topology: Value, weights_manifest: Vec<WeightGroup>) -> Self {
        let tag = format!("tfjs_export v{}", env!("CARGO_PKG_VERSION"));
        Self {
            format: LAYERS_MODEL_FORMAT.to_string(),
            generated_by: format!("keras v{}", crate::topology::KERAS_VERSION),
            converted_by: tag,
            model_topology,
            weights_manifest,
        }
    }

    pub fn weight_names(&self) -> impl Iterator<Item = &str> {
        self.weights_manifest
            .iter()
            .flat_map(|g| g.weights.iter().map(|w| w.name.as_str()))
    }

    /// Float count the shards must hold, summed over all groups.
    pub fn total_elements(&self) -> usize {
        self.weights_manifest
            .iter()
            .flat_map(|g| &g.weights)
            .map(|w| w.shape.iter().product::<usize>())
            .sum()
    }
}

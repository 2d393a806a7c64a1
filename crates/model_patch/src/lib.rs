//! Structural fix-ups for a TF.js layers-model `model.json`.
//!
//! Two narrow mutations, everything else is written back as it was read:
//! - `InputLayer` configs carrying `batch_shape` (and no `batch_input_shape`) get the key
//!   renamed to `batch_input_shape`, value untouched.
//! - Weight names in `weightsManifest` lose a leading `sequential/`.
//!
//! Missing or oddly typed sections mean there is nothing to patch there. Applying the
//! patch twice gives the same document as applying it once.

use serde::Serialize;
use serde_json::ser::Formatter;
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const DEFAULT_MODEL_JSON: &str = "model/model.json";
pub const PREFIX: &str = "sequential/";
const OLD_KEY: &str = "batch_shape";
const NEW_KEY: &str = "batch_input_shape";

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchReport {
    pub renamed_input_layers: usize,
    pub stripped_names: usize,
}

impl PatchReport {
    pub fn is_noop(&self) -> bool {
        self.renamed_input_layers == 0 && self.stripped_names == 0
    }
}

/// Textual check of the file as written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    pub residual_prefix_count: usize,
    pub has_batch_shape: bool,
}

impl Verification {
    pub fn of_text(text: &str) -> Self {
        Self {
            residual_prefix_count: text.matches(PREFIX).count(),
            has_batch_shape: text.contains(&format!("\"{OLD_KEY}\"")),
        }
    }

    /// The diagnostic lines printed after a patch, booleans spelled `True`/`False`.
    pub fn lines(&self) -> [String; 3] {
        let flag = if self.has_batch_shape { "True" } else { "False" };
        [
            "patched ✅".to_string(),
            format!("{PREFIX} count after = {}", self.residual_prefix_count),
            format!("has {OLD_KEY} = {flag}"),
        ]
    }
}

fn topology_layers(doc: &mut Value) -> Option<&mut Vec<Value>> {
    doc.get_mut("modelTopology")?
        .get_mut("model_config")?
        .get_mut("config")?
        .get_mut("layers")?
        .as_array_mut()
}

fn rename_input_shapes(doc: &mut Value) -> usize {
    let Some(layers) = topology_layers(doc) else {
        return 0;
    };
    let mut renamed = 0;
    for layer in layers {
        if layer.get("class_name").and_then(Value::as_str) != Some("InputLayer") {
            continue;
        }
        let Some(cfg) = layer.get_mut("config").and_then(Value::as_object_mut) else {
            continue;
        };
        if cfg.contains_key(NEW_KEY) {
            continue;
        }
        if let Some(shape) = cfg.shift_remove(OLD_KEY) {
            cfg.insert(NEW_KEY.to_string(), shape);
            renamed += 1;
        }
    }
    renamed
}

fn strip_weight_prefixes(doc: &mut Value) -> usize {
    let Some(groups) = doc.get_mut("weightsManifest").and_then(Value::as_array_mut) else {
        return 0;
    };
    let mut stripped = 0;
    let weights = groups
        .iter_mut()
        .filter_map(|g| g.get_mut("weights").and_then(Value::as_array_mut))
        .flatten();
    for weight in weights {
        let Some(name) = weight.get_mut("name") else {
            continue;
        };
        let rest = name.as_str().and_then(|s| s.strip_prefix(PREFIX));
        if let Some(rest) = rest.map(str::to_owned) {
            *name = Value::String(rest);
            stripped += 1;
        }
    }
    stripped
}

/// Apply both fix-ups in place.
pub fn patch_document(doc: &mut Value) -> PatchReport {
    PatchReport {
        renamed_input_layers: rename_input_shapes(doc),
        stripped_names: strip_weight_prefixes(doc),
    }
}

/// Single-line JSON with `", "` and `": "` separators.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}

/// Serialize with literal (unescaped) non-ASCII text.
pub fn to_text(doc: &Value) -> Result<String, serde_json::Error> {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    doc.serialize(&mut ser)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Read, patch and overwrite `path`, then re-read it for the textual check.
pub fn patch_file(path: &Path) -> Result<(PatchReport, Verification), PatchError> {
    let io_err = |source| PatchError::Io {
        path: path.to_path_buf(),
        source,
    };
    let json_err = |source| PatchError::Json {
        path: path.to_path_buf(),
        source,
    };

    let text = fs::read_to_string(path).map_err(io_err)?;
    let mut doc: Value = serde_json::from_str(&text).map_err(json_err)?;
    let report = patch_document(&mut doc);
    tracing::debug!(
        path = %path.display(),
        renamed = report.renamed_input_layers,
        stripped = report.stripped_names,
        "patched document"
    );

    fs::write(path, to_text(&doc).map_err(json_err)?).map_err(io_err)?;
    let written = fs::read_to_string(path).map_err(io_err)?;
    Ok((report, Verification::of_text(&written)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn diagnostic_lines_use_capitalized_booleans() {
        let check = Verification::of_text(r#"{"name": "sequential/x", "batch_shape": [1]}"#);
        assert_eq!(
            check.lines(),
            [
                "patched ✅".to_string(),
                "sequential/ count after = 1".to_string(),
                "has batch_shape = True".to_string(),
            ]
        );
        assert_eq!(Verification::of_text("{}").lines()[2], "has batch_shape = False");
    }

    fn doc() -> Value {
        json!({
            "format": "layers-model",
            "modelTopology": {"model_config": {"config": {"layers": [
                {"class_name": "InputLayer", "config": {"batch_shape": [null, 32, 32, 3], "name": "input_1"}},
                {"class_name": "Conv2D", "config": {"batch_shape": [1], "filters": 32}},
            ]}}},
            "weightsManifest": [{"paths": ["group1-shard1of1.bin"], "weights": [
                {"name": "sequential/conv2d/kernel", "shape": [3, 3, 3, 32], "dtype": "float32"},
                {"name": "dense/bias", "shape": [10], "dtype": "float32"},
            ]}],
        })
    }

    #[test]
    fn renames_only_input_layers() {
        let mut d = doc();
        let report = patch_document(&mut d);
        assert_eq!(report.renamed_input_layers, 1);
        let layers = &d["modelTopology"]["model_config"]["config"]["layers"];
        assert_eq!(layers[0]["config"]["batch_input_shape"], json!([null, 32, 32, 3]));
        assert!(layers[0]["config"].get("batch_shape").is_none());
        assert_eq!(layers[1]["config"]["batch_shape"], json!([1]));
    }

    #[test]
    fn strips_prefix_once() {
        let mut d = doc();
        assert_eq!(patch_document(&mut d).stripped_names, 1);
        let weights = &d["weightsManifest"][0]["weights"];
        assert_eq!(weights[0]["name"], "conv2d/kernel");
        assert_eq!(weights[1]["name"], "dense/bias");
    }

    #[test]
    fn second_pass_is_a_noop() {
        let mut d = doc();
        patch_document(&mut d);
        let once = d.clone();
        assert!(patch_document(&mut d).is_noop());
        assert_eq!(d, once);
    }

    #[test]
    fn formatter_matches_spaced_single_line() {
        let text = to_text(&json!({"a": [1, 2], "名": "貓"})).unwrap();
        assert_eq!(text, r#"{"a": [1, 2], "名": "貓"}"#);
    }

    #[test]
    fn verification_counts_text() {
        let v = Verification::of_text(r#"{"x": "sequential/a sequential/b", "batch_shape": 1}"#);
        assert_eq!(v.residual_prefix_count, 2);
        assert!(v.has_batch_shape);
        let v = Verification::of_text(r#"{"batch_shapes": 1}"#);
        assert!(!v.has_batch_shape);
    }
}

//! Bundle directory IO: `model.json` plus `group1-shard{i}of{n}.bin` files.

use crate::manifest::ModelJson;
use crate::{ExportError, ExportResult};
use std::fs;
use std::path::{Path, PathBuf};

pub const MODEL_JSON: &str = "model.json";
pub const DEFAULT_SHARD_BYTES: usize = 4 * 1024 * 1024;

pub fn shard_name(index: usize, count: usize) -> String {
    format!("group1-shard{index}of{count}.bin")
}

/// Names of the shards needed for `total_bytes` of weights.
pub fn shard_names(total_bytes: usize, shard_bytes: usize) -> Vec<String> {
    let count = total_bytes.div_ceil(shard_bytes.max(1)).max(1);
    (1..=count).map(|i| shard_name(i, count)).collect()
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ExportError + '_ {
    move |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn is_shard_file(name: &str) -> bool {
    name.starts_with("group") && name.contains("-shard") && name.ends_with(".bin")
}

/// Drop shards from an earlier export so a smaller model does not leave orphans.
fn remove_stale_shards(dir: &Path) -> ExportResult<()> {
    for entry in fs::read_dir(dir).map_err(io_err(dir))? {
        let entry = entry.map_err(io_err(dir))?;
        let name = entry.file_name();
        if name.to_str().is_some_and(is_shard_file) {
            let path = entry.path();
            fs::remove_file(&path).map_err(io_err(&path))?;
            tracing::debug!(path = %path.display(), "removed stale shard");
        }
    }
    Ok(())
}

/// Writes `model.json` and the weight shards into `dir`, creating it if needed.
///
/// `weights` is the little-endian float32 buffer in manifest order; `doc` must
/// already carry the shard paths from [`shard_names`].
pub fn write_bundle(
    dir: &Path,
    doc: &ModelJson,
    weights: &[u8],
    shard_bytes: usize,
) -> ExportResult<Vec<PathBuf>> {
    fs::create_dir_all(dir).map_err(io_err(dir))?;
    remove_stale_shards(dir)?;

    let names = shard_names(weights.len(), shard_bytes);
    let declared: Vec<&String> = doc.weights_manifest.iter().flat_map(|g| &g.paths).collect();
    if declared.len() != names.len() || declared.iter().zip(&names).any(|(a, b)| *a != b) {
        return Err(ExportError::Layout(format!(
            "manifest declares {} shard paths, buffer needs {}",
            declared.len(),
            names.len()
        )));
    }

    let mut written = Vec::with_capacity(names.len() + 1);
    let chunk = shard_bytes.max(1);
    let mut chunks = weights.chunks(chunk);
    for name in &names {
        let path = dir.join(name);
        let bytes = chunks.next().unwrap_or(&[]);
        fs::write(&path, bytes).map_err(io_err(&path))?;
        written.push(path);
    }

    let json_path = dir.join(MODEL_JSON);
    let text = serde_json::to_string(doc).map_err(|source| ExportError::Json {
        path: json_path.clone(),
        source,
    })?;
    fs::write(&json_path, text).map_err(io_err(&json_path))?;
    written.insert(0, json_path);
    Ok(written)
}

pub fn read_model_json(dir: &Path) -> ExportResult<ModelJson> {
    let path = dir.join(MODEL_JSON);
    let text = fs::read_to_string(&path).map_err(io_err(&path))?;
    serde_json::from_str(&text).map_err(|source| ExportError::Json { path, source })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleFile {
    pub name: String,
    pub bytes: u64,
}

impl BundleFile {
    pub fn kilobytes(&self) -> f64 {
        self.bytes as f64 / 1024.0
    }
}

/// Regular files of the bundle directory, sorted by name.
pub fn list_bundle(dir: &Path) -> ExportResult<Vec<BundleFile>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err(dir))? {
        let entry = entry.map_err(io_err(dir))?;
        let meta = entry.metadata().map_err(io_err(&entry.path()))?;
        if meta.is_file() {
            files.push(BundleFile {
                name: entry.file_name().to_string_lossy().into_owned(),
                bytes: meta.len(),
            });
        }
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

pub fn total_bytes(files: &[BundleFile]) -> u64 {
    files.iter().map(|f| f.bytes).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{WeightEntry, WeightGroup};
    use serde_json::json;

    fn doc_for(len: usize, shard_bytes: usize) -> ModelJson {
        ModelJson::new(
            json!({}),
            vec![WeightGroup {
                paths: shard_names(len, shard_bytes),
                weights: vec![WeightEntry {
                    name: "w".into(),
                    shape: vec![len / 4],
                    dtype: "float32".into(),
                }],
            }],
        )
    }

    #[test]
    fn shard_naming() {
        assert_eq!(shard_names(10, 4), vec!["group1-shard1of3.bin", "group1-shard2of3.bin", "group1-shard3of3.bin"]);
        assert_eq!(shard_names(0, 4), vec!["group1-shard1of1.bin"]);
        assert_eq!(shard_names(DEFAULT_SHARD_BYTES, DEFAULT_SHARD_BYTES).len(), 1);
    }

    #[test]
    fn splits_buffer_by_bytes() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let buf: Vec<u8> = (0..40u8).collect();
        let doc = doc_for(buf.len(), 16);
        let written = write_bundle(tmp.path(), &doc, &buf, 16)?;
        assert_eq!(written.len(), 4);

        let files = list_bundle(tmp.path())?;
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["group1-shard1of3.bin", "group1-shard2of3.bin", "group1-shard3of3.bin", "model.json"]
        );
        assert_eq!(files[0].bytes, 16);
        assert_eq!(files[2].bytes, 8);
        let mut joined = Vec::new();
        for f in &files[..3] {
            joined.extend(fs::read(tmp.path().join(&f.name))?);
        }
        assert_eq!(joined, buf);
        assert_eq!(read_model_json(tmp.path())?, doc);
        Ok(())
    }

    #[test]
    fn rewrite_drops_stale_shards() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        fs::write(tmp.path().join("group1-shard1of9.bin"), [0u8; 3])?;
        fs::write(tmp.path().join("notes.txt"), "keep")?;
        let buf = vec![1u8; 8];
        write_bundle(tmp.path(), &doc_for(8, 64), &buf, 64)?;
        let names: Vec<String> = list_bundle(tmp.path())?.into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["group1-shard1of1.bin", "model.json", "notes.txt"]);
        Ok(())
    }

    #[test]
    fn mismatched_manifest_paths_are_rejected() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let err = write_bundle(tmp.path(), &doc_for(8, 64), &[0u8; 8], 4).unwrap_err();
        assert!(matches!(err, ExportError::Layout(_)));
        Ok(())
    }
}

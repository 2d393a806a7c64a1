use burn::backend::NdArray;
use models::{CifarCnn, CifarCnnConfig};
use std::fs;
use tfjs_export::{export_model, list_bundle, read_model_json, ExportOptions, MODEL_JSON};

type B = NdArray<f32>;

#[test]
fn tiny_model_exports_a_consistent_bundle() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let dir = tmp.path().join("bundle");
    let cfg = CifarCnnConfig::tiny(8);
    let model = CifarCnn::<B>::new(&cfg, &Default::default());

    // small shards to exercise splitting
    let opts = ExportOptions {
        shard_bytes: 1024,
        ..ExportOptions::default()
    };
    let summary = export_model(&model, &cfg, &dir, &opts)?;
    assert!(summary.shards.len() > 1);
    assert_eq!(summary.model_json, dir.join(MODEL_JSON));

    let doc = read_model_json(&dir)?;
    assert_eq!(doc.format, "layers-model");
    assert_eq!(doc.weights_manifest.len(), 1);
    assert_eq!(doc.weights_manifest[0].paths.len(), summary.shards.len());
    assert!(doc.weight_names().all(|n| !n.starts_with("sequential/")));
    assert_eq!(doc.total_elements(), summary.params.total());

    let shard_bytes: u64 = list_bundle(&dir)?
        .iter()
        .filter(|f| f.name != MODEL_JSON)
        .map(|f| f.bytes)
        .sum();
    assert_eq!(shard_bytes as usize, 4 * summary.params.total());

    let layers = &doc.model_topology["model_config"]["config"]["layers"];
    assert_eq!(layers[0]["class_name"], "InputLayer");
    assert_eq!(layers[0]["config"]["batch_input_shape"][1], 8);
    Ok(())
}

#[test]
fn patcher_leaves_a_fresh_bundle_unchanged() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let cfg = CifarCnnConfig::tiny(8);
    let model = CifarCnn::<B>::new(&cfg, &Default::default());
    export_model(&model, &cfg, tmp.path(), &ExportOptions::default())?;

    let path = tmp.path().join(MODEL_JSON);
    let before: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
    let (report, verification) = model_patch::patch_file(&path)?;
    let after: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path)?)?;

    assert_eq!(report.renamed_input_layers, 0);
    assert_eq!(report.stripped_names, 0);
    assert_eq!(verification.residual_prefix_count, 0);
    assert!(!verification.has_batch_shape);
    assert_eq!(before, after);
    Ok(())
}

use model_patch::{patch_document, patch_file, PatchError};
use serde_json::{json, Value};
use std::fs;

fn layers(doc: &Value) -> &Value {
    &doc["modelTopology"]["model_config"]["config"]["layers"]
}

#[test]
fn existing_batch_input_shape_is_not_overwritten() {
    let mut doc = json!({"modelTopology": {"model_config": {"config": {"layers": [
        {"class_name": "InputLayer", "config": {"batch_shape": [null, 8], "batch_input_shape": [null, 4]}}
    ]}}}});
    let report = patch_document(&mut doc);
    assert_eq!(report.renamed_input_layers, 0);
    let cfg = &layers(&doc)[0]["config"];
    assert_eq!(cfg["batch_input_shape"], json!([null, 4]));
    assert_eq!(cfg["batch_shape"], json!([null, 8]));
}

#[test]
fn exact_prefix_becomes_empty_name() {
    let mut doc = json!({"weightsManifest": [
        {"weights": [{"name": "sequential/"}, {"name": "my_sequential/x"}, {"name": 3}]},
        {"weights": [{"name": "sequential/sequential/dense/bias"}]}
    ]});
    assert_eq!(patch_document(&mut doc).stripped_names, 2);
    assert_eq!(doc["weightsManifest"][0]["weights"][0]["name"], "");
    assert_eq!(doc["weightsManifest"][0]["weights"][1]["name"], "my_sequential/x");
    assert_eq!(doc["weightsManifest"][0]["weights"][2]["name"], 3);
    // only one prefix is removed per pass
    assert_eq!(
        doc["weightsManifest"][1]["weights"][0]["name"],
        "sequential/dense/bias"
    );
}

#[test]
fn missing_sections_patch_nothing() {
    for raw in [
        json!({}),
        json!({"modelTopology": {}}),
        json!({"modelTopology": {"model_config": {"config": {"layers": "nope"}}}}),
        json!({"weightsManifest": [{"paths": []}]}),
        json!([1, 2, 3]),
    ] {
        let mut doc = raw.clone();
        assert!(patch_document(&mut doc).is_noop());
        assert_eq!(doc, raw);
    }
}

#[test]
fn file_is_rewritten_with_everything_else_intact() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("model.json");
    let original = json!({
        "format": "layers-model",
        "generatedBy": "keras v2.15.0",
        "userDefinedMetadata": {"labels": ["飛機", "貓"]},
        "modelTopology": {"model_config": {"class_name": "Sequential", "config": {"layers": [
            {"class_name": "InputLayer", "config": {"batch_shape": [null, 32, 32, 3], "dtype": "float32"}},
            {"class_name": "Dense", "config": {"units": 10}}
        ]}}},
        "weightsManifest": [{"paths": ["group1-shard1of1.bin"], "weights": [
            {"name": "sequential/dense/kernel", "shape": [2048, 10], "dtype": "float32"}
        ]}]
    });
    fs::write(&path, serde_json::to_string_pretty(&original)?)?;

    let (report, check) = patch_file(&path)?;
    assert_eq!(report.renamed_input_layers, 1);
    assert_eq!(report.stripped_names, 1);
    assert_eq!(check.residual_prefix_count, 0);
    assert!(!check.has_batch_shape);

    let text = fs::read_to_string(&path)?;
    assert!(text.contains("\"飛機\""));
    assert!(!text.contains('\n'));
    let patched: Value = serde_json::from_str(&text)?;
    assert_eq!(patched["userDefinedMetadata"], original["userDefinedMetadata"]);
    assert_eq!(patched["generatedBy"], "keras v2.15.0");
    assert_eq!(layers(&patched)[1], layers(&original)[1]);
    assert_eq!(
        layers(&patched)[0]["config"]["batch_input_shape"],
        json!([null, 32, 32, 3])
    );
    let keys: Vec<&String> = patched.as_object().map(|o| o.keys().collect()).unwrap_or_default();
    assert_eq!(keys[0], "format");

    let (again, _) = patch_file(&path)?;
    assert!(again.is_noop());
    assert_eq!(fs::read_to_string(&path)?, text);
    Ok(())
}

#[test]
fn malformed_input_is_reported() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let missing = tmp.path().join("missing.json");
    assert!(matches!(patch_file(&missing), Err(PatchError::Io { .. })));

    let broken = tmp.path().join("broken.json");
    fs::write(&broken, "{\"modelTopology\": ")?;
    let err = patch_file(&broken).unwrap_err();
    assert!(matches!(err, PatchError::Json { .. }));
    assert!(err.to_string().contains("broken.json"));
    // left untouched
    assert_eq!(fs::read_to_string(&broken)?, "{\"modelTopology\": ");
    Ok(())
}

#[test]
fn numbers_pass_through_as_written() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("model.json");
    fs::write(
        &path,
        r#"{"meta": {"id": 123456789012345678901234567890, "epsilon": 1e-07, "momentum": 0.99}, "weightsManifest": []}"#,
    )?;
    let (report, _) = patch_file(&path)?;
    assert!(report.is_noop());
    assert_eq!(
        fs::read_to_string(&path)?,
        r#"{"meta": {"id": 123456789012345678901234567890, "epsilon": 1e-07, "momentum": 0.99}, "weightsManifest": []}"#
    );
    Ok(())
}

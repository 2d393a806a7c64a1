//! Keras `Sequential` description of `CifarCnn`, as embedded in a TF.js layers-model.
//!
//! The plan lists layers in Keras order with Keras auto-generated names (`conv2d`,
//! `conv2d_1`, ...), NHWC output shapes and parameter counts. The same plan drives the
//! topology document, the weights manifest names and the console summary, so the three can
//! never disagree.

use models::CifarCnnConfig;
use serde_json::{json, Value};
use std::collections::HashMap;

pub const KERAS_VERSION: &str = "2.15.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Input,
    Conv2D,
    BatchNorm,
    MaxPool,
    Dropout,
    Flatten,
    Dense,
}

impl LayerKind {
    pub fn class_name(&self) -> &'static str {
        match self {
            LayerKind::Input => "InputLayer",
            LayerKind::Conv2D => "Conv2D",
            LayerKind::BatchNorm => "BatchNormalization",
            LayerKind::MaxPool => "MaxPooling2D",
            LayerKind::Dropout => "Dropout",
            LayerKind::Flatten => "Flatten",
            LayerKind::Dense => "Dense",
        }
    }

    fn base_name(&self) -> &'static str {
        match self {
            LayerKind::Input => "input",
            LayerKind::Conv2D => "conv2d",
            LayerKind::BatchNorm => "batch_normalization",
            LayerKind::MaxPool => "max_pooling2d",
            LayerKind::Dropout => "dropout",
            LayerKind::Flatten => "flatten",
            LayerKind::Dense => "dense",
        }
    }

    /// Weight suffixes in Keras storage order.
    pub fn weight_suffixes(&self) -> &'static [&'static str] {
        match self {
            LayerKind::Conv2D | LayerKind::Dense => &["kernel", "bias"],
            LayerKind::BatchNorm => &["gamma", "beta", "moving_mean", "moving_variance"],
            _ => &[],
        }
    }
}

#[derive(Debug, Clone)]
pub struct KerasLayer {
    pub kind: LayerKind,
    pub name: String,
    /// Output shape without the batch dimension (NHWC for spatial layers).
    pub output_shape: Vec<usize>,
    /// Keras shapes of this layer's weights, parallel to `kind.weight_suffixes()`.
    pub weight_shapes: Vec<Vec<usize>>,
    pub config: Value,
}

impl KerasLayer {
    pub fn has_weights(&self) -> bool {
        !self.weight_shapes.is_empty()
    }

    pub fn param_count(&self) -> usize {
        self.weight_shapes
            .iter()
            .map(|s| s.iter().product::<usize>())
            .sum()
    }

    /// Moving statistics are stored but not trained.
    pub fn non_trainable_count(&self) -> usize {
        match self.kind {
            LayerKind::BatchNorm => self.weight_shapes[2..]
                .iter()
                .map(|s| s.iter().product::<usize>())
                .sum(),
            _ => 0,
        }
    }

    /// Fully qualified weight names with their Keras shapes.
    pub fn weight_specs(&self) -> Vec<(String, Vec<usize>)> {
        self.kind
            .weight_suffixes()
            .iter()
            .zip(&self.weight_shapes)
            .map(|(suffix, shape)| (format!("{}/{suffix}", self.name), shape.clone()))
            .collect()
    }
}

#[derive(Default)]
struct LayerNamer {
    counts: HashMap<&'static str, usize>,
}

impl LayerNamer {
    fn next(&mut self, kind: LayerKind) -> String {
        let base = kind.base_name();
        let n = self.counts.entry(base).or_insert(0);
        // Keras numbers input layers from 1, everything else from the bare name.
        let name = match (kind, *n) {
            (LayerKind::Input, k) => format!("{base}_{}", k + 1),
            (_, 0) => base.to_string(),
            (_, k) => format!("{base}_{k}"),
        };
        *n += 1;
        name
    }
}

pub fn layer_plan(cfg: &CifarCnnConfig) -> Vec<KerasLayer> {
    let mut namer = LayerNamer::default();
    let mut layers = Vec::new();
    let mut side = cfg.input_size;
    let mut channels = cfg.in_channels;

    let name = namer.next(LayerKind::Input);
    layers.push(KerasLayer {
        kind: LayerKind::Input,
        config: json!({
            "batch_input_shape": [null, side, side, channels],
            "dtype": "float32",
            "sparse": false,
            "ragged": false,
            "name": name,
        }),
        name,
        output_shape: vec![side, side, channels],
        weight_shapes: Vec::new(),
    });

    for (&filters, &rate) in cfg.block_channels.iter().zip(&cfg.block_dropout) {
        for _ in 0..2 {
            layers.push(conv_layer(&mut namer, side, channels, filters));
            channels = filters;
            layers.push(batch_norm_layer(&mut namer, cfg, vec![side, side, channels]));
        }
        side /= 2;
        layers.push(max_pool_layer(&mut namer, side, channels));
        layers.push(dropout_layer(&mut namer, rate, vec![side, side, channels]));
    }

    let flat = side * side * channels;
    let name = namer.next(LayerKind::Flatten);
    layers.push(KerasLayer {
        kind: LayerKind::Flatten,
        config: json!({
            "name": name,
            "trainable": true,
            "dtype": "float32",
            "data_format": "channels_last",
        }),
        name,
        output_shape: vec![flat],
        weight_shapes: Vec::new(),
    });

    layers.push(dense_layer(&mut namer, flat, cfg.dense_hidden, "relu"));
    layers.push(batch_norm_layer(&mut namer, cfg, vec![cfg.dense_hidden]));
    layers.push(dropout_layer(
        &mut namer,
        cfg.dense_dropout,
        vec![cfg.dense_hidden],
    ));
    layers.push(dense_layer(
        &mut namer,
        cfg.dense_hidden,
        cfg.num_classes,
        "softmax",
    ));
    layers
}

fn initializer(class_name: &str) -> Value {
    match class_name {
        "GlorotUniform" => json!({ "class_name": class_name, "config": { "seed": null } }),
        _ => json!({ "class_name": class_name, "config": {} }),
    }
}

fn conv_layer(namer: &mut LayerNamer, side: usize, in_ch: usize, filters: usize) -> KerasLayer {
    let name = namer.next(LayerKind::Conv2D);
    KerasLayer {
        kind: LayerKind::Conv2D,
        config: json!({
            "name": name,
            "trainable": true,
            "dtype": "float32",
            "filters": filters,
            "kernel_size": [3, 3],
            "strides": [1, 1],
            "padding": "same",
            "data_format": "channels_last",
            "dilation_rate": [1, 1],
            "groups": 1,
            "activation": "relu",
            "use_bias": true,
            "kernel_initializer": initializer("GlorotUniform"),
            "bias_initializer": initializer("Zeros"),
            "kernel_regularizer": null,
            "bias_regularizer": null,
            "activity_regularizer": null,
            "kernel_constraint": null,
            "bias_constraint": null,
        }),
        name,
        output_shape: vec![side, side, filters],
        weight_shapes: vec![vec![3, 3, in_ch, filters], vec![filters]],
    }
}

fn batch_norm_layer(
    namer: &mut LayerNamer,
    cfg: &CifarCnnConfig,
    output_shape: Vec<usize>,
) -> KerasLayer {
    let name = namer.next(LayerKind::BatchNorm);
    let features = output_shape.last().copied().unwrap_or(0);
    KerasLayer {
        kind: LayerKind::BatchNorm,
        config: json!({
            "name": name,
            "trainable": true,
            "dtype": "float32",
            "axis": -1,
            "momentum": cfg.bn_momentum,
            "epsilon": cfg.bn_epsilon,
            "center": true,
            "scale": true,
            "beta_initializer": initializer("Zeros"),
            "gamma_initializer": initializer("Ones"),
            "moving_mean_initializer": initializer("Zeros"),
            "moving_variance_initializer": initializer("Ones"),
            "beta_regularizer": null,
            "gamma_regularizer": null,
            "beta_constraint": null,
            "gamma_constraint": null,
        }),
        name,
        output_shape,
        weight_shapes: vec![vec![features]; 4],
    }
}

fn max_pool_layer(namer: &mut LayerNamer, side: usize, channels: usize) -> KerasLayer {
    let name = namer.next(LayerKind::MaxPool);
    KerasLayer {
        kind: LayerKind::MaxPool,
        config: json!({
            "name": name,
            "trainable": true,
            "dtype": "float32",
            "pool_size": [2, 2],
            "padding": "valid",
            "strides": [2, 2],
            "data_format": "channels_last",
        }),
        name,
        output_shape: vec![side, side, channels],
        weight_shapes: Vec::new(),
    }
}

fn dropout_layer(namer: &mut LayerNamer, rate: f64, output_shape: Vec<usize>) -> KerasLayer {
    let name = namer.next(LayerKind::Dropout);
    KerasLayer {
        kind: LayerKind::Dropout,
        config: json!({
            "name": name,
            "trainable": true,
            "dtype": "float32",
            "rate": rate,
            "noise_shape": null,
            "seed": null,
        }),
        name,
        output_shape,
        weight_shapes: Vec::new(),
    }
}

fn dense_layer(namer: &mut LayerNamer, inputs: usize, units: usize, activation: &str) -> KerasLayer {
    let name = namer.next(LayerKind::Dense);
    KerasLayer {
        kind: LayerKind::Dense,
        config: json!({
            "name": name,
            "trainable": true,
            "dtype": "float32",
            "units": units,
            "activation": activation,
            "use_bias": true,
            "kernel_initializer": initializer("GlorotUniform"),
            "bias_initializer": initializer("Zeros"),
            "kernel_regularizer": null,
            "bias_regularizer": null,
            "activity_regularizer": null,
            "kernel_constraint": null,
            "bias_constraint": null,
        }),
        name,
        output_shape: vec![units],
        weight_shapes: vec![vec![inputs, units], vec![units]],
    }
}

/// The `modelTopology` object of a layers-model `model.json`.
pub fn model_topology(plan: &[KerasLayer], learning_rate: f64) -> Value {
    let layers: Vec<Value> = plan
        .iter()
        .map(|l| json!({ "class_name": l.kind.class_name(), "config": l.config }))
        .collect();
    json!({
        "keras_version": KERAS_VERSION,
        "backend": "tensorflow",
        "model_config": {
            "class_name": "Sequential",
            "config": { "name": "sequential", "layers": layers },
        },
        "training_config": {
            "loss": "sparse_categorical_crossentropy",
            "metrics": [["accuracy"]],
            "weighted_metrics": null,
            "loss_weights": null,
            "optimizer_config": {
                "class_name": "Adam",
                "config": {
                    "name": "Adam",
                    "learning_rate": learning_rate,
                    "beta_1": 0.9,
                    "beta_2": 0.999,
                    "epsilon": 1e-7,
                    "amsgrad": false,
                },
            },
        },
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParamCounts {
    pub trainable: usize,
    pub non_trainable: usize,
}

impl ParamCounts {
    pub fn total(&self) -> usize {
        self.trainable + self.non_trainable
    }
}

pub fn param_counts(plan: &[KerasLayer]) -> ParamCounts {
    plan.iter().fold(ParamCounts::default(), |acc, l| {
        let fixed = l.non_trainable_count();
        ParamCounts {
            trainable: acc.trainable + l.param_count() - fixed,
            non_trainable: acc.non_trainable + fixed,
        }
    })
}

/// `1234567` -> `"1,234,567"`.
pub fn format_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Keras-style summary table (input layer omitted, as Keras does for Sequential models).
pub fn summary_table(plan: &[KerasLayer]) -> String {
    let rule = "=".repeat(65);
    let thin = "_".repeat(65);
    let mut out = String::new();
    out.push_str("Model: \"sequential\"\n");
    out.push_str(&thin);
    out.push('\n');
    out.push_str(&format!(
        "{:<29}{:<26}{:>10}\n",
        "Layer (type)", "Output Shape", "Param #"
    ));
    out.push_str(&rule);
    out.push('\n');
    for layer in plan.iter().filter(|l| l.kind != LayerKind::Input) {
        let dims: Vec<String> = std::iter::once("None".to_string())
            .chain(layer.output_shape.iter().map(|d| d.to_string()))
            .collect();
        out.push_str(&format!(
            "{:<29}{:<26}{:>10}\n",
            format!("{} ({})", layer.name, layer.kind.class_name()),
            format!("({})", dims.join(", ")),
            layer.param_count()
        ));
    }
    let counts = param_counts(plan);
    out.push_str(&rule);
    out.push('\n');
    out.push_str(&format!(
        "Total params: {}\nTrainable params: {}\nNon-trainable params: {}\n",
        format_thousands(counts.total()),
        format_thousands(counts.trainable),
        format_thousands(counts.non_trainable)
    ));
    out.push_str(&thin);
    out
}

//! Extraction of `CifarCnn` parameters as Keras-named, Keras-shaped float buffers.

use crate::layout::{conv_kernel_oihw_to_hwio, dense_rows_chw_to_hwc};
use crate::topology::{layer_plan, KerasLayer};
use crate::{ExportError, ExportResult};
use burn::nn::conv::Conv2d;
use burn::nn::{BatchNorm, Linear};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use models::{CifarCnn, CifarCnnConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct NamedWeight {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl NamedWeight {
    fn new(name: String, shape: Vec<usize>, data: Vec<f32>) -> ExportResult<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ExportError::Layout(format!(
                "{name}: shape {shape:?} needs {expected} values, tensor has {}",
                data.len()
            )));
        }
        Ok(Self { name, shape, data })
    }
}

fn read_tensor<B: Backend, const D: usize>(t: Tensor<B, D>) -> ExportResult<(Vec<usize>, Vec<f32>)> {
    let dims = t.dims().to_vec();
    let data = t
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| ExportError::Tensor(format!("{e:?}")))?;
    Ok((dims, data))
}

/// Walks the plan's parametric layers in order, checking each against the model tensor
/// that is about to be written under its name.
struct PlanCursor<'a> {
    layers: std::vec::IntoIter<&'a KerasLayer>,
}

impl<'a> PlanCursor<'a> {
    fn next(&mut self) -> ExportResult<Vec<(String, Vec<usize>)>> {
        self.layers
            .next()
            .map(|l| l.weight_specs())
            .ok_or_else(|| ExportError::Layout("model has more parametric layers than the topology".into()))
    }
}

fn push_conv<B: Backend>(
    out: &mut Vec<NamedWeight>,
    specs: Vec<(String, Vec<usize>)>,
    conv: &Conv2d<B>,
) -> ExportResult<()> {
    let (dims, data) = read_tensor(conv.weight.val())?;
    let dims: [usize; 4] = dims
        .try_into()
        .map_err(|_| ExportError::Layout("conv kernel is not rank 4".into()))?;
    let bias = conv
        .bias
        .as_ref()
        .ok_or_else(|| ExportError::Layout("conv layer has no bias".into()))?;
    let (_, bias) = read_tensor(bias.val())?;
    let mut specs = specs.into_iter();
    let (kernel_name, kernel_shape) = next_spec(&mut specs)?;
    out.push(NamedWeight::new(
        kernel_name,
        kernel_shape,
        conv_kernel_oihw_to_hwio(&data, dims),
    )?);
    let (bias_name, bias_shape) = next_spec(&mut specs)?;
    out.push(NamedWeight::new(bias_name, bias_shape, bias)?);
    Ok(())
}

fn push_batch_norm<B: Backend, const D: usize>(
    out: &mut Vec<NamedWeight>,
    specs: Vec<(String, Vec<usize>)>,
    bn: &BatchNorm<B, D>,
) -> ExportResult<()> {
    let tensors = [
        bn.gamma.val(),
        bn.beta.val(),
        bn.running_mean.value(),
        bn.running_var.value(),
    ];
    for ((name, shape), tensor) in specs.into_iter().zip(tensors) {
        let (_, data) = read_tensor(tensor)?;
        out.push(NamedWeight::new(name, shape, data)?);
    }
    Ok(())
}

/// `feature_map` is (channels, height, width) of the flattened input, when there is one.
fn push_dense<B: Backend>(
    out: &mut Vec<NamedWeight>,
    specs: Vec<(String, Vec<usize>)>,
    linear: &Linear<B>,
    feature_map: Option<(usize, usize, usize)>,
) -> ExportResult<()> {
    let (dims, kernel) = read_tensor(linear.weight.val())?;
    let kernel = match feature_map {
        Some((c, h, w)) => dense_rows_chw_to_hwc(&kernel, c, h, w, dims[1]),
        None => kernel,
    };
    let bias = linear
        .bias
        .as_ref()
        .ok_or_else(|| ExportError::Layout("dense layer has no bias".into()))?;
    let (_, bias) = read_tensor(bias.val())?;
    let mut specs = specs.into_iter();
    let (kernel_name, kernel_shape) = next_spec(&mut specs)?;
    out.push(NamedWeight::new(kernel_name, kernel_shape, kernel)?);
    let (bias_name, bias_shape) = next_spec(&mut specs)?;
    out.push(NamedWeight::new(bias_name, bias_shape, bias)?);
    Ok(())
}

fn next_spec(
    specs: &mut impl Iterator<Item = (String, Vec<usize>)>,
) -> ExportResult<(String, Vec<usize>)> {
    specs
        .next()
        .ok_or_else(|| ExportError::Layout("topology lists fewer weights than the layer holds".into()))
}

/// All weights of `model` in Keras manifest order.
pub fn collect_weights<B: Backend>(
    model: &CifarCnn<B>,
    cfg: &CifarCnnConfig,
) -> ExportResult<Vec<NamedWeight>> {
    let plan = layer_plan(cfg);
    let parametric: Vec<&KerasLayer> = plan.iter().filter(|l| l.has_weights()).collect();
    let mut cursor = PlanCursor {
        layers: parametric.into_iter(),
    };

    let mut out = Vec::new();
    for block in &model.blocks {
        push_conv(&mut out, cursor.next()?, &block.conv_a)?;
        push_batch_norm(&mut out, cursor.next()?, &block.bn_a)?;
        push_conv(&mut out, cursor.next()?, &block.conv_b)?;
        push_batch_norm(&mut out, cursor.next()?, &block.bn_b)?;
    }
    let side = cfg.feature_size();
    push_dense(
        &mut out,
        cursor.next()?,
        &model.dense,
        Some((cfg.feature_channels(), side, side)),
    )?;
    push_batch_norm(&mut out, cursor.next()?, &model.dense_bn)?;
    push_dense(&mut out, cursor.next()?, &model.head, None)?;

    if cursor.next().is_ok() {
        return Err(ExportError::Layout(
            "topology has parametric layers the model does not".into(),
        ));
    }
    Ok(out)
}

/// Little-endian float32 concatenation, in manifest order.
pub fn to_le_bytes(weights: &[NamedWeight]) -> Vec<u8> {
    let total: usize = weights.iter().map(|w| w.data.len()).sum();
    let mut bytes = Vec::with_capacity(total * 4);
    for w in weights {
        for v in &w.data {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn collects_every_planned_weight_with_keras_shapes() {
        let device = Default::default();
        let cfg = CifarCnnConfig::tiny(8);
        let model = CifarCnn::<B>::new(&cfg, &device);
        let weights = collect_weights(&model, &cfg).unwrap();

        let planned: Vec<(String, Vec<usize>)> = layer_plan(&cfg)
            .iter()
            .flat_map(|l| l.weight_specs())
            .collect();
        let got: Vec<(String, Vec<usize>)> = weights
            .iter()
            .map(|w| (w.name.clone(), w.shape.clone()))
            .collect();
        assert_eq!(got, planned);
        assert_eq!(weights[0].name, "conv2d/kernel");
        assert_eq!(weights[0].shape, vec![3, 3, 3, 4]);
        assert_eq!(weights[2].name, "batch_normalization/gamma");
        // fresh batch norm: gamma ones, moving variance ones
        assert!(weights[2].data.iter().all(|v| *v == 1.0));
        assert!(weights[5].data.iter().all(|v| *v == 1.0));
    }

    #[test]
    fn little_endian_concatenation() {
        let weights = vec![
            NamedWeight::new("a".into(), vec![1], vec![1.0]).unwrap(),
            NamedWeight::new("b".into(), vec![2], vec![-2.0, 0.5]).unwrap(),
        ];
        let bytes = to_le_bytes(&weights);
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[8..12], &0.5f32.to_le_bytes());
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let err = NamedWeight::new("w".into(), vec![2, 2], vec![0.0; 3]).unwrap_err();
        assert!(err.to_string().contains("needs 4 values"));
    }
}

use burn::nn::loss::CrossEntropyLossConfig;
use burn::tensor::backend::Backend;
use burn::tensor::ElementConversion;
use cifar_dataset::{BatchIter, ImageSet};
use models::CifarCnn;

use crate::classes::class_names;
use crate::util::TrainError;

#[derive(Debug, Clone, PartialEq)]
pub struct ClassAccuracy {
    pub label: usize,
    pub total: usize,
    pub correct: usize,
}

impl ClassAccuracy {
    /// Zero when the class has no samples.
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }

    /// `<zh> (<en>): <pct>%`, names padded to 4 and 10 columns.
    pub fn line(&self) -> String {
        let (zh, en) = class_names(self.label);
        format!("{zh:<4} ({en:<10}): {:5.2}%", self.accuracy() * 100.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvalReport {
    pub loss: f64,
    pub accuracy: f64,
    pub samples: usize,
    pub per_class: Vec<ClassAccuracy>,
}

/// Loss, accuracy and per-class accuracy of `model` over `set`, in inference mode.
pub fn evaluate<B: Backend>(
    model: &CifarCnn<B>,
    set: &ImageSet,
    batch_size: usize,
    device: &B::Device,
) -> Result<EvalReport, TrainError> {
    if set.is_empty() {
        return Err(TrainError::EmptyValidSet);
    }
    let num_classes = model.head.weight.val().dims()[1];
    let mut per_class: Vec<ClassAccuracy> = (0..num_classes)
        .map(|label| ClassAccuracy {
            label,
            total: 0,
            correct: 0,
        })
        .collect();
    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let mut loss_sum = 0.0f64;
    let mut seen = 0usize;

    let mut iter = BatchIter::new(set, batch_size, None, None);
    while let Some(batch) = iter.next_batch::<B>(device) {
        let n = batch.targets.dims()[0];
        let logits = model.forward(batch.images);
        let loss = loss_fn.forward(logits.clone(), batch.targets.clone());
        loss_sum += loss.into_scalar().elem::<f64>() * n as f64;

        let preds = logits
            .argmax(1)
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .map_err(|e| TrainError::Tensor(format!("{e:?}")))?;
        for (offset, pred) in preds.into_iter().enumerate() {
            let label = set_label(&iter, seen + offset, set);
            if let Some(class) = per_class.get_mut(label) {
                class.total += 1;
                if pred == label as i64 {
                    class.correct += 1;
                }
            }
        }
        seen += n;
    }

    let correct: usize = per_class.iter().map(|c| c.correct).sum();
    Ok(EvalReport {
        loss: loss_sum / seen as f64,
        accuracy: correct as f64 / seen as f64,
        samples: seen,
        per_class,
    })
}

fn set_label(iter: &BatchIter<'_>, position: usize, set: &ImageSet) -> usize {
    set.label(iter.order()[position]) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use cifar_dataset::{synthetic_splits, SyntheticConfig};
    use models::CifarCnnConfig;

    #[test]
    fn per_class_line_format() {
        let c = ClassAccuracy {
            label: 3,
            total: 8,
            correct: 6,
        };
        assert_eq!(c.line(), "貓    (cat       ): 75.00%");
        let empty = ClassAccuracy {
            label: 0,
            total: 0,
            correct: 0,
        };
        assert_eq!(empty.line(), "飛機   (airplane  ):  0.00%");
    }

    #[test]
    fn evaluates_every_sample_once() -> anyhow::Result<()> {
        let device = Default::default();
        let splits = synthetic_splits(&SyntheticConfig::default())?;
        let model = CifarCnn::<NdArray<f32>>::new(&CifarCnnConfig::tiny(8), &device);
        let report = evaluate(&model, &splits.test, 7, &device)?;
        assert_eq!(report.samples, splits.test.len());
        assert_eq!(report.per_class.len(), 10);
        assert!(report.per_class.iter().all(|c| c.total == 3));
        assert!(report.loss.is_finite());
        assert!((0.0..=1.0).contains(&report.accuracy));
        Ok(())
    }
}

//! Small deterministic stand-in for CIFAR-10.
//!
//! Each class paints a bright horizontal band at a class-specific row range in a
//! class-specific channel over a dim noisy background, so a tiny CNN can separate the
//! classes within a couple of epochs.

use crate::types::{DatasetResult, ImageSet, Splits};
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticConfig {
    pub train_per_class: usize,
    pub test_per_class: usize,
    pub num_classes: usize,
    /// Square image side.
    pub size: usize,
    pub channels: usize,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            train_per_class: 8,
            test_per_class: 3,
            num_classes: 10,
            size: 8,
            channels: 3,
            seed: 7,
        }
    }
}

pub fn synthetic_splits(cfg: &SyntheticConfig) -> DatasetResult<Splits> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(cfg.seed);
    let train = build_set(cfg, cfg.train_per_class, &mut rng)?;
    let test = build_set(cfg, cfg.test_per_class, &mut rng)?;
    Ok(Splits { train, test })
}

fn build_set(
    cfg: &SyntheticConfig,
    per_class: usize,
    rng: &mut rand::rngs::StdRng,
) -> DatasetResult<ImageSet> {
    let plane = cfg.size * cfg.size;
    let image_len = cfg.channels * plane;
    let total = per_class * cfg.num_classes;
    let mut images = Vec::with_capacity(total * image_len);
    let mut labels = Vec::with_capacity(total);
    // Interleave classes so an unshuffled prefix still covers every label.
    for _ in 0..per_class {
        for class in 0..cfg.num_classes {
            let band_channel = class % cfg.channels.max(1);
            let band_row = (class * cfg.size) / cfg.num_classes.max(1);
            for c in 0..cfg.channels {
                for y in 0..cfg.size {
                    for _x in 0..cfg.size {
                        let in_band = c == band_channel && y == band_row;
                        let base = if in_band { 0.9 } else { 0.1 };
                        let v: f32 = base + rng.random_range(-0.05..0.05);
                        images.push(v.clamp(0.0, 1.0));
                    }
                }
            }
            labels.push(class as u8);
        }
    }
    ImageSet::new(images, labels, cfg.channels, cfg.size, cfg.size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covers_every_class_deterministically() {
        let cfg = SyntheticConfig::default();
        let a = synthetic_splits(&cfg).unwrap();
        let b = synthetic_splits(&cfg).unwrap();
        assert_eq!(a.train, b.train);
        assert_eq!(a.train.len(), 80);
        assert_eq!(a.test.len(), 30);
        assert_eq!(a.test.class_counts(10), vec![3; 10]);
        assert!(a.train.images.iter().all(|v| (0.0..=1.0).contains(v)));
    }
}

//! Batch iteration over an `ImageSet` into burn tensors.

use crate::aug::Augmenter;
use crate::types::ImageSet;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use rand::{seq::SliceRandom, SeedableRng};

pub struct ImageBatch<B: Backend> {
    /// [batch, channels, height, width]
    pub images: Tensor<B, 4>,
    /// [batch] class indices.
    pub targets: Tensor<B, 1, Int>,
}

/// One pass over an image set.
///
/// Order is shuffled when a seed is given, augmentation runs per sample when an augmenter is
/// attached, and the last partial batch is always yielded.
pub struct BatchIter<'a> {
    set: &'a ImageSet,
    order: Vec<usize>,
    cursor: usize,
    batch_size: usize,
    augmenter: Option<Augmenter>,
    images_buf: Vec<f32>,
    labels_buf: Vec<i64>,
}

impl<'a> BatchIter<'a> {
    pub fn new(
        set: &'a ImageSet,
        batch_size: usize,
        shuffle_seed: Option<u64>,
        augmenter: Option<Augmenter>,
    ) -> Self {
        let mut order: Vec<usize> = (0..set.len()).collect();
        if let Some(seed) = shuffle_seed {
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            order.shuffle(&mut rng);
        }
        Self {
            set,
            order,
            cursor: 0,
            batch_size: batch_size.max(1),
            augmenter,
            images_buf: Vec::new(),
            labels_buf: Vec::new(),
        }
    }

    pub fn num_batches(&self) -> usize {
        self.order.len().div_ceil(self.batch_size)
    }

    /// Sample indices in iteration order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Hand the augmenter back so its RNG stream continues into the next pass.
    pub fn into_augmenter(self) -> Option<Augmenter> {
        self.augmenter
    }

    pub fn next_batch<B: Backend>(&mut self, device: &B::Device) -> Option<ImageBatch<B>> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let slice = &self.order[self.cursor..end];
        self.cursor = end;

        let (c, h, w) = (self.set.channels, self.set.height, self.set.width);
        let image_len = self.set.image_len();
        self.images_buf.clear();
        self.images_buf.resize(slice.len() * image_len, 0.0);
        self.labels_buf.clear();

        for (i, &idx) in slice.iter().enumerate() {
            let dst = &mut self.images_buf[i * image_len..(i + 1) * image_len];
            let src = self.set.image(idx);
            match self.augmenter.as_mut() {
                Some(aug) => aug.apply(src, c, h, w, dst),
                None => dst.copy_from_slice(src),
            }
            self.labels_buf.push(self.set.label(idx) as i64);
        }

        let n = slice.len();
        let images = Tensor::<B, 4>::from_data(
            TensorData::new(self.images_buf.clone(), [n, c, h, w]).convert::<B::FloatElem>(),
            device,
        );
        let targets = Tensor::<B, 1, Int>::from_data(
            TensorData::new(self.labels_buf.clone(), [n]).convert::<B::IntElem>(),
            device,
        );
        Some(ImageBatch { images, targets })
    }
}

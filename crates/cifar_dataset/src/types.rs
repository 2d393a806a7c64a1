//! Core types and error definitions for cifar_dataset.

use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("download of {url} failed: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to unpack archive into {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed batch file {path}: {msg}")]
    Format { path: PathBuf, msg: String },
    #[error("{0}")]
    Other(String),
}

/// A labeled image split held in memory.
///
/// Images are stored back to back in CHW layout with values normalized to [0, 1];
/// `labels[i]` is the class index of image `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSet {
    pub images: Vec<f32>,
    pub labels: Vec<u8>,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl ImageSet {
    pub fn new(
        images: Vec<f32>,
        labels: Vec<u8>,
        channels: usize,
        height: usize,
        width: usize,
    ) -> DatasetResult<Self> {
        let image_len = channels * height * width;
        if image_len == 0 {
            return Err(DatasetError::Other(format!(
                "image shape {channels}x{height}x{width} is empty"
            )));
        }
        if images.len() != labels.len() * image_len {
            return Err(DatasetError::Other(format!(
                "expected {} pixel values for {} labels of shape {channels}x{height}x{width}, got {}",
                labels.len() * image_len,
                labels.len(),
                images.len()
            )));
        }
        Ok(Self {
            images,
            labels,
            channels,
            height,
            width,
        })
    }

    /// Build from raw 8-bit pixels, scaling to [0, 1].
    pub fn from_u8(
        pixels: &[u8],
        labels: Vec<u8>,
        channels: usize,
        height: usize,
        width: usize,
    ) -> DatasetResult<Self> {
        let images = pixels.iter().map(|p| *p as f32 / 255.0).collect();
        Self::new(images, labels, channels, height, width)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn image_len(&self) -> usize {
        self.channels * self.height * self.width
    }

    pub fn image(&self, index: usize) -> &[f32] {
        let n = self.image_len();
        &self.images[index * n..(index + 1) * n]
    }

    pub fn label(&self, index: usize) -> u8 {
        self.labels[index]
    }

    /// Number of images per class index, for `num_classes` classes.
    pub fn class_counts(&self, num_classes: usize) -> Vec<usize> {
        let mut counts = vec![0usize; num_classes];
        for &label in &self.labels {
            if let Some(c) = counts.get_mut(label as usize) {
                *c += 1;
            }
        }
        counts
    }
}

/// Train/test pair as shipped by the dataset source.
#[derive(Debug, Clone)]
pub struct Splits {
    pub train: ImageSet,
    pub test: ImageSet,
}

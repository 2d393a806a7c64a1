//! CIFAR-10 acquisition, augmentation and burn batching.
//!
//! This crate provides:
//! - Download/unpack/decode of the CIFAR-10 binary release
//! - A deterministic synthetic stand-in set for tests
//! - Shift/flip augmentation on CHW float images
//! - Burn-compatible batch iteration

pub mod aug;
pub mod batch;
pub mod cifar;
pub mod synthetic;
pub mod types;

pub use aug::{AugmentConfig, Augmenter};
pub use batch::{BatchIter, ImageBatch};
pub use cifar::{Cifar10, BATCHES_DIR, CIFAR10_URL, NUM_CLASSES};
pub use synthetic::{synthetic_splits, SyntheticConfig};
pub use types::*;

//! CIFAR-10 binary release: download, unpack and decode.
//!
//! The binary release stores each split as fixed-size records of one label byte followed by
//! 3072 pixel bytes (the 1024-byte red plane, then green, then blue), which is already the
//! CHW layout the model consumes.

use crate::types::{DatasetError, DatasetResult, ImageSet, Splits};
use flate2::read::GzDecoder;
use std::fs;
use std::path::{Path, PathBuf};
use tar::Archive;

pub const CIFAR10_URL: &str = "https://www.cs.toronto.edu/~kriz/cifar-10-binary.tar.gz";
/// Directory the archive unpacks into.
pub const BATCHES_DIR: &str = "cifar-10-batches-bin";
pub const TRAIN_FILES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];
pub const TEST_FILE: &str = "test_batch.bin";

pub const IMAGE_SIZE: usize = 32;
pub const CHANNELS: usize = 3;
pub const NUM_CLASSES: usize = 10;
const PIXELS: usize = CHANNELS * IMAGE_SIZE * IMAGE_SIZE;
const RECORD_LEN: usize = 1 + PIXELS;

/// CIFAR-10 rooted at a local data directory.
#[derive(Debug, Clone)]
pub struct Cifar10 {
    root: PathBuf,
}

impl Cifar10 {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn batches_dir(&self) -> PathBuf {
        self.root.join(BATCHES_DIR)
    }

    /// True when every split file is already present.
    pub fn is_cached(&self) -> bool {
        let dir = self.batches_dir();
        TRAIN_FILES
            .iter()
            .chain(std::iter::once(&TEST_FILE))
            .all(|f| dir.join(f).is_file())
    }

    /// Download and unpack the archive unless the split files are already cached.
    pub fn ensure_downloaded(&self) -> DatasetResult<PathBuf> {
        let dir = self.batches_dir();
        if self.is_cached() {
            tracing::debug!(dir = %dir.display(), "cifar-10 cache hit");
            return Ok(dir);
        }
        fs::create_dir_all(&self.root).map_err(|source| DatasetError::Io {
            path: self.root.clone(),
            source,
        })?;
        println!("Downloading CIFAR-10 from {CIFAR10_URL} ...");
        let bytes = download(CIFAR10_URL)?;
        tracing::info!(bytes = bytes.len(), "cifar-10 archive downloaded");
        unpack_tar_gz(&bytes, &self.root)?;
        if !self.is_cached() {
            return Err(DatasetError::Other(format!(
                "archive unpacked but {} is incomplete",
                dir.display()
            )));
        }
        Ok(dir)
    }

    /// Load both splits, downloading first if needed.
    pub fn load(&self) -> DatasetResult<Splits> {
        let dir = self.ensure_downloaded()?;
        let mut pixels = Vec::with_capacity(TRAIN_FILES.len() * 10_000 * PIXELS);
        let mut labels = Vec::with_capacity(TRAIN_FILES.len() * 10_000);
        for name in TRAIN_FILES {
            let (p, l) = read_batch_file(&dir.join(name))?;
            pixels.extend_from_slice(&p);
            labels.extend_from_slice(&l);
        }
        let train = ImageSet::from_u8(&pixels, labels, CHANNELS, IMAGE_SIZE, IMAGE_SIZE)?;
        drop(pixels);

        let (p, l) = read_batch_file(&dir.join(TEST_FILE))?;
        let test = ImageSet::from_u8(&p, l, CHANNELS, IMAGE_SIZE, IMAGE_SIZE)?;
        Ok(Splits { train, test })
    }
}

/// Read one split file into (pixels, labels).
pub fn read_batch_file(path: &Path) -> DatasetResult<(Vec<u8>, Vec<u8>)> {
    let bytes = fs::read(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    decode_records(&bytes).map_err(|msg| DatasetError::Format {
        path: path.to_path_buf(),
        msg,
    })
}

/// Split raw records into pixel bytes and labels.
pub fn decode_records(bytes: &[u8]) -> Result<(Vec<u8>, Vec<u8>), String> {
    if bytes.is_empty() || bytes.len() % RECORD_LEN != 0 {
        return Err(format!(
            "length {} is not a positive multiple of the {RECORD_LEN}-byte record",
            bytes.len()
        ));
    }
    let count = bytes.len() / RECORD_LEN;
    let mut pixels = Vec::with_capacity(count * PIXELS);
    let mut labels = Vec::with_capacity(count);
    for (i, record) in bytes.chunks_exact(RECORD_LEN).enumerate() {
        let label = record[0];
        if label as usize >= NUM_CLASSES {
            return Err(format!("record {i} has label {label} outside 0..{NUM_CLASSES}"));
        }
        labels.push(label);
        pixels.extend_from_slice(&record[1..]);
    }
    Ok((pixels, labels))
}

fn download(url: &str) -> DatasetResult<Vec<u8>> {
    let to_err = |source| DatasetError::Download {
        url: url.to_string(),
        source,
    };
    // The archive is ~170 MB; the default client timeout is too short for slow links.
    let client = reqwest::blocking::Client::builder()
        .timeout(None::<std::time::Duration>)
        .build()
        .map_err(to_err)?;
    let response = client
        .get(url)
        .send()
        .and_then(|r| r.error_for_status())
        .map_err(to_err)?;
    let bytes = response.bytes().map_err(to_err)?;
    Ok(bytes.to_vec())
}

fn unpack_tar_gz(bytes: &[u8], dest: &Path) -> DatasetResult<()> {
    let mut archive = Archive::new(GzDecoder::new(bytes));
    archive.unpack(dest).map_err(|source| DatasetError::Archive {
        path: dest.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(label: u8, fill: u8) -> Vec<u8> {
        let mut r = vec![fill; RECORD_LEN];
        r[0] = label;
        r
    }

    #[test]
    fn decodes_records_in_order() {
        let mut bytes = record(3, 7);
        bytes.extend(record(9, 255));
        let (pixels, labels) = decode_records(&bytes).unwrap();
        assert_eq!(labels, vec![3, 9]);
        assert_eq!(pixels.len(), 2 * PIXELS);
        assert_eq!(pixels[0], 7);
        assert_eq!(pixels[PIXELS], 255);
    }

    #[test]
    fn rejects_truncated_and_bad_labels() {
        assert!(decode_records(&[]).is_err());
        assert!(decode_records(&record(1, 0)[..RECORD_LEN - 1]).is_err());
        let err = decode_records(&record(10, 0)).unwrap_err();
        assert!(err.contains("label 10"));
    }
}

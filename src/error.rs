//
// error.rs
// Dicom-Scans-rs
//
// Error taxonomy for loading, geometry checks, argument validation, and archive persistence.
//
// Thales Matheus Mendonça Santos - October 2026

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error returned by the library entry points.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// A directory (or one of its files) yielded no usable imaging data.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no image slices found in {dir:?}")]
    NoImageSlices { dir: PathBuf },
    #[error("no RT structure set found in {dir:?}")]
    NoStructureSet { dir: PathBuf },
    #[error("{path:?} is missing required attribute {attribute}")]
    MissingAttribute {
        path: PathBuf,
        attribute: &'static str,
    },
    #[error("scan has an empty patient id")]
    EmptyPatientId,
    #[error("failed to decode pixel data of {path:?}")]
    PixelData {
        path: PathBuf,
        #[source]
        source: dicom_pixeldata::Error,
    },
    #[error("{path:?} holds {found} pixel values, a {expected}-pixel frame was expected")]
    ShortPixelData {
        path: PathBuf,
        expected: usize,
        found: usize,
    },
    #[error("{path:?} has {samples} samples per pixel; only single-channel images are supported")]
    UnsupportedSamples { path: PathBuf, samples: u32 },
    #[error("failed to read {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Slice metadata that cannot be reconciled into one volume.
#[derive(Debug, Error)]
pub enum ConsistencyError {
    #[error("non-uniform voxel spacing across slices in {dir:?}")]
    NonUniformSpacing { dir: PathBuf },
    #[error("slices in {dir:?} disagree on image orientation")]
    MismatchedOrientation { dir: PathBuf },
    #[error("slices in {dir:?} disagree on dimensions ({expected:?} vs {found:?})")]
    MismatchedDimensions {
        dir: PathBuf,
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("image orientation in {dir:?} is degenerate")]
    DegenerateOrientation { dir: PathBuf },
    #[error("slices in {dir:?} have non-positive pixel spacing or thickness {spacings:?}")]
    NonPositiveSpacing { dir: PathBuf, spacings: [f64; 3] },
    #[error("mask {name:?} has shape {found:?} but the volume has shape {expected:?}")]
    MaskShape {
        name: String,
        expected: [usize; 3],
        found: [usize; 3],
    },
    #[error("patient {patient_id:?} lacks structures for {missing:?} (available: {available:?})")]
    MissingOrgans {
        patient_id: String,
        missing: Vec<String>,
        available: Vec<String>,
    },
}

/// One parameter that failed one of its declared constraints.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{parameter}: {message} ({constraint})")]
pub struct Violation {
    pub parameter: String,
    pub constraint: String,
    pub message: String,
}

/// Aggregated argument failures, at most one per parameter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} invalid argument(s){}", .violations.len(), listed(.violations))]
pub struct ValidationError {
    violations: Vec<Violation>,
}

fn listed(violations: &[Violation]) -> String {
    violations.iter().map(|v| format!("; {v}")).collect()
}

impl ValidationError {
    pub fn new(violations: Vec<Violation>) -> Self {
        Self { violations }
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Violation reported for `parameter`, if it failed.
    pub fn for_parameter(&self, parameter: &str) -> Option<&Violation> {
        self.violations.iter().find(|v| v.parameter == parameter)
    }
}

/// Failures writing or reading the scan archive.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to access archive {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write dataset {name:?}")]
    Write {
        name: String,
        #[source]
        source: ndarray_npy::WriteNpzError,
    },
    #[error("failed to read dataset {name:?}")]
    Read {
        name: String,
        #[source]
        source: ndarray_npy::ReadNpzError,
    },
    #[error("archive group key must not be empty")]
    EmptyKey,
    #[error("archive group {0:?} was written twice")]
    DuplicateKey(String),
    #[error("archive group {key:?} has no {dataset} dataset")]
    MissingDataset { key: String, dataset: &'static str },
    #[error("failed to encode or decode attributes of group {key:?}")]
    Attributes {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("archive group {key:?} is inconsistent")]
    Corrupted {
        key: String,
        #[source]
        source: Box<Error>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_lists_every_violation() {
        let err = ValidationError::new(vec![
            Violation {
                parameter: "volume".to_string(),
                constraint: "ndim(3)".to_string(),
                message: "expected 3 dimensions, got 2".to_string(),
            },
            Violation {
                parameter: "target".to_string(),
                constraint: "positive".to_string(),
                message: "expected a positive value, got -1.0".to_string(),
            },
        ]);

        assert_eq!(
            err.to_string(),
            "2 invalid argument(s); volume: expected 3 dimensions, got 2 (ndim(3)); \
             target: expected a positive value, got -1.0 (positive)"
        );
        assert_eq!(err.for_parameter("target").map(|v| v.constraint.as_str()), Some("positive"));
    }
}

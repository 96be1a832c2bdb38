//
// models.rs
// Dicom-Scans-rs
//
// Defines the loaded patient scan, its serializable attributes, and dataset/intensity statistics.
//
// Thales Matheus Mendonça Santos - October 2026

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::error::{ConsistencyError, LoadError, Result};

/// Structure name → boolean mask on the volume grid.
pub type MaskMap = BTreeMap<String, Array3<bool>>;

/// Descriptive attributes kept next to the arrays of one scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanAttributes {
    pub patient_id: String,
    pub modality: String,
    pub manufacturer: Option<String>,
    pub scanner: Option<String>,
    pub study_date: Option<NaiveDate>,
    /// (rows, columns, slices) of the native stack.
    pub dimension_original: [usize; 3],
    /// Native (row, column, slice) spacing in millimetres.
    pub spacings: [f64; 3],
    /// Spacing of the stored arrays.
    pub voxel_spacing: [f64; 3],
}

/// One patient's volume with its structure masks, all on the same grid.
///
/// Axes are (height, width, depth): top to bottom, left to right, head to feet.
#[derive(Debug, Clone, PartialEq)]
pub struct PatientScan {
    attributes: ScanAttributes,
    volume: Array3<f32>,
    masks: MaskMap,
}

impl PatientScan {
    pub fn new(attributes: ScanAttributes, volume: Array3<f32>, masks: MaskMap) -> Result<Self> {
        if attributes.patient_id.trim().is_empty() {
            return Err(LoadError::EmptyPatientId.into());
        }

        let expected = shape_of(&volume);
        if let Some((name, mask)) = masks.iter().find(|(_, m)| shape_of(m) != expected) {
            return Err(ConsistencyError::MaskShape {
                name: name.clone(),
                expected,
                found: shape_of(mask),
            }
            .into());
        }

        Ok(Self {
            attributes,
            volume,
            masks,
        })
    }

    pub fn attributes(&self) -> &ScanAttributes {
        &self.attributes
    }

    pub fn patient_id(&self) -> &str {
        &self.attributes.patient_id
    }

    pub fn volume(&self) -> &Array3<f32> {
        &self.volume
    }

    pub fn masks(&self) -> &MaskMap {
        &self.masks
    }

    pub fn mask_names(&self) -> Vec<&str> {
        self.masks.keys().map(String::as_str).collect()
    }

    pub fn into_parts(self) -> (ScanAttributes, Array3<f32>, MaskMap) {
        (self.attributes, self.volume, self.masks)
    }
}

pub(crate) fn shape_of<T>(array: &Array3<T>) -> [usize; 3] {
    let (h, w, d) = array.dim();
    [h, w, d]
}

/// Aggregate figures over a set of scans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetStats {
    pub count: usize,
    pub mean_dimension_original: [f64; 3],
    pub mean_dimension_actual: [f64; 3],
    pub mean_spacings: [f64; 3],
    pub manufacturers: BTreeSet<String>,
    pub scanners: BTreeSet<String>,
}

/// Aggregate statistics over voxel values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntensityStatistics {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    pub std_dev: f32,
    pub total_voxels: usize,
    pub shape: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn attributes(patient_id: &str) -> ScanAttributes {
        ScanAttributes {
            patient_id: patient_id.to_string(),
            modality: "CT".to_string(),
            manufacturer: None,
            scanner: None,
            study_date: None,
            dimension_original: [2, 2, 2],
            spacings: [1.0, 1.0, 1.0],
            voxel_spacing: [1.0, 1.0, 1.0],
        }
    }

    #[test]
    fn rejects_masks_off_the_volume_grid() {
        let masks = MaskMap::from([("heart".to_string(), Array3::from_elem((2, 2, 3), false))]);
        let err = PatientScan::new(attributes("P1"), Array3::zeros((2, 2, 2)), masks).unwrap_err();

        match err {
            Error::Consistency(ConsistencyError::MaskShape { name, found, .. }) => {
                assert_eq!(name, "heart");
                assert_eq!(found, [2, 2, 3]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn requires_a_patient_id() {
        let err = PatientScan::new(attributes("  "), Array3::zeros((1, 1, 1)), MaskMap::new())
            .unwrap_err();
        assert!(matches!(err, Error::Load(LoadError::EmptyPatientId)));
    }

    #[test]
    fn attributes_serialize_as_json() {
        let mut attrs = attributes("P7");
        attrs.study_date = NaiveDate::from_ymd_opt(2021, 3, 4);
        let json = serde_json::to_string(&attrs).expect("serialize");
        assert!(json.contains("\"study_date\":\"2021-03-04\""));

        let back: ScanAttributes = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, attrs);
    }
}

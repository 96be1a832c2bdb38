//
// metadata.rs
// Dicom-Scans-rs
//
// Classifies DICOM objects by SOP class and extracts the per-scan attributes recorded alongside each volume.
//
// Thales Matheus Mendonça Santos - October 2026

use std::path::Path;

use chrono::NaiveDate;
use tracing::warn;

use crate::dicom_access::{
    ElementAccess, MANUFACTURER, MANUFACTURER_MODEL_NAME, MODALITY, PATIENT_ID, STUDY_DATE,
};
use crate::error::LoadError;

// SOP Class UIDs recognised by the loader.
pub const CT_IMAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
pub const MR_IMAGE: &str = "1.2.840.10008.5.1.4.1.1.4";
pub const RT_STRUCTURE_SET: &str = "1.2.840.10008.5.1.4.1.1.481.3";

/// Role a DICOM file plays inside one patient directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    ImageSlice,
    StructureSet,
    Other,
}

impl ObjectKind {
    pub fn from_sop_class(uid: &str) -> Self {
        match uid {
            CT_IMAGE | MR_IMAGE => ObjectKind::ImageSlice,
            RT_STRUCTURE_SET => ObjectKind::StructureSet,
            _ => ObjectKind::Other,
        }
    }

    pub fn of<T: ElementAccess>(obj: &T) -> Self {
        obj.sop_class_uid()
            .map(|uid| Self::from_sop_class(&uid))
            .unwrap_or(ObjectKind::Other)
    }
}

/// Descriptive fields shared by every slice of a series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesAttributes {
    pub patient_id: String,
    pub modality: String,
    pub manufacturer: Option<String>,
    pub scanner: Option<String>,
    pub study_date: Option<NaiveDate>,
}

pub fn extract_series_attributes<T: ElementAccess>(
    obj: &T,
    path: &Path,
) -> Result<SeriesAttributes, LoadError> {
    let patient_id = obj
        .element_str(PATIENT_ID)
        .ok_or_else(|| LoadError::MissingAttribute {
            path: path.to_path_buf(),
            attribute: "PatientID",
        })?;
    let modality = obj.element_str(MODALITY).unwrap_or_else(|| "OT".to_string());

    Ok(SeriesAttributes {
        patient_id,
        modality,
        manufacturer: obj.element_str(MANUFACTURER),
        scanner: obj.element_str(MANUFACTURER_MODEL_NAME),
        study_date: obj
            .element_str(STUDY_DATE)
            .and_then(|raw| parse_study_date(&raw, path)),
    })
}

fn parse_study_date(raw: &str, path: &Path) -> Option<NaiveDate> {
    match NaiveDate::parse_from_str(raw, "%Y%m%d") {
        Ok(date) => Some(date),
        Err(_) => {
            warn!(path = %path.display(), study_date = raw, "ignoring unparsable StudyDate");
            None
        }
    }
}

/// Lowercase, trimmed, underscore-separated form used as the mask key.
pub fn standardise_roi_name(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dicom_access::SOP_CLASS_UID;
    use dicom::core::{DataElement, PrimitiveValue, VR};
    use dicom::dictionary_std::StandardDataDictionary;
    use dicom::object::InMemDicomObject;

    fn object_with(entries: &[(dicom::core::Tag, VR, &str)]) -> InMemDicomObject {
        let mut obj = InMemDicomObject::new_empty_with_dict(StandardDataDictionary);
        for (tag, vr, value) in entries {
            obj.put(DataElement::new(*tag, *vr, PrimitiveValue::from(*value)));
        }
        obj
    }

    #[test]
    fn classifies_by_sop_class() {
        let ct = object_with(&[(SOP_CLASS_UID, VR::UI, CT_IMAGE)]);
        let rt = object_with(&[(SOP_CLASS_UID, VR::UI, RT_STRUCTURE_SET)]);
        let dose = object_with(&[(SOP_CLASS_UID, VR::UI, "1.2.840.10008.5.1.4.1.1.481.2")]);
        let bare = object_with(&[]);

        assert_eq!(ObjectKind::of(&ct), ObjectKind::ImageSlice);
        assert_eq!(ObjectKind::of(&rt), ObjectKind::StructureSet);
        assert_eq!(ObjectKind::of(&dose), ObjectKind::Other);
        assert_eq!(ObjectKind::of(&bare), ObjectKind::Other);
    }

    #[test]
    fn extracts_attributes_and_parses_dates() {
        let obj = object_with(&[
            (PATIENT_ID, VR::LO, "12345"),
            (MODALITY, VR::CS, "CT"),
            (MANUFACTURER, VR::LO, "GE"),
            (MANUFACTURER_MODEL_NAME, VR::LO, "Optima"),
            (STUDY_DATE, VR::DA, "20171208"),
        ]);
        let attrs = extract_series_attributes(&obj, Path::new("slice.dcm")).expect("attrs");

        assert_eq!(attrs.patient_id, "12345");
        assert_eq!(attrs.modality, "CT");
        assert_eq!(attrs.manufacturer.as_deref(), Some("GE"));
        assert_eq!(attrs.scanner.as_deref(), Some("Optima"));
        assert_eq!(attrs.study_date, NaiveDate::from_ymd_opt(2017, 12, 8));
    }

    #[test]
    fn missing_patient_id_is_a_load_error() {
        let obj = object_with(&[(MODALITY, VR::CS, "CT")]);
        let err = extract_series_attributes(&obj, Path::new("slice.dcm")).unwrap_err();
        assert!(matches!(
            err,
            LoadError::MissingAttribute {
                attribute: "PatientID",
                ..
            }
        ));
    }

    #[test]
    fn roi_names_are_standardised() {
        assert_eq!(standardise_roi_name("  Left Lung "), "left_lung");
        assert_eq!(standardise_roi_name("PTV 70 obs2"), "ptv_70_obs2");
    }
}

use dicom::core::Tag;
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::mem::InMemElement;
use dicom::object::{DefaultDicomObject, InMemDicomObject};

pub const SOP_CLASS_UID: Tag = Tag(0x0008, 0x0016);
pub const STUDY_DATE: Tag = Tag(0x0008, 0x0020);
pub const MODALITY: Tag = Tag(0x0008, 0x0060);
pub const MANUFACTURER: Tag = Tag(0x0008, 0x0070);
pub const MANUFACTURER_MODEL_NAME: Tag = Tag(0x0008, 0x1090);
pub const PATIENT_ID: Tag = Tag(0x0010, 0x0020);
pub const SLICE_THICKNESS: Tag = Tag(0x0018, 0x0050);
pub const SERIES_INSTANCE_UID: Tag = Tag(0x0020, 0x000E);
pub const IMAGE_POSITION_PATIENT: Tag = Tag(0x0020, 0x0032);
pub const IMAGE_ORIENTATION_PATIENT: Tag = Tag(0x0020, 0x0037);
pub const SAMPLES_PER_PIXEL: Tag = Tag(0x0028, 0x0002);
pub const ROWS: Tag = Tag(0x0028, 0x0010);
pub const COLUMNS: Tag = Tag(0x0028, 0x0011);
pub const PIXEL_SPACING: Tag = Tag(0x0028, 0x0030);
pub const RESCALE_INTERCEPT: Tag = Tag(0x0028, 0x1052);
pub const RESCALE_SLOPE: Tag = Tag(0x0028, 0x1053);
pub const STRUCTURE_SET_ROI_SEQUENCE: Tag = Tag(0x3006, 0x0020);
pub const ROI_NUMBER: Tag = Tag(0x3006, 0x0022);
pub const ROI_NAME: Tag = Tag(0x3006, 0x0026);
pub const ROI_CONTOUR_SEQUENCE: Tag = Tag(0x3006, 0x0039);
pub const CONTOUR_SEQUENCE: Tag = Tag(0x3006, 0x0040);
pub const CONTOUR_GEOMETRIC_TYPE: Tag = Tag(0x3006, 0x0042);
pub const CONTOUR_DATA: Tag = Tag(0x3006, 0x0050);
pub const REFERENCED_ROI_NUMBER: Tag = Tag(0x3006, 0x0084);
pub const PIXEL_DATA: Tag = Tag(0x7fe0, 0x0010);

/// Small helper trait to pull typed values from different DICOM object shapes.
pub trait ElementAccess {
    fn lookup(&self, tag: Tag) -> Option<&InMemElement<StandardDataDictionary>>;

    /// SOP class recorded in the file meta group, when there is one.
    fn media_storage_sop_class(&self) -> Option<String> {
        None
    }

    fn has_element(&self, tag: Tag) -> bool {
        self.lookup(tag).is_some()
    }

    /// Text value with DICOM padding removed; empty strings count as absent.
    fn element_str(&self, tag: Tag) -> Option<String> {
        self.lookup(tag)
            .and_then(|e| e.to_str().ok())
            .map(|s| s.trim_end_matches(['\0', ' ']).trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn element_f64(&self, tag: Tag) -> Option<f64> {
        self.lookup(tag).and_then(|e| e.to_float64().ok())
    }

    fn element_f64s(&self, tag: Tag) -> Option<Vec<f64>> {
        self.lookup(tag).and_then(|e| e.to_multi_float64().ok())
    }

    fn element_u32(&self, tag: Tag) -> Option<u32> {
        self.lookup(tag).and_then(|e| e.to_int::<u32>().ok())
    }

    fn element_i64(&self, tag: Tag) -> Option<i64> {
        self.lookup(tag).and_then(|e| e.to_int::<i64>().ok())
    }

    /// Items of a sequence element; missing or non-sequence elements read as empty.
    fn sequence_items(&self, tag: Tag) -> &[InMemDicomObject<StandardDataDictionary>] {
        self.lookup(tag)
            .and_then(|e| e.value().items())
            .unwrap_or(&[])
    }

    /// SOP Class UID from the dataset, falling back to the file meta group.
    fn sop_class_uid(&self) -> Option<String> {
        self.element_str(SOP_CLASS_UID)
            .or_else(|| self.media_storage_sop_class())
    }
}

impl ElementAccess for DefaultDicomObject {
    fn lookup(&self, tag: Tag) -> Option<&InMemElement<StandardDataDictionary>> {
        self.element(tag).ok()
    }

    fn media_storage_sop_class(&self) -> Option<String> {
        let uid = self
            .meta()
            .media_storage_sop_class_uid
            .trim_end_matches(['\0', ' '])
            .to_string();
        (!uid.is_empty()).then_some(uid)
    }
}

impl ElementAccess for InMemDicomObject<StandardDataDictionary> {
    fn lookup(&self, tag: Tag) -> Option<&InMemElement<StandardDataDictionary>> {
        self.element(tag).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::{DataElement, PrimitiveValue, VR};

    #[test]
    fn strings_are_trimmed_and_blank_values_are_absent() {
        let mut obj = InMemDicomObject::new_empty_with_dict(StandardDataDictionary);
        obj.put(DataElement::new(
            PATIENT_ID,
            VR::LO,
            PrimitiveValue::from("PAT01 "),
        ));
        obj.put(DataElement::new(
            MANUFACTURER,
            VR::LO,
            PrimitiveValue::from("  "),
        ));

        assert_eq!(obj.element_str(PATIENT_ID).as_deref(), Some("PAT01"));
        assert_eq!(obj.element_str(MANUFACTURER), None);
        assert_eq!(obj.element_str(MODALITY), None);
    }

    #[test]
    fn multi_valued_decimal_strings_are_split() {
        let mut obj = InMemDicomObject::new_empty_with_dict(StandardDataDictionary);
        obj.put(DataElement::new(
            PIXEL_SPACING,
            VR::DS,
            PrimitiveValue::Strs(["0.5".to_string(), "0.75".to_string()].into_iter().collect()),
        ));

        assert_eq!(obj.element_f64s(PIXEL_SPACING), Some(vec![0.5, 0.75]));
        assert_eq!(obj.element_f64(PIXEL_SPACING), Some(0.5));
        assert!(obj.sequence_items(CONTOUR_SEQUENCE).is_empty());
    }
}

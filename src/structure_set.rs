//
// structure_set.rs
// Dicom-Scans-rs
//
// Parses RT Structure Set ROIs and rasterises their planar contours into boolean masks on the image grid.
//
// Thales Matheus Mendonça Santos - October 2026

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use ndarray::{Array3, ArrayViewMut2};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::dicom_access::{
    ElementAccess, CONTOUR_DATA, CONTOUR_GEOMETRIC_TYPE, CONTOUR_SEQUENCE, REFERENCED_ROI_NUMBER,
    ROI_CONTOUR_SEQUENCE, ROI_NAME, ROI_NUMBER, STRUCTURE_SET_ROI_SEQUENCE,
};
use crate::geometry::{Vec3, VolumeGeometry};
use crate::metadata::standardise_roi_name;

/// Closed polygon in patient coordinates (millimetres).
#[derive(Debug, Clone, PartialEq)]
pub struct Contour {
    pub points: Vec<Vec3>,
}

/// One region of interest and every contour drawn for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Roi {
    pub number: i64,
    /// Name as written in the structure set.
    pub raw_name: String,
    /// Mask key: trimmed, lowercase, spaces replaced by underscores.
    pub name: String,
    pub contours: Vec<Contour>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructureSet {
    pub path: PathBuf,
    pub rois: Vec<Roi>,
}

/// ROI number, raw name and mask key of one StructureSetROISequence item.
struct RoiEntry {
    number: i64,
    raw_name: String,
    name: String,
}

/// ROIs that become masks, in file order: items need a number and a name, and
/// a repeated mask key keeps its first ROI.
fn roi_entries<T: ElementAccess>(obj: &T, path: &Path) -> Vec<RoiEntry> {
    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    for item in obj.sequence_items(STRUCTURE_SET_ROI_SEQUENCE) {
        let (Some(number), Some(raw_name)) =
            (item.element_i64(ROI_NUMBER), item.element_str(ROI_NAME))
        else {
            warn!(path = %path.display(), "structure set ROI without number or name");
            continue;
        };
        let name = standardise_roi_name(&raw_name);
        if !seen.insert(name.clone()) {
            warn!(path = %path.display(), roi = %raw_name, "duplicate ROI name, keeping the first");
            continue;
        }
        entries.push(RoiEntry {
            number,
            raw_name,
            name,
        });
    }
    entries
}

impl StructureSet {
    /// Mask keys this structure set yields; contour data is not touched.
    pub fn names_from_object<T: ElementAccess>(obj: &T, path: &Path) -> Vec<String> {
        roi_entries(obj, path)
            .into_iter()
            .map(|entry| entry.name)
            .collect()
    }

    pub fn from_object<T: ElementAccess>(obj: &T, path: &Path) -> Self {
        let mut contours_by_roi: BTreeMap<i64, Vec<Contour>> = BTreeMap::new();
        for item in obj.sequence_items(ROI_CONTOUR_SEQUENCE) {
            let Some(number) = item.element_i64(REFERENCED_ROI_NUMBER) else {
                warn!(path = %path.display(), "ROI contour item without ReferencedROINumber");
                continue;
            };
            let contours = contours_by_roi.entry(number).or_default();
            for contour in item.sequence_items(CONTOUR_SEQUENCE) {
                if let Some(parsed) = parse_contour(contour, path) {
                    contours.push(parsed);
                }
            }
        }

        let rois = roi_entries(obj, path)
            .into_iter()
            .map(|entry| Roi {
                contours: contours_by_roi.remove(&entry.number).unwrap_or_default(),
                number: entry.number,
                raw_name: entry.raw_name,
                name: entry.name,
            })
            .collect();

        Self {
            path: path.to_path_buf(),
            rois,
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.rois.iter().map(|roi| roi.name.clone()).collect()
    }

    /// Rasterise every ROI onto the (rows, columns, slices) grid of `geometry`.
    pub fn rasterize(&self, geometry: &VolumeGeometry) -> Vec<(String, Array3<bool>)> {
        self.rois
            .par_iter()
            .map(|roi| (roi.name.clone(), rasterize_roi(roi, geometry)))
            .collect()
    }
}

fn parse_contour<T: ElementAccess>(item: &T, path: &Path) -> Option<Contour> {
    let kind = item.element_str(CONTOUR_GEOMETRIC_TYPE);
    if let Some(kind) = kind.as_deref() {
        if kind != "CLOSED_PLANAR" {
            debug!(path = %path.display(), kind, "skipping non-planar contour");
            return None;
        }
    }

    let data = item.element_f64s(CONTOUR_DATA)?;
    if data.len() < 9 || data.len() % 3 != 0 {
        warn!(path = %path.display(), values = data.len(), "malformed ContourData");
        return None;
    }
    Some(Contour {
        points: data.chunks_exact(3).map(|p| [p[0], p[1], p[2]]).collect(),
    })
}

fn rasterize_roi(roi: &Roi, geometry: &VolumeGeometry) -> Array3<bool> {
    let [rows, columns, depth] = geometry.shape();
    let mut mask = Array3::from_elem((rows, columns, depth), false);

    for contour in &roi.contours {
        let centroid = centroid(&contour.points);
        let Some(slice) = geometry.slice_index(centroid) else {
            debug!(roi = %roi.raw_name, "contour lies outside the image stack");
            continue;
        };
        let polygon: Vec<(f64, f64)> = contour
            .points
            .iter()
            .map(|p| geometry.in_plane_index(*p))
            .collect();
        fill_polygon_xor(
            mask.index_axis_mut(ndarray::Axis(2), slice),
            &polygon,
        );
    }
    mask
}

fn centroid(points: &[Vec3]) -> Vec3 {
    let n = points.len().max(1) as f64;
    let mut sum = [0.0; 3];
    for p in points {
        for axis in 0..3 {
            sum[axis] += p[axis];
        }
    }
    [sum[0] / n, sum[1] / n, sum[2] / n]
}

/// Toggle every pixel whose centre lies inside `polygon` (even-odd rule), so
/// nested contours on the same slice carve holes.
fn fill_polygon_xor(mut plane: ArrayViewMut2<bool>, polygon: &[(f64, f64)]) {
    let (rows, columns) = plane.dim();
    if polygon.len() < 3 || rows == 0 || columns == 0 {
        return;
    }

    let (mut min_r, mut max_r) = (f64::INFINITY, f64::NEG_INFINITY);
    for (r, _) in polygon {
        min_r = min_r.min(*r);
        max_r = max_r.max(*r);
    }
    let first_row = min_r.ceil().max(0.0) as usize;
    let last_row = (max_r.floor().min((rows - 1) as f64)).max(-1.0);
    if last_row < first_row as f64 {
        return;
    }

    for row in first_row..=last_row as usize {
        let y = row as f64;
        let mut crossings: Vec<f64> = Vec::new();
        for (idx, &(r0, c0)) in polygon.iter().enumerate() {
            let (r1, c1) = polygon[(idx + 1) % polygon.len()];
            // Half-open rule so a vertex on the scanline is counted once.
            if (r0 <= y && y < r1) || (r1 <= y && y < r0) {
                crossings.push(c0 + (y - r0) / (r1 - r0) * (c1 - c0));
            }
        }
        crossings.sort_by(f64::total_cmp);

        for span in crossings.chunks_exact(2) {
            let start = span[0].ceil().max(0.0);
            let end = span[1].min((columns - 1) as f64);
            if end < start {
                continue;
            }
            for column in start as usize..=end.floor() as usize {
                // A centre exactly on the closing edge belongs outside.
                if (column as f64) < span[1] {
                    let cell = &mut plane[[row, column]];
                    *cell = !*cell;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SliceGeometry;
    use dicom::core::value::DataSetSequence;
    use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
    use dicom::dictionary_std::StandardDataDictionary;
    use dicom::object::InMemDicomObject;
    use ndarray::Array2;

    fn item(entries: &[(Tag, VR, &str)]) -> InMemDicomObject {
        let mut obj = InMemDicomObject::new_empty_with_dict(StandardDataDictionary);
        for (tag, vr, value) in entries {
            obj.put(DataElement::new(*tag, *vr, PrimitiveValue::from(*value)));
        }
        obj
    }

    fn with_sequence(
        mut obj: InMemDicomObject,
        tag: Tag,
        items: Vec<InMemDicomObject>,
    ) -> InMemDicomObject {
        obj.put(DataElement::new(tag, VR::SQ, DataSetSequence::from(items)));
        obj
    }

    fn grid() -> VolumeGeometry {
        let slice = |z: f64| SliceGeometry {
            position: [0.0, 0.0, z],
            orientation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            pixel_spacing: [1.0, 1.0],
            thickness: 1.0,
            rows: 6,
            columns: 6,
        };
        VolumeGeometry::from_sorted(&[slice(0.0), slice(1.0)], Path::new("p")).expect("grid")
    }

    fn square(min: f64, max: f64, z: f64) -> Contour {
        Contour {
            points: vec![[min, min, z], [max, min, z], [max, max, z], [min, max, z]],
        }
    }

    #[test]
    fn fills_pixel_centres_inside_the_polygon() {
        let mut plane = Array2::from_elem((5, 5), false);
        fill_polygon_xor(plane.view_mut(), &[(0.5, 0.5), (0.5, 3.5), (3.5, 3.5), (3.5, 0.5)]);

        let filled: Vec<_> = plane
            .indexed_iter()
            .filter(|(_, v)| **v)
            .map(|(idx, _)| idx)
            .collect();
        assert_eq!(filled.len(), 9);
        assert!(plane[[1, 1]] && plane[[3, 3]]);
        assert!(!plane[[0, 0]] && !plane[[4, 4]]);
    }

    #[test]
    fn nested_contours_leave_a_hole() {
        let roi = Roi {
            number: 1,
            raw_name: "Ring".to_string(),
            name: "ring".to_string(),
            contours: vec![square(-0.5, 4.5, 1.0), square(1.5, 2.5, 1.0)],
        };
        let mask = rasterize_roi(&roi, &grid());

        assert_eq!(mask.dim(), (6, 6, 2));
        assert!(mask[[0, 0, 1]]);
        assert!(!mask[[2, 2, 1]]);
        assert_eq!(mask.iter().filter(|v| **v).count(), 25 - 1);
        assert!(mask.index_axis(ndarray::Axis(2), 0).iter().all(|v| !v));
    }

    #[test]
    fn contours_off_the_stack_are_skipped() {
        let roi = Roi {
            number: 2,
            raw_name: "Far".to_string(),
            name: "far".to_string(),
            contours: vec![square(0.5, 2.5, 50.0)],
        };
        let mask = rasterize_roi(&roi, &grid());
        assert!(mask.iter().all(|v| !v));
    }

    #[test]
    fn preview_names_are_the_mask_keys() {
        let rois = vec![
            item(&[(ROI_NUMBER, VR::IS, "1"), (ROI_NAME, VR::LO, "Left Lung")]),
            item(&[(ROI_NUMBER, VR::IS, "2"), (ROI_NAME, VR::LO, "left lung ")]),
            // Named but unnumbered: cannot be matched to contours.
            item(&[(ROI_NAME, VR::LO, "Bladder")]),
            item(&[(ROI_NUMBER, VR::IS, "4")]),
            item(&[(ROI_NUMBER, VR::IS, "5"), (ROI_NAME, VR::LO, "Heart")]),
        ];
        let obj = with_sequence(item(&[]), STRUCTURE_SET_ROI_SEQUENCE, rois);
        let path = Path::new("rtstruct.dcm");

        let preview = StructureSet::names_from_object(&obj, path);
        assert_eq!(preview, vec!["left_lung", "heart"]);

        let structures = StructureSet::from_object(&obj, path);
        assert_eq!(structures.names(), preview);
        assert_eq!(structures.rois[0].raw_name, "Left Lung");
        assert_eq!(structures.rasterize(&grid()).len(), preview.len());
    }
}

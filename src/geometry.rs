//
// geometry.rs
// Dicom-Scans-rs
//
// Slice placement in patient space: ordering along the stack normal, spacing checks, and patient-to-voxel mapping.
//
// Thales Matheus Mendonça Santos - October 2026

use std::path::Path;

use crate::dicom_access::{
    ElementAccess, COLUMNS, IMAGE_ORIENTATION_PATIENT, IMAGE_POSITION_PATIENT, PIXEL_SPACING, ROWS,
    SLICE_THICKNESS,
};
use crate::error::{ConsistencyError, LoadError};

const TOLERANCE: f64 = 1e-4;

pub type Vec3 = [f64; 3];

pub fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn close(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() <= TOLERANCE)
}

/// Placement of a single image slice, read from its DICOM header.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceGeometry {
    pub position: Vec3,
    pub orientation: [f64; 6],
    /// Row spacing (between rows) then column spacing, as stored in PixelSpacing.
    pub pixel_spacing: [f64; 2],
    pub thickness: f64,
    pub rows: usize,
    pub columns: usize,
}

impl SliceGeometry {
    pub fn from_object<T: ElementAccess>(obj: &T, path: &Path) -> Result<Self, LoadError> {
        let missing = |attribute| LoadError::MissingAttribute {
            path: path.to_path_buf(),
            attribute,
        };

        let position = obj
            .element_f64s(IMAGE_POSITION_PATIENT)
            .and_then(|v| <[f64; 3]>::try_from(v).ok())
            .ok_or_else(|| missing("ImagePositionPatient"))?;
        let orientation = obj
            .element_f64s(IMAGE_ORIENTATION_PATIENT)
            .and_then(|v| <[f64; 6]>::try_from(v).ok())
            .ok_or_else(|| missing("ImageOrientationPatient"))?;
        let pixel_spacing = obj
            .element_f64s(PIXEL_SPACING)
            .and_then(|v| <[f64; 2]>::try_from(v).ok())
            .ok_or_else(|| missing("PixelSpacing"))?;
        let thickness = obj
            .element_f64(SLICE_THICKNESS)
            .ok_or_else(|| missing("SliceThickness"))?;
        let rows = obj.element_u32(ROWS).ok_or_else(|| missing("Rows"))? as usize;
        let columns = obj.element_u32(COLUMNS).ok_or_else(|| missing("Columns"))? as usize;

        Ok(Self {
            position,
            orientation,
            pixel_spacing,
            thickness,
            rows,
            columns,
        })
    }

    pub fn row_direction(&self) -> Vec3 {
        [self.orientation[0], self.orientation[1], self.orientation[2]]
    }

    pub fn column_direction(&self) -> Vec3 {
        [self.orientation[3], self.orientation[4], self.orientation[5]]
    }

    pub fn normal(&self) -> Vec3 {
        cross(self.row_direction(), self.column_direction())
    }

    /// Position of the slice along the stack normal; slices sort ascending by this key.
    pub fn slice_order(&self) -> f64 {
        dot(self.position, self.normal())
    }
}

/// Shared grid of a sorted slice stack.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeGeometry {
    origin: Vec3,
    row_direction: Vec3,
    column_direction: Vec3,
    normal: Vec3,
    pixel_spacing: [f64; 2],
    thickness: f64,
    rows: usize,
    columns: usize,
    /// Projection of each slice on the normal, in stack order.
    slice_positions: Vec<f64>,
}

impl VolumeGeometry {
    /// Reconcile slices already sorted by [`SliceGeometry::slice_order`].
    pub fn from_sorted(slices: &[SliceGeometry], dir: &Path) -> Result<Self, crate::Error> {
        let first = slices.first().ok_or_else(|| LoadError::NoImageSlices {
            dir: dir.to_path_buf(),
        })?;

        for slice in &slices[1..] {
            if !close(&slice.pixel_spacing, &first.pixel_spacing)
                || !close(&[slice.thickness], &[first.thickness])
            {
                return Err(ConsistencyError::NonUniformSpacing {
                    dir: dir.to_path_buf(),
                }
                .into());
            }
            if !close(&slice.orientation, &first.orientation) {
                return Err(ConsistencyError::MismatchedOrientation {
                    dir: dir.to_path_buf(),
                }
                .into());
            }
            if (slice.rows, slice.columns) != (first.rows, first.columns) {
                return Err(ConsistencyError::MismatchedDimensions {
                    dir: dir.to_path_buf(),
                    expected: (first.rows, first.columns),
                    found: (slice.rows, slice.columns),
                }
                .into());
            }
        }

        let normal = first.normal();
        if dot(normal, normal) < TOLERANCE {
            return Err(ConsistencyError::DegenerateOrientation {
                dir: dir.to_path_buf(),
            }
            .into());
        }
        let spacings = [first.pixel_spacing[0], first.pixel_spacing[1], first.thickness];
        if spacings.iter().any(|s| !(*s > 0.0)) {
            return Err(ConsistencyError::NonPositiveSpacing {
                dir: dir.to_path_buf(),
                spacings,
            }
            .into());
        }

        Ok(Self {
            origin: first.position,
            row_direction: first.row_direction(),
            column_direction: first.column_direction(),
            normal,
            pixel_spacing: first.pixel_spacing,
            thickness: first.thickness,
            rows: first.rows,
            columns: first.columns,
            slice_positions: slices.iter().map(SliceGeometry::slice_order).collect(),
        })
    }

    /// Grid shape as (rows, columns, slices).
    pub fn shape(&self) -> [usize; 3] {
        [self.rows, self.columns, self.slice_positions.len()]
    }

    /// Native spacing along (rows, columns, slices) in millimetres.
    pub fn spacings(&self) -> [f64; 3] {
        [self.pixel_spacing[0], self.pixel_spacing[1], self.thickness]
    }

    /// Continuous (row, column) index of a patient-space point within its slice plane.
    pub fn in_plane_index(&self, point: Vec3) -> (f64, f64) {
        let offset = sub(point, self.origin);
        let column = dot(offset, self.row_direction) / self.pixel_spacing[1];
        let row = dot(offset, self.column_direction) / self.pixel_spacing[0];
        (row, column)
    }

    /// Index of the slice containing `point`, if it lies within half a slice of one.
    pub fn slice_index(&self, point: Vec3) -> Option<usize> {
        let projection = dot(point, self.normal);
        self.slice_positions
            .iter()
            .enumerate()
            .map(|(idx, pos)| (idx, (pos - projection).abs()))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .filter(|(_, distance)| *distance <= self.thickness / 2.0 + TOLERANCE)
            .map(|(idx, _)| idx)
    }
}

//
// volume.rs
// Dicom-Scans-rs
//
// Decodes image slices and stacks them into an intensity volume in canonical orientation (Hounsfield Units for CT).
//
// Thales Matheus Mendonça Santos - October 2026

use std::path::{Path, PathBuf};

use dicom::object::DefaultDicomObject;
use dicom_pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder, VoiLutOption};
use ndarray::{s, Array2, Array3, Axis};

use crate::dicom_access::{
    ElementAccess, RESCALE_INTERCEPT, RESCALE_SLOPE, SAMPLES_PER_PIXEL, SERIES_INSTANCE_UID,
};
use crate::error::LoadError;
use crate::geometry::SliceGeometry;
use crate::metadata::{extract_series_attributes, SeriesAttributes};

/// One image slice with its placement and rescale parameters.
#[derive(Debug, Clone)]
pub struct ImageSlice {
    pub path: PathBuf,
    /// SeriesInstanceUID; slices without one are grouped together.
    pub series_uid: Option<String>,
    pub geometry: SliceGeometry,
    pub attributes: SeriesAttributes,
    pub rescale_slope: f64,
    pub rescale_intercept: f64,
}

impl ImageSlice {
    pub fn from_object(obj: &DefaultDicomObject, path: &Path) -> Result<Self, LoadError> {
        Ok(Self {
            path: path.to_path_buf(),
            series_uid: obj.element_str(SERIES_INSTANCE_UID),
            geometry: SliceGeometry::from_object(obj, path)?,
            attributes: extract_series_attributes(obj, path)?,
            rescale_slope: obj.element_f64(RESCALE_SLOPE).unwrap_or(1.0),
            rescale_intercept: obj.element_f64(RESCALE_INTERCEPT).unwrap_or(0.0),
        })
    }

    pub fn is_ct(&self) -> bool {
        self.attributes.modality.eq_ignore_ascii_case("CT")
    }

    /// Hounsfield Units apply to CT only; other modalities keep stored values.
    pub fn applies_rescale(&self) -> bool {
        self.is_ct()
    }

    /// Decode the first frame as (rows, columns), with the rescale applied when it is CT.
    pub fn decode(&self, obj: &DefaultDicomObject) -> Result<Array2<f32>, LoadError> {
        let samples = obj.element_u32(SAMPLES_PER_PIXEL).unwrap_or(1);
        if samples != 1 {
            return Err(LoadError::UnsupportedSamples {
                path: self.path.clone(),
                samples,
            });
        }

        let pixel_error = |source| LoadError::PixelData {
            path: self.path.clone(),
            source,
        };
        let decoded = obj.decode_pixel_data().map_err(pixel_error)?;

        // Raw stored values: the rescale is applied below so it follows each file's own tags.
        let options = ConvertOptions::new()
            .with_modality_lut(ModalityLutOption::None)
            .with_voi_lut(VoiLutOption::Identity);
        let mut values = decoded
            .to_vec_with_options::<f32>(&options)
            .map_err(pixel_error)?;

        let (rows, columns) = (self.geometry.rows, self.geometry.columns);
        let frame_len = rows * columns;
        let short = |found| LoadError::ShortPixelData {
            path: self.path.clone(),
            expected: frame_len,
            found,
        };
        if values.len() < frame_len {
            return Err(short(values.len()));
        }

        values.truncate(frame_len);
        let mut frame =
            Array2::from_shape_vec((rows, columns), values).map_err(|_| short(frame_len))?;

        if self.applies_rescale() {
            let (slope, intercept) = (self.rescale_slope as f32, self.rescale_intercept as f32);
            frame.mapv_inplace(|v| v * slope + intercept);
        }
        Ok(frame)
    }
}

/// Stack sorted frames along a trailing depth axis: (rows, columns, slices).
pub fn stack_frames(frames: &[Array2<f32>]) -> Option<Array3<f32>> {
    let views: Vec<_> = frames.iter().map(|f| f.view()).collect();
    ndarray::stack(Axis(2), &views).ok()
}

/// Reorient a (rows, columns, slices) stack sorted feet-to-head in LPS so that
/// width runs left to right and depth runs head to feet.
pub fn to_canonical<T: Clone>(stack: Array3<T>) -> Array3<T> {
    stack
        .slice_move(s![.., ..;-1, ..;-1])
        .as_standard_layout()
        .into_owned()
}

//
// preprocess.rs
// Dicom-Scans-rs
//
// Array preprocessing: isotropic resampling, interval mapping, z-score scaling, and bounding-box cropping.
//
// Thales Matheus Mendonça Santos - October 2026

use ndarray::{s, Array, Array3, ArrayBase, Data, Dimension};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::validate::{all_positive, finite, positive, predicate, Invoke, Param, Validated};

/// Sampling used when moving a volume onto a new grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    Nearest,
    #[default]
    Linear,
}

/// Grid shape after resampling `shape` from `spacings` to `target` spacing.
pub fn isotropic_shape(shape: [usize; 3], spacings: [f64; 3], target: f64) -> [usize; 3] {
    let mut out = [0; 3];
    for axis in 0..3 {
        let size = (shape[axis] as f64 * spacings[axis] / target).round();
        out[axis] = (size as usize).max(1);
    }
    out
}

/// Resample `volume` so every axis has `target` spacing.
///
/// Output voxel `i` samples the input at continuous index `i * target / spacing`,
/// clamped to the last input voxel.
pub fn make_isotropic(
    volume: &Array3<f32>,
    spacings: [f64; 3],
    target: f64,
    method: Interpolation,
) -> Result<Array3<f32>, ValidationError> {
    let gate = Validated::new(
        |volume: &Array3<f32>, spacings: [f64; 3], target: f64| {
            let shape = isotropic_shape(dims(volume), spacings, target);
            match method {
                Interpolation::Nearest => resample_nearest(volume, shape, spacings, target),
                Interpolation::Linear => resample_linear(volume, shape, spacings, target),
            }
        },
        (
            Param::new("volume").check(predicate("a non-empty array", |v: &&Array3<f32>| {
                !v.is_empty()
            })),
            Param::new("spacings").check(all_positive()).check(finite()),
            Param::new("target")
                .check(positive())
                .check(predicate("a finite spacing", |t: &f64| t.is_finite())),
        ),
    );
    gate.invoke((volume, spacings, target))
}

/// Nearest-neighbour counterpart of [`make_isotropic`] for label masks.
pub fn make_isotropic_mask(
    mask: &Array3<bool>,
    spacings: [f64; 3],
    target: f64,
) -> Result<Array3<bool>, ValidationError> {
    let gate = Validated::new(
        |mask: &Array3<bool>, spacings: [f64; 3], target: f64| {
            let shape = isotropic_shape(dims(mask), spacings, target);
            resample_nearest(mask, shape, spacings, target)
        },
        (
            Param::new("mask").check(predicate("a non-empty array", |m: &&Array3<bool>| {
                !m.is_empty()
            })),
            Param::new("spacings").check(all_positive()).check(finite()),
            Param::new("target").check(positive()),
        ),
    );
    gate.invoke((mask, spacings, target))
}

fn dims<T>(array: &Array3<T>) -> [usize; 3] {
    let (h, w, d) = array.dim();
    [h, w, d]
}

fn source_coordinate(index: usize, spacing: f64, target: f64, len: usize) -> f64 {
    (index as f64 * target / spacing).clamp(0.0, (len - 1) as f64)
}

fn resample_nearest<T: Clone>(
    src: &Array3<T>,
    shape: [usize; 3],
    spacings: [f64; 3],
    target: f64,
) -> Array3<T> {
    let src_dims = dims(src);
    let lookup: Vec<Vec<usize>> = (0..3)
        .map(|axis| {
            (0..shape[axis])
                .map(|i| {
                    source_coordinate(i, spacings[axis], target, src_dims[axis]).round() as usize
                })
                .collect()
        })
        .collect();

    Array3::from_shape_fn((shape[0], shape[1], shape[2]), |(i, j, k)| {
        src[[lookup[0][i], lookup[1][j], lookup[2][k]]].clone()
    })
}

/// Lower index, upper index and weight of the upper sample along one axis.
fn linear_weights(out_len: usize, spacing: f64, target: f64, len: usize) -> Vec<(usize, usize, f32)> {
    (0..out_len)
        .map(|i| {
            let x = source_coordinate(i, spacing, target, len);
            let lo = x.floor() as usize;
            let hi = (lo + 1).min(len - 1);
            (lo, hi, (x - lo as f64) as f32)
        })
        .collect()
}

fn resample_linear(
    src: &Array3<f32>,
    shape: [usize; 3],
    spacings: [f64; 3],
    target: f64,
) -> Array3<f32> {
    let src_dims = dims(src);
    let weights: Vec<Vec<(usize, usize, f32)>> = (0..3)
        .map(|axis| linear_weights(shape[axis], spacings[axis], target, src_dims[axis]))
        .collect();

    Array3::from_shape_fn((shape[0], shape[1], shape[2]), |(i, j, k)| {
        let (i0, i1, wi) = weights[0][i];
        let (j0, j1, wj) = weights[1][j];
        let (k0, k1, wk) = weights[2][k];
        let lerp = |a: f32, b: f32, w: f32| a + (b - a) * w;

        let c00 = lerp(src[[i0, j0, k0]], src[[i1, j0, k0]], wi);
        let c10 = lerp(src[[i0, j1, k0]], src[[i1, j1, k0]], wi);
        let c01 = lerp(src[[i0, j0, k1]], src[[i1, j0, k1]], wi);
        let c11 = lerp(src[[i0, j1, k1]], src[[i1, j1, k1]], wi);
        lerp(lerp(c00, c10, wj), lerp(c01, c11, wj), wk)
    })
}

/// Linearly map values from `from_range` onto `to_range`.
pub fn map_interval<S, D>(
    array: &ArrayBase<S, D>,
    from_range: (f64, f64),
    to_range: (f64, f64),
) -> Result<Array<f64, D>, ValidationError>
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    let gate = Validated::new(
        |array: &ArrayBase<S, D>, from: (f64, f64), to: (f64, f64)| {
            let width = from.1 - from.0;
            array.mapv(|v| to.0 + (f64::from(v) - from.0) / width * (to.1 - to.0))
        },
        (
            Param::new("array").check(finite()),
            Param::new("from_range").check(predicate(
                "a non-degenerate interval",
                |r: &(f64, f64)| r.0 != r.1 && r.0.is_finite() && r.1.is_finite(),
            )),
            Param::new("to_range").check(predicate("finite bounds", |r: &(f64, f64)| {
                r.0.is_finite() && r.1.is_finite()
            })),
        ),
    );
    gate.invoke((array, from_range, to_range))
}

/// Normalise to zero mean and unit standard deviation; a constant array becomes all zeros.
pub fn z_score_scale<S, D>(array: &ArrayBase<S, D>) -> Array<f32, D>
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    let count = array.len().max(1) as f64;
    let mean = array.iter().map(|v| f64::from(*v)).sum::<f64>() / count;
    let variance = array
        .iter()
        .map(|v| (f64::from(*v) - mean).powi(2))
        .sum::<f64>()
        / count;
    let std_dev = variance.sqrt();

    if std_dev == 0.0 {
        return array.mapv(|_| 0.0);
    }
    array.mapv(|v| ((f64::from(v) - mean) / std_dev) as f32)
}

/// Inclusive voxel bounds of the true region of a mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: [usize; 3],
    pub max: [usize; 3],
}

pub fn bounding_box_3d(mask: &Array3<bool>) -> Option<BoundingBox> {
    let mut bbox: Option<BoundingBox> = None;
    for ((i, j, k), &set) in mask.indexed_iter() {
        if !set {
            continue;
        }
        let point = [i, j, k];
        bbox = Some(match bbox {
            None => BoundingBox {
                min: point,
                max: point,
            },
            Some(mut b) => {
                for axis in 0..3 {
                    b.min[axis] = b.min[axis].min(point[axis]);
                    b.max[axis] = b.max[axis].max(point[axis]);
                }
                b
            }
        });
    }
    bbox
}

/// Copy of the voxels inside `bbox` (bounds inclusive).
pub fn crop_to_bbox_3d<T: Clone>(
    array: &Array3<T>,
    bbox: BoundingBox,
) -> Result<Array3<T>, ValidationError> {
    let shape = dims(array);
    let gate = Validated::new(
        |bbox: BoundingBox| {
            array
                .slice(s![
                    bbox.min[0]..=bbox.max[0],
                    bbox.min[1]..=bbox.max[1],
                    bbox.min[2]..=bbox.max[2]
                ])
                .to_owned()
        },
        (Param::new("bbox")
            .check(predicate("min <= max on every axis", |b: &BoundingBox| {
                (0..3).all(|axis| b.min[axis] <= b.max[axis])
            }))
            .check(predicate("bounds inside the array", move |b: &BoundingBox| {
                (0..3).all(|axis| b.max[axis] < shape[axis])
            })),),
    );
    gate.invoke((bbox,))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    #[test]
    fn isotropic_resampling_changes_shape_by_spacing() {
        let volume = Array3::from_shape_fn((4, 4, 2), |(i, _, _)| i as f32);
        let out = make_isotropic(&volume, [0.5, 1.0, 2.0], 1.0, Interpolation::Linear)
            .expect("resample");

        assert_eq!(out.dim(), (2, 4, 4));
        // Row 1 of the output samples input row 2.
        assert_eq!(out[[1, 0, 0]], 2.0);
        // Slice axis upsampled: index 1 sits halfway between inputs 0 and 1.
        assert_eq!(out[[0, 0, 1]], 0.0);
    }

    #[test]
    fn linear_resampling_interpolates_between_slices() {
        let volume = Array3::from_shape_fn((1, 1, 2), |(_, _, k)| 10.0 * k as f32);
        let out = make_isotropic(&volume, [1.0, 1.0, 2.0], 1.0, Interpolation::Linear)
            .expect("resample");
        assert_eq!(out.dim(), (1, 1, 4));
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![0.0, 5.0, 10.0, 10.0]);

        let nearest = make_isotropic(&volume, [1.0, 1.0, 2.0], 1.0, Interpolation::Nearest)
            .expect("resample");
        assert_eq!(nearest[[0, 0, 0]], 0.0);
        assert_eq!(nearest[[0, 0, 3]], 10.0);
    }

    #[test]
    fn matching_spacing_is_identity() {
        let volume = Array3::from_shape_fn((3, 2, 2), |(i, j, k)| (i * 4 + j * 2 + k) as f32);
        let out = make_isotropic(&volume, [2.0, 2.0, 2.0], 2.0, Interpolation::Linear)
            .expect("resample");
        assert_eq!(out, volume);

        let mask = volume.mapv(|v| v > 5.0);
        let out = make_isotropic_mask(&mask, [2.0, 2.0, 2.0], 2.0).expect("resample");
        assert_eq!(out, mask);
    }

    #[test]
    fn invalid_spacing_is_rejected_before_resampling() {
        let volume = Array3::<f32>::zeros((2, 2, 2));
        let err = make_isotropic(&volume, [1.0, 0.0, 1.0], -1.0, Interpolation::Linear)
            .unwrap_err();
        assert_eq!(err.violations().len(), 2);
        assert!(err.for_parameter("spacings").is_some());
        assert!(err.for_parameter("target").is_some());

        let empty = Array3::<f32>::zeros((0, 2, 2));
        let err = make_isotropic(&empty, [1.0, 1.0, 1.0], 1.0, Interpolation::Linear)
            .unwrap_err();
        assert!(err.for_parameter("volume").is_some());
    }

    #[test]
    fn map_interval_rescales_and_rejects_degenerate_ranges() {
        let arr = array![0.0_f32, 50.0, 100.0];
        let mapped = map_interval(&arr, (0.0, 100.0), (-1.0, 1.0)).expect("map");
        assert_eq!(mapped, array![-1.0, 0.0, 1.0]);

        let err = map_interval(&arr, (5.0, 5.0), (0.0, 1.0)).unwrap_err();
        assert_eq!(err.violations()[0].parameter, "from_range");
    }

    #[test]
    fn z_score_has_zero_mean_unit_variance() {
        let arr = array![1.0_f32, 2.0, 3.0, 4.0];
        let scaled = z_score_scale(&arr);
        let mean: f32 = scaled.sum() / 4.0;
        let var: f32 = scaled.mapv(|v| v * v).sum() / 4.0;
        assert!(mean.abs() < 1e-6);
        assert!((var - 1.0).abs() < 1e-5);

        let flat = Array1::<f32>::from_elem(3, 7.0);
        assert_eq!(z_score_scale(&flat), Array1::<f32>::zeros(3));
    }

    #[test]
    fn bounding_box_and_crop() {
        let mut mask = Array3::from_elem((5, 5, 5), false);
        mask[[1, 2, 3]] = true;
        mask[[3, 2, 1]] = true;

        let bbox = bounding_box_3d(&mask).expect("bbox");
        assert_eq!(bbox.min, [1, 2, 1]);
        assert_eq!(bbox.max, [3, 2, 3]);

        let cropped = crop_to_bbox_3d(&mask, bbox).expect("crop");
        assert_eq!(cropped.dim(), (3, 1, 3));
        assert_eq!(cropped.iter().filter(|v| **v).count(), 2);

        assert!(bounding_box_3d(&Array3::from_elem((2, 2, 2), false)).is_none());

        let outside = BoundingBox {
            min: [0, 0, 0],
            max: [5, 1, 1],
        };
        let err = crop_to_bbox_3d(&mask, outside).unwrap_err();
        assert_eq!(err.violations()[0].constraint, "bounds inside the array");
    }
}

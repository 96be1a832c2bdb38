//
// pipeline.rs
// Dicom-Scans-rs
//
// Turns loaded patient scans into training-ready arrays: ROI selection per organ, isotropic resampling, body cropping, padding, and intensity scaling.
//
// Thales Matheus Mendonça Santos - October 2026

use std::borrow::Borrow;

use ndarray::{s, Array3, Array4, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ConsistencyError, Result, ValidationError};
use crate::models::{MaskMap, PatientScan, ScanAttributes};
use crate::preprocess::{
    bounding_box_3d, make_isotropic, make_isotropic_mask, z_score_scale, Interpolation,
};
use crate::validate::{non_empty, predicate, Invoke, Param, Validated};

/// Substring rules applied to mask names before organs are matched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoiFilter {
    /// A name must contain one of these; an empty list keeps every name.
    pub keep: Vec<String>,
    /// A name containing any of these is dropped.
    pub exclude: Vec<String>,
}

/// One organ channel of the preprocessed masks and the mask names that may stand for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganAliases {
    pub organ: String,
    pub matches: Vec<String>,
}

impl OrganAliases {
    pub fn new<S: Into<String>>(organ: S, matches: impl IntoIterator<Item = S>) -> Self {
        Self {
            organ: organ.into(),
            matches: matches.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessOptions {
    /// Mask channels, in output order.
    pub organs: Vec<OrganAliases>,
    pub roi_filter: RoiFilter,
    /// Smallest (height, width, depth) after cropping; smaller arrays are padded.
    pub min_size: [usize; 3],
    pub target_spacing: f64,
    pub interpolation: Interpolation,
    /// Voxels trimmed from every spatial border before the body is located.
    pub trim_border: usize,
    /// Intensities above this belong to the body.
    pub body_threshold: f32,
}

impl PreprocessOptions {
    pub fn new(organs: Vec<OrganAliases>, min_size: [usize; 3]) -> Self {
        Self {
            organs,
            roi_filter: RoiFilter::default(),
            min_size,
            target_spacing: 1.0,
            interpolation: Interpolation::Linear,
            trim_border: 5,
            body_threshold: -500.0,
        }
    }
}

/// Channel-first arrays of one preprocessed scan.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessedScan {
    pub attributes: ScanAttributes,
    /// Organ of each mask channel.
    pub organs: Vec<String>,
    /// (1, height, width, depth), z-scored.
    pub volume: Array4<f32>,
    /// (organs, height, width, depth).
    pub masks: Array4<bool>,
}

fn is_numeric(name: &str) -> bool {
    name.trim().parse::<f64>().is_ok()
}

/// Names that pass `filter`: no excluded substring, not a bare number, and a kept substring.
pub fn filter_roi_names<S: AsRef<str>>(names: &[S], filter: &RoiFilter) -> Vec<String> {
    names
        .iter()
        .map(|name| name.as_ref())
        .filter(|name| !is_numeric(name))
        .filter(|name| !filter.exclude.iter().any(|ex| name.contains(ex.as_str())))
        .filter(|name| {
            filter.keep.is_empty() || filter.keep.iter().any(|k| name.contains(k.as_str()))
        })
        .map(str::to_string)
        .collect()
}

/// The name in `names` that stands for `organ`: the shortest match, ties broken alphabetically.
pub fn find_organ_roi<'a, S: AsRef<str>>(
    organ: &OrganAliases,
    names: &'a [S],
) -> Option<&'a str> {
    names
        .iter()
        .map(|name| name.as_ref())
        .filter(|name| organ.matches.iter().any(|m| m.as_str() == *name))
        .min_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)))
}

/// Mask name chosen for every organ, in order, or the organs left without one.
fn select_organ_rois(
    names: &[String],
    organs: &[OrganAliases],
    filter: &RoiFilter,
) -> std::result::Result<Vec<String>, Vec<String>> {
    let candidates = filter_roi_names(names, filter);
    let mut chosen = Vec::with_capacity(organs.len());
    let mut missing = Vec::new();
    for organ in organs {
        match find_organ_roi(organ, &candidates) {
            Some(name) => chosen.push(name.to_string()),
            None => missing.push(organ.organ.clone()),
        }
    }
    if missing.is_empty() {
        Ok(chosen)
    } else {
        Err(missing)
    }
}

/// Resample a (height, width, depth) volume and add a leading channel axis.
pub fn preprocess_volume(
    volume: &Array3<f32>,
    spacings: [f64; 3],
    target: f64,
    interpolation: Interpolation,
) -> Result<Array4<f32>, ValidationError> {
    Ok(make_isotropic(volume, spacings, target, interpolation)?.insert_axis(Axis(0)))
}

/// Stack one resampled mask per organ into (organs, height, width, depth).
///
/// `None` when some organ has no matching mask.
pub fn preprocess_mask(
    masks: &MaskMap,
    spacings: [f64; 3],
    target: f64,
    organs: &[OrganAliases],
    filter: &RoiFilter,
) -> Result<Option<Array4<bool>>, ValidationError> {
    type Stacked = Result<Option<Array4<bool>>, ValidationError>;
    let gate = Validated::new(
        |masks: &MaskMap, organs: &[OrganAliases]| -> Stacked {
            let names: Vec<String> = masks.keys().cloned().collect();
            let Ok(chosen) = select_organ_rois(&names, organs, filter) else {
                return Ok(None);
            };

            let mut resampled = Vec::with_capacity(chosen.len());
            for name in &chosen {
                resampled.push(make_isotropic_mask(&masks[name], spacings, target)?);
            }
            let (h, w, d) = resampled[0].dim();
            let mut stacked = Array4::from_elem((resampled.len(), h, w, d), false);
            for (channel, mask) in resampled.iter().enumerate() {
                stacked.index_axis_mut(Axis(0), channel).assign(mask);
            }
            Ok(Some(stacked))
        },
        (
            Param::new("masks").check(predicate("masks on one grid", |m: &&MaskMap| {
                let mut shapes = m.values().map(|mask| mask.dim());
                shapes
                    .next()
                    .map_or(true, |first| shapes.all(|shape| shape == first))
            })),
            Param::new("organs").check(non_empty()),
        ),
    );
    gate.invoke((masks, organs))?
}

/// Spatial part of a channel-first shape.
fn spatial<T>(array: &Array4<T>) -> [usize; 3] {
    let (_, h, w, d) = array.dim();
    [h, w, d]
}

/// Crop a (1, H, W, D) volume and its (C, H, W, D) masks to the body.
///
/// `trim_border` voxels are removed from every spatial border first; the body
/// is every remaining voxel above `threshold`. Without any body voxel only the
/// border trim applies.
pub fn crop_to_body(
    volume: &Array4<f32>,
    masks: &Array4<bool>,
    trim_border: usize,
    threshold: f32,
) -> Result<(Array4<f32>, Array4<bool>), ValidationError> {
    let grid = spatial(volume);
    let gate = Validated::new(
        |volume: &Array4<f32>, masks: &Array4<bool>, t: usize, threshold: f32| {
            let [h, w, d] = grid;
            let volume = volume.slice(s![.., t..h - t, t..w - t, t..d - t]);
            let masks = masks.slice(s![.., t..h - t, t..w - t, t..d - t]);

            let body = volume.index_axis(Axis(0), 0).mapv(|v| v > threshold);
            match bounding_box_3d(&body) {
                Some(b) => {
                    let (lo, hi) = (b.min, b.max);
                    (
                        volume
                            .slice(s![.., lo[0]..=hi[0], lo[1]..=hi[1], lo[2]..=hi[2]])
                            .to_owned(),
                        masks
                            .slice(s![.., lo[0]..=hi[0], lo[1]..=hi[1], lo[2]..=hi[2]])
                            .to_owned(),
                    )
                }
                None => {
                    debug!("no voxel above the body threshold, keeping the trimmed arrays");
                    (volume.to_owned(), masks.to_owned())
                }
            }
        },
        (
            Param::new("volume").check(predicate("a single channel", |v: &&Array4<f32>| {
                v.dim().0 == 1
            })),
            Param::new("masks").check(predicate(
                "the spatial shape of the volume",
                move |m: &&Array4<bool>| spatial(m) == grid,
            )),
            Param::new("trim_border").check(predicate(
                "less than half of every spatial axis",
                move |t: &usize| grid.iter().all(|axis| 2 * t < *axis),
            )),
            Param::new("threshold").check(predicate("a finite threshold", |t: &f32| {
                t.is_finite()
            })),
        ),
    );
    gate.invoke((volume, masks, trim_border, threshold))
}

/// Centre `array` in a grid at least `min_size` large, filling new voxels with `fill`.
fn pad_spatial<T: Clone>(array: &Array4<T>, min_size: [usize; 3], fill: T) -> Array4<T> {
    let (channels, h, w, d) = array.dim();
    let size = [h.max(min_size[0]), w.max(min_size[1]), d.max(min_size[2])];
    let offset = [(size[0] - h) / 2, (size[1] - w) / 2, (size[2] - d) / 2];

    let mut padded = Array4::from_elem((channels, size[0], size[1], size[2]), fill);
    padded
        .slice_mut(s![
            ..,
            offset[0]..offset[0] + h,
            offset[1]..offset[1] + w,
            offset[2]..offset[2] + d
        ])
        .assign(array);
    padded
}

/// Pad volume and masks so every spatial axis reaches `min_size`.
///
/// The volume is padded with its minimum, the masks with `false`; larger axes
/// are left alone.
pub fn ensure_min_size(
    volume: &Array4<f32>,
    masks: &Array4<bool>,
    min_size: [usize; 3],
) -> Result<(Array4<f32>, Array4<bool>), ValidationError> {
    let grid = spatial(volume);
    let gate = Validated::new(
        |volume: &Array4<f32>, masks: &Array4<bool>| {
            let background = volume.iter().fold(f32::INFINITY, |a, &b| a.min(b));
            (
                pad_spatial(volume, min_size, background),
                pad_spatial(masks, min_size, false),
            )
        },
        (
            Param::new("volume").check(predicate("a non-empty array", |v: &&Array4<f32>| {
                !v.is_empty()
            })),
            Param::new("masks").check(predicate(
                "the spatial shape of the volume",
                move |m: &&Array4<bool>| spatial(m) == grid,
            )),
        ),
    );
    gate.invoke((volume, masks))
}

/// Run one scan through resampling, organ selection, body cropping, padding and z-scoring.
pub fn preprocess_patient_scan(
    scan: &PatientScan,
    options: &PreprocessOptions,
) -> Result<PreprocessedScan> {
    let attrs = scan.attributes();
    let missing_organs = |missing: Vec<String>| ConsistencyError::MissingOrgans {
        patient_id: attrs.patient_id.clone(),
        missing,
        available: scan.mask_names().into_iter().map(str::to_string).collect(),
    };
    let names: Vec<String> = scan.masks().keys().cloned().collect();
    select_organ_rois(&names, &options.organs, &options.roi_filter).map_err(missing_organs)?;

    let spacings = attrs.voxel_spacing;
    let volume = preprocess_volume(
        scan.volume(),
        spacings,
        options.target_spacing,
        options.interpolation,
    )?;
    let masks = preprocess_mask(
        scan.masks(),
        spacings,
        options.target_spacing,
        &options.organs,
        &options.roi_filter,
    )?
    .ok_or_else(|| missing_organs(Vec::new()))?;

    let (volume, masks) = crop_to_body(&volume, &masks, options.trim_border, options.body_threshold)?;
    let (volume, masks) = ensure_min_size(&volume, &masks, options.min_size)?;
    // Scaling comes last: the body crop thresholds raw intensities.
    let volume = z_score_scale(&volume);

    debug!(
        patient_id = %attrs.patient_id,
        shape = ?volume.dim(),
        organs = masks.dim().0,
        "preprocessed scan"
    );
    Ok(PreprocessedScan {
        attributes: ScanAttributes {
            voxel_spacing: [options.target_spacing; 3],
            ..attrs.clone()
        },
        organs: options.organs.iter().map(|o| o.organ.clone()).collect(),
        volume,
        masks,
    })
}

fn preprocess_or_skip(scan: &PatientScan, options: &PreprocessOptions) -> Option<PreprocessedScan> {
    match preprocess_patient_scan(scan, options) {
        Ok(done) => Some(done),
        Err(err) => {
            warn!(patient_id = %scan.patient_id(), error = %err, "dropping scan from the dataset");
            None
        }
    }
}

/// Lazily preprocess a dataset; scans that fail are logged and left out.
pub fn preprocess_dataset<'a, I>(
    scans: I,
    options: &'a PreprocessOptions,
) -> impl Iterator<Item = PreprocessedScan> + 'a
where
    I: IntoIterator,
    I::IntoIter: 'a,
    I::Item: Borrow<PatientScan>,
{
    scans
        .into_iter()
        .filter_map(move |scan| preprocess_or_skip(scan.borrow(), options))
}

/// [`preprocess_dataset`] over scans already in memory, spread over the rayon pool.
///
/// Output keeps input order.
pub fn preprocess_dataset_par(
    scans: &[PatientScan],
    options: &PreprocessOptions,
) -> Vec<PreprocessedScan> {
    scans
        .par_iter()
        .filter_map(|scan| preprocess_or_skip(scan, options))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn organs() -> Vec<OrganAliases> {
        vec![
            OrganAliases::new("heart", ["heart", "heart_contour"]),
            OrganAliases::new("lung", ["left_lung", "lung_l", "lung"]),
        ]
    }

    /// 12^3 scan: air at -1000 around a 4^3 body block at 4..8 whose values vary.
    fn body_scan(patient_id: &str, mask_names: &[&str]) -> PatientScan {
        let in_body = |i: usize, j: usize, k: usize| {
            (4..8).contains(&i) && (4..8).contains(&j) && (4..8).contains(&k)
        };
        let volume = Array3::from_shape_fn((12, 12, 12), |(i, j, k)| {
            if in_body(i, j, k) {
                (i + j + k) as f32
            } else {
                -1000.0
            }
        });
        let masks = mask_names
            .iter()
            .map(|name| {
                let mask =
                    Array3::from_shape_fn((12, 12, 12), |(i, j, k)| in_body(i, j, k) && i < 6);
                (name.to_string(), mask)
            })
            .collect();
        let attributes = ScanAttributes {
            patient_id: patient_id.to_string(),
            modality: "CT".to_string(),
            manufacturer: None,
            scanner: None,
            study_date: None,
            dimension_original: [12, 12, 12],
            spacings: [1.0, 1.0, 1.0],
            voxel_spacing: [1.0, 1.0, 1.0],
        };
        PatientScan::new(attributes, volume, masks).expect("scan")
    }

    fn options() -> PreprocessOptions {
        PreprocessOptions {
            trim_border: 2,
            ..PreprocessOptions::new(organs(), [6, 4, 2])
        }
    }

    #[test]
    fn roi_filter_drops_excluded_and_numeric_names() {
        let names = strings(&["heart", "ptv_heart", "123", "left_lung", "ring", "z_opt"]);
        let filter = RoiFilter {
            keep: strings(&["heart", "lung"]),
            exclude: strings(&["ptv", "opt"]),
        };
        assert_eq!(filter_roi_names(&names, &filter), vec!["heart", "left_lung"]);

        let everything = filter_roi_names(&names, &RoiFilter::default());
        assert_eq!(everything.len(), 5);
        assert!(!everything.contains(&"123".to_string()));
    }

    #[test]
    fn organ_lookup_prefers_short_then_alphabetical_names() {
        let lung = &organs()[1];
        let names = strings(&["left_lung", "lung_l", "lung", "lungs"]);
        assert_eq!(find_organ_roi(lung, &names), Some("lung"));

        let tied = OrganAliases::new("kidney", ["kid_r", "kid_l"]);
        assert_eq!(find_organ_roi(&tied, &strings(&["kid_r", "kid_l"])), Some("kid_l"));
        assert_eq!(find_organ_roi(&tied, &strings(&["liver"])), None);
    }

    #[test]
    fn body_crop_ignores_the_border_and_crops_masks_alike() {
        let mut volume = Array4::from_elem((1, 12, 12, 12), -1000.0_f32);
        volume.slice_mut(s![.., 6..9, 6..9, 6..9]).fill(0.0);
        volume[[0, 0, 0, 0]] = 3000.0;
        let mut masks = Array4::from_elem((2, 12, 12, 12), false);
        masks[[1, 7, 7, 7]] = true;

        let (volume, masks) = crop_to_body(&volume, &masks, 2, -500.0).expect("crop");
        assert_eq!(volume.dim(), (1, 3, 3, 3));
        assert_eq!(masks.dim(), (2, 3, 3, 3));
        assert!(volume.iter().all(|v| *v == 0.0));
        assert!(masks[[1, 1, 1, 1]]);
        assert_eq!(masks.iter().filter(|v| **v).count(), 1);

        let err = crop_to_body(&volume, &masks, 2, -500.0).unwrap_err();
        assert!(err.for_parameter("trim_border").is_some());
    }

    #[test]
    fn min_size_pads_with_background_and_false() {
        let volume = Array4::from_shape_fn((1, 2, 3, 4), |(_, i, j, k)| (i + j + k) as f32 + 1.0);
        let masks = Array4::from_elem((1, 2, 3, 4), true);

        let (padded, padded_masks) = ensure_min_size(&volume, &masks, [4, 3, 2]).expect("pad");
        assert_eq!(padded.dim(), (1, 4, 3, 4));
        assert_eq!(padded[[0, 0, 0, 0]], 1.0);
        assert_eq!(padded[[0, 1, 2, 3]], volume[[0, 0, 2, 3]]);
        assert_eq!(padded_masks.iter().filter(|v| **v).count(), 24);
        assert!(!padded_masks[[0, 0, 0, 0]] && !padded_masks[[0, 3, 0, 0]]);

        let off_grid = Array4::from_elem((1, 2, 2, 2), false);
        let err = ensure_min_size(&volume, &off_grid, [1, 1, 1]).unwrap_err();
        assert_eq!(err.violations()[0].parameter, "masks");
    }

    #[test]
    fn patient_scan_becomes_channel_first_arrays() {
        let scan = body_scan("P1", &["heart", "left_lung", "ptv_1"]);
        let done = preprocess_patient_scan(&scan, &options()).expect("preprocess");

        assert_eq!(done.organs, vec!["heart", "lung"]);
        assert_eq!(done.volume.dim(), (1, 6, 4, 4));
        assert_eq!(done.masks.dim(), (2, 6, 4, 4));
        assert_eq!(done.attributes.voxel_spacing, [1.0, 1.0, 1.0]);

        let mean = done.volume.sum() / done.volume.len() as f32;
        assert!(mean.abs() < 1e-4);
        // Rows 4 and 5 of the body, padded by one row on each side.
        for channel in 0..2 {
            let mask = done.masks.index_axis(Axis(0), channel);
            assert_eq!(mask.iter().filter(|v| **v).count(), 2 * 4 * 4);
            assert!(mask[[1, 0, 0]] && mask[[2, 3, 3]] && !mask[[3, 0, 0]] && !mask[[0, 0, 0]]);
        }
    }

    #[test]
    fn missing_organs_are_reported() {
        let scan = body_scan("P2", &["heart", "liver"]);
        match preprocess_patient_scan(&scan, &options()).unwrap_err() {
            Error::Consistency(ConsistencyError::MissingOrgans { missing, available, .. }) => {
                assert_eq!(missing, vec!["lung"]);
                assert_eq!(available, vec!["heart", "liver"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn datasets_drop_incomplete_scans() {
        let scans = vec![
            body_scan("P1", &["heart", "lung"]),
            body_scan("P2", &["heart"]),
            body_scan("P3", &["heart_contour", "lung_l"]),
        ];
        let options = options();

        let lazy: Vec<String> = preprocess_dataset(&scans, &options)
            .map(|done| done.attributes.patient_id)
            .collect();
        assert_eq!(lazy, vec!["P1", "P3"]);

        let parallel = preprocess_dataset_par(&scans, &options);
        assert_eq!(parallel.len(), 2);
        assert_eq!(parallel[1], preprocess_dataset(scans.iter(), &options).nth(1).expect("P3"));
    }
}

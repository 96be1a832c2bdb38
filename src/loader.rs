//
// loader.rs
// Dicom-Scans-rs
//
// Assembles patient directories into volumes and structure masks, singly or lazily over a collection.
//
// Thales Matheus Mendonça Santos - October 2026

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use dicom::object::{open_file, DefaultDicomObject, OpenFileOptions};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::dicom_access::PIXEL_DATA;
use crate::error::{LoadError, Result, ValidationError};
use crate::geometry::VolumeGeometry;
use crate::metadata::{ObjectKind, SeriesAttributes};
use crate::models::{MaskMap, PatientScan, ScanAttributes};
use crate::preprocess::{make_isotropic, make_isotropic_mask, Interpolation};
use crate::structure_set::StructureSet;
use crate::validate::{predicate, Invoke, Param, Validated};
use crate::volume::{stack_frames, to_canonical, ImageSlice};

/// How loaded arrays are placed on their output grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadOptions {
    /// Target isotropic spacing in millimetres; `None` keeps the native grid.
    pub isotropic: Option<f64>,
    /// Sampling for the intensity volume. Masks always use nearest neighbour.
    pub interpolation: Interpolation,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            isotropic: Some(1.0),
            interpolation: Interpolation::Linear,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanLoader {
    options: LoadOptions,
}

/// How much of each file a pass needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    /// Structure set names only.
    Names,
    /// Slice geometry and structure sets; frames are decoded but not kept.
    Geometry,
    /// Everything, with frames kept.
    Pixels,
}

struct LoadedSlice {
    info: ImageSlice,
    frame: Option<Array2<f32>>,
}

#[derive(Default)]
struct PatientFiles {
    slices: Vec<LoadedSlice>,
    structure_set: Option<(PathBuf, DefaultDicomObject)>,
}

/// Sorted slice stack of one patient with its shared grid.
struct Series {
    slices: Vec<LoadedSlice>,
    geometry: VolumeGeometry,
}

impl ScanLoader {
    pub fn new(options: LoadOptions) -> Result<Self, ValidationError> {
        let gate = Validated::new(
            |options: LoadOptions| Self { options },
            (Param::new("options").check(predicate(
                "a positive, finite isotropic spacing",
                |o: &LoadOptions| o.isotropic.map_or(true, |t| t > 0.0 && t.is_finite()),
            )),),
        );
        gate.invoke((options,))
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    /// Intensity volume of one patient, in canonical orientation.
    pub fn load_volume(&self, dir: &Path) -> Result<Array3<f32>> {
        let files = scan_directory(dir, Pass::Pixels)?;
        let mut series = Series::assemble(files.slices, dir)?;
        self.volume_from(series.take_frames(), &series.geometry, dir)
    }

    /// Structure masks of one patient on the grid [`Self::load_volume`] would produce.
    pub fn load_masks(&self, dir: &Path) -> Result<MaskMap> {
        let files = scan_directory(dir, Pass::Geometry)?;
        let (path, obj) = files.structure_set.ok_or_else(|| LoadError::NoStructureSet {
            dir: dir.to_path_buf(),
        })?;
        let series = Series::assemble(files.slices, dir)?;
        self.masks_from(&series.geometry, &StructureSet::from_object(&obj, &path))
    }

    pub fn load_patient_scan(&self, dir: &Path) -> Result<PatientScan> {
        let files = scan_directory(dir, Pass::Pixels)?;
        let (path, obj) = files.structure_set.ok_or_else(|| LoadError::NoStructureSet {
            dir: dir.to_path_buf(),
        })?;
        let mut series = Series::assemble(files.slices, dir)?;

        let volume = self.volume_from(series.take_frames(), &series.geometry, dir)?;
        let masks = self.masks_from(&series.geometry, &StructureSet::from_object(&obj, &path))?;
        let attributes = self.scan_attributes(&series);

        info!(
            dir = %dir.display(),
            patient_id = %attributes.patient_id,
            shape = ?volume.dim(),
            masks = masks.len(),
            "loaded patient scan"
        );
        PatientScan::new(attributes, volume, masks)
    }

    /// Structure names of one patient without decoding any pixel data.
    ///
    /// Names are standardised and deduplicated exactly as mask keys are.
    pub fn load_roi_names(&self, dir: &Path) -> Result<Vec<String>> {
        let files = scan_directory(dir, Pass::Names)?;
        let (path, obj) = files.structure_set.ok_or_else(|| LoadError::NoStructureSet {
            dir: dir.to_path_buf(),
        })?;
        Ok(StructureSet::names_from_object(&obj, &path))
    }

    pub fn all_patient_scans(&self, collection: &Path) -> Result<Collection<PatientScan>> {
        let loader = self.clone();
        Collection::open(collection, move |dir| loader.load_patient_scan(dir))
    }

    pub fn all_volumes(&self, collection: &Path) -> Result<Collection<Array3<f32>>> {
        let loader = self.clone();
        Collection::open(collection, move |dir| loader.load_volume(dir))
    }

    pub fn all_masks(&self, collection: &Path) -> Result<Collection<MaskMap>> {
        let loader = self.clone();
        Collection::open(collection, move |dir| loader.load_masks(dir))
    }

    pub fn all_roi_names(&self, collection: &Path) -> Result<Collection<Vec<String>>> {
        let loader = self.clone();
        Collection::open(collection, move |dir| loader.load_roi_names(dir))
    }

    fn volume_from(
        &self,
        frames: Vec<Array2<f32>>,
        geometry: &VolumeGeometry,
        dir: &Path,
    ) -> Result<Array3<f32>> {
        let stack = stack_frames(&frames).ok_or_else(|| LoadError::NoImageSlices {
            dir: dir.to_path_buf(),
        })?;
        drop(frames);
        let volume = to_canonical(stack);

        match self.options.isotropic {
            Some(target) => Ok(make_isotropic(
                &volume,
                geometry.spacings(),
                target,
                self.options.interpolation,
            )?),
            None => Ok(volume),
        }
    }

    fn masks_from(&self, geometry: &VolumeGeometry, structures: &StructureSet) -> Result<MaskMap> {
        let mut masks = MaskMap::new();
        for (name, mask) in structures.rasterize(geometry) {
            let mask = to_canonical(mask);
            let mask = match self.options.isotropic {
                Some(target) => make_isotropic_mask(&mask, geometry.spacings(), target)?,
                None => mask,
            };
            masks.insert(name, mask);
        }
        Ok(masks)
    }

    fn scan_attributes(&self, series: &Series) -> ScanAttributes {
        let SeriesAttributes {
            patient_id,
            modality,
            manufacturer,
            scanner,
            study_date,
        } = series.slices[0].info.attributes.clone();
        let spacings = series.geometry.spacings();

        ScanAttributes {
            patient_id,
            modality,
            manufacturer,
            scanner,
            study_date,
            dimension_original: series.geometry.shape(),
            spacings,
            voxel_spacing: self.options.isotropic.map_or(spacings, |t| [t; 3]),
        }
    }
}

impl Series {
    fn assemble(mut slices: Vec<LoadedSlice>, dir: &Path) -> Result<Self> {
        slices.sort_by(|a, b| {
            a.info
                .geometry
                .slice_order()
                .total_cmp(&b.info.geometry.slice_order())
        });
        let geometries: Vec<_> = slices.iter().map(|s| s.info.geometry.clone()).collect();
        let geometry = VolumeGeometry::from_sorted(&geometries, dir)?;
        Ok(Self { slices, geometry })
    }

    /// Move the decoded frames out, in stack order.
    fn take_frames(&mut self) -> Vec<Array2<f32>> {
        self.slices
            .iter_mut()
            .filter_map(|slice| slice.frame.take())
            .collect()
    }
}

/// Keep a single series when a directory holds several: CT first, then the
/// series with most slices, then the lowest SeriesInstanceUID.
fn select_series(slices: Vec<LoadedSlice>, dir: &Path) -> Vec<LoadedSlice> {
    let mut series: BTreeMap<Option<String>, Vec<LoadedSlice>> = BTreeMap::new();
    for slice in slices {
        series
            .entry(slice.info.series_uid.clone())
            .or_default()
            .push(slice);
    }

    let chosen = series
        .iter()
        .min_by_key(|(_, slices)| (!slices[0].info.is_ct(), Reverse(slices.len())))
        .map(|(uid, _)| uid.clone());
    let kept = chosen
        .and_then(|uid| series.remove(&uid))
        .unwrap_or_default();

    for (uid, ignored) in &series {
        info!(
            dir = %dir.display(),
            series = uid.as_deref().unwrap_or("<none>"),
            modality = %ignored[0].info.attributes.modality,
            slices = ignored.len(),
            "ignoring additional image series"
        );
    }
    kept
}

/// Every regular file below `dir`, sorted by path.
fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    fs::metadata(dir).map_err(|source| LoadError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        match entry {
            Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
            Ok(_) => {}
            Err(err) => warn!(dir = %dir.display(), error = %err, "skipping unreadable entry"),
        }
    }
    Ok(files)
}

fn scan_directory(dir: &Path, pass: Pass) -> Result<PatientFiles> {
    let mut found = PatientFiles::default();

    for path in list_files(dir)? {
        let opened = match pass {
            Pass::Names => OpenFileOptions::new()
                .read_until(PIXEL_DATA)
                .open_file(&path),
            Pass::Geometry | Pass::Pixels => open_file(&path),
        };
        let obj = match opened {
            Ok(obj) => obj,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping file that is not DICOM");
                continue;
            }
        };

        match ObjectKind::of(&obj) {
            ObjectKind::ImageSlice if pass != Pass::Names => {
                let info = match ImageSlice::from_object(&obj, &path) {
                    Ok(info) => info,
                    Err(err) => {
                        warn!(
                            path = %path.display(),
                            error = %err,
                            "skipping image slice with incomplete header"
                        );
                        continue;
                    }
                };
                if info.geometry.thickness <= 0.0 {
                    debug!(path = %path.display(), "dropping slice with non-positive thickness");
                    continue;
                }
                // Both grid passes decode, so volumes and masks keep the same slices.
                let frame = match info.decode(&obj) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!(
                            path = %path.display(),
                            error = %err,
                            "skipping image slice with unreadable pixel data"
                        );
                        continue;
                    }
                };
                found.slices.push(LoadedSlice {
                    info,
                    frame: (pass == Pass::Pixels).then_some(frame),
                });
            }
            ObjectKind::StructureSet => {
                if found.structure_set.is_some() {
                    info!(path = %path.display(), "ignoring additional RT structure set");
                } else {
                    found.structure_set = Some((path, obj));
                }
            }
            _ => debug!(path = %path.display(), "ignoring unrelated DICOM object"),
        }
    }

    found.slices = select_series(found.slices, dir);
    if pass != Pass::Names && found.slices.is_empty() {
        return Err(LoadError::NoImageSlices {
            dir: dir.to_path_buf(),
        }
        .into());
    }
    Ok(found)
}

/// Lazy, forward-only sequence over the patient directories of a collection.
///
/// Subdirectories are visited in name order. A directory that fails to load is
/// logged, counted in [`Collection::skipped`], and passed over.
pub struct Collection<T> {
    pending: std::vec::IntoIter<PathBuf>,
    load: Box<dyn Fn(&Path) -> Result<T> + Send>,
    last_dir: Option<PathBuf>,
    skipped: Vec<PathBuf>,
}

impl<T> Collection<T> {
    fn open(root: &Path, load: impl Fn(&Path) -> Result<T> + Send + 'static) -> Result<Self> {
        let io_error = |source| LoadError::Io {
            path: root.to_path_buf(),
            source,
        };

        let mut dirs = Vec::new();
        for entry in fs::read_dir(root).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            if path.is_dir() {
                dirs.push(path);
            }
        }
        dirs.sort();
        debug!(collection = %root.display(), patients = dirs.len(), "opened collection");

        Ok(Self {
            pending: dirs.into_iter(),
            load: Box::new(load),
            last_dir: None,
            skipped: Vec::new(),
        })
    }

    /// Number of directories skipped so far.
    pub fn skipped(&self) -> usize {
        self.skipped.len()
    }

    pub fn skipped_dirs(&self) -> &[PathBuf] {
        &self.skipped
    }

    /// Directory that produced the most recently yielded item.
    pub fn last_dir(&self) -> Option<&Path> {
        self.last_dir.as_deref()
    }
}

impl<T> Iterator for Collection<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        for dir in self.pending.by_ref() {
            match (self.load)(dir.as_path()) {
                Ok(item) => {
                    self.last_dir = Some(dir);
                    return Some(item);
                }
                Err(err) => {
                    warn!(dir = %dir.display(), error = %err, "skipping patient directory");
                    self.skipped.push(dir);
                }
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.pending.len()))
    }
}

/// [`ScanLoader::load_volume`] with default options.
pub fn load_volume(dir: &Path) -> Result<Array3<f32>> {
    ScanLoader::default().load_volume(dir)
}

/// [`ScanLoader::load_masks`] with default options.
pub fn load_masks(dir: &Path) -> Result<MaskMap> {
    ScanLoader::default().load_masks(dir)
}

/// [`ScanLoader::load_patient_scan`] with default options.
pub fn load_patient_scan(dir: &Path) -> Result<PatientScan> {
    ScanLoader::default().load_patient_scan(dir)
}

pub fn load_roi_names(dir: &Path) -> Result<Vec<String>> {
    ScanLoader::default().load_roi_names(dir)
}

pub fn all_patient_scans(collection: &Path) -> Result<Collection<PatientScan>> {
    ScanLoader::default().all_patient_scans(collection)
}

pub fn all_volumes(collection: &Path) -> Result<Collection<Array3<f32>>> {
    ScanLoader::default().all_volumes(collection)
}

pub fn all_masks(collection: &Path) -> Result<Collection<MaskMap>> {
    ScanLoader::default().all_masks(collection)
}

pub fn all_roi_names(collection: &Path) -> Result<Collection<Vec<String>>> {
    ScanLoader::default().all_roi_names(collection)
}

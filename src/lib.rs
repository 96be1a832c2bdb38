//
// lib.rs
// Dicom-Scans-rs
//
// Exposes the loader, archive, validation, and preprocessing modules and re-exports the main entry points.
//
// Thales Matheus Mendonça Santos - October 2026

pub mod batch;
pub mod cli;
pub mod curry;
pub mod dicom_access;
pub mod error;
pub mod geometry;
pub mod loader;
pub mod metadata;
pub mod models;
pub mod pipeline;
pub mod preprocess;
pub mod stats;
pub mod storage;
pub mod structure_set;
pub mod validate;
pub mod volume;

pub use batch::purge_dicom_dir;
pub use cli::{run as run_cli, Cli, Commands};
pub use curry::{curry2, curry3};
pub use error::{ConsistencyError, Error, LoadError, PersistenceError, Result, ValidationError};
pub use loader::{
    all_masks, all_patient_scans, all_roi_names, all_volumes, load_masks, load_patient_scan,
    load_roi_names, load_volume, Collection, LoadOptions, ScanLoader,
};
pub use models::{DatasetStats, IntensityStatistics, MaskMap, PatientScan, ScanAttributes};
pub use pipeline::{
    crop_to_body, ensure_min_size, filter_roi_names, find_organ_roi, preprocess_dataset,
    preprocess_dataset_par, preprocess_mask, preprocess_patient_scan, preprocess_volume,
    OrganAliases, PreprocessOptions, PreprocessedScan, RoiFilter,
};
pub use preprocess::Interpolation;
pub use stats::{compute_dataset_stats, intensity_statistics};
pub use storage::{list_keys, read_scans, write_scans};
pub use validate::{Constraint, Invoke, Param, Validated};

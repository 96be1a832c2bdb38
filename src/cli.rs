//
// cli.rs
// Dicom-Scans-rs
//
// Defines the CLI surface with Clap and dispatches commands to the loader, archive, and statistics modules.
//
// Thales Matheus Mendonça Santos - October 2026

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::batch;
use crate::loader::{LoadOptions, ScanLoader};
use crate::models::{IntensityStatistics, PatientScan, ScanAttributes};
use crate::preprocess::Interpolation;
use crate::stats::{compute_dataset_stats, intensity_statistics};
use crate::storage;

#[derive(Parser)]
#[command(name = "dicom-scans")]
#[command(about = "Load DICOM series and RT structure sets into volumes and masks", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
    /// Isotropic voxel spacing in millimetres
    #[arg(long, global = true, default_value_t = 1.0)]
    pub spacing: f64,
    /// Keep the native voxel grid (no resampling)
    #[arg(long, global = true)]
    pub native_spacing: bool,
    /// Sampling used for the intensity volume
    #[arg(long, global = true, value_enum, default_value_t = InterpolationArg::Linear)]
    pub interpolation: InterpolationArg,
    /// Log at debug level (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load one patient directory and summarise it
    Info {
        dir: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// List the structure names of every patient in a collection
    RoiNames { collection: PathBuf },
    /// Load every patient of a collection into one archive
    Convert {
        collection: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Summarise the scans stored in an archive
    Inspect { archive: PathBuf },
    /// Dataset statistics over a collection
    Stats {
        collection: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Remove DICOM files that are neither image slices nor structure sets
    Purge {
        dir: PathBuf,
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum InterpolationArg {
    Nearest,
    Linear,
}

impl From<InterpolationArg> for Interpolation {
    fn from(value: InterpolationArg) -> Self {
        match value {
            InterpolationArg::Nearest => Interpolation::Nearest,
            InterpolationArg::Linear => Interpolation::Linear,
        }
    }
}

/// JSON shape of `info --json`.
#[derive(Serialize)]
struct ScanSummary<'a> {
    attributes: &'a ScanAttributes,
    shape: [usize; 3],
    intensity: Option<IntensityStatistics>,
    /// Structure name → number of voxels set.
    masks: BTreeMap<&'a str, usize>,
}

impl<'a> ScanSummary<'a> {
    fn of(scan: &'a PatientScan) -> Self {
        let (h, w, d) = scan.volume().dim();
        Self {
            attributes: scan.attributes(),
            shape: [h, w, d],
            intensity: intensity_statistics(scan.volume()),
            masks: scan
                .masks()
                .iter()
                .map(|(name, mask)| (name.as_str(), mask.iter().filter(|v| **v).count()))
                .collect(),
        }
    }
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let loader = ScanLoader::new(LoadOptions {
        isotropic: (!cli.native_spacing).then_some(cli.spacing),
        interpolation: cli.interpolation.into(),
    })
    .context("Invalid load options")?;

    match cli.command {
        Commands::Info { dir, json } => {
            let scan = loader
                .load_patient_scan(&dir)
                .with_context(|| format!("Failed to load patient directory {:?}", dir))?;
            print_summary(&ScanSummary::of(&scan), json)?;
        }
        Commands::RoiNames { collection } => {
            let mut names = loader
                .all_roi_names(&collection)
                .context("Failed to open collection")?;
            while let Some(rois) = names.next() {
                println!("{}: {}", display_dir(names.last_dir()), rois.join(", "));
            }
            report_skipped(names.skipped());
        }
        Commands::Convert { collection, output } => {
            let mut scans = loader
                .all_patient_scans(&collection)
                .context("Failed to open collection")?;
            let keyed = std::iter::from_fn(|| {
                let scan = scans.next()?;
                Some((archive_key(scans.last_dir(), &scan), scan))
            });
            let written = storage::write_scans(&output, keyed)
                .with_context(|| format!("Failed to write archive {:?}", output))?;
            report_skipped(scans.skipped());
            println!("Wrote {} scan(s) to {:?}", written, output);
        }
        Commands::Inspect { archive } => {
            let scans = storage::read_scans(&archive)
                .with_context(|| format!("Failed to read archive {:?}", archive))?;
            for (key, scan) in &scans {
                println!("{}", key);
                println!("  Patient: {}", scan.patient_id());
                println!("  Shape:   {:?}", scan.volume().dim());
                println!("  Masks:   {}", scan.mask_names().join(", "));
            }
        }
        Commands::Stats { collection, json } => {
            let mut scans = loader
                .all_patient_scans(&collection)
                .context("Failed to open collection")?;
            let stats = compute_dataset_stats(scans.by_ref());
            report_skipped(scans.skipped());

            let Some(stats) = stats else {
                bail!("No patient scans could be loaded from {:?}", collection);
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Statistics for {:?} ({} scans)", collection, stats.count);
                println!("  Original dims: {:?}", stats.mean_dimension_original);
                println!("  Actual dims:   {:?}", stats.mean_dimension_actual);
                println!("  Spacings:      {:?}", stats.mean_spacings);
                println!("  Manufacturers: {:?}", stats.manufacturers);
                println!("  Scanners:      {:?}", stats.scanners);
            }
        }
        Commands::Purge { dir, dry_run } => {
            let removed = batch::purge_dicom_dir(&dir, dry_run)
                .with_context(|| format!("Failed to purge {:?}", dir))?;
            let verb = if dry_run { "Would remove" } else { "Removed" };
            for path in &removed {
                println!("{} {:?}", verb, path);
            }
            println!("{} {} file(s).", verb, removed.len());
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    // stdout is reserved for command output.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_summary(summary: &ScanSummary<'_>, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    let attrs = summary.attributes;
    println!("Patient {} ({})", attrs.patient_id, attrs.modality);
    if let Some(date) = attrs.study_date {
        println!("  Study date:   {}", date);
    }
    println!("  Native dims:  {:?} @ {:?} mm", attrs.dimension_original, attrs.spacings);
    println!("  Volume dims:  {:?} @ {:?} mm", summary.shape, attrs.voxel_spacing);
    if let Some(stats) = &summary.intensity {
        println!(
            "  Intensity:    min {:.2} | max {:.2} | mean {:.2} | std {:.2}",
            stats.min, stats.max, stats.mean, stats.std_dev
        );
    }
    for (name, voxels) in &summary.masks {
        println!("  Mask {:<20} {} voxels", name, voxels);
    }
    Ok(())
}

/// Archive group of a scan: its patient directory name, else its patient id.
fn archive_key(dir: Option<&Path>, scan: &PatientScan) -> String {
    dir.and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| scan.patient_id().to_string())
}

fn display_dir(dir: Option<&Path>) -> String {
    dir.and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn report_skipped(skipped: usize) {
    if skipped > 0 {
        warn!(skipped, "some patient directories could not be loaded");
    }
}

//
// main.rs
// Dicom-Scans-rs
//
// Binary entry point that hands off argument parsing and dispatch to the CLI layer.
//
// Thales Matheus Mendonça Santos - October 2026

use dicom_scans::cli;

fn main() -> anyhow::Result<()> {
    cli::run()
}

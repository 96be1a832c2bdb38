use std::fs;
use std::path::{Path, PathBuf};

use dicom::object::OpenFileOptions;
use rayon::prelude::*;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::dicom_access::PIXEL_DATA;
use crate::error::{LoadError, Result};
use crate::metadata::ObjectKind;

/// Remove `.dcm` files under `dir` that are valid DICOM but neither image
/// slices nor structure sets. Unparsable files are left in place.
///
/// Returns the removed paths (or, with `dry_run`, those that would be removed), sorted.
pub fn purge_dicom_dir(dir: &Path, dry_run: bool) -> Result<Vec<PathBuf>> {
    fs::metadata(dir).map_err(|source| LoadError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let files: Vec<_> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().map_or(false, |ext| ext == "dcm"))
        .map(|e| e.into_path())
        .collect();
    debug!(dir = %dir.display(), files = files.len(), dry_run, "purging directory");

    let mut removed = files
        .par_iter()
        .filter(|path| is_unrelated(path))
        .map(|path| -> Result<PathBuf> {
            if !dry_run {
                fs::remove_file(path).map_err(|source| LoadError::Io {
                    path: path.clone(),
                    source,
                })?;
            }
            Ok(path.clone())
        })
        .collect::<Result<Vec<_>>>()?;
    removed.sort();

    info!(dir = %dir.display(), removed = removed.len(), dry_run, "purge finished");
    Ok(removed)
}

fn is_unrelated(path: &Path) -> bool {
    match OpenFileOptions::new().read_until(PIXEL_DATA).open_file(path) {
        Ok(obj) => ObjectKind::of(&obj) == ObjectKind::Other,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "leaving unparsable file alone");
            false
        }
    }
}

//
// storage.rs
// Dicom-Scans-rs
//
// Persists patient scans to a single compressed .npz archive, one group of datasets per key, and reads them back.
//
// Thales Matheus Mendonça Santos - October 2026

use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use ndarray::{Array1, Array3};
use ndarray_npy::{NpzReader, NpzWriter};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::PersistenceError;
use crate::models::{MaskMap, PatientScan, ScanAttributes};

const VOLUME: &str = "volume";
const ATTRIBUTES: &str = "attributes";
const MASKS: &str = "masks";
const NPY_SUFFIX: &str = ".npy";

/// Write every `(key, scan)` pair into a new archive at `path`, replacing any existing file.
///
/// Scans are consumed one at a time, so a lazy [`crate::Collection`] can be
/// streamed straight in. The archive is assembled in a temporary file next to
/// `path` and only moved into place once every scan is written; on error the
/// previous file at `path` is untouched.
///
/// Returns the number of scans written.
pub fn write_scans<K, S, I>(path: &Path, scans: I) -> Result<usize, PersistenceError>
where
    K: AsRef<str>,
    S: Borrow<PatientScan>,
    I: IntoIterator<Item = (K, S)>,
{
    let io_error = |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    };
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let staging = NamedTempFile::new_in(parent).map_err(io_error)?;
    let file = staging.as_file().try_clone().map_err(io_error)?;
    let mut npz = NpzWriter::new_compressed(BufWriter::new(file));
    let mut written = HashSet::new();

    for (key, scan) in scans {
        let (key, scan) = (key.as_ref(), scan.borrow());
        if key.is_empty() {
            return Err(PersistenceError::EmptyKey);
        }
        if !written.insert(key.to_string()) {
            return Err(PersistenceError::DuplicateKey(key.to_string()));
        }
        let group = escape(key);

        let attributes =
            serde_json::to_vec(scan.attributes()).map_err(|source| PersistenceError::Attributes {
                key: key.to_string(),
                source,
            })?;
        add(&mut npz, format!("{group}/{ATTRIBUTES}"), &Array1::from(attributes))?;
        add(&mut npz, format!("{group}/{VOLUME}"), scan.volume())?;
        for (name, mask) in scan.masks() {
            add(&mut npz, format!("{group}/{MASKS}/{}", escape(name)), mask)?;
        }
        debug!(key, masks = scan.masks().len(), "archived scan");
    }

    let mut writer = npz.finish().map_err(|source| PersistenceError::Write {
        name: path.display().to_string(),
        source,
    })?;
    writer.flush().map_err(io_error)?;
    staging
        .persist(path)
        .map_err(|err| io_error(err.error))?;
    info!(path = %path.display(), scans = written.len(), "wrote scan archive");
    Ok(written.len())
}

fn add<S, D>(
    npz: &mut NpzWriter<BufWriter<File>>,
    name: String,
    array: &ndarray::ArrayBase<S, D>,
) -> Result<(), PersistenceError>
where
    S: ndarray::Data,
    S::Elem: ndarray_npy::WritableElement,
    D: ndarray::Dimension,
{
    let stored = format!("{name}{NPY_SUFFIX}");
    npz.add_array(stored, array)
        .map_err(|source| PersistenceError::Write { name, source })
}

/// Dataset locations of one group, by unescaped key.
#[derive(Default)]
struct Group {
    volume: Option<String>,
    attributes: Option<String>,
    masks: BTreeMap<String, String>,
}

fn open_reader(path: &Path) -> Result<NpzReader<File>, PersistenceError> {
    let file = File::open(path).map_err(|source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    NpzReader::new(file).map_err(|source| PersistenceError::Read {
        name: path.display().to_string(),
        source,
    })
}

fn index_groups(
    npz: &mut NpzReader<File>,
    path: &Path,
) -> Result<BTreeMap<String, Group>, PersistenceError> {
    let names = npz.names().map_err(|source| PersistenceError::Read {
        name: path.display().to_string(),
        source,
    })?;

    let mut groups: BTreeMap<String, Group> = BTreeMap::new();
    for stored in names {
        // Every dataset is written with exactly one suffix; anything else is foreign.
        let Some(entry) = stored.strip_suffix(NPY_SUFFIX) else {
            warn!(entry = %stored, "ignoring entry without the .npy suffix");
            continue;
        };
        let Some((group, dataset)) = entry.split_once('/') else {
            warn!(entry, "ignoring dataset outside any group");
            continue;
        };
        let slot = groups.entry(unescape(group)).or_default();
        match dataset.split_once('/') {
            None if dataset == VOLUME => slot.volume = Some(stored.clone()),
            None if dataset == ATTRIBUTES => slot.attributes = Some(stored.clone()),
            Some((MASKS, name)) => {
                slot.masks.insert(unescape(name), stored.clone());
            }
            _ => warn!(entry, "ignoring unknown dataset"),
        }
    }
    Ok(groups)
}

/// Keys of every group in the archive, sorted, without loading any arrays.
pub fn list_keys(path: &Path) -> Result<Vec<String>, PersistenceError> {
    let mut npz = open_reader(path)?;
    let keys: BTreeSet<String> = index_groups(&mut npz, path)?.into_keys().collect();
    Ok(keys.into_iter().collect())
}

/// Read every group of the archive back into scans keyed as they were written.
pub fn read_scans(path: &Path) -> Result<BTreeMap<String, PatientScan>, PersistenceError> {
    let mut npz = open_reader(path)?;
    let groups = index_groups(&mut npz, path)?;

    let mut scans = BTreeMap::new();
    for (key, group) in groups {
        let missing = |dataset| PersistenceError::MissingDataset {
            key: key.clone(),
            dataset,
        };
        let attributes_name = group.attributes.ok_or_else(|| missing(ATTRIBUTES))?;
        let volume_name = group.volume.ok_or_else(|| missing(VOLUME))?;

        let raw: Array1<u8> = read(&mut npz, &attributes_name)?;
        let attributes: ScanAttributes = serde_json::from_slice(&raw.to_vec()).map_err(|source| {
            PersistenceError::Attributes {
                key: key.clone(),
                source,
            }
        })?;
        let volume: Array3<f32> = read(&mut npz, &volume_name)?;

        let mut masks = MaskMap::new();
        for (name, stored) in group.masks {
            masks.insert(name, read(&mut npz, &stored)?);
        }

        let scan = PatientScan::new(attributes, volume, masks).map_err(|err| {
            PersistenceError::Corrupted {
                key: key.clone(),
                source: Box::new(err),
            }
        })?;
        scans.insert(key, scan);
    }

    info!(path = %path.display(), scans = scans.len(), "read scan archive");
    Ok(scans)
}

fn read<A, D>(npz: &mut NpzReader<File>, name: &str) -> Result<ndarray::Array<A, D>, PersistenceError>
where
    A: ndarray_npy::ReadableElement,
    D: ndarray::Dimension,
{
    npz.by_name(name).map_err(|source| PersistenceError::Read {
        name: name.to_string(),
        source,
    })
}

/// Percent-escape the group separator and the escape character itself.
fn escape(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for ch in part.chars() {
        match ch {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            _ => out.push(ch),
        }
    }
    out
}

fn unescape(part: &str) -> String {
    part.replace("%2F", "/").replace("%25", "%")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn scan(patient_id: &str) -> PatientScan {
        let attributes = ScanAttributes {
            patient_id: patient_id.to_string(),
            modality: "CT".to_string(),
            manufacturer: Some("ACME".to_string()),
            scanner: None,
            study_date: None,
            dimension_original: [2, 3, 4],
            spacings: [1.0, 1.0, 2.0],
            voxel_spacing: [1.0, 1.0, 2.0],
        };
        let volume = Array3::from_shape_fn((2, 3, 4), |(i, j, k)| (i * 12 + j * 4 + k) as f32 - 1000.5);
        let masks = MaskMap::from([
            ("a/b".to_string(), Array3::from_shape_fn((2, 3, 4), |(i, _, _)| i == 1)),
            ("heart".to_string(), Array3::from_elem((2, 3, 4), false)),
        ]);
        PatientScan::new(attributes, volume, masks).expect("scan")
    }

    #[test]
    fn escaping_is_reversible_for_separators() {
        for raw in ["plain", "a/b", "100%", "%2F/"] {
            let escaped = escape(raw);
            assert!(!escaped.contains('/'));
            assert_eq!(unescape(&escaped), raw);
        }
    }

    #[test]
    fn round_trip_preserves_arrays_and_names() {
        let dir = tempdir().expect("tmpdir");
        let path = dir.path().join("scans.npz");
        let one = scan("P1");
        let two = scan("P2");

        let written = write_scans(&path, [("patient/1", &one), ("patient%2", &two)]).expect("write");
        assert_eq!(written, 2);
        assert_eq!(list_keys(&path).expect("keys"), vec!["patient%2", "patient/1"]);

        let back = read_scans(&path).expect("read");
        assert_eq!(back["patient/1"], one);
        assert_eq!(back["patient%2"], two);
        assert_eq!(back["patient/1"].mask_names(), vec!["a/b", "heart"]);
    }

    #[test]
    fn rejects_empty_and_duplicate_keys() {
        let dir = tempdir().expect("tmpdir");
        let path = dir.path().join("scans.npz");
        let one = scan("P1");

        assert!(matches!(
            write_scans(&path, [("", &one)]),
            Err(PersistenceError::EmptyKey)
        ));
        assert!(matches!(
            write_scans(&path, [("k", &one), ("k", &one)]),
            Err(PersistenceError::DuplicateKey(key)) if key == "k"
        ));
    }

    #[test]
    fn names_ending_in_the_dataset_suffix_survive() {
        let dir = tempdir().expect("tmpdir");
        let path = dir.path().join("scans.npz");
        let (attributes, volume, _) = scan("P1").into_parts();
        let masks = MaskMap::from([("liver.npy".to_string(), Array3::from_elem((2, 3, 4), true))]);
        let odd = PatientScan::new(attributes, volume, masks).expect("scan");

        write_scans(&path, [("group.npy", &odd)]).expect("write");
        assert_eq!(list_keys(&path).expect("keys"), vec!["group.npy"]);
        let back = read_scans(&path).expect("read");
        assert_eq!(back["group.npy"].mask_names(), vec!["liver.npy"]);
        assert_eq!(back["group.npy"], odd);
    }

    #[test]
    fn failed_write_keeps_the_previous_archive() {
        let dir = tempdir().expect("tmpdir");
        let path = dir.path().join("scans.npz");
        let one = scan("P1");
        write_scans(&path, [("good", &one)]).expect("write");

        let err = write_scans(&path, [("fresh", &one), ("fresh", &one)]).unwrap_err();
        assert!(matches!(err, PersistenceError::DuplicateKey(_)));
        assert_eq!(list_keys(&path).expect("keys"), vec!["good"]);
        assert_eq!(read_scans(&path).expect("read")["good"], one);

        let leftovers = std::fs::read_dir(dir.path()).expect("list").count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn accepts_owned_scans_from_an_iterator() {
        let dir = tempdir().expect("tmpdir");
        let path = dir.path().join("scans.npz");
        let scans = ["P1", "P2", "P3"].into_iter().map(|id| (id.to_lowercase(), scan(id)));

        assert_eq!(write_scans(&path, scans).expect("write"), 3);
        assert_eq!(list_keys(&path).expect("keys"), vec!["p1", "p2", "p3"]);
    }

    #[test]
    fn missing_archive_is_an_io_error() {
        let dir = tempdir().expect("tmpdir");
        assert!(matches!(
            read_scans(&dir.path().join("absent.npz")),
            Err(PersistenceError::Io { .. })
        ));
    }
}

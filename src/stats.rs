use std::borrow::Borrow;
use std::collections::BTreeSet;

use ndarray::{ArrayBase, Data, Dimension};

use crate::models::{shape_of, DatasetStats, IntensityStatistics, PatientScan};

/// Summarise a set of scans; `None` when there is nothing to summarise.
///
/// Scans are folded one at a time and may be borrowed or owned.
pub fn compute_dataset_stats<I>(scans: I) -> Option<DatasetStats>
where
    I: IntoIterator,
    I::Item: Borrow<PatientScan>,
{
    let mut count = 0usize;
    let mut original = [0.0; 3];
    let mut actual = [0.0; 3];
    let mut spacings = [0.0; 3];
    let mut manufacturers = BTreeSet::new();
    let mut scanners = BTreeSet::new();

    for scan in scans {
        let scan = scan.borrow();
        let attrs = scan.attributes();
        let shape = shape_of(scan.volume());
        for axis in 0..3 {
            original[axis] += attrs.dimension_original[axis] as f64;
            actual[axis] += shape[axis] as f64;
            spacings[axis] += attrs.spacings[axis];
        }
        manufacturers.extend(attrs.manufacturer.clone());
        scanners.extend(attrs.scanner.clone());
        count += 1;
    }

    if count == 0 {
        return None;
    }
    let n = count as f64;
    Some(DatasetStats {
        count,
        mean_dimension_original: original.map(|v| v / n),
        mean_dimension_actual: actual.map(|v| v / n),
        mean_spacings: spacings.map(|v| v / n),
        manufacturers,
        scanners,
    })
}

/// Min, max, mean and population standard deviation of the voxel values.
pub fn intensity_statistics<S, D>(volume: &ArrayBase<S, D>) -> Option<IntensityStatistics>
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    if volume.is_empty() {
        return None;
    }

    let min = volume.iter().fold(f32::INFINITY, |a, &b| a.min(b));
    let max = volume.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let count = volume.len() as f64;
    let mean = volume.iter().map(|v| f64::from(*v)).sum::<f64>() / count;

    let variance = volume
        .iter()
        .map(|x| {
            let diff = mean - f64::from(*x);
            diff * diff
        })
        .sum::<f64>()
        / count;

    Some(IntensityStatistics {
        min,
        max,
        mean: mean as f32,
        std_dev: variance.sqrt() as f32,
        total_voxels: volume.len(),
        shape: volume.shape().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MaskMap, ScanAttributes};
    use ndarray::{array, Array3};

    fn scan(id: &str, shape: (usize, usize, usize), manufacturer: &str) -> PatientScan {
        let attributes = ScanAttributes {
            patient_id: id.to_string(),
            modality: "CT".to_string(),
            manufacturer: Some(manufacturer.to_string()),
            scanner: None,
            study_date: None,
            dimension_original: [shape.0 * 2, shape.1 * 2, shape.2],
            spacings: [0.5, 0.5, 1.0],
            voxel_spacing: [1.0, 1.0, 1.0],
        };
        PatientScan::new(attributes, Array3::zeros(shape), MaskMap::new()).expect("scan")
    }

    #[test]
    fn dataset_stats_average_dimensions() {
        let scans = [scan("a", (2, 2, 2), "ACME"), scan("b", (4, 4, 2), "ACME")];
        let stats = compute_dataset_stats(&scans).expect("stats");

        assert_eq!(stats.count, 2);
        assert_eq!(stats.mean_dimension_actual, [3.0, 3.0, 2.0]);
        assert_eq!(stats.mean_dimension_original, [6.0, 6.0, 2.0]);
        assert_eq!(stats.mean_spacings, [0.5, 0.5, 1.0]);
        assert_eq!(stats.manufacturers.len(), 1);
        assert!(stats.scanners.is_empty());

        assert!(compute_dataset_stats(Vec::<PatientScan>::new()).is_none());

        let streamed = ["a", "b", "c"].into_iter().map(|id| scan(id, (2, 2, 2), id));
        let stats = compute_dataset_stats(streamed).expect("stats");
        assert_eq!(stats.count, 3);
        assert_eq!(stats.manufacturers.len(), 3);
    }

    #[test]
    fn intensity_statistics_match_hand_computation() {
        let stats = intensity_statistics(&array![[1.0_f32, 3.0], [3.0, 1.0]]).expect("stats");
        assert_eq!((stats.min, stats.max, stats.mean), (1.0, 3.0, 2.0));
        assert!((stats.std_dev - 1.0).abs() < 1e-6);
        assert_eq!(stats.shape, vec![2, 2]);
        assert!(intensity_statistics(&Array3::<f32>::zeros((0, 1, 1))).is_none());
    }
}

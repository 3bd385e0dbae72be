//! Base clustering primitives run inside one realization.

use std::fmt;
use std::str::FromStr;

use linfa::DatasetBase;
use linfa::traits::{Fit, Predict};
use linfa_clustering::{GaussianMixtureModel, KMeans};
use ndarray::{Array2, ArrayView1, Axis};
use rand::RngCore;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::error::{AcError, Result};
use crate::linkage::{Condensed, Linkage, agglomerate};

/// Base clustering algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BaseMethod {
    #[default]
    #[serde(rename = "kmeans")]
    KMeans,
    #[serde(rename = "gmm")]
    Gmm,
    #[serde(rename = "hier")]
    Hier,
}

impl fmt::Display for BaseMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BaseMethod::KMeans => "kmeans",
            BaseMethod::Gmm => "gmm",
            BaseMethod::Hier => "hier",
        })
    }
}

impl FromStr for BaseMethod {
    type Err = AcError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "kmeans" => Ok(BaseMethod::KMeans),
            "gmm" => Ok(BaseMethod::Gmm),
            "hier" => Ok(BaseMethod::Hier),
            other => Err(AcError::config(
                "cluster_method",
                format!("unknown method {other:?}, expected kmeans, gmm or hier"),
            )),
        }
    }
}

/// Labels and per-cluster centres of one base run.
#[derive(Debug, Clone)]
pub struct BaseFit {
    pub labels: Vec<u32>,
    /// k × d feature-space centres (means for gmm).
    pub centroids: Array2<f64>,
}

impl BaseFit {
    /// Index of the centre closest to `row` in squared Euclidean distance.
    pub fn nearest_centroid(&self, row: ArrayView1<'_, f64>) -> u32 {
        let mut best = 0usize;
        let mut best_d = f64::INFINITY;
        for (c, centre) in self.centroids.axis_iter(Axis(0)).enumerate() {
            let d: f64 = centre
                .iter()
                .zip(row.iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum();
            if d < best_d {
                best = c;
                best_d = d;
            }
        }
        best as u32
    }
}

const KMEANS_RUNS: usize = 4;
const GMM_RUNS: u64 = 2;
const MAX_ITERATIONS: u64 = 300;

/// Clusters the rows of `features` into `k` groups.
///
/// Seeds for the underlying primitives are drawn from `rng`, so a run is
/// fully determined by the generator state.
pub fn cluster(
    features: &Array2<f64>,
    k: usize,
    method: BaseMethod,
    rng: &mut StdRng,
) -> Result<BaseFit> {
    let n = features.nrows();
    if k == 0 || n < k {
        return Err(AcError::BaseCluster(format!(
            "cannot form {k} clusters from {n} points"
        )));
    }
    let seed = rng.next_u64();

    match method {
        BaseMethod::KMeans => {
            let dataset = DatasetBase::from(features.clone());
            let model = KMeans::params_with_rng(k, StdRng::seed_from_u64(seed))
                .n_runs(KMEANS_RUNS)
                .max_n_iterations(MAX_ITERATIONS)
                .tolerance(1e-6)
                .fit(&dataset)
                .map_err(|e| AcError::BaseCluster(format!("kmeans: {e}")))?;
            let assigned = model.predict(features);
            Ok(BaseFit {
                labels: assigned.iter().map(|&l| l as u32).collect(),
                centroids: model.centroids().clone(),
            })
        }
        BaseMethod::Gmm => {
            let dataset = DatasetBase::from(features.clone());
            let model = GaussianMixtureModel::params_with_rng(k, StdRng::seed_from_u64(seed))
                .n_runs(GMM_RUNS)
                .max_n_iterations(MAX_ITERATIONS)
                .tolerance(1e-4)
                .reg_covariance(1e-6)
                .fit(&dataset)
                .map_err(|e| AcError::BaseCluster(format!("gmm: {e}")))?;
            let assigned = model.predict(features);
            Ok(BaseFit {
                labels: assigned.iter().map(|&l| l as u32).collect(),
                centroids: model.means().clone(),
            })
        }
        BaseMethod::Hier => {
            let rows: Vec<ArrayView1<'_, f64>> = features.axis_iter(Axis(0)).collect();
            let dist = Condensed::from_fn(n, |i, j| {
                rows[i]
                    .iter()
                    .zip(rows[j].iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum()
            });
            let labels = agglomerate(dist, k, Linkage::Ward);
            let centroids = centroids_of(features, &labels, k);
            Ok(BaseFit { labels, centroids })
        }
    }
}

/// Mean feature vector of each label. Empty labels get a zero centre.
pub(crate) fn centroids_of(features: &Array2<f64>, labels: &[u32], k: usize) -> Array2<f64> {
    let mut sums = Array2::<f64>::zeros((k, features.ncols()));
    let mut counts = vec![0usize; k];
    for (row, &l) in features.axis_iter(Axis(0)).zip(labels) {
        let l = l as usize;
        counts[l] += 1;
        let mut target = sums.row_mut(l);
        target += &row;
    }
    for (mut row, &c) in sums.axis_iter_mut(Axis(0)).zip(&counts) {
        if c > 0 {
            row /= c as f64;
        }
    }
    sums
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> Array2<f64> {
        let mut rows = Vec::new();
        for centre in [0.0, 5.0] {
            for i in 0..10 {
                let dx = (i % 3) as f64 * 0.1;
                let dy = (i / 3) as f64 * 0.1;
                rows.extend_from_slice(&[centre + dx, centre + dy]);
            }
        }
        Array2::from_shape_vec((20, 2), rows).unwrap()
    }

    fn split_ok(labels: &[u32]) {
        assert!(labels[..10].iter().all(|&l| l == labels[0]));
        assert!(labels[10..].iter().all(|&l| l == labels[10]));
        assert_ne!(labels[0], labels[10]);
    }

    #[test]
    fn method_names() {
        assert_eq!("kmeans".parse::<BaseMethod>().unwrap(), BaseMethod::KMeans);
        assert_eq!("gmm".parse::<BaseMethod>().unwrap(), BaseMethod::Gmm);
        assert_eq!("hier".parse::<BaseMethod>().unwrap(), BaseMethod::Hier);
        assert!("dbscan".parse::<BaseMethod>().is_err());
        assert_eq!(BaseMethod::Gmm.to_string(), "gmm");
    }

    #[test]
    fn kmeans_splits_blobs() {
        let mut rng = StdRng::seed_from_u64(7);
        let fit = cluster(&blobs(), 2, BaseMethod::KMeans, &mut rng).unwrap();
        split_ok(&fit.labels);
        assert_eq!(fit.centroids.nrows(), 2);
    }

    #[test]
    fn gmm_splits_blobs() {
        let mut rng = StdRng::seed_from_u64(7);
        let fit = cluster(&blobs(), 2, BaseMethod::Gmm, &mut rng).unwrap();
        split_ok(&fit.labels);
    }

    #[test]
    fn hier_splits_blobs() {
        let mut rng = StdRng::seed_from_u64(7);
        let fit = cluster(&blobs(), 2, BaseMethod::Hier, &mut rng).unwrap();
        split_ok(&fit.labels);
        let c = fit.nearest_centroid(ndarray::arr1(&[4.9, 5.1]).view());
        assert_eq!(c, fit.labels[10]);
    }

    #[test]
    fn too_few_points() {
        let mut rng = StdRng::seed_from_u64(1);
        let x = Array2::<f64>::zeros((2, 1));
        assert!(matches!(
            cluster(&x, 3, BaseMethod::KMeans, &mut rng),
            Err(AcError::BaseCluster(_))
        ));
    }

    #[test]
    fn same_seed_same_labels() {
        let a = cluster(&blobs(), 3, BaseMethod::KMeans, &mut StdRng::seed_from_u64(3)).unwrap();
        let b = cluster(&blobs(), 3, BaseMethod::KMeans, &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(a.labels, b.labels);
    }
}

//! Consensus over the ensemble through its co-association matrix.

use std::fmt;
use std::str::FromStr;

use linfa::DatasetBase;
use linfa::traits::{Fit, Predict};
use linfa_clustering::KMeans;
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::Array2;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::ensemble::Ensemble;
use crate::error::{AcError, Result};
use crate::linkage::{Condensed, Linkage, agglomerate};
use crate::points::{Clustering, canonicalize};

/// Above this many points the co-association matrix passes ~3 GB.
const LARGE_N: usize = 20_000;

/// Seed of the spectral k-means step when none is given.
pub const DEFAULT_SEED: u64 = 523151;

const SPECTRAL_RUNS: usize = 10;
const SPECTRAL_MAX_ITERATIONS: u64 = 300;

/// Rows of the spectral embedding closer than this are the same point.
const ROW_EPS: f64 = 1e-6;

/// How the co-association matrix is cut into the final clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ConsensusMethod {
    /// Normalized spectral clustering with the co-association as affinity.
    #[default]
    Spectral,
    /// Agglomerative clustering on `1 - co-association`. Ward linkage is
    /// rejected: `1 - C` is not a squared Euclidean distance.
    Hierarchical(Linkage),
}

impl fmt::Display for ConsensusMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusMethod::Spectral => f.write_str("spectral"),
            ConsensusMethod::Hierarchical(Linkage::Average) => f.write_str("hierarchical"),
            ConsensusMethod::Hierarchical(l) => write!(f, "hierarchical:{}", linkage_name(*l)),
        }
    }
}

fn linkage_name(l: Linkage) -> &'static str {
    match l {
        Linkage::Average => "average",
        Linkage::Complete => "complete",
        Linkage::Single => "single",
        Linkage::Ward => "ward",
    }
}

impl FromStr for ConsensusMethod {
    type Err = AcError;

    /// Accepts `spec`, `spectral`, `hier` and `hierarchical`, the latter
    /// two optionally suffixed with `:average`, `:complete` or `:single`.
    fn from_str(s: &str) -> Result<Self> {
        let (name, linkage) = match s.split_once(':') {
            Some((name, linkage)) => (name, Some(linkage)),
            None => (s, None),
        };
        let bad = || {
            AcError::config(
                "consensus",
                format!("unknown method {s:?}, expected spec, spectral, hier or hierarchical"),
            )
        };
        match (name.trim().to_ascii_lowercase().as_str(), linkage) {
            ("spec" | "spectral", None) => Ok(ConsensusMethod::Spectral),
            ("hier" | "hierarchical", None) => Ok(ConsensusMethod::Hierarchical(Linkage::Average)),
            ("hier" | "hierarchical", Some(l)) => match l.trim() {
                "average" => Ok(ConsensusMethod::Hierarchical(Linkage::Average)),
                "complete" => Ok(ConsensusMethod::Hierarchical(Linkage::Complete)),
                "single" => Ok(ConsensusMethod::Hierarchical(Linkage::Single)),
                "ward" => Err(ward()),
                _ => Err(bad()),
            },
            _ => Err(bad()),
        }
    }
}

fn ward() -> AcError {
    AcError::config(
        "consensus",
        "ward linkage needs squared Euclidean distances, use average, complete or single",
    )
}

impl TryFrom<String> for ConsensusMethod {
    type Error = AcError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<ConsensusMethod> for String {
    fn from(m: ConsensusMethod) -> Self {
        m.to_string()
    }
}

/// Symmetric N × N matrix of the fraction of realizations in which two
/// points share a label. Stored dense, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct CoAssociation {
    n: usize,
    data: Vec<f64>,
}

impl CoAssociation {
    /// Builds the matrix, one row per rayon task.
    pub fn build(ensemble: &Ensemble) -> Result<Self> {
        if ensemble.is_empty() {
            return Err(AcError::InsufficientEnsemble {
                accepted: 0,
                required: 1,
            });
        }
        let n = ensemble.npoints();
        if n > LARGE_N {
            warn!(
                "acens: co-association for {} points needs {} MB",
                n,
                (8 * n * n) >> 20
            );
        }

        let members: Vec<&[u32]> = ensemble.clusterings().map(Clustering::labels).collect();
        let r = members.len() as f64;
        let mut data = vec![0.0f64; n * n];
        data.par_chunks_mut(n.max(1))
            .enumerate()
            .for_each(|(i, row)| {
                for labels in &members {
                    let li = labels[i];
                    for (v, &lj) in row.iter_mut().zip(labels.iter()) {
                        if lj == li {
                            *v += 1.0;
                        }
                    }
                }
                for v in row.iter_mut() {
                    *v /= r;
                }
                row[i] = 1.0;
            });
        Ok(Self { n, data })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.n + j]
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.n..(i + 1) * self.n]
    }

    pub fn memory_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<f64>()
    }
}

/// Builds the co-association matrix of `ensemble` and cuts it into
/// `fnclus` clusters.
pub fn consense(ensemble: &Ensemble, fnclus: usize, method: ConsensusMethod) -> Result<Clustering> {
    let co = CoAssociation::build(ensemble)?;
    consense_with(&co, fnclus, method, DEFAULT_SEED)
}

/// Cuts a prebuilt co-association matrix. Hierarchical consensus always
/// yields `fnclus` clusters; spectral consensus yields at most `fnclus`.
/// Labels are numbered in order of first appearance.
pub fn consense_with(
    co: &CoAssociation,
    fnclus: usize,
    method: ConsensusMethod,
    seed: u64,
) -> Result<Clustering> {
    let n = co.n();
    if fnclus == 0 || fnclus > n {
        return Err(AcError::config(
            "fnclus",
            format!("must be in [1, {n}], got {fnclus}"),
        ));
    }

    let labels = match method {
        ConsensusMethod::Spectral => spectral(co, fnclus, seed)?,
        ConsensusMethod::Hierarchical(Linkage::Ward) => return Err(ward()),
        ConsensusMethod::Hierarchical(linkage) => {
            let dist = Condensed::from_fn(n, |i, j| 1.0 - co.get(i, j));
            agglomerate(dist, fnclus, linkage)
        }
    };
    let result = Clustering::new(labels);
    info!(
        "acens: {} consensus over {} points: {} clusters",
        method,
        n,
        result.num_clusters()
    );
    Ok(result)
}

fn spectral(co: &CoAssociation, k: usize, seed: u64) -> Result<Vec<u32>> {
    let n = co.n();
    if k == 1 {
        return Ok(vec![0; n]);
    }

    let inv_sqrt: Vec<f64> = (0..n)
        .map(|i| {
            let d: f64 = co.row(i).iter().sum();
            if d > 0.0 { 1.0 / d.sqrt() } else { 0.0 }
        })
        .collect();
    let affinity = DMatrix::<f64>::from_fn(n, n, |i, j| co.get(i, j) * inv_sqrt[i] * inv_sqrt[j]);
    let eigen = SymmetricEigen::new(affinity);

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        eigen.eigenvalues[b]
            .total_cmp(&eigen.eigenvalues[a])
            .then(a.cmp(&b))
    });

    let mut embedding = Array2::<f64>::zeros((n, k));
    for (c, &e) in order.iter().take(k).enumerate() {
        for i in 0..n {
            embedding[[i, c]] = eigen.eigenvectors[(i, e)];
        }
    }
    for mut row in embedding.rows_mut() {
        let norm = row.dot(&row).sqrt();
        if norm > 0.0 {
            row /= norm;
        }
    }

    if let Some(groups) = distinct_rows(&embedding, k) {
        return Ok(groups);
    }

    let dataset = DatasetBase::from(embedding.clone());
    let model = KMeans::params_with_rng(k, StdRng::seed_from_u64(seed))
        .n_runs(SPECTRAL_RUNS)
        .max_n_iterations(SPECTRAL_MAX_ITERATIONS)
        .tolerance(1e-8)
        .fit(&dataset)
        .map_err(|e| AcError::BaseCluster(format!("spectral k-means: {e}")))?;
    let assigned = model.predict(&embedding);
    let raw: Vec<u32> = assigned.iter().map(|&l| l as u32).collect();
    Ok(canonicalize(&raw))
}

/// Groups identical rows when there are at most `k` of them.
fn distinct_rows(embedding: &Array2<f64>, k: usize) -> Option<Vec<u32>> {
    let mut reps: Vec<usize> = Vec::with_capacity(k);
    let mut labels = Vec::with_capacity(embedding.nrows());
    for (i, row) in embedding.rows().into_iter().enumerate() {
        let found = reps.iter().position(|&r| {
            let d = &embedding.row(r) - &row;
            d.dot(&d).sqrt() < ROW_EPS
        });
        match found {
            Some(g) => labels.push(g as u32),
            None => {
                if reps.len() == k {
                    return None;
                }
                reps.push(i);
                labels.push((reps.len() - 1) as u32);
            }
        }
    }
    Some(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ensemble(rows: &[&[u32]]) -> Ensemble {
        Ensemble::from_clusterings(rows.iter().map(|r| Clustering::new(r.to_vec())).collect())
            .unwrap()
    }

    /// Two blocks of four points with a little disagreement at the seam.
    fn blocks() -> Ensemble {
        ensemble(&[
            &[0, 0, 0, 0, 1, 1, 1, 1],
            &[1, 1, 1, 1, 0, 0, 0, 0],
            &[0, 0, 0, 1, 1, 1, 1, 1],
            &[2, 2, 2, 2, 0, 0, 0, 1],
            &[0, 0, 0, 0, 1, 1, 1, 1],
        ])
    }

    #[test]
    fn coassociation_bounds_and_symmetry() {
        let co = CoAssociation::build(&blocks()).unwrap();
        assert_eq!(co.n(), 8);
        for i in 0..8 {
            assert_eq!(co.get(i, i), 1.0);
            for j in 0..8 {
                let v = co.get(i, j);
                assert!((0.0..=1.0).contains(&v));
                assert_eq!(v, co.get(j, i));
            }
        }
        assert_eq!(co.get(0, 1), 1.0);
        assert!((co.get(2, 3) - 0.8).abs() < 1e-12);
        assert_eq!(co.get(0, 7), 0.0);
        assert_eq!(co.memory_bytes(), 8 * 64);
    }

    #[test]
    fn both_methods_recover_blocks() {
        let e = blocks();
        for method in [
            ConsensusMethod::Spectral,
            ConsensusMethod::Hierarchical(Linkage::Average),
            ConsensusMethod::Hierarchical(Linkage::Complete),
        ] {
            let c = consense(&e, 2, method).unwrap();
            assert_eq!(c.labels(), &[0, 0, 0, 0, 1, 1, 1, 1], "{method}");
        }
    }

    #[test]
    fn hierarchical_gives_exact_count() {
        let e = blocks();
        for k in 1..=8 {
            let c = consense(&e, k, ConsensusMethod::Hierarchical(Linkage::Average)).unwrap();
            assert_eq!(c.num_clusters(), k);
        }
    }

    #[test]
    fn spectral_never_exceeds_count() {
        let e = ensemble(&[&[0, 0, 0, 1, 1, 1], &[0, 0, 0, 1, 1, 1]]);
        for k in 1..=4 {
            let c = consense(&e, k, ConsensusMethod::Spectral).unwrap();
            assert!(c.num_clusters() <= k);
            assert!(c.labels().iter().all(|&l| (l as usize) < k));
        }
    }

    #[test]
    fn empty_ensemble_is_insufficient() {
        let e = Ensemble::from_clusterings(Vec::new()).unwrap();
        assert!(matches!(
            consense(&e, 2, ConsensusMethod::Spectral),
            Err(AcError::InsufficientEnsemble { .. })
        ));
    }

    #[test]
    fn cluster_count_out_of_range() {
        let e = blocks();
        for k in [0, 9] {
            assert!(matches!(
                consense(&e, k, ConsensusMethod::Spectral),
                Err(AcError::InvalidConfiguration { param: "fnclus", .. })
            ));
        }
    }

    #[test]
    fn method_names() {
        assert_eq!("spec".parse::<ConsensusMethod>().unwrap(), ConsensusMethod::Spectral);
        assert_eq!(
            "hierarchical".parse::<ConsensusMethod>().unwrap(),
            ConsensusMethod::Hierarchical(Linkage::Average)
        );
        assert_eq!(
            "hier:complete".parse::<ConsensusMethod>().unwrap(),
            ConsensusMethod::Hierarchical(Linkage::Complete)
        );
        assert!("kmeans".parse::<ConsensusMethod>().is_err());
        assert!("spec:average".parse::<ConsensusMethod>().is_err());
        for linkage in [Linkage::Average, Linkage::Complete, Linkage::Single] {
            let m = ConsensusMethod::Hierarchical(linkage);
            assert_eq!(m.to_string().parse::<ConsensusMethod>().unwrap(), m);
        }
        assert_eq!(
            ConsensusMethod::Spectral.to_string().parse::<ConsensusMethod>().unwrap(),
            ConsensusMethod::Spectral
        );
    }

    #[test]
    fn ward_is_rejected() {
        assert!(matches!(
            "hierarchical:ward".parse::<ConsensusMethod>(),
            Err(AcError::InvalidConfiguration { param: "consensus", .. })
        ));
        let ward = ConsensusMethod::Hierarchical(Linkage::Ward);
        assert!(serde_yaml::from_str::<ConsensusMethod>(&ward.to_string()).is_err());

        let co = CoAssociation::build(&blocks()).unwrap();
        assert!(matches!(
            consense_with(&co, 2, ward, DEFAULT_SEED),
            Err(AcError::InvalidConfiguration { param: "consensus", .. })
        ));
    }
}

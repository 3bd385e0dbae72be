//! Spatial autocorrelation statistics over k-nearest-neighbour graphs.
//!
//! Two families are supported:
//!
//! - Moran's I: global coherence. Adjacent points share a label (or have
//!   similar values) more than chance would predict.
//! - Getis-Ord Gi*: local concentration. Neighbourhoods where a label (or
//!   high values) cluster into hot spots.
//!
//! [`score`] rates a labeling and is the acceptance / ranking criterion for
//! realizations. [`local_statistic`] evaluates a continuous variable at every
//! point and is used to augment the features a realization clusters on.
//!
//! All weights are binary k-NN weights taken from a [`NeighborTable`].

use serde::{Deserialize, Serialize};

use crate::error::{AcError, Result};
use crate::search::NeighborTable;

/// z-score above which a Gi* value is a significant hot spot (95%, one-sided 2.5%).
const HOT_SPOT_Z: f64 = 1.96;

/// Autocorrelation metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcMetric {
    #[serde(alias = "moran")]
    Morans,
    #[serde(alias = "getisord")]
    Getis,
}

/// Selected metrics and their normalized weights.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AcWeights {
    entries: Vec<(AcMetric, f64)>,
}

impl AcWeights {
    /// Pairs metrics with weights. Weights must be finite, non-negative and
    /// sum to a positive value; they are normalized to sum to one.
    pub fn new(metrics: &[AcMetric], weights: &[f64]) -> Result<Self> {
        if metrics.len() != weights.len() {
            return Err(AcError::config(
                "weights",
                format!("{} metrics but {} weights", metrics.len(), weights.len()),
            ));
        }
        if metrics.is_empty() {
            return Ok(Self::none());
        }
        for (i, m) in metrics.iter().enumerate() {
            if metrics[..i].contains(m) {
                return Err(AcError::config("metrics", format!("{m:?} selected twice")));
            }
        }
        if let Some(w) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(AcError::config(
                "weights",
                format!("weights must be finite and non-negative, got {w}"),
            ));
        }
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Err(AcError::config("weights", "weights must sum to a positive value"));
        }
        Ok(Self {
            entries: metrics
                .iter()
                .zip(weights)
                .map(|(m, w)| (*m, w / total))
                .collect(),
        })
    }

    /// No autocorrelation: scores are zero and no features are added.
    pub fn none() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (AcMetric, f64)> + '_ {
        self.entries.iter().copied()
    }

    /// Normalized weight of `metric`, zero if not selected.
    pub fn weight(&self, metric: AcMetric) -> f64 {
        self.entries
            .iter()
            .find(|(m, _)| *m == metric)
            .map_or(0.0, |(_, w)| *w)
    }
}

/// Weighted composite autocorrelation of a labeling.
pub fn score(labels: &[u32], table: &NeighborTable, weights: &AcWeights) -> Result<f64> {
    weights.iter().try_fold(0.0, |acc, (metric, w)| {
        let s = match metric {
            AcMetric::Morans => morans_labels(labels, table)?,
            AcMetric::Getis => getis_labels(labels, table)?,
        };
        Ok(acc + w * s)
    })
}

/// One value per point of the neighbour table.
fn check_len(param: &'static str, len: usize, table: &NeighborTable) -> Result<()> {
    if len != table.len() {
        return Err(AcError::config(
            param,
            format!("{len} values for {} points", table.len()),
        ));
    }
    Ok(())
}

fn label_counts(labels: &[u32]) -> Vec<usize> {
    let range = labels.iter().max().map_or(0, |&m| m as usize + 1);
    let mut counts = vec![0usize; range];
    for &l in labels {
        counts[l as usize] += 1;
    }
    counts
}

/// Join-count Moran's I averaged over labels by proportion, in `[-1, 1]`.
pub fn morans_labels(labels: &[u32], table: &NeighborTable) -> Result<f64> {
    check_len("labels", labels.len(), table)?;
    let n = labels.len();
    let w_total: usize = table.iter().map(<[_]>::len).sum();
    if n < 2 || w_total == 0 {
        return Ok(0.0);
    }
    let nf = n as f64;
    let counts = label_counts(labels);

    let mut acc = 0.0;
    let mut mass = 0.0;
    for (c, &nc) in counts.iter().enumerate() {
        if nc == 0 || nc == n {
            continue;
        }
        let p = nc as f64 / nf;
        let dev = |l: u32| if l as usize == c { 1.0 - p } else { -p };
        let mut num = 0.0;
        for (i, nbrs) in table.iter().enumerate() {
            let di = dev(labels[i]);
            for nb in nbrs {
                num += di * dev(labels[nb.index]);
            }
        }
        let denom = nf * p * (1.0 - p);
        acc += p * (nf / w_total as f64) * num / denom;
        mass += p;
    }
    if mass == 0.0 {
        return Ok(0.0);
    }
    Ok((acc / mass).clamp(-1.0, 1.0))
}

/// Fraction of points sitting in a significant same-label Gi* hot spot.
pub fn getis_labels(labels: &[u32], table: &NeighborTable) -> Result<f64> {
    check_len("labels", labels.len(), table)?;
    let n = labels.len();
    if n < 2 {
        return Ok(0.0);
    }
    let nf = n as f64;
    let counts = label_counts(labels);

    let hot = (0..n)
        .filter(|&i| {
            let c = labels[i];
            let p = counts[c as usize] as f64 / nf;
            let nbrs = table.of(i);
            let same = 1 + nbrs.iter().filter(|nb| labels[nb.index] == c).count();
            gi_star(same as f64, nbrs.len() as f64 + 1.0, p, (p * (1.0 - p)).sqrt(), nf)
                > HOT_SPOT_Z
        })
        .count();
    Ok(hot as f64 / nf)
}

/// Gi* z-score for a binary-weighted window of `w` points whose values sum to `sum`.
fn gi_star(sum: f64, w: f64, mean: f64, sd: f64, n: f64) -> f64 {
    let spread = (n * w - w * w) / (n - 1.0);
    if sd <= 0.0 || spread <= 0.0 {
        return 0.0;
    }
    (sum - mean * w) / (sd * spread.sqrt())
}

/// Local statistic of a continuous variable at every point.
///
/// Moran's Iᵢ uses row-standardized weights on z-scores; Gi* includes the
/// point itself in its window. Constant variables yield zeros.
pub fn local_statistic(
    values: &[f64],
    table: &NeighborTable,
    metric: AcMetric,
) -> Result<Vec<f64>> {
    check_len("values", values.len(), table)?;
    let n = values.len();
    if n < 2 {
        return Ok(vec![0.0; n]);
    }
    let nf = n as f64;
    let mean = values.iter().sum::<f64>() / nf;
    let sd = (values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / nf).sqrt();
    if sd <= 0.0 {
        return Ok(vec![0.0; n]);
    }

    let stat = match metric {
        AcMetric::Morans => {
            let z: Vec<f64> = values.iter().map(|v| (v - mean) / sd).collect();
            (0..n)
                .map(|i| {
                    let nbrs = table.of(i);
                    if nbrs.is_empty() {
                        return 0.0;
                    }
                    let lag = nbrs.iter().map(|nb| z[nb.index]).sum::<f64>() / nbrs.len() as f64;
                    z[i] * lag
                })
                .collect()
        }
        AcMetric::Getis => (0..n)
            .map(|i| {
                let nbrs = table.of(i);
                let sum = values[i] + nbrs.iter().map(|nb| values[nb.index]).sum::<f64>();
                gi_star(sum, nbrs.len() as f64 + 1.0, mean, sd, nf)
            })
            .collect(),
    };
    Ok(stat)
}

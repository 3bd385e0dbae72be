//! One randomized realization of the ensemble.

use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::autocorr::{self, AcWeights};
use crate::base;
use crate::config::AcConfig;
use crate::error::{AcError, Result};
use crate::points::Clustering;
use crate::search::NeighborTable;

/// Derives the seed of realization `index` from the master seed (SplitMix64).
pub fn derive_seed(master: u64, index: usize) -> u64 {
    let mut z = master ^ 0x9E37_79B9_7F4A_7C15u64.wrapping_mul(index as u64 + 1);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// An accepted realization.
#[derive(Debug, Clone, PartialEq)]
pub struct Realization {
    /// Position in the requested sequence `0..nreal`.
    pub index: usize,
    pub labels: Clustering,
    /// Composite autocorrelation score of `labels`.
    pub score: f64,
    /// Attempts used, including the accepted one.
    pub attempts: usize,
    /// Variables (column indices) the base run clustered on.
    pub variables: Vec<usize>,
    /// Points left out of the base run and backfilled afterwards.
    pub removed: usize,
}

/// Shared, read-only inputs of every realization.
pub(crate) struct MemberContext<'a> {
    /// Standardized variables, N × M.
    pub variables: &'a Array2<f64>,
    /// `local[v]` holds the weighted local-statistic columns of variable `v`.
    pub local: &'a [Vec<Vec<f64>>],
    pub table: &'a NeighborTable,
    pub config: &'a AcConfig,
    pub weights: &'a AcWeights,
    pub tnclus: usize,
}

impl MemberContext<'_> {
    fn npoints(&self) -> usize {
        self.variables.nrows()
    }

    fn nvars(&self) -> usize {
        self.variables.ncols()
    }
}

/// Precomputes standardized local statistics for every variable and metric,
/// each scaled by the square root of its metric weight.
pub(crate) fn local_features(
    variables: &Array2<f64>,
    table: &NeighborTable,
    weights: &AcWeights,
) -> Result<Vec<Vec<Vec<f64>>>> {
    variables
        .axis_iter(Axis(1))
        .map(|col| {
            let values = col.to_vec();
            weights
                .iter()
                .map(|(metric, w)| {
                    let mut stat = autocorr::local_statistic(&values, table, metric)?;
                    let n = stat.len().max(1) as f64;
                    let mean = stat.iter().sum::<f64>() / n;
                    let sd = (stat.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n).sqrt();
                    let scale = w.sqrt();
                    for v in stat.iter_mut() {
                        *v = if sd > 0.0 { (*v - mean) / sd * scale } else { 0.0 };
                    }
                    Ok(stat)
                })
                .collect::<Result<Vec<_>>>()
        })
        .collect()
}

/// Runs realization `index`, retrying up to `max_retries` attempts.
pub(crate) fn run(ctx: &MemberContext<'_>, index: usize, seed: u64) -> Result<Realization> {
    let mut rng = StdRng::seed_from_u64(seed);
    let max_retries = ctx.config.max_retries;

    for attempt in 1..=max_retries {
        match attempt_once(ctx, &mut rng) {
            Ok(Some(mut r)) => {
                r.index = index;
                r.attempts = attempt;
                debug!(
                    realization = index,
                    attempt,
                    score = r.score,
                    nvars = r.variables.len(),
                    removed = r.removed,
                    "realization accepted"
                );
                return Ok(r);
            }
            Ok(None) => {
                debug!(realization = index, attempt, "realization rejected");
            }
            Err(AcError::BaseCluster(msg)) => {
                debug!(realization = index, attempt, error = %msg, "base clustering failed");
            }
            Err(e) => return Err(e),
        }
    }
    Err(AcError::DegenerateRealization {
        realization: index,
        attempts: max_retries,
    })
}

fn attempt_once(ctx: &MemberContext<'_>, rng: &mut StdRng) -> Result<Option<Realization>> {
    let n = ctx.npoints();
    let m = ctx.nvars();
    let k = ctx.tnclus;
    let cfg = ctx.config;

    // Variable subset.
    let variables: Vec<usize> = match cfg.minvars {
        None => (0..m).collect(),
        Some(minv) => {
            let count = rng.gen_range(minv..=m);
            let mut picked = index::sample(rng, m, count).into_vec();
            picked.sort_unstable();
            picked
        }
    };

    // Points left out of the base run.
    let [rlo, rhi] = cfg.remove;
    let frac = if rhi > rlo { rng.gen_range(rlo..=rhi) } else { rlo };
    let nremove = ((frac * n as f64).round() as usize).min(n.saturating_sub(k));
    let mut removed = vec![false; n];
    for p in index::sample(rng, n, nremove).into_iter() {
        removed[p] = true;
    }
    let retained: Vec<usize> = (0..n).filter(|&p| !removed[p]).collect();

    let features = build_features(ctx, &variables);
    let fit = base::cluster(&features.select(Axis(0), &retained), k, cfg.cluster_method, rng)?;

    // Excluded points take the label of their nearest retained neighbour,
    // or of the nearest feature-space centre when no neighbour was retained.
    let mut labels = vec![0u32; n];
    for (r, &p) in retained.iter().enumerate() {
        labels[p] = fit.labels[r];
    }
    for p in (0..n).filter(|&p| removed[p]) {
        labels[p] = match ctx.table.of(p).iter().find(|nb| !removed[nb.index]) {
            Some(nb) => fit.labels[retained.partition_point(|&q| q < nb.index)],
            None => fit.nearest_centroid(features.row(p)),
        };
    }
    let labels = Clustering::new(labels);

    let [flo, fhi] = cfg.found;
    if labels
        .proportions(k)
        .iter()
        .any(|&p| p < flo || p > fhi)
    {
        return Ok(None);
    }

    let score = autocorr::score(labels.labels(), ctx.table, ctx.weights)?;
    if cfg.min_score.is_some_and(|min| score < min) {
        return Ok(None);
    }

    Ok(Some(Realization {
        index: 0,
        labels,
        score,
        attempts: 0,
        variables,
        removed: nremove,
    }))
}

/// Selected variables followed by their local autocorrelation columns.
fn build_features(ctx: &MemberContext<'_>, variables: &[usize]) -> Array2<f64> {
    let n = ctx.npoints();
    let extra: usize = variables.iter().map(|&v| ctx.local[v].len()).sum();
    let width = variables.len() + extra;
    let mut out = Array2::<f64>::zeros((n, width));

    let mut col = 0;
    for &v in variables {
        out.column_mut(col).assign(&ctx.variables.column(v));
        col += 1;
    }
    for &v in variables {
        for stat in &ctx.local[v] {
            for (p, value) in stat.iter().enumerate() {
                out[[p, col]] = *value;
            }
            col += 1;
        }
    }
    out
}

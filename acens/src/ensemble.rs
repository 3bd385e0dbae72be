//! Parallel, reproducible generation of the ensemble.

use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::AcConfig;
use crate::error::{AcError, Result};
use crate::member::{self, MemberContext, Realization, derive_seed};
use crate::points::{Clustering, PointSet, VariableMatrix};
use crate::search::{NeighborTable, SpatialIndex};

/// Accepted realizations over one point set, in realization-index order.
#[derive(Debug, Clone, PartialEq)]
pub struct Ensemble {
    npoints: usize,
    members: Vec<Realization>,
}

impl Ensemble {
    pub(crate) fn new(npoints: usize, members: Vec<Realization>) -> Self {
        Self { npoints, members }
    }

    /// Wraps plain clusterings, numbering them `0..len`. All clusterings
    /// must label the same number of points.
    pub fn from_clusterings(clusterings: Vec<Clustering>) -> Result<Self> {
        let npoints = clusterings.first().map_or(0, Clustering::len);
        if let Some(i) = clusterings.iter().position(|c| c.len() != npoints) {
            return Err(AcError::config(
                "ensemble",
                format!(
                    "clustering {i} labels {} points, expected {npoints}",
                    clusterings[i].len()
                ),
            ));
        }
        let members = clusterings
            .into_iter()
            .enumerate()
            .map(|(index, labels)| Realization {
                index,
                labels,
                score: 0.0,
                attempts: 1,
                variables: Vec::new(),
                removed: 0,
            })
            .collect();
        Ok(Self { npoints, members })
    }

    /// Number of kept realizations.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Number of points every realization labels.
    pub fn npoints(&self) -> usize {
        self.npoints
    }

    pub fn realizations(&self) -> &[Realization] {
        &self.members
    }

    pub fn get(&self, i: usize) -> Option<&Realization> {
        self.members.get(i)
    }

    pub fn clusterings(&self) -> impl Iterator<Item = &Clustering> {
        self.members.iter().map(|r| &r.labels)
    }

    pub fn scores(&self) -> Vec<f64> {
        self.members.iter().map(|r| r.score).collect()
    }

    /// Same realizations with their labels replaced, in order.
    pub(crate) fn relabeled(&self, labels: Vec<Clustering>) -> Self {
        let members = self
            .members
            .iter()
            .zip(labels)
            .map(|(r, labels)| Realization {
                labels,
                ..r.clone()
            })
            .collect();
        Self {
            npoints: self.npoints,
            members,
        }
    }
}

/// Generates an ensemble of `config.nreal` realizations with `tnclus` clusters.
///
/// The result depends only on the inputs and `config.seed`, not on the
/// number of threads.
pub fn generate(
    points: &PointSet,
    variables: &VariableMatrix,
    config: &AcConfig,
    tnclus: usize,
) -> Result<Ensemble> {
    if variables.nrows() != points.len() {
        return Err(AcError::config(
            "variables",
            format!("{} rows for {} points", variables.nrows(), points.len()),
        ));
    }
    config.validate(variables.ncols())?;
    config.validate_tnclus(tnclus, points.len())?;
    let table = SpatialIndex::build(points, &config.search)?.neighbors(config.search.nnears);
    generate_with(&table, variables, config, tnclus)
}

/// Like [`generate`] with a prebuilt neighbour table. Assumes `config`
/// has been validated.
pub(crate) fn generate_with(
    table: &NeighborTable,
    variables: &VariableMatrix,
    config: &AcConfig,
    tnclus: usize,
) -> Result<Ensemble> {
    if table.len() != variables.nrows() {
        return Err(AcError::config(
            "variables",
            format!("{} rows for {} points", variables.nrows(), table.len()),
        ));
    }
    let weights = config.ac_weights()?;
    let standardized = variables.standardized();
    let local = member::local_features(&standardized, table, &weights)?;
    let ctx = MemberContext {
        variables: &standardized,
        local: &local,
        table,
        config,
        weights: &weights,
        tnclus,
    };

    let results = match config.nthread {
        Some(n) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .map_err(|e| AcError::ThreadPool(e.to_string()))?;
            pool.install(|| run_all(&ctx, config.seed, config.nreal))
        }
        None => run_all(&ctx, config.seed, config.nreal),
    };

    let mut members = Vec::with_capacity(results.len());
    let mut dropped = 0usize;
    for result in results {
        match result {
            Ok(r) => members.push(r),
            Err(AcError::DegenerateRealization {
                realization,
                attempts,
            }) => {
                warn!(realization, attempts, "dropping degenerate realization");
                dropped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    if members.len() < config.min_realizations {
        return Err(AcError::InsufficientEnsemble {
            accepted: members.len(),
            required: config.min_realizations,
        });
    }

    let attempts: usize = members.iter().map(|r| r.attempts).sum();
    info!(
        "acens: ensemble of {} realizations ({} dropped, {} attempts, tnclus {})",
        members.len(),
        dropped,
        attempts,
        tnclus
    );
    Ok(Ensemble::new(table.len(), members))
}

/// One slot per realization; the indexed collect keeps realization order.
fn run_all(ctx: &MemberContext<'_>, seed: u64, nreal: usize) -> Vec<Result<Realization>> {
    (0..nreal)
        .into_par_iter()
        .map(|i| member::run(ctx, i, derive_seed(seed, i)))
        .collect()
}

//! Consensus spatial clustering of geostatistical data.
//!
//! An ensemble of base clusterings (k-means, Gaussian mixture or Ward
//! hierarchical) is generated under random perturbations: variable subsets,
//! left-out points and local spatial autocorrelation features. Realizations
//! whose labeling is not spatially coherent enough, or whose cluster
//! proportions are out of bounds, are retried. The ensemble is then merged
//! through its co-association matrix into one partition with spectral or
//! hierarchical consensus.
//!
//! # Usage
//!
//! ```no_run
//! use spatialcluster_acens::{AcConfig, AcEnsemble, ConsensusMethod, PointSet, VariableMatrix};
//!
//! # fn main() -> spatialcluster_acens::Result<()> {
//! let points = PointSet::new_2d(&[[0.0, 0.0], [10.0, 0.0], [0.0, 10.0], [10.0, 10.0]])?;
//! let variables = VariableMatrix::from_rows(&[vec![1.0], vec![1.1], vec![5.0], vec![5.2]])?;
//!
//! let mut config = AcConfig::default();
//! config.search.ranges = [20.0, 20.0, 20.0];
//! config.search.nnears = 2;
//!
//! let mut model = AcEnsemble::new(points, variables, config)?;
//! model.fit(2)?;
//! let labels = model.predict(2, ConsensusMethod::Spectral)?;
//!
//! // Every realization renamed onto the consensus labels.
//! let recoded = model.recode(&labels)?;
//! # let _ = recoded;
//! # Ok(())
//! # }
//! ```
//!
//! # Determinism
//!
//! Realization `i` draws all of its randomness from a generator seeded with
//! [`derive_seed`]`(config.seed, i)`, so the same seed yields the same
//! ensemble on any number of threads.

mod align;
mod autocorr;
mod base;
mod config;
mod consensus;
mod ensemble;
mod error;
mod linkage;
mod member;
mod model;
mod points;
mod search;

pub use align::{AlignReference, AlignedEnsemble, align, align_labels, majority_vote};
pub use autocorr::{AcMetric, AcWeights, getis_labels, local_statistic, morans_labels, score};
pub use base::{BaseFit, BaseMethod, cluster};
pub use config::AcConfig;
pub use consensus::{CoAssociation, ConsensusMethod, DEFAULT_SEED, consense, consense_with};
pub use ensemble::{Ensemble, generate};
pub use error::{AcError, Result};
pub use linkage::{Condensed, Linkage, Merge, agglomerate, cut, nn_chain};
pub use member::{Realization, derive_seed};
pub use model::AcEnsemble;
pub use points::{Clustering, PointSet, VariableMatrix};
pub use search::{Neighbor, NeighborTable, SearchParams, SpatialIndex};

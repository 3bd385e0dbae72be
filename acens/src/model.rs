use std::fmt;

use once_cell::sync::OnceCell;
use tracing::info;

use crate::align::{AlignReference, AlignedEnsemble, align};
use crate::config::AcConfig;
use crate::consensus::{CoAssociation, ConsensusMethod, consense_with};
use crate::ensemble::{Ensemble, generate_with};
use crate::error::{AcError, Result};
use crate::points::{Clustering, PointSet, VariableMatrix};
use crate::search::{NeighborTable, SpatialIndex};

/// Autocorrelation ensemble clustering model.
///
/// [`AcEnsemble::fit`] generates the ensemble once; [`AcEnsemble::predict`]
/// can then be called for any final cluster count and consensus method.
/// The co-association matrix is built on the first `predict` and reused.
pub struct AcEnsemble {
    points: PointSet,
    variables: VariableMatrix,
    config: AcConfig,
    table: NeighborTable,
    fitted: Option<Fitted>,
}

struct Fitted {
    tnclus: usize,
    ensemble: Ensemble,
    coassoc: OnceCell<CoAssociation>,
}

impl fmt::Debug for AcEnsemble {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcEnsemble")
            .field("npoints", &self.points.len())
            .field("nvars", &self.variables.ncols())
            .field("tnclus", &self.fitted.as_ref().map(|f| f.tnclus))
            .field(
                "realizations",
                &self.fitted.as_ref().map(|f| f.ensemble.len()),
            )
            .finish()
    }
}

impl AcEnsemble {
    /// Validates the inputs and builds the neighbour table.
    pub fn new(points: PointSet, variables: VariableMatrix, config: AcConfig) -> Result<Self> {
        if variables.nrows() != points.len() {
            return Err(AcError::config(
                "variables",
                format!("{} rows for {} points", variables.nrows(), points.len()),
            ));
        }
        config.validate(variables.ncols())?;
        let table = SpatialIndex::build(&points, &config.search)?.neighbors(config.search.nnears);
        info!(
            "acens: {} points, {} variables, {} neighbours each",
            points.len(),
            variables.ncols(),
            config.search.nnears
        );
        Ok(Self {
            points,
            variables,
            config,
            table,
            fitted: None,
        })
    }

    /// Generates the ensemble with `tnclus` clusters per realization,
    /// replacing any earlier fit.
    pub fn fit(&mut self, tnclus: usize) -> Result<&Ensemble> {
        self.config.validate_tnclus(tnclus, self.points.len())?;
        let ensemble = generate_with(&self.table, &self.variables, &self.config, tnclus)?;
        let fitted = self.fitted.insert(Fitted {
            tnclus,
            ensemble,
            coassoc: OnceCell::new(),
        });
        Ok(&fitted.ensemble)
    }

    /// Consensus clustering with `fnclus` clusters, at most the fitted `tnclus`.
    pub fn predict(&self, fnclus: usize, method: ConsensusMethod) -> Result<Clustering> {
        let fitted = self.fitted()?;
        if fnclus == 0 || fnclus > fitted.tnclus {
            return Err(AcError::config(
                "fnclus",
                format!("must be in [1, {}], got {fnclus}", fitted.tnclus),
            ));
        }
        consense_with(self.coassociation()?, fnclus, method, self.config.seed)
    }

    /// The fitted ensemble, if any.
    pub fn ensemble(&self) -> Option<&Ensemble> {
        self.fitted.as_ref().map(|f| &f.ensemble)
    }

    /// Co-association matrix of the fitted ensemble, built on first use.
    pub fn coassociation(&self) -> Result<&CoAssociation> {
        let fitted = self.fitted()?;
        fitted
            .coassoc
            .get_or_try_init(|| CoAssociation::build(&fitted.ensemble))
    }

    /// Realizations renamed onto `labels`, typically the consensus.
    pub fn recode(&self, labels: &Clustering) -> Result<AlignedEnsemble> {
        let fitted = self.fitted()?;
        align(&fitted.ensemble, &AlignReference::Labels(labels.clone()))
    }

    pub fn config(&self) -> &AcConfig {
        &self.config
    }

    pub fn points(&self) -> &PointSet {
        &self.points
    }

    pub fn neighbors(&self) -> &NeighborTable {
        &self.table
    }

    fn fitted(&self) -> Result<&Fitted> {
        self.fitted.as_ref().ok_or(AcError::NotFitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SearchParams;

    fn model(cfg: AcConfig) -> Result<AcEnsemble> {
        let mut xy = Vec::new();
        let mut rows = Vec::new();
        for j in 0..5 {
            for i in 0..6 {
                xy.push([i as f64, j as f64]);
                let v = if i < 3 { 0.0 } else { 3.0 };
                rows.push(vec![v + (j % 2) as f64 * 0.1, v * 0.5]);
            }
        }
        AcEnsemble::new(
            PointSet::new_2d(&xy)?,
            VariableMatrix::from_rows(&rows)?,
            cfg,
        )
    }

    fn config() -> AcConfig {
        let mut cfg = AcConfig::default();
        cfg.search = SearchParams::new([0.0; 3], [1.0; 3], 6);
        cfg.nreal = 5;
        cfg.found = [0.05, 0.95];
        cfg
    }

    #[test]
    fn zero_range_fails_at_construction() {
        let mut cfg = config();
        cfg.search.ranges = [1.0, 0.0, 1.0];
        assert!(matches!(model(cfg), Err(AcError::InvalidGeometry { .. })));
    }

    #[test]
    fn predict_needs_fit() {
        let m = model(config()).unwrap();
        assert!(matches!(
            m.predict(2, ConsensusMethod::Spectral),
            Err(AcError::NotFitted)
        ));
        assert!(m.ensemble().is_none());
    }

    #[test]
    fn final_count_bounded_by_fit() {
        let mut m = model(config()).unwrap();
        m.fit(2).unwrap();
        assert!(matches!(
            m.predict(3, ConsensusMethod::Spectral),
            Err(AcError::InvalidConfiguration { param: "fnclus", .. })
        ));
    }

    #[test]
    fn coassociation_is_cached_until_refit() {
        let mut m = model(config()).unwrap();
        m.fit(2).unwrap();
        let a: *const CoAssociation = m.coassociation().unwrap();
        let b: *const CoAssociation = m.coassociation().unwrap();
        assert!(std::ptr::eq(a, b));
        assert_eq!(m.coassociation().unwrap().n(), 30);
    }

    #[test]
    fn fit_predict_recode() {
        let mut m = model(config()).unwrap();
        assert_eq!(m.fit(2).unwrap().len(), 5);
        let labels = m
            .predict(2, ConsensusMethod::Hierarchical(Default::default()))
            .unwrap();
        assert_eq!(labels.len(), 30);
        assert_eq!(labels.num_clusters(), 2);
        let recoded = m.recode(&labels).unwrap();
        assert_eq!(recoded.ensemble().len(), 5);
        assert!(recoded.agreement().iter().all(|a| (0.0..=1.0).contains(a)));
    }
}

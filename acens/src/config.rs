use serde::{Deserialize, Deserializer, Serialize};

use crate::autocorr::{AcMetric, AcWeights};
use crate::base::BaseMethod;
use crate::error::{AcError, Result};
use crate::search::SearchParams;

/// Controls ensemble generation.
///
/// Deserializes from YAML/JSON with the defaults of the reference parameter
/// file; only `search.ranges` has no default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcConfig {
    /// Search ellipsoid and neighbour count.
    pub search: SearchParams,

    /// Base clustering algorithm: `kmeans`, `gmm` or `hier`.
    #[serde(default)]
    pub cluster_method: BaseMethod,

    /// Autocorrelation metrics. Empty disables autocorrelation.
    #[serde(default = "default_metrics")]
    pub metrics: Vec<AcMetric>,

    /// One weight per metric. Normalized internally.
    #[serde(default = "default_weights")]
    pub weights: Vec<f64>,

    /// Master seed. Same seed, same ensemble.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Number of realizations.
    #[serde(default = "default_nreal")]
    pub nreal: usize,

    /// Minimum size of the random variable subset. `None` (or -1 in a
    /// parameter file) uses every variable in every realization.
    #[serde(default, deserialize_with = "deserialize_minvars")]
    pub minvars: Option<usize>,

    /// Bounds of the fraction of points left out of each base run.
    #[serde(default = "default_remove")]
    pub remove: [f64; 2],

    /// Bounds every cluster proportion must satisfy for a realization to be kept.
    #[serde(default = "default_found")]
    pub found: [f64; 2],

    /// Minimum composite autocorrelation score of a kept realization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,

    /// Attempts per realization before it is dropped as degenerate.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Fewest kept realizations that still make a usable ensemble.
    #[serde(default = "default_min_realizations")]
    pub min_realizations: usize,

    /// Worker threads. `None` uses every core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nthread: Option<usize>,
}

fn default_metrics() -> Vec<AcMetric> {
    vec![AcMetric::Morans, AcMetric::Getis]
}

fn default_weights() -> Vec<f64> {
    vec![0.5, 0.5]
}

fn default_seed() -> u64 {
    523151
}

fn default_nreal() -> usize {
    100
}

fn default_remove() -> [f64; 2] {
    [0.0, 0.15]
}

fn default_found() -> [f64; 2] {
    [0.001, 0.999]
}

fn default_max_retries() -> usize {
    10
}

fn default_min_realizations() -> usize {
    1
}

fn deserialize_minvars<'de, D>(de: D) -> std::result::Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<i64>::deserialize(de)? {
        None | Some(-1) => Ok(None),
        Some(v) if v > 0 => Ok(Some(v as usize)),
        Some(v) => Err(serde::de::Error::custom(format!(
            "minvars must be -1 or positive, got {v}"
        ))),
    }
}

impl Default for AcConfig {
    fn default() -> Self {
        Self {
            search: SearchParams::new([0.0; 3], [500.0; 3], 25),
            cluster_method: BaseMethod::default(),
            metrics: default_metrics(),
            weights: default_weights(),
            seed: default_seed(),
            nreal: default_nreal(),
            minvars: None,
            remove: default_remove(),
            found: default_found(),
            min_score: None,
            max_retries: default_max_retries(),
            min_realizations: default_min_realizations(),
            nthread: None,
        }
    }
}

impl AcConfig {
    /// Checks every parameter against a data set with `nvar` variables.
    /// Geometry problems surface as [`AcError::InvalidGeometry`], everything
    /// else as [`AcError::InvalidConfiguration`] naming the parameter.
    pub fn validate(&self, nvar: usize) -> Result<()> {
        self.search.validate_geometry()?;
        if self.search.nnears == 0 {
            return Err(AcError::config("nnears", "must be at least 1"));
        }
        self.ac_weights()?;
        if self.nreal == 0 {
            return Err(AcError::config("nreal", "must be at least 1"));
        }
        if let Some(m) = self.minvars {
            if m == 0 || m > nvar {
                return Err(AcError::config(
                    "minvars",
                    format!("must be in [1, {nvar}] or -1, got {m}"),
                ));
            }
        }
        let [rlo, rhi] = self.remove;
        if !(rlo.is_finite() && rhi.is_finite() && 0.0 <= rlo && rlo <= rhi && rhi < 1.0) {
            return Err(AcError::config(
                "remove",
                format!("need 0 <= min <= max < 1, got [{rlo}, {rhi}]"),
            ));
        }
        let [flo, fhi] = self.found;
        if !(flo.is_finite() && fhi.is_finite() && 0.0 <= flo && flo <= fhi && fhi <= 1.0) {
            return Err(AcError::config(
                "found",
                format!("need 0 <= min <= max <= 1, got [{flo}, {fhi}]"),
            ));
        }
        if let Some(s) = self.min_score {
            if !s.is_finite() {
                return Err(AcError::config("min_score", format!("non-finite value {s}")));
            }
        }
        if self.max_retries == 0 {
            return Err(AcError::config("max_retries", "must be at least 1"));
        }
        if self.min_realizations == 0 || self.min_realizations > self.nreal {
            return Err(AcError::config(
                "min_realizations",
                format!("must be in [1, {}], got {}", self.nreal, self.min_realizations),
            ));
        }
        if self.nthread == Some(0) {
            return Err(AcError::config("nthread", "must be at least 1"));
        }
        Ok(())
    }

    /// Checks an intermediate cluster count against `npoints` and the found bounds.
    pub fn validate_tnclus(&self, tnclus: usize, npoints: usize) -> Result<()> {
        if tnclus == 0 || tnclus > npoints {
            return Err(AcError::config(
                "tnclus",
                format!("must be in [1, {npoints}], got {tnclus}"),
            ));
        }
        let [flo, fhi] = self.found;
        let k = tnclus as f64;
        if k * flo > 1.0 || k * fhi < 1.0 {
            return Err(AcError::config(
                "found",
                format!("bounds [{flo}, {fhi}] cannot hold for {tnclus} clusters"),
            ));
        }
        Ok(())
    }

    /// Normalized autocorrelation weights.
    pub fn ac_weights(&self) -> Result<AcWeights> {
        AcWeights::new(&self.metrics, &self.weights)
    }
}

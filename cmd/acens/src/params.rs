//! Parameter file of the `acens` runner.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use spatialcluster_acens::{AcConfig, AcMetric, BaseMethod, ConsensusMethod, SearchParams};

/// Written when `acens` runs without arguments.
pub const DEFAULT_PARFILE: &str = "acensemble.yaml";

pub const DEFAULT_PARAMS: &str = "\
# ACEnsemble

data:
  file: datafile.dat          # GSLIB/GeoEAS input table
  dh: 0                       # 1-based column numbers, 0 = unused
  x: 1
  y: 2
  z: 0
  variables: [3, 4, 5, 6]
  output: outfile.out
  save_all: true              # write every realization
  recode: true                # rename realizations onto the consensus labels
  append: true                # output starts with the input columns

autocorrelation:
  nnears: 25                  # number of nearest neighbours
  angles: [0, 0, 0]           # ang1, ang2, ang3
  ranges: [500, 500, 500]     # range1, range2, range3
  cluster_method: kmeans      # kmeans, gmm or hier
  metrics: [1, 2]             # 0 = none, 1 = morans, 2 = getis
  weights: [0.5, 0.5]

ensemble:
  seed: 523151
  nreal: 100
  minvars: -1                 # -1 uses every variable
  final_nclus: 4
  target_nclus: 6
  remove: [0.0, 0.15]         # min and max fraction left out of a base run
  found: [0.001, 0.999]       # min and max cluster proportion
  consensus: spec             # spec(tral) or hier(archical)
";

#[derive(Debug, Clone, Deserialize)]
pub struct Params {
    pub data: DataParams,
    pub autocorrelation: AcParams,
    pub ensemble: EnsembleParams,
}

/// Input table, column mapping and output options.
#[derive(Debug, Clone, Deserialize)]
pub struct DataParams {
    pub file: PathBuf,
    #[serde(default)]
    pub dh: usize,
    pub x: usize,
    pub y: usize,
    #[serde(default)]
    pub z: usize,
    pub variables: Vec<usize>,
    pub output: PathBuf,
    #[serde(default)]
    pub save_all: bool,
    #[serde(default)]
    pub recode: bool,
    #[serde(default)]
    pub append: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcParams {
    #[serde(default)]
    pub nnears: Option<usize>,
    #[serde(default)]
    pub angles: [f64; 3],
    pub ranges: [f64; 3],
    #[serde(default)]
    pub max_per_group: Option<usize>,
    #[serde(default)]
    pub cluster_method: BaseMethod,
    #[serde(default)]
    pub metrics: Option<Vec<MetricCode>>,
    #[serde(default)]
    pub weights: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnsembleParams {
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub nreal: Option<usize>,
    #[serde(default)]
    pub minvars: Option<i64>,
    pub final_nclus: usize,
    pub target_nclus: usize,
    #[serde(default)]
    pub remove: Option<[f64; 2]>,
    #[serde(default)]
    pub found: Option<[f64; 2]>,
    #[serde(default)]
    pub consensus: ConsensusMethod,
    #[serde(default)]
    pub min_score: Option<f64>,
    #[serde(default)]
    pub max_retries: Option<usize>,
    #[serde(default)]
    pub min_realizations: Option<usize>,
    #[serde(default)]
    pub nthread: Option<usize>,
}

/// A metric by name or by its numeric code (0 none, 1 morans, 2 getis).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MetricCode {
    Code(u8),
    Name(AcMetric),
}

impl MetricCode {
    fn metric(self) -> Result<Option<AcMetric>> {
        match self {
            MetricCode::Code(0) => Ok(None),
            MetricCode::Code(1) => Ok(Some(AcMetric::Morans)),
            MetricCode::Code(2) => Ok(Some(AcMetric::Getis)),
            MetricCode::Code(c) => bail!("unknown autocorrelation metric code {c}"),
            MetricCode::Name(m) => Ok(Some(m)),
        }
    }
}

impl Params {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&data).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Engine configuration; unset values keep the library defaults.
    pub fn to_config(&self) -> Result<AcConfig> {
        let ac = &self.autocorrelation;
        let ens = &self.ensemble;
        let mut cfg = AcConfig::default();

        let mut search = SearchParams::new(ac.angles, ac.ranges, cfg.search.nnears);
        if let Some(n) = ac.nnears {
            search.nnears = n;
        }
        search.max_per_group = ac.max_per_group;
        cfg.search = search;
        cfg.cluster_method = ac.cluster_method;

        match (&ac.metrics, &ac.weights) {
            (None, None) => {}
            (None, Some(_)) => bail!("autocorrelation.weights given without metrics"),
            (Some(codes), weights) => {
                let weights = weights.clone().unwrap_or_else(|| vec![1.0; codes.len()]);
                if weights.len() != codes.len() {
                    bail!(
                        "autocorrelation: {} metrics but {} weights",
                        codes.len(),
                        weights.len()
                    );
                }
                cfg.metrics.clear();
                cfg.weights.clear();
                for (code, w) in codes.iter().zip(weights) {
                    if let Some(m) = code.metric()? {
                        cfg.metrics.push(m);
                        cfg.weights.push(w);
                    }
                }
            }
        }

        if let Some(seed) = ens.seed {
            cfg.seed = seed;
        }
        if let Some(nreal) = ens.nreal {
            cfg.nreal = nreal;
        }
        cfg.minvars = match ens.minvars {
            None | Some(-1) => None,
            Some(v) if v > 0 => Some(v as usize),
            Some(v) => bail!("ensemble.minvars must be -1 or positive, got {v}"),
        };
        if let Some(r) = ens.remove {
            cfg.remove = r;
        }
        if let Some(f) = ens.found {
            cfg.found = f;
        }
        cfg.min_score = ens.min_score;
        if let Some(m) = ens.max_retries {
            cfg.max_retries = m;
        }
        if let Some(m) = ens.min_realizations {
            cfg.min_realizations = m;
        }
        cfg.nthread = ens.nthread;

        if ens.final_nclus > ens.target_nclus {
            bail!(
                "ensemble.final_nclus ({}) exceeds target_nclus ({})",
                ens.final_nclus,
                ens.target_nclus
            );
        }
        cfg.validate(self.data.variables.len())?;
        Ok(cfg)
    }
}

//! acens - autocorrelation ensemble clustering of GSLIB data.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use spatialcluster_acens::{AcEnsemble, Clustering, PointSet, VariableMatrix};
use spatialcluster_gslib::Table;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod output;
mod params;

use output::{Output, OutputFormat, Summary, mean};
use params::{DEFAULT_PARAMS, DEFAULT_PARFILE, DataParams, Params};

/// Prefix of every column acens writes.
const PREFIX: &str = "acens";

/// Autocorrelation ensemble clustering.
///
/// Reads a YAML parameter file and a GSLIB/GeoEAS data table, generates an
/// ensemble of spatially constrained clusterings and writes their consensus.
/// Run without arguments to write a default parameter file.
#[derive(Parser)]
#[command(name = "acens")]
#[command(about = "Autocorrelation ensemble clustering of GSLIB data")]
#[command(version)]
pub struct Cli {
    /// Parameter file (YAML)
    pub parfile: Option<PathBuf>,

    /// Write a run summary to this file ("-" for stdout)
    #[arg(long)]
    pub summary: Option<String>,

    /// Summary as JSON instead of YAML
    #[arg(long)]
    pub json: bool,

    /// Verbose output
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let Some(parfile) = &cli.parfile else {
        std::fs::write(DEFAULT_PARFILE, DEFAULT_PARAMS)
            .with_context(|| format!("writing {DEFAULT_PARFILE}"))?;
        println!("wrote {DEFAULT_PARFILE}");
        return Ok(());
    };

    let params = Params::load(parfile)?;
    let summary = run(&params)?;

    if let Some(dest) = &cli.summary {
        let format = if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Yaml
        };
        let file = (dest != "-").then(|| dest.clone());
        Output::new(format, file).write(&summary)?;
    }
    Ok(())
}

fn run(params: &Params) -> Result<Summary> {
    let config = params.to_config()?;
    let data = &params.data;
    let ens = &params.ensemble;

    let table = Table::read(&data.file).with_context(|| {
        format!("reading {} (must be GSLIB/GeoEAS)", data.file.display())
    })?;
    let (points, variables) = load_inputs(data, &table)?;
    let (npoints, nvars) = (points.len(), variables.ncols());
    let nreal = config.nreal;

    let mut model = AcEnsemble::new(points, variables, config)?;
    model.fit(ens.target_nclus)?;
    let labels = model.predict(ens.final_nclus, ens.consensus)?;
    let ensemble = model.ensemble().context("no ensemble after fit")?;

    let mut out = if data.append {
        table
    } else {
        Table::new(format!("{PREFIX} output"))
    };
    out.push_column(format!("{PREFIX}_clusters"), as_column(&labels))?;

    let mut mean_agreement = None;
    if data.save_all {
        let realizations = if data.recode {
            let aligned = model.recode(&labels)?;
            mean_agreement = Some(mean(aligned.agreement().iter().copied()));
            aligned.into_ensemble()
        } else {
            ensemble.clone()
        };
        for r in realizations.realizations() {
            out.push_column(format!("{PREFIX}_real{}", r.index), as_column(&r.labels))?;
        }
    }
    out.write(&data.output)
        .with_context(|| format!("writing {}", data.output.display()))?;
    info!(
        "wrote {} columns, {} rows to {}",
        out.ncols(),
        out.nrows(),
        data.output.display()
    );

    Ok(Summary {
        npoints,
        nvars,
        target_nclus: ens.target_nclus,
        final_nclus: ens.final_nclus,
        consensus: ens.consensus.to_string(),
        realizations: ensemble.len(),
        dropped: nreal - ensemble.len(),
        mean_score: mean(ensemble.scores()),
        mean_attempts: mean(ensemble.realizations().iter().map(|r| r.attempts as f64)),
        proportions: labels.proportions(ens.final_nclus),
        mean_agreement,
        output: data.output.display().to_string(),
    })
}

/// Builds the engine inputs from 1-based column numbers (0 = unused).
fn load_inputs(data: &DataParams, table: &Table) -> Result<(PointSet, VariableMatrix)> {
    if data.x == 0 || data.y == 0 {
        bail!("data.x and data.y must be column numbers > 0");
    }
    if data.variables.is_empty() || data.variables.contains(&0) {
        bail!("data.variables must list column numbers > 0");
    }

    let mut used = vec![data.x - 1, data.y - 1];
    used.extend(data.variables.iter().map(|c| c - 1));
    if data.z > 0 {
        used.push(data.z - 1);
    }
    if data.dh > 0 {
        used.push(data.dh - 1);
    }
    let missing = table.missing_rows(&used);
    if let Some(first) = missing.first() {
        bail!(
            "{} rows hold missing values, first is data row {}; resolve them before clustering",
            missing.len(),
            first + 1
        );
    }

    let x = column(table, data, data.x)?;
    let y = column(table, data, data.y)?;
    let mut points = if data.z > 0 {
        let z = column(table, data, data.z)?;
        let xyz: Vec<[f64; 3]> = (0..x.len()).map(|i| [x[i], y[i], z[i]]).collect();
        PointSet::new_3d(&xyz)?
    } else {
        let xy: Vec<[f64; 2]> = (0..x.len()).map(|i| [x[i], y[i]]).collect();
        PointSet::new_2d(&xy)?
    };
    if data.dh > 0 {
        let groups = column(table, data, data.dh)?.iter().map(|v| v.round() as i64).collect();
        points = points.with_groups(groups)?;
    }

    let cols = data
        .variables
        .iter()
        .map(|&c| column(table, data, c))
        .collect::<Result<Vec<_>>>()?;
    let rows: Vec<Vec<f64>> = (0..x.len())
        .map(|r| cols.iter().map(|col| col[r]).collect())
        .collect();
    Ok((points, VariableMatrix::from_rows(&rows)?))
}

fn column<'a>(table: &'a Table, data: &DataParams, c: usize) -> Result<&'a [f64]> {
    table
        .column(c - 1)
        .with_context(|| format!("column {c} of {}", data.file.display()))
}

fn as_column(labels: &Clustering) -> Vec<f64> {
    labels.labels().iter().map(|&l| f64::from(l)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn write_data(path: &Path, missing: bool) {
        let mut t = Table::new("two regimes");
        let (mut x, mut y, mut v) = (Vec::new(), Vec::new(), Vec::new());
        for j in 0..6 {
            for i in 0..6 {
                x.push(i as f64 * 10.0);
                y.push(j as f64 * 10.0);
                let base = if i < 3 { 1.0 } else { 4.0 };
                v.push(base + ((i + j) % 3) as f64 * 0.1);
            }
        }
        if missing {
            v[5] = -999.0;
        }
        t.push_column("X", x).unwrap();
        t.push_column("Y", y).unwrap();
        t.push_column("Grade", v).unwrap();
        t.write(path).unwrap();
    }

    fn params(dir: &Path, append: bool, recode: bool) -> Params {
        let text = format!(
            "data:\n  file: {}\n  x: 1\n  y: 2\n  variables: [3]\n  output: {}\n  \
             save_all: true\n  recode: {recode}\n  append: {append}\n\
             autocorrelation:\n  nnears: 6\n  ranges: [15, 15, 15]\n\
             ensemble:\n  nreal: 4\n  final_nclus: 2\n  target_nclus: 2\n  \
             found: [0.05, 0.95]\n  consensus: hier\n  nthread: 2\n",
            dir.join("data.dat").display(),
            dir.join("out.dat").display(),
        );
        Params::parse(&text).unwrap()
    }

    #[test]
    fn run_appends_labels_and_realizations() {
        let dir = tempfile::tempdir().unwrap();
        write_data(&dir.path().join("data.dat"), false);

        let summary = run(&params(dir.path(), true, true)).unwrap();
        assert_eq!(summary.npoints, 36);
        assert_eq!(summary.realizations + summary.dropped, 4);
        assert!(summary.mean_agreement.is_some());

        let out = Table::read(dir.path().join("out.dat")).unwrap();
        assert_eq!(&out.names()[..4], &["X", "Y", "Grade", "acens_clusters"]);
        assert_eq!(out.ncols(), 4 + summary.realizations);
        let labels = out.column_by_name("acens_clusters").unwrap();
        assert!(labels.iter().all(|&l| l == 0.0 || l == 1.0));
    }

    #[test]
    fn run_without_append_writes_only_results() {
        let dir = tempfile::tempdir().unwrap();
        write_data(&dir.path().join("data.dat"), false);

        let summary = run(&params(dir.path(), false, false)).unwrap();
        assert!(summary.mean_agreement.is_none());
        let out = Table::read(dir.path().join("out.dat")).unwrap();
        assert_eq!(out.names()[0], "acens_clusters");
        assert_eq!(out.nrows(), 36);
    }

    #[test]
    fn missing_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_data(&dir.path().join("data.dat"), true);
        let err = run(&params(dir.path(), true, true)).unwrap_err();
        assert!(err.to_string().contains("missing"), "{err}");
    }

    #[test]
    fn default_parfile_is_valid() {
        let p = Params::parse(DEFAULT_PARAMS).unwrap();
        assert!(p.to_config().is_ok());
    }
}

//! Run summary output.

use std::fs::File;
use std::io::Write;

use serde::Serialize;

/// Summary format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

/// Where and how the summary is written. No file means stdout.
pub struct Output {
    pub format: OutputFormat,
    pub file: Option<String>,
}

impl Output {
    pub fn new(format: OutputFormat, file: Option<String>) -> Self {
        Self { format, file }
    }

    pub fn write<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        let output = match self.format {
            OutputFormat::Yaml => serde_yaml::to_string(value)?,
            OutputFormat::Json => serde_json::to_string_pretty(value)?,
        };

        match &self.file {
            Some(path) => {
                let mut file = File::create(path)?;
                file.write_all(output.as_bytes())?;
            }
            None => println!("{output}"),
        }
        Ok(())
    }
}

/// What one run produced.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub npoints: usize,
    pub nvars: usize,
    pub target_nclus: usize,
    pub final_nclus: usize,
    pub consensus: String,
    pub realizations: usize,
    pub dropped: usize,
    pub mean_score: f64,
    pub mean_attempts: f64,
    /// Fraction of points in each consensus cluster.
    pub proportions: Vec<f64>,
    /// Mean agreement of the recoded realizations with the consensus.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_agreement: Option<f64>,
    pub output: String,
}

pub fn mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, n) = values
        .into_iter()
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{GslibError, Result};

/// Values at or below this are treated as missing.
pub const MISSING_THRESHOLD: f64 = -998.0;

/// A GSLIB table held column-major.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    title: String,
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
}

impl Table {
    /// Creates an empty table.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            names: Vec::new(),
            columns: Vec::new(),
        }
    }

    /// Reads a table from a file.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Self::parse(BufReader::new(file))
    }

    /// Parses a table. Blank data lines are skipped; every other data line
    /// must hold exactly one number per column.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self> {
        let mut lines = reader.lines().enumerate();
        let mut next_line = |what: &str| -> Result<(usize, String)> {
            match lines.next() {
                Some((i, line)) => Ok((i + 1, line?)),
                None => Err(GslibError::InvalidFormat {
                    line: 0,
                    reason: format!("unexpected end of file, expected {what}"),
                }),
            }
        };

        let (_, title) = next_line("title")?;
        let (ln, count) = next_line("column count")?;
        let ncols: usize = count
            .split_whitespace()
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| GslibError::InvalidFormat {
                line: ln,
                reason: format!("expected a column count, got {count:?}"),
            })?;
        if ncols == 0 {
            return Err(GslibError::InvalidFormat {
                line: ln,
                reason: "table has no columns".into(),
            });
        }

        let mut names = Vec::with_capacity(ncols);
        for _ in 0..ncols {
            let (_, name) = next_line("column name")?;
            names.push(name.trim().to_string());
        }

        let mut columns = vec![Vec::new(); ncols];
        for (i, line) in lines {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let mut n = 0;
            for token in line.split_whitespace() {
                if n == ncols {
                    return Err(GslibError::InvalidFormat {
                        line: i + 1,
                        reason: format!("more than {ncols} values"),
                    });
                }
                let v: f64 = token.parse().map_err(|_| GslibError::InvalidFormat {
                    line: i + 1,
                    reason: format!("not a number: {token:?}"),
                })?;
                columns[n].push(v);
                n += 1;
            }
            if n != ncols {
                return Err(GslibError::InvalidFormat {
                    line: i + 1,
                    reason: format!("expected {ncols} values, got {n}"),
                });
            }
        }

        Ok(Self {
            title: title.trim().to_string(),
            names,
            columns,
        })
    }

    /// Writes the table to a file, replacing it.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        self.write_to(&mut w)?;
        w.flush()?;
        Ok(())
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        writeln!(w, "{}", self.title)?;
        writeln!(w, "{}", self.columns.len())?;
        for name in &self.names {
            writeln!(w, "{name}")?;
        }
        for row in 0..self.nrows() {
            for (c, col) in self.columns.iter().enumerate() {
                if c > 0 {
                    w.write_all(b" ")?;
                }
                write!(w, "{:>12}", col[row])?;
            }
            writeln!(w)?;
        }
        Ok(())
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    pub fn nrows(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    /// Column `idx`, zero-based.
    pub fn column(&self, idx: usize) -> Result<&[f64]> {
        self.columns
            .get(idx)
            .map(Vec::as_slice)
            .ok_or(GslibError::ColumnOutOfRange {
                column: idx,
                ncols: self.columns.len(),
            })
    }

    pub fn column_by_name(&self, name: &str) -> Option<&[f64]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.columns[i].as_slice())
    }

    /// Appends a column. Its length must match the existing rows.
    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<()> {
        let name = name.into();
        if !self.columns.is_empty() && values.len() != self.nrows() {
            return Err(GslibError::LengthMismatch {
                name,
                expected: self.nrows(),
                got: values.len(),
            });
        }
        self.names.push(name);
        self.columns.push(values);
        Ok(())
    }

    /// Rows in which any of `cols` holds a missing value. Out-of-range
    /// columns are ignored.
    pub fn missing_rows(&self, cols: &[usize]) -> Vec<usize> {
        (0..self.nrows())
            .filter(|&r| {
                cols.iter()
                    .filter_map(|&c| self.columns.get(c))
                    .any(|col| col[r] <= MISSING_THRESHOLD)
            })
            .collect()
    }
}

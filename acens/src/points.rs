use ndarray::{Array2, ArrayView1, Axis};

use crate::error::{AcError, Result};

/// Point locations with an optional drill-hole grouping.
///
/// Planar data is stored with `z = 0`; the flag only affects reporting.
#[derive(Debug, Clone)]
pub struct PointSet {
    coords: Vec<[f64; 3]>,
    planar: bool,
    groups: Option<Vec<i64>>,
}

impl PointSet {
    /// Creates a planar point set from `(x, y)` pairs.
    pub fn new_2d(xy: &[[f64; 2]]) -> Result<Self> {
        let coords = xy.iter().map(|p| [p[0], p[1], 0.0]).collect();
        Self::from_coords(coords, true)
    }

    /// Creates a point set from `(x, y, z)` triples.
    pub fn new_3d(xyz: &[[f64; 3]]) -> Result<Self> {
        Self::from_coords(xyz.to_vec(), false)
    }

    fn from_coords(coords: Vec<[f64; 3]>, planar: bool) -> Result<Self> {
        if coords.is_empty() {
            return Err(AcError::config("locations", "no points"));
        }
        if let Some(i) = coords
            .iter()
            .position(|c| c.iter().any(|v| !v.is_finite()))
        {
            return Err(AcError::config(
                "locations",
                format!("non-finite coordinate at point {i}"),
            ));
        }
        Ok(Self {
            coords,
            planar,
            groups: None,
        })
    }

    /// Attaches a group (drill hole) identifier to every point.
    pub fn with_groups(mut self, groups: Vec<i64>) -> Result<Self> {
        if groups.len() != self.coords.len() {
            return Err(AcError::config(
                "groups",
                format!(
                    "{} group ids for {} points",
                    groups.len(),
                    self.coords.len()
                ),
            ));
        }
        self.groups = Some(groups);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    pub fn is_planar(&self) -> bool {
        self.planar
    }

    pub fn coords(&self) -> &[[f64; 3]] {
        &self.coords
    }

    pub fn groups(&self) -> Option<&[i64]> {
        self.groups.as_deref()
    }
}

/// N×M matrix of continuous variables, one row per point.
#[derive(Debug, Clone)]
pub struct VariableMatrix {
    data: Array2<f64>,
}

impl VariableMatrix {
    /// Wraps a matrix, rejecting empty shapes and non-finite values.
    pub fn new(data: Array2<f64>) -> Result<Self> {
        if data.ncols() == 0 || data.nrows() == 0 {
            return Err(AcError::config(
                "variables",
                format!("empty matrix {}x{}", data.nrows(), data.ncols()),
            ));
        }
        for ((row, col), v) in data.indexed_iter() {
            if !v.is_finite() {
                return Err(AcError::config(
                    "variables",
                    format!("missing or non-finite value at row {row}, column {col}"),
                ));
            }
        }
        Ok(Self { data })
    }

    /// Builds a matrix from row vectors.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let ncols = rows.first().map_or(0, Vec::len);
        if let Some(i) = rows.iter().position(|r| r.len() != ncols) {
            return Err(AcError::config(
                "variables",
                format!("row {i} has {} values, expected {ncols}", rows[i].len()),
            ));
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        let data = Array2::from_shape_vec((rows.len(), ncols), flat)
            .map_err(|e| AcError::config("variables", e.to_string()))?;
        Self::new(data)
    }

    pub fn nrows(&self) -> usize {
        self.data.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.data.ncols()
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.data
    }

    /// Column-wise z-scores. Constant columns become zero.
    pub fn standardized(&self) -> Array2<f64> {
        let mut out = self.data.clone();
        for mut col in out.axis_iter_mut(Axis(1)) {
            let (mean, sd) = mean_std(col.view());
            if sd > 0.0 {
                col.mapv_inplace(|v| (v - mean) / sd);
            } else {
                col.fill(0.0);
            }
        }
        out
    }
}

pub(crate) fn mean_std(values: ArrayView1<'_, f64>) -> (f64, f64) {
    let n = values.len();
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = values.sum() / n as f64;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n as f64;
    (mean, var.sqrt())
}

/// One label per point, labels in `[0, k)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Clustering {
    labels: Vec<u32>,
}

impl Clustering {
    pub fn new(labels: Vec<u32>) -> Self {
        Self { labels }
    }

    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    pub fn into_labels(self) -> Vec<u32> {
        self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// One past the largest label, i.e. the size of the label range.
    pub fn label_range(&self) -> usize {
        self.labels.iter().max().map_or(0, |&m| m as usize + 1)
    }

    /// Number of distinct labels in use.
    pub fn num_clusters(&self) -> usize {
        let mut seen = vec![false; self.label_range()];
        for &l in &self.labels {
            seen[l as usize] = true;
        }
        seen.into_iter().filter(|&s| s).count()
    }

    /// Fraction of points carrying each label in `[0, k)`.
    pub fn proportions(&self, k: usize) -> Vec<f64> {
        let mut counts = vec![0usize; k.max(self.label_range())];
        for &l in &self.labels {
            counts[l as usize] += 1;
        }
        let n = self.labels.len().max(1) as f64;
        counts.into_iter().map(|c| c as f64 / n).collect()
    }

    /// Renumbers labels in order of first appearance.
    pub fn canonical(&self) -> Clustering {
        Clustering::new(canonicalize(&self.labels))
    }
}

pub(crate) fn canonicalize(labels: &[u32]) -> Vec<u32> {
    let range = labels.iter().max().map_or(0, |&m| m as usize + 1);
    let mut map = vec![u32::MAX; range];
    let mut next = 0u32;
    labels
        .iter()
        .map(|&l| {
            let slot = &mut map[l as usize];
            if *slot == u32::MAX {
                *slot = next;
                next += 1;
            }
            *slot
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn point_set_rejects_empty_and_nan() {
        assert!(PointSet::new_2d(&[]).is_err());
        assert!(PointSet::new_3d(&[[0.0, f64::NAN, 1.0]]).is_err());
    }

    #[test]
    fn point_set_groups_length_checked() {
        let ps = PointSet::new_2d(&[[0.0, 0.0], [1.0, 0.0]]).unwrap();
        assert!(ps.clone().with_groups(vec![1]).is_err());
        let ps = ps.with_groups(vec![1, 2]).unwrap();
        assert_eq!(ps.groups(), Some(&[1, 2][..]));
        assert!(ps.is_planar());
    }

    #[test]
    fn variable_matrix_names_missing_cell() {
        let err = VariableMatrix::new(array![[1.0, 2.0], [f64::NAN, 0.0]]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("row 1"), "{msg}");
        assert!(msg.contains("column 0"), "{msg}");
    }

    #[test]
    fn standardized_columns() {
        let vm = VariableMatrix::new(array![[1.0, 5.0], [3.0, 5.0]]).unwrap();
        let z = vm.standardized();
        assert!((z[[0, 0]] + 1.0).abs() < 1e-12);
        assert!((z[[1, 0]] - 1.0).abs() < 1e-12);
        assert_eq!(z[[0, 1]], 0.0);
    }

    #[test]
    fn clustering_counts() {
        let c = Clustering::new(vec![2, 2, 0, 2]);
        assert_eq!(c.label_range(), 3);
        assert_eq!(c.num_clusters(), 2);
        assert_eq!(c.proportions(3), vec![0.25, 0.0, 0.75]);
        assert_eq!(c.canonical().labels(), &[0, 0, 1, 0]);
    }
}

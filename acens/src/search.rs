//! Anisotropic nearest-neighbour search over point locations.
//!
//! Locations are rotated with the GSLIB rotation convention and every axis is
//! divided by its search range, so the ellipsoidal distance becomes the plain
//! Euclidean distance in the transformed space. A distance of 1.0 means "one
//! range away". The transformed points are held in an R-tree.

use std::collections::HashMap;

use rayon::prelude::*;
use rstar::RTree;
use rstar::primitives::GeomWithData;
use serde::{Deserialize, Serialize};

use crate::error::{AcError, Result};
use crate::points::PointSet;

/// Relative tolerance under which two squared distances count as a tie.
const TIE_EPS: f64 = 1e-9;

type Entry = GeomWithData<[f64; 3], usize>;

fn default_nnears() -> usize {
    25
}

/// Search ellipsoid and neighbour count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    /// Number of nearest neighbours used by autocorrelation statistics.
    #[serde(default = "default_nnears")]
    pub nnears: usize,

    /// `ang1` azimuth (clockwise from north), `ang2` dip, `ang3` plunge, degrees.
    #[serde(default)]
    pub angles: [f64; 3],

    /// Major, minor and vertical ranges. All must be positive.
    pub ranges: [f64; 3],

    /// Maximum neighbours taken from one drill hole. `None` means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_per_group: Option<usize>,
}

impl SearchParams {
    pub fn new(angles: [f64; 3], ranges: [f64; 3], nnears: usize) -> Self {
        Self {
            nnears,
            angles,
            ranges,
            max_per_group: None,
        }
    }

    /// Checks ranges and angles. Does not look at `nnears`.
    pub fn validate_geometry(&self) -> Result<()> {
        for (i, r) in self.ranges.iter().enumerate() {
            if !r.is_finite() || *r <= 0.0 {
                return Err(AcError::InvalidGeometry {
                    param: "ranges",
                    reason: format!("range{} must be positive, got {r}", i + 1),
                });
            }
        }
        if let Some(a) = self.angles.iter().find(|a| !a.is_finite()) {
            return Err(AcError::InvalidGeometry {
                param: "angles",
                reason: format!("non-finite angle {a}"),
            });
        }
        if self.max_per_group == Some(0) {
            return Err(AcError::InvalidGeometry {
                param: "max_per_group",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// GSLIB `setrot`, with each row scaled by the inverse of its range.
fn rotation(angles: [f64; 3], ranges: [f64; 3]) -> [[f64; 3]; 3] {
    let [ang1, ang2, ang3] = angles;
    let alpha = if (0.0..270.0).contains(&ang1) {
        90.0 - ang1
    } else {
        450.0 - ang1
    }
    .to_radians();
    let beta = (-ang2).to_radians();
    let theta = ang3.to_radians();

    let (sina, cosa) = alpha.sin_cos();
    let (sinb, cosb) = beta.sin_cos();
    let (sint, cost) = theta.sin_cos();

    let rows = [
        [cosb * cosa, cosb * sina, -sinb],
        [
            -cost * sina + sint * sinb * cosa,
            cost * cosa + sint * sinb * sina,
            sint * cosb,
        ],
        [
            sint * sina + cost * sinb * cosa,
            -sint * cosa + cost * sinb * sina,
            cost * cosb,
        ],
    ];
    let mut out = [[0.0; 3]; 3];
    for (r, row) in rows.iter().enumerate() {
        for (c, v) in row.iter().enumerate() {
            out[r][c] = v / ranges[r];
        }
    }
    out
}

fn apply(rot: &[[f64; 3]; 3], p: &[f64; 3]) -> [f64; 3] {
    let mut out = [0.0; 3];
    for (r, row) in rot.iter().enumerate() {
        out[r] = row[0] * p[0] + row[1] * p[1] + row[2] * p[2];
    }
    out
}

/// One search result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Index of the neighbouring point.
    pub index: usize,
    /// Anisotropic distance, in units of range.
    pub distance: f64,
}

/// k-NN lists for every point, computed once and shared read-only.
#[derive(Debug, Clone)]
pub struct NeighborTable {
    k: usize,
    lists: Vec<Vec<Neighbor>>,
}

impl NeighborTable {
    /// Builds a table directly from neighbour lists.
    pub fn from_lists(k: usize, lists: Vec<Vec<Neighbor>>) -> Self {
        Self { k, lists }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    pub fn of(&self, point: usize) -> &[Neighbor] {
        &self.lists[point]
    }

    pub fn iter(&self) -> impl Iterator<Item = &[Neighbor]> {
        self.lists.iter().map(Vec::as_slice)
    }
}

/// Nearest-neighbour index with an anisotropic ellipsoidal metric.
pub struct SpatialIndex {
    transformed: Vec<[f64; 3]>,
    groups: Option<Vec<i64>>,
    max_per_group: Option<usize>,
    tree: RTree<Entry>,
}

impl std::fmt::Debug for SpatialIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialIndex")
            .field("len", &self.transformed.len())
            .field("grouped", &self.groups.is_some())
            .field("max_per_group", &self.max_per_group)
            .finish()
    }
}

impl SpatialIndex {
    /// Builds the index. Fails with [`AcError::InvalidGeometry`] on any
    /// non-positive range, before touching the points.
    pub fn build(points: &PointSet, search: &SearchParams) -> Result<Self> {
        search.validate_geometry()?;
        let rot = rotation(search.angles, search.ranges);
        let transformed: Vec<[f64; 3]> = points.coords().iter().map(|p| apply(&rot, p)).collect();
        let entries: Vec<Entry> = transformed
            .iter()
            .enumerate()
            .map(|(i, p)| GeomWithData::new(*p, i))
            .collect();
        Ok(Self {
            groups: points.groups().map(<[i64]>::to_vec),
            max_per_group: search.max_per_group,
            transformed,
            tree: RTree::bulk_load(entries),
        })
    }

    pub fn len(&self) -> usize {
        self.transformed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformed.is_empty()
    }

    /// Returns up to `k` nearest other points, ascending by distance.
    /// Equal distances are ordered by ascending point index.
    pub fn query(&self, point: usize, k: usize) -> Vec<Neighbor> {
        let mut out = Vec::with_capacity(k);
        if k == 0 || point >= self.transformed.len() {
            return out;
        }

        let mut per_group: HashMap<i64, usize> = HashMap::new();
        let mut iter = self
            .tree
            .nearest_neighbor_iter_with_distance_2(&self.transformed[point])
            .peekable();
        let mut run: Vec<(usize, f64)> = Vec::new();

        while out.len() < k {
            let Some((first, d2)) = iter.next() else {
                break;
            };
            run.clear();
            run.push((first.data, d2));
            while let Some((next, nd2)) = iter.peek() {
                if *nd2 - d2 > TIE_EPS * d2.max(f64::MIN_POSITIVE) {
                    break;
                }
                run.push((next.data, *nd2));
                iter.next();
            }
            run.sort_unstable_by_key(|&(idx, _)| idx);

            for &(idx, d2) in &run {
                if idx == point {
                    continue;
                }
                if let (Some(groups), Some(limit)) = (&self.groups, self.max_per_group) {
                    let used = per_group.entry(groups[idx]).or_insert(0);
                    if *used >= limit {
                        continue;
                    }
                    *used += 1;
                }
                out.push(Neighbor {
                    index: idx,
                    distance: d2.sqrt(),
                });
                if out.len() == k {
                    break;
                }
            }
        }
        out
    }

    /// Runs [`SpatialIndex::query`] for every point in parallel.
    pub fn neighbors(&self, k: usize) -> NeighborTable {
        let lists = (0..self.transformed.len())
            .into_par_iter()
            .map(|i| self.query(i, k))
            .collect();
        NeighborTable { k, lists }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(n: usize) -> PointSet {
        let mut xy = Vec::new();
        for j in 0..n {
            for i in 0..n {
                xy.push([i as f64, j as f64]);
            }
        }
        PointSet::new_2d(&xy).unwrap()
    }

    #[test]
    fn zero_range_is_invalid_geometry() {
        let ps = grid(2);
        let sp = SearchParams::new([0.0; 3], [10.0, 0.0, 10.0], 4);
        let err = SpatialIndex::build(&ps, &sp).unwrap_err();
        assert!(matches!(err, AcError::InvalidGeometry { param: "ranges", .. }));
    }

    #[test]
    fn isotropic_query_orders_by_distance_then_index() {
        let ps = grid(3);
        let idx = SpatialIndex::build(&ps, &SearchParams::new([0.0; 3], [1.0; 3], 4)).unwrap();
        // Centre point 4 has four neighbours at distance 1: 1, 3, 5, 7.
        let nn = idx.query(4, 4);
        let ids: Vec<usize> = nn.iter().map(|n| n.index).collect();
        assert_eq!(ids, vec![1, 3, 5, 7]);
        for n in &nn {
            assert!((n.distance - 1.0).abs() < 1e-9, "got {}", n.distance);
        }
        let nn = idx.query(4, 8);
        assert_eq!(nn.len(), 8);
        assert!(nn.windows(2).all(|w| w[0].distance <= w[1].distance + 1e-9));
        assert!(nn.iter().all(|n| n.index != 4));
    }

    #[test]
    fn anisotropy_prefers_major_axis() {
        // Major range along north (y) is 10x the minor range along x.
        let ps = PointSet::new_2d(&[[0.0, 0.0], [1.0, 0.0], [0.0, 5.0]]).unwrap();
        let sp = SearchParams::new([0.0; 3], [10.0, 1.0, 1.0], 1);
        let idx = SpatialIndex::build(&ps, &sp).unwrap();
        let nn = idx.query(0, 1);
        assert_eq!(nn[0].index, 2);
        assert!((nn[0].distance - 0.5).abs() < 1e-9);

        // Rotate the major axis to east: now the x neighbour wins.
        let sp = SearchParams::new([90.0, 0.0, 0.0], [10.0, 1.0, 1.0], 1);
        let idx = SpatialIndex::build(&ps, &sp).unwrap();
        assert_eq!(idx.query(0, 1)[0].index, 1);
    }

    #[test]
    fn three_d_uses_vertical_range() {
        let ps = PointSet::new_3d(&[[0.0, 0.0, 0.0], [3.0, 0.0, 0.0], [0.0, 0.0, 2.0]]).unwrap();
        let sp = SearchParams::new([0.0; 3], [10.0, 10.0, 1.0], 2);
        let idx = SpatialIndex::build(&ps, &sp).unwrap();
        let nn = idx.query(0, 2);
        assert_eq!(nn[0].index, 1);
        assert!((nn[1].distance - 2.0).abs() < 1e-9);
    }

    #[test]
    fn max_per_group_limits_one_hole() {
        let ps = PointSet::new_3d(&[
            [0.0, 0.0, 0.0],
            [0.0, 0.0, 1.0],
            [0.0, 0.0, 2.0],
            [5.0, 0.0, 0.0],
        ])
        .unwrap()
        .with_groups(vec![1, 1, 1, 2])
        .unwrap();
        let mut sp = SearchParams::new([0.0; 3], [10.0; 3], 2);
        sp.max_per_group = Some(1);
        let idx = SpatialIndex::build(&ps, &sp).unwrap();
        let ids: Vec<usize> = idx.query(0, 2).iter().map(|n| n.index).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn small_sets_return_fewer() {
        let ps = grid(2);
        let idx = SpatialIndex::build(&ps, &SearchParams::new([0.0; 3], [1.0; 3], 10)).unwrap();
        assert_eq!(idx.query(0, 10).len(), 3);
        let table = idx.neighbors(2);
        assert_eq!(table.len(), 4);
        assert_eq!(table.of(0).len(), 2);
    }
}

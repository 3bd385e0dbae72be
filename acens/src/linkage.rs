//! Agglomerative clustering over a condensed dissimilarity matrix.
//!
//! Uses the nearest-neighbour chain algorithm with Lance-Williams updates:
//! O(n²) time and memory for the reducible linkages implemented here.

use serde::{Deserialize, Serialize};

/// Cluster-distance update rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    #[default]
    Average,
    Complete,
    Single,
    /// Expects squared Euclidean dissimilarities.
    Ward,
}

/// Upper triangle of a symmetric dissimilarity matrix, row-major, no diagonal.
#[derive(Debug, Clone)]
pub struct Condensed {
    n: usize,
    data: Vec<f64>,
}

impl Condensed {
    /// Fills the matrix from `f(i, j)` for every `i < j`.
    pub fn from_fn(n: usize, mut f: impl FnMut(usize, usize) -> f64) -> Self {
        let mut data = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for i in 0..n {
            for j in (i + 1)..n {
                data.push(f(i, j));
            }
        }
        Self { n, data }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    fn offset(&self, i: usize, j: usize) -> usize {
        let (i, j) = if i < j { (i, j) } else { (j, i) };
        self.n * i - i * (i + 1) / 2 + (j - i - 1)
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        if i == j {
            return 0.0;
        }
        self.data[self.offset(i, j)]
    }

    fn set(&mut self, i: usize, j: usize, v: f64) {
        let o = self.offset(i, j);
        self.data[o] = v;
    }
}

/// One merge: slot `b` was folded into slot `a` at `height`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Merge {
    pub a: usize,
    pub b: usize,
    pub height: f64,
}

/// Builds the full merge list (n − 1 merges, in chain order).
pub fn nn_chain(mut dist: Condensed, method: Linkage) -> Vec<Merge> {
    let n = dist.n;
    let mut merges = Vec::with_capacity(n.saturating_sub(1));
    if n < 2 {
        return merges;
    }
    let mut size = vec![1usize; n];
    let mut active = vec![true; n];
    let mut chain: Vec<usize> = Vec::with_capacity(n);

    for _ in 0..n - 1 {
        if chain.is_empty() {
            match active.iter().position(|&a| a) {
                Some(p) => chain.push(p),
                None => break,
            }
        }

        let (a, b, height) = loop {
            let a = chain[chain.len() - 1];
            let prev = (chain.len() >= 2).then(|| chain[chain.len() - 2]);

            // Ties keep the previous chain element, then the lowest index.
            let (mut best, mut best_d) = match prev {
                Some(p) => (Some(p), dist.get(a, p)),
                None => (None, f64::INFINITY),
            };
            for x in 0..n {
                if x == a || !active[x] {
                    continue;
                }
                let d = dist.get(a, x);
                if best.is_none() || d < best_d {
                    best = Some(x);
                    best_d = d;
                }
            }
            let Some(best) = best else {
                // Only reachable with a single active slot.
                return merges;
            };
            if Some(best) == prev {
                chain.truncate(chain.len() - 2);
                break (a, best, best_d);
            }
            chain.push(best);
        };

        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let (n_lo, n_hi) = (size[lo] as f64, size[hi] as f64);
        for x in 0..n {
            if x == lo || x == hi || !active[x] {
                continue;
            }
            let d_lo = dist.get(lo, x);
            let d_hi = dist.get(hi, x);
            let updated = match method {
                Linkage::Single => d_lo.min(d_hi),
                Linkage::Complete => d_lo.max(d_hi),
                Linkage::Average => (n_lo * d_lo + n_hi * d_hi) / (n_lo + n_hi),
                Linkage::Ward => {
                    let n_x = size[x] as f64;
                    ((n_lo + n_x) * d_lo + (n_hi + n_x) * d_hi - n_x * height)
                        / (n_lo + n_hi + n_x)
                }
            };
            dist.set(lo, x, updated);
        }
        active[hi] = false;
        size[lo] += size[hi];
        merges.push(Merge {
            a: lo,
            b: hi,
            height,
        });
    }
    merges
}

fn find(parent: &mut [usize], mut x: usize) -> usize {
    while parent[x] != x {
        parent[x] = parent[parent[x]];
        x = parent[x];
    }
    x
}

/// Cuts a dendrogram into `k` groups by applying the `n − k` lowest merges.
/// Labels are numbered in order of first appearance.
pub fn cut(n: usize, merges: &[Merge], k: usize) -> Vec<u32> {
    let k = k.clamp(1, n.max(1));
    let mut order: Vec<usize> = (0..merges.len()).collect();
    order.sort_by(|&x, &y| merges[x].height.total_cmp(&merges[y].height));

    let mut parent: Vec<usize> = (0..n).collect();
    for &m in order.iter().take(n.saturating_sub(k)) {
        let ra = find(&mut parent, merges[m].a);
        let rb = find(&mut parent, merges[m].b);
        if ra != rb {
            parent[ra.max(rb)] = ra.min(rb);
        }
    }

    let roots: Vec<u32> = (0..n).map(|i| find(&mut parent, i) as u32).collect();
    crate::points::canonicalize(&roots)
}

/// Agglomerates `dist` into `k` groups.
pub fn agglomerate(dist: Condensed, k: usize, method: Linkage) -> Vec<u32> {
    let n = dist.n();
    let merges = nn_chain(dist, method);
    cut(n, &merges, k)
}

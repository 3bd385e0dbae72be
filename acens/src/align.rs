//! Label correspondence across realizations.
//!
//! Each realization numbers its clusters arbitrarily. Alignment renames the
//! labels of every realization onto a reference labeling with a maximum
//! weight bipartite matching (Hungarian algorithm) on the label overlap
//! matrix. The weight of a pair is `overlap * (K + 1) + [same label]` with
//! `K` the smaller label count, so the total overlap decides and keeping a
//! label's current name only breaks ties. Pairs that share no point are
//! never matched; labels left unmatched are numbered after the reference
//! labels in ascending order of their current value. Aligning an aligned
//! ensemble against the same reference is therefore a no-op.

use rayon::prelude::*;

use crate::ensemble::Ensemble;
use crate::error::{AcError, Result};
use crate::points::Clustering;

/// Labeling the ensemble is aligned to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlignReference {
    /// The first kept realization.
    First,
    /// An explicit labeling, e.g. the consensus or [`majority_vote`].
    Labels(Clustering),
}

/// An ensemble renamed onto a reference, plus the fraction of points whose
/// renamed label equals the reference label in each realization.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedEnsemble {
    ensemble: Ensemble,
    agreement: Vec<f64>,
}

impl AlignedEnsemble {
    pub fn ensemble(&self) -> &Ensemble {
        &self.ensemble
    }

    pub fn agreement(&self) -> &[f64] {
        &self.agreement
    }

    pub fn into_ensemble(self) -> Ensemble {
        self.ensemble
    }
}

/// Aligns every realization of `ensemble` onto `reference`. The input is
/// left untouched.
pub fn align(ensemble: &Ensemble, reference: &AlignReference) -> Result<AlignedEnsemble> {
    let reference: &[u32] = match reference {
        AlignReference::First => match ensemble.get(0) {
            Some(r) => r.labels.labels(),
            None => {
                return Err(AcError::InsufficientEnsemble {
                    accepted: 0,
                    required: 1,
                });
            }
        },
        AlignReference::Labels(c) => c.labels(),
    };
    if reference.len() != ensemble.npoints() && !ensemble.is_empty() {
        return Err(AcError::config(
            "reference",
            format!(
                "reference labels {} points, ensemble {}",
                reference.len(),
                ensemble.npoints()
            ),
        ));
    }

    let (labels, agreement): (Vec<Clustering>, Vec<f64>) = ensemble
        .realizations()
        .par_iter()
        .map(|r| {
            let aligned = align_labels(r.labels.labels(), reference);
            let same = aligned
                .iter()
                .zip(reference)
                .filter(|(a, b)| a == b)
                .count();
            let frac = same as f64 / reference.len().max(1) as f64;
            (Clustering::new(aligned), frac)
        })
        .unzip();

    Ok(AlignedEnsemble {
        ensemble: ensemble.relabeled(labels),
        agreement,
    })
}

/// Renames `labels` onto `reference`. Both must have the same length.
pub fn align_labels(labels: &[u32], reference: &[u32]) -> Vec<u32> {
    let kr = range_of(labels);
    let kf = range_of(reference);
    let n = kr.max(kf);
    if n == 0 {
        return Vec::new();
    }

    let mut overlap = vec![vec![0u64; kf]; kr];
    for (&a, &b) in labels.iter().zip(reference) {
        overlap[a as usize][b as usize] += 1;
    }
    let present: Vec<bool> = overlap.iter().map(|row| row.iter().any(|&c| c > 0)).collect();

    let scale = (kr.min(kf) + 1) as f64;
    let weight = |a: usize, b: usize| -> f64 {
        if a >= kr || b >= kf || overlap[a][b] == 0 {
            return 0.0;
        }
        let bonus = if a == b { 1.0 } else { 0.0 };
        overlap[a][b] as f64 * scale + bonus
    };
    let max_w = (0..kr)
        .flat_map(|a| (0..kf).map(move |b| (a, b)))
        .map(|(a, b)| weight(a, b))
        .fold(0.0, f64::max);
    let cost: Vec<Vec<f64>> = (0..n)
        .map(|a| (0..n).map(|b| max_w - weight(a, b)).collect())
        .collect();
    let assignment = hungarian(&cost);

    let mut map = vec![u32::MAX; kr];
    for a in 0..kr {
        let b = assignment[a];
        if b < kf && overlap[a][b] > 0 {
            map[a] = b as u32;
        }
    }
    let mut next = kf as u32;
    for a in 0..kr {
        if map[a] == u32::MAX && present[a] {
            map[a] = next;
            next += 1;
        }
    }
    labels.iter().map(|&l| map[l as usize]).collect()
}

fn range_of(labels: &[u32]) -> usize {
    labels.iter().max().map_or(0, |&m| m as usize + 1)
}

/// Minimum-cost assignment on a square matrix (Kuhn-Munkres with
/// potentials, O(n³)). Returns the column assigned to each row.
fn hungarian(cost: &[Vec<f64>]) -> Vec<usize> {
    let n = cost.len();
    if n == 0 {
        return Vec::new();
    }

    // 1-indexed; column 0 is the virtual source of each augmenting search.
    let mut u = vec![0.0f64; n + 1];
    let mut v = vec![0.0f64; n + 1];
    let mut p = vec![0usize; n + 1];
    let mut way = vec![0usize; n + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0usize;
        let mut min_val = vec![f64::INFINITY; n + 1];
        let mut used = vec![false; n + 1];

        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0usize;
            for j in 1..=n {
                if used[j] {
                    continue;
                }
                let reduced = cost[i0 - 1][j - 1] - u[i0] - v[j];
                if reduced < min_val[j] {
                    min_val[j] = reduced;
                    way[j] = j0;
                }
                if min_val[j] < delta {
                    delta = min_val[j];
                    j1 = j;
                }
            }
            for j in 0..=n {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    min_val[j] -= delta;
                }
            }
            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }

        loop {
            let prev = way[j0];
            p[j0] = p[prev];
            j0 = prev;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut assignment = vec![0usize; n];
    for j in 1..=n {
        if p[j] > 0 {
            assignment[p[j] - 1] = j - 1;
        }
    }
    assignment
}

/// Most frequent label of every point across the ensemble, ties to the
/// smallest label. Meaningful on an aligned ensemble.
pub fn majority_vote(ensemble: &Ensemble) -> Clustering {
    let n = ensemble.npoints();
    let range = ensemble
        .clusterings()
        .map(Clustering::label_range)
        .max()
        .unwrap_or(0);
    let mut counts = vec![0u32; n * range];
    for c in ensemble.clusterings() {
        for (p, &l) in c.labels().iter().enumerate() {
            counts[p * range + l as usize] += 1;
        }
    }
    let labels = (0..n)
        .map(|p| {
            let row = &counts[p * range..(p + 1) * range];
            let mut best = 0usize;
            for (l, &c) in row.iter().enumerate() {
                if c > row[best] {
                    best = l;
                }
            }
            best as u32
        })
        .collect();
    Clustering::new(labels)
}

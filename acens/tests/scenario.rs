//! End-to-end scenarios on small synthetic grids.

use spatialcluster_acens::{
    AcConfig, AcEnsemble, AcError, AlignReference, Clustering, ConsensusMethod, Ensemble, Linkage,
    PointSet, SearchParams, VariableMatrix, align, consense,
};

const SIDE: usize = 10;

/// 10 x 10 unit grid: columns 0..5 are one regime, 5..10 the other.
fn two_regimes() -> (PointSet, VariableMatrix) {
    let mut xy = Vec::new();
    let mut rows = Vec::new();
    for j in 0..SIDE {
        for i in 0..SIDE {
            xy.push([i as f64, j as f64]);
            let noise = ((i * 7 + j * 13) % 10) as f64 * 0.05;
            let (a, b) = if i < SIDE / 2 { (1.0, 8.0) } else { (5.0, 2.0) };
            rows.push(vec![a + noise, b - noise, noise]);
        }
    }
    (
        PointSet::new_2d(&xy).unwrap(),
        VariableMatrix::from_rows(&rows).unwrap(),
    )
}

fn config() -> AcConfig {
    let mut cfg = AcConfig::default();
    cfg.search = SearchParams::new([0.0; 3], [1.5; 3], 8);
    cfg.nreal = 20;
    cfg.seed = 69069;
    cfg
}

fn model(cfg: AcConfig) -> AcEnsemble {
    let (ps, vm) = two_regimes();
    AcEnsemble::new(ps, vm, cfg).unwrap()
}

fn truth() -> Vec<u32> {
    (0..SIDE * SIDE)
        .map(|p| if p % SIDE < SIDE / 2 { 0 } else { 1 })
        .collect()
}

/// Agreement of a two-cluster labeling with the truth, up to a label swap.
fn agreement(labels: &Clustering) -> f64 {
    let t = truth();
    let same = labels
        .labels()
        .iter()
        .zip(&t)
        .filter(|(a, b)| a == b)
        .count() as f64
        / t.len() as f64;
    same.max(1.0 - same)
}

#[test]
fn same_seed_same_result() {
    let mut a = model(config());
    let mut b = model(config());
    let ea = a.fit(2).unwrap().clone();
    let eb = b.fit(2).unwrap().clone();
    assert_eq!(ea, eb);
    assert_eq!(
        a.predict(2, ConsensusMethod::Spectral).unwrap(),
        b.predict(2, ConsensusMethod::Spectral).unwrap()
    );
}

#[test]
fn thread_count_does_not_change_the_ensemble() {
    let mut one = config();
    one.nthread = Some(1);
    let mut four = config();
    four.nthread = Some(4);
    let mut a = model(one);
    let mut b = model(four);
    assert_eq!(a.fit(2).unwrap(), b.fit(2).unwrap());
}

#[test]
fn every_realization_labels_every_point() {
    let mut m = model(config());
    let ensemble = m.fit(3).unwrap();
    assert_eq!(ensemble.len(), 20);
    for r in ensemble.realizations() {
        assert_eq!(r.labels.len(), SIDE * SIDE);
        assert!(r.labels.labels().iter().all(|&l| l < 3));
        assert!(r.attempts >= 1);
    }
}

#[test]
fn coassociation_is_a_bounded_symmetric_similarity() {
    let mut m = model(config());
    m.fit(2).unwrap();
    let co = m.coassociation().unwrap();
    for i in 0..co.n() {
        assert_eq!(co.get(i, i), 1.0);
        for j in 0..i {
            let v = co.get(i, j);
            assert!((0.0..=1.0).contains(&v));
            assert_eq!(v, co.get(j, i));
        }
    }
}

#[test]
fn aligning_twice_changes_nothing() {
    let mut m = model(config());
    let ensemble = m.fit(3).unwrap().clone();
    let reference = AlignReference::Labels(ensemble.get(0).unwrap().labels.clone());
    let once = align(&ensemble, &reference).unwrap();
    let twice = align(once.ensemble(), &reference).unwrap();
    assert_eq!(once.ensemble(), twice.ensemble());
    assert_eq!(once.agreement(), twice.agreement());
}

#[test]
fn consensus_cluster_counts() {
    let mut m = model(config());
    m.fit(3).unwrap();
    for k in 1..=3 {
        let hier = m
            .predict(k, ConsensusMethod::Hierarchical(Linkage::Average))
            .unwrap();
        assert_eq!(hier.num_clusters(), k);
        let spec = m.predict(k, ConsensusMethod::Spectral).unwrap();
        assert!(spec.num_clusters() <= k);
        assert!(spec.labels().iter().all(|&l| (l as usize) < k));
    }
}

#[test]
fn two_regimes_are_recovered() {
    let mut m = model(config());
    m.fit(2).unwrap();
    for method in [
        ConsensusMethod::Spectral,
        ConsensusMethod::Hierarchical(Linkage::Average),
    ] {
        let labels = m.predict(2, method).unwrap();
        let a = agreement(&labels);
        assert!(a >= 0.95, "{method}: agreement {a}");
    }
}

#[test]
fn empty_ensemble_cannot_be_consensed() {
    let empty = Ensemble::from_clusterings(Vec::new()).unwrap();
    let err = consense(&empty, 2, ConsensusMethod::Spectral).unwrap_err();
    assert!(matches!(err, AcError::InsufficientEnsemble { .. }));
}

#[test]
fn zero_range_is_rejected_before_any_work() {
    let (ps, vm) = two_regimes();
    let mut cfg = config();
    cfg.search.ranges = [1.5, 0.0, 1.5];
    let err = AcEnsemble::new(ps, vm, cfg).unwrap_err();
    assert!(matches!(err, AcError::InvalidGeometry { .. }));
}

use ndarray::{Array2, Axis};

use affinitymesh::{AffinityPropagation, ApConfig, NegEuclidean, Preference};

/// Two tight, well-separated groups of five points each.
fn grouped_data() -> Array2<f64> {
    let offsets = [0.0, 0.1, -0.1, 0.2, -0.2];
    let mut rows = Vec::new();
    for &center in &[0.0, 10.0] {
        for &offset in &offsets {
            rows.push([center + offset, center - offset, center + offset]);
        }
    }
    let mut out = Array2::<f64>::zeros((rows.len(), 3));
    out.axis_iter_mut(Axis(0))
        .enumerate()
        .for_each(|(i, mut row)| {
            row.iter_mut().enumerate().for_each(|(j, v)| *v = rows[i][j]);
        });
    out
}

#[test]
fn separated_groups_form_two_clusters() {
    let x = grouped_data();
    let config = ApConfig::<f64> {
        preference: Preference::Value(-10.),
        shards: 2,
        threads: 4,
        enough_iterations: 10,
        max_iterations: 2000,
        ..ApConfig::default()
    };
    let ap = AffinityPropagation::new(config).unwrap();
    let result = ap.predict(&x, NegEuclidean::default()).unwrap();
    assert!(result.converged);
    assert_eq!(result.exemplars.len(), 2, "one exemplar per group");
    // No cluster mixes points from both groups.
    for members in result.clusters.values() {
        let in_first = members.iter().filter(|&&m| m < 5).count();
        assert!(in_first == 0 || in_first == members.len());
    }
    let assigned: usize = result.clusters.values().map(|v| v.len()).sum();
    assert_eq!(assigned, 10);
}

/// More shards than points must still run: the driver narrows the shard
/// count instead of leaving an empty shard parked at the barrier.
#[test]
fn shard_count_narrows_to_graph_size() {
    let x = grouped_data();
    let config = ApConfig::<f64> {
        preference: Preference::Value(-10.),
        shards: 64,
        threads: 4,
        max_iterations: 2000,
        ..ApConfig::default()
    };
    let ap = AffinityPropagation::new(config).unwrap();
    let result = ap.predict(&x, NegEuclidean::default()).unwrap();
    assert!(result.converged);
    assert_eq!(result.exemplars.len(), 2);
}

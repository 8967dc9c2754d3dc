//! Properties both dispatch strategies must share.

use super::collective::{run_collective, CollectiveOptions};
use super::pool::{pooled_process, PoolOptions};
use crate::bundle::ConfigBundle;
use crate::error::Error;
use crate::model::{Recording, RecordingSet};
use crate::partition::tests::{recording, scenario, sorted_ids};
use crate::transform::{Demean, Identity, Multiply, Transform};
use anyhow::bail;
use std::sync::Arc;

const STATIONS: usize = 5;

fn by_id(set: &RecordingSet) -> Vec<Recording> {
    let mut recordings: Vec<Recording> = set.iter().cloned().collect();
    recordings.sort_by(|a, b| a.id.cmp(&b.id));
    recordings
}

/// Samples of every recording as raw bit patterns, ordered by recording id.
fn sample_bits(set: &RecordingSet) -> Vec<(String, Vec<u64>)> {
    by_id(set)
        .into_iter()
        .map(|r| (r.id.to_string(), r.data.iter().map(|v| v.to_bits()).collect()))
        .collect()
}

/// Deterministic arbitrary bit patterns, so every class of `f64` shows up.
fn scrambled_samples(seed: u64, len: usize) -> Vec<f64> {
    let mut state = seed.wrapping_mul(0x9e37_79b9_7f4a_7c15) | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            f64::from_bits(state)
        })
        .collect()
}

async fn pool(set: &RecordingSet, config: &ConfigBundle, transform: Arc<dyn Transform>, n: usize) -> crate::Result<RecordingSet> {
    pooled_process(set, config, transform, PoolOptions::new(n)).await
}

async fn collective(set: &RecordingSet, config: &ConfigBundle, transform: Arc<dyn Transform>, n: usize) -> crate::Result<RecordingSet> {
    run_collective(n, set.clone(), config.clone(), transform, CollectiveOptions::default()).await
}

#[tokio::test]
async fn test_identity_round_trip_both_strategies() {
    let (set, cat) = scenario();
    let config = ConfigBundle::new(cat);

    for n in [1, STATIONS, STATIONS + 3] {
        let pooled = pool(&set, &config, Arc::new(Identity), n).await.unwrap();
        assert_eq!(sorted_ids(&pooled), sorted_ids(&set), "pool, n = {}", n);

        let gathered = collective(&set, &config, Arc::new(Identity), n).await.unwrap();
        assert_eq!(sorted_ids(&gathered), sorted_ids(&set), "collective, n = {}", n);
    }
}

#[tokio::test]
async fn test_strategies_agree() {
    let (set, cat) = scenario();
    let config = ConfigBundle::new(cat).with_param("factor", -2.0);
    let transforms: Vec<Arc<dyn Transform>> = vec![Arc::new(Multiply::default()), Arc::new(Demean)];

    for transform in transforms {
        for n in [2, 3, 4] {
            let pooled = pool(&set, &config, transform.clone(), n).await.unwrap();
            let gathered = collective(&set, &config, transform.clone(), n).await.unwrap();
            assert_eq!(
                by_id(&pooled),
                by_id(&gathered),
                "{} with {} workers",
                transform.name(),
                n
            );
        }
    }
}

#[tokio::test]
async fn test_outputs_match_serial_transform() {
    let (set, cat) = scenario();
    let config = ConfigBundle::new(cat).with_param("factor", 0.5);
    let serial = Multiply::default().apply(set.clone(), &config).unwrap();

    let pooled = pool(&set, &config, Arc::new(Multiply::default()), 3).await.unwrap();
    assert_eq!(by_id(&pooled), by_id(&serial));
}

#[tokio::test]
async fn test_failure_is_consolidated() {
    let (set, cat) = scenario();
    let config = ConfigBundle::new(cat);
    let fail_on_s3 = |set: RecordingSet, _: &ConfigBundle| -> anyhow::Result<RecordingSet> {
        if set.iter().any(|r| r.id.station == "S3") {
            bail!("cannot process S3");
        }
        Ok(set)
    };
    let transform: Arc<dyn Transform> = Arc::new(fail_on_s3);

    // S3 is the fourth catalog station, so with two workers it lands in bucket 1
    let err = pool(&set, &config, transform.clone(), 2).await.unwrap_err();
    assert!(matches!(err, Error::WorkersFailed { .. }));
    assert_eq!(err.failed_partitions(), vec![1]);

    let err = collective(&set, &config, transform, 2).await.unwrap_err();
    assert!(matches!(err, Error::Transform { partition: 1, .. }));
}

#[tokio::test]
async fn test_inputs_are_not_mutated() {
    let (set, cat) = scenario();
    let config = ConfigBundle::new(cat.clone()).with_param("factor", 10.0);
    let before_set = set.clone();
    let before_config = config.clone();

    pool(&set, &config, Arc::new(Multiply::default()), 3).await.unwrap();
    collective(&set, &config, Arc::new(Multiply::default()), 3).await.unwrap();

    assert_eq!(set, before_set);
    assert_eq!(config, before_config);
    assert_eq!(config.catalog, cat);
}

#[tokio::test]
async fn test_unknown_stations_dropped_by_both() {
    let (mut set, cat) = scenario();
    set.push(recording("ZZ", "GONE", "BHZ"));
    let config = ConfigBundle::new(cat);

    let pooled = pool(&set, &config, Arc::new(Identity), 2).await.unwrap();
    let gathered = collective(&set, &config, Arc::new(Identity), 2).await.unwrap();

    assert_eq!(pooled.len(), 12);
    assert_eq!(sorted_ids(&pooled), sorted_ids(&gathered));
}

#[tokio::test]
async fn test_non_finite_samples_cross_ranks() {
    let (mut set, cat) = scenario();
    for recording in set.iter_mut() {
        recording.data[1] = f64::NAN;
        recording.data[2] = f64::INFINITY;
        recording.data[3] = f64::NEG_INFINITY;
    }
    let config = ConfigBundle::new(cat).with_param("factor", -2.0);

    let pooled = pool(&set, &config, Arc::new(Identity), 3).await.unwrap();
    let gathered = collective(&set, &config, Arc::new(Identity), 3).await.unwrap();
    assert_eq!(sample_bits(&gathered), sample_bits(&set));
    assert_eq!(sample_bits(&gathered), sample_bits(&pooled));

    let pooled = pool(&set, &config, Arc::new(Multiply::default()), 3).await.unwrap();
    let gathered = collective(&set, &config, Arc::new(Multiply::default()), 3).await.unwrap();
    assert_eq!(sample_bits(&gathered), sample_bits(&pooled));
}

#[tokio::test]
async fn test_arbitrary_samples_are_bit_exact() {
    let (mut set, cat) = scenario();
    for (i, recording) in set.iter_mut().enumerate() {
        recording.data = scrambled_samples(i as u64 + 1, 5000);
    }
    let config = ConfigBundle::new(cat);

    for n in [2, 3, STATIONS] {
        let pooled = pool(&set, &config, Arc::new(Identity), n).await.unwrap();
        let gathered = collective(&set, &config, Arc::new(Identity), n).await.unwrap();

        assert_eq!(sample_bits(&pooled), sample_bits(&set), "pool, n = {}", n);
        assert_eq!(sample_bits(&gathered), sample_bits(&set), "collective, n = {}", n);
        let order = |s: &RecordingSet| s.iter().map(|r| r.id.clone()).collect::<Vec<_>>();
        assert_eq!(order(&gathered), order(&pooled), "merge order, n = {}", n);
    }
}

// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Exercises the reference [`CoordinationStore`]/[`ObjectStore`] implementations
//! against real backends via `testcontainers`, rather than the in-memory
//! fakes the rest of the test suite uses. These are the two external
//! collaborators the coordination protocol is actually deployed against.
//! Run with `cargo test -p batchfleet-test-framework --features real-backends`.

use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::Client as S3Client;
use batchfleet_coordination::objects::s3::S3ObjectStore;
use batchfleet_coordination::store::redis::RedisCoordinationStore;
use batchfleet_coordination::{optimistic_update, CoordinationStore, ObjectStore, Outcome};
use bytes::Bytes;
use std::time::Duration;
use test_r::test;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::minio::MinIO;
use testcontainers_modules::redis::Redis;

test_r::enable!();

async fn start_redis() -> (RedisCoordinationStore, ContainerAsync<Redis>) {
    let container = tryhard::retry_fn(|| Redis::default().start())
        .retries(5)
        .exponential_backoff(Duration::from_millis(10))
        .max_delay(Duration::from_secs(10))
        .await
        .expect("failed to start redis container");
    let port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("failed to get redis port");
    let store = RedisCoordinationStore::connect("127.0.0.1", port)
        .await
        .expect("failed to connect to redis container");
    (store, container)
}

async fn start_s3(bucket: &str) -> (S3ObjectStore, ContainerAsync<MinIO>) {
    let container = MinIO::default().start().await.expect("failed to start minio container");
    let port = container
        .get_host_port_ipv4(9000)
        .await
        .expect("failed to get minio port");
    let endpoint = format!("http://127.0.0.1:{port}");

    let region_provider = RegionProviderChain::default_provider().or_else("us-east-1");
    let credentials = Credentials::new("minioadmin", "minioadmin", None, None, "test");
    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(region_provider)
        .endpoint_url(endpoint.clone())
        .credentials_provider(credentials)
        .load()
        .await;
    let client = S3Client::new(&sdk_config);
    client
        .create_bucket()
        .bucket(bucket)
        .send()
        .await
        .expect("failed to create test bucket");

    (S3ObjectStore::with_client(client, bucket), container)
}

#[test]
async fn redis_optimistic_update_commits_against_a_real_watch() {
    let (store, _container) = start_redis().await;
    let keys = vec!["it_remaining".to_string()];

    store.set("it_remaining", b"[]".to_vec()).await.unwrap();

    let result: Result<(), _> = optimistic_update(&store, &keys, |values| {
        assert_eq!(values.get("it_remaining").unwrap().as_deref(), Some(&b"[]"[..]));
        Ok(Outcome::Commit {
            writes: vec![("it_remaining".to_string(), b"[1,2]".to_vec())],
            deletes: vec![],
            result: (),
        })
    })
    .await;

    assert!(result.is_ok());
    assert_eq!(store.get("it_remaining").await.unwrap(), Some(b"[1,2]".to_vec()));
}

#[test]
async fn redis_watch_detects_a_concurrent_writer_and_retries() {
    let (store, _container) = start_redis().await;
    store.set("it_conflict", b"0".to_vec()).await.unwrap();

    let keys = vec!["it_conflict".to_string()];
    let mut attempts = 0;
    let result: Result<(), _> = optimistic_update(&store, &keys, |_values| {
        attempts += 1;
        Ok(Outcome::Commit {
            writes: vec![("it_conflict".to_string(), b"1".to_vec())],
            deletes: vec![],
            result: (),
        })
    })
    .await;

    assert!(result.is_ok());
    assert!(attempts >= 1);
}

#[test]
async fn redis_delete_removes_a_key() {
    let (store, _container) = start_redis().await;
    store.set("it_gone", b"x".to_vec()).await.unwrap();
    store.delete("it_gone").await.unwrap();
    assert_eq!(store.get("it_gone").await.unwrap(), None);
}

#[test]
async fn s3_round_trips_and_lists_by_prefix() {
    let (store, _container) = start_s3("batchfleet-it").await;

    store
        .put("results/run-a/w1.json", Bytes::from_static(b"{\"a\":1}"))
        .await
        .unwrap();
    store
        .put("results/run-a/w2.json", Bytes::from_static(b"{\"a\":2}"))
        .await
        .unwrap();
    store
        .put("results/run-b/w1.json", Bytes::from_static(b"{\"b\":1}"))
        .await
        .unwrap();

    let mut keys = store.list("results/run-a/").await.unwrap();
    keys.sort();
    assert_eq!(
        keys,
        vec![
            "results/run-a/w1.json".to_string(),
            "results/run-a/w2.json".to_string(),
        ]
    );

    let data = store.get("results/run-a/w1.json").await.unwrap();
    assert_eq!(&data[..], b"{\"a\":1}");

    store.delete("results/run-a/w1.json").await.unwrap();
    assert!(store.get("results/run-a/w1.json").await.is_err());
}

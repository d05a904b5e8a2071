//! End-to-end tests for the entropy pipeline:
//! frame → extraction → conditioning → validation → pool → dispense.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use heliorand_core::{
    Conditioner, Config, EntropyPool, EntropyValidator, Frame, MemoryStore, NoiseExtractor,
    PoolError, RefillDriver, StaticFrameSource,
};

fn os_random(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    getrandom::fill(&mut buf).expect("OS CSPRNG failed");
    buf
}

fn encode_png(img: image::GrayImage) -> Vec<u8> {
    let mut png = Vec::new();
    image::DynamicImage::ImageLuma8(img)
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .unwrap();
    png
}

fn zero_frame(side: u32) -> Frame {
    Frame::new(encode_png(image::GrayImage::new(side, side)), "test/zeros")
}

fn noisy_frame(side: u32) -> Frame {
    let mut state = 0x9E3779B9_u32;
    let img = image::GrayImage::from_fn(side, side, |_, _| {
        state = state.wrapping_mul(1664525).wrapping_add(1013904223);
        image::Luma([(state >> 24) as u8])
    });
    Frame::new(encode_png(img), "test/noisy")
}

fn make_pool(store: Arc<MemoryStore>, cfg: &Config) -> Arc<EntropyPool> {
    Arc::new(EntropyPool::new(
        store,
        cfg.entropy_ttl(),
        cfg.max_bytes_per_request,
    ))
}

// ---------------------------------------------------------------------------
// S1: an all-zero frame must never reach the pool
// ---------------------------------------------------------------------------

#[tokio::test]
async fn golden_zeros_frame_yields_no_blocks() {
    let cfg = Config::default();
    let store = Arc::new(MemoryStore::new());
    let pool = make_pool(store, &cfg);
    let frames = Arc::new(StaticFrameSource::new(vec![zero_frame(1024)]));

    let driver = RefillDriver::new(pool.clone(), frames, cfg);
    let added = driver.refill_once().await;

    assert_eq!(added, 0);
    let stats = pool.stats().await.unwrap();
    assert_eq!(stats.available_blocks, 0);
    assert_eq!(stats.available_bytes, 0);
}

#[test]
fn golden_zeros_noise_is_rejected_before_whitening() {
    let extractor = NoiseExtractor::default();
    let raw = extractor
        .extract(&zero_frame(1024))
        .expect("zero frame decodes");
    assert!(raw.iter().all(|&b| b == 0));

    let mut conditioner = Conditioner::new(4096);
    let blocks = conditioner.process(&raw).unwrap();
    assert!(blocks.is_empty(), "degenerate noise must not become blocks");
}

// ---------------------------------------------------------------------------
// S2: OS-random input through the conditioner passes the validator
// ---------------------------------------------------------------------------

#[test]
fn os_random_baseline_mostly_passes() {
    let mut conditioner = Conditioner::new(4096);
    let validator = EntropyValidator::default();

    let blocks = conditioner.process(&os_random(1024 * 1024)).unwrap();
    assert_eq!(blocks.len(), 256);

    let passed = blocks
        .iter()
        .filter(|b| validator.validate(b).passed)
        .count();
    assert!(
        passed * 100 >= blocks.len() * 95,
        "only {passed}/{} blocks passed",
        blocks.len()
    );
}

// ---------------------------------------------------------------------------
// S3: concurrent takes — conservation and at-most-once delivery
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_takes_conserve_and_never_overlap() {
    let cfg = Config::default();
    let pool = make_pool(Arc::new(MemoryStore::new()), &cfg);

    // Ten 4096-byte blocks whose 8-byte words are globally unique.
    let mut word: u64 = 0;
    for _ in 0..10 {
        let mut payload = Vec::with_capacity(4096);
        for _ in 0..512 {
            payload.extend_from_slice(&word.to_be_bytes());
            word += 1;
        }
        pool.add(&payload, 0.9, serde_json::Value::Null)
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..80 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            // Retry transient misses: a tail being reinserted by a rival take
            // can leave the index momentarily empty.
            for _ in 0..10_000 {
                match pool.take(512).await {
                    Ok(bytes) => return Some(bytes),
                    Err(PoolError::Empty | PoolError::NotEnough { .. }) => {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                    Err(err) => panic!("unexpected take error: {err}"),
                }
            }
            None
        }));
    }

    let mut deliveries = Vec::new();
    for handle in handles {
        let bytes = handle.await.unwrap().expect("every take should succeed");
        assert_eq!(bytes.len(), 512);
        deliveries.push(bytes);
    }
    assert_eq!(deliveries.len(), 80);

    let mut words: Vec<u64> = deliveries
        .iter()
        .flat_map(|d| d.chunks_exact(8))
        .map(|c| u64::from_be_bytes(c.try_into().unwrap()))
        .collect();
    assert_eq!(words.len(), 80 * 64, "total delivered bytes must be 40960");
    words.sort_unstable();
    words.dedup();
    assert_eq!(words.len(), 80 * 64, "no two deliveries may share a byte");

    // The pool is drained to exactly zero.
    assert!(matches!(pool.take(1).await, Err(PoolError::Empty)));
    let stats = pool.stats().await.unwrap();
    assert_eq!(stats.bytes_served, 40960);
    assert!(stats.bytes_served <= stats.bytes_added);
}

// ---------------------------------------------------------------------------
// S4: one refill pass fills an empty pool with validated blocks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn refill_pass_fills_pool_with_validated_blocks() {
    let cfg = Config::default();
    let store = Arc::new(MemoryStore::new());
    let pool = make_pool(store, &cfg);
    let frames = Arc::new(StaticFrameSource::new(vec![noisy_frame(512)]));

    let driver = RefillDriver::new(pool.clone(), frames, cfg.clone());
    let added = driver.refill_once().await;
    assert!(added > 0);

    let stats = pool.stats().await.unwrap();
    assert!(stats.available_bytes > 0);
    assert_eq!(stats.available_blocks, added);

    // Spot-check every stored block against the validator.
    let validator = EntropyValidator::default();
    for _ in 0..added {
        let block = pool.take(cfg.block_size).await.unwrap();
        let verdict = validator.validate(&block);
        assert!(
            verdict.passed,
            "stored block failed validation (shannon {:.3}, quality {:.3})",
            verdict.shannon_entropy,
            verdict.quality_score
        );
    }
}

// ---------------------------------------------------------------------------
// S5: request bounds
// ---------------------------------------------------------------------------

#[tokio::test]
async fn take_bounds_are_enforced() {
    let cfg = Config::default();
    let pool = make_pool(Arc::new(MemoryStore::new()), &cfg);
    pool.add(&os_random(4096), 0.9, serde_json::Value::Null)
        .await
        .unwrap();

    assert!(pool.take(0).await.unwrap().is_empty());
    assert!(matches!(
        pool.take(10241).await,
        Err(PoolError::BadRequest {
            requested: 10241,
            max: 10240
        })
    ));
}

// ---------------------------------------------------------------------------
// S6: store outage and recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn store_outage_is_surfaced_and_recoverable() {
    let cfg = Config::default();
    let store = Arc::new(MemoryStore::new());
    let pool = make_pool(store.clone(), &cfg);

    let payload = os_random(4096);
    pool.add(&payload, 0.9, serde_json::Value::Null)
        .await
        .unwrap();

    store.set_available(false);
    assert!(matches!(pool.take(64).await, Err(PoolError::Store(_))));
    assert!(matches!(
        pool.add(&payload, 0.9, serde_json::Value::Null).await,
        Err(PoolError::Store(_))
    ));
    let health = pool.health().await;
    assert!(!health.connected);

    // Recovery: the unexpired block survived the outage.
    store.set_available(true);
    let out = pool.take(4096).await.unwrap();
    assert_eq!(out, payload);
}

// ---------------------------------------------------------------------------
// Universal properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn take_lengths_are_exact() {
    let cfg = Config::default();
    let pool = make_pool(Arc::new(MemoryStore::new()), &cfg);
    for _ in 0..4 {
        pool.add(&os_random(4096), 0.9, serde_json::Value::Null)
            .await
            .unwrap();
    }
    for n in [1, 17, 256, 1000, 4096] {
        assert_eq!(pool.take(n).await.unwrap().len(), n);
    }
}

#[tokio::test]
async fn ttl_expiry_removes_takeability() {
    let store = Arc::new(MemoryStore::new());
    let pool = Arc::new(EntropyPool::new(store, Duration::from_millis(40), 10240));
    pool.add(&os_random(4096), 0.9, serde_json::Value::Null)
        .await
        .unwrap();
    assert_eq!(pool.stats().await.unwrap().available_blocks, 1);

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(matches!(pool.take(64).await, Err(PoolError::Empty)));
    assert_eq!(pool.stats().await.unwrap().available_blocks, 0);
}

#[tokio::test]
async fn add_take_round_trip_returns_payload_prefix() {
    let cfg = Config::default();
    let pool = make_pool(Arc::new(MemoryStore::new()), &cfg);
    let payload = os_random(4096);
    pool.add(&payload, 0.88, serde_json::json!({"source": "round-trip"}))
        .await
        .unwrap();

    let out = pool.take(4096).await.unwrap();
    assert_eq!(out, payload);
}

#[tokio::test]
async fn served_bytes_never_exceed_added_bytes() {
    let cfg = Config::default();
    let pool = make_pool(Arc::new(MemoryStore::new()), &cfg);
    for _ in 0..3 {
        pool.add(&os_random(4096), 0.9, serde_json::Value::Null)
            .await
            .unwrap();
    }

    let mut served_total: i64 = 0;
    for n in [100, 2000, 4096, 512] {
        if let Ok(bytes) = pool.take(n).await {
            served_total += bytes.len() as i64;
        }
    }
    let stats = pool.stats().await.unwrap();
    assert_eq!(stats.bytes_served, served_total);
    assert!(stats.bytes_served <= stats.bytes_added);
}

#[test]
fn validator_verdicts_on_pathological_inputs() {
    let validator = EntropyValidator::default();

    assert!(!validator.validate(&vec![0u8; 4096]).passed);
    assert!(!validator.validate(&vec![0x41; 4096]).passed);
    let counter: Vec<u8> = (0..4096).map(|i| (i % 256) as u8).collect();
    assert!(!validator.validate(&counter).passed);

    let verdict = validator.validate(&os_random(4096));
    assert!(verdict.passed);
    assert!(verdict.shannon_entropy >= 7.9);
}

#[test]
fn conditioner_chain_is_deterministic_under_a_pinned_clock() {
    fn clock_a() -> u64 {
        1_750_000_000_000_000
    }
    fn clock_b() -> u64 {
        1_750_000_000_000_001
    }

    let raw = os_random(8 * 4096);
    let mut one = Conditioner::with_clock(4096, clock_a);
    let mut two = Conditioner::with_clock(4096, clock_a);
    assert_eq!(one.process(&raw).unwrap(), two.process(&raw).unwrap());

    let mut later = Conditioner::with_clock(4096, clock_b);
    let first = {
        let mut c = Conditioner::with_clock(4096, clock_a);
        c.process(&raw).unwrap()
    };
    let second = later.process(&raw).unwrap();
    for (a, b) in first.iter().zip(&second) {
        assert_ne!(a, b, "a clock tick must change every block");
    }
}

// ---------------------------------------------------------------------------
// Full pipeline: frame in, random bytes out
// ---------------------------------------------------------------------------

#[tokio::test]
async fn frame_to_dispensed_bytes() {
    let cfg = Config::default();
    let pool = make_pool(Arc::new(MemoryStore::new()), &cfg);
    let frames = Arc::new(StaticFrameSource::new(vec![noisy_frame(512)]));

    let driver = RefillDriver::new(pool.clone(), frames, cfg);
    assert!(driver.refill_once().await > 0);

    let bytes = pool.take(1024).await.unwrap();
    assert_eq!(bytes.len(), 1024);
    assert!(heliorand_core::quick_shannon(&bytes) > 7.0);

    let health = pool.health().await;
    assert!(health.connected);
    assert!(health.healthy);
}

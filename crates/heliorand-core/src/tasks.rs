//! Long-running drivers: frame fetching and pool refilling.
//!
//! Both loops are plain tokio tasks parameterized over a shutdown watch
//! channel. They log and continue on every recoverable error — a broken
//! fetch cycle or an unreachable store must never take the process down.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::archive::FrameArchive;
use crate::conditioning::{ConditionError, Conditioner};
use crate::config::Config;
use crate::extract::{ExtractError, NoiseExtractor};
use crate::frame::{Frame, FrameSource};
use crate::pool::EntropyPool;
use crate::validation::EntropyValidator;

/// Create the shutdown channel shared by all drivers.
///
/// Send `true` (or drop the sender) to stop every listening task at its next
/// suspension point.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

fn is_shutdown(rx: &mut watch::Receiver<bool>) -> bool {
    *rx.borrow_and_update()
}

#[derive(Debug, Error)]
enum FrameProcessError {
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Condition(#[from] ConditionError),
    #[error("pipeline worker panicked")]
    WorkerPanic,
}

// ---------------------------------------------------------------------------
// Fetch driver
// ---------------------------------------------------------------------------

/// Periodically pulls the latest frames and optionally mirrors them to an
/// archive.
pub struct FetchDriver {
    frames: Arc<dyn FrameSource>,
    archive: Option<Arc<dyn FrameArchive>>,
    interval: std::time::Duration,
}

impl FetchDriver {
    pub fn new(
        frames: Arc<dyn FrameSource>,
        archive: Option<Arc<dyn FrameArchive>>,
        cfg: &Config,
    ) -> Self {
        Self {
            frames,
            archive,
            interval: cfg.fetch_interval(),
        }
    }

    /// One fetch cycle. Failures are logged, never propagated.
    pub async fn fetch_once(&self) -> usize {
        match self.frames.fetch_latest().await {
            Ok(frames) => {
                log::info!("fetched {} frame(s)", frames.len());
                if let Some(archive) = &self.archive {
                    for frame in &frames {
                        match archive.store(frame).await {
                            Ok(location) => log::debug!("archived frame to {location}"),
                            Err(err) => log::warn!("frame archival failed: {err}"),
                        }
                    }
                }
                frames.len()
            }
            Err(err) => {
                log::warn!("fetch cycle failed: {err}");
                0
            }
        }
    }

    /// Fetch on a timer until shutdown. The first cycle runs immediately.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::info!("fetch loop started (interval {:?})", self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.fetch_once().await;
                }
                _ = shutdown.changed() => {
                    if is_shutdown(&mut shutdown) {
                        log::info!("fetch loop stopping");
                        return;
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Refill driver
// ---------------------------------------------------------------------------

/// Watches the pool fill level and drives the extract→condition→validate
/// pipeline when it drops below the low-water mark.
pub struct RefillDriver {
    pool: Arc<EntropyPool>,
    frames: Arc<dyn FrameSource>,
    extractor: NoiseExtractor,
    validator: EntropyValidator,
    // One chain per driver; the mutex only bridges into spawn_blocking.
    conditioner: Arc<Mutex<Conditioner>>,
    cfg: Config,
}

impl RefillDriver {
    pub fn new(pool: Arc<EntropyPool>, frames: Arc<dyn FrameSource>, cfg: Config) -> Self {
        Self {
            pool,
            frames,
            extractor: NoiseExtractor::from_config(&cfg),
            validator: EntropyValidator::new(cfg.min_shannon, cfg.min_quality),
            conditioner: Arc::new(Mutex::new(Conditioner::new(cfg.block_size))),
            cfg,
        }
    }

    /// Run the CPU stages for one frame on a blocking worker and return the
    /// passing blocks with their quality scores.
    async fn process_frame(&self, frame: Frame) -> Result<Vec<(Vec<u8>, f64)>, FrameProcessError> {
        let extractor = self.extractor.clone();
        let validator = self.validator.clone();
        let conditioner = Arc::clone(&self.conditioner);

        tokio::task::spawn_blocking(move || {
            let raw = extractor.extract(&frame)?;
            let blocks = {
                let mut cond = conditioner.lock().unwrap_or_else(|p| p.into_inner());
                cond.process(&raw)?
            };
            let scored = blocks
                .into_iter()
                .filter_map(|block| {
                    let verdict = validator.validate(&block);
                    if !verdict.passed {
                        log::debug!(
                            "validator rejected block (shannon {:.3}, quality {:.3})",
                            verdict.shannon_entropy,
                            verdict.quality_score
                        );
                    }
                    verdict.passed.then_some((block, verdict.quality_score))
                })
                .collect();
            Ok(scored)
        })
        .await
        .map_err(|_| FrameProcessError::WorkerPanic)?
    }

    /// One refill pass: process cached frames until the pool is above the
    /// low-water mark, the frames run out, or (without `exhaust_frames`) the
    /// first frame has contributed blocks. Returns blocks added.
    pub async fn refill_once(&self) -> usize {
        let available = match self.pool.stats().await {
            Ok(stats) => stats.available_bytes,
            Err(err) => {
                log::warn!("refill skipped, pool stats unavailable: {err}");
                return 0;
            }
        };
        if available >= self.cfg.low_water_mark {
            return 0;
        }
        log::info!(
            "pool low ({available} < {} bytes), generating blocks",
            self.cfg.low_water_mark
        );

        let frames = self.frames.stored().await;
        if frames.is_empty() {
            log::warn!("no frames cached, refill has nothing to process");
            return 0;
        }

        let mut total_added = 0usize;
        for frame in frames {
            let tag = frame.source_tag.clone();
            let fetched_at = frame.fetched_at;

            let scored = match self.process_frame(frame).await {
                Ok(scored) => scored,
                Err(err) => {
                    log::warn!("skipping frame {tag}: {err}");
                    continue;
                }
            };

            let mut added = 0usize;
            for (block, quality) in scored {
                let info = serde_json::json!({
                    "source": tag,
                    "fetched_at": fetched_at.to_rfc3339(),
                });
                match self.pool.add(&block, quality, info).await {
                    Ok(_) => added += 1,
                    Err(err) => {
                        log::warn!("pool add failed, aborting refill pass: {err}");
                        return total_added;
                    }
                }
            }
            total_added += added;
            log::info!("added {added} block(s) from {tag}");

            // Re-check fill after each frame so one pass cannot monopolize
            // the store.
            match self.pool.stats().await {
                Ok(stats) if stats.available_bytes >= self.cfg.low_water_mark => break,
                Ok(_) => {}
                Err(err) => {
                    log::warn!("stopping refill pass, pool stats unavailable: {err}");
                    break;
                }
            }
            if added > 0 && !self.cfg.exhaust_frames {
                break;
            }
        }
        total_added
    }

    /// Refill on a timer until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.cfg.refill_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::info!(
            "refill loop started (interval {:?}, low water {} bytes)",
            self.cfg.refill_interval(),
            self.cfg.low_water_mark
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refill_once().await;
                }
                _ = shutdown.changed() => {
                    if is_shutdown(&mut shutdown) {
                        log::info!("refill loop stopping");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::StaticFrameSource;
    use crate::store::MemoryStore;
    use std::io::Cursor;
    use std::time::Duration;

    fn noisy_frame(side: u32) -> Frame {
        // LCG-filled grayscale image: cheap, deterministic, entropy-rich.
        let mut state = 0x2545F491_u32;
        let img = image::GrayImage::from_fn(side, side, |_, _| {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            image::Luma([(state >> 24) as u8])
        });
        let mut png = Vec::new();
        image::DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        Frame::new(png, "test/noisy")
    }

    fn small_config() -> Config {
        Config {
            low_water_mark: 16 * 1024,
            ..Config::default()
        }
    }

    fn pool_on(store: Arc<MemoryStore>, cfg: &Config) -> Arc<EntropyPool> {
        Arc::new(EntropyPool::new(
            store,
            cfg.entropy_ttl(),
            cfg.max_bytes_per_request,
        ))
    }

    #[tokio::test]
    async fn refill_fills_an_empty_pool() {
        let cfg = small_config();
        let pool = pool_on(Arc::new(MemoryStore::new()), &cfg);
        let frames = Arc::new(StaticFrameSource::new(vec![noisy_frame(256)]));
        let driver = RefillDriver::new(pool.clone(), frames, cfg);

        let added = driver.refill_once().await;
        assert!(added > 0);
        let stats = pool.stats().await.unwrap();
        assert!(stats.available_bytes > 0);
        assert_eq!(stats.blocks_added as usize, added);
    }

    #[tokio::test]
    async fn refill_is_idle_above_low_water() {
        let cfg = small_config();
        let pool = pool_on(Arc::new(MemoryStore::new()), &cfg);
        let frames = Arc::new(StaticFrameSource::new(vec![noisy_frame(256)]));
        let driver = RefillDriver::new(pool.clone(), frames, cfg);

        assert!(driver.refill_once().await > 0);
        // 256x256 yields far more than the 16 KiB low-water mark.
        assert_eq!(driver.refill_once().await, 0);
    }

    #[tokio::test]
    async fn refill_skips_undecodable_frames() {
        let cfg = small_config();
        let pool = pool_on(Arc::new(MemoryStore::new()), &cfg);
        let frames = Arc::new(StaticFrameSource::new(vec![
            Frame::new(vec![0xBA, 0xD0], "test/broken"),
            noisy_frame(256),
        ]));
        let driver = RefillDriver::new(pool.clone(), frames, cfg);

        let added = driver.refill_once().await;
        assert!(added > 0, "good frame should still be processed");
    }

    #[tokio::test]
    async fn refill_with_offline_store_adds_nothing() {
        let cfg = small_config();
        let store = Arc::new(MemoryStore::new());
        let pool = pool_on(store.clone(), &cfg);
        let frames = Arc::new(StaticFrameSource::new(vec![noisy_frame(256)]));
        let driver = RefillDriver::new(pool, frames, cfg);

        store.set_available(false);
        assert_eq!(driver.refill_once().await, 0);
    }

    #[tokio::test]
    async fn drivers_stop_on_shutdown() {
        let cfg = small_config();
        let pool = pool_on(Arc::new(MemoryStore::new()), &cfg);
        let frames: Arc<StaticFrameSource> = Arc::new(StaticFrameSource::new(Vec::new()));

        let refill = RefillDriver::new(pool, frames.clone(), cfg.clone());
        let fetch = FetchDriver::new(frames, None, &cfg);

        let (tx, rx) = shutdown_channel();
        let refill_task = tokio::spawn(refill.run(rx.clone()));
        let fetch_task = tokio::spawn(fetch.run(rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            refill_task.await.unwrap();
            fetch_task.await.unwrap();
        })
        .await
        .expect("drivers must exit promptly on shutdown");
    }
}

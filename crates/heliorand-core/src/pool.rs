//! TTL'd entropy pool with at-most-once delivery.
//!
//! Three keyspaces in the backing store:
//!
//! - `entropy:block:<id>` — JSON envelope with the base64 payload, TTL'd
//! - `entropy:used:<id>`  — claim marker, written atomically with the delete
//! - `entropy:index`      — set of live block ids for O(1) candidate lookup
//!
//! Statistics live in per-field counter keys under `entropy:stats:` so
//! concurrent updates never fight over one JSON blob. Counters are advisory;
//! a failed update is dropped, never surfaced.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::store::{KeyValueStore, StoreError};

const BLOCK_PREFIX: &str = "entropy:block";
const USED_PREFIX: &str = "entropy:used";
const INDEX_KEY: &str = "entropy:index";
const STATS_PREFIX: &str = "entropy:stats";

/// How many envelopes the stats path reads before extrapolating.
const STATS_SAMPLE: usize = 100;

/// Error from pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Requested byte count is outside the allowed range.
    #[error("requested {requested} bytes, allowed range is 0..={max}")]
    BadRequest { requested: usize, max: usize },
    /// No claimable blocks at all.
    #[error("entropy pool is empty")]
    Empty,
    /// Some blocks were claimed but not enough to satisfy the request.
    /// Claimed bytes are discarded; there is no partial delivery.
    #[error("pool held only {collected} of {requested} requested bytes")]
    NotEnough { requested: usize, collected: usize },
    /// The backing store is unreachable.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Stored form of one block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockEnvelope {
    pub id: String,
    /// Base64-encoded payload.
    pub data: String,
    pub quality_score: f64,
    pub size: usize,
    pub timestamp: DateTime<Utc>,
    pub source_info: serde_json::Value,
}

/// Live pool statistics plus accumulated counters.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub available_blocks: usize,
    pub available_bytes: u64,
    pub average_quality: f64,
    pub blocks_added: i64,
    pub bytes_added: i64,
    pub bytes_served: i64,
    pub requests_served: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Health summary for the pool and its store.
#[derive(Debug, Clone, Serialize)]
pub struct PoolHealth {
    pub connected: bool,
    pub healthy: bool,
    pub available_blocks: usize,
    pub available_bytes: u64,
}

/// Handle to the shared entropy pool.
///
/// The store is the single source of truth: no payload is ever cached in
/// process, and the per-block claim inside the store is what guarantees that
/// no byte is served twice.
pub struct EntropyPool {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
    max_bytes_per_request: usize,
}

impl EntropyPool {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration, max_bytes_per_request: usize) -> Self {
        Self {
            store,
            ttl,
            max_bytes_per_request,
        }
    }

    /// Insert a validated block and return its fresh id.
    ///
    /// The caller vouches for quality — the pool does not re-validate.
    pub async fn add(
        &self,
        payload: &[u8],
        quality_score: f64,
        source_info: serde_json::Value,
    ) -> Result<Uuid, PoolError> {
        let id = Uuid::new_v4();
        let envelope = BlockEnvelope {
            id: id.to_string(),
            data: BASE64.encode(payload),
            quality_score,
            size: payload.len(),
            timestamp: Utc::now(),
            source_info,
        };
        let body = serde_json::to_vec(&envelope).expect("envelope serializes");

        self.store
            .set_with_ttl(&block_key(&id.to_string()), &body, self.ttl)
            .await?;
        self.store.set_add(INDEX_KEY, &id.to_string()).await?;

        self.bump("blocks_added", 1).await;
        self.bump("bytes_added", payload.len() as i64).await;
        self.touch().await;

        log::debug!(
            "added block {id} ({} bytes, quality {quality_score:.3})",
            payload.len()
        );
        Ok(id)
    }

    /// Claim blocks until exactly `n` bytes are collected.
    ///
    /// Each block is claimed atomically in the store, so two concurrent
    /// takes can never observe the same payload. The unused tail of the last
    /// claimed block is reinserted under a fresh id with the block's
    /// remaining TTL, so a small request does not burn a whole block. On a
    /// failed take (`Empty`/`NotEnough`) everything already claimed is
    /// discarded — there is no partial delivery and no revival of a claimed
    /// id.
    pub async fn take(&self, n: usize) -> Result<Vec<u8>, PoolError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        if n > self.max_bytes_per_request {
            return Err(PoolError::BadRequest {
                requested: n,
                max: self.max_bytes_per_request,
            });
        }

        let candidates = self.store.set_members(INDEX_KEY).await?;
        if candidates.is_empty() {
            return Err(PoolError::Empty);
        }

        let mut collected: Vec<u8> = Vec::with_capacity(n);
        let mut blocks_used = 0usize;

        for id in candidates {
            if collected.len() >= n {
                break;
            }
            let Some((body, remaining_ttl)) = self
                .store
                .claim(&block_key(&id), &used_key(&id), INDEX_KEY, &id)
                .await?
            else {
                continue;
            };

            let envelope: BlockEnvelope = match serde_json::from_slice(&body) {
                Ok(env) => env,
                Err(err) => {
                    log::error!("discarding undecodable block {id}: {err}");
                    continue;
                }
            };
            let payload = match BASE64.decode(&envelope.data) {
                Ok(p) => p,
                Err(err) => {
                    log::error!("discarding block {id} with corrupt payload: {err}");
                    continue;
                }
            };

            let needed = n - collected.len();
            let used = needed.min(payload.len());
            collected.extend_from_slice(&payload[..used]);
            blocks_used += 1;

            if used < payload.len() {
                self.reinsert_tail(&envelope, &payload[used..], remaining_ttl)
                    .await;
            }
        }

        if collected.is_empty() {
            return Err(PoolError::Empty);
        }
        if collected.len() < n {
            log::warn!("pool could satisfy only {}/{} bytes", collected.len(), n);
            return Err(PoolError::NotEnough {
                requested: n,
                collected: collected.len(),
            });
        }

        self.bump("bytes_served", n as i64).await;
        self.bump("requests_served", 1).await;
        self.touch().await;

        log::info!("served {n} bytes from {blocks_used} block(s)");
        Ok(collected)
    }

    /// Live counts, a sampled byte/quality estimate, and the counters.
    pub async fn stats(&self) -> Result<PoolStats, PoolError> {
        let live = self.live_block_ids().await?;

        let mut sampled_bytes = 0u64;
        let mut qualities = Vec::new();
        let sample_len = live.len().min(STATS_SAMPLE);
        for id in &live[..sample_len] {
            let Some(body) = self.store.get(&block_key(id)).await? else {
                continue;
            };
            if let Ok(envelope) = serde_json::from_slice::<BlockEnvelope>(&body) {
                sampled_bytes += envelope.size as u64;
                qualities.push(envelope.quality_score);
            }
        }

        // Linear extrapolation when more blocks exist than were sampled.
        let available_bytes = if live.len() > sample_len && sample_len > 0 {
            sampled_bytes * live.len() as u64 / sample_len as u64
        } else {
            sampled_bytes
        };
        let average_quality = if qualities.is_empty() {
            0.0
        } else {
            qualities.iter().sum::<f64>() / qualities.len() as f64
        };

        let last_updated_epoch = self.store.get_counter(&stats_key("last_updated")).await?;

        Ok(PoolStats {
            available_blocks: live.len(),
            available_bytes,
            average_quality,
            blocks_added: self.store.get_counter(&stats_key("blocks_added")).await?,
            bytes_added: self.store.get_counter(&stats_key("bytes_added")).await?,
            bytes_served: self.store.get_counter(&stats_key("bytes_served")).await?,
            requests_served: self.store.get_counter(&stats_key("requests_served")).await?,
            last_updated: (last_updated_epoch > 0)
                .then(|| DateTime::from_timestamp(last_updated_epoch, 0))
                .flatten(),
        })
    }

    /// Remove every block and claim marker. Statistics are preserved.
    pub async fn clear(&self) -> Result<(), PoolError> {
        for key in self.store.keys(&format!("{BLOCK_PREFIX}:")).await? {
            self.store.delete(&key).await?;
        }
        for key in self.store.keys(&format!("{USED_PREFIX}:")).await? {
            self.store.delete(&key).await?;
        }
        self.store.delete_set(INDEX_KEY).await?;
        log::info!("cleared entropy pool");
        Ok(())
    }

    /// Connectivity and fill health. Never errors: an unreachable store is
    /// reported as disconnected.
    pub async fn health(&self) -> PoolHealth {
        if self.store.ping().await.is_err() {
            return PoolHealth {
                connected: false,
                healthy: false,
                available_blocks: 0,
                available_bytes: 0,
            };
        }
        match self.stats().await {
            Ok(stats) => PoolHealth {
                connected: true,
                healthy: stats.available_blocks > 0,
                available_blocks: stats.available_blocks,
                available_bytes: stats.available_bytes,
            },
            Err(_) => PoolHealth {
                connected: false,
                healthy: false,
                available_blocks: 0,
                available_bytes: 0,
            },
        }
    }

    /// Re-pool the unused tail of a claimed block under a fresh id.
    ///
    /// The tail keeps the claimed block's remaining TTL and quality score.
    /// Its bytes were already counted by `bytes_added` at the original add,
    /// so no counters move here. Failure is logged and the tail is dropped —
    /// the upstream imagery is public, so the loss is waste, not exposure.
    async fn reinsert_tail(&self, envelope: &BlockEnvelope, tail: &[u8], ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let id = Uuid::new_v4();
        let reinserted = BlockEnvelope {
            id: id.to_string(),
            data: BASE64.encode(tail),
            quality_score: envelope.quality_score,
            size: tail.len(),
            timestamp: Utc::now(),
            source_info: serde_json::json!({
                "remainder_of": envelope.id,
                "origin": envelope.source_info,
            }),
        };
        let body = serde_json::to_vec(&reinserted).expect("envelope serializes");

        let outcome = async {
            self.store
                .set_with_ttl(&block_key(&id.to_string()), &body, ttl)
                .await?;
            self.store.set_add(INDEX_KEY, &id.to_string()).await
        }
        .await;
        match outcome {
            Ok(()) => log::debug!(
                "reinserted {}-byte tail of {} as {id}",
                tail.len(),
                envelope.id
            ),
            Err(err) => log::warn!("dropping {}-byte tail of {}: {err}", tail.len(), envelope.id),
        }
    }

    /// Index members whose blocks still exist; expired members are pruned
    /// from the index as a side effect.
    async fn live_block_ids(&self) -> Result<Vec<String>, PoolError> {
        let ids = self.store.set_members(INDEX_KEY).await?;
        let mut live = Vec::with_capacity(ids.len());
        for id in ids {
            if self.store.exists(&block_key(&id)).await? {
                live.push(id);
            } else {
                let _ = self.store.set_remove(INDEX_KEY, &id).await;
            }
        }
        Ok(live)
    }

    /// Best-effort counter update; failures are dropped.
    async fn bump(&self, field: &str, delta: i64) {
        if let Err(err) = self.store.incr_by(&stats_key(field), delta).await {
            log::debug!("dropping stats update {field}+{delta}: {err}");
        }
    }

    /// Best-effort last-updated stamp.
    async fn touch(&self) {
        let _ = self
            .store
            .put_counter(&stats_key("last_updated"), Utc::now().timestamp())
            .await;
    }
}

fn block_key(id: &str) -> String {
    format!("{BLOCK_PREFIX}:{id}")
}

fn used_key(id: &str) -> String {
    format!("{USED_PREFIX}:{id}")
}

fn stats_key(field: &str) -> String {
    format!("{STATS_PREFIX}:{field}")
}

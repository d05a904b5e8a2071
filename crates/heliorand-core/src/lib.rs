//! # heliorand-core
//!
//! **The sun is a public randomness beacon.**
//!
//! `heliorand-core` turns full-disk solar imagery into cryptographically
//! whitened random bytes. Frames flow through a staged pipeline, with each
//! stage decoupled by the shared pool:
//!
//! ```text
//! FrameSource → NoiseExtractor → Conditioner → EntropyValidator → EntropyPool
//!                                                                    ▲
//!                                                              RefillDriver
//! ```
//!
//! - [`extract::NoiseExtractor`] reduces one frame to a long raw noise stream
//!   (per-channel Laplacian, FFT high-pass, Sobel gradients, random windows).
//! - [`conditioning::Conditioner`] whitens chunk by chunk with alternating
//!   BLAKE3/SHA-256 rounds, a timestamp + nonce mix, and a 32-byte chain, then
//!   expands each digest to a fixed-size block.
//! - [`validation::EntropyValidator`] gates every block behind five
//!   statistical tests.
//! - [`pool::EntropyPool`] stores accepted blocks with a TTL and serves each
//!   byte at most once via an atomic per-block claim in the backing
//!   [`store::KeyValueStore`].
//!
//! The upstream imagery is public — security rests on the conditioner's
//! whitening and the pool's at-most-once delivery, never on source secrecy.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use heliorand_core::{Config, EntropyPool, MemoryStore};
//!
//! # async fn demo() {
//! let cfg = Config::default();
//! let store = Arc::new(MemoryStore::new());
//! let pool = EntropyPool::new(store, cfg.entropy_ttl(), cfg.max_bytes_per_request);
//!
//! pool.add(&[0u8; 4096], 0.93, serde_json::json!({"source": "demo"}))
//!     .await
//!     .unwrap();
//! let bytes = pool.take(256).await.unwrap();
//! assert_eq!(bytes.len(), 256);
//! # }
//! ```

pub mod archive;
pub mod conditioning;
pub mod config;
pub mod extract;
pub mod fetch;
pub mod frame;
pub mod pool;
pub mod store;
pub mod tasks;
pub mod validation;

pub use archive::{DirArchive, FrameArchive};
pub use conditioning::{Conditioner, mix_sources, quick_shannon};
pub use config::Config;
pub use extract::NoiseExtractor;
pub use fetch::SdoFrameSource;
pub use frame::{Frame, FrameSource, StaticFrameSource};
pub use pool::{BlockEnvelope, EntropyPool, PoolError, PoolHealth, PoolStats};
pub use store::{KeyValueStore, MemoryStore, StoreError};
pub use tasks::{FetchDriver, RefillDriver, shutdown_channel};
pub use validation::{EntropyValidator, Verdict};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

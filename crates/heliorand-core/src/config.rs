//! Flat runtime configuration.
//!
//! Every knob is an explicit field with a spec'd default; `from_env` overlays
//! `HELIORAND_*` environment variables on top of the defaults. There is no
//! name-based option dispatch.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime configuration for the entropy pipeline and its drivers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Conditioner output size in bytes.
    pub block_size: usize,
    /// Block time-to-live in the pool, seconds.
    pub entropy_ttl_secs: u64,
    /// Refill trigger: produce blocks while available bytes are below this.
    pub low_water_mark: u64,
    /// Minimum Shannon entropy (bits/byte) for a block to enter the pool.
    pub min_shannon: f64,
    /// Minimum weighted quality score for a block to enter the pool.
    pub min_quality: f64,
    /// Frame fetch cadence, seconds.
    pub fetch_interval_secs: u64,
    /// Refill loop wakeup cadence, seconds.
    pub refill_interval_secs: u64,
    /// How many fetched frames the source retains.
    pub max_stored_frames: usize,
    /// FFT high-pass band: fraction of the spectrum removed around DC.
    pub cutoff_ratio: f64,
    /// Number of random windows sampled per frame.
    pub region_count: usize,
    /// Side length of each sampled window, pixels.
    pub region_size: u32,
    /// Upper bound on bytes per dispense request.
    pub max_bytes_per_request: usize,
    /// Refill policy: drain every cached frame per wakeup instead of
    /// stopping after the first frame that yields accepted blocks.
    pub exhaust_frames: bool,

    /// HTTP bind host.
    pub api_host: String,
    /// HTTP bind port.
    pub api_port: u16,

    /// Base URL for the latest-image endpoints.
    pub sdo_base_url: String,
    /// Image filenames fetched from the base URL each cycle.
    pub sdo_images: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size: 4096,
            entropy_ttl_secs: 3600,
            low_water_mark: 1024 * 1024,
            min_shannon: 7.8,
            min_quality: 0.75,
            fetch_interval_secs: 300,
            refill_interval_secs: 30,
            max_stored_frames: 10,
            cutoff_ratio: 0.8,
            region_count: 5,
            region_size: 32,
            max_bytes_per_request: 10240,
            exhaust_frames: false,
            api_host: "0.0.0.0".to_string(),
            api_port: 8000,
            sdo_base_url: "https://sdo.gsfc.nasa.gov/assets/img/latest".to_string(),
            sdo_images: vec![
                "latest_1024_0193.jpg".to_string(),
                "latest_1024_0304.jpg".to_string(),
                "latest_1024_0171.jpg".to_string(),
                "latest_1024_0211.jpg".to_string(),
            ],
        }
    }
}

impl Config {
    /// Defaults overlaid with any `HELIORAND_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning rather than failing
    /// startup.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        overlay(&mut cfg.block_size, "HELIORAND_BLOCK_SIZE");
        overlay(&mut cfg.entropy_ttl_secs, "HELIORAND_ENTROPY_TTL");
        overlay(&mut cfg.low_water_mark, "HELIORAND_LOW_WATER_MARK");
        overlay(&mut cfg.min_shannon, "HELIORAND_MIN_SHANNON");
        overlay(&mut cfg.min_quality, "HELIORAND_MIN_QUALITY");
        overlay(&mut cfg.fetch_interval_secs, "HELIORAND_FETCH_INTERVAL");
        overlay(&mut cfg.refill_interval_secs, "HELIORAND_REFILL_INTERVAL");
        overlay(&mut cfg.max_stored_frames, "HELIORAND_MAX_STORED_FRAMES");
        overlay(&mut cfg.cutoff_ratio, "HELIORAND_CUTOFF_RATIO");
        overlay(&mut cfg.region_count, "HELIORAND_REGION_COUNT");
        overlay(&mut cfg.region_size, "HELIORAND_REGION_SIZE");
        overlay(
            &mut cfg.max_bytes_per_request,
            "HELIORAND_MAX_BYTES_PER_REQUEST",
        );
        overlay(&mut cfg.exhaust_frames, "HELIORAND_EXHAUST_FRAMES");
        overlay(&mut cfg.api_host, "HELIORAND_API_HOST");
        overlay(&mut cfg.api_port, "HELIORAND_API_PORT");
        overlay(&mut cfg.sdo_base_url, "HELIORAND_SDO_BASE_URL");
        if let Ok(list) = std::env::var("HELIORAND_SDO_IMAGES") {
            let images: Vec<String> = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if !images.is_empty() {
                cfg.sdo_images = images;
            }
        }
        cfg
    }

    /// Block TTL as a [`Duration`].
    pub fn entropy_ttl(&self) -> Duration {
        Duration::from_secs(self.entropy_ttl_secs)
    }

    /// Fetch cadence as a [`Duration`].
    pub fn fetch_interval(&self) -> Duration {
        Duration::from_secs(self.fetch_interval_secs)
    }

    /// Refill cadence as a [`Duration`].
    pub fn refill_interval(&self) -> Duration {
        Duration::from_secs(self.refill_interval_secs)
    }
}

fn overlay<T: std::str::FromStr>(slot: &mut T, var: &str) {
    if let Ok(raw) = std::env::var(var) {
        match raw.parse() {
            Ok(v) => *slot = v,
            Err(_) => log::warn!("ignoring unparseable {var}={raw}"),
        }
    }
}

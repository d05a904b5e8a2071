//! Frame type and the pluggable frame source contract.
//!
//! A [`Frame`] is one encoded image as fetched from an upstream imagery
//! service, tagged with its origin and acquisition time. Sources own their
//! rate limiting and retention; the pipeline only ever asks for "what is
//! cached right now" or "go fetch the latest set".

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// One raw image frame plus acquisition metadata.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Encoded image bytes (JPEG/PNG) exactly as fetched.
    pub bytes: Vec<u8>,
    /// Origin tag, e.g. `nasa_sdo/0193`.
    pub source_tag: String,
    /// Acquisition timestamp (UTC).
    pub fetched_at: DateTime<Utc>,
}

impl Frame {
    /// Build a frame stamped with the current time.
    pub fn new(bytes: Vec<u8>, source_tag: impl Into<String>) -> Self {
        Self {
            bytes,
            source_tag: source_tag.into(),
            fetched_at: Utc::now(),
        }
    }
}

/// Error from a frame source fetch cycle.
#[derive(Debug, Error)]
pub enum FrameSourceError {
    /// The upstream endpoint could not be reached or returned an error.
    #[error("frame fetch failed: {0}")]
    Fetch(String),
}

/// A provider of image frames.
///
/// Implementations fetch on demand and keep a bounded cache of recent frames
/// so the refill loop can re-process imagery between fetch cycles.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Fetch the latest frame set from upstream and add it to the cache.
    ///
    /// Returns the newly fetched frames. Partial failure is fine: fetch what
    /// can be fetched, skip the rest.
    async fn fetch_latest(&self) -> Result<Vec<Frame>, FrameSourceError>;

    /// Currently cached frames, newest first.
    async fn stored(&self) -> Vec<Frame>;
}

/// Fixed in-memory frame source for tests and offline runs.
pub struct StaticFrameSource {
    frames: Vec<Frame>,
}

impl StaticFrameSource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self { frames }
    }
}

#[async_trait]
impl FrameSource for StaticFrameSource {
    async fn fetch_latest(&self) -> Result<Vec<Frame>, FrameSourceError> {
        Ok(self.frames.clone())
    }

    async fn stored(&self) -> Vec<Frame> {
        self.frames.clone()
    }
}

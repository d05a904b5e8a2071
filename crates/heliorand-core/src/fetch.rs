//! NASA SDO frame fetcher.
//!
//! Pulls the configured latest-image endpoints over HTTPS and keeps a small
//! in-memory cache of recent frames so the refill loop can re-process imagery
//! between fetch cycles. Retention is the source's own responsibility: the
//! cache is trimmed to `max_stored` on every insert.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::frame::{Frame, FrameSource, FrameSourceError};

/// Per-request timeout for image downloads.
const FETCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Frame source backed by the SDO latest-image endpoints.
pub struct SdoFrameSource {
    client: reqwest::Client,
    base_url: String,
    images: Vec<String>,
    max_stored: usize,
    cache: Mutex<VecDeque<Frame>>,
}

impl SdoFrameSource {
    pub fn new(cfg: &Config) -> Result<Self, FrameSourceError> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| FrameSourceError::Fetch(e.to_string()))?;
        Ok(Self {
            client,
            base_url: cfg.sdo_base_url.trim_end_matches('/').to_string(),
            images: cfg.sdo_images.clone(),
            max_stored: cfg.max_stored_frames,
            cache: Mutex::new(VecDeque::new()),
        })
    }

    async fn fetch_one(&self, name: &str) -> Result<Frame, FrameSourceError> {
        let url = format!("{}/{}", self.base_url, name);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| FrameSourceError::Fetch(format!("{url}: {e}")))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| FrameSourceError::Fetch(format!("{url}: {e}")))?;

        log::info!("fetched {} ({} bytes)", url, bytes.len());
        Ok(Frame::new(bytes.to_vec(), format!("nasa_sdo/{name}")))
    }

    async fn remember(&self, frames: &[Frame]) {
        let mut cache = self.cache.lock().await;
        for frame in frames {
            cache.push_front(frame.clone());
        }
        cache.truncate(self.max_stored);
    }
}

#[async_trait]
impl FrameSource for SdoFrameSource {
    /// Fetch every configured image, skipping individual failures.
    ///
    /// Only a fully failed cycle is an error; partial results are cached and
    /// returned.
    async fn fetch_latest(&self) -> Result<Vec<Frame>, FrameSourceError> {
        let mut fetched = Vec::new();
        for name in &self.images {
            match self.fetch_one(name).await {
                Ok(frame) => fetched.push(frame),
                Err(err) => log::warn!("{err}"),
            }
        }
        if fetched.is_empty() {
            return Err(FrameSourceError::Fetch(format!(
                "all {} image fetches failed",
                self.images.len()
            )));
        }
        self.remember(&fetched).await;
        Ok(fetched)
    }

    async fn stored(&self) -> Vec<Frame> {
        self.cache.lock().await.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_with_retention(max_stored: usize) -> SdoFrameSource {
        let cfg = Config {
            max_stored_frames: max_stored,
            ..Config::default()
        };
        SdoFrameSource::new(&cfg).unwrap()
    }

    #[tokio::test]
    async fn cache_keeps_newest_frames_first() {
        let src = source_with_retention(10);
        src.remember(&[Frame::new(vec![1], "t/a")]).await;
        src.remember(&[Frame::new(vec![2], "t/b")]).await;

        let stored = src.stored().await;
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].source_tag, "t/b");
        assert_eq!(stored[1].source_tag, "t/a");
    }

    #[tokio::test]
    async fn cache_is_trimmed_to_retention() {
        let src = source_with_retention(3);
        for i in 0..6u8 {
            src.remember(&[Frame::new(vec![i], format!("t/{i}"))]).await;
        }
        let stored = src.stored().await;
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[0].source_tag, "t/5");
    }
}

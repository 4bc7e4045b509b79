//! Marker icon loading
//!
//! Icons are fetched best-effort: callers log a failure and render the
//! marker with the default icon.

use crate::core::config::AnnotationConfig;
use crate::core::constants::DEFAULT_USER_AGENT;
use crate::{BridgeError, Result};
use async_trait::async_trait;
use lru::LruCache;
use once_cell::sync::Lazy;
use reqwest::Client;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared client used when a configured client cannot be built
static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .user_agent(DEFAULT_USER_AGENT)
        .build()
        .unwrap_or_else(|e| {
            log::warn!("falling back to a default HTTP client: {}", e);
            Client::new()
        })
});

/// A downloaded marker icon
#[derive(Debug, Clone, PartialEq)]
pub struct Icon {
    pub url: String,
    pub bytes: Arc<Vec<u8>>,
    /// Pixel size, when the image could be decoded
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl Icon {
    pub fn from_bytes(url: impl Into<String>, bytes: Vec<u8>) -> Result<Self> {
        let (width, height) = dimensions(&bytes)?;
        Ok(Self {
            url: url.into(),
            bytes: Arc::new(bytes),
            width,
            height,
        })
    }
}

#[cfg(feature = "icons")]
fn dimensions(bytes: &[u8]) -> Result<(Option<u32>, Option<u32>)> {
    use image::GenericImageView;

    let img = image::load_from_memory(bytes).map_err(|e| BridgeError::Image(e.to_string()))?;
    let (width, height) = img.dimensions();
    Ok((Some(width), Some(height)))
}

#[cfg(not(feature = "icons"))]
fn dimensions(bytes: &[u8]) -> Result<(Option<u32>, Option<u32>)> {
    if bytes.is_empty() {
        return Err(BridgeError::Image("icon is empty".into()));
    }
    Ok((None, None))
}

#[async_trait]
pub trait IconFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Icon>;
}

/// Fetches icons over HTTP and keeps the most recent ones in memory
pub struct HttpIconFetcher {
    client: Client,
    timeout: Duration,
    cache: Mutex<LruCache<String, Icon>>,
}

impl HttpIconFetcher {
    pub fn new(config: &AnnotationConfig) -> Self {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()
            .unwrap_or_else(|e| {
                log::warn!("icon client with custom user agent unavailable: {}", e);
                HTTP_CLIENT.clone()
            });
        let capacity = NonZeroUsize::new(config.icon_cache_capacity).unwrap_or(NonZeroUsize::MIN);

        Self {
            client,
            timeout: config.icon_fetch_timeout(),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn cached(&self, url: &str) -> Option<Icon> {
        self.lock_cache().get(url).cloned()
    }

    /// Seeds the cache, e.g. with icons bundled by the host
    pub fn insert_cached(&self, icon: Icon) {
        self.lock_cache().put(icon.url.clone(), icon);
    }

    pub fn cache_len(&self) -> usize {
        self.lock_cache().len()
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, LruCache<String, Icon>> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).timeout(self.timeout).send().await?;
        if !response.status().is_success() {
            return Err(BridgeError::Image(format!(
                "HTTP {} for {}",
                response.status(),
                url
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

impl Default for HttpIconFetcher {
    fn default() -> Self {
        Self::new(&AnnotationConfig::default())
    }
}

#[async_trait]
impl IconFetcher for HttpIconFetcher {
    async fn fetch(&self, url: &str) -> Result<Icon> {
        if let Some(icon) = self.cached(url) {
            log::trace!("icon cache hit for {}", url);
            return Ok(icon);
        }

        let bytes = self.download(url).await?;
        let icon = Icon::from_bytes(url, bytes)?;
        log::debug!("fetched icon {} ({} bytes)", url, icon.bytes.len());
        self.insert_cached(icon.clone());
        Ok(icon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "icons")]
    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = image::DynamicImage::ImageRgba8(image::RgbaImage::new(width, height));
        let mut bytes = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageOutputFormat::Png,
        )
        .unwrap();
        bytes
    }

    #[cfg(feature = "icons")]
    #[test]
    fn test_icon_dimensions() {
        let icon = Icon::from_bytes("mem://pin", png(3, 2)).unwrap();
        assert_eq!(icon.width, Some(3));
        assert_eq!(icon.height, Some(2));

        assert!(matches!(
            Icon::from_bytes("mem://junk", b"not an image".to_vec()),
            Err(BridgeError::Image(_))
        ));
    }

    #[tokio::test]
    async fn test_cached_icon_is_served_without_network() {
        let fetcher = HttpIconFetcher::new(&AnnotationConfig {
            icon_cache_capacity: 1,
            ..AnnotationConfig::default()
        });
        let icon = Icon {
            url: "http://127.0.0.1:9/pin.png".into(),
            bytes: Arc::new(vec![1, 2, 3]),
            width: None,
            height: None,
        };
        fetcher.insert_cached(icon.clone());

        assert_eq!(fetcher.fetch(&icon.url).await.unwrap(), icon);

        // Capacity 1 evicts the older entry
        fetcher.insert_cached(Icon {
            url: "other".into(),
            ..icon.clone()
        });
        assert_eq!(fetcher.cache_len(), 1);
        assert!(fetcher.cached(&icon.url).is_none());
    }

    #[tokio::test]
    async fn test_unreachable_url_fails() {
        let fetcher = HttpIconFetcher::new(&AnnotationConfig {
            icon_fetch_timeout_ms: 200,
            ..AnnotationConfig::default()
        });
        assert!(fetcher.fetch("http://127.0.0.1:9/pin.png").await.is_err());
    }
}

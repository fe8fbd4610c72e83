//! Remote media preload
//!
//! Remote sources are downloaded once into a cache directory and reused by
//! every later load of the same URL. Files are keyed by the URL's last path
//! segment.

use futures::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::{AudioError, AudioSource};

/// Download cache for remote audio
#[derive(Clone)]
pub struct PreloadCache {
    dir: PathBuf,
    client: Client,
}

impl PreloadCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            client: Client::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Local file for a remote URL
    pub fn cached_path(&self, url: &str) -> PathBuf {
        let without_query = url.split(['?', '#']).next().unwrap_or(url);
        let segment = without_query
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default();
        let name = urlencoding::decode(segment)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| segment.to_string());
        let name = if name.is_empty() || name.contains("..") {
            urlencoding::encode(url).into_owned()
        } else {
            name
        };
        self.dir.join(name)
    }

    /// Local path for a source, downloading it first if it is remote
    pub async fn resolve(&self, source: &AudioSource) -> Result<PathBuf, AudioError> {
        if let Some(path) = source.local_path() {
            tokio::fs::metadata(&path).await?;
            return Ok(path);
        }

        let cached = self.cached_path(source.as_str());
        if tokio::fs::try_exists(&cached).await.unwrap_or(false) {
            tracing::debug!("Using cached {:?} for {}", cached, source);
            return Ok(cached);
        }

        self.download(source.as_str(), &cached).await?;
        Ok(cached)
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), AudioError> {
        let download_err = |message: String| AudioError::Download {
            url: url.to_string(),
            message,
        };

        tokio::fs::create_dir_all(&self.dir).await?;
        tracing::info!("Downloading {} to {:?}", url, dest);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| download_err(e.to_string()))?;

        // Write to a scratch file first so a failed download never looks cached
        let partial = dest.with_extension("partial");
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut body = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| download_err(e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&partial, dest).await?;
        tracing::debug!("Downloaded {} bytes from {}", written, url);
        Ok(())
    }
}

impl Default for PreloadCache {
    fn default() -> Self {
        let dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("framecast")
            .join("media");
        Self::new(dir)
    }
}

//! Bottle fetching.
//!
//! Downloads are cached by file name under the configured cache directory
//! and are only reused when their SHA-256 still matches the index. Partial
//! downloads live in `<file>.<random>.incomplete` until verified.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, instrument};

use crate::error::VerifyError;
use crate::platform::PlatformTag;
use crate::types::{Artifact, BottleFile, Target};

/// Anonymous bearer token accepted by ghcr.io for public blobs.
const GHCR_ANONYMOUS_TOKEN: &str = "QQ==";

const GHCR_HOST: &str = "ghcr.io";

/// Result of asking for a bottle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The bottle is available locally.
    Fetched(Artifact),
    /// No bottle is published for the platform.
    NotPublished,
}

/// Fetch collaborator.
#[async_trait]
pub trait BottleFetcher: Send + Sync {
    /// Obtain the bottle for `target` on `tag`.
    ///
    /// With `force`, any cached copy is discarded first.
    async fn fetch(
        &self,
        target: &Target,
        tag: &PlatformTag,
        force: bool,
    ) -> Result<FetchOutcome, VerifyError>;
}

/// Fetcher downloading bottles over HTTPS into a local cache.
pub struct HttpBottleFetcher {
    client: Client,
    cache_dir: PathBuf,
    anonymous_bearer_hosts: Vec<String>,
}

impl HttpBottleFetcher {
    /// Create a fetcher caching into `cache_dir`.
    pub fn new(cache_dir: impl Into<PathBuf>, timeout: Duration) -> Result<Self, VerifyError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(format!("bottle-verify/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| VerifyError::FetchError {
                message: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            cache_dir: cache_dir.into(),
            anonymous_bearer_hosts: vec![GHCR_HOST.to_string()],
        })
    }

    /// Cache location for a bottle.
    pub fn cache_path(&self, target: &Target, tag_key: &str) -> PathBuf {
        self.cache_dir.join(bottle_filename(target, tag_key))
    }

    /// Also send the anonymous registry token to `host`.
    #[must_use]
    pub fn with_anonymous_bearer_host(mut self, host: impl Into<String>) -> Self {
        self.anonymous_bearer_hosts.push(host.into());
        self
    }

    fn wants_anonymous_bearer(&self, url: &str) -> bool {
        reqwest::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_owned))
            .map_or(false, |host| self.anonymous_bearer_hosts.iter().any(|h| *h == host))
    }

    /// Download into a uniquely named partial file, then move it onto `dest`.
    ///
    /// Units sharing a bottle (tags falling back to `all`) may download the
    /// same `dest` concurrently. The partial file is removed on every error
    /// path.
    async fn download(&self, bottle: &BottleFile, dest: &Path) -> Result<String, VerifyError> {
        let prefix = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (file, partial) = tempfile::Builder::new()
            .prefix(&format!("{}.", prefix))
            .suffix(".incomplete")
            .tempfile_in(&self.cache_dir)?
            .into_parts();

        let mut request = self.client.get(&bottle.url);
        if self.wants_anonymous_bearer(&bottle.url) {
            request = request.bearer_auth(GHCR_ANONYMOUS_TOKEN);
        }

        let mut response = request.send().await.map_err(|e| VerifyError::FetchError {
            message: format!("Download of {} failed: {}", bottle.url, e),
        })?;
        if !response.status().is_success() {
            return Err(VerifyError::FetchError {
                message: format!("Download HTTP error: {} ({})", response.status(), bottle.url),
            });
        }

        let mut file = tokio::fs::File::from_std(file);
        let mut hasher = Sha256::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| VerifyError::FetchError {
            message: format!("Download of {} interrupted: {}", bottle.url, e),
        })? {
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        let actual = hex::encode(hasher.finalize());
        if !actual.eq_ignore_ascii_case(&bottle.sha256) {
            return Err(VerifyError::FetchError {
                message: format!(
                    "SHA-256 mismatch for {}: expected {}, got {}",
                    bottle.url, bottle.sha256, actual
                ),
            });
        }

        partial.persist(dest).map_err(|e| e.error)?;
        Ok(actual)
    }
}

#[async_trait]
impl BottleFetcher for HttpBottleFetcher {
    #[instrument(skip(self, target), fields(formula = %target.name, tag = %tag))]
    async fn fetch(
        &self,
        target: &Target,
        tag: &PlatformTag,
        force: bool,
    ) -> Result<FetchOutcome, VerifyError> {
        let Some((tag_key, bottle)) = target.bottle_for(tag) else {
            return Ok(FetchOutcome::NotPublished);
        };
        let path = self.cache_path(target, tag_key);

        if tokio::fs::try_exists(&path).await? {
            if force {
                debug!(path = %path.display(), "Removing cached bottle");
                // A unit sharing this bottle may have removed it already.
                match tokio::fs::remove_file(&path).await {
                    Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
                    _ => {},
                }
            } else {
                let cached = sha256_file(&path).await?;
                if cached.eq_ignore_ascii_case(&bottle.sha256) {
                    debug!(path = %path.display(), "Using cached bottle");
                    return Ok(FetchOutcome::Fetched(Artifact {
                        path,
                        sha256: cached,
                    }));
                }
                debug!(path = %path.display(), "Cached bottle is stale, re-fetching");
            }
        }

        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let sha256 = self.download(bottle, &path).await?;
        info!(path = %path.display(), "Fetched bottle");
        Ok(FetchOutcome::Fetched(Artifact { path, sha256 }))
    }
}

/// File name of a cached bottle: `<name>--<version>.<tag>.bottle[.<rebuild>].tar.gz`.
pub fn bottle_filename(target: &Target, tag_key: &str) -> String {
    let rebuild = if target.rebuild > 0 {
        format!(".{}", target.rebuild)
    } else {
        String::new()
    };
    format!(
        "{}--{}.{}.bottle{}.tar.gz",
        target.name, target.version, tag_key, rebuild
    )
}

/// SHA-256 of a file, lowercase hex.
pub async fn sha256_file(path: &Path) -> Result<String, VerifyError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

use genie_core::{FetchError, PageFetcher};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod advice;
pub mod catalog;
pub mod extract;
pub mod llm;
pub mod ollama;
pub mod openai_compat;
pub mod reply;
pub mod research;

pub(crate) fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub(crate) fn env_bool(key: &str) -> bool {
    matches!(
        env(key).unwrap_or_default().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub(crate) fn env_u64(key: &str) -> Option<u64> {
    env(key).and_then(|s| s.parse::<u64>().ok())
}

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(15);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_BYTES: usize = 4_000_000;

// Some sites reject requests without a browser-like user agent.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("cache io: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache meta: {0}")]
    Meta(#[from] serde_json::Error),
    #[error("cache task failed: {0}")]
    Join(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPage {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct CacheMeta {
    fetched_at_epoch_s: u64,
    url: String,
    status: u16,
    #[serde(default)]
    content_type: Option<String>,
}

fn now_epoch_s() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs()
}

/// Page bodies on disk, keyed by the SHA-256 of the URL.
#[derive(Debug, Clone)]
pub struct FsCache {
    root: PathBuf,
    ttl_s: Option<u64>,
}

impl FsCache {
    pub fn new(root: PathBuf, ttl_s: Option<u64>) -> Self {
        Self { root, ttl_s }
    }

    fn key(url: &str) -> String {
        let mut h = Sha256::new();
        h.update(b"genie-fetch-v1\n");
        h.update(url.as_bytes());
        hex::encode(h.finalize())
    }

    fn paths(&self, key: &str) -> (PathBuf, PathBuf) {
        let dir = self.root.join(&key[0..2]);
        (dir.join(format!("{key}.json")), dir.join(format!("{key}.html")))
    }

    /// A fresh entry for `url`, or `None` on a miss or when it is older than the TTL.
    pub fn get(&self, url: &str) -> Result<Option<CachedPage>, CacheError> {
        let (meta_p, body_p) = self.paths(&Self::key(url));
        if !meta_p.exists() || !body_p.exists() {
            return Ok(None);
        }
        let meta: CacheMeta = serde_json::from_slice(&fs::read(&meta_p)?)?;
        if let Some(ttl_s) = self.ttl_s {
            if now_epoch_s().saturating_sub(meta.fetched_at_epoch_s) > ttl_s {
                return Ok(None);
            }
        }
        let body = fs::read_to_string(&body_p)?;
        Ok(Some(CachedPage {
            status: meta.status,
            content_type: meta.content_type,
            body,
        }))
    }

    pub fn put(&self, url: &str, page: &CachedPage) -> Result<(), CacheError> {
        let (meta_p, body_p) = self.paths(&Self::key(url));
        if let Some(parent) = meta_p.parent() {
            fs::create_dir_all(parent)?;
        }
        let meta = CacheMeta {
            fetched_at_epoch_s: now_epoch_s(),
            url: url.to_string(),
            status: page.status,
            content_type: page.content_type.clone(),
        };
        fs::write(&body_p, page.body.as_bytes())?;
        fs::write(&meta_p, serde_json::to_vec(&meta)?)?;
        Ok(())
    }
}

/// HTTP(S) page fetcher backed by reqwest. One GET per call, no retries.
#[derive(Debug, Clone)]
pub struct LocalFetcher {
    client: reqwest::Client,
    cache: Option<FsCache>,
    max_bytes: usize,
}

impl LocalFetcher {
    pub fn new(cache: Option<FsCache>, timeout: Duration) -> genie_core::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .timeout(timeout)
            .build()
            .map_err(|e| genie_core::Error::Fetch(e.to_string()))?;
        Ok(Self {
            client,
            cache,
            max_bytes: DEFAULT_MAX_BYTES,
        })
    }

    /// `GENIE_FETCH_TIMEOUT_MS`, `GENIE_FETCH_MAX_BYTES`, `GENIE_CACHE_DIR` and
    /// `GENIE_CACHE_TTL_S`; the cache is off unless a directory is set.
    pub fn from_env() -> genie_core::Result<Self> {
        let timeout = env_u64("GENIE_FETCH_TIMEOUT_MS")
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_FETCH_TIMEOUT);
        let cache = env("GENIE_CACHE_DIR")
            .map(|d| FsCache::new(PathBuf::from(d), env_u64("GENIE_CACHE_TTL_S")));
        let mut fetcher = Self::new(cache, timeout)?;
        if let Some(n) = env_u64("GENIE_FETCH_MAX_BYTES") {
            fetcher = fetcher.with_max_bytes(n as usize);
        }
        Ok(fetcher)
    }

    pub fn with_cache(mut self, cache: FsCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes.max(1);
        self
    }

    pub fn cache(&self) -> Option<&FsCache> {
        self.cache.as_ref()
    }

    async fn cache_get(&self, url: &str) -> Option<CachedPage> {
        let cache = self.cache.clone()?;
        let key = url.to_string();
        let r = tokio::task::spawn_blocking(move || cache.get(&key))
            .await
            .map_err(|e| CacheError::Join(e.to_string()))
            .and_then(|r| r);
        match r {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!(url, error = %e, "cache read failed; fetching from network");
                None
            }
        }
    }

    async fn cache_put(&self, url: &str, page: &CachedPage) {
        let Some(cache) = self.cache.clone() else {
            return;
        };
        let key = url.to_string();
        let page = page.clone();
        let r = tokio::task::spawn_blocking(move || cache.put(&key, &page))
            .await
            .map_err(|e| CacheError::Join(e.to_string()))
            .and_then(|r| r);
        if let Err(e) = r {
            tracing::warn!(url, error = %e, "cache write failed");
        }
    }
}

fn classify(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else if let Some(status) = e.status() {
        FetchError::Http {
            url: url.to_string(),
            status: status.as_u16(),
        }
    } else {
        FetchError::Other {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl PageFetcher for LocalFetcher {
    async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
        let parsed = url::Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme {}", parsed.scheme()),
            });
        }

        if let Some(hit) = self.cache_get(url).await {
            tracing::debug!(url, "page served from cache");
            return Ok(hit.body);
        }

        let t0 = std::time::Instant::now();
        let resp = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| classify(url, e))?;
        let status = resp.status();
        if !status.is_success() {
            tracing::warn!(url, status = status.as_u16(), "page fetch returned an error status");
            return Err(FetchError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let mut bytes = Vec::new();
        let mut stream = resp.bytes_stream();
        use futures_util::StreamExt;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| classify(url, e))?;
            if bytes.len().saturating_add(chunk.len()) > self.max_bytes {
                let can_take = self.max_bytes.saturating_sub(bytes.len());
                bytes.extend_from_slice(&chunk[..can_take]);
                tracing::debug!(url, max_bytes = self.max_bytes, "page body truncated");
                break;
            }
            bytes.extend_from_slice(&chunk);
        }
        let body = String::from_utf8_lossy(&bytes).into_owned();
        tracing::info!(
            url,
            bytes = bytes.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "page fetched"
        );

        self.cache_put(
            url,
            &CachedPage {
                status: status.as_u16(),
                content_type,
                body: body.clone(),
            },
        )
        .await;
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::header, http::StatusCode, routing::get, Router};
    use proptest::prelude::*;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn app(hits: Arc<AtomicUsize>) -> Router {
        Router::new()
            .route(
                "/page",
                get(move || {
                    let hits = hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        (
                            [(header::CONTENT_TYPE, "text/html")],
                            "<html><body><p>Visa fees rose in 2024.</p></body></html>",
                        )
                    }
                }),
            )
            .route("/missing", get(|| async { (StatusCode::NOT_FOUND, "nope") }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_millis(800)).await;
                    "late"
                }),
            )
    }

    #[tokio::test]
    async fn fetches_page_body() {
        let addr = serve(app(Arc::new(AtomicUsize::new(0)))).await;
        let f = LocalFetcher::new(None, Duration::from_secs(2)).unwrap();
        let body = f.fetch_page(&format!("http://{addr}/page")).await.unwrap();
        assert!(body.contains("Visa fees rose"));
    }

    #[tokio::test]
    async fn body_is_capped_at_max_bytes() {
        let addr = serve(app(Arc::new(AtomicUsize::new(0)))).await;
        let f = LocalFetcher::new(None, Duration::from_secs(2))
            .unwrap()
            .with_max_bytes(10);
        let body = f.fetch_page(&format!("http://{addr}/page")).await.unwrap();
        assert_eq!(body, "<html><bod");
    }

    #[tokio::test]
    async fn non_success_status_is_http_error() {
        let addr = serve(app(Arc::new(AtomicUsize::new(0)))).await;
        let f = LocalFetcher::new(None, Duration::from_secs(2)).unwrap();
        let url = format!("http://{addr}/missing");
        let err = f.fetch_page(&url).await.unwrap_err();
        assert_eq!(err, FetchError::Http { url, status: 404 });
        assert!(err.to_string().contains("Status: 404"));
    }

    #[tokio::test]
    async fn slow_page_times_out() {
        let addr = serve(app(Arc::new(AtomicUsize::new(0)))).await;
        let f = LocalFetcher::new(None, Duration::from_millis(150)).unwrap();
        let url = format!("http://{addr}/slow");
        let err = f.fetch_page(&url).await.unwrap_err();
        assert_eq!(err, FetchError::Timeout { url });
        assert!(err.to_string().contains("timeout"));
    }

    #[tokio::test]
    async fn invalid_urls_are_rejected_before_any_request() {
        let f = LocalFetcher::new(None, Duration::from_secs(1)).unwrap();
        assert!(matches!(
            f.fetch_page("not a url").await,
            Err(FetchError::InvalidUrl { .. })
        ));
        assert!(matches!(
            f.fetch_page("ftp://example.com/file").await,
            Err(FetchError::InvalidUrl { .. })
        ));
    }

    #[tokio::test]
    async fn cache_serves_repeat_fetches() {
        let hits = Arc::new(AtomicUsize::new(0));
        let addr = serve(app(hits.clone())).await;
        let tmp = tempfile::tempdir().unwrap();
        let cache = FsCache::new(tmp.path().to_path_buf(), Some(60));
        let f = LocalFetcher::new(Some(cache), Duration::from_secs(2)).unwrap();
        let url = format!("http://{addr}/page");

        let a = f.fetch_page(&url).await.unwrap();
        let b = f.fetch_page(&url).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cache_entries_expire_after_ttl() {
        let tmp = tempfile::tempdir().unwrap();
        let page = CachedPage {
            status: 200,
            content_type: Some("text/html".to_string()),
            body: "<p>hi</p>".to_string(),
        };
        let fresh = FsCache::new(tmp.path().to_path_buf(), Some(3600));
        fresh.put("https://example.org/", &page).unwrap();
        assert_eq!(fresh.get("https://example.org/").unwrap(), Some(page));
        assert_eq!(fresh.get("https://example.org/other").unwrap(), None);

        // Rewrite the meta with an old timestamp.
        let key = FsCache::key("https://example.org/");
        let (meta_p, _) = fresh.paths(&key);
        let meta = CacheMeta {
            fetched_at_epoch_s: now_epoch_s() - 7200,
            url: "https://example.org/".to_string(),
            status: 200,
            content_type: None,
        };
        std::fs::write(&meta_p, serde_json::to_vec(&meta).unwrap()).unwrap();
        assert_eq!(fresh.get("https://example.org/").unwrap(), None);
        let no_ttl = FsCache::new(tmp.path().to_path_buf(), None);
        assert!(no_ttl.get("https://example.org/").unwrap().is_some());
    }

    proptest! {
        #[test]
        fn cache_key_is_hex_and_never_panics(url in ".{0,200}") {
            let k = FsCache::key(&url);
            prop_assert_eq!(k.len(), 64);
            prop_assert!(k.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }
}

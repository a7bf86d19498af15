//! Channel data fetchers

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Produces the current value of a channel
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self) -> Result<Value, FetchError>;
}

/// Errors a fetcher can report. The hub logs these and skips the tick.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Fetcher backed by an async closure
pub struct FnFetcher<F>(F);

#[async_trait]
impl<F, Fut> Fetcher for FnFetcher<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
{
    async fn fetch(&self) -> Result<Value, FetchError> {
        (self.0)().await
    }
}

/// Wrap an async closure as a shared fetcher
pub fn fetcher_fn<F, Fut>(f: F) -> Arc<dyn Fetcher>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
{
    Arc::new(FnFetcher(f))
}

/// Always returns the same value
pub struct StaticFetcher {
    value: Value,
}

impl StaticFetcher {
    pub fn new(value: Value) -> Self {
        Self { value }
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self) -> Result<Value, FetchError> {
        Ok(self.value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_fn_fetcher_invokes_closure_each_time() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let fetcher = fetcher_fn(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(json!({ "n": n })) }
        });

        assert_eq!(fetcher.fetch().await.unwrap(), json!({ "n": 0 }));
        assert_eq!(fetcher.fetch().await.unwrap(), json!({ "n": 1 }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_error_propagates() {
        let fetcher = fetcher_fn(|| async { Err(FetchError::Unavailable("docker".into())) });
        let err = fetcher.fetch().await.unwrap_err();
        assert_eq!(err.to_string(), "Source unavailable: docker");
    }
}

//! Resource Loader
//!
//! Subresource loads through the fetch pipeline. Requests carry the
//! target's own origin, so they never trigger CORS.

use crate::agent::{ReqwestAgent, Transport};
use crate::config::FetchConfig;
use crate::dispatch::Fetcher;
use crate::request::FetchRequest;
use crate::response::{FetchResult, Outcome};
use crate::FetchError;

/// Load errors
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Load aborted")]
    Aborted,
}

/// Load resources by URL
pub struct ResourceLoader<T: Transport = ReqwestAgent> {
    fetcher: Fetcher<T>,
}

impl ResourceLoader<ReqwestAgent> {
    pub fn new(config: FetchConfig) -> Self {
        Self {
            fetcher: Fetcher::new(config),
        }
    }
}

impl Default for ResourceLoader<ReqwestAgent> {
    fn default() -> Self {
        Self::new(FetchConfig::default())
    }
}

impl<T: Transport> ResourceLoader<T> {
    /// Loader sharing an existing fetcher's transport and cookies
    pub fn with_fetcher(fetcher: Fetcher<T>) -> Self {
        Self { fetcher }
    }

    pub fn fetcher(&self) -> &Fetcher<T> {
        &self.fetcher
    }

    /// Fetch a URL with GET and return the body of a 2xx response
    pub async fn load(&self, url: &str) -> Result<Vec<u8>, LoadError> {
        let result = self.request(FetchRequest::parse("GET", url)?).await?;
        if !(200..300).contains(&result.status) {
            return Err(LoadError::Status(result.status));
        }
        Ok(result.into_body().unwrap_or_default())
    }

    /// Run a request to completion, whatever its status
    pub async fn request(&self, request: FetchRequest) -> Result<FetchResult, LoadError> {
        tracing::info!("LOAD {} {}", request.method, request.url);

        let result = self.fetcher.dispatch(request).finish().await;
        match &result.outcome {
            Outcome::Body(_) => Ok(result),
            Outcome::Error(e) => Err(LoadError::Fetch(e.clone())),
            Outcome::Aborted => Err(LoadError::Aborted),
        }
    }
}

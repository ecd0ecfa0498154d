pub mod http_fetcher;

use async_trait::async_trait;

use crate::app::FetchError;

pub use http_fetcher::HttpFetcher;

/// Raw page retrieved from a tracked URL.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects; relative links resolve against this.
    pub final_url: String,
    pub body: String,
}

#[async_trait]
pub trait Fetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;
}

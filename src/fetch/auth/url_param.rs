use async_trait::async_trait;

use crate::fetch::client::HttpClient;

/// An [`HttpClient`] wrapper that appends an API key as a URL query parameter,
/// e.g. `?key=...` for feeds that take the key in the URL.
pub struct UrlParam<C> {
    pub inner: C,
    pub param_name: String,
    pub key: String,
}

#[async_trait]
impl<C: HttpClient> HttpClient for UrlParam<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        req.url_mut()
            .query_pairs_mut()
            .append_pair(&self.param_name, &self.key);
        self.inner.execute(req).await
    }
}

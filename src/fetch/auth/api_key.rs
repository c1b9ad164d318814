use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};

use crate::fetch::client::HttpClient;

/// An [`HttpClient`] wrapper that sends an API key in an HTTP header.
///
/// The header is validated once at construction.
pub struct ApiKey<C> {
    inner: C,
    header_name: HeaderName,
    value: HeaderValue,
}

impl<C> ApiKey<C> {
    /// # Errors
    ///
    /// Fails when `header_name` or `key` are not valid header text.
    pub fn new(inner: C, header_name: &str, key: &str) -> Result<Self> {
        let header_name = HeaderName::from_bytes(header_name.as_bytes())
            .with_context(|| format!("invalid header name {header_name:?}"))?;
        let value = HeaderValue::from_str(key).context("API key is not a valid header value")?;
        Ok(Self {
            inner,
            header_name,
            value,
        })
    }

    /// Sends `Authorization: Bearer <key>`.
    ///
    /// # Errors
    ///
    /// Fails when `key` is not valid header text.
    pub fn bearer(inner: C, key: &str) -> Result<Self> {
        Self::new(inner, "Authorization", &format!("Bearer {key}"))
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for ApiKey<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        req.headers_mut()
            .insert(self.header_name.clone(), self.value.clone());
        self.inner.execute(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_header_name() {
        assert!(ApiKey::new((), "bad header", "k").is_err());
    }

    #[test]
    fn test_rejects_invalid_key() {
        assert!(ApiKey::new((), "x-api-key", "line\nbreak").is_err());
    }

    #[test]
    fn test_bearer_value() {
        let auth = ApiKey::bearer((), "abc").unwrap();
        assert_eq!(auth.header_name, "authorization");
        assert_eq!(auth.value, "Bearer abc");
    }
}

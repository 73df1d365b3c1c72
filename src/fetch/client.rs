//! HTTP client wrapper for page loads, form postbacks and binary fetches.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, instrument};
use url::Url;

use super::error::FetchError;
use super::{FetchedBody, ResourceFetcher};
use crate::user_agent;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default timeout for page loads, listings and postbacks (1 minute).
pub const PAGE_TIMEOUT_SECS: u64 = 60;

/// Default timeout for binary fetches (5 minutes for large map scans).
pub const BINARY_TIMEOUT_SECS: u64 = 300;

/// Timeouts applied to every request issued by [`HttpClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    /// TCP/TLS connect timeout.
    pub connect: Duration,
    /// Whole-request timeout for pages, listings and postbacks.
    pub page: Duration,
    /// Whole-request timeout for binary resources.
    pub binary: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            page: Duration::from_secs(PAGE_TIMEOUT_SECS),
            binary: Duration::from_secs(BINARY_TIMEOUT_SECS),
        }
    }
}

/// A page body together with the URL it was finally served from.
#[derive(Debug, Clone)]
pub struct PageResponse {
    /// URL after redirects; relative links in `body` resolve against it.
    pub url: String,
    /// Decoded response text.
    pub body: String,
}

/// HTTP client shared by every strategy.
///
/// Cookies are kept for the lifetime of the client, which is what carries the
/// server-side session of the cascading form between postbacks. Cloning is
/// cheap and shares the connection pool and cookie store.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    timeouts: HttpTimeouts,
}

impl HttpClient {
    /// Creates a client with the given timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::ClientBuild`] if the TLS backend or resolver
    /// cannot be initialized.
    pub fn try_new(timeouts: HttpTimeouts) -> Result<Self, FetchError> {
        let client = Client::builder()
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.binary)
            .gzip(true)
            .cookie_store(true)
            .user_agent(user_agent::default_user_agent())
            .build()
            .map_err(|source| FetchError::ClientBuild { source })?;
        Ok(Self { client, timeouts })
    }

    /// Configured timeouts.
    #[must_use]
    pub fn timeouts(&self) -> HttpTimeouts {
        self.timeouts
    }

    /// GETs a page and returns its text.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on transport failure, timeout or non-2xx status.
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    pub async fn get_text(&self, url: &str) -> Result<PageResponse, FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::invalid_url(url))?;
        let response = self
            .client
            .get(parsed)
            .timeout(self.timeouts.page)
            .send()
            .await
            .map_err(|e| FetchError::network(url, e))?;
        read_page(url, response).await
    }

    /// POSTs an `application/x-www-form-urlencoded` body and returns the
    /// resulting page.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on transport failure, timeout or non-2xx status.
    #[instrument(level = "debug", skip(self, fields), fields(url = %url, fields = fields.len()))]
    pub async fn post_form(
        &self,
        url: &str,
        fields: &[(String, String)],
    ) -> Result<PageResponse, FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::invalid_url(url))?;
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .finish();
        let response = self
            .client
            .post(parsed)
            .timeout(self.timeouts.page)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| FetchError::network(url, e))?;
        read_page(url, response).await
    }

    /// GETs a binary resource and returns its body as a stream.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on transport failure, timeout or non-2xx status.
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    pub async fn get_stream(&self, url: &str) -> Result<FetchedBody, FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::invalid_url(url))?;
        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| FetchError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::http_status(url, status.as_u16()));
        }

        let content_length = response.content_length();
        debug!(status = status.as_u16(), ?content_length, "binary response received");

        let owned_url = url.to_string();
        let stream = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| FetchError::network(owned_url.clone(), e)));
        Ok(FetchedBody {
            status: status.as_u16(),
            content_length,
            stream: Box::pin(stream),
        })
    }
}

#[async_trait]
impl ResourceFetcher for HttpClient {
    async fn fetch_binary(&self, url: &str) -> Result<FetchedBody, FetchError> {
        self.get_stream(url).await
    }
}

async fn read_page(url: &str, response: reqwest::Response) -> Result<PageResponse, FetchError> {
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::http_status(url, status.as_u16()));
    }
    let final_url = response.url().to_string();
    let body = response
        .text()
        .await
        .map_err(|e| FetchError::network(url, e))?;
    debug!(status = status.as_u16(), bytes = body.len(), "page received");
    Ok(PageResponse {
        url: final_url,
        body,
    })
}

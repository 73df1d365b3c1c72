//! Stateless fetching: the shared HTTP client, binary resource streams and
//! directory listings.
//!
//! # Example
//!
//! ```no_run
//! use mapcrawl_core::fetch::{HttpClient, HttpTimeouts, ResourceFetcher};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::try_new(HttpTimeouts::default())?;
//! let listing = client.list_directory("https://maps.example.gov.bd/maps/").await?;
//! for dir in &listing.subdirs {
//!     println!("dir: {dir}");
//! }
//! let body = client.fetch_binary("https://maps.example.gov.bd/maps/a/b/c/map.jpg").await?;
//! println!("status {}", body.status);
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod listing;

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;

pub use client::{
    BINARY_TIMEOUT_SECS, CONNECT_TIMEOUT_SECS, HttpClient, HttpTimeouts, PAGE_TIMEOUT_SECS,
    PageResponse,
};
pub use error::FetchError;
pub use listing::{Listing, extract_hrefs, partition_listing};

/// Stream of body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, FetchError>> + Send>>;

/// A successful (2xx) binary response.
pub struct FetchedBody {
    /// HTTP status code.
    pub status: u16,
    /// Declared length, when the server sent one.
    pub content_length: Option<u64>,
    /// Body chunks.
    pub stream: ByteStream,
}

impl FetchedBody {
    /// Wraps an in-memory body.
    #[must_use]
    pub fn from_bytes(status: u16, bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            status,
            content_length: Some(bytes.len() as u64),
            stream: Box::pin(futures_util::stream::iter([Ok::<_, FetchError>(bytes)])),
        }
    }
}

impl fmt::Debug for FetchedBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchedBody")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Fetches binary resources by URL.
///
/// Implementations only return bodies for 2xx responses; everything else is a
/// [`FetchError`].
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// Requests `url` and returns its body stream.
    async fn fetch_binary(&self, url: &str) -> Result<FetchedBody, FetchError>;
}

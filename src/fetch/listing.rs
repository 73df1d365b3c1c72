//! Directory listing parsing.
//!
//! Listings are plain HTML index pages (Apache/nginx/IIS autoindex). Entries
//! are anchors; directories are recognized by a trailing `/` in the resolved
//! path.

use scraper::{Html, Selector};
use tracing::{debug, instrument, trace};
use url::Url;

use super::client::HttpClient;
use super::error::FetchError;

/// Entries of one listing page, resolved to absolute URLs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    /// Sub-directory URLs (path ends with `/`), in page order, de-duplicated.
    pub subdirs: Vec<Url>,
    /// File URLs, in page order, de-duplicated.
    pub files: Vec<Url>,
}

impl Listing {
    /// True when the page listed nothing usable.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subdirs.is_empty() && self.files.is_empty()
    }
}

impl HttpClient {
    /// Fetches and parses the directory listing at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if the page cannot be fetched or its URL is invalid.
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    pub async fn list_directory(&self, url: &str) -> Result<Listing, FetchError> {
        let page = self.get_text(url).await?;
        let base = Url::parse(&page.url).map_err(|_| FetchError::invalid_url(&page.url))?;
        let hrefs = extract_hrefs(&page.body);
        let listing = partition_listing(&base, &hrefs);
        debug!(
            subdirs = listing.subdirs.len(),
            files = listing.files.len(),
            "listing parsed"
        );
        Ok(listing)
    }
}

/// Returns the `href` of every anchor in `html`, in document order.
#[must_use]
pub fn extract_hrefs(html: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    document
        .select(&selector)
        .filter_map(|anchor| anchor.value().attr("href"))
        .map(str::to_string)
        .collect()
}

/// Resolves `hrefs` against `base` and splits them into directories and files.
///
/// Hrefs that do not resolve, point at another origin, or carry a
/// non-navigational scheme are dropped. Query strings and fragments are
/// removed, so autoindex sort links (`?C=N;O=D`) collapse onto the listing
/// itself and are dropped with it.
#[must_use]
pub fn partition_listing(base: &Url, hrefs: &[String]) -> Listing {
    let mut listing = Listing::default();
    for href in hrefs {
        let Ok(mut resolved) = base.join(href.trim()) else {
            trace!(href = %href, "unresolvable listing href");
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") || resolved.origin() != base.origin() {
            trace!(href = %href, "listing href outside origin");
            continue;
        }
        resolved.set_query(None);
        resolved.set_fragment(None);
        if resolved.path() == base.path() {
            continue;
        }
        let bucket = if resolved.path().ends_with('/') {
            &mut listing.subdirs
        } else {
            &mut listing.files
        };
        if !bucket.contains(&resolved) {
            bucket.push(resolved);
        }
    }
    listing
}

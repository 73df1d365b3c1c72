//! Navigational sessions over the cascading-selection form.
//!
//! A [`NavigationSession`] owns the remote UI state of one crawl: the loaded
//! page, the current selections and the cookies that tie them together on the
//! server. The cascade traverser is its sole owner and closes it on every exit
//! path.
//!
//! Two implementations exist:
//! - [`PostbackSession`] replays the form's postbacks over plain HTTP and
//!   reads the returned markup. It needs nothing but the shared client.
//! - `BrowserSession` (cargo feature `browser`) drives a headless Chromium for
//!   pages whose dependent lists are populated by script.

#[cfg(feature = "browser")]
mod browser;
mod postback;

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;

use crate::fetch::{FetchError, ResourceFetcher};

#[cfg(feature = "browser")]
pub use browser::BrowserSession;
pub use postback::PostbackSession;

/// Errors raised by a navigation session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A page load, postback or binary fetch failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// An operation needed a loaded page but none was loaded.
    #[error("no page loaded")]
    NoPage,

    /// The page does not contain the element an operation targets.
    #[error("element {element} not found on {url}")]
    MissingElement {
        /// Element id, name or description.
        element: String,
        /// Page the element was looked up on.
        url: String,
    },

    /// A selection named a value the field does not offer.
    #[error("option {value} not offered by {field} on {url}")]
    UnknownOption {
        /// Field id or name.
        field: String,
        /// Requested option value.
        value: String,
        /// Page the field was found on.
        url: String,
    },

    /// A triggered update did not finish in time.
    #[error("{field} did not settle within {waited:?}")]
    SettleTimeout {
        /// Field whose change was being awaited.
        field: String,
        /// How long the session waited.
        waited: Duration,
    },

    /// The automation backend failed (launch, protocol, script evaluation).
    #[error("browser error: {reason}")]
    Browser {
        /// Backend error text.
        reason: String,
    },
}

impl SessionError {
    /// Creates a missing element error.
    pub fn missing_element(element: impl Into<String>, url: impl Into<String>) -> Self {
        Self::MissingElement {
            element: element.into(),
            url: url.into(),
        }
    }

    /// Creates a browser backend error.
    pub fn browser(reason: impl Into<String>) -> Self {
        Self::Browser {
            reason: reason.into(),
        }
    }
}

/// One entry of a `<select>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectOption {
    /// Submitted value.
    pub value: String,
    /// Visible label.
    pub text: String,
}

impl SelectOption {
    /// Creates an option.
    #[must_use]
    pub fn new(value: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            text: text.into(),
        }
    }

    /// True for "please choose" entries that do not denote a taxonomy node.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        let value = self.value.trim();
        let text = self.text.trim().to_lowercase();
        value.is_empty()
            || value == "0"
            || value == "-1"
            || text.starts_with("--")
            || text.starts_with("select")
    }
}

/// Timing policy for awaiting a triggered update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlePolicy {
    /// Upper bound on waiting for one update.
    pub timeout: Duration,
    /// Interval between quiescence checks.
    pub poll: Duration,
}

impl Default for SettlePolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            poll: Duration::from_millis(200),
        }
    }
}

/// A persistent, stateful view of the remote form.
///
/// `select_option` returns only once the update it triggered has settled, so
/// queries issued afterwards observe the repopulated state.
#[async_trait]
pub trait NavigationSession: ResourceFetcher {
    /// Loads `url`, replacing any current page and selection state.
    async fn load_page(&mut self, url: &str) -> Result<(), SessionError>;

    /// Selects `value` in the field identified by `field` (id or name) and
    /// waits for the resulting update to settle.
    async fn select_option(&mut self, field: &str, value: &str) -> Result<(), SessionError>;

    /// Lists the options of the field identified by `field`, in page order.
    async fn query_options(&self, field: &str) -> Result<Vec<SelectOption>, SessionError>;

    /// Returns the `href` of the element with id `element_id`, if it exists
    /// and has one.
    async fn query_link(&self, element_id: &str) -> Result<Option<String>, SessionError>;

    /// Scans the current markup for resource links matching `pattern`.
    async fn derived_links(&self, pattern: &Regex) -> Result<Vec<String>, SessionError>;

    /// URL of the current page; relative links resolve against it.
    fn current_url(&self) -> Option<String>;

    /// The session as a plain resource fetcher for binary downloads.
    fn fetcher(&self) -> &dyn ResourceFetcher;

    /// Releases the session and everything it holds.
    async fn close(self: Box<Self>) -> Result<(), SessionError>;
}

/// Returns every match of `pattern` in `markup`.
///
/// When the pattern has capture groups, the first group that participated in
/// the match is returned instead of the whole match. The `&#39;`, `&quot;`
/// and `&amp;` entities are decoded.
#[must_use]
pub fn scan_links(markup: &str, pattern: &Regex) -> Vec<String> {
    let use_group = pattern.captures_len() > 1;
    pattern
        .captures_iter(markup)
        .filter_map(|captures| {
            if use_group {
                captures.iter().skip(1).flatten().next()
            } else {
                captures.get(0)
            }
        })
        .map(|m| {
            m.as_str()
                .replace("&#39;", "'")
                .replace("&quot;", "\"")
                .replace("&amp;", "&")
        })
        .filter(|link| !link.is_empty())
        .collect()
}

/// Default pattern for resource links under `resource_root`.
///
/// Matches quoted `href`/`src` attribute values, so a value may contain
/// spaces or the other quote character. A trailing query or fragment is left
/// out of the captured link.
///
/// # Errors
///
/// Returns the regex error if the root produces an unparsable pattern, which
/// cannot happen because the root is escaped.
pub fn default_link_pattern(resource_root: &str) -> Result<Regex, regex::Error> {
    let root = regex::escape(resource_root.trim_matches('/'));
    let ext = r"\.(?:jpe?g|png|gif|pdf|tiff?)";
    Regex::new(&format!(
        r#"(?i)\b(?:href|src)\s*=\s*(?:"([^"]*?{root}/[^"]*?{ext})(?:[?#][^"]*)?"|'([^']*?{root}/[^']*?{ext})(?:[?#][^']*)?')"#
    ))
}

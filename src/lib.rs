//! Mapcrawl Core Library
//!
//! Resumable crawl-and-download engine for map archives organized by
//! division, district and upazila.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`href`] - Normalization of discovered hrefs against the resource root
//! - [`classify`] - Leaf classification into primary and secondary maps
//! - [`naming`] - Deterministic local names and download tasks
//! - [`fetch`] - HTTP client, binary fetcher trait and directory listings
//! - [`session`] - Stateful navigation of the cascading selection form
//! - [`sink`] - Idempotent, resumable writes to disk
//! - [`crawl`] - Cascade and directory-tree traversal strategies
//! - [`config`] - `config.toml` loading and validation

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod classify;
pub mod config;
pub mod crawl;
pub mod fetch;
pub mod href;
pub mod naming;
pub mod session;
pub mod sink;
mod user_agent;

// Re-export commonly used types
pub use classify::{Category, Classification, Classifier, ResourceCandidate};
pub use config::{ConfigError, CrawlConfig, SessionKind, Strategy};
pub use crawl::{
    CancelToken, CascadeSettings, CascadeTraverser, CrawlContext, CrawlError, CrawlStats,
    CrawlSummary, PacingPolicy, Traverser, TreeSettings, TreeTraverser,
};
pub use fetch::{FetchError, FetchedBody, HttpClient, HttpTimeouts, ResourceFetcher};
pub use href::normalize_href;
pub use naming::{DownloadTask, NamingScheme, TraversalPath};
pub use session::{NavigationSession, SelectOption, SessionError};
pub use sink::{DownloadSink, SinkError, SinkOutcome};

//! Directory-listing traversal.
//!
//! Descends a static autoindex tree from a root URL. Files in a directory are
//! delivered before its subdirectories are entered. Sibling subtrees may run
//! concurrently up to the configured worker count; with one worker the walk
//! is strictly depth-first and sequential.

use std::collections::BTreeSet;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::stream::{self, StreamExt};
use tokio::sync::Semaphore;
use tracing::{error, info, instrument, trace};
use url::Url;

use super::{CrawlContext, CrawlError, CrawlSummary, Traverser};
use crate::fetch::{FetchError, HttpClient, Listing};
use crate::href::{is_directory, normalize_href, path_depth};
use crate::naming::{TraversalPath, extension_of};

/// Largest supported worker count.
pub const MAX_WORKERS: usize = 16;

/// Where the tree lives and which files count as leaves.
#[derive(Debug, Clone)]
pub struct TreeSettings {
    /// Root directory URL, always ending in `/`.
    pub root_url: Url,
    /// Minimum root-relative depth of a downloadable file.
    pub min_depth: usize,
    /// Allowed extensions, lowercase, without the dot.
    pub extensions: BTreeSet<String>,
    /// Sibling subtrees processed concurrently.
    pub workers: usize,
}

impl TreeSettings {
    /// Builds settings, normalizing the root URL and extension set.
    #[must_use]
    pub fn new(
        mut root_url: Url,
        min_depth: usize,
        extensions: impl IntoIterator<Item = impl AsRef<str>>,
        workers: usize,
    ) -> Self {
        if !root_url.path().ends_with('/') {
            let path = format!("{}/", root_url.path());
            root_url.set_path(&path);
        }
        root_url.set_query(None);
        root_url.set_fragment(None);
        Self {
            root_url,
            min_depth,
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
            workers: workers.clamp(1, MAX_WORKERS),
        }
    }

    /// Root path segments, used as the normalization prefix.
    fn root_prefix(&self) -> String {
        self.root_url.path().trim_matches('/').to_string()
    }
}

/// Walks a directory-listing tree.
pub struct TreeTraverser {
    client: HttpClient,
    settings: TreeSettings,
    permits: Semaphore,
}

impl TreeTraverser {
    /// Creates a traverser that lists and downloads through `client`.
    #[must_use]
    pub fn new(client: HttpClient, settings: TreeSettings) -> Self {
        let permits = Semaphore::new(settings.workers);
        Self {
            client,
            settings,
            permits,
        }
    }

    /// Lists `url` after waiting for the host's pacing slot.
    async fn list(&self, url: &Url, ctx: &CrawlContext) -> Option<Result<Listing, FetchError>> {
        if !ctx.pacer.acquire(url.as_str(), &ctx.cancel).await {
            ctx.stats.mark_interrupted();
            return None;
        }
        Some(self.client.list_directory(url.as_str()).await)
    }

    fn visit<'a>(
        &'a self,
        ctx: &'a CrawlContext,
        dir: Directory,
        listing: Option<Listing>,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if ctx.should_stop() {
                return;
            }

            let children = {
                let Ok(_permit) = self.permits.acquire().await else {
                    return;
                };
                let listing = match listing {
                    Some(listing) => listing,
                    None => match self.list(&dir.url, ctx).await {
                        None => return,
                        Some(Ok(listing)) => listing,
                        Some(Err(e)) => {
                            error!(
                                url = %dir.url,
                                path = %dir.path,
                                error = %e,
                                "directory listing failed; skipping branch"
                            );
                            ctx.stats.record_branch_skipped();
                            return;
                        }
                    },
                };
                info!(
                    path = %dir.path,
                    files = listing.files.len(),
                    subdirs = listing.subdirs.len(),
                    "entering directory"
                );
                self.deliver_files(ctx, &dir, &listing.files).await;
                self.child_directories(&dir, &listing.subdirs)
            };

            stream::iter(children)
                .map(|child| self.visit(ctx, child, None))
                .buffered(self.settings.workers)
                .collect::<Vec<()>>()
                .await;
        })
    }

    async fn deliver_files(&self, ctx: &CrawlContext, dir: &Directory, files: &[Url]) {
        let root = self.settings.root_prefix();
        let candidates: Vec<String> = files
            .iter()
            .filter_map(|file| normalize_href(file.as_str(), &root))
            .filter(|path| self.accepts_file(&dir.relative, path))
            .collect();
        if candidates.is_empty() {
            return;
        }

        let classification = ctx.classifier.categorize(&candidates);
        let tasks = ctx
            .naming
            .plan_tasks(&dir.path, &classification, &self.settings.root_url);
        for task in &tasks {
            if ctx.should_stop() {
                return;
            }
            ctx.deliver(task, &self.client).await;
        }
    }

    /// Whether the normalized file `path` lies directly in the tree below
    /// `prefix` and passes the depth and extension filters.
    fn accepts_file(&self, prefix: &str, path: &str) -> bool {
        let inside = path
            .strip_prefix(prefix)
            .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'));
        if is_directory(path) || !inside {
            trace!(path, prefix, "file outside current directory");
            return false;
        }
        let depth = path_depth(path);
        if depth < self.settings.min_depth {
            trace!(path, depth, "file above minimum depth");
            return false;
        }
        let extension = extension_of(path);
        if !self.settings.extensions.contains(&extension) {
            trace!(path, extension = %extension, "extension not allowed");
            return false;
        }
        true
    }

    fn child_directories(&self, dir: &Directory, subdirs: &[Url]) -> Vec<Directory> {
        let root = self.settings.root_prefix();
        let mut seen = BTreeSet::new();
        subdirs
            .iter()
            .filter_map(|url| {
                let relative = normalize_href(url.as_str(), &root)?;
                let direct_child = relative
                    .strip_prefix(dir.relative.as_str())
                    .and_then(|rest| rest.strip_suffix('/'))
                    .is_some_and(|segment| !segment.is_empty() && !segment.contains('/'));
                if !direct_child {
                    trace!(url = %url, current = %dir.relative, "not a strict subdirectory");
                    return None;
                }
                if !seen.insert(relative.clone()) {
                    return None;
                }
                let label = relative
                    .trim_end_matches('/')
                    .rsplit('/')
                    .next()
                    .map(decode_segment)
                    .unwrap_or_default();
                Some(Directory {
                    url: url.clone(),
                    path: dir.path.child(label),
                    relative,
                })
            })
            .collect()
    }
}

#[async_trait]
impl Traverser for TreeTraverser {
    #[instrument(skip_all, name = "tree")]
    async fn run(self: Box<Self>, ctx: &CrawlContext) -> Result<CrawlSummary, CrawlError> {
        let root_url = self.settings.root_url.clone();
        info!(
            root = %root_url,
            min_depth = self.settings.min_depth,
            workers = self.settings.workers,
            "starting tree traversal"
        );

        let listing = match self.list(&root_url, ctx).await {
            None => return Ok(ctx.stats.summary()),
            Some(Ok(listing)) => listing,
            Some(Err(e)) => return Err(CrawlError::discovery(root_url.as_str(), e.to_string())),
        };
        let root = Directory {
            url: root_url,
            path: TraversalPath::root(),
            relative: String::new(),
        };
        if listing.files.is_empty() && self.child_directories(&root, &listing.subdirs).is_empty() {
            return Err(CrawlError::discovery(root.url.as_str(), "root listing is empty"));
        }
        self.visit(ctx, root, Some(listing)).await;
        Ok(ctx.stats.summary())
    }
}

/// One directory of the walk.
struct Directory {
    url: Url,
    /// Decoded segment labels from the root.
    path: TraversalPath,
    /// Root-relative normalized path, empty for the root, else ending in `/`.
    relative: String,
}

fn decode_segment(segment: &str) -> String {
    urlencoding::decode(segment).map_or_else(|_| segment.to_string(), |d| d.into_owned())
}

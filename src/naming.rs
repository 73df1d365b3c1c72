//! Deterministic local naming and download task construction.
//!
//! Local files are named `{slug}__{slug}_{category}_{ordinal}.{ext}` under a
//! per-category directory of the output root, e.g.
//! `maps/upazila/dhaka__savar_upazila_1.jpg`. Names depend only on the
//! traversal path, category and ordinal, so reruns produce the same paths and
//! the sink can skip work that already exists.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::warn;
use url::Url;

use crate::classify::{Category, Classification, ResourceCandidate};

/// Separator between slugged traversal path segments.
pub const SEGMENT_SEPARATOR: &str = "__";

/// Extension used when a remote path has none.
pub const FALLBACK_EXTENSION: &str = "bin";

const MAX_EXTENSION_LEN: usize = 12;

/// Ordered taxonomy labels from the root to the current leaf.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TraversalPath(Vec<String>);

impl TraversalPath {
    /// Creates an empty path (the taxonomy root).
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Returns a new path extended by `label`.
    #[must_use]
    pub fn child(&self, label: impl Into<String>) -> Self {
        let mut labels = self.0.clone();
        labels.push(label.into());
        Self(labels)
    }

    /// Labels from root to leaf.
    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.0
    }

    /// The leaf label, if any.
    #[must_use]
    pub fn leaf(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Number of labels in the path.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the taxonomy root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Slugs every label and joins them with [`SEGMENT_SEPARATOR`].
    #[must_use]
    pub fn slug(&self) -> String {
        self.0
            .iter()
            .map(|label| slugify(label))
            .collect::<Vec<_>>()
            .join(SEGMENT_SEPARATOR)
    }
}

impl<S: Into<String>> FromIterator<S> for TraversalPath {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for TraversalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" / "))
    }
}

/// A fully resolved unit of work: fetch `remote_url`, write `local_path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    remote_url: String,
    local_path: PathBuf,
}

impl DownloadTask {
    /// Creates a task.
    #[must_use]
    pub fn new(remote_url: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            remote_url: remote_url.into(),
            local_path: local_path.into(),
        }
    }

    /// Absolute URL of the resource.
    #[must_use]
    pub fn remote_url(&self) -> &str {
        &self.remote_url
    }

    /// Destination path on the local filesystem.
    #[must_use]
    pub fn local_path(&self) -> &Path {
        &self.local_path
    }
}

/// Maps categories to output directories and builds local file names.
#[derive(Debug, Clone)]
pub struct NamingScheme {
    output_root: PathBuf,
    primary_dir: String,
    secondary_dir: String,
}

impl NamingScheme {
    /// Creates a naming scheme rooted at `output_root`.
    #[must_use]
    pub fn new(
        output_root: impl Into<PathBuf>,
        primary_dir: impl Into<String>,
        secondary_dir: impl Into<String>,
    ) -> Self {
        Self {
            output_root: output_root.into(),
            primary_dir: primary_dir.into(),
            secondary_dir: secondary_dir.into(),
        }
    }

    /// Output root directory.
    #[must_use]
    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Directory name (and file name label) for `category`.
    #[must_use]
    pub fn category_label(&self, category: Category) -> &str {
        match category {
            Category::Secondary => &self.secondary_dir,
            Category::Primary | Category::Unclassified => &self.primary_dir,
        }
    }

    /// File name for the `ordinal`-th (1-based) resource of `category` at `leaf`.
    #[must_use]
    pub fn file_name(
        &self,
        leaf: &TraversalPath,
        category: Category,
        ordinal: usize,
        extension: &str,
    ) -> String {
        format!(
            "{}_{}_{ordinal}.{extension}",
            leaf.slug(),
            self.category_label(category)
        )
    }

    /// Full local path for the `ordinal`-th resource of `category` at `leaf`.
    #[must_use]
    pub fn local_path(
        &self,
        leaf: &TraversalPath,
        category: Category,
        ordinal: usize,
        extension: &str,
    ) -> PathBuf {
        self.output_root
            .join(self.category_label(category))
            .join(self.file_name(leaf, category, ordinal, extension))
    }

    /// Builds one task per classified candidate, numbering each category from 1.
    ///
    /// `resource_base` is the URL of the resource root directory; candidate
    /// paths are resolved against it.
    #[must_use]
    pub fn plan_tasks(
        &self,
        leaf: &TraversalPath,
        classification: &Classification,
        resource_base: &Url,
    ) -> Vec<DownloadTask> {
        let mut tasks = Vec::with_capacity(classification.len());
        for (category, candidates) in [
            (Category::Primary, &classification.primary),
            (Category::Secondary, &classification.secondary),
        ] {
            tasks.extend(candidates.iter().enumerate().filter_map(|(index, candidate)| {
                self.plan_task(leaf, category, index + 1, candidate, resource_base)
            }));
        }
        tasks
    }

    fn plan_task(
        &self,
        leaf: &TraversalPath,
        category: Category,
        ordinal: usize,
        candidate: &ResourceCandidate,
        resource_base: &Url,
    ) -> Option<DownloadTask> {
        let Some(remote_url) = resource_url(resource_base, &candidate.remote_path) else {
            warn!(
                base = %resource_base,
                path = %candidate.remote_path,
                "cannot resolve resource URL; skipping candidate"
            );
            return None;
        };
        let extension = extension_of(&candidate.remote_path);
        Some(DownloadTask::new(
            remote_url,
            self.local_path(leaf, category, ordinal, &extension),
        ))
    }
}

/// Resolves a root-relative path against the resource root URL.
#[must_use]
pub fn resource_url(resource_base: &Url, remote_path: &str) -> Option<String> {
    resource_base
        .join(&format!("./{remote_path}"))
        .ok()
        .map(String::from)
}

/// Lowercase slug of a taxonomy label: alphanumeric runs joined by `-`.
///
/// ```
/// use mapcrawl_core::naming::slugify;
///
/// assert_eq!(slugify("Cox's Bazar Sadar"), "cox-s-bazar-sadar");
/// assert_eq!(slugify("  Dhaka  "), "dhaka");
/// ```
#[must_use]
pub fn slugify(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut pending_dash = false;
    for ch in label.chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if out.is_empty() {
        "unnamed".to_string()
    } else {
        out
    }
}

/// Lowercased extension of the last path segment, or [`FALLBACK_EXTENSION`].
#[must_use]
pub fn extension_of(remote_path: &str) -> String {
    let last_segment = remote_path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    last_segment
        .rfind('.')
        .map(|dot| &last_segment[dot + 1..])
        .filter(|ext| {
            !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map_or_else(|| FALLBACK_EXTENSION.to_string(), str::to_ascii_lowercase)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::classify::Classifier;

    fn scheme() -> NamingScheme {
        NamingScheme::new("maps", "upazila", "road")
    }

    #[test]
    fn test_slugify_collapses_and_trims_separators() {
        assert_eq!(slugify("Dhaka"), "dhaka");
        assert_eq!(slugify("Savar"), "savar");
        assert_eq!(slugify("Cox's  Bazar--Sadar "), "cox-s-bazar-sadar");
        assert_eq!(slugify("--Select--"), "select");
        assert_eq!(slugify("  "), "unnamed");
    }

    #[test]
    fn test_file_name_matches_layout() {
        let leaf: TraversalPath = ["Dhaka", "Savar"].into_iter().collect();
        assert_eq!(
            scheme().file_name(&leaf, Category::Primary, 1, "jpg"),
            "dhaka__savar_upazila_1.jpg"
        );
        assert_eq!(
            scheme().file_name(&leaf, Category::Secondary, 2, "pdf"),
            "dhaka__savar_road_2.pdf"
        );
    }

    #[test]
    fn test_local_path_is_deterministic() {
        let leaf = TraversalPath::root().child("Dhaka").child("Savar");
        let first = scheme().local_path(&leaf, Category::Secondary, 1, "jpg");
        let second = scheme().local_path(&leaf.clone(), Category::Secondary, 1, "jpg");
        assert_eq!(first, second);
        assert_eq!(first, PathBuf::from("maps/road/dhaka__savar_road_1.jpg"));
    }

    #[test]
    fn test_unclassified_lands_in_primary_dir() {
        assert_eq!(scheme().category_label(Category::Unclassified), "upazila");
    }

    #[test]
    fn test_plan_tasks_numbers_each_category_from_one() {
        let classifier = Classifier::default();
        let classification = classifier.classify(
            &[
                "x/savar_road.jpg",
                "x/savar.jpg",
                "x/savar_2.PNG",
                "x/savar_road_b.jpg",
            ],
            "savar",
        );
        let base = Url::parse("http://maps.example.gov.bd/UploadedDocument/").unwrap();
        let leaf = TraversalPath::root().child("Dhaka").child("Savar");

        let tasks = scheme().plan_tasks(&leaf, &classification, &base);

        let summary: Vec<(&str, PathBuf)> = tasks
            .iter()
            .map(|t| (t.remote_url(), t.local_path().to_path_buf()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (
                    "http://maps.example.gov.bd/UploadedDocument/x/savar.jpg",
                    PathBuf::from("maps/upazila/dhaka__savar_upazila_1.jpg"),
                ),
                (
                    "http://maps.example.gov.bd/UploadedDocument/x/savar_2.PNG",
                    PathBuf::from("maps/upazila/dhaka__savar_upazila_2.png"),
                ),
                (
                    "http://maps.example.gov.bd/UploadedDocument/x/savar_road.jpg",
                    PathBuf::from("maps/road/dhaka__savar_road_1.jpg"),
                ),
                (
                    "http://maps.example.gov.bd/UploadedDocument/x/savar_road_b.jpg",
                    PathBuf::from("maps/road/dhaka__savar_road_2.jpg"),
                ),
            ]
        );
    }

    #[test]
    fn test_resource_url_treats_colon_segments_as_paths() {
        let base = Url::parse("http://host/root/").unwrap();
        assert_eq!(
            resource_url(&base, "c:map.jpg").as_deref(),
            Some("http://host/root/c:map.jpg")
        );
        assert_eq!(
            resource_url(&base, "a b/map.jpg").as_deref(),
            Some("http://host/root/a%20b/map.jpg")
        );
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("x/savar.JPG"), "jpg");
        assert_eq!(extension_of("x/savar.tar.gz"), "gz");
        assert_eq!(extension_of("x/savar"), "bin");
        assert_eq!(extension_of("x.dir/savar"), "bin");
        assert_eq!(extension_of("x/savar."), "bin");
        assert_eq!(extension_of("x/savar.j%20g"), "bin");
    }

    #[test]
    fn test_traversal_path_display_and_leaf() {
        let path = TraversalPath::root().child("Dhaka").child("Savar");
        assert_eq!(path.to_string(), "Dhaka / Savar");
        assert_eq!(path.leaf(), Some("Savar"));
        assert_eq!(path.len(), 2);
        assert!(TraversalPath::root().is_empty());
    }
}

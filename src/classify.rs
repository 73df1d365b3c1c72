//! Leaf classification of discovered resource paths.
//!
//! The remote index is not scoped per leaf, so a leaf's candidate list is the
//! whole set of links visible after selecting it. [`Classifier::classify`]
//! narrows that list to the leaf by label and splits it into primary and
//! secondary maps by a marker token.
//!
//! Matching runs on the percent-decoded path, so a label such as
//! "Savar Sadar" matches `x/Savar%20Sadar.jpg`. Candidates keep their
//! encoded form for URL resolution.

use std::borrow::Cow;
use std::collections::HashSet;

use tracing::debug;

/// Default marker token identifying secondary (road) maps.
pub const DEFAULT_SECONDARY_MARKER: &str = "road";

/// Category assigned to a discovered resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// The leaf's main map.
    Primary,
    /// A map whose path carries the secondary marker.
    Secondary,
    /// Discovered but not yet classified.
    Unclassified,
}

/// One discovered downloadable item at a leaf, before task construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceCandidate {
    /// Root-relative path as produced by the normalizer.
    pub remote_path: String,
    /// Category assigned by the classifier.
    pub category: Category,
}

impl ResourceCandidate {
    /// Creates an unclassified candidate.
    #[must_use]
    pub fn new(remote_path: impl Into<String>) -> Self {
        Self {
            remote_path: remote_path.into(),
            category: Category::Unclassified,
        }
    }
}

/// Result of classifying one leaf's candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// Candidates categorized as [`Category::Primary`], in discovery order.
    pub primary: Vec<ResourceCandidate>,
    /// Candidates categorized as [`Category::Secondary`], in discovery order.
    pub secondary: Vec<ResourceCandidate>,
    /// True when no candidate matched the label and the unfiltered set was
    /// promoted to primary.
    pub fallback_used: bool,
}

impl Classification {
    /// True when the leaf produced nothing to download.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.secondary.is_empty()
    }

    /// Total number of classified candidates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.primary.len() + self.secondary.len()
    }
}

/// Substring-based classifier.
///
/// Matching is plain lowercase substring search, so a primary map whose path
/// happens to contain the marker inside an unrelated word is classified as
/// secondary.
#[derive(Debug, Clone)]
pub struct Classifier {
    marker: String,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_SECONDARY_MARKER)
    }
}

impl Classifier {
    /// Creates a classifier using `marker` to detect secondary resources.
    #[must_use]
    pub fn new(marker: &str) -> Self {
        Self {
            marker: marker.to_lowercase(),
        }
    }

    /// Returns the lowercased secondary marker.
    #[must_use]
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Classifies the candidates discovered at a leaf labelled `label`.
    ///
    /// Paths are de-duplicated first (first occurrence wins). Only paths
    /// containing the lowercased label are kept; those also containing the
    /// marker become secondary, the rest primary. If the label filter keeps
    /// nothing while candidates exist, every candidate is returned as primary.
    #[must_use]
    pub fn classify<S: AsRef<str>>(&self, paths: &[S], label: &str) -> Classification {
        let unique = dedup_paths(paths);
        let needle = label.trim().to_lowercase();

        let matched: Vec<&str> = unique
            .iter()
            .copied()
            .filter(|path| matchable(path).contains(&needle))
            .collect();

        if matched.is_empty() {
            if !unique.is_empty() {
                debug!(
                    label,
                    candidates = unique.len(),
                    "no candidate matched label; keeping all as primary"
                );
            }
            return Classification {
                fallback_used: !unique.is_empty(),
                primary: unique
                    .into_iter()
                    .map(|path| ResourceCandidate {
                        remote_path: path.to_string(),
                        category: Category::Primary,
                    })
                    .collect(),
                secondary: Vec::new(),
            };
        }

        self.categorize(&matched)
    }

    /// Splits `paths` by marker alone, without a label filter.
    ///
    /// Used for directory listings, which are already scoped to one leaf.
    #[must_use]
    pub fn categorize<S: AsRef<str>>(&self, paths: &[S]) -> Classification {
        let mut classification = Classification::default();
        for path in dedup_paths(paths) {
            let category = self.category_of(path);
            let candidate = ResourceCandidate {
                remote_path: path.to_string(),
                category,
            };
            match category {
                Category::Secondary => classification.secondary.push(candidate),
                _ => classification.primary.push(candidate),
            }
        }
        classification
    }

    fn category_of(&self, path: &str) -> Category {
        if !self.marker.is_empty() && matchable(path).contains(&self.marker) {
            Category::Secondary
        } else {
            Category::Primary
        }
    }
}

/// Lowercased, percent-decoded form of `path` used for substring matching.
fn matchable(path: &str) -> String {
    urlencoding::decode(path)
        .unwrap_or(Cow::Borrowed(path))
        .to_lowercase()
}

fn dedup_paths<S: AsRef<str>>(paths: &[S]) -> Vec<&str> {
    let mut seen = HashSet::with_capacity(paths.len());
    paths
        .iter()
        .map(AsRef::as_ref)
        .filter(|path| seen.insert(*path))
        .collect()
}

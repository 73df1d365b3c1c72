//! Href normalization against a fixed resource root.
//!
//! Every href discovered in rendered markup or a directory listing passes
//! through [`normalize_href`] before it is classified, filtered by depth, or
//! turned into a download task. The result is a root-relative path that can
//! never climb out of the configured root.

use tracing::trace;
use url::Url;

/// Schemes that denote something the crawler can actually request.
const NAVIGATIONAL_SCHEMES: &[&str] = &["http", "https"];

/// Normalizes `href` into a path relative to `root`.
///
/// - Query strings and fragments are dropped.
/// - Absolute URLs contribute only their path, which must lie under `root`.
/// - Leading separators are stripped, then a case-insensitive, segment-exact
///   `root` prefix is stripped if present.
/// - `.` and `..` segments are resolved; a `..` that would cross the root
///   rejects the href.
/// - A trailing `/` is kept if and only if the href denotes a directory.
///
/// Normalizing a normalized path returns it unchanged, except when its first
/// segment is itself named like `root`: `UploadedDocument/a.jpg` is read as
/// root-prefixed and becomes `a.jpg`.
///
/// Returns `None` for empty input, non-navigational schemes (`javascript:`,
/// `mailto:`, `data:`), root escapes, and hrefs that normalize to nothing.
///
/// # Examples
///
/// ```
/// use mapcrawl_core::href::normalize_href;
///
/// assert_eq!(
///     normalize_href("/UploadedDocument/x/savar.jpg?v=2", "UploadedDocument").as_deref(),
///     Some("x/savar.jpg")
/// );
/// assert_eq!(normalize_href("javascript:void(0)", "UploadedDocument"), None);
/// assert_eq!(normalize_href("../escape.jpg", "UploadedDocument"), None);
/// ```
#[must_use]
pub fn normalize_href(href: &str, root: &str) -> Option<String> {
    let trimmed = href.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (raw_path, absolute) = if let Some(scheme) = split_scheme(trimmed) {
        if !NAVIGATIONAL_SCHEMES
            .iter()
            .any(|allowed| scheme.eq_ignore_ascii_case(allowed))
        {
            trace!(href = %trimmed, scheme, "rejecting non-navigational href");
            return None;
        }
        (Url::parse(trimmed).ok()?.path().to_string(), true)
    } else if trimmed.starts_with("//") {
        let parsed = Url::parse(&format!("http:{trimmed}")).ok()?;
        (parsed.path().to_string(), true)
    } else {
        (strip_query_and_fragment(trimmed).replace('\\', "/"), false)
    };

    let raw_segments: Vec<&str> = raw_path.split('/').filter(|s| !s.is_empty()).collect();
    let root_segments: Vec<&str> = root.split('/').filter(|s| !s.is_empty()).collect();

    let has_root = raw_segments.len() >= root_segments.len()
        && raw_segments
            .iter()
            .zip(&root_segments)
            .all(|(segment, root_segment)| segment.eq_ignore_ascii_case(root_segment));
    if absolute && !has_root {
        trace!(href = %trimmed, root, "absolute href outside root");
        return None;
    }
    let relative = if has_root {
        &raw_segments[root_segments.len()..]
    } else {
        &raw_segments[..]
    };

    let mut resolved: Vec<&str> = Vec::with_capacity(relative.len());
    for segment in relative {
        match dot_segment(segment) {
            Some(DotSegment::Current) => {}
            Some(DotSegment::Parent) => {
                if resolved.pop().is_none() {
                    trace!(href = %trimmed, root, "href escapes root");
                    return None;
                }
            }
            None => resolved.push(segment),
        }
    }

    if resolved.is_empty() {
        return None;
    }

    let denotes_directory =
        raw_path.ends_with('/') || relative.last().is_some_and(|s| dot_segment(s).is_some());
    let mut normalized = resolved.join("/");
    if denotes_directory {
        normalized.push('/');
    }
    Some(normalized)
}

/// Number of path segments in a normalized path (`a/b/c.jpg` → 3, `a/b/` → 2).
#[must_use]
pub fn path_depth(path: &str) -> usize {
    path.split('/').filter(|s| !s.is_empty()).count()
}

/// Whether a normalized path denotes a directory.
#[must_use]
pub fn is_directory(path: &str) -> bool {
    path.ends_with('/')
}

enum DotSegment {
    Current,
    Parent,
}

fn dot_segment(segment: &str) -> Option<DotSegment> {
    let decoded = urlencoding::decode(segment).map_or_else(|_| segment.into(), |d| d);
    match decoded.as_ref() {
        "." => Some(DotSegment::Current),
        ".." => Some(DotSegment::Parent),
        _ => None,
    }
}

fn strip_query_and_fragment(href: &str) -> &str {
    href.find(['?', '#']).map_or(href, |end| &href[..end])
}

/// Returns the scheme of `href` if it has one (`https:`, `javascript:`, ...).
fn split_scheme(href: &str) -> Option<&str> {
    let colon = href.find(':')?;
    if href[..colon].contains(['/', '?', '#']) {
        return None;
    }
    let scheme = &href[..colon];
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    chars
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        .then_some(scheme)
}

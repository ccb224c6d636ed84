//! Slash-delimited path helpers.
//!
//! A full path names a root in its first segment; the rest is relative to
//! that root's tree. Paths are normalized by dropping empty segments, so
//! `/proj//src/` and `proj/src` are the same path.

use crate::error::{VfsError, VfsResult};

/// Normalize a path, rejecting `.` and `..` segments.
pub fn normalize(path: &str) -> VfsResult<String> {
    let mut out = String::with_capacity(path.len());
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if segment == "." || segment == ".." {
            return Err(VfsError::InvalidPath {
                path: path.to_string(),
                reason: "relative segments are not allowed".into(),
            });
        }
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(segment);
    }
    Ok(out)
}

/// Like [`normalize`], but the empty path is an error.
pub fn normalize_non_empty(path: &str) -> VfsResult<String> {
    let normalized = normalize(path)?;
    if normalized.is_empty() {
        return Err(VfsError::InvalidPath {
            path: path.to_string(),
            reason: "empty path".into(),
        });
    }
    Ok(normalized)
}

/// First segment of a normalized path.
pub fn root_name(path: &str) -> &str {
    path.split('/').next().unwrap_or(path)
}

/// Split a normalized path into `(parent, name)`.
pub fn split_parent(path: &str) -> Option<(&str, &str)> {
    path.rsplit_once('/')
}

pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// `path` relative to `ancestor`, if `ancestor` is a strict directory prefix.
pub fn strip_root<'a>(path: &'a str, ancestor: &str) -> Option<&'a str> {
    path.strip_prefix(ancestor)?.strip_prefix('/')
}

/// The longest root that is a strict `root/` prefix of `path`.
///
/// A path never matches itself: `longest_match("a/b", ["a/b"])` is `None`.
/// This is how the owner of a path and the parent of a nested root are
/// both found.
pub fn longest_match<'a, I>(path: &str, roots: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    roots
        .into_iter()
        .filter(|root| strip_root(path, root).is_some())
        .max_by_key(|root| root.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_drops_empty_segments() {
        assert_eq!(normalize("/proj//src/").unwrap(), "proj/src");
        assert_eq!(normalize("").unwrap(), "");
        assert!(normalize("proj/../x").is_err());
        assert!(normalize_non_empty("//").is_err());
    }

    #[test]
    fn longest_match_prefers_deepest_root() {
        let roots = ["a", "a/b", "ab"];
        assert_eq!(longest_match("a/b/c", roots), Some("a/b"));
        assert_eq!(longest_match("a/bc", roots), Some("a"));
        assert_eq!(longest_match("ab/x", roots), Some("ab"));
        assert_eq!(longest_match("a/b", roots), Some("a"));
        assert_eq!(longest_match("a", roots), None);
        assert_eq!(longest_match("zzz/y", roots), None);
    }

    #[test]
    fn strip_root_requires_separator() {
        assert_eq!(strip_root("proj/readme", "proj"), Some("readme"));
        assert_eq!(strip_root("project/readme", "proj"), None);
        assert_eq!(strip_root("proj", "proj"), None);
    }

    #[test]
    fn parent_and_root_helpers() {
        assert_eq!(split_parent("a/b/c"), Some(("a/b", "c")));
        assert_eq!(split_parent("a"), None);
        assert_eq!(root_name("a/b/c"), "a");
        assert_eq!(join("", "x"), "x");
        assert_eq!(join("a", "x"), "a/x");
    }
}

//! Virtual path rules shared by the mirror, the query layer, and the drive.
//!
//! Active paths are absolute, `/`-separated, with no empty, `.` or `..`
//! segments and no trailing separator (except the root itself). Trashed
//! files are stored under [`TRASH_PATH`], which is relative and therefore
//! can never collide with an active path.

use thiserror::Error;

/// The root of every cluster's namespace.
pub const ROOT_PATH: &str = "/";

/// Path value persisted for trashed files.
pub const TRASH_PATH: &str = "./trash";

/// Path validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// Path is empty.
    #[error("path is empty")]
    Empty,

    /// Path does not start with `/`.
    #[error("path is not absolute: {0}")]
    NotAbsolute(String),

    /// Path contains `//`.
    #[error("path has an empty segment: {0}")]
    EmptySegment(String),

    /// Path contains a `.` or `..` segment.
    #[error("path has a relative segment: {0}")]
    RelativeSegment(String),

    /// Path contains the caption delimiter.
    #[error("path contains reserved character '@': {0}")]
    ReservedChar(String),

    /// Name is outside `[A-Za-z0-9_.-]+` or is `.`/`..`.
    #[error("invalid name: {0:?}")]
    InvalidName(String),
}

/// Normalize and validate an absolute path.
///
/// A single trailing separator is dropped (`/a/b/` becomes `/a/b`); `/`
/// stays `/`.
pub fn normalize(path: &str) -> Result<String, PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }
    if !path.starts_with('/') {
        return Err(PathError::NotAbsolute(path.to_string()));
    }
    if path.contains('@') {
        return Err(PathError::ReservedChar(path.to_string()));
    }
    if path == ROOT_PATH {
        return Ok(ROOT_PATH.to_string());
    }

    let trimmed = path.strip_suffix('/').unwrap_or(path);
    for segment in trimmed[1..].split('/') {
        match segment {
            "" => return Err(PathError::EmptySegment(path.to_string())),
            "." | ".." => return Err(PathError::RelativeSegment(path.to_string())),
            _ => {}
        }
    }
    Ok(trimmed.to_string())
}

/// Validate a file or folder name.
pub fn validate_name(name: &str) -> Result<(), PathError> {
    let charset_ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !charset_ok || name == "." || name == ".." {
        return Err(PathError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Parent directory of a normalized path. The root is its own parent.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => ROOT_PATH,
        Some(idx) => &path[..idx],
    }
}

/// Join a directory and a single name.
pub fn join(dir: &str, name: &str) -> String {
    if dir == ROOT_PATH {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// True if `path` equals `root` or lies below it on a separator boundary.
///
/// `/a` contains `/a/b` but not `/ab`; `/` contains every absolute path.
pub fn is_within(path: &str, root: &str) -> bool {
    if root == ROOT_PATH {
        return path.starts_with('/');
    }
    match path.strip_prefix(root) {
        Some("") => true,
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}

/// Half-open string range `[lower, upper)` covering every path strictly
/// below `path`.
///
/// `'0'` is the code point right after `'/'`, so `p + "0"` bounds every
/// string that begins with `p + "/"`.
pub fn subtree_bounds(path: &str) -> (String, String) {
    if path == ROOT_PATH {
        ("/".to_string(), "0".to_string())
    } else {
        (format!("{path}/"), format!("{path}0"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_accepts_and_trims() {
        assert_eq!(normalize("/").unwrap(), "/");
        assert_eq!(normalize("/docs").unwrap(), "/docs");
        assert_eq!(normalize("/docs/2024/").unwrap(), "/docs/2024");
    }

    #[test]
    fn test_normalize_rejects_malformed() {
        assert_eq!(normalize(""), Err(PathError::Empty));
        assert!(matches!(normalize("docs"), Err(PathError::NotAbsolute(_))));
        assert!(matches!(normalize(TRASH_PATH), Err(PathError::NotAbsolute(_))));
        assert!(matches!(normalize("/a//b"), Err(PathError::EmptySegment(_))));
        assert!(matches!(normalize("//"), Err(PathError::EmptySegment(_))));
        assert!(matches!(normalize("/a/../b"), Err(PathError::RelativeSegment(_))));
        assert!(matches!(normalize("/a/./b"), Err(PathError::RelativeSegment(_))));
        assert!(matches!(normalize("/a@b"), Err(PathError::ReservedChar(_))));
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("report-v2.final_1.pdf").is_ok());
        for bad in ["", ".", "..", "a/b", "a b", "a@b", "päper"] {
            assert!(validate_name(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_parent_and_join() {
        assert_eq!(parent("/a/b"), "/a");
        assert_eq!(parent("/a"), "/");
        assert_eq!(parent("/"), "/");
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
    }

    #[test]
    fn test_is_within_is_separator_bounded() {
        assert!(is_within("/a", "/a"));
        assert!(is_within("/a/b", "/a"));
        assert!(!is_within("/ab", "/a"));
        assert!(is_within("/anything", "/"));
        assert!(!is_within(TRASH_PATH, "/"));
    }

    #[test]
    fn test_subtree_bounds_cover_children_only() {
        let (lo, hi) = subtree_bounds("/a");
        let inside = |p: &str| p >= lo.as_str() && p < hi.as_str();
        assert!(inside("/a/b"));
        assert!(inside("/a/b/c"));
        assert!(!inside("/ab"));
        assert!(!inside("/a-b"));
        assert!(!inside("/a"));

        let (lo, hi) = subtree_bounds("/");
        assert!("/zeta" >= lo.as_str() && "/zeta" < hi.as_str());
        assert!(!(TRASH_PATH >= lo.as_str() && TRASH_PATH < hi.as_str()));
    }
}

//! Canonical path normalization.
//!
//! Catalog path fields are stored forward-slash, with no empty segments, so
//! that they compare by plain string equality regardless of the separator
//! convention of the filesystem that produced them.

use std::path::Path;

/// Normalize a path-like string to its canonical forward-slash form.
///
/// Backslashes are treated as separators, and any empty segment produced by
/// a repeated or leading/trailing separator is dropped.
pub fn normalize(input: &str) -> String {
    input
        .replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Normalize a filesystem path's relative portion, preserving no leading
/// slash (the result is always a bare relative string).
pub fn normalize_path(path: &Path) -> String {
    normalize(&path.to_string_lossy())
}

/// True if the given path string is absolute on this platform.
pub fn is_absolute(path: &str) -> bool {
    Path::new(path).is_absolute()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_backslashes() {
        assert_eq!(normalize("a\\b\\c"), "a/b/c");
    }

    #[test]
    fn drops_empty_segments() {
        assert_eq!(normalize("/a/b/"), "a/b");
        assert_eq!(normalize("a///b"), "a/b");
    }

    #[test]
    fn empty_input_is_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("///"), "");
    }

    #[test]
    fn absolute_detection() {
        assert!(is_absolute("/a/b"));
        assert!(!is_absolute("a/b"));
    }
}

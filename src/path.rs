//! Path classification and normalization.
//!
//! Paths throughout this crate are slash-delimited logical paths, independent
//! of the host OS path separator. A path whose final segment begins with `.`
//! is a *temp path* and is never synchronized to the remote.

use unicode_normalization::UnicodeNormalization;

/// Returns true if the final segment of `path` begins with `.`.
///
/// Empty paths and the root (`""`, `"/"`) are never temp paths.
pub fn is_temp_name(path: &str) -> bool {
    name_of(path).starts_with('.')
}

/// Splits `path` into its parent and final segment.
///
/// `parent_of("/a/b/c") == "/a/b"`, `parent_of("/a") == "/"`, `parent_of("/") == "/"`.
pub fn parent_of(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => trimmed[..idx].to_string(),
        None => "/".to_string(),
    }
}

/// Returns the final path segment (the "name") of `path`.
pub fn name_of(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Joins a parent path and a name into a single path, normalizing the
/// double-slash that would otherwise occur when `parent` is the root.
pub fn join(parent: &str, name: &str) -> String {
    if parent == "/" || parent.is_empty() {
        format!("/{name}")
    } else {
        format!("{}/{}", parent.trim_end_matches('/'), name)
    }
}

/// Normalizes `s` via canonical Unicode decomposition (NFD) unless disabled.
///
/// Mirrors the `noUnicodeNormalize` configuration flag: callers pass
/// `disabled = config.no_unicode_normalize`.
pub fn normalize(s: &str, disabled: bool) -> String {
    if disabled {
        s.to_string()
    } else {
        s.nfd().collect()
    }
}

/// Compares two paths under normalization (NFD unless `disabled`).
pub fn paths_equal(a: &str, b: &str, disabled: bool) -> bool {
    normalize(a, disabled) == normalize(b, disabled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_names_are_detected_on_final_segment_only() {
        assert!(is_temp_name("/a/b/.tmpfile"));
        assert!(!is_temp_name("/.hidden/visible"));
        assert!(!is_temp_name("/a/b/file"));
    }

    #[test]
    fn parent_and_name_split_standard_cases() {
        assert_eq!(parent_of("/a/b/c"), "/a/b");
        assert_eq!(parent_of("/a"), "/");
        assert_eq!(parent_of("/"), "/");
        assert_eq!(name_of("/a/b/c"), "c");
        assert_eq!(name_of("/a"), "a");
    }

    #[test]
    fn join_avoids_double_slash_at_root() {
        assert_eq!(join("/", "file.txt"), "/file.txt");
        assert_eq!(join("/a/b", "file.txt"), "/a/b/file.txt");
    }

    #[test]
    fn normalize_can_be_disabled() {
        let composed = "e\u{0301}"; // e + combining acute accent, already decomposed
        assert_eq!(normalize(composed, true), composed);
        // NFD of an already-decomposed string is a no-op
        assert_eq!(normalize(composed, false), composed);
    }

    #[test]
    fn paths_equal_compares_under_normalization() {
        let nfc = "\u{00e9}"; // é precomposed
        let nfd = "e\u{0301}"; // e + combining acute
        assert!(paths_equal(nfc, nfd, false));
        assert!(!paths_equal(nfc, nfd, true));
    }
}

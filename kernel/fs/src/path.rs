//! Path splitting helpers.
//!
//! Paths use `/` as separator with `/` as the absolute root. These are
//! pure slice operations; resolution against the directory tree lives in
//! the volume.

/// Splits a path into `(parent, basename)`.
///
/// Trailing slashes are ignored: `"/a/b/"` splits like `"/a/b"`. The
/// parent of a top-level name is `"/"`; the root itself yields an empty
/// basename.
#[must_use]
pub(crate) fn split(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return ("/", "");
    }
    match trimmed.rfind('/') {
        Some(0) => ("/", &trimmed[1..]),
        Some(i) => (&trimmed[..i], &trimmed[i + 1..]),
        None => ("/", trimmed),
    }
}

/// Iterates the non-empty components of a path.
pub(crate) fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_nested() {
        assert_eq!(split("/a/b.txt"), ("/a", "b.txt"));
        assert_eq!(split("/a/b/c"), ("/a/b", "c"));
    }

    #[test]
    fn split_top_level() {
        assert_eq!(split("/file"), ("/", "file"));
        assert_eq!(split("file"), ("/", "file"));
    }

    #[test]
    fn split_root_and_trailing_slash() {
        assert_eq!(split("/"), ("/", ""));
        assert_eq!(split("/a/"), ("/", "a"));
        assert_eq!(split("/a/b/"), ("/a", "b"));
    }

    #[test]
    fn components_skip_empties() {
        let parts: Vec<&str> = components("//a///b/c/").collect();
        assert_eq!(parts, vec!["a", "b", "c"]);
    }
}

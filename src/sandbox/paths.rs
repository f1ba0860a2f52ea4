//! Path-safety checks for files staged into a sandbox.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Returns true if `raw` names an absolute location on this platform.
///
/// A leading `/` is absolute everywhere. On Windows a leading `\` (which
/// covers UNC prefixes like `\\server`) and `C:` style drive letters are
/// absolute too; elsewhere `x:data.csv` is an ordinary file name.
pub fn is_absolute_like(raw: &str) -> bool {
    if raw.starts_with('/') {
        return true;
    }
    if !cfg!(windows) {
        return false;
    }
    if raw.starts_with('\\') {
        return true;
    }
    let mut chars = raw.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(drive), Some(':')) if drive.is_ascii_alphabetic()
    )
}

/// Splits `raw` on either separator style.
fn components(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(['/', '\\'])
}

/// Returns true if any component of `raw` is exactly `..`.
pub fn has_parent_component(raw: &str) -> bool {
    components(raw).any(|c| c == "..")
}

/// Validates a path relative to some base and returns it in native form.
///
/// Rejects empty, absolute and traversing paths. `file..txt` is a plain
/// name; only a component that equals `..` counts as traversal.
pub fn validate_relative(raw: &str) -> Result<PathBuf> {
    let invalid = |reason: &str| Error::InvalidPath {
        path: raw.to_string(),
        reason: reason.to_string(),
    };

    if raw.trim().is_empty() {
        return Err(invalid("path is empty"));
    }
    if is_absolute_like(raw) {
        return Err(invalid("absolute paths are not allowed"));
    }
    if has_parent_component(raw) {
        return Err(invalid("path traversal ('..') is not allowed"));
    }

    let path: PathBuf = components(raw)
        .filter(|c| !c.is_empty() && *c != ".")
        .collect();
    if path.as_os_str().is_empty() {
        return Err(invalid("path does not name a file"));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn accepts_nested_relative_paths() {
        let path = validate_relative("data/raw/input.csv").unwrap();
        assert_eq!(path, Path::new("data").join("raw").join("input.csv"));
    }

    #[test]
    fn normalizes_backslashes_and_dot_components() {
        let path = validate_relative("./data\\input.csv").unwrap();
        assert_eq!(path, Path::new("data").join("input.csv"));
    }

    #[test]
    fn rejects_parent_components_anywhere() {
        for raw in ["../secret", "data/../../etc/passwd", "a\\..\\b", "a/b/.."] {
            let err = validate_relative(raw).unwrap_err();
            assert!(matches!(err, Error::InvalidPath { .. }), "{raw} accepted");
        }
    }

    #[test]
    fn allows_double_dots_inside_names() {
        assert!(validate_relative("file..txt").is_ok());
        assert!(validate_relative("dir..name/..hidden").is_ok());
    }

    #[test]
    fn rejects_posix_absolute_paths() {
        for raw in ["/etc/passwd", "/", "//server/share"] {
            assert!(is_absolute_like(raw), "{raw} not detected");
            assert!(validate_relative(raw).is_err());
        }
    }

    #[cfg(windows)]
    #[test]
    fn rejects_windows_absolute_paths() {
        for raw in ["\\\\server\\share\\f.txt", "C:\\data\\f.csv", "d:/f.csv", "\\f.csv"] {
            assert!(is_absolute_like(raw), "{raw} not detected");
            assert!(validate_relative(raw).is_err());
        }
    }

    #[cfg(unix)]
    #[test]
    fn drive_like_prefixes_are_plain_names_on_unix() {
        assert!(!is_absolute_like("x:data.csv"));
        assert_eq!(validate_relative("x:data.csv").unwrap(), Path::new("x:data.csv"));
    }

    #[test]
    fn rejects_empty_and_dot_only_paths() {
        assert!(validate_relative("").is_err());
        assert!(validate_relative("  ").is_err());
        assert!(validate_relative("./.").is_err());
    }
}

//! Path normalization for comparing project paths.
//!
//! - Trailing slashes are stripped (root stays "/").
//! - macOS paths are lowercased (HFS+/APFS are case-insensitive by default).
//! - [`normalize_path_for_comparison`] additionally resolves symlinks when the
//!   path exists.

use std::path::Path;

/// Full normalization, including symlink resolution for existing paths.
pub fn normalize_path_for_comparison(path: &str) -> String {
    let resolved = resolve_symlinks(path);
    let trimmed = strip_trailing_slashes(&resolved);
    apply_case_normalization(&trimmed)
}

/// Normalization without filesystem access.
///
/// Lock and record matching use this: paths may refer to directories that
/// were deleted after the session started.
pub fn normalize_path_for_matching(path: &str) -> String {
    let trimmed = strip_trailing_slashes(path);
    apply_case_normalization(&trimmed)
}

/// Absolute, non-empty paths are the only ones we can match against.
pub fn is_resolvable_path(path: &str) -> bool {
    let trimmed = path.trim();
    !trimmed.is_empty() && Path::new(trimmed).is_absolute()
}

/// True when `child` is strictly nested inside `parent` (both normalized).
pub fn is_strict_descendant(parent: &str, child: &str) -> bool {
    if parent == child {
        return false;
    }
    if parent == "/" {
        return child.starts_with('/');
    }
    child
        .strip_prefix(parent)
        .is_some_and(|rest| rest.starts_with('/'))
}

fn strip_trailing_slashes(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn resolve_symlinks(path: &str) -> String {
    let path_obj = Path::new(path);
    if path_obj.exists() {
        if let Ok(canonical) = path_obj.canonicalize() {
            return canonical.to_string_lossy().to_string();
        }
    }
    path.to_string()
}

fn apply_case_normalization(path: &str) -> String {
    #[cfg(target_os = "macos")]
    {
        path.to_lowercase()
    }
    #[cfg(not(target_os = "macos"))]
    {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_trailing_slash() {
        assert_eq!(normalize_path_for_matching("/project/"), "/project");
        assert_eq!(normalize_path_for_matching("/project//"), "/project");
    }

    #[test]
    fn preserves_root() {
        assert_eq!(normalize_path_for_matching("/"), "/");
        assert_eq!(normalize_path_for_matching("///"), "/");
    }

    #[test]
    #[cfg(target_os = "macos")]
    fn case_insensitive_on_macos() {
        assert_eq!(
            normalize_path_for_matching("/Users/Pete/Project"),
            normalize_path_for_matching("/users/pete/project")
        );
    }

    #[test]
    #[cfg(unix)]
    fn resolves_existing_symlinks() {
        let temp = tempfile::tempdir().unwrap();
        let real_dir = temp.path().join("real");
        let link_path = temp.path().join("link");
        std::fs::create_dir(&real_dir).unwrap();
        std::os::unix::fs::symlink(&real_dir, &link_path).unwrap();

        assert_eq!(
            normalize_path_for_comparison(real_dir.to_str().unwrap()),
            normalize_path_for_comparison(link_path.to_str().unwrap())
        );
    }

    #[test]
    fn relative_and_empty_paths_are_not_resolvable() {
        assert!(!is_resolvable_path(""));
        assert!(!is_resolvable_path("   "));
        assert!(!is_resolvable_path("relative/dir"));
        assert!(is_resolvable_path("/abs/dir"));
    }

    #[test]
    fn strict_descendant_requires_separator() {
        assert!(is_strict_descendant("/repo", "/repo/src"));
        assert!(!is_strict_descendant("/repo", "/repo"));
        assert!(!is_strict_descendant("/repo", "/repository"));
        assert!(is_strict_descendant("/", "/repo"));
    }
}

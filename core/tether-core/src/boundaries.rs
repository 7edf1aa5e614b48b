//! Project boundary detection.
//!
//! Walks up from a file or directory to the nearest project root, identified
//! by markers like CLAUDE.md, .git, or a package manifest. The reducer uses
//! this to give each session record an owning project path; lock matching
//! itself never walks the tree.

use std::path::{Path, PathBuf};

/// Maximum depth to walk up when searching for boundaries.
pub const MAX_BOUNDARY_DEPTH: usize = 20;

/// Generated or vendored directories. A boundary found inside one is discarded.
pub const IGNORED_DIRECTORIES: &[&str] = &[
    "node_modules",
    "vendor",
    ".git",
    "__pycache__",
    "target",
    "dist",
    "build",
    ".next",
    ".output",
    "venv",
    ".venv",
    "env",
    ".turbo",
    ".cache",
];

/// Project markers. Lower number = higher priority.
pub const PROJECT_MARKERS: &[(&str, u8)] = &[
    ("CLAUDE.md", 1),
    (".git", 2),
    ("package.json", 3),
    ("Cargo.toml", 3),
    ("pyproject.toml", 3),
    ("go.mod", 3),
    ("pubspec.yaml", 3),
    ("Project.toml", 3),
    ("deno.json", 3),
    ("Makefile", 4),
    ("CMakeLists.txt", 4),
];

/// Paths too broad to be meaningful project boundaries.
pub const DANGEROUS_PATHS: &[&str] = &["/", "/Users", "/home", "/var", "/tmp", "/opt"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectBoundary {
    /// Absolute path to the project root
    pub path: String,
    /// The marker file/directory that identified this as a project
    pub marker: String,
    /// Priority of the marker (lower = higher priority)
    pub priority: u8,
}

/// Finds the nearest project boundary, stopping at the user's home directory.
pub fn find_project_boundary(path: &str) -> Option<ProjectBoundary> {
    let home = dirs::home_dir();
    find_project_boundary_with_home(path, home.as_deref())
}

/// Boundary search with an explicit home directory.
///
/// 1. Start at the path if it is a directory, else its parent.
/// 2. Walk up, checking markers at each level (highest priority first).
/// 3. An ignored directory discards whatever was found beneath it.
/// 4. CLAUDE.md wins immediately; otherwise the highest-priority (then
///    nearest) marker wins.
/// 5. Stop at `home`, the filesystem root, or [`MAX_BOUNDARY_DEPTH`].
///
/// Dangerous paths and `home` itself are never returned.
pub fn find_project_boundary_with_home(path: &str, home: Option<&Path>) -> Option<ProjectBoundary> {
    let path = Path::new(path);
    if !path.exists() {
        return None;
    }

    let start = if path.is_dir() {
        path.to_path_buf()
    } else {
        path.parent()?.to_path_buf()
    };

    let mut current: Option<PathBuf> = Some(start);
    let mut depth = 0;
    let mut best: Option<ProjectBoundary> = None;

    while let Some(dir) = current {
        if depth >= MAX_BOUNDARY_DEPTH {
            break;
        }
        let at_home = home.is_some_and(|home| dir == home);
        if at_home {
            break;
        }

        let ignored = dir
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(is_ignored_directory);

        if ignored {
            best = None;
        } else if let Some(boundary) = marker_at(&dir) {
            if boundary.priority == 1 {
                return Some(boundary);
            }
            match &best {
                Some(existing) if existing.priority <= boundary.priority => {}
                _ => best = Some(boundary),
            }
        }

        current = dir.parent().map(Path::to_path_buf);
        depth += 1;
    }

    best
}

fn marker_at(dir: &Path) -> Option<ProjectBoundary> {
    let dir_str = dir.to_string_lossy();
    if is_dangerous_path(&dir_str).is_some() {
        return None;
    }
    PROJECT_MARKERS
        .iter()
        .find(|(marker, _)| dir.join(marker).exists())
        .map(|(marker, priority)| ProjectBoundary {
            path: dir_str.to_string(),
            marker: marker.to_string(),
            priority: *priority,
        })
}

pub fn is_ignored_directory(name: &str) -> bool {
    IGNORED_DIRECTORIES.contains(&name)
}

/// `Some(reason)` if the path is too broad to be a project.
pub fn is_dangerous_path(path: &str) -> Option<String> {
    let trimmed = path.trim_end_matches('/');
    let normalized = if trimmed.is_empty() { "/" } else { trimmed };

    if DANGEROUS_PATHS.contains(&normalized) {
        return Some(format!(
            "Path '{}' is too broad and would encompass many projects",
            path
        ));
    }

    if let Some(home) = dirs::home_dir() {
        if normalized == home.to_string_lossy() {
            return Some("Home directory is too broad to be a project".to_string());
        }
    }

    if normalized.starts_with("/Users/") || normalized.starts_with("/home/") {
        let parts = normalized.split('/').filter(|s| !s.is_empty()).count();
        if parts == 2 {
            return Some(format!("User home directory '{}' is too broad", path));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_file(dir: &Path, name: &str) {
        fs::write(dir.join(name), "").expect("Failed to create file");
    }

    fn create_dir(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::create_dir_all(&path).expect("Failed to create dir");
        path
    }

    fn boundary(path: &Path) -> Option<ProjectBoundary> {
        find_project_boundary_with_home(path.to_str().unwrap(), None)
    }

    #[test]
    fn finds_claude_md_from_nested_file() {
        let tmp = TempDir::new().unwrap();
        create_file(tmp.path(), "CLAUDE.md");
        let src = create_dir(tmp.path(), "src");
        create_file(&src, "main.rs");

        let found = boundary(&src.join("main.rs")).unwrap();
        assert_eq!(found.path, tmp.path().to_string_lossy());
        assert_eq!(found.marker, "CLAUDE.md");
    }

    #[test]
    fn claude_md_beats_nearer_package_marker() {
        let tmp = TempDir::new().unwrap();
        create_file(tmp.path(), "CLAUDE.md");
        let pkg = create_dir(tmp.path(), "packages/web");
        create_file(&pkg, "package.json");

        let found = boundary(&pkg).unwrap();
        assert_eq!(found.marker, "CLAUDE.md");
        assert_eq!(found.path, tmp.path().to_string_lossy());
    }

    #[test]
    fn git_root_beats_nearer_makefile() {
        let tmp = TempDir::new().unwrap();
        create_dir(tmp.path(), ".git");
        let tools = create_dir(tmp.path(), "tools");
        create_file(&tools, "Makefile");

        let found = boundary(&tools).unwrap();
        assert_eq!(found.marker, ".git");
    }

    #[test]
    fn nearest_wins_at_equal_priority() {
        let tmp = TempDir::new().unwrap();
        create_file(tmp.path(), "package.json");
        let inner = create_dir(tmp.path(), "crates/inner");
        create_file(&inner, "Cargo.toml");

        let found = boundary(&inner).unwrap();
        assert_eq!(found.path, inner.to_string_lossy());
    }

    #[test]
    fn markers_inside_ignored_directories_are_discarded() {
        let tmp = TempDir::new().unwrap();
        create_dir(tmp.path(), ".git");
        let dep = create_dir(tmp.path(), "node_modules/left-pad");
        create_file(&dep, "package.json");

        let found = boundary(&dep).unwrap();
        assert_eq!(found.path, tmp.path().to_string_lossy());
        assert_eq!(found.marker, ".git");
    }

    #[test]
    fn stops_at_home() {
        let tmp = TempDir::new().unwrap();
        create_dir(tmp.path(), ".git");
        let home = create_dir(tmp.path(), "home");
        let project = create_dir(&home, "project");

        let found = find_project_boundary_with_home(project.to_str().unwrap(), Some(&home));
        assert!(found.is_none());
    }

    #[test]
    fn missing_path_has_no_boundary() {
        assert!(boundary(Path::new("/definitely/not/here/12345")).is_none());
    }

    #[test]
    fn dangerous_paths_are_flagged() {
        assert!(is_dangerous_path("/").is_some());
        assert!(is_dangerous_path("/tmp/").is_some());
        assert!(is_dangerous_path("/Users/pete").is_some());
        assert!(is_dangerous_path("/Users/pete/Code/app").is_none());
    }
}

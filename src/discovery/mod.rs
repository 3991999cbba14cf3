//! Repository discovery.
//!
//! Walks configured roots and emits the absolute, canonical paths of git
//! working copies. Root specs may use `~` and shell globs; a `**` in a
//! root forces recursive search of its prefix, a plain glob expands and
//! each match is searched independently. Recursion never descends into a
//! working copy once found, and the standard exclude set prunes build
//! and dependency directories.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::constants::DEFAULT_EXCLUDED_DIRS;
use crate::git::GitClient;

#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Search subdirectories of roots that are not themselves working copies
    pub recursive: bool,
    /// User patterns added to the default exclude set. Entries containing a
    /// path separator (or `~`) exclude by path prefix; bare names exclude
    /// directories anywhere by name.
    pub excludes: Vec<String>,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            excludes: Vec::new(),
        }
    }
}

/// Discover working copies under the given root specs.
///
/// Paths are canonicalized before emission, so a symlink and its target
/// collapse into one entry; duplicates across overlapping roots are
/// eliminated within the call.
pub fn discover_repos(roots: &[String], options: &DiscoveryOptions) -> Vec<PathBuf> {
    let (name_excludes, path_excludes) = split_excludes(&options.excludes);
    let mut found: BTreeSet<PathBuf> = BTreeSet::new();

    for spec in roots {
        let expanded = shellexpand::tilde(spec).into_owned();

        if let Some(idx) = expanded.find("**") {
            // `**` forces a recursive search of the prefix
            let prefix = expanded[..idx].trim_end_matches('/');
            let prefix = if prefix.is_empty() { "/" } else { prefix };
            search(Path::new(prefix), true, &name_excludes, &mut found);
        } else if expanded.contains('*') {
            match glob::glob(&expanded) {
                Ok(matches) => {
                    for entry in matches.flatten() {
                        if entry.is_dir() {
                            search(&entry, options.recursive, &name_excludes, &mut found);
                        }
                    }
                }
                Err(e) => warn!(%spec, "invalid glob pattern: {e}"),
            }
        } else {
            let path = Path::new(&expanded);
            if path.is_dir() {
                search(path, options.recursive, &name_excludes, &mut found);
            } else {
                warn!(%spec, "directory not found");
            }
        }
    }

    found
        .into_iter()
        .filter(|repo| !is_path_excluded(repo, &path_excludes))
        .collect()
}

/// Search one directory. A working copy is emitted and never descended
/// into; other directories are recursed when `recursive` is set.
fn search(path: &Path, recursive: bool, name_excludes: &[String], out: &mut BTreeSet<PathBuf>) {
    if GitClient::is_git_repo(path) {
        match path.canonicalize() {
            Ok(canonical) => {
                out.insert(canonical);
            }
            Err(e) => debug!(path = %path.display(), "cannot canonicalize: {e}"),
        }
        return;
    }

    let entries = match std::fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(path = %path.display(), "cannot read directory: {e}");
            return;
        }
    };

    for entry in entries.flatten() {
        let entry_path = entry.path();
        if !entry_path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        if is_name_excluded(&name, name_excludes) {
            continue;
        }

        if GitClient::is_git_repo(&entry_path) {
            if let Ok(canonical) = entry_path.canonicalize() {
                out.insert(canonical);
            }
        } else if recursive {
            search(&entry_path, true, name_excludes, out);
        }
    }
}

/// Split user excludes into by-name patterns and by-path prefixes, seeding
/// the name set with the defaults.
fn split_excludes(user: &[String]) -> (Vec<String>, Vec<PathBuf>) {
    let mut names: Vec<String> = DEFAULT_EXCLUDED_DIRS
        .iter()
        .map(|s| s.to_string())
        .collect();
    let mut paths = Vec::new();

    for pattern in user {
        if pattern.contains('/') || pattern.starts_with('~') {
            let expanded = shellexpand::tilde(pattern).into_owned();
            let trimmed = expanded
                .trim_end_matches("/**")
                .trim_end_matches("/*")
                .trim_end_matches('/');
            paths.push(PathBuf::from(trimmed));
        } else {
            names.push(pattern.to_lowercase());
        }
    }

    (names, paths)
}

fn is_name_excluded(name: &str, patterns: &[String]) -> bool {
    let lower = name.to_lowercase();
    patterns.iter().any(|pattern| {
        if let Some(prefix) = pattern.strip_suffix('*') {
            lower.starts_with(prefix)
        } else {
            lower == *pattern
        }
    })
}

fn is_path_excluded(repo: &Path, excludes: &[PathBuf]) -> bool {
    excludes
        .iter()
        .any(|exc| repo == exc || repo.starts_with(exc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn make_repo(parent: &Path, name: &str) -> PathBuf {
        let path = parent.join(name);
        std::fs::create_dir_all(&path).unwrap();
        Command::new("git")
            .args(["init", "-q"])
            .current_dir(&path)
            .status()
            .expect("git init");
        path
    }

    #[test]
    fn test_discovers_immediate_repos() {
        let root = TempDir::new().unwrap();
        make_repo(root.path(), "alpha");
        make_repo(root.path(), "beta");
        std::fs::create_dir(root.path().join("not-a-repo")).unwrap();

        let repos = discover_repos(
            &[root.path().to_string_lossy().into_owned()],
            &DiscoveryOptions::default(),
        );
        assert_eq!(repos.len(), 2);
        let names: Vec<_> = repos
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names.contains(&"alpha".to_string()));
        assert!(names.contains(&"beta".to_string()));
    }

    #[test]
    fn test_recursive_finds_nested_but_not_inside_repos() {
        let root = TempDir::new().unwrap();
        let outer = make_repo(root.path(), "outer");
        // a repo nested inside a working copy must not be discovered
        make_repo(&outer, "inner");
        std::fs::create_dir(root.path().join("group")).unwrap();
        make_repo(&root.path().join("group"), "nested");

        let repos = discover_repos(
            &[root.path().to_string_lossy().into_owned()],
            &DiscoveryOptions::default(),
        );
        let names: Vec<_> = repos
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names.contains(&"outer".to_string()));
        assert!(names.contains(&"nested".to_string()));
        assert!(!names.contains(&"inner".to_string()));
    }

    #[test]
    fn test_default_excludes_pruned() {
        let root = TempDir::new().unwrap();
        make_repo(root.path(), "keep");
        let vendored = root.path().join("node_modules");
        std::fs::create_dir(&vendored).unwrap();
        make_repo(&vendored, "dep");
        let build = root.path().join("build-debug");
        std::fs::create_dir(&build).unwrap();
        make_repo(&build, "generated");

        let repos = discover_repos(
            &[root.path().to_string_lossy().into_owned()],
            &DiscoveryOptions::default(),
        );
        assert_eq!(repos.len(), 1);
        assert!(repos[0].ends_with("keep"));
    }

    #[test]
    fn test_user_name_exclude() {
        let root = TempDir::new().unwrap();
        make_repo(root.path(), "keep");
        std::fs::create_dir(root.path().join("archive")).unwrap();
        make_repo(&root.path().join("archive"), "old");

        let repos = discover_repos(
            &[root.path().to_string_lossy().into_owned()],
            &DiscoveryOptions {
                recursive: true,
                excludes: vec!["archive".to_string()],
            },
        );
        assert_eq!(repos.len(), 1);
        assert!(repos[0].ends_with("keep"));
    }

    #[test]
    fn test_user_path_exclude() {
        let root = TempDir::new().unwrap();
        make_repo(root.path(), "keep");
        std::fs::create_dir(root.path().join("old")).unwrap();
        let dropped = make_repo(&root.path().join("old"), "dropped");

        let repos = discover_repos(
            &[root.path().to_string_lossy().into_owned()],
            &DiscoveryOptions {
                recursive: true,
                excludes: vec![format!("{}/**", dropped.parent().unwrap().display())],
            },
        );
        assert_eq!(repos.len(), 1);
        assert!(repos[0].ends_with("keep"));
    }

    #[test]
    fn test_glob_root() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("group-a")).unwrap();
        std::fs::create_dir(root.path().join("group-b")).unwrap();
        make_repo(&root.path().join("group-a"), "one");
        make_repo(&root.path().join("group-b"), "two");
        std::fs::create_dir(root.path().join("other")).unwrap();
        make_repo(&root.path().join("other"), "three");

        let spec = format!("{}/group-*", root.path().display());
        let repos = discover_repos(&[spec], &DiscoveryOptions::default());
        assert_eq!(repos.len(), 2);
    }

    #[test]
    fn test_double_star_forces_recursive() {
        let root = TempDir::new().unwrap();
        let deep = root.path().join("a").join("b");
        std::fs::create_dir_all(&deep).unwrap();
        make_repo(&deep, "buried");

        let spec = format!("{}/**", root.path().display());
        let repos = discover_repos(
            &[spec],
            &DiscoveryOptions {
                recursive: false,
                excludes: Vec::new(),
            },
        );
        assert_eq!(repos.len(), 1);
        assert!(repos[0].ends_with("buried"));
    }

    #[test]
    fn test_duplicates_collapse() {
        let root = TempDir::new().unwrap();
        make_repo(root.path(), "solo");
        let spec = root.path().to_string_lossy().into_owned();

        let repos = discover_repos(&[spec.clone(), spec], &DiscoveryOptions::default());
        assert_eq!(repos.len(), 1);
    }

    #[test]
    fn test_root_that_is_itself_a_repo() {
        let root = TempDir::new().unwrap();
        let repo = make_repo(root.path(), "self");
        let repos = discover_repos(
            &[repo.to_string_lossy().into_owned()],
            &DiscoveryOptions::default(),
        );
        assert_eq!(repos.len(), 1);
        assert!(repos[0].ends_with("self"));
    }

    #[test]
    fn test_missing_root_is_tolerated() {
        let repos = discover_repos(
            &["/definitely/not/here".to_string()],
            &DiscoveryOptions::default(),
        );
        assert!(repos.is_empty());
    }
}

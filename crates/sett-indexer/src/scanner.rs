//! Workspace file discovery

use std::collections::HashSet;
use std::path::{Component, Path};

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use tracing::{debug, warn};

use crate::config::SettConfig;
use crate::error::IndexError;

/// Directory names that are never indexed or watched.
pub const IGNORED_DIRS: &[&str] = &[".git", ".sett", "target", "node_modules", "__pycache__"];

/// Decides which workspace-relative paths are indexable.
#[derive(Debug, Clone)]
pub struct FileFilter {
    extensions: HashSet<String>,
    exclude: GlobSet,
}

impl FileFilter {
    pub fn new(config: &SettConfig) -> Result<Self, IndexError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.exclude {
            builder.add(Glob::new(pattern)?);
        }
        Ok(FileFilter {
            extensions: config.extensions.iter().map(|e| e.to_ascii_lowercase()).collect(),
            exclude: builder.build()?,
        })
    }

    /// `rel` is workspace-relative and `/`-separated.
    pub fn accepts(&self, rel: &str) -> bool {
        if rel.split('/').any(|part| IGNORED_DIRS.contains(&part)) {
            return false;
        }
        let ext = match Path::new(rel).extension().and_then(|e| e.to_str()) {
            Some(e) => e.to_ascii_lowercase(),
            None => return false,
        };
        self.extensions.contains(&ext) && !self.exclude.is_match(rel)
    }
}

/// Every indexable file under `root`, workspace-relative and sorted.
/// Honors `.gitignore` whether or not the root is a git repository.
pub fn scan(root: &Path, filter: &FileFilter) -> Vec<String> {
    let walker = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .git_exclude(true)
        .require_git(false)
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                warn!("Walk error: {}", err);
                continue;
            }
        };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let Some(rel) = relativize(root, entry.path()) else {
            continue;
        };
        if filter.accepts(&rel) {
            files.push(rel);
        }
    }
    files.sort();
    debug!("Scanned {} indexable files under {}", files.len(), root.display());
    files
}

/// `path` relative to `root` with `/` separators, or `None` if it lies
/// outside the root.
pub fn relativize(root: &Path, path: &Path) -> Option<String> {
    let rel = if path.is_absolute() {
        path.strip_prefix(root).ok()?
    } else {
        path
    };
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn scan_is_sorted_and_filtered() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "src/b.c", "int b;");
        write(root, "src/a.h", "int a;");
        write(root, "lib/tool.py", "X = 1");
        write(root, "README.md", "# readme");
        write(root, "build/gen.c", "int g;");
        write(root, ".hidden/x.c", "int x;");
        write(root, "target/y.c", "int y;");
        write(root, "vendor/skip.c", "int s;");
        write(root, ".gitignore", "vendor/\n");

        let filter = FileFilter::new(&SettConfig::default()).unwrap();
        assert_eq!(scan(root, &filter), vec!["lib/tool.py", "src/a.h", "src/b.c"]);
    }

    #[test]
    fn filter_checks_extension_and_excludes() {
        let config = SettConfig {
            exclude: vec!["third_party/**".into()],
            ..Default::default()
        };
        let filter = FileFilter::new(&config).unwrap();
        assert!(filter.accepts("src/main.CPP"));
        assert!(!filter.accepts("third_party/zlib/inflate.c"));
        assert!(!filter.accepts("Makefile"));
        assert!(!filter.accepts("pkg/__pycache__/m.py"));
    }

    #[test]
    fn invalid_exclude_glob_is_an_error() {
        let config = SettConfig {
            exclude: vec!["src/[".into()],
            ..Default::default()
        };
        assert!(matches!(FileFilter::new(&config), Err(IndexError::Glob(_))));
    }

    #[test]
    fn relativize_rejects_outside_paths() {
        let root = Path::new("/repo");
        assert_eq!(relativize(root, Path::new("/repo/src/a.c")).as_deref(), Some("src/a.c"));
        assert_eq!(relativize(root, Path::new("src/./a.c")).as_deref(), Some("src/a.c"));
        assert_eq!(relativize(root, Path::new("/elsewhere/a.c")), None);
        assert_eq!(relativize(root, Path::new("../a.c")), None);
    }
}

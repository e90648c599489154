//! Discovery: recursive, case-sensitive extension matching below a root.
//!
//! [`discover`] returns a lazy iterator, so the scheduler can start
//! dispatching transactions while the walk is still in progress.
//! [`scan_all`] drains it into a sorted [`Scan`] for callers that want the
//! full list up front (restore mode). Walk errors are collected next to the
//! paths rather than ending the scan.
//!
//! Paths are yielded relative to the root. Directories passed to
//! [`Discovery::excluding`] are pruned from the walk, which keeps a backup or
//! output tree nested inside the images tree from being picked up as input.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum DiscoverError {
    #[error("Invalid extension pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },
    #[error("Walk error under {}: {source}", .root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

impl DiscoverError {
    /// The entry that could not be read, when known.
    pub fn path(&self) -> Option<&Path> {
        match self {
            DiscoverError::Walk { source, .. } => source.path(),
            DiscoverError::Pattern { .. } => None,
        }
    }
}

/// Matches relative paths whose final extension is one of a fixed set.
#[derive(Debug, Clone)]
pub struct ExtensionMatcher {
    set: GlobSet,
}

impl ExtensionMatcher {
    /// Build a matcher for `**/*.{ext}` per extension. Case-sensitive.
    pub fn new<S: AsRef<str>>(extensions: &[S]) -> Result<Self, DiscoverError> {
        let mut builder = GlobSetBuilder::new();
        for ext in extensions {
            let pattern = format!("**/*.{}", ext.as_ref());
            let glob = Glob::new(&pattern).map_err(|source| DiscoverError::Pattern {
                pattern: pattern.clone(),
                source,
            })?;
            builder.add(glob);
        }
        let set = builder.build().map_err(|source| DiscoverError::Pattern {
            pattern: "<set>".to_string(),
            source,
        })?;
        Ok(Self { set })
    }

    pub fn matches(&self, relative: &Path) -> bool {
        self.set.is_match(relative)
    }
}

/// Streaming walk yielding matching file paths relative to `root`.
pub struct Discovery {
    root: PathBuf,
    walker: walkdir::IntoIter,
    matcher: ExtensionMatcher,
    excluded: Vec<PathBuf>,
}

impl Discovery {
    /// Prune these directories (and everything below them) from the walk.
    ///
    /// Directories that do not exist are ignored.
    pub fn excluding<I, P>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.excluded.extend(
            dirs.into_iter()
                .filter_map(|d| std::fs::canonicalize(d.as_ref()).ok()),
        );
        self
    }

    fn is_excluded(&self, dir: &Path) -> bool {
        if self.excluded.is_empty() {
            return false;
        }
        std::fs::canonicalize(dir).is_ok_and(|canon| self.excluded.contains(&canon))
    }
}

impl Iterator for Discovery {
    type Item = Result<PathBuf, DiscoverError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(source) => {
                    return Some(Err(DiscoverError::Walk {
                        root: self.root.clone(),
                        source,
                    }));
                }
            };

            if entry.file_type().is_dir() {
                if entry.depth() > 0 && self.is_excluded(entry.path()) {
                    tracing::debug!(dir = %entry.path().display(), "skipping excluded directory");
                    self.walker.skip_current_dir();
                }
                continue;
            }
            if !entry.file_type().is_file() {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            if self.matcher.matches(relative) {
                return Some(Ok(relative.to_path_buf()));
            }
        }
    }
}

/// Lazily walk `root`, yielding files accepted by `matcher`.
///
/// Symlinks are not followed.
pub fn discover(root: &Path, matcher: ExtensionMatcher) -> Discovery {
    Discovery {
        root: root.to_path_buf(),
        walker: WalkDir::new(root).follow_links(false).into_iter(),
        matcher,
        excluded: Vec::new(),
    }
}

/// Everything a full walk found.
#[derive(Debug, Default)]
pub struct Scan {
    /// Matching files relative to the root, sorted.
    pub paths: Vec<PathBuf>,
    /// Entries that could not be read. The walk carried on past each one.
    pub errors: Vec<DiscoverError>,
}

/// Walk `root` completely and return the sorted relative paths.
pub fn scan_all(root: &Path, matcher: ExtensionMatcher) -> Scan {
    let mut scan = Scan::default();
    for found in discover(root, matcher) {
        match found {
            Ok(path) => scan.paths.push(path),
            Err(e) => scan.errors.push(e),
        }
    }
    scan.paths.sort();
    scan
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    fn matcher(exts: &[&str]) -> ExtensionMatcher {
        ExtensionMatcher::new(exts).unwrap()
    }

    #[test]
    fn matcher_is_case_sensitive() {
        let m = matcher(&["jpg"]);
        assert!(m.matches(Path::new("a.jpg")));
        assert!(m.matches(Path::new("deep/er/a.jpg")));
        assert!(!m.matches(Path::new("a.JPG")));
        assert!(!m.matches(Path::new("a.jpeg")));
        assert!(!m.matches(Path::new("jpg")));
    }

    #[test]
    fn scan_all_finds_nested_matches_sorted() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "b.png");
        touch(tmp.path(), "a/one.jpg");
        touch(tmp.path(), "a/b/two.JPG");
        touch(tmp.path(), "a/notes.txt");
        touch(tmp.path(), "c.gif");

        let found = scan_all(tmp.path(), matcher(&["jpg", "JPG", "png"])).paths;

        assert_eq!(
            found,
            vec![
                PathBuf::from("a/b/two.JPG"),
                PathBuf::from("a/one.jpg"),
                PathBuf::from("b.png"),
            ]
        );
    }

    #[test]
    fn discover_is_lazy_iterator() {
        let tmp = TempDir::new().unwrap();
        for i in 0..5 {
            touch(tmp.path(), &format!("img{i}.jpg"));
        }
        let mut iter = discover(tmp.path(), matcher(&["jpg"]));
        assert!(iter.next().unwrap().is_ok());
        assert_eq!(iter.count(), 4);
    }

    #[test]
    fn excluded_directory_is_pruned() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "keep.jpg");
        touch(tmp.path(), "backup/keep.jpg");
        touch(tmp.path(), "backup/nested/other.jpg");

        let found: Vec<_> = discover(tmp.path(), matcher(&["jpg"]))
            .excluding([tmp.path().join("backup")])
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(found, vec![PathBuf::from("keep.jpg")]);
    }

    #[test]
    fn temp_files_are_not_matched() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), ".imgslim-abc123.part");
        assert!(scan_all(tmp.path(), matcher(&["jpg"])).paths.is_empty());
    }

    #[test]
    fn missing_root_is_walk_error() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("missing");
        let scan = scan_all(&missing, matcher(&["jpg"]));
        assert!(scan.paths.is_empty());
        assert_eq!(scan.errors.len(), 1);
        assert!(matches!(scan.errors[0], DiscoverError::Walk { .. }));
        assert_eq!(scan.errors[0].path(), Some(missing.as_path()));
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_directory_does_not_end_the_scan() {
        use std::os::unix::fs::PermissionsExt;

        if nix::unistd::geteuid().is_root() {
            // Permission bits do not stop root from listing a directory
            return;
        }
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "a.jpg");
        touch(tmp.path(), "locked/b.jpg");
        touch(tmp.path(), "z/c.jpg");
        let locked = tmp.path().join("locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        let scan = scan_all(tmp.path(), matcher(&["jpg"]));
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(
            scan.paths,
            vec![PathBuf::from("a.jpg"), PathBuf::from("z/c.jpg")]
        );
        assert_eq!(scan.errors.len(), 1);
        assert_eq!(scan.errors[0].path(), Some(locked.as_path()));
    }
}

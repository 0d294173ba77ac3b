//! Exclusion patterns shared by the scanner and duplicate detection.
//!
//! A pattern with glob metacharacters is a glob. A plain pattern containing a
//! separator is a path prefix. Any other plain pattern names a path segment,
//! so `node_modules` skips every directory of that name.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::paths;

#[derive(Debug, Clone, Default)]
pub struct PathMatcher {
    globs: Option<GlobSet>,
    prefixes: Vec<PathBuf>,
    names: Vec<String>,
}

impl PathMatcher {
    /// Invalid globs are skipped with a warning instead of failing the caller.
    pub fn new(patterns: &[String], warnings: &mut Vec<String>) -> Self {
        let mut matcher = Self::default();
        let mut builder = GlobSetBuilder::new();
        let mut glob_count = 0;

        for pattern in patterns.iter().map(|pattern| pattern.trim()) {
            if pattern.is_empty() {
                continue;
            }
            if has_glob_syntax(pattern) {
                match Glob::new(pattern) {
                    Ok(glob) => {
                        builder.add(glob);
                        glob_count += 1;
                    }
                    Err(err) => warnings.push(format!("ignoring exclude '{pattern}': {err}")),
                }
            } else if pattern.contains(['/', '\\']) {
                matcher.prefixes.push(PathBuf::from(pattern));
            } else {
                matcher.names.push(pattern.to_string());
            }
        }

        if glob_count > 0 {
            match builder.build() {
                Ok(set) => matcher.globs = Some(set),
                Err(err) => warnings.push(format!("exclude globs disabled: {err}")),
            }
        }
        matcher
    }

    pub fn is_empty(&self) -> bool {
        self.globs.is_none() && self.prefixes.is_empty() && self.names.is_empty()
    }

    pub fn matches(&self, path: &Path) -> bool {
        if self
            .prefixes
            .iter()
            .any(|prefix| paths::is_same_or_ancestor(prefix, path))
        {
            return true;
        }
        if !self.names.is_empty()
            && paths::segments(path).iter().any(|segment| {
                self.names
                    .iter()
                    .any(|name| segment.eq_ignore_ascii_case(name))
            })
        {
            return true;
        }
        self.globs.as_ref().is_some_and(|globs| globs.is_match(path))
    }
}

fn has_glob_syntax(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', ']', '{', '}'])
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::PathMatcher;

    fn matcher(patterns: &[&str]) -> (PathMatcher, Vec<String>) {
        let mut warnings = Vec::new();
        let patterns = patterns.iter().map(|p| p.to_string()).collect::<Vec<_>>();
        (PathMatcher::new(&patterns, &mut warnings), warnings)
    }

    #[test]
    fn plain_names_match_whole_segments_only() {
        let (matcher, _) = matcher(&["Thumbs"]);
        assert!(matcher.matches(Path::new("/photos/thumbs/cat.jpg")));
        assert!(!matcher.matches(Path::new("/photos/thumbsup/cat.jpg")));
    }

    #[test]
    fn paths_with_separators_are_prefixes() {
        let (matcher, _) = matcher(&["/home/ana/Downloads"]);
        assert!(matcher.matches(Path::new("/home/ana/Downloads")));
        assert!(matcher.matches(Path::new("/home/ana/Downloads/setup.iso")));
        assert!(!matcher.matches(Path::new("/home/ana/Downloads-old/setup.iso")));
    }

    #[test]
    fn globs_apply_and_bad_globs_warn() {
        let (matcher, warnings) = matcher(&["**/*.part", "[unclosed"]);
        assert!(matcher.matches(Path::new("/media/show.mkv.part")));
        assert!(!matcher.matches(Path::new("/media/show.mkv")));
        assert_eq!(warnings.len(), 1);
        assert!(!matcher.is_empty());
        assert!(PathMatcher::default().is_empty());
    }
}

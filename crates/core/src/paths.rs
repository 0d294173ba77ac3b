//! Path helpers shared by the engines.
//!
//! Records may come from any platform, so segments are split on both `/` and
//! `\`. Comparison is case-sensitive except for drive letters.

use std::path::{Path, PathBuf};

pub fn segments(path: &Path) -> Vec<String> {
    path.to_string_lossy()
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .map(str::to_string)
        .collect()
}

/// Normalized key used to compare paths for equality and containment.
pub fn path_key(path: &Path) -> String {
    let text = path.to_string_lossy();
    let rooted = text.starts_with('/') || text.starts_with('\\');
    let joined = segments(path)
        .iter()
        .map(|segment| segment_key(segment))
        .collect::<Vec<_>>()
        .join("/");
    if rooted {
        format!("/{joined}")
    } else {
        joined
    }
}

// `C:` and `c:` name the same volume everywhere.
fn segment_key(segment: &str) -> String {
    if segment.len() == 2 && segment.ends_with(':') {
        segment.to_ascii_uppercase()
    } else {
        segment.to_string()
    }
}

fn same_segment(a: &str, b: &str) -> bool {
    segment_key(a) == segment_key(b)
}

pub fn depth(path: &Path) -> usize {
    segments(path).len()
}

/// True when `ancestor` strictly contains `descendant`.
pub fn is_ancestor(ancestor: &Path, descendant: &Path) -> bool {
    let outer = segments(ancestor);
    let inner = segments(descendant);
    outer.len() < inner.len()
        && outer
            .iter()
            .zip(inner.iter())
            .all(|(a, b)| same_segment(a, b))
}

pub fn is_same_or_ancestor(ancestor: &Path, descendant: &Path) -> bool {
    path_key(ancestor) == path_key(descendant) || is_ancestor(ancestor, descendant)
}

pub fn file_name(path: &Path) -> String {
    segments(path).pop().unwrap_or_default()
}

/// Parent directory, computed on the normalized segments.
pub fn parent(path: &Path) -> Option<PathBuf> {
    let text = path.to_string_lossy();
    let trimmed = text.trim_end_matches(['/', '\\']);
    let cut = trimmed.rfind(['/', '\\'])?;
    if cut == 0 {
        return Some(PathBuf::from(&trimmed[..1]));
    }
    Some(PathBuf::from(&trimmed[..cut]))
}

/// Every ancestor directory, nearest first.
pub fn ancestors(path: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut current = parent(path);
    while let Some(dir) = current {
        current = parent(&dir);
        if segments(&dir).is_empty() {
            break;
        }
        out.push(dir);
    }
    out
}

/// Splits a file name into stem and lowercase-preserving extension.
pub fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(index) if index > 0 && index + 1 < name.len() => {
            (&name[..index], Some(&name[index + 1..]))
        }
        _ => (name, None),
    }
}

pub fn extension_lower(path: &Path) -> Option<String> {
    let name = file_name(path);
    split_name(&name).1.map(str::to_lowercase)
}

/// `name (n).ext` next to the original.
pub fn uniquified(path: &Path, counter: u32) -> PathBuf {
    let name = file_name(path);
    let (stem, ext) = split_name(&name);
    let candidate = match ext {
        Some(ext) => format!("{stem} ({counter}).{ext}"),
        None => format!("{stem} ({counter})"),
    };
    match parent(path) {
        Some(dir) => dir.join(candidate),
        None => PathBuf::from(candidate),
    }
}

pub fn is_hidden(path: &Path) -> bool {
    segments(path)
        .iter()
        .any(|segment| segment.starts_with('.') && segment != "..")
}

/// Path of `path` below `root`, when `root` contains it.
pub fn relative_to(root: &Path, path: &Path) -> Option<Vec<String>> {
    let outer = segments(root);
    let inner = segments(path);
    if outer.len() > inner.len()
        || !outer
            .iter()
            .zip(inner.iter())
            .all(|(a, b)| same_segment(a, b))
    {
        return None;
    }
    Some(inner[outer.len()..].to_vec())
}

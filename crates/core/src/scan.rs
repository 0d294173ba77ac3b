//! Reference scanner producing [`FileRecord`]s from the local filesystem.
//!
//! The engines never call this themselves; the CLI and tests use it to build
//! a snapshot.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sysinfo::Disks;
use tracing::info;
use walkdir::WalkDir;

use crate::matcher::PathMatcher;
use crate::model::FileRecord;

const UNKNOWN_DISK: &str = "unknown";

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub paths: Vec<PathBuf>,
    pub max_depth: Option<usize>,
    pub excludes: Vec<String>,
    pub include_directories: bool,
    pub hash_contents: bool,
    /// Files smaller than this are left unhashed.
    pub hash_min_size: u64,
    pub cancel_flag: Option<Arc<AtomicBool>>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            max_depth: None,
            excludes: Vec::new(),
            include_directories: false,
            hash_contents: true,
            hash_min_size: 0,
            cancel_flag: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanOutput {
    pub records: Vec<FileRecord>,
    pub warnings: Vec<String>,
    pub cancelled: bool,
}

pub fn scan_paths(options: &ScanOptions) -> Result<ScanOutput> {
    scan_with_callback(options, |_| {})
}

/// Walks every root, handing each record to `on_record` as it is produced.
pub fn scan_with_callback<F>(options: &ScanOptions, mut on_record: F) -> Result<ScanOutput>
where
    F: FnMut(&FileRecord),
{
    if options.paths.is_empty() {
        return Err(anyhow!("at least one scan path is required"));
    }

    let mut output = ScanOutput::default();
    let excludes = PathMatcher::new(&options.excludes, &mut output.warnings);
    let mounts = mount_points();

    'roots: for root in &options.paths {
        if !root.exists() {
            output
                .warnings
                .push(format!("scan root {} does not exist", root.display()));
            continue;
        }
        let disk = match_disk_mount(root, &mounts).unwrap_or_else(|| UNKNOWN_DISK.to_string());

        let mut walker = WalkDir::new(root).follow_links(false);
        if let Some(depth) = options.max_depth {
            walker = walker.max_depth(depth);
        }
        let iter = walker
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !excludes.matches(entry.path()));

        for item in iter {
            if is_cancelled(options) {
                output.warnings.push(format!(
                    "scan cancelled while walking {}; snapshot is partial",
                    root.display()
                ));
                output.cancelled = true;
                break 'roots;
            }
            let entry = match item {
                Ok(entry) => entry,
                Err(err) => {
                    output
                        .warnings
                        .push(format!("walk error under {}: {}", root.display(), err));
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }
            let is_dir = entry.file_type().is_dir();
            if is_dir && !options.include_directories {
                continue;
            }
            if !is_dir && !entry.file_type().is_file() {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    output.warnings.push(format!(
                        "metadata read failed for {}: {}",
                        entry.path().display(),
                        err
                    ));
                    continue;
                }
            };

            let mut record = FileRecord::new(entry.path(), if is_dir { 0 } else { metadata.len() })
                .on_disk(disk.clone());
            record.created = metadata.created().ok().map(DateTime::<Utc>::from);
            record.modified = metadata.modified().ok().map(DateTime::<Utc>::from);
            record.is_directory = is_dir;

            if !is_dir && options.hash_contents && record.size_bytes >= options.hash_min_size {
                match hash_file(entry.path()) {
                    Ok(hash) => record.content_hash = Some(hash),
                    Err(err) => output.warnings.push(format!("{err:#}")),
                }
            }

            on_record(&record);
            output.records.push(record);
        }
    }

    info!(
        "scan finished: {} record(s) from {} root(s), {} warning(s)",
        output.records.len(),
        options.paths.len(),
        output.warnings.len()
    );
    Ok(output)
}

/// blake3 digest of the file contents as lowercase hex.
pub fn hash_file(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = blake3::Hasher::new();
    hasher
        .update_reader(file)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(hasher.finalize().to_hex().to_string())
}

fn mount_points() -> Vec<String> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .map(|disk| disk.mount_point().to_string_lossy().to_string())
        .collect()
}

fn match_disk_mount(path: &Path, mounts: &[String]) -> Option<String> {
    let mut best: Option<&String> = None;
    for mount in mounts {
        if !path.starts_with(Path::new(mount)) {
            continue;
        }
        match best {
            Some(current) if current.len() >= mount.len() => {}
            _ => best = Some(mount),
        }
    }
    best.cloned()
}

fn is_cancelled(options: &ScanOptions) -> bool {
    options
        .cancel_flag
        .as_ref()
        .is_some_and(|flag| flag.load(Ordering::Relaxed))
}

//! Recursive inventory of the upload tree.
//!
//! There is no index: every listing and stats request walks the live tree.
//! Results are a snapshot, a file written while the walk runs may or may not
//! show up.

use std::cmp::Ordering;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Local};
use futures::{StreamExt, stream};
use kernel::{Dimensions, SortOrder};

use crate::codec::ImageCodec;
use crate::error::{Error, Result};
use crate::folder::DEFAULT_FOLDER;
use crate::naming::is_derivative;

/// Extensions the scanner picks up, compared case-insensitively.
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

const PROBE_CONCURRENCY: usize = 8;

/// Scan time view of one stored file. Recomputed on every scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub file_name: String,
    /// Path relative to the upload root, `/` separated
    pub relative_path: String,
    pub folder: String,
    pub size: u64,
    pub created: DateTime<Local>,
    /// Zero when not probed or when probing failed
    pub dimensions: Dimensions,
}

impl ImageRecord {
    #[must_use]
    pub fn is_derivative(&self) -> bool {
        is_derivative(&self.file_name)
    }
}

/// One page of a sorted sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub total_pages: usize,
}

#[must_use]
pub fn has_image_extension(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext))
        })
}

/// Sorts records in place: newest first, largest first or by name.
pub fn sort_records(records: &mut [ImageRecord], order: SortOrder) {
    match order {
        SortOrder::Date => records.sort_by(|a, b| b.created.cmp(&a.created)),
        SortOrder::Size => records.sort_by(|a, b| b.size.cmp(&a.size)),
        SortOrder::Name => records.sort_by(|a, b| compare_names(&a.file_name, &b.file_name)),
    }
}

fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

/// Cuts the 1-indexed `page` of `limit` items out of `items`.
///
/// A page past the end is empty, the last page may be short.
#[must_use]
pub fn paginate<T>(items: Vec<T>, page: u32, limit: u32) -> Page<T> {
    let total = items.len();
    let limit = limit.max(1) as usize;
    let start = (page.max(1) as usize - 1).saturating_mul(limit);
    Page {
        total,
        total_pages: total.div_ceil(limit),
        items: items.into_iter().skip(start).take(limit).collect(),
    }
}

/// Walks directory trees and optionally probes dimensions through the codec.
pub struct DirectoryScanner<C> {
    codec: Arc<C>,
}

impl<C: ImageCodec> DirectoryScanner<C> {
    #[must_use]
    pub fn new(codec: Arc<C>) -> Self {
        Self { codec }
    }

    /// Collects every image file under `root`, depth first.
    ///
    /// Relative paths and folders are computed against `relative_to`, which
    /// must be `root` or one of its ancestors. A missing `root` yields an empty
    /// inventory. Entries vanishing mid-walk are skipped. With
    /// `probe_dimensions` each file is probed; failures leave zero dimensions.
    ///
    /// # Errors
    ///
    /// [`Error::Storage`] when a directory or file cannot be read for reasons
    /// other than it having disappeared.
    pub async fn scan(
        &self,
        root: &Path,
        relative_to: &Path,
        probe_dimensions: bool,
    ) -> Result<Vec<ImageRecord>> {
        let mut records = Vec::new();
        if !tokio::fs::try_exists(root)
            .await
            .map_err(|e| Error::storage(root, e))?
        {
            return Ok(records);
        }

        let prefix = relative_prefix(root, relative_to);
        let mut pending: Vec<(PathBuf, String)> = vec![(root.to_path_buf(), prefix)];
        let mut files: Vec<(PathBuf, String)> = Vec::new();

        while let Some((dir, rel_dir)) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Error::storage(dir, e)),
            };

            let mut subdirs = Vec::new();
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Error::storage(&dir, e))?
            {
                let Ok(name) = entry.file_name().into_string() else {
                    tracing::debug!(dir = %dir.display(), "skipping non UTF-8 entry");
                    continue;
                };
                let file_type = match entry.file_type().await {
                    Ok(t) => t,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(Error::storage(entry.path(), e)),
                };
                let rel = join_relative(&rel_dir, &name);
                if file_type.is_dir() {
                    subdirs.push((entry.path(), rel));
                } else if file_type.is_file() && has_image_extension(&name) {
                    files.push((entry.path(), rel));
                }
            }
            // reversed so the stack pops them in directory order
            pending.extend(subdirs.into_iter().rev());
        }

        for (path, relative_path) in files {
            let meta = match tokio::fs::metadata(&path).await {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Error::storage(path, e)),
            };
            let created = meta
                .created()
                .or_else(|_| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            records.push(ImageRecord {
                file_name: file_name_of(&relative_path).to_owned(),
                folder: folder_of(&relative_path).to_owned(),
                relative_path,
                size: meta.len(),
                created: DateTime::<Local>::from(created),
                dimensions: Dimensions::default(),
            });
        }

        if probe_dimensions {
            self.probe_all(root, relative_to, &mut records).await;
        }
        Ok(records)
    }

    async fn probe_all(&self, root: &Path, relative_to: &Path, records: &mut [ImageRecord]) {
        let paths: Vec<PathBuf> = records
            .iter()
            .map(|r| relative_to.join(&r.relative_path))
            .collect();
        let dimensions: Vec<Dimensions> = stream::iter(paths)
            .map(|path| self.probe(path))
            .buffered(PROBE_CONCURRENCY)
            .collect()
            .await;
        for (record, dims) in records.iter_mut().zip(dimensions) {
            record.dimensions = dims;
        }
        tracing::debug!(root = %root.display(), probed = records.len(), "dimensions probed");
    }

    async fn probe(&self, path: PathBuf) -> Dimensions {
        let codec = Arc::clone(&self.codec);
        let probed =
            tokio::task::spawn_blocking(move || codec.probe_file(&path).map_err(|e| (path, e)))
                .await;
        match probed {
            Ok(Ok(meta)) => Dimensions {
                width: meta.width,
                height: meta.height,
            },
            Ok(Err((path, e))) => {
                tracing::debug!(path = %path.display(), "probe failed: {e}");
                Dimensions::default()
            }
            Err(e) => {
                tracing::warn!("probe worker failed: {e}");
                Dimensions::default()
            }
        }
    }

    /// Scans `root` for originals and returns one sorted page of them.
    ///
    /// Only the records on the returned page are probed for dimensions.
    ///
    /// # Errors
    ///
    /// See [`DirectoryScanner::scan`].
    pub async fn list(
        &self,
        upload_root: &Path,
        root: &Path,
        order: SortOrder,
        page: u32,
        limit: u32,
    ) -> Result<Page<ImageRecord>> {
        let mut originals: Vec<ImageRecord> = self
            .scan(root, upload_root, false)
            .await?
            .into_iter()
            .filter(|r| !r.is_derivative())
            .collect();
        sort_records(&mut originals, order);
        let mut page = paginate(originals, page, limit);
        self.probe_all(root, upload_root, &mut page.items).await;
        Ok(page)
    }
}

fn relative_prefix(root: &Path, relative_to: &Path) -> String {
    root.strip_prefix(relative_to)
        .map(|rel| {
            rel.components()
                .filter_map(|c| c.as_os_str().to_str())
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default()
}

fn join_relative(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_owned()
    } else {
        format!("{dir}/{name}")
    }
}

fn file_name_of(relative_path: &str) -> &str {
    relative_path
        .rsplit_once('/')
        .map_or(relative_path, |(_, name)| name)
}

fn folder_of(relative_path: &str) -> &str {
    relative_path
        .split_once('/')
        .map_or(DEFAULT_FOLDER, |(first, _)| first)
}

//! Filesystem persistence of stored artifacts.
//!
//! Paths handed to [`FsStore`] are relative to the upload root and `/`
//! separated. Deleting goes through a bounded retry loop because a file that
//! was just read by the codec (a listing probe, an on-the-fly request) can
//! briefly refuse to be unlinked on some platforms.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::future::BoxFuture;

use crate::codec::CodecCache;
use crate::error::{Error, Result};

/// Upper bound of unlink attempts for one file.
pub const DELETE_ATTEMPTS: u32 = 5;

/// Base unit of the linear backoff between attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(100);

#[cfg(unix)]
const BUSY_OS_ERRORS: &[i32] = &[libc::EBUSY, libc::ETXTBSY];

// raw_os_error reports the Win32 code as i32, all of these fit
#[cfg(windows)]
#[allow(clippy::cast_possible_wrap)]
const BUSY_OS_ERRORS: &[i32] = &[
    windows_sys::Win32::Foundation::ERROR_SHARING_VIOLATION as i32,
    windows_sys::Win32::Foundation::ERROR_LOCK_VIOLATION as i32,
];

#[cfg(not(any(unix, windows)))]
const BUSY_OS_ERRORS: &[i32] = &[];

/// Returns `true` for "resource busy" class failures that are expected to clear.
#[must_use]
pub fn is_transient(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::ResourceBusy
        || error
            .raw_os_error()
            .is_some_and(|code| BUSY_OS_ERRORS.contains(&code))
}

/// The unlink primitive used by [`FsStore::delete`].
pub trait Unlink: Send + Sync {
    fn unlink<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<()>>;
}

/// Unlinks with `tokio::fs::remove_file`.
pub struct TokioUnlink;

impl Unlink for TokioUnlink {
    fn unlink<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(tokio::fs::remove_file(path))
    }
}

pub struct FsStore {
    root: PathBuf,
    unlink: Box<dyn Unlink>,
    backoff: Duration,
}

impl FsStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            unlink: Box::new(TokioUnlink),
            backoff: DEFAULT_BACKOFF,
        }
    }

    #[must_use]
    pub fn with_unlink(mut self, unlink: impl Unlink + 'static) -> Self {
        self.unlink = Box::new(unlink);
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a relative store path onto the filesystem.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for empty, absolute or backslash separated paths and
    /// for `.`, `..` or empty segments.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let valid = !relative.is_empty()
            && !relative.contains(['\\', '\0'])
            && relative
                .split('/')
                .all(|segment| !matches!(segment, "" | "." | ".."));
        if valid {
            Ok(self.root.join(relative))
        } else {
            Err(Error::Validation(format!("invalid relative path '{relative}'")))
        }
    }

    /// Writes `data` at `relative`, creating parent directories as needed.
    ///
    /// Returns the size reported by the filesystem after the write.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for a bad path, [`Error::Storage`] when a directory
    /// cannot be created, the write fails or the file cannot be stat'd.
    pub async fn save(&self, data: &[u8], relative: &str) -> Result<u64> {
        let path = self.resolve(relative)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::storage(parent, e))?;
        }
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| Error::storage(&path, e))?;
        let stat = tokio::fs::metadata(&path)
            .await
            .map_err(|e| Error::storage(&path, e))?;
        Ok(stat.len())
    }

    /// Returns `true` when `relative` names an existing file.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for a bad path, [`Error::Storage`] when existence
    /// cannot be determined.
    pub async fn exists(&self, relative: &str) -> Result<bool> {
        let path = self.resolve(relative)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| Error::storage(&path, e))
    }

    /// Removes the file at `relative`.
    ///
    /// Returns `false` without retrying when the file does not exist. Each
    /// attempt holds `cache` so the codec drops its entries and stops caching
    /// for the duration of the unlink. Transient busy failures are retried up
    /// to [`DELETE_ATTEMPTS`] times, waiting `backoff * attempt` in between.
    ///
    /// # Errors
    ///
    /// [`Error::Storage`] with the last failure once attempts are exhausted, or
    /// immediately for any non transient failure.
    pub async fn delete(&self, relative: &str, cache: &CodecCache) -> Result<bool> {
        let path = self.resolve(relative)?;
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| Error::storage(&path, e))?;
        if !exists {
            return Ok(false);
        }

        let mut attempt = 1;
        loop {
            let outcome = {
                let _hold = cache.hold();
                self.unlink.unlink(&path).await
            };
            match outcome {
                Ok(()) => {
                    if attempt > 1 {
                        tracing::info!(path = %path.display(), attempt, "file deleted after retry");
                    }
                    return Ok(true);
                }
                // somebody else removed it in between
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
                Err(e) if is_transient(&e) && attempt < DELETE_ATTEMPTS => {
                    let wait = self.backoff * attempt;
                    tracing::warn!(
                        path = %path.display(),
                        attempt,
                        wait_ms = wait.as_millis(),
                        "file busy, retrying delete: {e}"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(Error::storage(path, e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct TempRoot(PathBuf);

    impl TempRoot {
        fn new() -> Self {
            let root = std::env::temp_dir().join(format!("imgstore_fs_{}", uuid::Uuid::new_v4()));
            std::fs::create_dir_all(&root).unwrap();
            Self(root)
        }
    }

    impl Drop for TempRoot {
        fn drop(&mut self) {
            std::fs::remove_dir_all(&self.0).unwrap_or_default();
        }
    }

    /// Fails the first `failures` calls with `kind`, then really unlinks.
    struct FlakyUnlink {
        failures: u32,
        kind: io::ErrorKind,
        calls: Arc<AtomicU32>,
        cache: Arc<CodecCache>,
        cache_was_enabled: Arc<AtomicBool>,
    }

    impl Unlink for FlakyUnlink {
        fn unlink<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<()>> {
            Box::pin(async move {
                if self.cache.is_enabled() {
                    self.cache_was_enabled.store(true, Ordering::SeqCst);
                }
                let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                if call <= self.failures {
                    Err(io::Error::new(self.kind, "simulated failure"))
                } else {
                    tokio::fs::remove_file(path).await
                }
            })
        }
    }

    struct Harness {
        store: FsStore,
        cache: Arc<CodecCache>,
        calls: Arc<AtomicU32>,
        cache_was_enabled: Arc<AtomicBool>,
        root: TempRoot,
    }

    fn harness(failures: u32, kind: io::ErrorKind) -> Harness {
        let root = TempRoot::new();
        let cache = Arc::new(CodecCache::default());
        let calls = Arc::new(AtomicU32::new(0));
        let cache_was_enabled = Arc::new(AtomicBool::new(false));
        let store = FsStore::new(&root.0)
            .with_backoff(Duration::from_millis(1))
            .with_unlink(FlakyUnlink {
                failures,
                kind,
                calls: Arc::clone(&calls),
                cache: Arc::clone(&cache),
                cache_was_enabled: Arc::clone(&cache_was_enabled),
            });
        Harness {
            store,
            cache,
            calls,
            cache_was_enabled,
            root,
        }
    }

    #[tokio::test]
    async fn save_creates_parents_and_reports_disk_size() {
        // Arrange
        let root = TempRoot::new();
        let store = FsStore::new(&root.0);

        // Act
        let size = store.save(b"0123456789", "blog/2026/10/a.webp").await.unwrap();

        // Assert
        assert_eq!(size, 10);
        assert!(root.0.join("blog").join("2026").join("10").join("a.webp").is_file());
    }

    #[tokio::test]
    async fn save_overwrites_existing_file() {
        // Arrange
        let root = TempRoot::new();
        let store = FsStore::new(&root.0);
        store.save(b"longer content", "a/b.webp").await.unwrap();

        // Act
        let size = store.save(b"short", "a/b.webp").await.unwrap();

        // Assert
        assert_eq!(size, 5);
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(4)]
    #[trace]
    #[tokio::test]
    async fn delete_succeeds_after_transient_failures(#[case] failures: u32) {
        // Arrange
        let h = harness(failures, io::ErrorKind::ResourceBusy);
        h.store.save(b"x", "f/a.webp").await.unwrap();

        // Act
        let deleted = h.store.delete("f/a.webp", &h.cache).await.unwrap();

        // Assert
        assert!(deleted);
        assert_eq!(h.calls.load(Ordering::SeqCst), failures + 1);
        assert!(!h.root.0.join("f").join("a.webp").exists());
        assert!(!h.cache_was_enabled.load(Ordering::SeqCst));
        assert!(h.cache.is_enabled());
    }

    #[tokio::test]
    async fn delete_gives_up_after_max_attempts() {
        // Arrange
        let h = harness(DELETE_ATTEMPTS, io::ErrorKind::ResourceBusy);
        h.store.save(b"x", "f/a.webp").await.unwrap();

        // Act
        let result = h.store.delete("f/a.webp", &h.cache).await;

        // Assert
        match result {
            Err(Error::Storage { source, .. }) => {
                assert_eq!(source.kind(), io::ErrorKind::ResourceBusy);
            }
            other => panic!("expected storage error, got {other:?}"),
        }
        assert_eq!(h.calls.load(Ordering::SeqCst), DELETE_ATTEMPTS);
        assert!(h.root.0.join("f").join("a.webp").exists());
        assert!(h.cache.is_enabled());
    }

    #[tokio::test]
    async fn delete_does_not_retry_permanent_failure() {
        // Arrange
        let h = harness(1, io::ErrorKind::PermissionDenied);
        h.store.save(b"x", "f/a.webp").await.unwrap();

        // Act
        let result = h.store.delete("f/a.webp", &h.cache).await;

        // Assert
        assert!(matches!(result, Err(Error::Storage { .. })));
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delete_missing_file_returns_false_without_attempts() {
        // Arrange
        let h = harness(0, io::ErrorKind::ResourceBusy);

        // Act
        let deleted = h.store.delete("f/missing.webp", &h.cache).await.unwrap();

        // Assert
        assert!(!deleted);
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn delete_with_real_unlink() {
        // Arrange
        let root = TempRoot::new();
        let store = FsStore::new(&root.0);
        let cache = CodecCache::default();
        store.save(b"x", "a.webp").await.unwrap();

        // Act
        let first = store.delete("a.webp", &cache).await.unwrap();
        let second = store.delete("a.webp", &cache).await.unwrap();

        // Assert
        assert!(first);
        assert!(!second);
    }

    #[rstest]
    #[case("")]
    #[case("/etc/passwd")]
    #[case("../outside.webp")]
    #[case("a/../../b.webp")]
    #[case("a//b.webp")]
    #[case("a/./b.webp")]
    #[case("a\\b.webp")]
    #[case("a/")]
    fn resolve_rejects(#[case] relative: &str) {
        // Arrange
        let store = FsStore::new("/srv/uploads");

        // Act
        let result = store.resolve(relative);

        // Assert
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn resolve_joins_root() {
        // Arrange
        let store = FsStore::new("/srv/uploads");

        // Act
        let path = store.resolve("blog/2026/10/a.webp").unwrap();

        // Assert
        assert_eq!(path, Path::new("/srv/uploads/blog/2026/10/a.webp"));
    }

    #[rstest]
    #[case(io::Error::new(io::ErrorKind::ResourceBusy, "busy"), true)]
    #[case(io::Error::new(io::ErrorKind::PermissionDenied, "denied"), false)]
    #[case(io::Error::new(io::ErrorKind::NotFound, "gone"), false)]
    fn transient_classification(#[case] error: io::Error, #[case] expected: bool) {
        assert_eq!(is_transient(&error), expected);
    }

    #[cfg(unix)]
    #[test]
    fn raw_busy_codes_are_transient() {
        assert!(is_transient(&io::Error::from_raw_os_error(libc::EBUSY)));
        assert!(is_transient(&io::Error::from_raw_os_error(libc::ETXTBSY)));
        assert!(!is_transient(&io::Error::from_raw_os_error(libc::EACCES)));
    }
}

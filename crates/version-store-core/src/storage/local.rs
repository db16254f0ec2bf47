//! Local filesystem backend.
//!
//! Each key maps to a file under the store root. Replacing writes go through a
//! temporary file that is synced and then renamed into place, so readers
//! never observe a torn blob. Create-only writes rely on `O_EXCL`-style
//! create-new opens, which is what makes version numbers unique even across
//! processes sharing the directory.

use std::{
    io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;
use snafu::{Backtrace, prelude::*};
use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};

use super::{
    SegmentStore, StorageResult, validate_key,
    error::{AlreadyExistsSnafu, BackendError, NotFoundSnafu, OtherIoSnafu, StorageError},
};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A [`SegmentStore`] rooted at a local directory.
#[derive(Debug)]
pub struct LocalStore {
    root: PathBuf,
    // Serializes read-compare-write cycles of `compare_and_swap` within
    // this process.
    cas_lock: Mutex<()>,
}

impl LocalStore {
    /// Creates a store rooted at `root`. The directory is created lazily on
    /// first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cas_lock: Mutex::new(()),
        }
    }

    /// The root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn abs_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        let mut path = self.root.clone();
        path.extend(key.split('/'));
        Ok(path)
    }
}

fn io_error(path: &Path, e: io::Error) -> StorageError {
    StorageError::OtherIo {
        key: path.display().to_string(),
        source: BackendError::Local(e),
        backtrace: Backtrace::capture(),
    }
}

async fn create_parent_dir(abs: &Path) -> StorageResult<()> {
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(BackendError::Local)
            .context(OtherIoSnafu {
                key: parent.display().to_string(),
            })?;
    }
    Ok(())
}

fn is_temp_file(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".tmp")
}

/// Guard that removes a temporary file on drop unless disarmed.
/// Used to ensure cleanup on error paths during atomic writes.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            // Best-effort; the original error is already being reported.
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

async fn write_atomic(abs: &Path, contents: &[u8]) -> StorageResult<()> {
    create_parent_dir(abs).await?;

    let file_name = abs
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let nonce = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_path = abs.with_file_name(format!(
        ".{file_name}.{}.{nonce}.tmp",
        std::process::id()
    ));
    let mut guard = TempFileGuard::new(tmp_path.clone());

    {
        let mut file = fs::File::create(&tmp_path)
            .await
            .map_err(|e| io_error(&tmp_path, e))?;
        file.write_all(contents)
            .await
            .map_err(|e| io_error(&tmp_path, e))?;
        file.sync_all().await.map_err(|e| io_error(&tmp_path, e))?;
    }

    fs::rename(&tmp_path, abs)
        .await
        .map_err(|e| io_error(abs, e))?;
    guard.disarm();
    Ok(())
}

async fn write_new(key: &str, abs: &Path, contents: &[u8]) -> StorageResult<()> {
    create_parent_dir(abs).await?;

    let mut file = match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(abs)
        .await
    {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return AlreadyExistsSnafu { key }.fail();
        }
        Err(e) => return Err(io_error(abs, e)),
    };

    // A failed write must not leave a partial record claiming the key.
    let mut guard = TempFileGuard::new(abs.to_path_buf());
    file.write_all(contents)
        .await
        .map_err(|e| io_error(abs, e))?;
    file.sync_all().await.map_err(|e| io_error(abs, e))?;
    guard.disarm();
    Ok(())
}

async fn read_optional(abs: &Path) -> StorageResult<Option<Vec<u8>>> {
    match fs::read(abs).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_error(abs, e)),
    }
}

#[async_trait]
impl SegmentStore for LocalStore {
    async fn put(&self, key: &str, value: Bytes) -> StorageResult<()> {
        let abs = self.abs_path(key)?;
        write_atomic(&abs, &value).await
    }

    async fn put_if_absent(&self, key: &str, value: Bytes) -> StorageResult<()> {
        let abs = self.abs_path(key)?;
        write_new(key, &abs, &value).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let abs = self.abs_path(key)?;
        match read_optional(&abs).await? {
            Some(bytes) => Ok(Bytes::from(bytes)),
            None => NotFoundSnafu { key }.fail(),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let abs = self.abs_path(key)?;
        match fs::remove_file(&abs).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&abs, e)),
        }
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        // Walk only the deepest directory fully named by the prefix.
        let dir_key = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };
        let start = if dir_key.is_empty() {
            self.root.clone()
        } else {
            self.abs_path(dir_key)?
        };

        let mut keys = Vec::new();
        let mut pending = vec![(start, dir_key.to_string())];

        while let Some((dir, dir_key)) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error(&dir, e)),
            };

            while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&dir, e))? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let key = if dir_key.is_empty() {
                    name.clone()
                } else {
                    format!("{dir_key}/{name}")
                };
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| io_error(&entry.path(), e))?;

                if file_type.is_dir() {
                    // Descend only where keys below could still match.
                    if key.starts_with(prefix) || prefix.starts_with(&format!("{key}/")) {
                        pending.push((entry.path(), key));
                    }
                } else if file_type.is_file() && !is_temp_file(&name) && key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Bytes,
    ) -> StorageResult<bool> {
        let abs = self.abs_path(key)?;
        let _held = self.cas_lock.lock().await;

        let current = read_optional(&abs).await?;
        if current.as_deref() != expected {
            return Ok(false);
        }
        write_atomic(&abs, &new).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[tokio::test]
    async fn put_creates_parent_directories() -> TestResult {
        let tmp = TempDir::new()?;
        let store = LocalStore::new(tmp.path());

        store
            .put("nested/deep/dir/file.txt", Bytes::from_static(b"nested"))
            .await?;

        let abs = tmp.path().join("nested/deep/dir/file.txt");
        assert_eq!(tokio::fs::read_to_string(&abs).await?, "nested");
        Ok(())
    }

    #[tokio::test]
    async fn put_overwrites_and_leaves_no_temp_file() -> TestResult {
        let tmp = TempDir::new()?;
        let store = LocalStore::new(tmp.path());

        store.put("a/HEAD", Bytes::from_static(b"0\n")).await?;
        store.put("a/HEAD", Bytes::from_static(b"1\n")).await?;

        assert_eq!(store.get("a/HEAD").await?, Bytes::from_static(b"1\n"));

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(tmp.path().join("a")).await?;
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["HEAD".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() -> TestResult {
        let tmp = TempDir::new()?;
        let store = LocalStore::new(tmp.path());

        let err = store.get("missing.json").await.expect_err("expected NotFound");
        assert!(err.is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn put_if_absent_refuses_to_overwrite() -> TestResult {
        let tmp = TempDir::new()?;
        let store = LocalStore::new(tmp.path());

        store
            .put_if_absent("v/0.json", Bytes::from_static(b"first"))
            .await?;
        let err = store
            .put_if_absent("v/0.json", Bytes::from_static(b"second"))
            .await
            .expect_err("expected AlreadyExists");
        assert!(err.is_already_exists());
        assert_eq!(store.get("v/0.json").await?, Bytes::from_static(b"first"));
        Ok(())
    }

    #[tokio::test]
    async fn delete_is_idempotent() -> TestResult {
        let tmp = TempDir::new()?;
        let store = LocalStore::new(tmp.path());

        store.put("x", Bytes::from_static(b"1")).await?;
        store.delete("x").await?;
        store.delete("x").await?;
        assert!(store.get("x").await.expect_err("gone").is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn list_filters_by_prefix_and_sorts() -> TestResult {
        let tmp = TempDir::new()?;
        let store = LocalStore::new(tmp.path());

        for key in [
            "versions/b/HEAD",
            "versions/a/00000000000000000001.json",
            "versions/a/00000000000000000000.json",
            "versions/a/HEAD",
            "versions/ab/HEAD",
            "snapshots/s.json",
        ] {
            store.put(key, Bytes::from_static(b"x")).await?;
        }

        assert_eq!(
            store.list("versions/a/").await?,
            vec![
                "versions/a/00000000000000000000.json".to_string(),
                "versions/a/00000000000000000001.json".to_string(),
                "versions/a/HEAD".to_string(),
            ]
        );
        assert_eq!(
            store.list("versions/a").await?,
            vec![
                "versions/a/00000000000000000000.json".to_string(),
                "versions/a/00000000000000000001.json".to_string(),
                "versions/a/HEAD".to_string(),
                "versions/ab/HEAD".to_string(),
            ]
        );
        assert_eq!(store.list("").await?.len(), 6);
        assert!(store.list("nothing/here/").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn compare_and_swap_checks_current_content() -> TestResult {
        let tmp = TempDir::new()?;
        let store = LocalStore::new(tmp.path());

        assert!(
            store
                .compare_and_swap("HEAD", None, Bytes::from_static(b"0\n"))
                .await?
        );
        assert!(
            !store
                .compare_and_swap("HEAD", None, Bytes::from_static(b"9\n"))
                .await?
        );
        assert!(
            !store
                .compare_and_swap("HEAD", Some(b"5\n"), Bytes::from_static(b"6\n"))
                .await?
        );
        assert!(
            store
                .compare_and_swap("HEAD", Some(b"0\n"), Bytes::from_static(b"1\n"))
                .await?
        );
        assert_eq!(store.get("HEAD").await?, Bytes::from_static(b"1\n"));
        Ok(())
    }

    #[tokio::test]
    async fn rejects_keys_escaping_the_root() -> TestResult {
        let tmp = TempDir::new()?;
        let store = LocalStore::new(tmp.path().join("root"));

        let err = store
            .put("../outside", Bytes::from_static(b"x"))
            .await
            .expect_err("expected InvalidKey");
        assert!(matches!(err, StorageError::InvalidKey { .. }));
        assert!(!tmp.path().join("outside").exists());
        Ok(())
    }
}

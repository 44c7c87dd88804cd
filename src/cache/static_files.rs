//! Directory-tree page store.
//!
//! Each page lives at `{root}/{sanitized path}/index.html`, which is the
//! layout the front-door rewrite rules look for. Entries never expire; they
//! stay until deleted or purged.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use super::keys::CacheKey;
use super::store::{StorageBackend, StorageError};

/// File name written inside each page directory.
pub const PAGE_FILE: &str = "index.html";

/// Page store rooted at a directory on local disk.
#[derive(Debug, Clone)]
pub struct StaticFileStore {
    root: PathBuf,
}

impl StaticFileStore {
    /// Open the store, creating the root directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        if root.as_os_str().is_empty() {
            return Err(StorageError::InvalidRoot(String::new()));
        }
        std::fs::create_dir_all(&root)?;
        if !root.is_dir() {
            return Err(StorageError::InvalidRoot(root.display().to_string()));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the page file for `key`. Always below [`Self::root`].
    pub fn file_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.static_dir()).join(PAGE_FILE)
    }

    /// Count page files currently on disk.
    fn count_pages(root: &Path) -> io::Result<usize> {
        let mut count = 0;
        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let file_type = entry.file_type()?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if file_type.is_file() && entry.file_name() == PAGE_FILE {
                    count += 1;
                }
            }
        }
        Ok(count)
    }
}

/// Write `body` to `target` through a temporary sibling and a rename, so a
/// reader sees either the previous file or the complete new one.
fn write_atomic(target: &Path, body: &[u8]) -> io::Result<()> {
    let dir = target
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "page path has no parent"))?;
    std::fs::create_dir_all(dir)?;

    let mut staged = tempfile::Builder::new()
        .prefix(".page-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    staged.write_all(body)?;
    staged.as_file().sync_all()?;
    staged.persist(target).map_err(|err| err.error)?;
    Ok(())
}

#[async_trait]
impl StorageBackend for StaticFileStore {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, StorageError> {
        match tokio::fs::read(self.file_path(key)).await {
            Ok(body) => Ok(Some(Bytes::from(body))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn put(
        &self,
        key: &CacheKey,
        body: Bytes,
        _ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let target = self.file_path(key);
        tokio::task::spawn_blocking(move || write_atomic(&target, &body)).await??;
        debug!(cache = "static", path = key.path(), "page file written");
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.file_path(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn purge_all(&self) -> Result<(), StorageError> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        tokio::fs::create_dir_all(&self.root).await?;
        debug!(cache = "static", root = %self.root.display(), "cache root recreated");
        Ok(())
    }

    fn entry_count(&self) -> Option<usize> {
        match Self::count_pages(&self.root) {
            Ok(count) => Some(count),
            Err(err) => {
                warn!(cache = "static", error = %err, "failed to count page files");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use tempfile::TempDir;

    use super::*;
    use crate::cache::keys::derive_key;

    fn store() -> (TempDir, StaticFileStore) {
        let dir = TempDir::new().expect("tempdir");
        let store = StaticFileStore::new(dir.path().join("pages")).expect("store");
        (dir, store)
    }

    #[tokio::test]
    async fn put_then_get_roundtrip() {
        let (_dir, store) = store();
        let key = derive_key("/posts/hello");

        assert!(store.get(&key).await.expect("get").is_none());
        store
            .put(&key, Bytes::from_static(b"<html>hello</html>"), None)
            .await
            .expect("put");

        assert_eq!(
            store.get(&key).await.expect("get"),
            Some(Bytes::from_static(b"<html>hello</html>"))
        );
        assert!(store.root().join("posts/hello/index.html").is_file());
    }

    #[tokio::test]
    async fn root_path_is_written_under_index() {
        let (_dir, store) = store();
        store
            .put(&derive_key("/"), Bytes::from_static(b"home"), None)
            .await
            .expect("put");
        assert!(store.root().join("index/index.html").is_file());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_dir, store) = store();
        let key = derive_key("/gone");

        store.put(&key, Bytes::from_static(b"x"), None).await.expect("put");
        store.delete(&key).await.expect("first delete");
        store.delete(&key).await.expect("second delete");
        assert!(store.get(&key).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn purge_empties_and_recreates_root() {
        let (_dir, store) = store();
        let paths = ["/", "/a", "/a/b", "/c"];
        for path in paths {
            store
                .put(&derive_key(path), Bytes::from(path.to_string()), None)
                .await
                .expect("put");
        }
        assert_eq!(store.entry_count(), Some(4));

        store.purge_all().await.expect("purge");

        assert!(store.root().is_dir());
        assert_eq!(store.entry_count(), Some(0));
        for path in paths {
            assert!(store.get(&derive_key(path)).await.expect("get").is_none());
        }
    }

    #[tokio::test]
    async fn traversal_stays_under_root() {
        let (dir, store) = store();
        let key = derive_key("/../../etc/passwd");

        store.put(&key, Bytes::from_static(b"x"), None).await.expect("put");

        let written = store.file_path(&key);
        assert!(written.starts_with(store.root()));
        assert!(written.is_file());
        assert!(!dir.path().join("etc").exists());
    }

    #[tokio::test]
    async fn leaves_no_temporary_files() {
        let (_dir, store) = store();
        let key = derive_key("/tidy");
        store.put(&key, Bytes::from_static(b"one"), None).await.expect("put");
        store.put(&key, Bytes::from_static(b"two"), None).await.expect("put");

        let names: Vec<_> = std::fs::read_dir(store.root().join("tidy"))
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from(PAGE_FILE)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_reader_never_sees_partial_page() {
        let (_dir, store) = store();
        let store = Arc::new(store);
        let key = derive_key("/busy");

        let small = Bytes::from(vec![b'a'; 64 * 1024]);
        let large = Bytes::from(vec![b'b'; 256 * 1024]);
        store.put(&key, small.clone(), None).await.expect("seed");

        let done = Arc::new(AtomicBool::new(false));
        let reader = {
            let store = store.clone();
            let key = key.clone();
            let done = done.clone();
            let (small, large) = (small.clone(), large.clone());
            tokio::spawn(async move {
                let mut reads = 0usize;
                while !done.load(Ordering::SeqCst) {
                    let body = store.get(&key).await.expect("get").expect("present");
                    assert!(body == small || body == large, "observed a partial page");
                    reads += 1;
                    tokio::task::yield_now().await;
                }
                reads
            })
        };

        for round in 0..40 {
            let body = if round % 2 == 0 { large.clone() } else { small.clone() };
            store.put(&key, body, None).await.expect("put");
        }
        done.store(true, Ordering::SeqCst);

        let reads = reader.await.expect("reader task");
        assert!(reads > 0);
    }

    #[test]
    fn empty_root_is_rejected() {
        assert!(matches!(
            StaticFileStore::new(""),
            Err(StorageError::InvalidRoot(_))
        ));
    }
}

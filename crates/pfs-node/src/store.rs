//! File-backed block store.

use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};

use crate::NodeError;

/// Stores each PFS file as one flat file under a root directory.
///
/// Reads past EOF and reads of missing files both behave as EOF: fewer
/// (possibly zero) bytes come back. Writes create the file on demand and
/// zero-fill any gap up to the write offset.
pub struct BlockStore {
    root: PathBuf,
}

impl BlockStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, NodeError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        log::info!("block store at {}", root.display());
        Ok(BlockStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, name: &str) -> Result<PathBuf, NodeError> {
        // File names are flat keys; anything path-like is rejected so a
        // client cannot escape the storage directory.
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains('/')
            || name.contains('\\')
        {
            return Err(NodeError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    /// Reads up to `size` bytes at `offset`. Short only at EOF.
    pub async fn read(&self, name: &str, offset: u64, size: u32) -> Result<Vec<u8>, NodeError> {
        let path = self.file_path(name)?;
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata().await?.len();
        if offset >= len {
            return Ok(Vec::new());
        }

        let available = (len - offset).min(size as u64) as usize;
        let mut data = vec![0u8; available];
        file.seek(SeekFrom::Start(offset)).await?;
        file.read_exact(&mut data).await?;
        Ok(data)
    }

    /// Writes `data` at `offset`, creating and extending the file as needed.
    pub async fn write(&self, name: &str, offset: u64, data: &[u8]) -> Result<u32, NodeError> {
        let path = self.file_path(name)?;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .await?;

        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(data.len() as u32)
    }

    /// Removes the backing file. Missing files are not an error.
    pub async fn delete(&self, name: &str) -> Result<(), NodeError> {
        let path = self.file_path(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> (tempfile::TempDir, BlockStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BlockStore::open(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (_dir, store) = temp_store().await;
        store.write("f", 0, b"hello").await.unwrap();
        assert_eq!(store.read("f", 0, 5).await.unwrap(), b"hello");
        assert_eq!(store.read("f", 1, 3).await.unwrap(), b"ell");
    }

    #[tokio::test]
    async fn test_read_is_short_only_at_eof() {
        let (_dir, store) = temp_store().await;
        store.write("f", 0, b"abc").await.unwrap();
        assert_eq!(store.read("f", 0, 100).await.unwrap(), b"abc");
        assert_eq!(store.read("f", 3, 100).await.unwrap(), b"");
        assert_eq!(store.read("missing", 0, 4).await.unwrap(), b"");
    }

    #[tokio::test]
    async fn test_gap_write_zero_fills() {
        let (_dir, store) = temp_store().await;
        store.write("f", 8, b"xy").await.unwrap();
        assert_eq!(store.read("f", 0, 10).await.unwrap(), b"\0\0\0\0\0\0\0\0xy");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_dir, store) = temp_store().await;
        store.write("f", 0, b"data").await.unwrap();
        store.delete("f").await.unwrap();
        store.delete("f").await.unwrap();
        assert_eq!(store.read("f", 0, 4).await.unwrap(), b"");
    }

    #[tokio::test]
    async fn test_path_like_names_are_rejected() {
        let (_dir, store) = temp_store().await;
        assert!(store.read("../escape", 0, 1).await.is_err());
        assert!(store.write("a/b", 0, b"x").await.is_err());
        assert!(store.delete("").await.is_err());
    }
}

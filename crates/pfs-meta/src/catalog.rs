//! File catalog: name → metadata.

use std::collections::HashMap;

use parking_lot::RwLock;

use pfs_msg::FileMetadata;
use time::OffsetDateTime;

use crate::{MetaError, Result};

/// The authoritative metadata map.
///
/// Guarded by a shared/exclusive lock: fetches run concurrently, mutations
/// are exclusive. Where a mutation must also consult the token table (file
/// deletion), the catalog lock is taken first; the token table lock is only
/// ever taken inside it, never the reverse.
pub struct Catalog {
    files: RwLock<HashMap<String, FileMetadata>>,
    /// Highest stripe width accepted at creation = number of storage nodes.
    max_stripe_width: u32,
}

impl Catalog {
    pub fn new(max_stripe_width: u32) -> Self {
        Catalog {
            files: RwLock::new(HashMap::new()),
            max_stripe_width,
        }
    }

    /// Creates a file entry with size 0 and a fresh creation timestamp.
    pub fn create(&self, name: &str, stripe_width: u32) -> Result<()> {
        if name.is_empty() {
            return Err(MetaError::InvalidArgument("empty file name".to_string()));
        }
        if stripe_width == 0 || stripe_width > self.max_stripe_width {
            return Err(MetaError::InvalidArgument(format!(
                "stripe width {stripe_width} not in [1, {}]",
                self.max_stripe_width
            )));
        }

        let mut files = self.files.write();
        if files.contains_key(name) {
            return Err(MetaError::AlreadyExists(name.to_string()));
        }

        files.insert(
            name.to_string(),
            FileMetadata {
                name: name.into(),
                size: 0,
                ctime: OffsetDateTime::now_utc().unix_timestamp(),
                mtime: 0,
                stripe_width,
            },
        );
        log::info!("created file {name:?} with stripe width {stripe_width}");
        Ok(())
    }

    /// Returns a snapshot of the file's metadata.
    pub fn fetch(&self, name: &str) -> Result<FileMetadata> {
        self.files
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| MetaError::NotFound(name.to_string()))
    }

    /// Applies a client-reported write completion: the size only ever grows,
    /// and `mtime` is overwritten when positive. This is the single path by
    /// which a file's size changes.
    pub fn update(&self, name: &str, size: u64, mtime: i64) -> Result<()> {
        let mut files = self.files.write();
        let meta = files
            .get_mut(name)
            .ok_or_else(|| MetaError::NotFound(name.to_string()))?;

        meta.size = meta.size.max(size);
        if mtime > 0 {
            meta.mtime = mtime;
        }
        log::debug!(
            "updated file {name:?}: size {} mtime {}",
            meta.size,
            meta.mtime
        );
        Ok(())
    }

    /// Removes the entry if `allowed` reports no live tokens for the file.
    /// `allowed` is evaluated under the exclusive catalog lock so no token
    /// can be granted between the check and the removal.
    pub fn remove_if<F>(&self, name: &str, allowed: F) -> Result<()>
    where
        F: FnOnce() -> bool,
    {
        let mut files = self.files.write();
        if !files.contains_key(name) {
            return Err(MetaError::NotFound(name.to_string()));
        }
        if !allowed() {
            return Err(MetaError::Busy(name.to_string()));
        }
        files.remove(name);
        log::info!("deleted file {name:?}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_fetch() {
        let catalog = Catalog::new(4);
        catalog.create("t", 3).unwrap();
        let meta = catalog.fetch("t").unwrap();
        assert_eq!(meta.name, "t");
        assert_eq!(meta.size, 0);
        assert_eq!(meta.mtime, 0);
        assert_eq!(meta.stripe_width, 3);
        assert!(meta.ctime > 0);
    }

    #[test]
    fn test_create_validates_arguments() {
        let catalog = Catalog::new(4);
        assert!(matches!(
            catalog.create("", 1),
            Err(MetaError::InvalidArgument(_))
        ));
        assert!(matches!(
            catalog.create("t", 0),
            Err(MetaError::InvalidArgument(_))
        ));
        assert!(matches!(
            catalog.create("t", 5),
            Err(MetaError::InvalidArgument(_))
        ));

        catalog.create("t", 4).unwrap();
        assert!(matches!(
            catalog.create("t", 2),
            Err(MetaError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_update_size_is_monotonic() {
        let catalog = Catalog::new(4);
        catalog.create("t", 1).unwrap();

        catalog.update("t", 100, 7).unwrap();
        assert_eq!(catalog.fetch("t").unwrap().size, 100);

        // A smaller reported size never shrinks the file.
        catalog.update("t", 40, 9).unwrap();
        let meta = catalog.fetch("t").unwrap();
        assert_eq!(meta.size, 100);
        assert_eq!(meta.mtime, 9);

        // mtime 0 means "unchanged".
        catalog.update("t", 120, 0).unwrap();
        let meta = catalog.fetch("t").unwrap();
        assert_eq!(meta.size, 120);
        assert_eq!(meta.mtime, 9);

        assert!(matches!(
            catalog.update("missing", 1, 1),
            Err(MetaError::NotFound(_))
        ));
    }

    #[test]
    fn test_remove_if_honors_token_guard() {
        let catalog = Catalog::new(4);
        catalog.create("g", 1).unwrap();

        assert!(matches!(
            catalog.remove_if("g", || false),
            Err(MetaError::Busy(_))
        ));
        assert!(catalog.fetch("g").is_ok());

        catalog.remove_if("g", || true).unwrap();
        assert!(matches!(catalog.fetch("g"), Err(MetaError::NotFound(_))));
        assert!(matches!(
            catalog.remove_if("g", || true),
            Err(MetaError::NotFound(_))
        ));
    }
}

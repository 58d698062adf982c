//! Directory store
//!
//! One flat directory, one file per blob, named by the hex digest. Writes go
//! through a temporary name and rename into place so a crashed put never
//! leaves a plausible-looking partial blob under a valid digest name.

use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::checksum::Digest;
use crate::error::{Error, Result};

use super::{LsEntry, Store};

/// A store writing each blob to a file in one directory
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn blob_path(&self, hash: &Digest) -> PathBuf {
        self.root.join(hash.to_hex())
    }
}

#[async_trait]
impl Store for DirStore {
    async fn put(&self, hash: &Digest, data: Bytes) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        let tmp = self.root.join(format!("{}.tmp", hash.to_hex()));
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        fs::rename(&tmp, self.blob_path(hash)).await?;
        Ok(())
    }

    async fn get(&self, hash: &Digest) -> Result<Bytes> {
        match fs::read(self.blob_path(hash)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::MissingData(format!(
                "{} not in {}",
                hash,
                self.root.display()
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn ls(&self) -> Result<Vec<LsEntry>> {
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            // An absent directory is an empty store, not an error.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let name = item.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            // Non-digest names (temp files, strays) are not blobs.
            let Ok(hash) = Digest::from_hex(name) else {
                continue;
            };
            let meta = item.metadata().await?;
            entries.push(LsEntry {
                hash,
                size: meta.len(),
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let root = tempfile::tempdir().unwrap();
        let store = DirStore::new(root.path());
        let hash = Digest::sum(b"on disk");

        store
            .put(&hash, Bytes::from_static(b"on disk"))
            .await
            .unwrap();
        assert_eq!(store.get(&hash).await.unwrap().as_ref(), b"on disk");
    }

    #[tokio::test]
    async fn test_ls_skips_non_digest_names() {
        let root = tempfile::tempdir().unwrap();
        let store = DirStore::new(root.path());
        let hash = Digest::sum(b"listed");
        store
            .put(&hash, Bytes::from_static(b"listed"))
            .await
            .unwrap();
        fs::write(root.path().join("stray.txt"), b"ignore me")
            .await
            .unwrap();

        let entries = store.ls().await.unwrap();
        assert_eq!(entries, vec![LsEntry { hash, size: 6 }]);
    }

    #[tokio::test]
    async fn test_absent_blob_and_absent_dir() {
        let root = tempfile::tempdir().unwrap();
        let store = DirStore::new(root.path().join("never-created"));

        assert!(store.ls().await.unwrap().is_empty());
        assert_matches!(
            store.get(&Digest::sum(b"nope")).await,
            Err(Error::MissingData(_))
        );
    }
}

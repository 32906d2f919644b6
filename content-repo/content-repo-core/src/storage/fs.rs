//! Content store backed by a directory tree.
//!
//! Collections map to directories and documents to files below
//! `content_dir`. Trashed subtrees are renamed into `trash_dir` under their
//! trash id, so `content_dir` and `trash_dir` must live on one filesystem.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path as FsPath, PathBuf};
use tokio::fs;
use tokio::io::AsyncRead;
use walkdir::WalkDir;

use super::ContentStore;
use crate::path::Path;

pub struct FsContentStore {
    content_dir: PathBuf,
    trash_dir: PathBuf,
}

impl FsContentStore {
    pub async fn open(content_dir: impl Into<PathBuf>, trash_dir: impl Into<PathBuf>) -> Result<Self> {
        let content_dir = content_dir.into();
        let trash_dir = trash_dir.into();
        fs::create_dir_all(&content_dir).await?;
        fs::create_dir_all(&trash_dir).await?;
        Ok(Self { content_dir, trash_dir })
    }

    fn local(&self, uri: &Path) -> PathBuf {
        self.content_dir.join(uri.as_str().trim_start_matches('/'))
    }

    fn trashed(&self, trash_id: &str) -> PathBuf {
        self.trash_dir.join(trash_id)
    }

    async fn remove(path: &FsPath) -> Result<()> {
        match fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).await?,
            Ok(_) => fs::remove_file(path).await?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn copy_tree(from: &FsPath, to: &FsPath) -> Result<()> {
        for entry in WalkDir::new(from).into_iter() {
            let entry = entry?;
            let relative = entry.path().strip_prefix(from)?;
            let target = to.join(relative);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target).await?;
            } else {
                fs::copy(entry.path(), &target).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn create_resource(&self, uri: &Path, collection: bool) -> Result<()> {
        let local = self.local(uri);
        if collection {
            fs::create_dir_all(&local).await?;
        } else {
            fs::File::create(&local).await?;
        }
        Ok(())
    }

    async fn store_content(&self, uri: &Path, content: &mut (dyn AsyncRead + Send + Unpin)) -> Result<u64> {
        let local = self.local(uri);
        if fs::metadata(&local).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(anyhow!("{} is a collection", uri));
        }
        let mut file = fs::File::create(&local).await?;
        let written = tokio::io::copy(content, &mut file).await?;
        file.sync_all().await?;
        Ok(written)
    }

    async fn get_content(&self, uri: &Path) -> Result<Bytes> {
        Ok(Bytes::from(fs::read(self.local(uri)).await?))
    }

    async fn content_length(&self, uri: &Path) -> Result<u64> {
        let meta = fs::metadata(self.local(uri)).await?;
        Ok(if meta.is_dir() { 0 } else { meta.len() })
    }

    async fn delete_resource(&self, uri: &Path) -> Result<()> {
        Self::remove(&self.local(uri)).await
    }

    async fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        Self::copy_tree(&self.local(from), &self.local(to)).await
    }

    async fn move_to(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(self.local(from), self.local(to)).await?;
        Ok(())
    }

    async fn trash(&self, uri: &Path, trash_id: &str) -> Result<()> {
        let target = self.trashed(trash_id);
        Self::remove(&target).await?;
        fs::rename(self.local(uri), target).await?;
        Ok(())
    }

    async fn recover(&self, destination: &Path, trash_id: &str) -> Result<()> {
        fs::rename(self.trashed(trash_id), self.local(destination)).await?;
        Ok(())
    }

    async fn delete_recoverable(&self, trash_id: &str) -> Result<()> {
        Self::remove(&self.trashed(trash_id)).await
    }
}

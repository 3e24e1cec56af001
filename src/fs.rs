use std::{
    path::{Component, Path, PathBuf},
    process,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;

use crate::{error::SinkError, sink::ObjectStore};

/// An object store backed by a local directory.
///
/// Objects live at `{root}/{namespace}/{path}`. Writes go to a temporary file which is then renamed
/// into place, so readers never see a partial object.
#[derive(Debug)]
pub struct FsObjectStore {
    root: PathBuf,
    tmp_counter: AtomicU64,
}

impl FsObjectStore {
    /// Store objects for `namespace` under `root`.
    pub fn new(root: impl AsRef<Path>, namespace: &str) -> Self {
        Self {
            root: root.as_ref().join(namespace),
            tmp_counter: AtomicU64::new(0),
        }
    }

    /// The directory objects are stored in.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, path: &str) -> Result<PathBuf, SinkError> {
        let relative = Path::new(path);
        let safe = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(SinkError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid object path: {path:?}"),
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, path: &str, content: Vec<u8>) -> Result<(), SinkError> {
        let target = self.object_path(path)?;
        let parent = target.parent().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path must have parent")
        })?;
        tokio::fs::create_dir_all(parent).await?;

        let file_name = target
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "bad filename"))?;
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp = target.with_file_name(format!(".{file_name}.tmp.{}.{n}", process::id()));

        tokio::fs::write(&tmp, &content).await?;
        if let Err(err) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, SinkError> {
        let target = self.object_path(path)?;
        Ok(tokio::fs::try_exists(target).await?)
    }
}

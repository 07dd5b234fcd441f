use anyhow::anyhow;
use async_trait::async_trait;
use log::debug;
use std::path::{Component, Path, PathBuf};

/// Where receipt photos end up, the returned location is stored on the receipt
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn put(&self, key: &str, content_type: &str, bytes: &[u8]) -> Result<String, anyhow::Error>;
    async fn delete(&self, location: &str) -> Result<(), anyhow::Error>;
}

/// Writes photos under a local folder, one sub folder per team
#[derive(Debug, Clone)]
pub struct FileImageStore {
    root: PathBuf,
}

impl FileImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, anyhow::Error> {
        let relative = Path::new(key);
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(anyhow!("invalid image key: {}", key));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ImageStore for FileImageStore {
    async fn put(&self, key: &str, content_type: &str, bytes: &[u8]) -> Result<String, anyhow::Error> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        debug!(
            "stored {} byte {} image at {}",
            bytes.len(),
            content_type,
            path.display()
        );
        Ok(key.to_string())
    }

    async fn delete(&self, location: &str) -> Result<(), anyhow::Error> {
        let path = self.path_for(location)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

pub fn create_folder(root_path: &str) -> Result<(), anyhow::Error> {
    let path = Path::new(root_path);
    if !path.exists() || !path.is_dir() {
        std::fs::create_dir_all(path)
            .map_err(|e| anyhow!("failed to create folder {}: {}", root_path, e))?;
    }
    Ok(())
}

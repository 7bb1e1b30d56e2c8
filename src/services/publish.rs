use crate::core::config::Config;
use crate::core::io::{copy_dir_all, path_str, NativeStorage, Storage};
use crate::core::state::EpisodeMeta;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Durable home for finished episodes.
#[async_trait]
pub trait EpisodePublisher: Send + Sync {
    /// Copies the working directory and returns where it landed.
    async fn upload_episode(&self, local_dir: &Path, episode_id: &str) -> Result<String>;
    async fn download_episode(&self, episode_id: &str, local_dir: &Path) -> Result<PathBuf>;
    async fn episode_exists(&self, episode_id: &str) -> Result<bool>;
    async fn list_episodes(&self) -> Result<Vec<String>>;
    async fn delete_episode(&self, episode_id: &str) -> Result<bool>;
    async fn episode_meta(&self, episode_id: &str) -> Result<Option<EpisodeMeta>>;
}

pub fn create_publisher(config: &Config) -> Result<Box<dyn EpisodePublisher>> {
    match config.storage.provider.as_str() {
        "local" => Ok(Box::new(LocalPublisher::new(
            config.storage.scenes_dir.clone(),
            Arc::new(NativeStorage::new()),
        ))),
        _ => Err(anyhow!("Unknown storage provider: {}", config.storage.provider)),
    }
}

/// Publishes into `<scenes_dir>/<id>/` on the local filesystem.
pub struct LocalPublisher {
    base_dir: PathBuf,
    storage: Arc<dyn Storage>,
}

impl LocalPublisher {
    pub fn new(base_dir: PathBuf, storage: Arc<dyn Storage>) -> Self {
        Self { base_dir, storage }
    }

    fn episode_dir(&self, episode_id: &str) -> PathBuf {
        self.base_dir.join(episode_id)
    }

    fn meta_path(&self, episode_id: &str) -> String {
        path_str(&self.episode_dir(episode_id).join("meta.json"))
    }
}

#[async_trait]
impl EpisodePublisher for LocalPublisher {
    async fn upload_episode(&self, local_dir: &Path, episode_id: &str) -> Result<String> {
        let dest = self.episode_dir(episode_id);
        self.storage.delete(&path_str(&dest)).await?;
        let copied = copy_dir_all(local_dir, &dest)
            .await
            .with_context(|| format!("Failed to publish episode {}", episode_id))?;
        info!("Published {} file(s) to {}", copied, dest.display());
        Ok(path_str(&dest))
    }

    async fn download_episode(&self, episode_id: &str, local_dir: &Path) -> Result<PathBuf> {
        let src = self.episode_dir(episode_id);
        if !self.storage.exists(&path_str(&src)).await? {
            bail!("Episode not found: {}", episode_id);
        }
        let dest = local_dir.join(episode_id);
        copy_dir_all(&src, &dest).await?;
        Ok(dest)
    }

    async fn episode_exists(&self, episode_id: &str) -> Result<bool> {
        self.storage.exists(&self.meta_path(episode_id)).await
    }

    async fn list_episodes(&self) -> Result<Vec<String>> {
        let mut episodes = Vec::new();
        for entry in self.storage.list(&path_str(&self.base_dir)).await? {
            let path = Path::new(&entry);
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if self.episode_exists(name).await? {
                episodes.push(name.to_string());
            }
        }
        episodes.sort();
        Ok(episodes)
    }

    async fn delete_episode(&self, episode_id: &str) -> Result<bool> {
        let dir = path_str(&self.episode_dir(episode_id));
        if !self.storage.exists(&dir).await? {
            return Ok(false);
        }
        self.storage.delete(&dir).await?;
        Ok(true)
    }

    async fn episode_meta(&self, episode_id: &str) -> Result<Option<EpisodeMeta>> {
        let path = self.meta_path(episode_id);
        if !self.storage.exists(&path).await? {
            return Ok(None);
        }
        let content = self.storage.read_to_string(&path).await?;
        let meta = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path))?;
        Ok(Some(meta))
    }
}

//! On-disk checkpoint of an episode in progress.
//!
//! ```text
//! <root>/<uuid>/meta.json
//! <root>/<uuid>/outline.txt
//! <root>/<uuid>/episode-script.txt
//! <root>/<uuid>/assets/sfx/dialog-<n>.mp3
//! <root>/<uuid>/manifest.json
//! ```
//!
//! `meta.json` is written last, through a temporary file and a rename, so a
//! checkpoint interrupted halfway still loads as the previous step.

use crate::core::error::{PipelineError, PipelineResult};
use crate::core::io::{path_str, Storage};
use crate::core::state::{Episode, EpisodeMeta, EpisodeStatus};
use crate::services::outline::OutlineParser;
use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, info, warn};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

pub const META_FILE: &str = "meta.json";
pub const OUTLINE_FILE: &str = "outline.txt";
pub const SCRIPT_FILE: &str = "episode-script.txt";
pub const SFX_DIR: &str = "assets/sfx";

/// Row returned by [`EpisodeStateStore::list_incomplete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeSummary {
    pub id: String,
    pub status: EpisodeStatus,
    pub title: Option<String>,
}

// Only the fields listing needs; the rest of meta.json is ignored.
#[derive(Deserialize)]
struct MetaProjection {
    #[serde(default)]
    status: EpisodeStatus,
    title: Option<String>,
}

pub struct EpisodeStateStore {
    root: PathBuf,
    storage: Arc<dyn Storage>,
    outline_parser: OutlineParser,
}

impl EpisodeStateStore {
    pub fn new(root: PathBuf, storage: Arc<dyn Storage>) -> Self {
        Self {
            root,
            storage,
            outline_parser: OutlineParser::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    pub fn episode_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    fn file(&self, id: &str, name: &str) -> String {
        path_str(&self.episode_dir(id).join(name))
    }

    /// Allocates a fresh episode and writes its first checkpoint.
    pub async fn create(&self, topic: Option<String>, model: Option<String>) -> Result<Episode> {
        let mut episode = Episode::new(topic);
        episode.meta.model_used = model;
        self.save(&mut episode).await?;
        info!("Created episode {}", episode.id_str());
        Ok(episode)
    }

    pub async fn save(&self, episode: &mut Episode) -> Result<()> {
        let id = episode.id_str();
        let dir = self.episode_dir(&id);
        episode.work_dir = Some(dir.clone());
        episode.meta.updated_at = Some(Utc::now());

        if let Some(outline) = &episode.outline {
            self.storage
                .write(&self.file(&id, OUTLINE_FILE), outline.raw_text.as_bytes())
                .await?;
        }
        if let Some(script) = &episode.script_raw {
            self.storage
                .write(&self.file(&id, SCRIPT_FILE), script.as_bytes())
                .await?;
        }

        let meta_path = self.file(&id, META_FILE);
        let tmp_path = format!("{}.tmp", meta_path);
        let json = serde_json::to_string_pretty(&episode.meta)?;
        self.storage.write(&tmp_path, json.as_bytes()).await?;
        self.storage.rename(&tmp_path, &meta_path).await?;

        debug!("Checkpoint saved for {} ({})", id, episode.status());
        Ok(())
    }

    pub async fn load(&self, id: &str) -> PipelineResult<Episode> {
        let meta_path = self.file(id, META_FILE);
        if !self.storage.exists(&meta_path).await? {
            return Err(PipelineError::NotFound(id.to_string()));
        }

        let content = self.storage.read_to_string(&meta_path).await?;
        let meta: EpisodeMeta = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", meta_path))?;

        let outline_path = self.file(id, OUTLINE_FILE);
        let outline = if self.storage.exists(&outline_path).await? {
            let text = self.storage.read_to_string(&outline_path).await?;
            Some(self.outline_parser.parse(&text))
        } else {
            None
        };

        let script_path = self.file(id, SCRIPT_FILE);
        let script_raw = if self.storage.exists(&script_path).await? {
            Some(self.storage.read_to_string(&script_path).await?)
        } else {
            None
        };

        Ok(Episode {
            meta,
            outline,
            script_raw,
            work_dir: Some(self.episode_dir(id)),
        })
    }

    /// Every checkpoint under the root, sorted by id. Unreadable entries are skipped.
    pub async fn list_incomplete(&self) -> Result<Vec<EpisodeSummary>> {
        let mut episodes = Vec::new();
        for entry in self.storage.list(&path_str(&self.root)).await? {
            let Some(id) = Path::new(&entry).file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if Uuid::parse_str(id).is_err() {
                continue;
            }
            let meta_path = self.file(id, META_FILE);
            if !self.storage.exists(&meta_path).await? {
                continue;
            }
            let projection = match self.read_projection(&meta_path).await {
                Ok(p) => p,
                Err(e) => {
                    warn!("Skipping unreadable checkpoint {}: {:#}", id, e);
                    continue;
                }
            };
            episodes.push(EpisodeSummary {
                id: id.to_string(),
                status: projection.status,
                title: projection.title,
            });
        }
        episodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(episodes)
    }

    async fn read_projection(&self, meta_path: &str) -> Result<MetaProjection> {
        let content = self.storage.read_to_string(meta_path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        self.storage.delete(&path_str(&self.episode_dir(id))).await?;
        info!("Removed working copy of {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::core::state::PipelineStep;

    fn store(root: &Path) -> EpisodeStateStore {
        EpisodeStateStore::new(root.to_path_buf(), Arc::new(NativeStorage::new()))
    }

    #[tokio::test]
    async fn test_create_save_load_roundtrip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store(dir.path());

        let mut episode = store
            .create(Some("printer jam".to_string()), Some("gpt-4o".to_string()))
            .await?;
        let id = episode.id_str();
        assert_eq!(episode.work_dir.as_deref(), Some(dir.path().join(&id).as_path()));

        episode.outline = Some(OutlineParser::new().parse("title: Jammed\npremise: Paper everywhere."));
        episode.script_raw = Some(">> [1] > 1/2 - Art\n:: Art : flat : It ate my memo.\n".to_string());
        episode.meta.advance(PipelineStep::Outline);
        episode.meta.advance(PipelineStep::Script);
        store.save(&mut episode).await?;

        assert!(!dir.path().join(&id).join("meta.json.tmp").exists());

        let loaded = store.load(&id).await.unwrap();
        assert_eq!(loaded.status(), EpisodeStatus::Scripted);
        assert_eq!(loaded.title(), "Jammed");
        assert_eq!(loaded.script_raw, episode.script_raw);
        assert_eq!(loaded.meta.model_used.as_deref(), Some("gpt-4o"));
        assert_eq!(
            loaded.meta.steps_completed,
            vec![PipelineStep::Outline, PipelineStep::Script]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_load_missing_is_not_found() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let err = store(dir.path()).load("missing").await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(id) if id == "missing"));
        Ok(())
    }

    #[tokio::test]
    async fn test_load_normalizes_legacy_status() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let id = "6f1c2d3e-4b5a-4c7d-8e9f-0a1b2c3d4e5f";
        std::fs::create_dir_all(dir.path().join(id))?;
        std::fs::write(
            dir.path().join(id).join(META_FILE),
            format!(
                r#"{{"id": "{}", "status": "script_generated", "created_at": "2024-05-01T10:00:00Z"}}"#,
                id
            ),
        )?;
        std::fs::write(dir.path().join(id).join(SCRIPT_FILE), ">> [1] > 1/2 - Art\n")?;

        let episode = store(dir.path()).load(id).await.unwrap();
        assert_eq!(episode.status(), EpisodeStatus::Scripted);
        assert!(episode.outline.is_none());
        assert_eq!(episode.script_raw.as_deref(), Some(">> [1] > 1/2 - Art\n"));
        Ok(())
    }

    #[tokio::test]
    async fn test_list_incomplete_sorted_and_skips_broken() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store(dir.path());
        let a = store.create(None, None).await?;
        let mut b = store.create(None, None).await?;
        b.meta.title = Some("Second".to_string());
        b.meta.advance(PipelineStep::Outline);
        store.save(&mut b).await?;

        let broken = Uuid::new_v4().to_string();
        std::fs::create_dir_all(dir.path().join(&broken))?;
        std::fs::write(dir.path().join(&broken).join(META_FILE), "{ not json")?;
        std::fs::create_dir_all(dir.path().join("not-an-episode"))?;

        let listed = store.list_incomplete().await?;
        let mut expected = vec![a.id_str(), b.id_str()];
        expected.sort();
        assert_eq!(listed.iter().map(|e| e.id.clone()).collect::<Vec<_>>(), expected);
        let second = listed.iter().find(|e| e.id == b.id_str()).unwrap();
        assert_eq!(second.status, EpisodeStatus::Outlined);
        assert_eq!(second.title.as_deref(), Some("Second"));
        Ok(())
    }

    #[tokio::test]
    async fn test_remove_deletes_working_copy() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store(dir.path());
        let episode = store.create(None, None).await?;
        store.remove(&episode.id_str()).await?;
        assert!(!dir.path().join(episode.id_str()).exists());
        assert!(store.list_incomplete().await?.is_empty());
        Ok(())
    }
}

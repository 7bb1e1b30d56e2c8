use crate::core::config::PipelineConfig;
use crate::core::error::{PipelineError, PipelineResult, StructuralParseError};
use crate::core::registry::{CharacterRegistry, ShotRegistry};
use crate::core::script::ScriptDocument;
use crate::core::state::{Episode, EpisodeOutline, EpisodeStatus, PipelineStep};
use crate::services::builder::{AudioBuilder, LineAudio};
use crate::services::checkpoint::{EpisodeStateStore, EpisodeSummary};
use crate::services::exporter::UnityExporter;
use crate::services::llm::{ChatMessage, LlmClient};
use crate::services::outline::OutlineParser;
use crate::services::parser::ScriptParser;
use crate::services::prompt::PromptBuilder;
use crate::services::publish::EpisodePublisher;
use crate::services::validator::{CastValidator, ValidationResult};
use crate::utils::text::strip_code_blocks;
use anyhow::anyhow;
use chrono::Utc;
use log::{error, info, warn};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDecision {
    Continue,
    Pause,
}

/// Consulted after every step except the last one.
pub trait StepGate: Send + Sync {
    fn after_step(&self, episode: &Episode, step: PipelineStep) -> StepDecision;
}

/// Runs every step without stopping.
pub struct AutoApprove;

impl StepGate for AutoApprove {
    fn after_step(&self, _episode: &Episode, _step: PipelineStep) -> StepDecision {
        StepDecision::Continue
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub topic: Option<String>,
    pub episode_id: Option<String>,
    pub status: Option<EpisodeStatus>,
    pub error: Option<String>,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Drives episodes through outline, script, build and complete, saving a
/// checkpoint after each step.
pub struct EpisodePipeline {
    settings: PipelineConfig,
    store: EpisodeStateStore,
    llm: Box<dyn LlmClient>,
    builder: Option<Box<dyn AudioBuilder>>,
    publisher: Box<dyn EpisodePublisher>,
    characters: CharacterRegistry,
    shots: ShotRegistry,
    parser: ScriptParser,
    outline_parser: OutlineParser,
}

impl EpisodePipeline {
    pub fn new(
        settings: PipelineConfig,
        store: EpisodeStateStore,
        llm: Box<dyn LlmClient>,
        builder: Option<Box<dyn AudioBuilder>>,
        publisher: Box<dyn EpisodePublisher>,
        characters: CharacterRegistry,
        shots: ShotRegistry,
    ) -> Self {
        Self {
            settings,
            store,
            llm,
            builder,
            publisher,
            characters,
            shots,
            parser: ScriptParser::new(),
            outline_parser: OutlineParser::new(),
        }
    }

    pub fn store(&self) -> &EpisodeStateStore {
        &self.store
    }

    pub fn publisher(&self) -> &dyn EpisodePublisher {
        self.publisher.as_ref()
    }

    pub async fn create(&self, topic: Option<String>) -> PipelineResult<Episode> {
        Ok(self
            .store
            .create(topic, Some(self.llm.model().to_string()))
            .await?)
    }

    pub async fn load(&self, id: &str) -> PipelineResult<Episode> {
        self.store.load(id).await
    }

    pub async fn list_incomplete(&self) -> PipelineResult<Vec<EpisodeSummary>> {
        Ok(self.store.list_incomplete().await?)
    }

    /// Parses and validates script text against the loaded registries.
    pub fn check_script(&self, text: &str) -> (ScriptDocument, ValidationResult) {
        let doc = self.parser.parse(text);
        let result = CastValidator::new(&self.shots, &self.characters).validate(&doc);
        (doc, result)
    }

    fn ensure_status(episode: &Episode, step: PipelineStep) -> PipelineResult<()> {
        let status = episode.status();
        if status != step.required_status() {
            return Err(PipelineError::StateTransition { step, status });
        }
        Ok(())
    }

    pub async fn run_step(&self, episode: &mut Episode, step: PipelineStep) -> PipelineResult<()> {
        match step {
            PipelineStep::Outline => self.run_outline(episode).await,
            PipelineStep::Script => self.run_script(episode).await,
            PipelineStep::Build => self.run_build(episode, false).await.map(|_| ()),
            PipelineStep::Complete => self.run_complete(episode).await.map(|_| ()),
        }
    }

    /// Calls the model until `interpret` accepts a response or attempts run out.
    /// `interpret` returns `Ok(None)` to ask for another attempt; it is told
    /// when the current attempt is the last one.
    async fn generate<T>(
        &self,
        step: PipelineStep,
        messages: &[ChatMessage],
        mut interpret: impl FnMut(&str, bool) -> Result<Option<T>, StructuralParseError>,
    ) -> PipelineResult<(T, u64)> {
        let attempts = self.settings.max_attempts.max(1);
        let mut tokens = 0;
        let mut last_failure = None;

        for attempt in 1..=attempts {
            if attempt > 1 && self.settings.retry_delay_seconds > 0 {
                tokio::time::sleep(Duration::from_secs(self.settings.retry_delay_seconds)).await;
            }
            info!("Generating {} (attempt {}/{})", step, attempt, attempts);

            let completion = match self.llm.complete(messages).await {
                Ok(completion) if completion.text.trim().is_empty() => {
                    warn!("Empty {} response (attempt {}/{})", step, attempt, attempts);
                    last_failure = Some(PipelineError::collaborator(
                        "llm",
                        attempt,
                        anyhow!("Empty response from LLM"),
                    ));
                    continue;
                }
                Ok(completion) => completion,
                Err(e) => {
                    warn!("{} generation failed (attempt {}/{}): {:#}", step, attempt, attempts, e);
                    last_failure = Some(PipelineError::collaborator("llm", attempt, e));
                    continue;
                }
            };
            tokens += completion.total_tokens.unwrap_or(0);

            match interpret(&completion.text, attempt == attempts) {
                Ok(Some(value)) => return Ok((value, tokens)),
                Ok(None) => warn!("Rejected {} output (attempt {}/{})", step, attempt, attempts),
                Err(e) => {
                    warn!("Malformed {} output (attempt {}/{}): {}", step, attempt, attempts, e);
                    last_failure = Some(e.into());
                }
            }
        }

        Err(last_failure.unwrap_or_else(|| {
            PipelineError::collaborator("llm", attempts, anyhow!("no usable response"))
        }))
    }

    pub async fn run_outline(&self, episode: &mut Episode) -> PipelineResult<()> {
        Self::ensure_status(episode, PipelineStep::Outline)?;
        info!(
            "Generating outline for {} (topic: {})",
            episode.id_str(),
            episode.meta.topic.as_deref().unwrap_or("any")
        );

        let messages = PromptBuilder::new(&self.characters, &self.shots)
            .outline_messages(episode.meta.topic.as_deref());
        let (outline, tokens) = self
            .generate(PipelineStep::Outline, &messages, |text, _| {
                Ok(Some(self.outline_parser.parse(&strip_code_blocks(text))))
            })
            .await?;

        println!("Outline: {} ({} scenes)", outline.title, outline.scenes.len());
        episode.meta.title = Some(outline.title.clone());
        episode.meta.model_used = Some(self.llm.model().to_string());
        episode.meta.generation_tokens += tokens;
        episode.outline = Some(outline);
        episode.meta.advance(PipelineStep::Outline);
        self.store.save(episode).await?;
        Ok(())
    }

    fn accept_script(&self, response: &str, last_attempt: bool) -> Result<Option<(String, ScriptDocument)>, StructuralParseError> {
        let mut text = strip_code_blocks(response);
        if self.parser.has_section_markers(&text) {
            let (_, script) = self.parser.extract_sections(&text)?;
            text = strip_code_blocks(&script);
        }

        let (doc, result) = self.check_script(&text);
        for diagnostic in &doc.diagnostics {
            warn!(
                "Script line {}: {} ({})",
                diagnostic.source_line, diagnostic.message, diagnostic.raw
            );
        }
        if !result.is_valid() {
            warn!("{}", result.summary(&doc));
            if !last_attempt {
                return Ok(None);
            }
            warn!("Keeping script with {} validation error(s)", result.error_count());
        } else if result.warning_count() > 0 {
            warn!("{}", result.summary(&doc));
        }
        Ok(Some((text, doc)))
    }

    pub async fn run_script(&self, episode: &mut Episode) -> PipelineResult<()> {
        Self::ensure_status(episode, PipelineStep::Script)?;
        let outline: &EpisodeOutline =
            episode
                .outline
                .as_ref()
                .ok_or_else(|| PipelineError::MissingArtifact {
                    id: episode.id_str(),
                    artifact: "outline",
                })?;
        info!("Generating script for {} ({})", episode.id_str(), outline.title);

        let messages = PromptBuilder::new(&self.characters, &self.shots).script_messages(outline);
        let ((script, doc), tokens) = self
            .generate(PipelineStep::Script, &messages, |text, last| {
                self.accept_script(text, last)
            })
            .await?;

        println!(
            "Script: {} scenes, {} dialog lines",
            doc.scene_count(),
            doc.dialog_count()
        );
        episode.script_raw = Some(script);
        episode.meta.scene_count = doc.scene_count();
        episode.meta.dialog_count = doc.dialog_count();
        episode.meta.generation_tokens += tokens;
        episode.meta.advance(PipelineStep::Script);
        self.store.save(episode).await?;
        Ok(())
    }

    async fn synthesize(&self, episode: &mut Episode, force: bool) -> PipelineResult<Vec<LineAudio>> {
        if episode.work_dir.is_none() {
            episode.work_dir = Some(self.store.episode_dir(&episode.id_str()));
        }

        let results = match &self.builder {
            Some(builder) => {
                let results = builder
                    .build(episode, force)
                    .await
                    .map_err(|e| PipelineError::collaborator("tts", 1, e))?;
                let failed = results.iter().filter(|r| !r.success).count();
                if failed > 0 {
                    warn!("{} of {} line(s) failed to synthesize", failed, results.len());
                }
                episode.meta.tts_provider = Some(builder.provider_name().to_string());
                episode.meta.build_mocked = false;
                results
            }
            None => {
                warn!("No audio builder configured, marking {} as mocked", episode.id_str());
                episode.meta.build_mocked = true;
                Vec::new()
            }
        };
        Ok(results)
    }

    /// Writes the manifest and dialog list into the working copy. Runs after
    /// any status change so the manifest carries the episode's final status.
    async fn export(&self, episode: &Episode, doc: &ScriptDocument) -> PipelineResult<()> {
        let work_dir = episode
            .work_dir
            .clone()
            .unwrap_or_else(|| self.store.episode_dir(&episode.id_str()));
        let exporter = UnityExporter::new(self.store.storage());
        exporter.write_manifest(episode, Some(doc), &work_dir).await?;
        exporter.write_dialog_list(doc, &work_dir).await?;
        Ok(())
    }

    pub async fn run_build(&self, episode: &mut Episode, force: bool) -> PipelineResult<Vec<LineAudio>> {
        Self::ensure_status(episode, PipelineStep::Build)?;
        let script = episode
            .script_raw
            .as_deref()
            .ok_or_else(|| PipelineError::MissingArtifact {
                id: episode.id_str(),
                artifact: "script",
            })?;
        info!("Building audio for {}", episode.id_str());

        let doc = self.parser.parse(script);
        let results = self.synthesize(episode, force).await?;

        episode.meta.advance(PipelineStep::Build);
        self.export(episode, &doc).await?;
        self.store.save(episode).await?;
        Ok(results)
    }

    /// Re-runs synthesis for a scripted or built episode. A built episode
    /// keeps its status; a scripted one advances as the build step would.
    pub async fn rebuild(&self, id: &str, force: bool) -> PipelineResult<(Episode, Vec<LineAudio>)> {
        let mut episode = self.store.load(id).await?;
        match episode.status() {
            EpisodeStatus::Scripted => {
                let results = self.run_build(&mut episode, force).await?;
                Ok((episode, results))
            }
            EpisodeStatus::Built => {
                let script = episode.script_raw.clone().ok_or_else(|| {
                    PipelineError::MissingArtifact {
                        id: id.to_string(),
                        artifact: "script",
                    }
                })?;
                let doc = self.parser.parse(&script);
                let results = self.synthesize(&mut episode, force).await?;
                self.export(&episode, &doc).await?;
                self.store.save(&mut episode).await?;
                Ok((episode, results))
            }
            status => Err(PipelineError::StateTransition {
                step: PipelineStep::Build,
                status,
            }),
        }
    }

    /// Publishes the working copy, marks the episode completed and removes
    /// the working copy. Returns the published location.
    pub async fn run_complete(&self, episode: &mut Episode) -> PipelineResult<String> {
        Self::ensure_status(episode, PipelineStep::Complete)?;
        let id = episode.id_str();
        let work_dir = episode
            .work_dir
            .clone()
            .unwrap_or_else(|| self.store.episode_dir(&id));
        info!("Completing episode {}", id);

        let location = self
            .publisher
            .upload_episode(&work_dir, &id)
            .await
            .map_err(|e| PipelineError::collaborator("storage", 1, e))?;
        let published = self
            .publisher
            .episode_exists(&id)
            .await
            .map_err(|e| PipelineError::collaborator("storage", 1, e))?;
        if !published {
            return Err(PipelineError::collaborator(
                "storage",
                1,
                anyhow!("episode {} not found at {} after upload", id, location),
            ));
        }

        episode.meta.completed_at = Some(Utc::now());
        episode.meta.advance(PipelineStep::Complete);
        self.store.save(episode).await?;
        self.store.remove(&id).await?;
        episode.work_dir = None;

        println!("Episode {} published to {}", id, location);
        Ok(location)
    }

    async fn run_steps(
        &self,
        episode: &mut Episode,
        steps: &[PipelineStep],
        gate: &dyn StepGate,
    ) -> PipelineResult<()> {
        for &step in steps {
            self.run_step(episode, step).await?;
            if step != PipelineStep::Complete
                && gate.after_step(episode, step) == StepDecision::Pause
            {
                info!("Pipeline paused for {} after {} step", episode.id_str(), step);
                return Ok(());
            }
        }
        Ok(())
    }

    pub async fn run_full(&self, topic: Option<String>, gate: &dyn StepGate) -> PipelineResult<Episode> {
        let mut episode = self.create(topic).await?;
        self.run_steps(&mut episode, &PipelineStep::ALL, gate).await?;
        Ok(episode)
    }

    pub async fn resume(&self, id: &str, gate: &dyn StepGate) -> PipelineResult<Episode> {
        let mut episode = self.store.load(id).await?;
        let status = episode.status();
        if status == EpisodeStatus::Failed {
            return Err(PipelineError::NotResumable {
                id: id.to_string(),
                status,
            });
        }

        let steps = PipelineStep::remaining(status);
        let Some(next) = steps.first() else {
            info!("Episode {} is already {}", id, status);
            return Ok(episode);
        };
        info!("Resuming {} at {} step", id, next);
        self.run_steps(&mut episode, &steps, gate).await?;
        Ok(episode)
    }

    /// Generates one episode per topic, one after another. A failed episode
    /// is recorded and the batch moves on.
    pub async fn run_batch(&self, topics: &[Option<String>], gate: &dyn StepGate) -> Vec<BatchOutcome> {
        let mut outcomes = Vec::with_capacity(topics.len());

        for (index, topic) in topics.iter().enumerate() {
            println!(
                "Episode {}/{} (topic: {})",
                index + 1,
                topics.len(),
                topic.as_deref().unwrap_or("any")
            );
            let mut outcome = BatchOutcome {
                topic: topic.clone(),
                episode_id: None,
                status: None,
                error: None,
            };

            match self.create(topic.clone()).await {
                Ok(mut episode) => {
                    outcome.episode_id = Some(episode.id_str());
                    if let Err(e) = self.run_steps(&mut episode, &PipelineStep::ALL, gate).await {
                        error!("Episode {} failed: {}", episode.id_str(), e);
                        outcome.error = Some(e.to_string());
                    }
                    outcome.status = Some(episode.status());
                }
                Err(e) => {
                    error!("Could not create episode: {}", e);
                    outcome.error = Some(e.to_string());
                }
            }
            outcomes.push(outcome);
        }

        outcomes
    }

    /// Operator action: moves a non-terminal episode to FAILED.
    pub async fn mark_failed(&self, id: &str) -> PipelineResult<Episode> {
        let mut episode = self.store.load(id).await?;
        let status = episode.status();
        if !status.can_transition_to(EpisodeStatus::Failed) {
            return Err(PipelineError::AlreadyTerminal {
                id: id.to_string(),
                status,
            });
        }
        episode.meta.status = EpisodeStatus::Failed;
        episode.meta.current_step = None;
        self.store.save(&mut episode).await?;
        warn!("Episode {} marked as failed (was {})", id, status);
        Ok(episode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::core::registry::fixtures::{cast, shots};
    use crate::services::builder::testing::RecordingTts;
    use crate::services::builder::EpisodeBuilder;
    use crate::services::exporter::Manifest;
    use crate::services::llm::Completion;
    use crate::services::publish::LocalPublisher;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    const OUTLINE: &str = "\
title: Coffee Crisis
premise: The machine breaks.
scenes:
1. [Shot 16] - Art, Nia
   - Beat: Panic.
2. [Shot 1] - Dave
   - Beat: Tea.
";

    const SCRIPT: &str = "\
>> [16] > 2/4 - Art, Nia
:: Art : flat : The machine is dead.
:: Nia : shocked : No!
:: Art : flat : Yes.
>> [1] > 1/2 - Dave
:: Dave : calm : Tea, anyone?
:: Dave : smug : More for me.
";

    const OVERCROWDED: &str = "\
>> [12] > 4/3 - Art, Nia, Dave, Karen
:: Art : flat : Too many of us.
";

    #[derive(Debug)]
    struct MockLlm {
        outline: String,
        scripts: Mutex<Vec<String>>,
        fail: bool,
        calls: Arc<Mutex<usize>>,
    }

    impl MockLlm {
        fn new(scripts: &[&str]) -> Self {
            Self {
                outline: OUTLINE.to_string(),
                scripts: Mutex::new(scripts.iter().map(|s| s.to_string()).collect()),
                fail: false,
                calls: Arc::new(Mutex::new(0)),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(&[SCRIPT])
            }
        }
    }

    #[async_trait]
    impl LlmClient for MockLlm {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion> {
            *self.calls.lock().unwrap() += 1;
            let request = messages.last().map(|m| m.content.as_str()).unwrap_or("");
            if self.fail || request.contains("doomed") {
                return Err(anyhow!("model overloaded"));
            }
            let text = if request.contains("OUTLINE:") {
                let mut scripts = self.scripts.lock().unwrap();
                if scripts.len() > 1 {
                    scripts.remove(0)
                } else {
                    scripts[0].clone()
                }
            } else {
                self.outline.clone()
            };
            Ok(Completion {
                text,
                total_tokens: Some(10),
            })
        }

        fn model(&self) -> &str {
            "mock-model"
        }
    }

    struct PauseAfter(PipelineStep);

    impl StepGate for PauseAfter {
        fn after_step(&self, _episode: &Episode, step: PipelineStep) -> StepDecision {
            if step == self.0 {
                StepDecision::Pause
            } else {
                StepDecision::Continue
            }
        }
    }

    struct Harness {
        pipeline: EpisodePipeline,
        llm_calls: Arc<Mutex<usize>>,
        tts_calls: Arc<Mutex<Vec<(String, String)>>>,
    }

    fn harness(root: &Path, llm: MockLlm, max_attempts: usize) -> Harness {
        let storage = Arc::new(NativeStorage::new());
        let llm_calls = llm.calls.clone();
        let tts = RecordingTts::new(&["alloy"]);
        let tts_calls = tts.calls.clone();
        let builder =
            EpisodeBuilder::new(Box::new(tts), cast(), Default::default(), storage.clone()).unwrap();
        let settings = PipelineConfig {
            max_attempts,
            retry_delay_seconds: 0,
            unattended: true,
        };
        let pipeline = EpisodePipeline::new(
            settings,
            EpisodeStateStore::new(root.join("incomplete"), storage.clone()),
            Box::new(llm),
            Some(Box::new(builder)),
            Box::new(LocalPublisher::new(root.join("scenes"), storage)),
            cast(),
            shots(),
        );
        Harness {
            pipeline,
            llm_calls,
            tts_calls,
        }
    }

    #[tokio::test]
    async fn test_run_full_publishes_and_cleans_up() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let h = harness(dir.path(), MockLlm::new(&[SCRIPT]), 3);

        let episode = h.pipeline.run_full(Some("coffee".to_string()), &AutoApprove).await?;
        let id = episode.id_str();

        assert_eq!(episode.status(), EpisodeStatus::Completed);
        assert_eq!(episode.meta.steps_completed, PipelineStep::ALL.to_vec());
        assert_eq!(episode.meta.current_step, None);
        assert!(episode.meta.completed_at.is_some());
        assert_eq!(episode.meta.scene_count, 2);
        assert_eq!(episode.meta.dialog_count, 5);
        assert_eq!(episode.meta.generation_tokens, 20);
        assert_eq!(episode.meta.tts_provider.as_deref(), Some("mock"));
        assert!(episode.work_dir.is_none());
        assert_eq!(*h.llm_calls.lock().unwrap(), 2);
        assert_eq!(h.tts_calls.lock().unwrap().len(), 5);

        assert!(!dir.path().join("incomplete").join(&id).exists());
        let published = dir.path().join("scenes").join(&id);
        assert!(published.join("dialogs.json").exists());
        let manifest: Manifest =
            serde_json::from_str(&std::fs::read_to_string(published.join("manifest.json"))?)?;
        assert_eq!(manifest.status, EpisodeStatus::Built);
        assert_eq!(manifest.total_dialog_lines, 5);
        assert!(published.join("assets/sfx/dialog-5.mp3").exists());
        assert!(h.pipeline.publisher().episode_exists(&id).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_resume_from_scripted_runs_build_and_complete_only() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let h = harness(dir.path(), MockLlm::failing(), 3);

        let mut episode = h.pipeline.create(None).await?;
        episode.outline = Some(OutlineParser::new().parse(OUTLINE));
        episode.script_raw = Some(SCRIPT.to_string());
        episode.meta.advance(PipelineStep::Outline);
        episode.meta.advance(PipelineStep::Script);
        h.pipeline.store().save(&mut episode).await?;
        let id = episode.id_str();

        let resumed = h.pipeline.resume(&id, &AutoApprove).await?;

        assert_eq!(resumed.status(), EpisodeStatus::Completed);
        assert_eq!(*h.llm_calls.lock().unwrap(), 0);
        assert_eq!(resumed.script_raw.as_deref(), Some(SCRIPT));
        let published_script = std::fs::read_to_string(
            dir.path().join("scenes").join(&id).join("episode-script.txt"),
        )?;
        assert_eq!(published_script, SCRIPT);
        Ok(())
    }

    #[tokio::test]
    async fn test_script_step_on_created_episode_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let h = harness(dir.path(), MockLlm::new(&[SCRIPT]), 3);
        let mut episode = h.pipeline.create(None).await?;

        let err = h
            .pipeline
            .run_step(&mut episode, PipelineStep::Script)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::StateTransition {
                step: PipelineStep::Script,
                status: EpisodeStatus::Created
            }
        ));
        assert_eq!(*h.llm_calls.lock().unwrap(), 0);
        let stored = h.pipeline.load(&episode.id_str()).await?;
        assert_eq!(stored.status(), EpisodeStatus::Created);
        Ok(())
    }

    #[tokio::test]
    async fn test_exhausted_retries_leave_status_unchanged() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let h = harness(dir.path(), MockLlm::failing(), 3);
        let mut episode = h.pipeline.create(None).await?;

        let err = h
            .pipeline
            .run_step(&mut episode, PipelineStep::Outline)
            .await
            .unwrap_err();

        match err {
            PipelineError::Collaborator {
                collaborator,
                attempts,
                ..
            } => {
                assert_eq!(collaborator, "llm");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(*h.llm_calls.lock().unwrap(), 3);
        assert_eq!(episode.status(), EpisodeStatus::Created);
        let stored = h.pipeline.load(&episode.id_str()).await?;
        assert_eq!(stored.status(), EpisodeStatus::Created);
        assert!(stored.outline.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_script_is_retried() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let h = harness(dir.path(), MockLlm::new(&[OVERCROWDED, SCRIPT]), 3);
        let mut episode = h.pipeline.create(None).await?;

        h.pipeline.run_step(&mut episode, PipelineStep::Outline).await?;
        h.pipeline.run_step(&mut episode, PipelineStep::Script).await?;

        assert_eq!(episode.status(), EpisodeStatus::Scripted);
        assert_eq!(episode.script_raw.as_deref(), Some(SCRIPT.trim()));
        assert_eq!(*h.llm_calls.lock().unwrap(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_final_attempt_keeps_invalid_script() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let h = harness(dir.path(), MockLlm::new(&[OVERCROWDED]), 2);
        let mut episode = h.pipeline.create(None).await?;

        h.pipeline.run_step(&mut episode, PipelineStep::Outline).await?;
        h.pipeline.run_step(&mut episode, PipelineStep::Script).await?;

        assert_eq!(episode.status(), EpisodeStatus::Scripted);
        assert_eq!(episode.meta.scene_count, 1);
        assert_eq!(*h.llm_calls.lock().unwrap(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_combined_response_keeps_script_section() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let combined = format!("=== PLOT ===\ntitle: Ignored\n\n=== SCRIPT ===\n```\n{}```\n", SCRIPT);
        let h = harness(dir.path(), MockLlm::new(&[combined.as_str()]), 3);
        let mut episode = h.pipeline.create(None).await?;

        h.pipeline.run_step(&mut episode, PipelineStep::Outline).await?;
        h.pipeline.run_step(&mut episode, PipelineStep::Script).await?;

        assert_eq!(episode.script_raw.as_deref(), Some(SCRIPT.trim()));
        assert_eq!(episode.title(), "Coffee Crisis");
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_script_marker_is_structural_failure() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let h = harness(dir.path(), MockLlm::new(&["=== PLOT ===\ntitle: Only a plot\n"]), 2);
        let mut episode = h.pipeline.create(None).await?;
        h.pipeline.run_step(&mut episode, PipelineStep::Outline).await?;

        let err = h
            .pipeline
            .run_step(&mut episode, PipelineStep::Script)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::StructuralParse(StructuralParseError::MissingScriptSection)
        ));
        assert_eq!(episode.status(), EpisodeStatus::Outlined);
        assert!(episode.script_raw.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_pause_leaves_resumable_checkpoint() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let h = harness(dir.path(), MockLlm::new(&[SCRIPT]), 3);

        let paused = h
            .pipeline
            .run_full(None, &PauseAfter(PipelineStep::Outline))
            .await?;
        assert_eq!(paused.status(), EpisodeStatus::Outlined);

        let listed = h.pipeline.list_incomplete().await?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, EpisodeStatus::Outlined);
        assert_eq!(listed[0].title.as_deref(), Some("Coffee Crisis"));

        let paused = h
            .pipeline
            .resume(&paused.id_str(), &PauseAfter(PipelineStep::Build))
            .await?;
        assert_eq!(paused.status(), EpisodeStatus::Built);
        assert!(!paused.meta.build_mocked);

        let done = h.pipeline.resume(&paused.id_str(), &AutoApprove).await?;
        assert_eq!(done.status(), EpisodeStatus::Completed);
        assert_eq!(*h.llm_calls.lock().unwrap(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_mark_failed_blocks_resume() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let h = harness(dir.path(), MockLlm::new(&[SCRIPT]), 3);
        let episode = h.pipeline.create(None).await?;
        let id = episode.id_str();

        let failed = h.pipeline.mark_failed(&id).await?;
        assert_eq!(failed.status(), EpisodeStatus::Failed);

        assert!(matches!(
            h.pipeline.resume(&id, &AutoApprove).await.unwrap_err(),
            PipelineError::NotResumable { .. }
        ));
        assert!(matches!(
            h.pipeline.mark_failed(&id).await.unwrap_err(),
            PipelineError::AlreadyTerminal { .. }
        ));
        assert!(matches!(
            h.pipeline.resume("missing", &AutoApprove).await.unwrap_err(),
            PipelineError::NotFound(_)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_build_without_builder_is_mocked() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = Arc::new(NativeStorage::new());
        let pipeline = EpisodePipeline::new(
            PipelineConfig::default(),
            EpisodeStateStore::new(dir.path().join("incomplete"), storage.clone()),
            Box::new(MockLlm::new(&[SCRIPT])),
            None,
            Box::new(LocalPublisher::new(dir.path().join("scenes"), storage)),
            cast(),
            shots(),
        );

        let episode = pipeline
            .run_full(None, &PauseAfter(PipelineStep::Build))
            .await?;

        assert_eq!(episode.status(), EpisodeStatus::Built);
        assert!(episode.meta.build_mocked);
        let work_dir = episode.work_dir.clone().unwrap();
        let manifest: Manifest =
            serde_json::from_str(&std::fs::read_to_string(work_dir.join("manifest.json"))?)?;
        assert_eq!(manifest.status, EpisodeStatus::Built);
        assert!(!work_dir.join("assets/sfx").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_rebuild_built_episode_keeps_status() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let h = harness(dir.path(), MockLlm::new(&[SCRIPT]), 3);
        let episode = h
            .pipeline
            .run_full(None, &PauseAfter(PipelineStep::Build))
            .await?;
        let id = episode.id_str();
        assert_eq!(h.tts_calls.lock().unwrap().len(), 5);

        let (rebuilt, results) = h.pipeline.rebuild(&id, false).await?;
        assert_eq!(rebuilt.status(), EpisodeStatus::Built);
        assert!(results.iter().all(|r| r.cached));
        assert_eq!(h.tts_calls.lock().unwrap().len(), 5);

        let (_, results) = h.pipeline.rebuild(&id, true).await?;
        assert!(results.iter().all(|r| !r.cached));
        assert_eq!(h.tts_calls.lock().unwrap().len(), 10);

        let fresh = h.pipeline.create(None).await?;
        assert!(matches!(
            h.pipeline.rebuild(&fresh.id_str(), false).await.unwrap_err(),
            PipelineError::StateTransition { .. }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_batch_continues_after_failure() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let h = harness(dir.path(), MockLlm::new(&[SCRIPT]), 2);
        let topics = vec![
            Some("doomed pitch".to_string()),
            Some("printer jam".to_string()),
        ];

        let outcomes = h.pipeline.run_batch(&topics, &AutoApprove).await;

        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes[0].is_success());
        assert_eq!(outcomes[0].status, Some(EpisodeStatus::Created));
        assert!(outcomes[0].error.as_deref().unwrap().contains("llm"));
        assert!(outcomes[1].is_success());
        assert_eq!(outcomes[1].status, Some(EpisodeStatus::Completed));

        let remaining = h.pipeline.list_incomplete().await?;
        assert_eq!(remaining.len(), 1);
        assert_eq!(Some(remaining[0].id.clone()), outcomes[0].episode_id);
        Ok(())
    }
}

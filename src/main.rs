use anyhow::{bail, Context, Result};
use brainwave::core::config::{Config, CONFIG_FILE};
use brainwave::core::io::{NativeStorage, Storage};
use brainwave::core::registry::{load_characters, load_shots, load_voice_mappings};
use brainwave::core::state::{Episode, EpisodeStatus, PipelineStep};
use brainwave::services::builder::{AudioBuilder, EpisodeBuilder};
use brainwave::services::checkpoint::EpisodeStateStore;
use brainwave::services::exporter::preview_text;
use brainwave::services::llm::create_llm;
use brainwave::services::parser::ScriptParser;
use brainwave::services::pipeline::{AutoApprove, EpisodePipeline, StepDecision, StepGate};
use brainwave::services::publish::create_publisher;
use brainwave::services::tts::create_tts_client;
use brainwave::services::validator::validate;
use brainwave::utils::text::strip_code_blocks;
use clap::{Parser, Subcommand};
use inquire::{Confirm, Select};
use log::warn;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "brainwave", about = "Generate office comedy episodes for the Unity player")]
struct Cli {
    #[arg(short, long, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a new episode
    New {
        #[arg(short, long)]
        topic: Option<String>,
        /// Run every step without asking
        #[arg(short, long)]
        yes: bool,
    },
    /// Continue an incomplete episode
    Resume {
        id: Option<String>,
        #[arg(short, long)]
        yes: bool,
    },
    /// List incomplete and published episodes
    List,
    /// Print an episode preview
    Show { id: String },
    /// Check a script file against the cast and shot lists
    Validate { file: PathBuf },
    /// Synthesize audio for a scripted or built episode
    Build {
        id: String,
        #[arg(short, long)]
        force: bool,
    },
    /// Generate several episodes back to back
    Batch {
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
        /// One topic per line; episodes past the end pick their own
        #[arg(long)]
        topics: Option<PathBuf>,
    },
    /// Mark an episode as failed so it is no longer resumed
    Fail { id: String },
}

/// Asks before moving on to the next step.
struct ConfirmGate;

impl StepGate for ConfirmGate {
    fn after_step(&self, episode: &Episode, step: PipelineStep) -> StepDecision {
        let Some(next) = step.next() else {
            return StepDecision::Continue;
        };
        let question = format!(
            "{} done for \"{}\". Continue to {}?",
            step,
            episode.title(),
            next
        );
        match Confirm::new(&question).with_default(true).prompt() {
            Ok(true) => StepDecision::Continue,
            Ok(false) => {
                println!("Stopping as requested.");
                StepDecision::Pause
            }
            Err(_) => {
                println!("Error reading input, stopping.");
                StepDecision::Pause
            }
        }
    }
}

fn gate(config: &Config, yes: bool) -> Box<dyn StepGate> {
    if yes || config.pipeline.unattended {
        Box::new(AutoApprove)
    } else {
        Box::new(ConfirmGate)
    }
}

fn state_store(config: &Config) -> EpisodeStateStore {
    EpisodeStateStore::new(
        config.paths.incomplete_dir.clone(),
        Arc::new(NativeStorage::new()),
    )
}

fn create_pipeline(config: &Config) -> Result<EpisodePipeline> {
    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
    let characters = load_characters(&config.paths.characters_file())?;
    let shots = load_shots(&config.paths.shots_file())?;
    let voices = load_voice_mappings(&config.paths.voices_file())?;

    let llm = create_llm(config)?;
    let builder: Option<Box<dyn AudioBuilder>> = match create_tts_client(config) {
        Ok(tts) => Some(Box::new(EpisodeBuilder::new(
            tts,
            characters.clone(),
            voices,
            storage.clone(),
        )?)),
        Err(e) => {
            warn!("Audio builds will be mocked: {:#}", e);
            None
        }
    };

    Ok(EpisodePipeline::new(
        config.pipeline.clone(),
        EpisodeStateStore::new(config.paths.incomplete_dir.clone(), storage),
        llm,
        builder,
        create_publisher(config)?,
        characters,
        shots,
    ))
}

fn report(episode: &Episode) {
    println!(
        "Episode {} \"{}\" is {}",
        episode.id_str(),
        episode.title(),
        episode.status()
    );
    if episode.is_incomplete() {
        println!("Continue with: brainwave resume {}", episode.id_str());
    }
}

async fn pick_incomplete(config: &Config) -> Result<Option<String>> {
    let resumable: Vec<_> = state_store(config)
        .list_incomplete()
        .await?
        .into_iter()
        .filter(|e| e.status != EpisodeStatus::Failed)
        .collect();

    match resumable.len() {
        0 => Ok(None),
        1 => Ok(Some(resumable[0].id.clone())),
        _ => {
            let options: Vec<String> = resumable
                .iter()
                .map(|e| {
                    format!(
                        "{} [{}] {}",
                        e.id,
                        e.status,
                        e.title.as_deref().unwrap_or("(untitled)")
                    )
                })
                .collect();
            let choice = Select::new("Which episode should be resumed?", options).raw_prompt()?;
            Ok(Some(resumable[choice.index].id.clone()))
        }
    }
}

async fn read_topics(path: Option<&PathBuf>, count: usize) -> Result<Vec<Option<String>>> {
    let listed: Vec<String> = match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    };
    Ok((0..count).map(|i| listed.get(i).cloned()).collect())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = match Config::load_from(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure '{}' exists with valid LLM settings.", cli.config.display());
            return Err(e);
        }
    };
    config.ensure_directories()?;

    match cli.command {
        Command::New { topic, yes } => {
            let pipeline = create_pipeline(&config)?;
            let episode = pipeline.run_full(topic, gate(&config, yes).as_ref()).await?;
            report(&episode);
        }
        Command::Resume { id, yes } => {
            let id = match id {
                Some(id) => id,
                None => match pick_incomplete(&config).await? {
                    Some(id) => id,
                    None => {
                        println!("No incomplete episodes.");
                        return Ok(());
                    }
                },
            };
            let pipeline = create_pipeline(&config)?;
            let episode = pipeline.resume(&id, gate(&config, yes).as_ref()).await?;
            report(&episode);
        }
        Command::List => {
            let incomplete = state_store(&config).list_incomplete().await?;
            println!("Incomplete episodes: {}", incomplete.len());
            for e in &incomplete {
                println!(
                    "  {} [{}] {}",
                    e.id,
                    e.status,
                    e.title.as_deref().unwrap_or("(untitled)")
                );
            }
            let published = create_publisher(&config)?.list_episodes().await?;
            println!("Published episodes: {}", published.len());
            for id in &published {
                println!("  {}", id);
            }
        }
        Command::Show { id } => {
            let store = state_store(&config);
            match store.load(&id).await {
                Ok(episode) => {
                    let doc = episode
                        .script_raw
                        .as_deref()
                        .map(|script| ScriptParser::new().parse(script));
                    println!("{}", preview_text(&episode, doc.as_ref()));
                }
                Err(e) => match create_publisher(&config)?.episode_meta(&id).await? {
                    Some(meta) => println!(
                        "Episode {} \"{}\" is published ({}, {} scenes, {} dialog lines)",
                        id,
                        meta.title.as_deref().unwrap_or("Untitled Episode"),
                        meta.status,
                        meta.scene_count,
                        meta.dialog_count
                    ),
                    None => return Err(e.into()),
                },
            }
        }
        Command::Validate { file } => {
            let characters = load_characters(&config.paths.characters_file())?;
            let shots = load_shots(&config.paths.shots_file())?;
            let text = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;

            let parser = ScriptParser::new();
            let mut text = strip_code_blocks(&text);
            if parser.has_section_markers(&text) {
                text = parser.extract_sections(&text)?.1;
            }
            let doc = parser.parse(&text);
            for diagnostic in &doc.diagnostics {
                println!("line {}: {} ({})", diagnostic.source_line, diagnostic.message, diagnostic.raw);
            }
            let result = validate(&doc, &shots, &characters);
            println!("{}", result.summary(&doc));
            if !result.is_valid() {
                bail!("{} failed validation", file.display());
            }
        }
        Command::Build { id, force } => {
            let pipeline = create_pipeline(&config)?;
            let (episode, results) = pipeline.rebuild(&id, force).await?;
            let failed = results.iter().filter(|r| !r.success).count();
            let cached = results.iter().filter(|r| r.cached).count();
            println!(
                "{} line(s): {} cached, {} failed",
                results.len(),
                cached,
                failed
            );
            report(&episode);
        }
        Command::Batch { count, topics } => {
            let topics = read_topics(topics.as_ref(), count).await?;
            let pipeline = create_pipeline(&config)?;
            let outcomes = pipeline.run_batch(&topics, &AutoApprove).await;

            let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
            println!("Batch finished: {} succeeded, {} failed", succeeded, outcomes.len() - succeeded);
            for outcome in outcomes.iter().filter(|o| !o.is_success()) {
                println!(
                    "  {} ({}): {}",
                    outcome.episode_id.as_deref().unwrap_or("-"),
                    outcome.topic.as_deref().unwrap_or("any topic"),
                    outcome.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        Command::Fail { id } => {
            let pipeline = create_pipeline(&config)?;
            let episode = pipeline.mark_failed(&id).await?;
            report(&episode);
        }
    }

    Ok(())
}

use crate::core::state::{EpisodeStatus, PipelineStep};
use thiserror::Error;

/// A combined generation response that cannot be split into its sections.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralParseError {
    #[error("could not find === PLOT === or === OUTLINE === section in response")]
    MissingOutlineSection,
    #[error("could not find === SCRIPT === section in response")]
    MissingScriptSection,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cannot run {step} step on episode with status {status}")]
    StateTransition {
        step: PipelineStep,
        status: EpisodeStatus,
    },

    #[error(transparent)]
    StructuralParse(#[from] StructuralParseError),

    #[error("{collaborator} failed after {attempts} attempt(s): {source}")]
    Collaborator {
        collaborator: &'static str,
        attempts: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("episode not found: {0}")]
    NotFound(String),

    #[error("episode {id} cannot be resumed (status: {status})")]
    NotResumable { id: String, status: EpisodeStatus },

    #[error("episode {id} is already {status}")]
    AlreadyTerminal { id: String, status: EpisodeStatus },

    #[error("episode {id} has no {artifact}")]
    MissingArtifact { id: String, artifact: &'static str },

    #[error(transparent)]
    Checkpoint(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn collaborator(collaborator: &'static str, attempts: usize, err: anyhow::Error) -> Self {
        Self::Collaborator {
            collaborator,
            attempts,
            source: err.into(),
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON parse error while {context}: {source}")]
    Json {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("unit search failed at target {target_index}: {reason}")]
    SearchFailure { target_index: usize, reason: String },
    #[error("synthesis cancelled before stage {stage}")]
    Cancelled { stage: usize },
    #[error("audio for unit {unit_index} unavailable: {message}")]
    Audio { unit_index: usize, message: String },
}

impl SynthesisError {
    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    pub(crate) fn json(context: &'static str, source: serde_json::Error) -> Self {
        Self::Json { context, source }
    }

    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub(crate) fn search_failure(target_index: usize, reason: impl Into<String>) -> Self {
        Self::SearchFailure {
            target_index,
            reason: reason.into(),
        }
    }

    /// Databases report missing or corrupt sample data through this constructor.
    pub fn audio(unit_index: usize, message: impl std::fmt::Display) -> Self {
        Self::Audio {
            unit_index,
            message: message.to_string(),
        }
    }

    /// Index of the target that caused a search failure, if any.
    pub fn target_index(&self) -> Option<usize> {
        match self {
            Self::SearchFailure { target_index, .. } => Some(*target_index),
            _ => None,
        }
    }
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NluError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Engine not ready: no trained engine and no loadable snapshot. You may need to train.")]
    EngineNotReady,

    #[error("Training data error: {0}")]
    TrainingData(String),

    #[error("Parse error: {0}")]
    RuntimeParse(String),

    #[error("Grammar error: line {line}, {message}")]
    Grammar { line: usize, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl NluError {
    /// Stable short code carried on error events.
    pub fn kind(&self) -> &'static str {
        match self {
            NluError::Configuration(_) => "configuration",
            NluError::EngineNotReady => "engine_not_ready",
            NluError::TrainingData(_) | NluError::Grammar { .. } => "training_data",
            NluError::RuntimeParse(_) => "runtime_parse",
            NluError::Serialization(_) | NluError::Yaml(_) => "serialization",
            NluError::Io(_) => "io",
            NluError::Other(_) => "other",
        }
    }
}

pub type NluResult<T> = Result<T, NluError>;

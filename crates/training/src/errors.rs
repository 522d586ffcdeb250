use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrainingError>;

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    ConfigFormat(String),

    #[error("invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("trainer initialization failed: {0}")]
    Initialization(String),

    #[error("training failed: {0}")]
    Runtime(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no channel count registered for input kind '{0}'")]
    UnknownInputKind(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("no dataset registered under '{0}'")]
    UnknownDataset(String),

    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}

impl TrainingError {
    pub fn initialization(message: impl Into<String>) -> Self {
        Self::Initialization(message.into())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }

    pub fn validation(messages: Vec<String>) -> Self {
        Self::Validation(messages)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

impl From<toml::de::Error> for TrainingError {
    fn from(value: toml::de::Error) -> Self {
        TrainingError::ConfigFormat(value.to_string())
    }
}

impl From<serde_json::Error> for TrainingError {
    fn from(value: serde_json::Error) -> Self {
        TrainingError::ConfigFormat(value.to_string())
    }
}

//! Error types for PlantDoc

/// Result type alias using PlantDoc's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for PlantDoc operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Caller supplied something unusable (wrong content type, empty message)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Image bytes could not be decoded
    #[error("image decode error: {0}")]
    ImageDecode(String),

    /// Forward/backward pass or tensor manipulation failed
    #[error("computation error: {0}")]
    Computation(String),

    /// Model construction or weight loading failed
    #[error("model error: {0}")]
    Model(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// External collaborator (hosted text completion) failed
    #[error("collaborator error: {0}")]
    Collaborator(String),

    /// Filesystem errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML errors
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new image decode error
    pub fn image_decode(msg: impl Into<String>) -> Self {
        Self::ImageDecode(msg.into())
    }

    /// Create a new computation error
    pub fn computation(msg: impl Into<String>) -> Self {
        Self::Computation(msg.into())
    }

    /// Create a new model error
    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new collaborator error
    pub fn collaborator(msg: impl Into<String>) -> Self {
        Self::Collaborator(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error was caused by the caller's input
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::ImageDecode(_))
    }
}

use std::time::Duration;

/// Failure talking to an external collaborator (AI, market data, search, channel)
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    /// The request URL is stripped; it can carry credentials such as a bot token
    #[error("http error: {0}")]
    Http(reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.without_url())
    }
}

/// Failure inside a capability module
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("collaborator failed: {0}")]
    Collaborator(#[from] CollaboratorError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Other(String),
}

/// Registration-time misconfiguration
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("module name must not be empty")]
    EmptyName,
    #[error("module '{0}' is already registered")]
    DuplicateName(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

use kiln_ai::ModelError;
use kiln_core::{Classify, ErrorClass};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Router selected unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Agent network has no agents")]
    NoAgents,
}

impl Classify for AgentError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Model(e) => e.class(),
            Self::UnknownAgent(_) | Self::NoAgents => ErrorClass::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

use std::fmt;

use thiserror::Error;

use autosticker_shared::error::{IdentityError, MediaError, TransportError};
use autosticker_shared::types::RecipientIdentity;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid allow-list entry: {0}")]
    AllowList(#[from] IdentityError),

    #[error("Invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Where in the pipeline an event failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Policy,
    Catalog,
    Transform,
    Upload,
    Send,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Policy => "policy",
            Self::Catalog => "catalog",
            Self::Transform => "transform",
            Self::Upload => "upload",
            Self::Send => "send",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Chat {0} is not on the allow-list")]
    PolicyViolation(RecipientIdentity),

    #[error("Catalog: {0}")]
    Catalog(#[source] MediaError),

    #[error("Transform: {0}")]
    Transform(#[source] MediaError),

    #[error("Upload: {0}")]
    Upload(#[source] TransportError),

    #[error("Send: {0}")]
    Send(#[source] TransportError),
}

impl DispatchError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::PolicyViolation(_) => Stage::Policy,
            Self::Catalog(_) => Stage::Catalog,
            Self::Transform(_) => Stage::Transform,
            Self::Upload(_) => Stage::Upload,
            Self::Send(_) => Stage::Send,
        }
    }
}

//! Error taxonomy shared by every stage of the credential refresh.

use std::{io, path::PathBuf};

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("could not find a clouds.yml or clouds.yaml (searched: {searched})")]
    ConfigNotFound { searched: String },

    #[error("neither '{cloud}' nor '{long_term}' found in {}", .path.display())]
    ProfileNotFound {
        cloud: String,
        long_term: String,
        path: PathBuf,
    },

    #[error("failed to parse {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to access {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read input")]
    Prompt(#[source] io::Error),

    #[error("missing value for auth.{0}")]
    MissingField(&'static str),

    #[error("invalid auth_url '{url}': {reason}")]
    InvalidAuthUrl { url: String, reason: String },

    #[error("authentication failed ({status}): {body}")]
    Auth { status: StatusCode, body: String },

    #[error("could not reach identity service at {url}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected identity service response: {0}")]
    InvalidResponse(String),
}

impl Error {
    /// Only transport failures are worth a second attempt. A rejected
    /// password/MFA code must never be resubmitted automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. })
    }
}

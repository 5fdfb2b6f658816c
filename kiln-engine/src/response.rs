//! Request outcomes handed to whatever serving layer binds the dispatcher.

use std::sync::Arc;

use kiln_core::{Artifact, BuildError, KeyDecodeError, RouteId};
use thiserror::Error;

/// Why a request could not be answered with an artifact.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error(transparent)]
    KeyDecode(#[from] KeyDecodeError),

    #[error("Unknown route {route}")]
    UnknownRoute { route: RouteId },

    #[error("Route {route} expects parameters {expected:?}, got {got:?}")]
    InvalidParams {
        route: RouteId,
        expected: Vec<String>,
        got: Vec<String>,
    },

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("Artifact store failed: {reason}")]
    Store { reason: String },
}

impl RequestError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::KeyDecode(_) => "key_decode",
            Self::UnknownRoute { .. } => "unknown_route",
            Self::InvalidParams { .. } => "invalid_params",
            Self::Build(err) => err.kind(),
            Self::Store { .. } => "store",
        }
    }

    /// HTTP status a serving layer would answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::KeyDecode(_) | Self::InvalidParams { .. } => 400,
            Self::UnknownRoute { .. } => 404,
            Self::Build(BuildError::NotFound { .. }) => 404,
            Self::Build(BuildError::Timeout { .. }) => 504,
            Self::Build(BuildError::DataUnavailable { .. }) => 503,
            Self::Build(_) | Self::Store { .. } => 500,
        }
    }
}

/// Result of [`RequestDispatcher::handle`](crate::RequestDispatcher::handle).
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// A cached or freshly built artifact.
    Served(Arc<Artifact>),
    /// No artifact yet; a background build is running.
    Pending,
    NotFound,
    Error(RequestError),
}

impl Response {
    pub fn artifact(&self) -> Option<&Arc<Artifact>> {
        match self {
            Self::Served(artifact) => Some(artifact),
            _ => None,
        }
    }

    pub fn is_served(&self) -> bool {
        matches!(self, Self::Served(_))
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Served(_) => 200,
            Self::Pending => 202,
            Self::NotFound => 404,
            Self::Error(err) => err.status_code(),
        }
    }
}

impl From<RequestError> for Response {
    fn from(err: RequestError) -> Self {
        Self::Error(err)
    }
}

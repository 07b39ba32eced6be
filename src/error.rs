use std::fmt;

use thiserror::Error;

use crate::config::{ConfigError, Upstream};

pub(crate) fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Everything that can go wrong in the gateway. Startup errors (config,
/// manifest, schema, client init) abort the process; request errors are
/// converted into a structured GraphQL error response at the HTTP boundary.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid supergraph manifest: {0}")]
    Manifest(String),

    #[error("failed to read schema fragment for {upstream}: {source}")]
    SchemaRead {
        upstream: Upstream,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse schema fragment for {upstream}: {message}")]
    SchemaParse { upstream: Upstream, message: String },

    #[error("conflicting definitions of {type_name} across {}", join(.sources))]
    SchemaConflict {
        type_name: String,
        sources: Vec<Upstream>,
    },

    #[error("failed to build client for {upstream}: {source}")]
    ClientInit {
        upstream: Upstream,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no upstream owns root field {field:?}")]
    NoRoute { field: String },

    #[error("request to {upstream} failed: {message}")]
    Upstream { upstream: Upstream, message: String },

    #[error("upstreams did not respond in time: {}", join(.incomplete))]
    PartialFailure { incomplete: Vec<Upstream> },
}

impl GatewayError {
    /// Machine-readable code surfaced in the `extensions` object of a
    /// GraphQL error response.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Config(_) => "CONFIG",
            GatewayError::Manifest(_) => "MANIFEST",
            GatewayError::SchemaRead { .. } => "SCHEMA_READ",
            GatewayError::SchemaParse { .. } => "SCHEMA_PARSE",
            GatewayError::SchemaConflict { .. } => "SCHEMA_CONFLICT",
            GatewayError::ClientInit { .. } => "CLIENT_INIT",
            GatewayError::InvalidRequest(_) => "BAD_REQUEST",
            GatewayError::NoRoute { .. } => "NO_ROUTE",
            GatewayError::Upstream { .. } => "UPSTREAM_ERROR",
            GatewayError::PartialFailure { .. } => "PARTIAL_FAILURE",
        }
    }
}

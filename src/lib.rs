//! Federated GraphQL gateway over a fixed set of upstream services.
//!
//! Three backend services (account, catalog, order) each own a fragment of
//! the schema. At startup the fragments are merged into one federated
//! schema; at query time every root field is routed to the upstream that
//! declares it and the responses are stitched back together.

pub mod config;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod http;
pub mod planner;
pub mod registry;

pub use config::{GatewayConfig, Upstream};
pub use error::GatewayError;
pub use executor::HttpQueryExecutor;
pub use gateway::GatewayServer;
pub use planner::RootFieldPlanner;
pub use registry::InMemorySchemaRegistry;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use url::Url;

/// An incoming GraphQL request as posted to `/graphql`.
#[derive(Debug, Serialize, Deserialize)]
pub struct GraphQLRequest {
    pub query: String,
    #[serde(default)]
    pub variables: Option<Value>,
    #[serde(default, rename = "operationName")]
    pub operation_name: Option<String>,
    #[serde(skip)]
    pub auth_headers: Option<HashMap<String, String>>,
}

/// One upstream's schema contribution plus the address it serves from.
#[derive(Debug, Clone)]
pub struct SubgraphFragment {
    pub upstream: Upstream,
    pub url: Url,
    pub sdl: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
}

/// The merged view over every upstream fragment: which upstream serves
/// which root field, and which upstreams declare each named type.
#[derive(Debug, Clone)]
pub struct FederatedSchema {
    pub endpoints: HashMap<Upstream, Url>,
    pub query_fields: HashMap<String, Upstream>,
    pub mutation_fields: HashMap<String, Upstream>,
    pub type_sources: HashMap<String, Vec<Upstream>>,
}

impl FederatedSchema {
    pub fn owner(&self, kind: OperationKind, field: &str) -> Option<Upstream> {
        let fields = match kind {
            OperationKind::Query => &self.query_fields,
            OperationKind::Mutation => &self.mutation_fields,
        };
        fields.get(field).copied()
    }
}

/// One sub-query bound for a single upstream.
#[derive(Debug, Clone)]
pub struct PlannedQuery {
    pub query: String,
    pub variables: Value,
}

/// The fan-out plan for one incoming request.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub queries: HashMap<Upstream, PlannedQuery>,
    pub auth_headers: Option<HashMap<String, String>>,
}

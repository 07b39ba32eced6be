use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::{GatewayConfig, Upstream};
use crate::error::GatewayError;
use crate::executor::{HttpQueryExecutor, QueryExecutor};
use crate::planner::{QueryPlanner, RootFieldPlanner};
use crate::registry::{InMemorySchemaRegistry, SchemaRegistry};
use crate::{GraphQLRequest, SubgraphFragment};

#[derive(Debug, Deserialize)]
struct SupergraphManifest {
    subgraphs: HashMap<String, SubgraphEntry>,
}

#[derive(Debug, Deserialize)]
struct SubgraphEntry {
    schema: SchemaFile,
}

#[derive(Debug, Deserialize)]
struct SchemaFile {
    file: String,
}

/// The serving core: merged schema, planner and per-upstream clients.
/// Construction never binds a listener; exposure is a separate layer.
pub struct GatewayServer {
    registry: Arc<RwLock<Box<dyn SchemaRegistry + Send + Sync>>>,
    planner: Arc<Box<dyn QueryPlanner + Send + Sync>>,
    executor: Arc<Box<dyn QueryExecutor + Send + Sync>>,
}

impl GatewayServer {
    /// Assemble a gateway from already-built components.
    pub fn with_components(
        registry: Box<dyn SchemaRegistry + Send + Sync>,
        planner: Box<dyn QueryPlanner + Send + Sync>,
        executor: Box<dyn QueryExecutor + Send + Sync>,
    ) -> Self {
        GatewayServer {
            registry: Arc::new(RwLock::new(registry)),
            planner: Arc::new(planner),
            executor: Arc::new(executor),
        }
    }

    /// Build the full gateway: read the schema fragments named by the
    /// supergraph manifest, merge them, and open one client per upstream.
    /// A merge conflict or unreachable fragment fails construction
    /// atomically; there is no partially-assembled gateway.
    pub async fn construct(
        config: &GatewayConfig,
        schema_dir: &Path,
    ) -> Result<Self, GatewayError> {
        let fragments = load_fragments(config, schema_dir)?;

        let mut registry: Box<dyn SchemaRegistry + Send + Sync> =
            Box::new(InMemorySchemaRegistry::new());
        for fragment in fragments {
            debug!(upstream = %fragment.upstream, url = %fragment.url, "registering schema fragment");
            registry.register(fragment).await?;
        }

        let schema = registry.schema().await?;
        info!(
            query_fields = schema.query_fields.len(),
            mutation_fields = schema.mutation_fields.len(),
            "merged upstream schemas"
        );

        let executor = HttpQueryExecutor::connect(config)?;

        Ok(Self::with_components(
            registry,
            Box::new(RootFieldPlanner::new()),
            Box::new(executor),
        ))
    }

    /// Plan and fan out one request, returning the stitched response.
    pub async fn execute(&self, request: GraphQLRequest) -> Result<Value, GatewayError> {
        debug!(query = %request.query, "planning request");

        let registry = self.registry.read().await;
        let schema = registry.schema().await?;
        drop(registry);

        let plan = self.planner.plan(&request, &schema).await?;
        self.executor.execute(plan).await
    }

    /// Replace or add one upstream's schema fragment. A fragment that
    /// conflicts with the merged schema is rejected and the gateway keeps
    /// serving the schema it had.
    pub async fn register(&self, fragment: SubgraphFragment) -> Result<(), GatewayError> {
        let mut registry = self.registry.write().await;
        registry.register(fragment).await
    }
}

fn load_fragments(
    config: &GatewayConfig,
    schema_dir: &Path,
) -> Result<Vec<SubgraphFragment>, GatewayError> {
    let manifest_path = schema_dir.join("supergraph.yaml");
    let contents = fs::read_to_string(&manifest_path).map_err(|e| {
        GatewayError::Manifest(format!("failed to read {}: {}", manifest_path.display(), e))
    })?;
    let manifest: SupergraphManifest =
        serde_yaml::from_str(&contents).map_err(|e| GatewayError::Manifest(e.to_string()))?;

    let mut fragments = Vec::new();
    for (name, entry) in manifest.subgraphs {
        let upstream: Upstream = name
            .parse()
            .map_err(|_| GatewayError::Manifest(format!("unknown subgraph {:?}", name)))?;
        let path = schema_dir.join(&entry.schema.file);
        let sdl = fs::read_to_string(&path)
            .map_err(|source| GatewayError::SchemaRead { upstream, source })?;
        fragments.push(SubgraphFragment {
            upstream,
            url: config.url(upstream).clone(),
            sdl,
        });
    }

    for upstream in Upstream::ALL {
        if !fragments.iter().any(|f| f.upstream == upstream) {
            return Err(GatewayError::Manifest(format!(
                "missing subgraph entry for {}",
                upstream
            )));
        }
    }
    fragments.sort_by_key(|f| f.upstream);

    Ok(fragments)
}

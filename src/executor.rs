use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

use crate::QueryPlan;
use crate::config::{GatewayConfig, Upstream};
use crate::error::GatewayError;

#[async_trait]
pub trait QueryExecutor {
    async fn execute(&self, plan: QueryPlan) -> Result<Value, GatewayError>;
}

/// Per-upstream response deadline used by `connect`.
const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// Fans a query plan out to the upstream services over HTTP and stitches
/// the responses back into one GraphQL result.
pub struct HttpQueryExecutor {
    clients: HashMap<Upstream, UpstreamClient>,
    deadline: Duration,
}

struct UpstreamClient {
    url: Url,
    client: Client,
}

impl HttpQueryExecutor {
    pub fn connect(config: &GatewayConfig) -> Result<Self, GatewayError> {
        Self::with_deadline(config, DEFAULT_UPSTREAM_TIMEOUT)
    }

    /// One client per upstream. If any client cannot be built the whole
    /// constructor fails; a gateway missing an upstream must not start.
    pub fn with_deadline(config: &GatewayConfig, deadline: Duration) -> Result<Self, GatewayError> {
        let mut clients = HashMap::new();
        for upstream in Upstream::ALL {
            let client = Client::builder()
                .build()
                .map_err(|source| GatewayError::ClientInit { upstream, source })?;
            clients.insert(
                upstream,
                UpstreamClient {
                    url: config.url(upstream).clone(),
                    client,
                },
            );
        }
        Ok(HttpQueryExecutor { clients, deadline })
    }
}

#[async_trait]
impl QueryExecutor for HttpQueryExecutor {
    async fn execute(&self, plan: QueryPlan) -> Result<Value, GatewayError> {
        let mut calls = Vec::new();

        for (upstream, planned) in plan.queries {
            let Some(handle) = self.clients.get(&upstream) else {
                return Err(GatewayError::Upstream {
                    upstream,
                    message: "no client configured".to_string(),
                });
            };
            let client = handle.client.clone();
            let url = handle.url.clone();
            let auth_headers = plan.auth_headers.clone();
            let deadline = self.deadline;

            calls.push(async move {
                let body = json!({
                    "query": planned.query,
                    "variables": planned.variables,
                });

                let mut request = client
                    .post(url)
                    .header("Content-Type", "application/json")
                    .json(&body);
                if let Some(headers) = &auth_headers {
                    for (name, value) in headers {
                        request = request.header(name, value);
                    }
                }

                let outcome = timeout(deadline, async {
                    let response = request.send().await.map_err(|e| GatewayError::Upstream {
                        upstream,
                        message: e.to_string(),
                    })?;
                    response
                        .json::<Value>()
                        .await
                        .map_err(|e| GatewayError::Upstream {
                            upstream,
                            message: format!("invalid response body: {}", e),
                        })
                })
                .await;

                (upstream, outcome)
            });
        }

        let results = join_all(calls).await;

        let mut merged = json!({});
        let mut incomplete = Vec::new();

        for (upstream, outcome) in results {
            match outcome {
                // Deadline elapsed. Partial results must not masquerade as
                // a complete response, so the whole execution fails.
                Err(_) => incomplete.push(upstream),
                Ok(Ok(response)) => merge_response(&mut merged, upstream, response),
                Ok(Err(error)) => push_error(
                    &mut merged,
                    json!({
                        "message": error.to_string(),
                        "extensions": { "code": error.code() },
                        "upstream": upstream.name(),
                    }),
                ),
            }
        }

        if !incomplete.is_empty() {
            incomplete.sort();
            return Err(GatewayError::PartialFailure { incomplete });
        }

        Ok(merged)
    }
}

fn merge_response(merged: &mut Value, upstream: Upstream, response: Value) {
    if let Some(Value::Object(fields)) = response.get("data") {
        if let Value::Object(data) = &mut merged["data"] {
            for (key, value) in fields {
                data.insert(key.clone(), value.clone());
            }
        } else {
            let mut data = Map::new();
            for (key, value) in fields {
                data.insert(key.clone(), value.clone());
            }
            merged["data"] = Value::Object(data);
        }
    }

    if let Some(Value::Array(errors)) = response.get("errors") {
        for error in errors {
            let mut tagged = error.clone();
            if let Value::Object(obj) = &mut tagged {
                obj.insert(
                    "upstream".to_string(),
                    Value::String(upstream.name().to_string()),
                );
            }
            push_error(merged, tagged);
        }
    }
}

fn push_error(merged: &mut Value, error: Value) {
    match merged.get_mut("errors") {
        Some(Value::Array(list)) => list.push(error),
        _ => {
            merged["errors"] = Value::Array(vec![error]);
        }
    }
}

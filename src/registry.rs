use async_trait::async_trait;
use graphql_parser::parse_schema;
use graphql_parser::schema::{self, Definition, TypeDefinition};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::Upstream;
use crate::error::GatewayError;
use crate::{FederatedSchema, SubgraphFragment};

#[async_trait]
pub trait SchemaRegistry {
    async fn register(&mut self, fragment: SubgraphFragment) -> Result<(), GatewayError>;
    async fn schema(&self) -> Result<FederatedSchema, GatewayError>;
}

/// Holds the raw schema fragments and the merged schema built from them.
/// Registering a fragment re-merges eagerly: a fragment that conflicts with
/// the rest is rejected and the previous state kept, so conflicts never
/// surface at query time.
pub struct InMemorySchemaRegistry {
    fragments: Arc<RwLock<HashMap<Upstream, SubgraphFragment>>>,
    merged: Arc<RwLock<Option<FederatedSchema>>>,
}

impl InMemorySchemaRegistry {
    pub fn new() -> Self {
        InMemorySchemaRegistry {
            fragments: Arc::new(RwLock::new(HashMap::new())),
            merged: Arc::new(RwLock::new(None)),
        }
    }
}

impl Default for InMemorySchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SchemaRegistry for InMemorySchemaRegistry {
    async fn register(&mut self, fragment: SubgraphFragment) -> Result<(), GatewayError> {
        let mut fragments = self.fragments.write().await;
        let upstream = fragment.upstream;
        let previous = fragments.insert(upstream, fragment);

        match merge_fragments(&fragments) {
            Ok(schema) => {
                let mut merged = self.merged.write().await;
                *merged = Some(schema);
                Ok(())
            }
            Err(err) => {
                // Roll back so the registry keeps serving the last good
                // merge. The cache still matches the restored set.
                match previous {
                    Some(p) => fragments.insert(upstream, p),
                    None => fragments.remove(&upstream),
                };
                Err(err)
            }
        }
    }

    async fn schema(&self) -> Result<FederatedSchema, GatewayError> {
        let cached = self.merged.read().await;
        if let Some(schema) = &*cached {
            return Ok(schema.clone());
        }
        drop(cached);

        let fragments = self.fragments.read().await;
        let schema = merge_fragments(&fragments)?;

        let mut merged = self.merged.write().await;
        *merged = Some(schema.clone());

        Ok(schema)
    }
}

/// Merge every registered fragment into one federated schema.
///
/// Root `Query`/`Mutation` types merge field by field; the same root field
/// declared by two upstreams is a conflict. Any other type may appear in
/// several fragments only when the declarations are identical in shape.
fn merge_fragments(
    fragments: &HashMap<Upstream, SubgraphFragment>,
) -> Result<FederatedSchema, GatewayError> {
    let mut endpoints = HashMap::new();
    let mut query_fields: HashMap<String, Upstream> = HashMap::new();
    let mut mutation_fields: HashMap<String, Upstream> = HashMap::new();
    let mut type_sources: HashMap<String, Vec<Upstream>> = HashMap::new();
    let mut type_shapes: HashMap<String, String> = HashMap::new();

    for upstream in Upstream::ALL {
        let Some(fragment) = fragments.get(&upstream) else {
            continue;
        };
        endpoints.insert(upstream, fragment.url.clone());

        let document =
            parse_schema::<String>(&fragment.sdl).map_err(|e| GatewayError::SchemaParse {
                upstream,
                message: e.to_string(),
            })?;

        for definition in &document.definitions {
            let Definition::TypeDefinition(typedef) = definition else {
                continue;
            };
            let name = type_name(typedef);

            if name == "Query" || name == "Mutation" {
                let owners = if name == "Query" {
                    &mut query_fields
                } else {
                    &mut mutation_fields
                };
                if let TypeDefinition::Object(obj) = typedef {
                    for field in &obj.fields {
                        if let Some(previous) = owners.insert(field.name.clone(), upstream) {
                            return Err(GatewayError::SchemaConflict {
                                type_name: format!("{}.{}", name, field.name),
                                sources: vec![previous, upstream],
                            });
                        }
                    }
                }
                continue;
            }

            let shape = shape_of(typedef);
            match type_shapes.get(name) {
                Some(existing) if *existing != shape => {
                    let mut sources = type_sources.get(name).cloned().unwrap_or_default();
                    sources.push(upstream);
                    return Err(GatewayError::SchemaConflict {
                        type_name: name.to_string(),
                        sources,
                    });
                }
                Some(_) => {}
                None => {
                    type_shapes.insert(name.to_string(), shape);
                }
            }
            type_sources
                .entry(name.to_string())
                .or_default()
                .push(upstream);
        }
    }

    Ok(FederatedSchema {
        endpoints,
        query_fields,
        mutation_fields,
        type_sources,
    })
}

fn type_name<'a>(typedef: &'a TypeDefinition<'_, String>) -> &'a str {
    match typedef {
        TypeDefinition::Scalar(t) => &t.name,
        TypeDefinition::Object(t) => &t.name,
        TypeDefinition::Interface(t) => &t.name,
        TypeDefinition::Union(t) => &t.name,
        TypeDefinition::Enum(t) => &t.name,
        TypeDefinition::InputObject(t) => &t.name,
    }
}

/// Canonical fingerprint of a type definition, insensitive to field order,
/// used to decide whether two declarations of the same name agree.
fn shape_of(typedef: &TypeDefinition<'_, String>) -> String {
    match typedef {
        TypeDefinition::Scalar(t) => format!("scalar {}", t.name),
        TypeDefinition::Object(t) => {
            let mut fields: Vec<String> = t.fields.iter().map(field_shape).collect();
            fields.sort();
            format!("type {} {{{}}}", t.name, fields.join(" "))
        }
        TypeDefinition::Interface(t) => {
            let mut fields: Vec<String> = t.fields.iter().map(field_shape).collect();
            fields.sort();
            format!("interface {} {{{}}}", t.name, fields.join(" "))
        }
        TypeDefinition::Union(t) => {
            let mut members = t.types.clone();
            members.sort();
            format!("union {} = {}", t.name, members.join(" | "))
        }
        TypeDefinition::Enum(t) => {
            let mut values: Vec<String> = t.values.iter().map(|v| v.name.clone()).collect();
            values.sort();
            format!("enum {} {{{}}}", t.name, values.join(" "))
        }
        TypeDefinition::InputObject(t) => {
            let mut fields: Vec<String> = t.fields.iter().map(input_shape).collect();
            fields.sort();
            format!("input {} {{{}}}", t.name, fields.join(" "))
        }
    }
}

fn field_shape(field: &schema::Field<'_, String>) -> String {
    let mut args: Vec<String> = field.arguments.iter().map(input_shape).collect();
    args.sort();
    format!(
        "{}({}): {}",
        field.name,
        args.join(", "),
        type_shape(&field.field_type)
    )
}

fn input_shape(value: &schema::InputValue<'_, String>) -> String {
    format!("{}: {}", value.name, type_shape(&value.value_type))
}

fn type_shape(ty: &schema::Type<'_, String>) -> String {
    match ty {
        schema::Type::NamedType(name) => name.clone(),
        schema::Type::ListType(inner) => format!("[{}]", type_shape(inner)),
        schema::Type::NonNullType(inner) => format!("{}!", type_shape(inner)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn fragment(upstream: Upstream, sdl: &str) -> SubgraphFragment {
        SubgraphFragment {
            upstream,
            url: Url::parse(&format!("http://{}:8080/graphql", upstream.name())).unwrap(),
            sdl: sdl.to_string(),
        }
    }

    async fn merge(fragments: Vec<SubgraphFragment>) -> Result<FederatedSchema, GatewayError> {
        let mut registry = InMemorySchemaRegistry::new();
        for f in fragments {
            registry.register(f).await?;
        }
        registry.schema().await
    }

    #[tokio::test]
    async fn root_fields_are_routed_to_their_upstream() {
        let schema = merge(vec![
            fragment(
                Upstream::Account,
                "type Account { id: ID! } type Query { account(id: ID!): Account }",
            ),
            fragment(
                Upstream::Catalog,
                "type Product { id: ID! } type Query { products: [Product!]! }",
            ),
        ])
        .await
        .unwrap();

        assert_eq!(
            schema.owner(crate::OperationKind::Query, "account"),
            Some(Upstream::Account)
        );
        assert_eq!(
            schema.owner(crate::OperationKind::Query, "products"),
            Some(Upstream::Catalog)
        );
        assert_eq!(schema.owner(crate::OperationKind::Query, "orders"), None);
    }

    #[tokio::test]
    async fn identical_shared_types_are_allowed() {
        let schema = merge(vec![
            fragment(
                Upstream::Account,
                "type Money { amount: Float! } type Query { a: Money }",
            ),
            fragment(
                Upstream::Catalog,
                "type Money { amount: Float! } type Query { b: Money }",
            ),
        ])
        .await
        .unwrap();

        assert_eq!(
            schema.type_sources["Money"],
            vec![Upstream::Account, Upstream::Catalog]
        );
    }

    #[tokio::test]
    async fn incompatible_shapes_conflict() {
        let err = merge(vec![
            fragment(
                Upstream::Account,
                "type Money { amount: Float! } type Query { a: Money }",
            ),
            fragment(
                Upstream::Catalog,
                "type Money { amount: Float! currency: String! } type Query { b: Money }",
            ),
        ])
        .await
        .unwrap_err();

        match err {
            GatewayError::SchemaConflict { type_name, sources } => {
                assert_eq!(type_name, "Money");
                assert!(sources.contains(&Upstream::Catalog));
            }
            other => panic!("expected SchemaConflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejected_fragment_leaves_the_previous_schema_in_place() {
        let mut registry = InMemorySchemaRegistry::new();
        registry
            .register(fragment(
                Upstream::Account,
                "type Account { id: ID! } type Query { account(id: ID!): Account }",
            ))
            .await
            .unwrap();

        let err = registry
            .register(fragment(
                Upstream::Catalog,
                "type Account { id: ID! balance: Float! } type Query { products: [Account!]! }",
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::SchemaConflict { .. }));

        let schema = registry.schema().await.unwrap();
        assert_eq!(
            schema.owner(crate::OperationKind::Query, "account"),
            Some(Upstream::Account)
        );
        assert_eq!(schema.owner(crate::OperationKind::Query, "products"), None);
    }

    #[tokio::test]
    async fn duplicate_root_fields_conflict() {
        let err = merge(vec![
            fragment(Upstream::Account, "type Query { ping: String }"),
            fragment(Upstream::Order, "type Query { ping: String }"),
        ])
        .await
        .unwrap_err();

        match err {
            GatewayError::SchemaConflict { type_name, sources } => {
                assert_eq!(type_name, "Query.ping");
                assert_eq!(sources, vec![Upstream::Account, Upstream::Order]);
            }
            other => panic!("expected SchemaConflict, got {other:?}"),
        }
    }
}

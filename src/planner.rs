use async_trait::async_trait;
use graphql_parser::query::{
    Definition, Directive, Document, FragmentDefinition, OperationDefinition, Selection,
    Value as AstValue, parse_query,
};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

use crate::config::Upstream;
use crate::error::GatewayError;
use crate::{FederatedSchema, GraphQLRequest, OperationKind, PlannedQuery, QueryPlan};

#[async_trait]
pub trait QueryPlanner {
    async fn plan(
        &self,
        request: &GraphQLRequest,
        schema: &FederatedSchema,
    ) -> Result<QueryPlan, GatewayError>;
}

/// Routes every root field of the selected operation to the upstream that
/// declares it, then renders one trimmed document per upstream carrying
/// only that upstream's root fields, the variables they use and the
/// fragments they spread.
pub struct RootFieldPlanner;

impl RootFieldPlanner {
    pub fn new() -> Self {
        RootFieldPlanner
    }
}

impl Default for RootFieldPlanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryPlanner for RootFieldPlanner {
    async fn plan(
        &self,
        request: &GraphQLRequest,
        schema: &FederatedSchema,
    ) -> Result<QueryPlan, GatewayError> {
        let document = parse_query::<String>(&request.query)
            .map_err(|e| GatewayError::InvalidRequest(format!("failed to parse query: {}", e)))?;

        let mut fragments: HashMap<String, &FragmentDefinition<'_, String>> = HashMap::new();
        let mut operations = Vec::new();
        for definition in &document.definitions {
            match definition {
                Definition::Operation(op) => operations.push(op),
                Definition::Fragment(frag) => {
                    fragments.insert(frag.name.clone(), frag);
                }
            }
        }

        let operation = select_operation(&operations, request.operation_name.as_deref())?;

        let (kind, selection_set) = match operation {
            OperationDefinition::Query(q) => (OperationKind::Query, &q.selection_set),
            OperationDefinition::SelectionSet(ss) => (OperationKind::Query, ss),
            OperationDefinition::Mutation(m) => (OperationKind::Mutation, &m.selection_set),
            OperationDefinition::Subscription(_) => {
                return Err(GatewayError::InvalidRequest(
                    "subscriptions are not supported".into(),
                ));
            }
        };

        // Group root fields by the upstream that owns them. Iteration order
        // of the selection set is preserved within each group.
        let mut grouped: HashMap<Upstream, Vec<Selection<'_, String>>> = HashMap::new();
        for item in &selection_set.items {
            let Selection::Field(field) = item else {
                return Err(GatewayError::InvalidRequest(
                    "fragments at the operation root are not supported".into(),
                ));
            };
            let Some(owner) = schema.owner(kind, &field.name) else {
                return Err(GatewayError::NoRoute {
                    field: field.name.clone(),
                });
            };
            grouped.entry(owner).or_default().push(item.clone());
        }

        if grouped.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "operation selects no fields".into(),
            ));
        }

        let mut queries = HashMap::new();
        for (upstream, items) in grouped {
            let rendered = render_subquery(operation, &items, &fragments)?;
            let variables = filter_variables(request.variables.as_ref(), &rendered.used_variables);
            queries.insert(
                upstream,
                PlannedQuery {
                    query: rendered.query,
                    variables,
                },
            );
        }

        Ok(QueryPlan {
            queries,
            auth_headers: request.auth_headers.clone(),
        })
    }
}

fn select_operation<'a, 'd>(
    operations: &[&'a OperationDefinition<'d, String>],
    wanted: Option<&str>,
) -> Result<&'a OperationDefinition<'d, String>, GatewayError> {
    match wanted {
        Some(name) => operations
            .iter()
            .copied()
            .find(|op| operation_name(op) == Some(name))
            .ok_or_else(|| GatewayError::InvalidRequest(format!("unknown operation {:?}", name))),
        None => match operations {
            [] => Err(GatewayError::InvalidRequest(
                "document contains no operations".into(),
            )),
            [only] => Ok(only),
            _ => Err(GatewayError::InvalidRequest(
                "operationName is required when a document defines several operations".into(),
            )),
        },
    }
}

fn operation_name<'a>(operation: &'a OperationDefinition<'_, String>) -> Option<&'a str> {
    match operation {
        OperationDefinition::Query(q) => q.name.as_deref(),
        OperationDefinition::Mutation(m) => m.name.as_deref(),
        OperationDefinition::Subscription(s) => s.name.as_deref(),
        OperationDefinition::SelectionSet(_) => None,
    }
}

struct RenderedQuery {
    query: String,
    used_variables: HashSet<String>,
}

/// Rebuild the operation around the given root selections and print it.
/// Variable definitions are trimmed to the variables the kept selections
/// actually reference, and spread fragments travel with the document.
fn render_subquery<'a>(
    operation: &OperationDefinition<'a, String>,
    items: &[Selection<'a, String>],
    fragments: &HashMap<String, &FragmentDefinition<'a, String>>,
) -> Result<RenderedQuery, GatewayError> {
    let mut used_variables = HashSet::new();
    let mut used_fragments = HashSet::new();
    for item in items {
        collect_usages(item, fragments, &mut used_variables, &mut used_fragments)?;
    }

    let trimmed = match operation {
        OperationDefinition::Query(q) => {
            let mut q = q.clone();
            q.selection_set.items = items.to_vec();
            q.variable_definitions
                .retain(|def| used_variables.contains(&def.name));
            OperationDefinition::Query(q)
        }
        OperationDefinition::Mutation(m) => {
            let mut m = m.clone();
            m.selection_set.items = items.to_vec();
            m.variable_definitions
                .retain(|def| used_variables.contains(&def.name));
            OperationDefinition::Mutation(m)
        }
        OperationDefinition::SelectionSet(ss) => {
            let mut ss = ss.clone();
            ss.items = items.to_vec();
            OperationDefinition::SelectionSet(ss)
        }
        OperationDefinition::Subscription(_) => {
            return Err(GatewayError::InvalidRequest(
                "subscriptions are not supported".into(),
            ));
        }
    };

    let mut definitions = vec![Definition::Operation(trimmed)];
    let mut fragment_names: Vec<&String> = used_fragments.iter().collect();
    fragment_names.sort();
    for name in fragment_names {
        if let Some(frag) = fragments.get(name.as_str()) {
            definitions.push(Definition::Fragment((*frag).clone()));
        }
    }

    let document = Document { definitions };
    Ok(RenderedQuery {
        query: document.to_string(),
        used_variables,
    })
}

fn collect_usages<'a>(
    selection: &Selection<'a, String>,
    fragments: &HashMap<String, &FragmentDefinition<'a, String>>,
    variables: &mut HashSet<String>,
    used_fragments: &mut HashSet<String>,
) -> Result<(), GatewayError> {
    match selection {
        Selection::Field(field) => {
            for (_, value) in &field.arguments {
                collect_value(value, variables);
            }
            collect_directives(&field.directives, variables);
            for item in &field.selection_set.items {
                collect_usages(item, fragments, variables, used_fragments)?;
            }
        }
        Selection::InlineFragment(inline) => {
            collect_directives(&inline.directives, variables);
            for item in &inline.selection_set.items {
                collect_usages(item, fragments, variables, used_fragments)?;
            }
        }
        Selection::FragmentSpread(spread) => {
            collect_directives(&spread.directives, variables);
            if used_fragments.insert(spread.fragment_name.clone()) {
                let fragment = fragments.get(&spread.fragment_name).ok_or_else(|| {
                    GatewayError::InvalidRequest(format!(
                        "unknown fragment {:?}",
                        spread.fragment_name
                    ))
                })?;
                collect_directives(&fragment.directives, variables);
                for item in &fragment.selection_set.items {
                    collect_usages(item, fragments, variables, used_fragments)?;
                }
            }
        }
    }
    Ok(())
}

fn collect_directives(directives: &[Directive<'_, String>], variables: &mut HashSet<String>) {
    for directive in directives {
        for (_, value) in &directive.arguments {
            collect_value(value, variables);
        }
    }
}

fn collect_value(value: &AstValue<'_, String>, variables: &mut HashSet<String>) {
    match value {
        AstValue::Variable(name) => {
            variables.insert(name.clone());
        }
        AstValue::List(items) => {
            for item in items {
                collect_value(item, variables);
            }
        }
        AstValue::Object(fields) => {
            for item in fields.values() {
                collect_value(item, variables);
            }
        }
        _ => {}
    }
}

fn filter_variables(variables: Option<&Value>, used: &HashSet<String>) -> Value {
    let mut out = Map::new();
    if let Some(Value::Object(map)) = variables {
        for (key, value) in map {
            if used.contains(key) {
                out.insert(key.clone(), value.clone());
            }
        }
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> FederatedSchema {
        FederatedSchema {
            endpoints: HashMap::new(),
            query_fields: HashMap::from([
                ("account".to_string(), Upstream::Account),
                ("accounts".to_string(), Upstream::Account),
                ("products".to_string(), Upstream::Catalog),
            ]),
            mutation_fields: HashMap::from([("createOrder".to_string(), Upstream::Order)]),
            type_sources: HashMap::new(),
        }
    }

    fn request(query: &str, variables: Option<Value>, operation_name: Option<&str>) -> GraphQLRequest {
        GraphQLRequest {
            query: query.to_string(),
            variables,
            operation_name: operation_name.map(String::from),
            auth_headers: None,
        }
    }

    #[tokio::test]
    async fn splits_a_query_by_owning_upstream() {
        let query = r#"
        query($id: ID!, $filter: String) {
          account(id: $id) { name }
          products(query: $filter) { name price }
        }
        "#;
        let variables = json!({ "id": "1", "filter": "phone" });
        let plan = RootFieldPlanner::new()
            .plan(&request(query, Some(variables), None), &schema())
            .await
            .unwrap();

        assert_eq!(plan.queries.len(), 2);

        let account = &plan.queries[&Upstream::Account];
        assert!(account.query.contains("account"));
        assert!(!account.query.contains("products"));
        assert_eq!(account.variables, json!({ "id": "1" }));

        let catalog = &plan.queries[&Upstream::Catalog];
        assert!(catalog.query.contains("products"));
        assert!(!catalog.query.contains("account("));
        assert_eq!(catalog.variables, json!({ "filter": "phone" }));
    }

    #[tokio::test]
    async fn account_only_query_plans_a_single_call() {
        let plan = RootFieldPlanner::new()
            .plan(
                &request(r#"{ account(id: "1") { name } }"#, None, None),
                &schema(),
            )
            .await
            .unwrap();

        assert_eq!(plan.queries.len(), 1);
        assert!(plan.queries.contains_key(&Upstream::Account));
    }

    #[tokio::test]
    async fn unknown_root_field_has_no_route() {
        let err = RootFieldPlanner::new()
            .plan(&request("{ invoices { id } }", None, None), &schema())
            .await
            .unwrap_err();

        match err {
            GatewayError::NoRoute { field } => assert_eq!(field, "invoices"),
            other => panic!("expected NoRoute, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn mutations_route_through_the_mutation_map() {
        let plan = RootFieldPlanner::new()
            .plan(
                &request(
                    "mutation { createOrder(accountId: \"1\") { id } }",
                    None,
                    None,
                ),
                &schema(),
            )
            .await
            .unwrap();

        assert!(plan.queries.contains_key(&Upstream::Order));
    }

    #[tokio::test]
    async fn operation_name_selects_among_several_operations() {
        let query = r#"
        query Accounts { accounts { id } }
        query Products { products { id } }
        "#;
        let plan = RootFieldPlanner::new()
            .plan(&request(query, None, Some("Products")), &schema())
            .await
            .unwrap();

        assert_eq!(plan.queries.len(), 1);
        assert!(plan.queries.contains_key(&Upstream::Catalog));
    }

    #[tokio::test]
    async fn spread_fragments_travel_with_their_subquery() {
        let query = r#"
        query { account(id: "1") { ...accountFields } }
        fragment accountFields on Account { id name }
        "#;
        let plan = RootFieldPlanner::new()
            .plan(&request(query, None, None), &schema())
            .await
            .unwrap();

        let account = &plan.queries[&Upstream::Account];
        assert!(account.query.contains("fragment accountFields"));
    }

    #[tokio::test]
    async fn subscriptions_are_rejected() {
        let err = RootFieldPlanner::new()
            .plan(
                &request("subscription { accounts { id } }", None, None),
                &schema(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::InvalidRequest(_)));
    }
}

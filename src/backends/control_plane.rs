use crate::error::{Result, SwarmError};
use crate::ports::PortFuture;
use itertools::Itertools;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

const ERROR_BODY_LIMIT: usize = 400;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectHandle {
    pub project_id: String,
    pub environment_id: String,
}

/// Cloud PaaS management API.
pub trait ControlPlane: Send + Sync {
    fn create_project<'a>(&'a self, name: &'a str) -> PortFuture<'a, ProjectHandle>;

    fn create_service<'a>(&'a self, project_id: &'a str, name: &'a str) -> PortFuture<'a, String>;

    fn set_service_image<'a>(&'a self, service_id: &'a str, image: &'a str)
        -> PortFuture<'a, ()>;

    fn set_start_command<'a>(
        &'a self,
        service_id: &'a str,
        command: &'a str,
    ) -> PortFuture<'a, ()>;

    fn set_variables<'a>(
        &'a self,
        project: &'a ProjectHandle,
        service_id: &'a str,
        variables: &'a BTreeMap<String, String>,
    ) -> PortFuture<'a, ()>;

    /// Creates a public domain for the service and returns it.
    fn create_domain<'a>(
        &'a self,
        project: &'a ProjectHandle,
        service_id: &'a str,
    ) -> PortFuture<'a, String>;

    fn delete_project<'a>(&'a self, project_id: &'a str) -> PortFuture<'a, ()>;
}

/// GraphQL control plane. Endpoints are tried in order; the next one is
/// used when an edge firewall blocks the request or the connection fails.
pub struct GraphqlControlPlane {
    client: reqwest::Client,
    token: String,
    endpoints: Vec<String>,
    timeout: Duration,
}

impl GraphqlControlPlane {
    #[must_use]
    pub fn new(token: String, endpoints: Vec<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.trim().to_string(),
            endpoints,
            timeout,
        }
    }

    async fn request(&self, query: &str, variables: Value) -> Result<Value> {
        let payload = json!({"query": query, "variables": variables});
        let mut last_error = None;

        for (index, endpoint) in self.endpoints.iter().enumerate() {
            let has_next = index + 1 < self.endpoints.len();
            let sent = self
                .client
                .post(endpoint)
                .bearer_auth(&self.token)
                .header(reqwest::header::USER_AGENT, concat!("erpswarm/", env!("CARGO_PKG_VERSION")))
                .json(&payload)
                .timeout(self.timeout)
                .send()
                .await;

            let response = match sent {
                Ok(response) => response,
                Err(err) => {
                    let error = SwarmError::TransportError(format!(
                        "Control plane connection error via {endpoint}: {err}"
                    ));
                    if has_next {
                        warn!(endpoint, error = %error, "Trying next control plane endpoint");
                        last_error = Some(error);
                        continue;
                    }
                    return Err(error);
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let error = SwarmError::ProvisioningError(format_http_error(
                    endpoint,
                    status.as_u16(),
                    &body,
                ));
                if has_next && is_edge_block(status.as_u16(), &body) {
                    warn!(endpoint, "Control plane endpoint blocked; trying next");
                    last_error = Some(error);
                    continue;
                }
                return Err(error);
            }

            let body: Value = response.json().await?;
            debug!(endpoint, "Control plane request succeeded");
            return graphql_data(endpoint, body);
        }

        Err(last_error.unwrap_or_else(|| {
            SwarmError::ConfigError("No control plane endpoints configured".to_string())
        }))
    }
}

/// Edge firewall rejection (HTTP 403, "error code: 1010").
fn is_edge_block(status: u16, body: &str) -> bool {
    status == 403 && body.to_lowercase().contains("error code: 1010")
}

fn compact_body(body: &str) -> String {
    let compact = body.split_whitespace().join(" ");
    if compact.chars().count() > ERROR_BODY_LIMIT {
        format!("{}...", compact.chars().take(ERROR_BODY_LIMIT).collect::<String>())
    } else {
        compact
    }
}

fn format_http_error(endpoint: &str, status: u16, body: &str) -> String {
    if is_edge_block(status, body) {
        format!(
            "Control plane HTTP 403 (edge firewall 1010) via {endpoint}: request blocked. \
             Set CLOUD_API_URL to another endpoint or retry from a different network."
        )
    } else {
        format!(
            "Control plane HTTP {status} via {endpoint}: {}",
            compact_body(body)
        )
    }
}

fn graphql_data(endpoint: &str, body: Value) -> Result<Value> {
    if let Some(errors) = body.get("errors") {
        return Err(SwarmError::ProvisioningError(format!(
            "Control plane error via {endpoint}: {errors}"
        )));
    }
    Ok(body.get("data").cloned().unwrap_or(Value::Null))
}

fn string_at(data: &Value, pointer: &str) -> Result<String> {
    data.pointer(pointer)
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| {
            SwarmError::ProvisioningError(format!("Control plane response is missing {pointer}"))
        })
}

impl ControlPlane for GraphqlControlPlane {
    fn create_project<'a>(&'a self, name: &'a str) -> PortFuture<'a, ProjectHandle> {
        Box::pin(async move {
            let data = self
                .request(
                    "mutation($name: String!) { projectCreate(input: { name: $name }) { \
                     id environments { edges { node { id } } } } }",
                    json!({"name": name}),
                )
                .await?;
            Ok(ProjectHandle {
                project_id: string_at(&data, "/projectCreate/id")?,
                environment_id: string_at(&data, "/projectCreate/environments/edges/0/node/id")?,
            })
        })
    }

    fn create_service<'a>(&'a self, project_id: &'a str, name: &'a str) -> PortFuture<'a, String> {
        Box::pin(async move {
            let data = self
                .request(
                    "mutation($projectId: String!, $name: String!) { \
                     serviceCreate(input: { projectId: $projectId, name: $name }) { id } }",
                    json!({"projectId": project_id, "name": name}),
                )
                .await?;
            string_at(&data, "/serviceCreate/id")
        })
    }

    fn set_service_image<'a>(
        &'a self,
        service_id: &'a str,
        image: &'a str,
    ) -> PortFuture<'a, ()> {
        Box::pin(async move {
            self.request(
                "mutation($serviceId: String!, $image: String!) { \
                 serviceInstanceUpdate(serviceId: $serviceId, input: { source: { image: $image } }) }",
                json!({"serviceId": service_id, "image": image}),
            )
            .await
            .map(|_| ())
        })
    }

    fn set_start_command<'a>(
        &'a self,
        service_id: &'a str,
        command: &'a str,
    ) -> PortFuture<'a, ()> {
        Box::pin(async move {
            self.request(
                "mutation($serviceId: String!, $startCommand: String!) { \
                 serviceInstanceUpdate(serviceId: $serviceId, input: { startCommand: $startCommand }) }",
                json!({"serviceId": service_id, "startCommand": command}),
            )
            .await
            .map(|_| ())
        })
    }

    fn set_variables<'a>(
        &'a self,
        project: &'a ProjectHandle,
        service_id: &'a str,
        variables: &'a BTreeMap<String, String>,
    ) -> PortFuture<'a, ()> {
        Box::pin(async move {
            self.request(
                "mutation($input: VariableCollectionUpsertInput!) { \
                 variableCollectionUpsert(input: $input) }",
                json!({"input": {
                    "projectId": project.project_id,
                    "environmentId": project.environment_id,
                    "serviceId": service_id,
                    "variables": variables,
                }}),
            )
            .await
            .map(|_| ())
        })
    }

    fn create_domain<'a>(
        &'a self,
        project: &'a ProjectHandle,
        service_id: &'a str,
    ) -> PortFuture<'a, String> {
        Box::pin(async move {
            let data = self
                .request(
                    "mutation($serviceId: String!, $environmentId: String!) { \
                     serviceDomainCreate(input: { serviceId: $serviceId, \
                     environmentId: $environmentId }) { domain } }",
                    json!({"serviceId": service_id, "environmentId": project.environment_id}),
                )
                .await?;
            string_at(&data, "/serviceDomainCreate/domain")
        })
    }

    fn delete_project<'a>(&'a self, project_id: &'a str) -> PortFuture<'a, ()> {
        Box::pin(async move {
            self.request(
                "mutation($id: String!) { projectDelete(id: $id) }",
                json!({"id": project_id}),
            )
            .await
            .map(|_| ())
        })
    }
}

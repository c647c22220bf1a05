use crate::error::SwarmError;
use crate::ports::PortFuture;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::trace;

/// One remote procedure call: `service.method(args)` at `endpoint`.
pub trait RpcTransport: Send + Sync {
    fn call<'a>(
        &'a self,
        endpoint: &'a str,
        service: &'a str,
        method: &'a str,
        args: Vec<Value>,
    ) -> PortFuture<'a, Value>;
}

/// JSON-RPC 2.0 over HTTP POST.
pub struct JsonRpcTransport {
    client: reqwest::Client,
    timeout: Duration,
    next_id: AtomicU64,
}

impl JsonRpcTransport {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
            next_id: AtomicU64::new(1),
        }
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl JsonRpcError {
    fn describe(&self) -> String {
        let detail = self
            .data
            .as_ref()
            .and_then(|data| data.get("message"))
            .and_then(Value::as_str)
            .filter(|detail| !detail.is_empty());
        match detail {
            Some(detail) => format!("{}: {detail}", self.message),
            None => self.message.clone(),
        }
    }
}

impl RpcTransport for JsonRpcTransport {
    fn call<'a>(
        &'a self,
        endpoint: &'a str,
        service: &'a str,
        method: &'a str,
        args: Vec<Value>,
    ) -> PortFuture<'a, Value> {
        Box::pin(async move {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let payload = json!({
                "jsonrpc": "2.0",
                "method": "call",
                "params": {"service": service, "method": method, "args": args},
                "id": id,
            });
            trace!(endpoint, service, method, id, "JSON-RPC call");

            let response = self
                .client
                .post(endpoint)
                .json(&payload)
                .timeout(self.timeout)
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                return Err(SwarmError::TransportError(format!(
                    "{endpoint} returned HTTP {status}"
                )));
            }
            let body: JsonRpcResponse = response.json().await?;
            match (body.error, body.result) {
                (Some(error), _) => Err(SwarmError::RemoteFault(error.describe())),
                (None, Some(result)) => Ok(result),
                (None, None) => Ok(Value::Null),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::JsonRpcError;
    use serde_json::json;

    #[test]
    fn fault_description_includes_server_detail() {
        let error: JsonRpcError = serde_json::from_value(json!({
            "message": "Odoo Server Error",
            "data": {"message": "Access Denied"}
        }))
        .map_err(|e| e.to_string())
        .unwrap_or_else(|e| JsonRpcError {
            message: e,
            data: None,
        });
        assert_eq!(error.describe(), "Odoo Server Error: Access Denied");
    }
}

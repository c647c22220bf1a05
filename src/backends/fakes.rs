//! In-memory ports for backend tests.
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use super::{CommandOutput, CommandRunner, ControlPlane, HealthProbe, ProjectHandle};
use crate::build::{BuildHandle, NoProgress, TaskContext};
use crate::error::{Result, SwarmError};
use crate::ports::PortFuture;
use crate::rpc::RpcTransport;
use crate::types::{BuildId, BuildState, BuildTask, DeployTarget, TaskKind};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A running build with a single started task.
pub fn task_context(target: DeployTarget) -> (BuildHandle, TaskContext) {
    let mut state = BuildState::new(BuildId::new("build-test"), "spec-test", target);
    let mut task = BuildTask::new(TaskKind::Provision, "Test Task", "");
    task.start();
    state.tasks = vec![task];
    let handle = BuildHandle::new(state, Arc::new(NoProgress), 500);
    let ctx = handle.task(0);
    (handle, ctx)
}

pub fn logs(handle: &BuildHandle) -> Vec<String> {
    handle.state.read().tasks[0].logs.iter().cloned().collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErpCall {
    pub model: String,
    pub method: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

/// ERP instance speaking the current protocol generation.
#[derive(Clone, Default)]
pub struct FakeErp {
    calls: Arc<Mutex<Vec<ErpCall>>>,
    logins: Arc<Mutex<u32>>,
    modules: Arc<Mutex<BTreeMap<String, (i64, String)>>>,
    responses: Arc<Mutex<HashMap<String, Value>>>,
    faults: Arc<Mutex<HashMap<String, String>>>,
    transport_failures: Arc<Mutex<HashMap<String, u32>>>,
    next_id: Arc<Mutex<i64>>,
}

impl FakeErp {
    pub async fn with_module(self, name: &str, id: i64, state: &str) -> Self {
        self.modules
            .lock()
            .await
            .insert(name.to_string(), (id, state.to_string()));
        self
    }

    /// Fixed answer for `model.method`.
    pub async fn answering(self, call: &str, value: Value) -> Self {
        self.responses.lock().await.insert(call.to_string(), value);
        self
    }

    pub async fn faulting(self, call: &str, message: &str) -> Self {
        self.faults
            .lock()
            .await
            .insert(call.to_string(), message.to_string());
        self
    }

    pub async fn dropping(self, call: &str, times: u32) -> Self {
        self.transport_failures
            .lock()
            .await
            .insert(call.to_string(), times);
        self
    }

    pub async fn calls(&self) -> Vec<ErpCall> {
        self.calls.lock().await.clone()
    }

    pub async fn calls_to(&self, call: &str) -> Vec<ErpCall> {
        self.calls()
            .await
            .into_iter()
            .filter(|recorded| format!("{}.{}", recorded.model, recorded.method) == call)
            .collect()
    }

    pub async fn logins(&self) -> u32 {
        *self.logins.lock().await
    }

    pub async fn module_state(&self, name: &str) -> Option<String> {
        self.modules
            .lock()
            .await
            .get(name)
            .map(|(_, state)| state.clone())
    }

    async fn object(&self, args: Vec<Value>) -> Result<Value> {
        let model = args.get(3).and_then(Value::as_str).unwrap_or_default().to_string();
        let method = args.get(4).and_then(Value::as_str).unwrap_or_default().to_string();
        let positional = args.get(5).and_then(Value::as_array).cloned().unwrap_or_default();
        let kwargs = args.get(6).and_then(Value::as_object).cloned().unwrap_or_default();
        let key = format!("{model}.{method}");
        self.calls.lock().await.push(ErpCall {
            model: model.clone(),
            method: method.clone(),
            args: positional.clone(),
            kwargs,
        });

        if let Some(remaining) = self.transport_failures.lock().await.get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SwarmError::TransportError("connection reset".to_string()));
            }
        }
        if let Some(fault) = self.faults.lock().await.get(&key) {
            return Err(SwarmError::RemoteFault(fault.clone()));
        }
        if let Some(value) = self.responses.lock().await.get(&key) {
            return Ok(value.clone());
        }

        if model == "ir.module.module" {
            return self.module_call(&method, &positional).await;
        }
        match method.as_str() {
            "create" => {
                let mut next = self.next_id.lock().await;
                *next += 1;
                Ok(json!(100 + *next))
            }
            "search" | "read" => Ok(json!([])),
            _ => Ok(json!(true)),
        }
    }

    async fn module_call(&self, method: &str, positional: &[Value]) -> Result<Value> {
        let mut modules = self.modules.lock().await;
        match method {
            "update_list" => Ok(json!([0, 0])),
            "search" => {
                let name = positional[0][0][2].as_str().unwrap_or_default();
                Ok(modules
                    .get(name)
                    .map_or_else(|| json!([]), |(id, _)| json!([id])))
            }
            "read" => {
                let id = positional[0][0].as_i64().unwrap_or_default();
                let state = modules
                    .values()
                    .find(|(module_id, _)| *module_id == id)
                    .map_or("unknown", |(_, state)| state.as_str());
                Ok(json!([{"id": id, "state": state}]))
            }
            "button_immediate_install" | "button_install" => {
                let id = positional[0][0].as_i64().unwrap_or_default();
                for (module_id, state) in modules.values_mut() {
                    if *module_id == id && state != "uninstallable" {
                        *state = "installed".to_string();
                    }
                }
                Ok(json!(true))
            }
            other => Err(SwarmError::RemoteFault(format!("unexpected call {other}"))),
        }
    }
}

impl RpcTransport for FakeErp {
    fn call<'a>(
        &'a self,
        _endpoint: &'a str,
        service: &'a str,
        _method: &'a str,
        args: Vec<Value>,
    ) -> PortFuture<'a, Value> {
        Box::pin(async move {
            if service == "common" {
                *self.logins.lock().await += 1;
                return Ok(json!(2));
            }
            self.object(args).await
        })
    }
}

/// Scripted process runner keyed on the joined command line.
#[derive(Clone, Default)]
pub struct FakeCommands {
    calls: Arc<Mutex<Vec<String>>>,
    outputs: Arc<Mutex<HashMap<String, VecDeque<Result<CommandOutput>>>>>,
}

impl FakeCommands {
    /// Queues an outcome for the first command line starting with `prefix`.
    pub async fn on(self, prefix: &str, outcome: Result<CommandOutput>) -> Self {
        self.outputs
            .lock()
            .await
            .entry(prefix.to_string())
            .or_default()
            .push_back(outcome);
        self
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

pub fn exited(code: i32, stdout: &str, stderr: &str) -> Result<CommandOutput> {
    Ok(CommandOutput {
        exit_code: code,
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        truncated: false,
    })
}

impl CommandRunner for FakeCommands {
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [String],
        _cwd: Option<&'a Path>,
    ) -> PortFuture<'a, CommandOutput> {
        Box::pin(async move {
            let line = std::iter::once(program.to_string())
                .chain(args.iter().cloned())
                .collect::<Vec<_>>()
                .join(" ");
            self.calls.lock().await.push(line.clone());
            let mut outputs = self.outputs.lock().await;
            let queued = outputs
                .iter_mut()
                .filter(|(prefix, queue)| line.starts_with(prefix.as_str()) && !queue.is_empty())
                .max_by_key(|(prefix, _)| prefix.len())
                .and_then(|(_, queue)| queue.pop_front());
            queued.unwrap_or_else(|| exited(0, "", ""))
        })
    }
}

/// Health probe that turns healthy after a number of checks.
#[derive(Clone, Default)]
pub struct FakeHealth {
    checks: Arc<Mutex<Vec<String>>>,
    healthy_after: Arc<Mutex<Option<usize>>>,
}

impl FakeHealth {
    pub async fn healthy_after(self, checks: usize) -> Self {
        *self.healthy_after.lock().await = Some(checks);
        self
    }

    pub async fn checks(&self) -> Vec<String> {
        self.checks.lock().await.clone()
    }
}

impl HealthProbe for FakeHealth {
    fn check<'a>(&'a self, url: &'a str) -> PortFuture<'a, bool> {
        Box::pin(async move {
            let mut checks = self.checks.lock().await;
            checks.push(url.to_string());
            let healthy = self
                .healthy_after
                .lock()
                .await
                .is_some_and(|after| checks.len() > after);
            Ok(healthy)
        })
    }
}

/// Control plane recording every mutation.
#[derive(Clone, Default)]
pub struct FakeControlPlane {
    calls: Arc<Mutex<Vec<String>>>,
    variables: Arc<Mutex<BTreeMap<String, BTreeMap<String, String>>>>,
    fail_on: Arc<Mutex<Option<String>>>,
}

impl FakeControlPlane {
    pub async fn failing_on(self, operation: &str) -> Self {
        *self.fail_on.lock().await = Some(operation.to_string());
        self
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    pub async fn variables_of(&self, service_id: &str) -> BTreeMap<String, String> {
        self.variables
            .lock()
            .await
            .get(service_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn record(&self, call: String) -> Result<()> {
        let operation = call.split(':').next().unwrap_or_default().to_string();
        self.calls.lock().await.push(call);
        if self.fail_on.lock().await.as_deref() == Some(operation.as_str()) {
            return Err(SwarmError::ProvisioningError(format!("{operation} rejected")));
        }
        Ok(())
    }
}

impl ControlPlane for FakeControlPlane {
    fn create_project<'a>(&'a self, name: &'a str) -> PortFuture<'a, ProjectHandle> {
        Box::pin(async move {
            self.record(format!("create_project:{name}")).await?;
            Ok(ProjectHandle {
                project_id: "proj-1".to_string(),
                environment_id: "env-1".to_string(),
            })
        })
    }

    fn create_service<'a>(&'a self, _project_id: &'a str, name: &'a str) -> PortFuture<'a, String> {
        Box::pin(async move {
            self.record(format!("create_service:{name}")).await?;
            Ok(format!("svc-{}", name.to_lowercase()))
        })
    }

    fn set_service_image<'a>(
        &'a self,
        service_id: &'a str,
        image: &'a str,
    ) -> PortFuture<'a, ()> {
        Box::pin(async move { self.record(format!("set_image:{service_id}:{image}")).await })
    }

    fn set_start_command<'a>(
        &'a self,
        service_id: &'a str,
        command: &'a str,
    ) -> PortFuture<'a, ()> {
        Box::pin(async move {
            self.record(format!("set_start_command:{service_id}:{command}"))
                .await
        })
    }

    fn set_variables<'a>(
        &'a self,
        _project: &'a ProjectHandle,
        service_id: &'a str,
        variables: &'a BTreeMap<String, String>,
    ) -> PortFuture<'a, ()> {
        Box::pin(async move {
            self.record(format!("set_variables:{service_id}")).await?;
            self.variables
                .lock()
                .await
                .insert(service_id.to_string(), variables.clone());
            Ok(())
        })
    }

    fn create_domain<'a>(
        &'a self,
        _project: &'a ProjectHandle,
        service_id: &'a str,
    ) -> PortFuture<'a, String> {
        Box::pin(async move {
            self.record(format!("create_domain:{service_id}")).await?;
            Ok("acme-odoo.up.example.app".to_string())
        })
    }

    fn delete_project<'a>(&'a self, project_id: &'a str) -> PortFuture<'a, ()> {
        Box::pin(async move { self.record(format!("delete_project:{project_id}")).await })
    }
}

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use bmc_converge_lib::{
    read_json, CapabilityValidator, ChangeRequest, ControllerInventory, ConvergencePoller,
    ConvergenceService, DesiredFields, HttpManagementClient, HttpSessionConnector,
    ReconnectSupervisor, RequestMethod, TaskSupervisor, VolumeRequest,
};

use super::SupervisorState;

pub(super) async fn try_handle(
    state: &SupervisorState,
    method: &str,
    params: &Value,
) -> Option<Result<Value, String>> {
    match method {
        "wait_job" => Some(wait_job(state, params).await),
        "job_log" => Some(job_log(state, params).await),
        "converge" => Some(converge(state, params).await),
        "apply_change" => Some(apply_change(state, params, false).await),
        "patch_with_etag" => Some(apply_change(state, params, true).await),
        "confirm_media" => Some(confirm_media(state, params).await),
        "reconnect" => Some(reconnect(state, params).await),
        "await_ready" => Some(await_ready(state, params).await),
        "validate_volume" => Some(validate_volume(state, params)),
        _ => None,
    }
}

async fn wait_job(state: &SupervisorState, params: &Value) -> Result<Value, String> {
    let location = parse_string(params, "location")?;
    let timeout = parse_seconds(params, "timeoutSeconds")?.unwrap_or(Duration::from_secs(300));
    let client = connect(state)?;
    let job = TaskSupervisor::from_settings(&client, &state.settings)
        .with_cancellation(state.cancel.clone())
        .wait_for_job(&location, timeout)
        .await
        .map_err(|error| error.to_string())?;
    serde_json::to_value(job).map_err(|error| error.to_string())
}

async fn job_log(state: &SupervisorState, params: &Value) -> Result<Value, String> {
    let location = parse_string(params, "location")?;
    let client = connect(state)?;
    let log = TaskSupervisor::from_settings(&client, &state.settings)
        .fetch_job_log(&location)
        .await
        .map_err(|error| error.to_string())?;
    Ok(json!({
        "diagnostics": log.diagnostics,
        "raw": log.raw_text(),
    }))
}

async fn converge(state: &SupervisorState, params: &Value) -> Result<Value, String> {
    let path = parse_string(params, "path")?;
    let desired: DesiredFields = parse_required(params, "desired")?;
    let timeout = parse_seconds(params, "timeoutSeconds")?.unwrap_or(Duration::from_secs(300));
    let client = connect(state)?;
    ConvergencePoller::from_settings(&state.settings, timeout)
        .named(format!("convergence of {path}"))
        .with_cancellation(state.cancel.clone())
        .poll_until_converged(&desired, || read_json(&client, &path))
        .await
        .map_err(|error| error.to_string())
}

async fn apply_change(
    state: &SupervisorState,
    params: &Value,
    guard_with_etag: bool,
) -> Result<Value, String> {
    let target = state.target()?;
    let category = parse_string(params, "category")?;
    let path = parse_string(params, "path")?;
    let method = if guard_with_etag {
        RequestMethod::Patch
    } else {
        parse_required(params, "method")?
    };

    let mut request = ChangeRequest::new(target.endpoint.clone(), category, method, path);
    if let Some(payload) = params.get("payload").filter(|value| !value.is_null()) {
        request = request.with_payload(payload.clone());
    }
    if let Some(desired) = parse_optional::<DesiredFields>(params, "desired")? {
        request.desired = desired;
    }
    if let Some(read_path) = parse_optional::<String>(params, "readPath")? {
        request = request.read_back_from(read_path);
    }
    if let Some(timeout) = parse_seconds(params, "timeoutSeconds")? {
        request = request.with_timeout(timeout);
    }

    let client = connect(state)?;
    let service = ConvergenceService::new(&state.locks, state.settings.clone())
        .with_cancellation(state.cancel.clone());
    let outcome = if guard_with_etag {
        service.patch_with_etag(&client, &request).await
    } else {
        service.apply_change(&client, &request).await
    }
    .map_err(|error| error.to_string())?;
    serde_json::to_value(outcome).map_err(|error| error.to_string())
}

async fn confirm_media(state: &SupervisorState, params: &Value) -> Result<Value, String> {
    let path = parse_string(params, "path")?;
    let client = connect(state)?;
    ConvergenceService::new(&state.locks, state.settings.clone())
        .with_cancellation(state.cancel.clone())
        .confirm_media_inserted(&client, &path)
        .await
        .map_err(|error| error.to_string())
}

async fn reconnect(state: &SupervisorState, params: &Value) -> Result<Value, String> {
    let target = state.target()?;
    let timeout = parse_seconds(params, "timeoutSeconds")?
        .unwrap_or_else(|| state.settings.reconnect_timeout());
    let connector = HttpSessionConnector::new(target.clone())
        .with_service_root(state.settings.liveness_path.clone());
    ReconnectSupervisor::from_settings(&state.settings)
        .with_cancellation(state.cancel.clone())
        .reconnect_with_retry(&connector, timeout)
        .await
        .map_err(|error| error.to_string())?;
    Ok(json!({ "target": target.endpoint, "reconnected": true }))
}

async fn await_ready(state: &SupervisorState, params: &Value) -> Result<Value, String> {
    let interval = parse_seconds(params, "intervalSeconds")?
        .unwrap_or_else(|| state.settings.readiness_interval());
    let timeout = parse_seconds(params, "timeoutSeconds")?
        .unwrap_or_else(|| state.settings.readiness_timeout());
    let client = connect(state)?;
    ReconnectSupervisor::from_settings(&state.settings)
        .with_cancellation(state.cancel.clone())
        .await_ready(&client, interval, timeout)
        .await
        .map_err(|error| error.to_string())?;
    Ok(json!({ "ready": true }))
}

fn validate_volume(state: &SupervisorState, params: &Value) -> Result<Value, String> {
    let request: VolumeRequest = parse_required(params, "request")?;
    let controller: ControllerInventory = parse_required(params, "controller")?;
    let groups = CapabilityValidator::new(state.settings.slot_resolution)
        .validate(&request, &controller)
        .map_err(|error| error.to_string())?;
    Ok(json!({ "diskGroups": groups }))
}

fn connect(state: &SupervisorState) -> Result<HttpManagementClient, String> {
    HttpManagementClient::new(state.target()?.clone()).map_err(|error| error.to_string())
}

fn parse_string(params: &Value, key: &str) -> Result<String, String> {
    match params.get(key) {
        Some(Value::String(value)) if !value.trim().is_empty() => Ok(value.clone()),
        Some(_) => Err(format!("`{key}` must be a non-empty string")),
        None => Err(format!("missing `{key}`")),
    }
}

fn parse_optional<T: DeserializeOwned>(params: &Value, key: &str) -> Result<Option<T>, String> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|error| format!("invalid `{key}`: {error}")),
    }
}

fn parse_required<T: DeserializeOwned>(params: &Value, key: &str) -> Result<T, String> {
    parse_optional(params, key)?.ok_or_else(|| format!("missing `{key}`"))
}

fn parse_seconds(params: &Value, key: &str) -> Result<Option<Duration>, String> {
    Ok(parse_optional::<u64>(params, key)?.map(Duration::from_secs))
}

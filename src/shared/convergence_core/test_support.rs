use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use super::client::{ClientFuture, ClientRequest, ClientResponse, ManagementClient, RequestMethod};
use super::error::ConvergeError;

pub(crate) fn run_async<F>(future: F)
where
    F: Future<Output = ()>,
{
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .expect("test runtime")
        .block_on(future);
}

pub(crate) fn json_response(status: u16, body: Value) -> Result<ClientResponse, ConvergeError> {
    Ok(ClientResponse::new(status).with_json(&body))
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub method: RequestMethod,
    pub path: String,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
    pub at: Duration,
}

type Script = VecDeque<Result<ClientResponse, ConvergeError>>;

/// Replays canned responses per (method, path). The last scripted response
/// for a route repeats forever; unscripted routes answer 404.
pub(crate) struct ScriptedClient {
    started: Instant,
    routes: Mutex<HashMap<(RequestMethod, String), Script>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedClient {
    pub(crate) fn new() -> Self {
        Self {
            started: Instant::now(),
            routes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn on(
        self,
        method: RequestMethod,
        path: &str,
        responses: Vec<Result<ClientResponse, ConvergeError>>,
    ) -> Self {
        self.routes
            .lock()
            .expect("routes lock")
            .insert((method, path.to_string()), responses.into_iter().collect());
        self
    }

    pub(crate) fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub(crate) fn calls_to(&self, method: RequestMethod, path: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.method == method && call.path == path)
            .collect()
    }

    fn next_response(&self, method: RequestMethod, path: &str) -> Result<ClientResponse, ConvergeError> {
        let mut routes = self.routes.lock().expect("routes lock");
        let Some(script) = routes.get_mut(&(method, path.to_string())) else {
            return Ok(ClientResponse::new(404));
        };
        if script.len() > 1 {
            script.pop_front().unwrap_or_else(|| Ok(ClientResponse::new(404)))
        } else {
            script
                .front()
                .cloned()
                .unwrap_or_else(|| Ok(ClientResponse::new(404)))
        }
    }
}

impl ManagementClient for ScriptedClient {
    fn send<'a>(
        &'a self,
        request: ClientRequest,
    ) -> ClientFuture<'a, Result<ClientResponse, ConvergeError>> {
        Box::pin(async move {
            self.calls.lock().expect("calls lock").push(RecordedCall {
                method: request.method,
                path: request.path.clone(),
                body: request.body.clone(),
                headers: request.headers.clone(),
                at: self.started.elapsed(),
            });
            self.next_response(request.method, &request.path)
        })
    }
}

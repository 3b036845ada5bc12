use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::config::BmcTargetConfig;
use super::error::ConvergeError;

pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

const DEFAULT_SERVICE_ROOT: &str = "/redfish/v1";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl RequestMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestMethod::Get => "GET",
            RequestMethod::Post => "POST",
            RequestMethod::Patch => "PATCH",
            RequestMethod::Delete => "DELETE",
        }
    }

    fn to_http(self) -> Method {
        match self {
            RequestMethod::Get => Method::GET,
            RequestMethod::Post => Method::POST,
            RequestMethod::Patch => Method::PATCH,
            RequestMethod::Delete => Method::DELETE,
        }
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientRequest {
    pub method: RequestMethod,
    pub path: String,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
}

impl ClientRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self::without_body(RequestMethod::Get, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::without_body(RequestMethod::Delete, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::without_body(RequestMethod::Post, path).with_body(body)
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::without_body(RequestMethod::Patch, path).with_body(body)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn without_body(method: RequestMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: Vec::new(),
        }
    }
}

/// Raw response from the management endpoint. Header names are stored
/// lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl ClientResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_json(self, value: &Value) -> Self {
        self.with_body(value.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn etag(&self) -> Option<&str> {
        self.header("etag")
    }

    pub fn location(&self) -> Option<&str> {
        self.header("location")
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T>(&self, context: &str) -> Result<T, ConvergeError>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(&self.body).map_err(|error| ConvergeError::decode(context, error))
    }
}

pub trait ManagementClient: Send + Sync {
    fn send<'a>(
        &'a self,
        request: ClientRequest,
    ) -> ClientFuture<'a, Result<ClientResponse, ConvergeError>>;

    fn get<'a>(&'a self, path: &str) -> ClientFuture<'a, Result<ClientResponse, ConvergeError>> {
        self.send(ClientRequest::get(path))
    }

    fn post<'a>(
        &'a self,
        path: &str,
        body: Value,
    ) -> ClientFuture<'a, Result<ClientResponse, ConvergeError>> {
        self.send(ClientRequest::post(path, body))
    }

    fn patch<'a>(
        &'a self,
        path: &str,
        body: Value,
    ) -> ClientFuture<'a, Result<ClientResponse, ConvergeError>> {
        self.send(ClientRequest::patch(path, body))
    }

    fn delete<'a>(&'a self, path: &str) -> ClientFuture<'a, Result<ClientResponse, ConvergeError>> {
        self.send(ClientRequest::delete(path))
    }
}

impl<T> ManagementClient for Arc<T>
where
    T: ManagementClient + ?Sized,
{
    fn send<'a>(
        &'a self,
        request: ClientRequest,
    ) -> ClientFuture<'a, Result<ClientResponse, ConvergeError>> {
        (**self).send(request)
    }
}

pub trait SessionConnector: Send + Sync {
    type Session: Send;

    fn target(&self) -> &str;

    fn connect<'a>(&'a self) -> ClientFuture<'a, Result<Self::Session, ConvergeError>>;
}

/// GET a resource and decode it as JSON, failing on any non-200 status.
pub async fn read_json<C>(client: &C, path: &str) -> Result<Value, ConvergeError>
where
    C: ManagementClient + ?Sized,
{
    let response = client.get(path).await?;
    if response.status != 200 {
        return Err(ConvergeError::unexpected_status(
            RequestMethod::Get,
            path,
            &response,
        ));
    }
    response.json(path)
}

#[derive(Debug, Clone)]
pub struct HttpManagementClient {
    http: Client,
    config: BmcTargetConfig,
}

impl HttpManagementClient {
    pub fn new(config: BmcTargetConfig) -> Result<Self, ConvergeError> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(config.insecure_tls)
            .build()?;
        Ok(Self { http, config })
    }

    pub fn target(&self) -> &str {
        &self.config.endpoint
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let endpoint = self.config.endpoint.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{endpoint}{path}")
        } else {
            format!("{endpoint}/{path}")
        }
    }
}

impl ManagementClient for HttpManagementClient {
    fn send<'a>(
        &'a self,
        request: ClientRequest,
    ) -> ClientFuture<'a, Result<ClientResponse, ConvergeError>> {
        Box::pin(async move {
            let url = self.url(&request.path);
            debug!(method = %request.method, %url, "sending management request");

            let mut builder = self
                .http
                .request(request.method.to_http(), &url)
                .basic_auth(&self.config.username, Some(&self.config.password))
                .header("Accept", "application/json");
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let response = builder.send().await?;
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
                })
                .collect::<BTreeMap<_, _>>();
            let body = response.bytes().await?.to_vec();

            Ok(ClientResponse {
                status,
                headers,
                body,
            })
        })
    }
}

#[derive(Debug, Clone)]
pub struct HttpSessionConnector {
    config: BmcTargetConfig,
    service_root: String,
}

impl HttpSessionConnector {
    pub fn new(config: BmcTargetConfig) -> Self {
        Self {
            config,
            service_root: DEFAULT_SERVICE_ROOT.to_string(),
        }
    }

    pub fn with_service_root(mut self, service_root: impl Into<String>) -> Self {
        self.service_root = service_root.into();
        self
    }
}

impl SessionConnector for HttpSessionConnector {
    type Session = HttpManagementClient;

    fn target(&self) -> &str {
        &self.config.endpoint
    }

    fn connect<'a>(&'a self) -> ClientFuture<'a, Result<Self::Session, ConvergeError>> {
        Box::pin(async move {
            let client = HttpManagementClient::new(self.config.clone())?;
            let response = client.get(&self.service_root).await?;
            if !response.is_success() {
                return Err(ConvergeError::unexpected_status(
                    RequestMethod::Get,
                    &self.service_root,
                    &response,
                ));
            }
            Ok(client)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(endpoint: &str) -> BmcTargetConfig {
        BmcTargetConfig {
            endpoint: endpoint.to_string(),
            username: "root".to_string(),
            password: "calvin".to_string(),
            insecure_tls: true,
            request_timeout_seconds: 5,
        }
    }

    #[test]
    fn response_headers_are_case_insensitive() {
        let response = ClientResponse::new(202)
            .with_header("ETag", "W/\"abc\"")
            .with_header("Location", "/jobs/1");
        assert_eq!(response.etag(), Some("W/\"abc\""));
        assert_eq!(response.header("LOCATION"), Some("/jobs/1"));
        assert!(response.is_success());
        assert!(!ClientResponse::new(404).is_success());
    }

    #[test]
    fn response_json_reports_decode_context() {
        let response = ClientResponse::new(200).with_body("not json");
        let error = response
            .json::<Value>("/redfish/v1/Systems/1")
            .expect_err("invalid json");
        assert!(matches!(error, ConvergeError::Decode { ref context, .. } if context == "/redfish/v1/Systems/1"));

        let response = ClientResponse::new(200).with_json(&json!({ "PowerState": "On" }));
        let value = response.json::<Value>("system").expect("valid json");
        assert_eq!(value["PowerState"], "On");
    }

    #[test]
    fn url_joins_endpoint_and_path() {
        let client = HttpManagementClient::new(config("https://10.0.0.5/")).expect("client");
        assert_eq!(client.url("/redfish/v1"), "https://10.0.0.5/redfish/v1");
        assert_eq!(client.url("redfish/v1"), "https://10.0.0.5/redfish/v1");
        assert_eq!(
            client.url("https://other/redfish/v1/TaskService/Tasks/1"),
            "https://other/redfish/v1/TaskService/Tasks/1"
        );
        assert_eq!(client.target(), "https://10.0.0.5/");
    }

    #[test]
    fn request_builders_carry_method_and_body() {
        let request = ClientRequest::patch("/Bios/Settings", json!({ "a": 1 }))
            .with_header("If-Match", "\"1\"");
        assert_eq!(request.method, RequestMethod::Patch);
        assert_eq!(request.body, Some(json!({ "a": 1 })));
        assert_eq!(request.headers, vec![("If-Match".to_string(), "\"1\"".to_string())]);
        assert_eq!(ClientRequest::delete("/jobs/1").body, None);
    }
}

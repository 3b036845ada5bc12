mod rpc;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use bmc_converge_lib::{BmcTargetConfig, EndpointLockRegistry, SupervisionSettings};

const USAGE: &str = "usage: bmc-supervise <method> [json-params]

methods:
  wait_job          {\"location\", \"timeoutSeconds\"?}
  job_log           {\"location\"}
  converge          {\"path\", \"desired\", \"timeoutSeconds\"?}
  apply_change      {\"category\", \"method\", \"path\", \"payload\"?, \"desired\"?, \"readPath\"?, \"timeoutSeconds\"?}
  patch_with_etag   {\"category\", \"path\", \"payload\", \"desired\"?, \"readPath\"?, \"timeoutSeconds\"?}
  confirm_media     {\"path\"}
  reconnect         {\"timeoutSeconds\"?}
  await_ready       {\"intervalSeconds\"?, \"timeoutSeconds\"?}
  validate_volume   {\"request\", \"controller\"}

target: BMC_ENDPOINT, BMC_USERNAME, BMC_PASSWORD, BMC_INSECURE_TLS, BMC_REQUEST_TIMEOUT_SECONDS";

pub(crate) struct SupervisorState {
    pub(crate) target: Option<BmcTargetConfig>,
    pub(crate) settings: SupervisionSettings,
    pub(crate) locks: EndpointLockRegistry,
    pub(crate) cancel: CancellationToken,
}

impl SupervisorState {
    fn from_env(cancel: CancellationToken) -> Self {
        Self {
            target: BmcTargetConfig::from_env(),
            settings: SupervisionSettings::default().with_env_overrides(),
            locks: EndpointLockRegistry::new(),
            cancel,
        }
    }

    pub(crate) fn target(&self) -> Result<&BmcTargetConfig, String> {
        self.target
            .as_ref()
            .ok_or_else(|| "BMC_ENDPOINT, BMC_USERNAME and BMC_PASSWORD must be set".to_string())
    }
}

fn init_tracing() {
    let filter = std::env::var("BMC_CONVERGE_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact(),
        )
        .init();
}

fn parse_params(raw: Option<String>) -> Result<Value, String> {
    let Some(raw) = raw else {
        return Ok(Value::Object(Map::new()));
    };
    let value: Value =
        serde_json::from_str(&raw).map_err(|error| format!("invalid params: {error}"))?;
    if !value.is_object() {
        return Err("params must be a JSON object".to_string());
    }
    Ok(value)
}

#[tokio::main]
async fn main() {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let Some(method) = args.next() else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };
    if method == "-h" || method == "--help" {
        println!("{USAGE}");
        return;
    }
    let params = match parse_params(args.next()) {
        Ok(params) => params,
        Err(error) => {
            eprintln!("{error}\n\n{USAGE}");
            std::process::exit(2);
        }
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    let state = SupervisorState::from_env(cancel);
    let result = match rpc::try_handle(&state, &method, &params).await {
        Some(result) => result,
        None => Err(format!("unknown method `{method}`")),
    };

    match result {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(rendered) => println!("{rendered}"),
            Err(_) => println!("{value}"),
        },
        Err(message) => {
            error!(%method, "{message}");
            std::process::exit(1);
        }
    }
}

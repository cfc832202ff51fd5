// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Scripted I-CSCF runs against an in-memory directory and loopback transport.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sip_appserver::{AppServerHost, TransactionId, TsxEvent, TsxOutput};
use sip_core::{routes, Headers, Method, Request, RequestLine, Response, StatusCode, Uri};
use sip_icscf::{
    DirectoryError, IcscfAppServer, IcscfConfig, IcscfContext, InMemoryDirectory, QueryClass,
    ScscfPool,
};
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Duration};
use tracing::{debug, info};

const RUN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
pub struct Scenario {
    pub request: RequestSpec,
    #[serde(default)]
    pub directory: Vec<DirectoryEntry>,
    /// What each successive fork gets back, in order.
    #[serde(default)]
    pub downstream: Vec<DownstreamReply>,
}

#[derive(Debug, Deserialize)]
pub struct RequestSpec {
    pub method: String,
    pub uri: String,
    #[serde(default)]
    pub headers: Vec<HeaderSpec>,
}

#[derive(Debug, Deserialize)]
pub struct HeaderSpec {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioQueryClass {
    Registration,
    Capabilities,
}

impl From<ScenarioQueryClass> for QueryClass {
    fn from(class: ScenarioQueryClass) -> Self {
        match class {
            ScenarioQueryClass::Registration => QueryClass::Registration,
            ScenarioQueryClass::Capabilities => QueryClass::Capabilities,
        }
    }
}

/// One scripted directory answer. `answer` is passed through as raw JSON so
/// malformed payloads can be scripted too.
#[derive(Debug, Deserialize)]
pub struct DirectoryEntry {
    pub identity: String,
    pub class: ScenarioQueryClass,
    #[serde(default)]
    pub answer: Option<serde_json::Value>,
    /// HTTP status the directory fails with instead of answering.
    #[serde(default)]
    pub http_status: Option<u16>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum DownstreamReply {
    Status(u16),
    Event(DownstreamEvent),
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownstreamEvent {
    Timeout,
    TransportError,
}

/// Outcome of a scenario run.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ScenarioReport {
    /// Next hop of every fork, in order.
    pub forks: Vec<String>,
    /// Directory query paths, in order.
    pub queries: Vec<String>,
    /// Final status sent upstream.
    pub final_status: u16,
}

impl Scenario {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        Self::from_json(&contents)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("parsing scenario")
    }

    fn build_request(&self) -> Result<Request> {
        let spec = &self.request;
        let method = Method::from_token(&spec.method);
        let uri = Uri::parse(&spec.uri)
            .ok_or_else(|| anyhow!("invalid request URI: {}", spec.uri))?;

        let mut headers = Headers::new();
        headers.push("Via", "SIP/2.0/TCP scenario;branch=z9hG4bKscenario");
        headers.push("Call-ID", "scenario-call");
        headers.push("CSeq", format!("1 {}", method.as_str()));
        headers.push("Max-Forwards", "70");
        for header in &spec.headers {
            headers.push(header.name.as_str(), header.value.as_str());
        }
        if headers.get("From").is_none() {
            headers.push("From", "<sip:scenario@scenario.invalid>;tag=scenario");
        }
        if headers.get("To").is_none() {
            headers.push("To", format!("<{}>", uri));
        }
        Request::new(RequestLine::new(method, uri), headers, Bytes::new())
            .map_err(|err| anyhow!("invalid scenario request: {}", err))
    }

    fn build_directory(&self) -> Result<InMemoryDirectory> {
        let directory = InMemoryDirectory::new();
        for entry in &self.directory {
            let class = QueryClass::from(entry.class);
            match (&entry.answer, entry.http_status) {
                (Some(answer), None) => {
                    directory.set_json(&entry.identity, class, &answer.to_string())
                }
                (None, Some(status)) => directory.set_error(
                    &entry.identity,
                    class,
                    DirectoryError::from_http_status(status),
                ),
                _ => {
                    return Err(anyhow!(
                        "directory entry for {} needs exactly one of answer or http_status",
                        entry.identity
                    ))
                }
            }
        }
        Ok(directory)
    }
}

/// Runs `scenario` through a real transaction host.
pub async fn run_scenario(
    scenario: &Scenario,
    config: IcscfConfig,
    pool: watch::Receiver<Arc<ScscfPool>>,
) -> Result<ScenarioReport> {
    let request = scenario.build_request()?;
    let directory = Arc::new(scenario.build_directory()?);
    let adapter_config = config.adapter_config();
    let ctx = IcscfContext::with_pool_updates(config, directory.clone(), pool);
    let app = Arc::new(IcscfAppServer::new(ctx)?);
    let (host, mut outputs) = AppServerHost::new(app, adapter_config);

    let tsx = host
        .handle_request(request)?
        .ok_or_else(|| anyhow!("scenario request did not start a transaction"))?;
    info!(%tsx, "scenario started");

    let mut replies: VecDeque<DownstreamReply> = scenario.downstream.iter().copied().collect();
    let mut forks = Vec::new();
    let final_status = timeout(
        RUN_TIMEOUT,
        drive(&host, tsx, &mut outputs, &mut replies, &mut forks),
    )
    .await
    .map_err(|_| anyhow!("scenario did not finish within {:?}", RUN_TIMEOUT))??;

    Ok(ScenarioReport {
        forks,
        queries: directory.queries().iter().map(|q| q.path()).collect(),
        final_status,
    })
}

/// Loopback transport: answers each fork from the script until a final
/// response goes upstream. Forks left without a scripted reply time out.
async fn drive(
    host: &AppServerHost,
    tsx: TransactionId,
    outputs: &mut mpsc::UnboundedReceiver<TsxOutput>,
    replies: &mut VecDeque<DownstreamReply>,
    forks: &mut Vec<String>,
) -> Result<u16> {
    while let Some(output) = outputs.recv().await {
        match output {
            TsxOutput::Request { fork, request, .. } => {
                let next_hop = routes(request.headers())
                    .first()
                    .map(|route| route.uri().to_string())
                    .unwrap_or_else(|| request.uri().to_string());
                info!(%fork, %next_hop, "scenario fork");
                forks.push(next_hop);
                loop {
                    let (event, provisional) = match replies.pop_front() {
                        Some(DownstreamReply::Status(code)) => {
                            let status = StatusCode::new(code).map_err(|err| {
                                anyhow!("invalid downstream status {}: {}", code, err)
                            })?;
                            let response = Response::for_request(&request, status);
                            (TsxEvent::Response { fork, response }, status.is_provisional())
                        }
                        Some(DownstreamReply::Event(DownstreamEvent::TransportError)) => {
                            (TsxEvent::TransportError { fork }, false)
                        }
                        Some(DownstreamReply::Event(DownstreamEvent::Timeout)) | None => {
                            (TsxEvent::Timeout { fork }, false)
                        }
                    };
                    host.deliver(tsx, event)?;
                    if !provisional {
                        break;
                    }
                }
            }
            TsxOutput::Cancel { fork, .. } => {
                debug!(%fork, "scenario fork cancelled");
            }
            TsxOutput::Response { response, .. } => {
                debug!(code = response.code(), "scenario upstream response");
                if response.is_final() {
                    return Ok(response.code());
                }
            }
        }
    }
    Err(anyhow!("transaction ended without a final response"))
}

//! Bearer-token HTTP transport over `ureq`.
//!
//! Endpoints, relative to the configured base URL:
//! - `HEAD /auth` connectivity probe
//! - `POST /sync/push` single change
//! - `POST /sync/changes` batch
//! - `GET /sync/data` snapshot
//! - `GET /schedule?start=..&end=..` assignments in range
//! - `POST /schedule/generate` authoritative generation pass

use crate::config::CoreConfig;
use crate::model::assignment::{Assignment, DateRange};
use crate::repo::DATE_FORMAT;
use crate::sync::transport::{CredentialStore, RemoteTransport, TransportError, TransportResult};
use crate::sync::wire::{
    BatchPushRequest, BatchPushResponse, FailureCode, GenerateScheduleRequest,
    GenerateScheduleResponse, SinglePushResponse, Snapshot, WireChange,
};
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Error body returned with a permanent 4xx rejection.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    code: FailureCode,
}

pub struct HttpTransport {
    base_url: String,
    agent: ureq::Agent,
    probe_agent: ureq::Agent,
    credentials: Arc<dyn CredentialStore>,
}

impl HttpTransport {
    pub fn new(config: &CoreConfig, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            agent: http_agent(config.request_timeout()),
            probe_agent: http_agent(config.probe_timeout()),
            credentials,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorization(&self) -> TransportResult<String> {
        self.credentials
            .bearer_token()
            .map(|token| format!("Bearer {token}"))
            .ok_or_else(|| TransportError::Unauthorized("no stored credential".to_string()))
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> TransportResult<T> {
        let response = self
            .agent
            .get(url)
            .set("Authorization", &self.authorization()?)
            .call()
            .map_err(classify)?;
        read_json(response)
    }

    fn post_json<B: Serialize, T: DeserializeOwned>(&self, url: &str, body: &B) -> TransportResult<T> {
        let body = serde_json::to_string(body)
            .map_err(|err| TransportError::Protocol(format!("unserializable request: {err}")))?;
        let response = self
            .agent
            .post(url)
            .set("Authorization", &self.authorization()?)
            .set("Content-Type", "application/json")
            .send_string(&body)
            .map_err(classify)?;
        read_json(response)
    }
}

impl RemoteTransport for HttpTransport {
    fn probe(&self) -> bool {
        let reachable = match self.probe_agent.head(&self.url("/auth")).call() {
            Ok(_) => true,
            // Any HTTP status proves the server answered.
            Err(ureq::Error::Status(_, _)) => true,
            Err(ureq::Error::Transport(_)) => false,
        };
        debug!("event=transport_probe module=sync status=ok reachable={reachable}");
        reachable
    }

    fn push_change(&self, change: &WireChange) -> TransportResult<Value> {
        let response: SinglePushResponse = self.post_json(&self.url("/sync/push"), change)?;
        Ok(response.data)
    }

    fn push_batch(&self, request: &BatchPushRequest) -> TransportResult<BatchPushResponse> {
        self.post_json(&self.url("/sync/changes"), request)
    }

    fn pull_snapshot(&self) -> TransportResult<Snapshot> {
        self.get_json(&self.url("/sync/data"))
    }

    fn fetch_assignments(&self, range: &DateRange) -> TransportResult<Vec<Assignment>> {
        let url = format!(
            "{}?start={}&end={}",
            self.url("/schedule"),
            range.start.format(DATE_FORMAT),
            range.end.format(DATE_FORMAT)
        );
        self.get_json(&url)
    }

    fn generate_schedule(
        &self,
        request: &GenerateScheduleRequest,
    ) -> TransportResult<GenerateScheduleResponse> {
        self.post_json(&self.url("/schedule/generate"), request)
    }
}

fn http_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(timeout)
        .timeout(timeout)
        .build()
}

fn read_json<T: DeserializeOwned>(response: ureq::Response) -> TransportResult<T> {
    let body = response
        .into_string()
        .map_err(|err| TransportError::Transient(format!("failed to read body: {err}")))?;
    serde_json::from_str(&body)
        .map_err(|err| TransportError::Protocol(format!("unexpected response body: {err}")))
}

fn classify(err: ureq::Error) -> TransportError {
    match err {
        ureq::Error::Status(status, response) => {
            let body = response.into_string().unwrap_or_default();
            classify_status(status, body)
        }
        ureq::Error::Transport(transport) => TransportError::Transient(transport.to_string()),
    }
}

fn classify_status(status: u16, body: String) -> TransportError {
    match status {
        401 | 403 => TransportError::Unauthorized(format!("http {status}")),
        408 | 429 => TransportError::Transient(format!("http {status}")),
        500..=599 => TransportError::Transient(format!("http {status}")),
        _ => match serde_json::from_str::<ErrorBody>(&body) {
            Ok(parsed) => TransportError::Rejected {
                code: parsed.code,
                message: parsed.error,
            },
            Err(_) => TransportError::Protocol(format!("http {status}: {body}")),
        },
    }
}

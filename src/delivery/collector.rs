use std::time::Duration;

use anyhow::{bail, Result};
use thiserror::Error;

use super::CollectorPayload;

const USER_AGENT: &str = concat!("routekeeper/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("collector responded with HTTP {0}")]
    Status(u16),
    #[error("collector unreachable ({kind}): {detail}")]
    Transport { kind: &'static str, detail: String },
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
    #[error("collector response unreadable: {0}")]
    Malformed(String),
    #[error("delivery worker failed: {0}")]
    Worker(String),
}

/// The remote endpoint samples are relayed to. Implementations block; the
/// delivery agent runs them on the blocking pool under its own timeout.
pub trait Collector: Send + Sync + 'static {
    fn deliver(&self, payload: &CollectorPayload) -> Result<(), DeliveryError>;
}

/// Posts payloads as JSON to a fixed URL.
pub struct HttpCollector {
    agent: ureq::Agent,
    endpoint: String,
}

impl HttpCollector {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let endpoint = endpoint.into();
        if timeout.is_zero() {
            bail!("collector timeout must be > 0");
        }
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            bail!("collector endpoint must be an http(s) URL: {endpoint}");
        }

        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .user_agent(USER_AGENT)
            .build();

        Ok(Self { agent, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Collector for HttpCollector {
    fn deliver(&self, payload: &CollectorPayload) -> Result<(), DeliveryError> {
        let response = self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", "application/json")
            .set("Accept", "application/json")
            .send_json(payload)
            .map_err(delivery_error_from_ureq)?;

        let status = response.status();
        if !(200..300).contains(&status) {
            return Err(DeliveryError::Status(status));
        }

        // A success status with a body we cannot read means the collector
        // may not have processed it; treat it like any other failure.
        response
            .into_string()
            .map_err(|err| DeliveryError::Malformed(err.to_string()))?;
        Ok(())
    }
}

fn delivery_error_from_ureq(err: ureq::Error) -> DeliveryError {
    match err {
        ureq::Error::Status(status, _) => DeliveryError::Status(status),
        ureq::Error::Transport(transport) => {
            let combined = format!("{:?} {}", transport.kind(), transport);
            DeliveryError::Transport {
                kind: classify_transport_error_kind(&combined),
                detail: transport.to_string(),
            }
        }
    }
}

fn classify_transport_error_kind(raw: &str) -> &'static str {
    let lower = raw.to_ascii_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        "timeout"
    } else if lower.contains("tls") || lower.contains("ssl") {
        "tls"
    } else if lower.contains("dns") {
        "dns"
    } else if lower.contains("connection") || lower.contains("connect") {
        "connection"
    } else {
        "transport"
    }
}

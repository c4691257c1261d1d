// file: src/installer/events.rs
// version: 1.0.0
// guid: 3d6b9e2a-4f18-4c57-a9d3-7e1c5b8f2a60

//! Installer event stream collected by the webhook service
//!
//! The installer posts its reporting events to a webhook; the engine opens
//! a session there before the installation starts and polls the session's
//! event log.

use std::fmt;

use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::{AutoinstallError, Result};

/// Seconds the webhook keeps an idle session
const SESSION_TIMEOUT_SECS: u64 = 1200;

/// Session registered with the webhook
#[derive(Debug, Clone, Serialize)]
pub struct WebhookSession {
    pub id: String,
    pub log_path: String,
    pub timeout: u64,
    pub secret: String,
}

impl WebhookSession {
    pub fn new(id: impl Into<String>, log_path: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            log_path: log_path.into(),
            timeout: SESSION_TIMEOUT_SECS,
            secret: secret.into(),
        }
    }
}

/// Access to session scoped event logs
#[async_trait::async_trait]
pub trait EventSource: Send + Sync {
    async fn open_session(&self, session: &WebhookSession) -> Result<()>;

    /// Events of a session starting at index `start`
    async fn read_events(&self, session_id: &str, start: usize) -> Result<Vec<String>>;

    async fn close_session(&self, session_id: &str) -> Result<()>;
}

/// [`EventSource`] talking to the webhook control endpoint over HTTP
pub struct WebhookEventSource {
    client: reqwest::Client,
    control: String,
}

impl WebhookEventSource {
    pub fn new(control: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            control: control.into(),
        }
    }
}

#[async_trait::async_trait]
impl EventSource for WebhookEventSource {
    async fn open_session(&self, session: &WebhookSession) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/session", self.control))
            .json(session)
            .send()
            .await?;
        if response.status() != StatusCode::CREATED {
            return Err(AutoinstallError::runtime(
                "Installation could not be started: failed to open webhook session",
            ));
        }
        Ok(())
    }

    async fn read_events(&self, session_id: &str, start: usize) -> Result<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/session/{}/logs", self.control, session_id))
            .query(&[("start", start), ("end", 0)])
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            return Err(AutoinstallError::runtime("Could not read installation logs"));
        }
        Ok(response.json::<Vec<String>>().await?)
    }

    async fn close_session(&self, session_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/session/{}", self.control, session_id))
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::OK {
            debug!("Removed webhook session {}: {}", session_id, body);
        } else {
            debug!("Webhook session {} not removed: {}", session_id, body);
        }
        Ok(())
    }
}

/// One parsed entry of the event stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub name: String,
    pub origin: String,
    pub result: String,
    pub event_type: String,
    pub description: String,
    text: String,
}

impl LogEvent {
    pub fn parse(raw: &str) -> Self {
        let mut event = Self {
            name: String::new(),
            origin: String::new(),
            result: String::new(),
            event_type: String::new(),
            description: String::new(),
            text: String::new(),
        };
        if let Some(data) = raw.strip_prefix("binary:") {
            event.name = "binary".to_string();
            event.text = data.to_string();
            return event;
        }
        let object: Value = match serde_json::from_str(raw) {
            Ok(Value::Object(map)) => Value::Object(map),
            _ => {
                event.text = format!("Undecodeable event: {}", raw);
                return event;
            }
        };
        let field = |key: &str, default: &str| {
            object
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or(default)
                .to_string()
        };
        event.name = field("name", "?name?");
        event.origin = field("origin", "?origin?");
        event.result = field("result", "START");
        if event.is_watchdog() {
            let state = if event.result == "SUCCESS" {
                "retrieved"
            } else {
                "not present"
            };
            event.text = format!("File {} {}", event.name, state);
        } else {
            event.event_type = field("event_type", "");
            event.description = field("description", "");
            let description = if event.description.is_empty() {
                String::new()
            } else {
                format!(": {}", event.description)
            };
            event.text = format!("{} {} {}", event.result, event.name, description);
        }
        event
    }

    pub fn is_watchdog(&self) -> bool {
        self.origin == "watchdog"
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// What an event means for the installation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventMarker {
    None,
    Success,
    Failure,
}

/// Event name announcing a successful installation, by release
fn success_events(major: u32) -> &'static [&'static str] {
    match major {
        2010 => &["subiquity/Reboot/apply_autoinstall_config"],
        m if m >= 2204 => &["subiquity/Shutdown/copy_logs_to_target"],
        _ => &["subiquity/Reboot", "subiquity/Reboot/reboot"],
    }
}

/// Classify `event` for an installation of release `major`
pub fn classify(event: &LogEvent, major: u32) -> EventMarker {
    let success = success_events(major).contains(&event.name.as_str())
        && event.result == "SUCCESS"
        && event.event_type == "finish";
    if success {
        return EventMarker::Success;
    }
    let failure = event.name.starts_with("subiquity/Error")
        && event.description.contains("/var/crash")
        && !event.description.contains("server_request_fail");
    if failure {
        return EventMarker::Failure;
    }
    EventMarker::None
}

//! Timeout errors with debugging context
//!
//! Every wait in this crate ends in one of two ways: the condition held, or a
//! [`TimeoutExpired`] describing what was last seen. The error renders as a
//! small tree so it reads well in test reports:
//!
//! ```text
//! Timed out waiting for vm/fedora-1
//! ├─ Last state: printableStatus=Starting, Ready=False
//! ├─ Last error: VirtualMachine 'fedora-1' not found
//! ├─ Attempts: 61
//! ├─ Elapsed: 60.2s
//! └─ Timeout: 60s
//! ```

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Event, Namespace, Pod};
use kube::api::DynamicObject;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

const MAX_SUMMARY_LEN: usize = 300;

/// A simplified event attached to a timeout
#[derive(Debug, Clone)]
pub struct WaitEvent {
    /// Event reason (e.g. "FailedScheduling", "SyncFailed")
    pub reason: String,
    /// Event message
    pub message: String,
    /// Timestamp as string
    pub timestamp: Option<String>,
}

impl From<&Event> for WaitEvent {
    fn from(event: &Event) -> Self {
        let timestamp = event
            .last_timestamp
            .as_ref()
            .and_then(|t| serde_json::to_value(t).ok())
            .and_then(|v| v.as_str().map(str::to_string));

        Self {
            reason: event.reason.clone().unwrap_or_default(),
            message: event.message.clone().unwrap_or_default(),
            timestamp,
        }
    }
}

/// The deadline passed before the awaited condition held
#[derive(Debug, Clone)]
pub struct TimeoutExpired {
    /// What was being waited on (resource reference or predicate label)
    pub resource: String,
    /// Description of the last value the predicate returned
    pub last_state: String,
    /// Last suppressed error, if any
    pub last_error: Option<String>,
    /// Number of predicate invocations
    pub attempts: u32,
    /// How long we waited before giving up
    pub elapsed: Duration,
    /// The configured timeout
    pub timeout: Duration,
    /// Recent events related to the resource
    pub events: Vec<WaitEvent>,
}

impl TimeoutExpired {
    pub fn new(resource: impl Into<String>, timeout: Duration, elapsed: Duration) -> Self {
        Self {
            resource: resource.into(),
            last_state: "unknown".to_string(),
            last_error: None,
            attempts: 0,
            elapsed,
            timeout,
            events: Vec::new(),
        }
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.last_state = state.into();
        self
    }

    pub fn with_last_error(mut self, error: Option<String>) -> Self {
        self.last_error = error;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_events(mut self, events: Vec<WaitEvent>) -> Self {
        self.events = events;
        self
    }

    /// Replace the label with a resource reference
    pub fn for_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }
}

impl fmt::Display for TimeoutExpired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "Timed out waiting for {}", self.resource)?;
        writeln!(f, "├─ Last state: {}", self.last_state)?;
        if let Some(err) = &self.last_error {
            writeln!(f, "├─ Last error: {err}")?;
        }
        writeln!(f, "├─ Attempts: {}", self.attempts)?;
        writeln!(f, "├─ Elapsed: {:.1?}", self.elapsed)?;
        writeln!(f, "└─ Timeout: {:?}", self.timeout)?;

        if !self.events.is_empty() {
            writeln!(f)?;
            writeln!(f, "Recent events:")?;
            let last = self.events.len() - 1;
            for (i, event) in self.events.iter().enumerate() {
                let prefix = if i == last { "└─" } else { "├─" };
                let ts = event.timestamp.as_deref().unwrap_or("??:??:??");
                writeln!(f, "{prefix} [{ts}] {}: {}", event.reason, event.message)?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for TimeoutExpired {}

/// Compact rendering of an object's `.status`, for generic waits
pub fn status_summary<K: Serialize>(obj: &K) -> String {
    let status = serde_json::to_value(obj)
        .ok()
        .and_then(|v| v.get("status").cloned());

    match status {
        Some(serde_json::Value::Null) | None => "no status".to_string(),
        Some(s) => truncate(&s.to_string(), MAX_SUMMARY_LEN),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}

/// Human-readable state of a resource, used in timeout messages
pub trait ResourceState {
    fn state_description(&self) -> String;
}

impl ResourceState for Namespace {
    fn state_description(&self) -> String {
        let phase = self
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .unwrap_or("Unknown");
        format!("phase={phase}")
    }
}

impl ResourceState for Deployment {
    fn state_description(&self) -> String {
        let desired = self.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let status = self.status.as_ref();
        let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);
        let unavailable = status.and_then(|s| s.unavailable_replicas).unwrap_or(0);

        if unavailable > 0 {
            format!("{ready}/{desired} ready, {unavailable} unavailable")
        } else {
            let available = status.and_then(|s| s.available_replicas).unwrap_or(0);
            format!("{ready}/{desired} ready, {available}/{desired} available")
        }
    }
}

impl ResourceState for StatefulSet {
    fn state_description(&self) -> String {
        let desired = self.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let ready = self
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);
        format!("{ready}/{desired} ready")
    }
}

impl ResourceState for DaemonSet {
    fn state_description(&self) -> String {
        match self.status.as_ref() {
            Some(s) => format!(
                "{}/{} ready, {} updated",
                s.number_ready,
                s.desired_number_scheduled,
                s.updated_number_scheduled.unwrap_or(0)
            ),
            None => "no status".to_string(),
        }
    }
}

impl ResourceState for Pod {
    fn state_description(&self) -> String {
        let status = self.status.as_ref();
        let phase = status.and_then(|s| s.phase.as_deref()).unwrap_or("Unknown");

        let Some(containers) = status.and_then(|s| s.container_statuses.as_ref()) else {
            return format!("phase={phase}, no container status");
        };

        let ready = containers.iter().filter(|c| c.ready).count();
        let waiting: Vec<&str> = containers
            .iter()
            .filter_map(|c| c.state.as_ref()?.waiting.as_ref()?.reason.as_deref())
            .collect();

        if waiting.is_empty() {
            format!("phase={phase}, containers {ready}/{} ready", containers.len())
        } else {
            format!(
                "phase={phase}, containers {ready}/{} ready, waiting: {}",
                containers.len(),
                waiting.join(", ")
            )
        }
    }
}

impl ResourceState for DynamicObject {
    fn state_description(&self) -> String {
        let Some(status) = self.data.get("status") else {
            return "no status".to_string();
        };

        let mut parts = Vec::new();
        if let Some(printable) = status.get("printableStatus").and_then(|v| v.as_str()) {
            parts.push(format!("printableStatus={printable}"));
        }
        if let Some(phase) = status.get("phase").and_then(|v| v.as_str()) {
            parts.push(format!("phase={phase}"));
        }
        if let Some(conditions) = status.get("conditions").and_then(|v| v.as_array()) {
            for c in conditions {
                let kind = c.get("type").and_then(|v| v.as_str()).unwrap_or("?");
                let value = c.get("status").and_then(|v| v.as_str()).unwrap_or("?");
                parts.push(format!("{kind}={value}"));
            }
        }

        if parts.is_empty() {
            truncate(&status.to_string(), MAX_SUMMARY_LEN)
        } else {
            parts.join(", ")
        }
    }
}

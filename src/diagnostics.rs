//! Failure diagnostics
//!
//! Collected by the test macro when a test fails and printed to stderr.

use k8s_openapi::api::core::v1::Event;
use std::collections::BTreeMap;
use std::fmt;

const LINE_WIDTH: usize = 80;
const HEAVY_LINE: &str = "━";
const LIGHT_LINE: &str = "─";
const MAX_LOG_LINES: usize = 50;
const MAX_MESSAGE_LEN: usize = 60;

/// Diagnostic information from a failed test
#[derive(Debug, Default)]
pub struct Diagnostics {
    /// Test namespace
    pub namespace: String,
    /// Whether the namespace is kept after the test
    pub namespace_kept: bool,
    /// Virtual machine instance name -> state description
    pub vm_states: BTreeMap<String, String>,
    /// Pod name -> logs
    pub pod_logs: BTreeMap<String, String>,
    /// Namespace events
    pub events: Vec<Event>,
}

impl Diagnostics {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    fn heavy_line() -> String {
        HEAVY_LINE.repeat(LINE_WIDTH)
    }

    fn section_header(title: &str) -> String {
        let title = format!(" {title} ");
        let remaining = LINE_WIDTH.saturating_sub(title.chars().count() + 3);
        format!("{}{title}{}", LIGHT_LINE.repeat(3), LIGHT_LINE.repeat(remaining))
    }
}

/// RFC 3339 timestamp of an event, if any
fn event_timestamp(event: &Event) -> Option<String> {
    let time = event.last_timestamp.as_ref()?;
    serde_json::to_value(time).ok()?.as_str().map(str::to_string)
}

/// `HH:MM:SS` part of an RFC 3339 timestamp
fn clock(timestamp: &str) -> &str {
    timestamp.get(11..19).unwrap_or(timestamp)
}

fn shorten(message: &str, max: usize) -> String {
    if message.chars().count() <= max {
        return message.to_string();
    }
    let cut: String = message.chars().take(max).collect();
    format!("{cut}...")
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "{}", Self::heavy_line())?;
        writeln!(f, "  VIRTWAIT TEST FAILED")?;
        writeln!(f, "{}", Self::heavy_line())?;
        writeln!(f)?;
        if self.namespace_kept {
            writeln!(f, "  Namespace: {} (kept for debugging)", self.namespace)?;
        } else {
            writeln!(f, "  Namespace: {} (deleted)", self.namespace)?;
        }

        if !self.vm_states.is_empty() {
            writeln!(f)?;
            writeln!(f, "{}", Self::section_header("Virtual Machines"))?;
            writeln!(f)?;
            for (name, state) in &self.vm_states {
                writeln!(f, "  {name:24}  {state}")?;
            }
        }

        if !self.pod_logs.is_empty() {
            writeln!(f)?;
            writeln!(f, "{}", Self::section_header("Pod Logs"))?;

            for (pod_name, logs) in &self.pod_logs {
                writeln!(f)?;
                writeln!(f, "[{pod_name}]")?;

                if logs.is_empty() {
                    writeln!(f, "  (no logs)")?;
                    continue;
                }

                // Tail of the log is where the failure is
                let lines: Vec<&str> = logs.lines().collect();
                let skipped = lines.len().saturating_sub(MAX_LOG_LINES);
                if skipped > 0 {
                    writeln!(f, "  ... ({skipped} earlier lines)")?;
                }
                for line in &lines[skipped..] {
                    writeln!(f, "  {line}")?;
                }
            }
        }

        if !self.events.is_empty() {
            writeln!(f)?;
            writeln!(
                f,
                "{}",
                Self::section_header(&format!("Events ({})", self.events.len()))
            )?;
            writeln!(f)?;

            // Events without a timestamp sort last
            let mut events: Vec<(Option<String>, &Event)> =
                self.events.iter().map(|e| (event_timestamp(e), e)).collect();
            events.sort_by(|(a, _), (b, _)| match (a, b) {
                (Some(a), Some(b)) => a.cmp(b),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            });

            for (timestamp, event) in events {
                let timestamp = timestamp.as_deref().map_or("??:??:??", clock);
                let kind = event.involved_object.kind.as_deref().unwrap_or("?");
                let name = event.involved_object.name.as_deref().unwrap_or("?");
                let reason = event.reason.as_deref().unwrap_or("Unknown");
                let message = shorten(event.message.as_deref().unwrap_or(""), MAX_MESSAGE_LEN);

                writeln!(
                    f,
                    "  • {timestamp}  {:32}  {reason:16}  {message}",
                    format!("{kind}/{name}")
                )?;
            }
        }

        writeln!(f)?;
        writeln!(f, "{}", Self::section_header("Debug"))?;
        writeln!(f)?;
        writeln!(f, "  kubectl -n {} get vm,vmi,dv,pods", self.namespace)?;
        writeln!(f, "  kubectl -n {} describe vmi", self.namespace)?;
        writeln!(f, "  kubectl -n {} logs <virt-launcher-pod> -c compute", self.namespace)?;
        if self.namespace_kept {
            writeln!(f, "  kubectl delete ns {}  # cleanup", self.namespace)?;
        }
        writeln!(f)?;
        writeln!(f, "{}", Self::heavy_line())?;

        Ok(())
    }
}

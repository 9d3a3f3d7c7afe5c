//! Consuming the engine's event stream during `pulumi up`.
//!
//! Events arrive as JSON lines in the file named by `--event-log`. A reader
//! task feeds them into a channel; the tracker owns all mutable state and is
//! read only after the channel closes.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use tokio::sync::mpsc;

/// One line of the engine event log. Only the variants the tracker cares
/// about are modeled; everything else deserializes to an empty event.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineEvent {
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub diagnostic_event: Option<DiagnosticEvent>,
    #[serde(default)]
    pub resource_pre_event: Option<ResourcePreEvent>,
    #[serde(default)]
    pub res_outputs_event: Option<ResOutputsEvent>,
    #[serde(default)]
    pub res_op_failed_event: Option<ResOpFailedEvent>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticEvent {
    #[serde(default)]
    pub urn: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePreEvent {
    #[serde(default)]
    pub metadata: Option<StepEventMetadata>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResOutputsEvent {
    #[serde(default)]
    pub metadata: Option<StepEventMetadata>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResOpFailedEvent {
    #[serde(default)]
    pub metadata: Option<StepEventMetadata>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepEventMetadata {
    #[serde(default)]
    pub op: Option<String>,
    #[serde(default)]
    pub urn: Option<String>,
    #[serde(rename = "type", default)]
    pub resource_type: Option<String>,
}

fn is_create_like(op: Option<&str>) -> bool {
    matches!(
        op,
        Some("create") | Some("create-replacement") | Some("import") | Some("import-replacement")
    )
}

/// Accumulates per-run outcome counts and error diagnostics. Owned by one
/// consumer task; the orchestrator reads it after the channel closes.
#[derive(Default)]
pub struct UpEventTracker {
    total_registered: usize,
    registered_urns: HashSet<String>,

    create_succeeded: usize,
    create_failed: usize,

    diagnostics: HashMap<String, Vec<String>>,
    general_errors: Vec<String>,
    failures: Vec<String>,
    failure_keys: HashSet<String>,
}

impl UpEventTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the channel until the sender closes it.
    pub async fn consume(&mut self, mut events: mpsc::Receiver<EngineEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
    }

    pub fn handle(&mut self, event: EngineEvent) {
        if let Some(pre) = event.resource_pre_event {
            let urn = pre
                .metadata
                .as_ref()
                .and_then(|m| m.urn.clone())
                .unwrap_or_default();
            if urn.is_empty() || self.registered_urns.insert(urn) {
                self.total_registered += 1;
            }
            return;
        }
        if let Some(diag) = event.diagnostic_event {
            let severity = diag.severity.unwrap_or_default().to_lowercase();
            if severity.contains("error") {
                self.record_diagnostic(diag.urn.as_deref(), diag.message.as_deref());
            }
            return;
        }
        if let Some(failed) = event.res_op_failed_event {
            let metadata = failed.metadata.unwrap_or_default();
            if !is_create_like(metadata.op.as_deref()) {
                return;
            }
            self.create_failed += 1;
            let urn = metadata.urn.unwrap_or_default();
            if let Some(key) = failure_key_from_urn(&urn) {
                self.failure_keys.insert(key);
            }
            let (message, urn_specific) = self.take_diagnostic(&urn);
            match (urn.is_empty(), message.is_empty()) {
                (false, false) if urn_specific => {
                    self.failures.push(format!("{urn}: {message}"));
                }
                (_, false) => self.failures.push(message),
                (false, true) => self.failures.push(format!("{urn}: operation failed")),
                (true, true) => self.failures.push("Resource operation failed".to_string()),
            }
            return;
        }
        if let Some(out) = event.res_outputs_event {
            let op = out.metadata.as_ref().and_then(|m| m.op.as_deref());
            if is_create_like(op) {
                self.create_succeeded += 1;
            }
        }
    }

    fn record_diagnostic(&mut self, urn: Option<&str>, message: Option<&str>) {
        let message = message.unwrap_or("").trim().to_string();
        if message.is_empty() {
            return;
        }
        match urn.filter(|u| !u.is_empty()) {
            Some(urn) => self
                .diagnostics
                .entry(urn.to_string())
                .or_default()
                .push(message),
            None => self.general_errors.push(message),
        }
    }

    /// Consume the diagnostics recorded for a URN, falling back to the
    /// unattributed pool. The bool reports whether the message was
    /// URN-specific.
    fn take_diagnostic(&mut self, urn: &str) -> (String, bool) {
        if !urn.is_empty() {
            if let Some(messages) = self.diagnostics.remove(urn) {
                if !messages.is_empty() {
                    return (messages.join("\n"), true);
                }
            }
        }
        if !self.general_errors.is_empty() {
            let message = self.general_errors.join("\n");
            self.general_errors.clear();
            return (message, false);
        }
        (String::new(), false)
    }

    pub fn created(&self) -> usize {
        self.create_succeeded
    }

    pub fn failed_creates(&self) -> usize {
        self.create_failed
    }

    pub fn total_registered(&self) -> usize {
        self.total_registered
    }

    pub fn failure_keys(&self) -> &HashSet<String> {
        &self.failure_keys
    }

    /// Failure lines consumed at failure time, then remaining diagnostics
    /// grouped by URN, then unattributed errors.
    pub fn failure_summary(&self) -> String {
        let mut parts: Vec<String> = self.failures.clone();

        let mut urns: Vec<&String> = self
            .diagnostics
            .keys()
            .filter(|u| !u.is_empty())
            .collect();
        urns.sort();
        for urn in urns {
            let messages = &self.diagnostics[urn];
            if messages.is_empty() {
                continue;
            }
            parts.push(format!("{urn}: {}", messages.join("\n")));
        }

        if !self.general_errors.is_empty() {
            parts.push(self.general_errors.join("\n"));
        }

        parts.join("\n\n")
    }
}

fn failure_key_from_urn(urn: &str) -> Option<String> {
    let parsed = stackferry_core::Urn::parse(urn).ok()?;
    let token = parsed.token();
    if token.as_str().is_empty() || parsed.name().is_empty() {
        return None;
    }
    Some(format!("{}|{}", token, parsed.name()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pre_event(urn: &str) -> EngineEvent {
        EngineEvent {
            resource_pre_event: Some(ResourcePreEvent {
                metadata: Some(StepEventMetadata {
                    op: Some("create".to_string()),
                    urn: Some(urn.to_string()),
                    resource_type: None,
                }),
            }),
            ..Default::default()
        }
    }

    fn outputs_event(op: &str) -> EngineEvent {
        EngineEvent {
            res_outputs_event: Some(ResOutputsEvent {
                metadata: Some(StepEventMetadata {
                    op: Some(op.to_string()),
                    urn: None,
                    resource_type: None,
                }),
            }),
            ..Default::default()
        }
    }

    fn failed_event(urn: &str) -> EngineEvent {
        EngineEvent {
            res_op_failed_event: Some(ResOpFailedEvent {
                metadata: Some(StepEventMetadata {
                    op: Some("create".to_string()),
                    urn: Some(urn.to_string()),
                    resource_type: None,
                }),
            }),
            ..Default::default()
        }
    }

    fn diagnostic(urn: Option<&str>, severity: &str, message: &str) -> EngineEvent {
        EngineEvent {
            diagnostic_event: Some(DiagnosticEvent {
                urn: urn.map(str::to_string),
                severity: Some(severity.to_string()),
                message: Some(message.to_string()),
            }),
            ..Default::default()
        }
    }

    const URN: &str = "urn:pulumi:dev::p::aws-native:s3:Bucket::bucket";

    #[test]
    fn test_counts_create_like_ops() {
        let mut tracker = UpEventTracker::new();
        tracker.handle(pre_event(URN));
        tracker.handle(pre_event(URN)); // duplicate URN counted once
        tracker.handle(outputs_event("create"));
        tracker.handle(outputs_event("import"));
        tracker.handle(outputs_event("refresh")); // ignored
        assert_eq!(tracker.total_registered(), 1);
        assert_eq!(tracker.created(), 2);
        assert_eq!(tracker.failed_creates(), 0);
    }

    #[test]
    fn test_failure_consumes_urn_diagnostics() {
        let mut tracker = UpEventTracker::new();
        tracker.handle(diagnostic(Some(URN), "error", "boom"));
        tracker.handle(diagnostic(Some(URN), "info", "noise"));
        tracker.handle(failed_event(URN));

        assert_eq!(tracker.failed_creates(), 1);
        let summary = tracker.failure_summary();
        assert!(summary.contains("boom"));
        assert!(!summary.contains("noise"));
        assert!(tracker
            .failure_keys()
            .contains("aws-native:s3:Bucket|bucket"));
    }

    #[test]
    fn test_failure_falls_back_to_general_errors() {
        let mut tracker = UpEventTracker::new();
        tracker.handle(diagnostic(None, "error", "global failure"));
        tracker.handle(failed_event(URN));
        assert!(tracker.failure_summary().contains("global failure"));
    }

    #[test]
    fn test_failure_without_diagnostics_is_generic() {
        let mut tracker = UpEventTracker::new();
        tracker.handle(failed_event(URN));
        assert!(tracker.failure_summary().contains("operation failed"));
    }

    #[tokio::test]
    async fn test_consume_exits_when_channel_closes() {
        let (tx, rx) = mpsc::channel(8);
        let consumer = tokio::spawn(async move {
            let mut tracker = UpEventTracker::new();
            tracker.consume(rx).await;
            tracker
        });
        tx.send(outputs_event("create")).await.unwrap();
        drop(tx);
        let tracker = consumer.await.unwrap();
        assert_eq!(tracker.created(), 1);
    }

    #[test]
    fn test_event_log_line_parses() {
        let line = r#"{"sequence":4,"resourcePreEvent":{"metadata":{"op":"create","urn":"urn:pulumi:dev::p::aws-native:s3:Bucket::bucket","type":"aws-native:s3:Bucket"}}}"#;
        let event: EngineEvent = serde_json::from_str(line).unwrap();
        assert!(event.resource_pre_event.is_some());
    }
}

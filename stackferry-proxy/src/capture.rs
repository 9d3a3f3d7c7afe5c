//! Thread-safe accumulation of intercepted resources. The Pulumi engine
//! drives provider Creates concurrently, so interceptors append from
//! arbitrary tasks; one lock serializes everything.

use std::collections::HashSet;
use std::sync::Mutex;

/// A single intercepted resource destined for the import file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    pub resource_type: String,
    pub name: String,
    pub logical_name: String,
    pub id: String,
    /// Sorted input property keys, used to scope generated code.
    pub properties: Vec<String>,
}

/// A resource the interceptors decided not to capture, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedCapture {
    pub resource_type: String,
    pub logical_name: String,
    pub reason: String,
}

/// Snapshot of capture progress for logging.
#[derive(Debug, Clone, Default)]
pub struct CaptureSummary {
    pub total_intercepts: usize,
    pub unique_resources: usize,
    pub skipped: Vec<SkippedCapture>,
}

#[derive(Default)]
struct CollectorState {
    entries: Vec<Capture>,
    seen: HashSet<String>,
    total: usize,
    skipped: Vec<SkippedCapture>,
}

#[derive(Default)]
pub struct CaptureCollector {
    state: Mutex<CollectorState>,
}

impl CaptureCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a capture, deduplicating identical entries. The engine can
    /// intercept the same resource more than once on retries.
    pub fn append(&self, entry: Capture) {
        let mut state = self.state.lock().expect("collector lock poisoned");
        state.total += 1;
        let key = format!(
            "{}|{}|{}|{}",
            entry.resource_type, entry.name, entry.logical_name, entry.id
        );
        if !state.seen.insert(key) {
            return;
        }
        state.entries.push(entry);
    }

    /// Record a resource capture mode could not process.
    pub fn skip(&self, skipped: SkippedCapture) {
        self.state
            .lock()
            .expect("collector lock poisoned")
            .skipped
            .push(skipped);
    }

    /// Unique captures in insertion order.
    pub fn results(&self) -> Vec<Capture> {
        self.state
            .lock()
            .expect("collector lock poisoned")
            .entries
            .clone()
    }

    pub fn summary(&self) -> CaptureSummary {
        let state = self.state.lock().expect("collector lock poisoned");
        CaptureSummary {
            total_intercepts: state.total,
            unique_resources: state.entries.len(),
            skipped: state.skipped.clone(),
        }
    }
}

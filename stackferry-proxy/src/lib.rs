//! Provider interception and run orchestration.
//!
//! Upstream Pulumi provider plugins run as child processes behind local
//! gRPC proxies that rewrite Create into Read, so a `pulumi up` against an
//! already-deployed CDK stack imports resources instead of creating them.

pub mod capture;
pub mod classic;
pub mod docker;
pub mod events;
pub mod native;
pub mod process;
pub mod pulumi;
pub mod run;
pub mod server;

pub use capture::{Capture, CaptureCollector, CaptureSummary, SkippedCapture};
pub use events::{EngineEvent, UpEventTracker};
pub use run::{run_with_intercepted_providers, RunMode, RunOptions};

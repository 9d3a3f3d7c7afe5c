//! The run orchestrator: starts intercepted providers, drives the Pulumi
//! deployment, consumes its event stream, and finalizes the import file —
//! even when the deployment itself failed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use stackferry_imports::deployment::{build_file, parse_exported_deployment, CaptureMetadata};
use stackferry_imports::merge::merge_with_skeleton;
use stackferry_imports::{
    filter_placeholder_resources, read_file, unsupported_stack_resource, write_file, ImportFile,
};
use stackferry_lookups::Lookups;

use crate::capture::{CaptureCollector, SkippedCapture};
use crate::classic::ClassicCreateInterceptor;
use crate::docker::DockerCreateInterceptor;
use crate::events::UpEventTracker;
use crate::native::NativeCreateInterceptor;
use crate::process::{ensure_plugin_binary, start_provider_process, ProcessSet};
use crate::pulumi::PulumiCli;
use crate::server::{connect_upstream, serve_intercepted, CreateInterceptor, InterceptedProvider};

pub const AWS_PLUGIN_VERSION: &str = "7.14.0";
pub const AWS_NATIVE_PLUGIN_VERSION: &str = "1.40.0";
pub const DOCKER_BUILD_PLUGIN_VERSION: &str = "0.0.7";

/// Passphrase for the throwaway local backend in capture mode. The stack
/// only ever holds import state, never secrets worth protecting.
const CAPTURE_PASSPHRASE: &str = "stackferry-local";

/// How the proxied Pulumi run should behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// A normal `pulumi up` against the user's selected stack, with
    /// intercepted providers importing instead of creating.
    RunPulumi,
    /// Capture primary IDs into an import file against a throwaway local
    /// backend.
    CaptureImports,
}

/// CLI decisions surfaced into the orchestrator.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: RunMode,
    pub import_file_path: Option<PathBuf>,
    pub skip_create: bool,
    pub keep_import_state: bool,
    pub local_stack_file: Option<PathBuf>,
    pub stack_names: Vec<String>,
    pub verbose: u32,
    pub use_preview_import: bool,
    pub filter_placeholders_only: bool,
}

/// Run the import against the Pulumi program in `work_dir`.
pub async fn run_with_intercepted_providers(
    lookups: Arc<Lookups>,
    work_dir: &Path,
    opts: RunOptions,
) -> Result<()> {
    if opts.mode == RunMode::CaptureImports && opts.import_file_path.is_none() {
        bail!("import file path is required when capturing imports");
    }

    let collector = Arc::new(CaptureCollector::new());
    info!("Starting up providers...");
    let providers =
        start_intercepted_providers(lookups.clone(), work_dir, &opts, collector.clone()).await?;

    let result = drive_deployment(&lookups, &providers, work_dir, &opts, &collector).await;
    providers.shutdown().await;

    let primary_stack = opts.stack_names.first().cloned().unwrap_or_default();
    let import_path = opts.import_file_path.as_deref();
    let import_exists = import_path.map(|p| p.exists()).unwrap_or(false);
    let (status, imported, failed) = match &result {
        Ok(outcome) => (
            if outcome.up_ok && outcome.finalize_error.is_none() {
                "success"
            } else {
                "failed"
            },
            outcome.imported,
            outcome.failed,
        ),
        Err(_) => ("failed", 0, 1),
    };
    info!(
        status,
        resources_imported = imported,
        resources_failed_to_import = failed,
        stack = %primary_stack,
        import_file = %import_path.map(|p| p.display().to_string()).unwrap_or_default(),
        import_file_exists = import_exists,
        "Run complete"
    );

    let outcome = result?;
    if let Some(summary) = &outcome.failure_details {
        info!(details = %summary, "Pulumi errors");
    }
    if !outcome.up_ok {
        return Err(anyhow!("operation failed"));
    }
    if let Some(err) = outcome.finalize_error {
        return Err(err);
    }
    Ok(())
}

struct RunOutcome {
    up_ok: bool,
    imported: usize,
    failed: usize,
    failure_details: Option<String>,
    finalize_error: Option<anyhow::Error>,
}

async fn drive_deployment(
    lookups: &Arc<Lookups>,
    providers: &InterceptedProviders,
    work_dir: &Path,
    opts: &RunOptions,
    collector: &Arc<CaptureCollector>,
) -> Result<RunOutcome> {
    let mut env: HashMap<String, String> = std::env::vars().collect();
    env.insert(
        "PULUMI_DEBUG_PROVIDERS".to_string(),
        providers.debug_providers.clone(),
    );
    // Update checks can stall headless runs.
    env.insert("PULUMI_SKIP_UPDATE_CHECK".to_string(), "true".to_string());
    env.insert(
        "PULUMI_AUTOMATION_API_SKIP_VERSION_CHECK".to_string(),
        "true".to_string(),
    );

    let mut capture_backend = None;
    if opts.mode == RunMode::CaptureImports {
        let backend = resolve_capture_backend(opts)?;
        env.insert(
            "PULUMI_BACKEND_URL".to_string(),
            format!("file://{}", backend.dir.display()),
        );
        env.entry("PULUMI_CONFIG_PASSPHRASE".to_string())
            .or_insert_with(|| CAPTURE_PASSPHRASE.to_string());
        info!(
            stack = %backend.stack_name,
            backend = %backend.dir.display(),
            "Using capture stack"
        );
        capture_backend = Some(backend);
    }

    let cli = PulumiCli::new(work_dir, env, opts.verbose);

    match &capture_backend {
        Some(backend) => cli.select_or_init_stack(&backend.stack_name).await?,
        None => {
            let selected = cli.selected_stack().await?;
            debug!(stack = %selected, "using selected stack");
        }
    }

    cli.set_config_path("aws-native:autoNaming.autoTrim", "true")
        .await
        .context("failed to set aws-native:autoNaming.autoTrim config")?;

    let mut skeleton = None;
    if let (Some(path), true) = (opts.import_file_path.as_deref(), opts.use_preview_import) {
        info!(path = %path.display(), "Running pulumi preview to generate import skeleton");
        cli.preview_import_file(path).await?;
        skeleton = Some(read_file(path).with_context(|| {
            format!("reading previewed import file {}", path.display())
        })?);
    }

    let event_dir = tempfile::tempdir().context("creating event log directory")?;
    let event_log = event_dir.path().join("events.jsonl");
    let (event_tx, event_rx) = mpsc::channel(128);
    let tracker_task = tokio::spawn(async move {
        let mut tracker = UpEventTracker::new();
        tracker.consume(event_rx).await;
        tracker
    });

    info!("Importing stack...");
    let up_result = cli.up_with_events(&event_log, event_tx).await;
    let tracker = tracker_task.await.expect("event tracker task panicked");

    let up_ok = matches!(up_result, Ok(true));
    if let Err(err) = &up_result {
        warn!(%err, "pulumi up did not run cleanly");
    }

    let imported = tracker.created();
    let mut failed = tracker.failed_creates();
    if !up_ok && imported == 0 && failed == 0 {
        failed = 1;
    }

    let mut finalize_error = None;
    if let Some(path) = opts.import_file_path.as_deref() {
        if !up_ok {
            warn!("pulumi up encountered errors, writing partial import file");
        }
        // Stack entries that can never be imported are surfaced in the
        // capture summary rather than silently dropped.
        for entry in lookups.snapshot().entries() {
            if let Some(reason) = unsupported_stack_resource(entry.resource_type.as_str()) {
                collector.skip(SkippedCapture {
                    resource_type: entry.resource_type.to_string(),
                    logical_name: entry.logical_id.to_string(),
                    reason: reason.to_string(),
                });
            }
        }
        if let Err(err) = finalize_capture(
            &cli,
            collector,
            path,
            !up_ok,
            skeleton.as_ref(),
            opts.filter_placeholders_only,
        )
        .await
        {
            warn!(error = %err, "Error writing import file");
            finalize_error = Some(err);
        }
    }

    if let Some(backend) = capture_backend {
        cleanup_capture_backend(&cli, backend, opts).await;
    }

    let failure_details = {
        let summary = tracker.failure_summary();
        (!summary.is_empty() && !up_ok).then_some(summary)
    };

    Ok(RunOutcome {
        up_ok,
        imported,
        failed,
        failure_details,
        finalize_error,
    })
}

/// Export the stack state and write the final import file. Runs even after
/// a failed up so the user gets actionable output.
async fn finalize_capture(
    cli: &PulumiCli,
    collector: &CaptureCollector,
    path: &Path,
    is_partial: bool,
    skeleton: Option<&ImportFile>,
    placeholders_only: bool,
) -> Result<()> {
    let exported = match cli.export_stack().await {
        Ok(raw) => raw,
        Err(err) => {
            // Whatever was captured is still worth writing.
            warn!(error = %err, "Failed to export stack state");
            String::new()
        }
    };
    let deployment = parse_exported_deployment(&exported)?;
    match &deployment {
        Some(deployment) => info!(
            resources = deployment.resources.len(),
            "Exported stack deployment contains state"
        ),
        None => info!("Exported stack deployment is empty; capture file will only include intercepted resources"),
    }

    let summary = collector.summary();
    let captures: Vec<CaptureMetadata> = collector
        .results()
        .into_iter()
        .map(|capture| CaptureMetadata {
            resource_type: capture.resource_type,
            name: capture.name,
            logical_name: capture.logical_name,
            id: capture.id,
            properties: capture.properties,
        })
        .collect();
    if skeleton.is_some() {
        info!(
            count = captures.len(),
            "Merging preview import skeleton with captured resources"
        );
    }

    let built = build_file(deployment.as_ref(), &captures);
    let mut file = merge_with_skeleton(skeleton, Some(&built));

    if placeholders_only {
        let original = file.resources.len();
        file = filter_placeholder_resources(&file);
        let filtered = file.resources.len();
        if filtered == 0 {
            info!("No placeholder resources found; import file will be empty");
        } else if filtered != original {
            info!(filtered, original, "Filtered import file down to placeholder resources");
        }
    }

    write_file(path, &file)?;
    info!(
        resources = file.resources.len(),
        path = %path.display(),
        intercepts = summary.total_intercepts,
        result = if is_partial { "partial" } else { "complete" },
        "Wrote import file"
    );
    let deduped = summary.total_intercepts.saturating_sub(summary.unique_resources);
    if deduped > 0 {
        debug!(count = deduped, "Deduped duplicate captures");
    }
    if !summary.skipped.is_empty() {
        info!(count = summary.skipped.len(), "Skipped resources during capture");
        for skipped in &summary.skipped {
            info!(
                logical_name = %skipped.logical_name,
                resource_type = %skipped.resource_type,
                reason = %skipped.reason,
                "Skipped resource"
            );
        }
    }
    Ok(())
}

struct CaptureBackend {
    dir: PathBuf,
    stack_name: String,
    temp: Option<tempfile::TempDir>,
}

fn resolve_capture_backend(opts: &RunOptions) -> Result<CaptureBackend> {
    let mut stack_name = derive_capture_stack_name(&opts.stack_names, opts.local_stack_file.as_deref());
    if stack_name.is_empty() {
        stack_name = format!("capture-{}", std::process::id());
    }
    if let Some(file) = &opts.local_stack_file {
        let absolute = std::path::absolute(file)
            .with_context(|| format!("resolving local stack file {}", file.display()))?;
        let dir = absolute
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating backend directory {}", dir.display()))?;
        return Ok(CaptureBackend {
            dir,
            stack_name,
            temp: None,
        });
    }
    let temp = tempfile::Builder::new()
        .prefix("stackferry-capture-")
        .tempdir()
        .context("creating capture backend directory")?;
    Ok(CaptureBackend {
        dir: temp.path().to_path_buf(),
        stack_name,
        temp: Some(temp),
    })
}

async fn cleanup_capture_backend(cli: &PulumiCli, backend: CaptureBackend, opts: &RunOptions) {
    if opts.local_stack_file.is_some() || opts.keep_import_state {
        if let Some(temp) = backend.temp {
            // Keep the backend around for the next iterate run.
            let _ = temp.into_path();
        }
        return;
    }
    if let Err(err) = cli.remove_stack(&backend.stack_name).await {
        warn!(stack = %backend.stack_name, error = %err, "Failed to remove capture stack");
    }
    drop(backend.temp);
}

/// Name the capture stack from the local stack file's base name, falling
/// back to the sanitized CFN stack refs.
fn derive_capture_stack_name(stack_refs: &[String], stack_file: Option<&Path>) -> String {
    if let Some(file) = stack_file {
        let base = file
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        let sanitized = sanitize_stack_component(&base);
        if !sanitized.is_empty() {
            return sanitized;
        }
    }
    let parts: Vec<String> = stack_refs
        .iter()
        .map(|r| sanitize_stack_component(r))
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        return String::new();
    }
    format!("capture-{}", parts.join("-"))
}

/// Keep letters, digits, `-`, `_` and `.`; everything else becomes `-`.
/// The ends are trimmed of separators so names stay valid stack names.
fn sanitize_stack_component(value: &str) -> String {
    let mapped: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();
    mapped.trim_matches(|c| matches!(c, '-' | '.' | ' ')).to_string()
}

struct InterceptedProviders {
    debug_providers: String,
    processes: ProcessSet,
    servers: Vec<JoinHandle<()>>,
}

impl InterceptedProviders {
    async fn shutdown(self) {
        for server in &self.servers {
            server.abort();
        }
        self.processes.shutdown().await;
    }
}

async fn start_intercepted_providers(
    lookups: Arc<Lookups>,
    work_dir: &Path,
    opts: &RunOptions,
    collector: Arc<CaptureCollector>,
) -> Result<InterceptedProviders> {
    let specs: Vec<(&str, &str, Arc<dyn CreateInterceptor>)> = vec![
        (
            "aws-native",
            AWS_NATIVE_PLUGIN_VERSION,
            Arc::new(NativeCreateInterceptor::new(
                lookups.clone(),
                opts.mode,
                collector.clone(),
            )),
        ),
        (
            "aws",
            AWS_PLUGIN_VERSION,
            Arc::new(ClassicCreateInterceptor::new(
                lookups.clone(),
                opts.mode,
                opts.skip_create,
                collector.clone(),
            )),
        ),
        (
            "docker-build",
            DOCKER_BUILD_PLUGIN_VERSION,
            Arc::new(DockerCreateInterceptor),
        ),
    ];

    let providers = InterceptedProviders {
        debug_providers: String::new(),
        processes: ProcessSet::new(),
        servers: Vec::new(),
    };
    match start_all(providers, specs, work_dir).await {
        Ok(providers) => Ok(providers),
        Err((providers, err)) => {
            providers.shutdown().await;
            Err(err)
        }
    }
}

async fn start_all(
    mut providers: InterceptedProviders,
    specs: Vec<(&str, &str, Arc<dyn CreateInterceptor>)>,
    work_dir: &Path,
) -> Result<InterceptedProviders, (InterceptedProviders, anyhow::Error)> {
    let mut entries = Vec::new();
    for (name, version, interceptor) in specs {
        let started = async {
            let binary = ensure_plugin_binary(name, version).await?;
            let process = start_provider_process(&binary, name, work_dir).await?;
            let upstream = connect_upstream(process.port)
                .await
                .with_context(|| format!("connecting to provider {name} on port {}", process.port))?;
            Ok::<_, anyhow::Error>((process, upstream))
        }
        .await;
        let (process, upstream) = match started {
            Ok(pair) => pair,
            Err(err) => return Err((providers, err)),
        };
        providers.processes.add(process);
        match serve_intercepted(InterceptedProvider::new(upstream, interceptor)).await {
            Ok((port, handle)) => {
                providers.servers.push(handle);
                entries.push(format!("{name}:{port}"));
            }
            Err(err) => {
                return Err((providers, anyhow!("serving intercepted provider {name}: {err}")));
            }
        }
    }
    providers.debug_providers = entries.join(",");
    Ok(providers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_stack_component() {
        assert_eq!(sanitize_stack_component("my-stack_1.0"), "my-stack_1.0");
        assert_eq!(sanitize_stack_component("my stack/dev"), "my-stack-dev");
        assert_eq!(sanitize_stack_component("--weird--"), "weird");
        assert_eq!(sanitize_stack_component(""), "");
        // Already-valid names come back unchanged.
        let valid = "capture-app-dev";
        assert_eq!(sanitize_stack_component(valid), valid);
        assert_eq!(
            sanitize_stack_component(&sanitize_stack_component("a b c")),
            sanitize_stack_component("a b c")
        );
    }

    #[test]
    fn test_derive_capture_stack_name() {
        assert_eq!(
            derive_capture_stack_name(&["app-dev".to_string()], None),
            "capture-app-dev"
        );
        assert_eq!(
            derive_capture_stack_name(
                &["app dev".to_string(), "other".to_string()],
                None
            ),
            "capture-app-dev-other"
        );
        assert_eq!(
            derive_capture_stack_name(
                &["app".to_string()],
                Some(Path::new("/tmp/state files/my state.json"))
            ),
            "my-state"
        );
        assert_eq!(derive_capture_stack_name(&[], None), "");
    }
}

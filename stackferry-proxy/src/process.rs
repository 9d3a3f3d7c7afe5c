//! Lifecycle of upstream provider plugin processes.
//!
//! Each plugin binary is launched as a child with piped stdio. A provider
//! announces readiness by printing its listening port as the first stdout
//! line; stderr is capped so a crashing provider cannot balloon memory, and
//! whatever it wrote is attached to the startup error.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

const STDERR_CAPTURE_LIMIT: usize = 4096;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Locate a provider plugin binary, installing it through the Pulumi CLI
/// when absent. Plugins land under `$PULUMI_HOME/plugins` (default
/// `~/.pulumi/plugins`).
pub async fn ensure_plugin_binary(name: &str, version: &str) -> Result<PathBuf> {
    let home = match std::env::var_os("PULUMI_HOME") {
        Some(home) => PathBuf::from(home),
        None => {
            let home = std::env::var_os("HOME")
                .ok_or_else(|| anyhow!("neither PULUMI_HOME nor HOME is set"))?;
            PathBuf::from(home).join(".pulumi")
        }
    };
    let binary = home
        .join("plugins")
        .join(format!("resource-{name}-v{version}"))
        .join(format!("pulumi-resource-{name}"));
    if binary.exists() {
        return Ok(binary);
    }

    debug!(name, version, "installing provider plugin");
    let output = Command::new("pulumi")
        .args(["plugin", "install", "resource", name, version])
        .output()
        .await
        .with_context(|| format!("running pulumi plugin install for {name}"))?;
    if !output.status.success() {
        bail!(
            "installing provider plugin {name} v{version} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    if !binary.exists() {
        bail!("provider plugin {name} v{version} missing after install at {}", binary.display());
    }
    Ok(binary)
}

/// A running provider child plus the port it serves on.
#[derive(Debug)]
pub struct ProviderProcess {
    pub name: String,
    pub port: u16,
    child: Child,
}

/// Spawn the provider binary and wait for its port announcement.
pub async fn start_provider_process(
    binary: &Path,
    name: &str,
    work_dir: &Path,
) -> Result<ProviderProcess> {
    let mut child = Command::new(binary)
        .current_dir(work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("spawning provider {name} from {}", binary.display()))?;

    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");

    // Capture the first 4 KiB of stderr for diagnostics while draining the
    // rest so the child never blocks on a full pipe.
    let stderr_buf = Arc::new(Mutex::new(Vec::new()));
    let stderr_task = {
        let stderr_buf = stderr_buf.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut chunk = [0u8; 1024];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let mut buf = stderr_buf.lock().expect("stderr buffer poisoned");
                        let remaining = STDERR_CAPTURE_LIMIT.saturating_sub(buf.len());
                        buf.extend_from_slice(&chunk[..n.min(remaining)]);
                    }
                }
            }
        })
    };

    let mut reader = BufReader::new(stdout);
    let mut line = String::new();
    let port = match reader.read_line(&mut line).await {
        Ok(0) => Err(anyhow!("provider exited before announcing a port")),
        Ok(_) => line
            .trim()
            .parse::<u16>()
            .map_err(|_| anyhow!("expected a port number on stdout, got {:?}", line.trim())),
        Err(err) => Err(anyhow!("reading provider stdout: {err}")),
    };

    let port = match port {
        Ok(port) => port,
        Err(err) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            let _ = tokio::time::timeout(Duration::from_millis(100), stderr_task).await;
            let stderr_text = String::from_utf8_lossy(&stderr_buf.lock().expect("stderr buffer poisoned"))
                .trim()
                .to_string();
            if stderr_text.is_empty() {
                bail!("failed to read port number from provider {name}: {err}");
            }
            bail!("failed to read port number from provider {name}: {err}; stderr: {stderr_text}");
        }
    };

    // Drain any further stdout so the provider can't block on a full pipe.
    tokio::spawn(async move {
        let mut sink = tokio::io::sink();
        let _ = tokio::io::copy(&mut reader, &mut sink).await;
    });

    debug!(name, port, "provider process started");
    Ok(ProviderProcess {
        name: name.to_string(),
        port,
        child,
    })
}

/// The set of provider children owned by one run.
#[derive(Default)]
pub struct ProcessSet {
    processes: Mutex<Vec<ProviderProcess>>,
}

impl ProcessSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, process: ProviderProcess) {
        self.processes
            .lock()
            .expect("process set poisoned")
            .push(process);
    }

    /// Kill every child and give each up to five seconds to be reaped.
    /// A child that does not exit in time is logged and abandoned.
    pub async fn shutdown(&self) {
        let processes = std::mem::take(&mut *self.processes.lock().expect("process set poisoned"));
        for mut process in processes {
            let _ = process.child.start_kill();
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, process.child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(name = %process.name, ?status, "provider process exited");
                }
                Ok(Err(err)) => {
                    warn!(name = %process.name, %err, "failed waiting for provider process");
                }
                Err(_) => {
                    warn!(
                        name = %process.name,
                        "provider process did not exit within timeout"
                    );
                }
            }
        }
    }
}

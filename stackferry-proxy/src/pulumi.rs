//! Driving the Pulumi CLI.
//!
//! The deployment surface is the `pulumi` binary run against the program
//! directory with a fully-controlled environment. `up` streams engine
//! events through a JSON-lines event log that is tailed while the process
//! runs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::events::EngineEvent;

const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A handle on one Pulumi program directory plus the environment every
/// invocation runs with.
pub struct PulumiCli {
    work_dir: PathBuf,
    env: HashMap<String, String>,
    verbose: u32,
}

impl PulumiCli {
    pub fn new(work_dir: &Path, env: HashMap<String, String>, verbose: u32) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            env,
            verbose,
        }
    }

    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("pulumi");
        cmd.args(args)
            .arg("--non-interactive")
            .current_dir(&self.work_dir)
            .env_clear()
            .envs(&self.env)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if self.verbose > 0 {
            cmd.args([
                "--logtostderr",
                "--logflow",
                &format!("-v={}", self.verbose),
            ]);
        }
        cmd
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = self
            .command(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("running pulumi {}", args.join(" ")))?;
        if !output.status.success() {
            // Attach the CLI's stderr the same way the Automation API does,
            // so the top-level error trimmer can strip it for display.
            bail!(
                "pulumi {} failed\nstderr: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Name of the stack currently selected in the workspace.
    pub async fn selected_stack(&self) -> Result<String> {
        let stdout = self
            .run(&["stack", "--show-name"])
            .await
            .context("make sure to select a stack with `pulumi stack select`")?;
        let name = stdout.trim().to_string();
        if name.is_empty() {
            bail!("no stack selected; run `pulumi stack select` first");
        }
        Ok(name)
    }

    /// Select the stack, creating it when it does not exist yet.
    pub async fn select_or_init_stack(&self, name: &str) -> Result<()> {
        if self.run(&["stack", "select", name]).await.is_ok() {
            return Ok(());
        }
        self.run(&["stack", "init", name]).await?;
        Ok(())
    }

    pub async fn remove_stack(&self, name: &str) -> Result<()> {
        self.run(&["stack", "rm", name, "--force", "--yes"]).await?;
        Ok(())
    }

    pub async fn set_config_path(&self, key: &str, value: &str) -> Result<()> {
        self.run(&["config", "set", "--path", key, value]).await?;
        Ok(())
    }

    /// Run `pulumi preview --import-file` so the engine writes the import
    /// skeleton to `path`.
    pub async fn preview_import_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("ensuring import file directory for {}", path.display()))?;
            }
        }
        let path_arg = path.display().to_string();
        self.run(&[
            "preview",
            "--import-file",
            path_arg.as_str(),
            "--suppress-progress",
        ])
        .await
        .context("pulumi preview for import file")?;
        Ok(())
    }

    /// Export the current stack's deployment as raw JSON.
    pub async fn export_stack(&self) -> Result<String> {
        self.run(&["stack", "export"]).await
    }

    /// Run `pulumi up`, tailing the event log into `events` while the
    /// process runs. The channel is dropped once the log is fully drained,
    /// which is the consumer's termination signal. The returned flag is
    /// true when the up succeeded.
    pub async fn up_with_events(
        &self,
        event_log: &Path,
        events: mpsc::Sender<EngineEvent>,
    ) -> Result<bool> {
        // Truncate up front so a stale log from a previous run cannot leak
        // events into this one.
        std::fs::write(event_log, b"")
            .with_context(|| format!("creating event log {}", event_log.display()))?;

        let event_log_arg = event_log.display().to_string();
        let mut cmd = self.command(&[
            "up",
            "--yes",
            "--continue-on-error",
            "--suppress-progress",
            "--event-log",
            event_log_arg.as_str(),
        ]);
        if self.verbose > 0 {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
        let mut child = cmd.spawn().context("spawning pulumi up")?;

        let mut offset: u64 = 0;
        let mut poll = tokio::time::interval(EVENT_POLL_INTERVAL);
        let status = loop {
            tokio::select! {
                status = child.wait() => break status.context("waiting for pulumi up")?,
                _ = poll.tick() => {
                    offset = drain_event_log(event_log, offset, &events).await?;
                }
            }
        };
        // Final drain after exit so trailing events are not lost.
        drain_event_log(event_log, offset, &events).await?;
        drop(events);

        Ok(status.success())
    }
}

/// Read complete JSON lines appended to the event log since `offset`,
/// forwarding each parsed event. Returns the new offset; a partial trailing
/// line stays unconsumed until the writer finishes it.
async fn drain_event_log(
    path: &Path,
    offset: u64,
    events: &mpsc::Sender<EngineEvent>,
) -> Result<u64> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(_) => return Ok(offset),
    };
    file.seek(std::io::SeekFrom::Start(offset))
        .await
        .context("seeking event log")?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).await.context("reading event log")?;

    let Some(last_newline) = buf.iter().rposition(|&b| b == b'\n') else {
        return Ok(offset);
    };
    let complete = &buf[..=last_newline];
    for line in complete.split(|&b| b == b'\n') {
        if line.is_empty() {
            continue;
        }
        match serde_json::from_slice::<EngineEvent>(line) {
            Ok(event) => {
                if events.send(event).await.is_err() {
                    // Consumer is gone; keep draining so the offset stays
                    // accurate, but there is nobody left to tell.
                    warn!("event consumer dropped before the log was drained");
                }
            }
            Err(err) => {
                debug!(%err, "skipping unparseable engine event line");
            }
        }
    }
    Ok(offset + complete.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_event_log_handles_partial_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("events.log");
        std::fs::write(
            &log,
            concat!(
                r#"{"sequence":1,"resourcePreEvent":{"metadata":{"op":"create","urn":"urn:pulumi:dev::p::aws:s3/bucket:Bucket::b"}}}"#,
                "\n",
                r#"{"sequence":2,"resOut"#,
            ),
        )
        .unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let offset = drain_event_log(&log, 0, &tx).await.unwrap();
        let event = rx.try_recv().unwrap();
        assert!(event.resource_pre_event.is_some());
        assert!(rx.try_recv().is_err());

        // Completing the partial line makes it visible on the next drain.
        let mut contents = std::fs::read(&log).unwrap();
        contents.extend_from_slice(br#"putsEvent":{"metadata":{"op":"create"}}}"#);
        contents.push(b'\n');
        std::fs::write(&log, contents).unwrap();

        let final_offset = drain_event_log(&log, offset, &tx).await.unwrap();
        let event = rx.try_recv().unwrap();
        assert!(event.res_outputs_event.is_some());
        assert_eq!(final_offset, std::fs::read(&log).unwrap().len() as u64);
    }

    #[tokio::test]
    async fn test_drain_event_log_missing_file_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(1);
        let offset = drain_event_log(&dir.path().join("absent.log"), 0, &tx)
            .await
            .unwrap();
        assert_eq!(offset, 0);
        assert!(rx.try_recv().is_err());
    }
}

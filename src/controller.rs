//! Lifecycle control of the implementation under test.
//!
//! Each real server or client binary gets its own controller (thin glue,
//! outside this crate): it knows how to write that implementation's config
//! and spawn it pointed at a harness-chosen host/port. The harness only sees
//! the [`ServerController`] trait, injected explicitly at construction — no
//! ambient registry decides which implementation a test runs against.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::Context;
use serde::Serialize;
use tokio::process::{Child, Command};

use crate::error::{HarnessError, Result};

/// Per-run options threaded into the spawned implementation's config.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunConfig {
    /// Connection password the server must require, if any.
    pub password: Option<String>,
    /// Whether the implementation should listen with TLS (most don't, here).
    pub ssl: bool,
}

/// Controls one server (or client) implementation under test.
pub trait ServerController {
    /// Start the implementation, listening on (or connecting to)
    /// `hostname:port`. Returns once the process is spawned; the harness
    /// polls the port for readiness itself.
    fn run(&mut self, hostname: &str, port: u16, config: &RunConfig) -> anyhow::Result<()>;

    /// Tear the process down. Idempotent; called on every test teardown.
    fn kill(&mut self);

    /// Optional SASL mechanisms this implementation claims to support.
    fn supported_sasl_mechanisms(&self) -> &HashSet<String>;
}

/// Fail a test early (as skipped, not failed) when the implementation does
/// not claim the SASL mechanism a scenario needs.
pub fn require_sasl_mechanism(controller: &dyn ServerController, mechanism: &str) -> Result<()> {
    if controller.supported_sasl_mechanisms().contains(mechanism) {
        Ok(())
    } else {
        Err(HarnessError::FeatureNotSupported(format!(
            "SASL mechanism {mechanism}"
        )))
    }
}

/// Scaffold for controllers that drive their implementation through a
/// config directory: a temp dir for generated config files plus the spawned
/// child process. Concrete controllers embed one of these and add the
/// implementation-specific config shape and command line.
#[derive(Default)]
pub struct DirectoryBasedController {
    directory: Option<tempfile::TempDir>,
    process: Option<Child>,
}

impl DirectoryBasedController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of the config directory, creating it on first use.
    pub fn directory(&mut self) -> anyhow::Result<&Path> {
        if self.directory.is_none() {
            let dir = tempfile::Builder::new()
                .prefix("irc-conformance-")
                .tempdir()
                .context("failed to create controller config directory")?;
            self.directory = Some(dir);
        }
        Ok(self.directory.as_ref().unwrap().path())
    }

    /// Serialize `config` as pretty JSON into `<dir>/<name>` and return the
    /// full path, for implementations configured by a JSON file.
    pub fn write_json_config(
        &mut self,
        name: &str,
        config: &serde_json::Value,
    ) -> anyhow::Result<PathBuf> {
        let path = self.directory()?.join(name);
        let contents =
            serde_json::to_string_pretty(config).context("failed to serialize config")?;
        std::fs::write(&path, contents)
            .with_context(|| format!("failed to write config file {}", path.display()))?;
        Ok(path)
    }

    /// Write an arbitrary config file (INI, YAML, whatever the
    /// implementation wants) into the config directory.
    pub fn write_config(&mut self, name: &str, contents: &str) -> anyhow::Result<PathBuf> {
        let path = self.directory()?.join(name);
        std::fs::write(&path, contents)
            .with_context(|| format!("failed to write config file {}", path.display()))?;
        Ok(path)
    }

    /// Spawn the implementation. Output is inherited so implementation logs
    /// land in the test output where they are most useful.
    pub fn spawn(&mut self, mut command: Command) -> anyhow::Result<()> {
        let child = command
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("failed to spawn implementation under test")?;
        self.process = Some(child);
        Ok(())
    }

    /// Kill the spawned process, if any. Safe to call repeatedly.
    pub fn kill(&mut self) {
        if let Some(mut child) = self.process.take() {
            if let Err(e) = child.start_kill() {
                tracing::warn!("failed to kill implementation under test: {e}");
            }
        }
    }
}

impl Drop for DirectoryBasedController {
    fn drop(&mut self) {
        self.kill();
    }
}

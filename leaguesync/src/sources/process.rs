//! Subprocess-backed collaborators.
//!
//! Each collaborator is an external command. Fetchers write one JSON
//! record per stdout line; loaders read the same shape on stdin; gates
//! signal their verdict through the exit status. Context reaches the
//! command through `LEAGUESYNC_*` environment variables.

use std::fmt;
use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{
    FetchError, FetchWindow, Fetcher, GateError, GateReport, GateTarget, LoadError, Loader,
    ValidationGate,
};
use crate::record::{Dataset, DatasetKind, Record};

/// Environment variable naming the dataset a fetch or load targets.
pub const ENV_DATASET: &str = "LEAGUESYNC_DATASET";
/// Environment variable carrying the fetch window kind, `full` or `since`.
pub const ENV_WINDOW: &str = "LEAGUESYNC_WINDOW";
/// Environment variable carrying the window date when the window is `since`.
pub const ENV_SINCE: &str = "LEAGUESYNC_SINCE";
/// Environment variable naming the environment a gate validates.
pub const ENV_TARGET: &str = "LEAGUESYNC_TARGET";

/// An external command: program plus fixed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
}

impl CommandSpec {
    /// Creates a spec from a program and its arguments.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates a spec that runs a line through `sh -c`.
    pub fn shell(line: impl Into<String>) -> Self {
        Self::new("sh", ["-c".to_string(), line.into()])
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command.kill_on_drop(true);
        command
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Fetcher that runs a subprocess and parses its stdout as JSON lines.
#[derive(Debug, Clone)]
pub struct ProcessFetcher {
    spec: CommandSpec,
}

impl ProcessFetcher {
    /// Creates a fetcher around the given command.
    #[must_use]
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl Fetcher for ProcessFetcher {
    async fn fetch(
        &self,
        dataset: DatasetKind,
        window: FetchWindow,
    ) -> Result<Vec<Record>, FetchError> {
        let mut command = self.spec.command();
        command.env(ENV_DATASET, dataset.as_str());
        match window {
            FetchWindow::Full => {
                command.env(ENV_WINDOW, "full");
            }
            FetchWindow::Since(date) => {
                command.env(ENV_WINDOW, "since");
                command.env(ENV_SINCE, date.to_string());
            }
        }

        tracing::debug!(%dataset, %window, command = %self.spec, "spawning fetch subprocess");
        let output = command.output().await.map_err(|err| {
            FetchError::transient(dataset, format!("failed to spawn '{}': {err}", self.spec))
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FetchError::transient(
                dataset,
                format!(
                    "fetch command failed ({}): {}",
                    output.status,
                    stderr.trim()
                ),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut records = Vec::new();
        for (number, line) in stdout.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(line).map_err(|err| {
                FetchError::permanent(dataset, format!("line {} is not a record: {err}", number + 1))
            })?;
            records.push(record);
        }
        tracing::debug!(%dataset, records = records.len(), "fetch subprocess complete");
        Ok(records)
    }
}

/// Loader that pipes records into a subprocess as JSON lines.
#[derive(Debug, Clone)]
pub struct ProcessLoader {
    spec: CommandSpec,
}

impl ProcessLoader {
    /// Creates a loader around the given command.
    #[must_use]
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl Loader for ProcessLoader {
    async fn load(&self, dataset: &Dataset) -> Result<usize, LoadError> {
        let kind = dataset.kind();
        let mut payload = Vec::new();
        for record in dataset.records() {
            serde_json::to_writer(&mut payload, record).map_err(|err| {
                LoadError::permanent(kind, format!("record failed to serialize: {err}"))
            })?;
            payload.push(b'\n');
        }

        let mut command = self.spec.command();
        command.env(ENV_DATASET, kind.as_str());
        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        tracing::debug!(dataset = %kind, records = dataset.len(), command = %self.spec, "spawning load subprocess");
        let mut child = command.spawn().map_err(|err| {
            LoadError::transient(kind, format!("failed to spawn '{}': {err}", self.spec))
        })?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| LoadError::transient(kind, "loader stdin was not captured"))?;

        let feed = async {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await?;
            Ok::<(), io::Error>(())
        };
        let (write_result, output) = tokio::join!(feed, child.wait_with_output());

        let output = output.map_err(|err| {
            LoadError::transient(kind, format!("waiting for loader failed: {err}"))
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LoadError::transient(
                kind,
                format!("load command failed ({}): {}", output.status, stderr.trim()),
            ));
        }
        // A loader may close stdin once it has read what it needs.
        if let Err(err) = write_result {
            if err.kind() != io::ErrorKind::BrokenPipe {
                return Err(LoadError::transient(
                    kind,
                    format!("writing to loader stdin failed: {err}"),
                ));
            }
        }
        Ok(dataset.len())
    }
}

/// Gate that delegates the verdict to a subprocess exit status.
///
/// Exit 0 is a pass, anything else is a fail; either way the command's
/// output becomes the diagnostic. Only a command that cannot run at all
/// is a [`GateError`].
#[derive(Debug, Clone)]
pub struct ProcessGate {
    dev: CommandSpec,
    prod: CommandSpec,
}

impl ProcessGate {
    /// Creates a gate with one command per target environment.
    #[must_use]
    pub fn new(dev: CommandSpec, prod: CommandSpec) -> Self {
        Self { dev, prod }
    }

    fn spec_for(&self, target: GateTarget) -> &CommandSpec {
        match target {
            GateTarget::Dev => &self.dev,
            GateTarget::Prod => &self.prod,
        }
    }
}

#[async_trait]
impl ValidationGate for ProcessGate {
    async fn validate(&self, target: GateTarget) -> Result<GateReport, GateError> {
        let spec = self.spec_for(target);
        let mut command = spec.command();
        command.env(ENV_TARGET, target.as_str());

        tracing::debug!(%target, command = %spec, "spawning validation gate");
        let output = command.output().await.map_err(|err| GateError {
            target,
            message: format!("failed to spawn '{spec}': {err}"),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let diagnostic = if stdout.is_empty() { stderr } else { stdout };

        if output.status.success() {
            let diagnostic = if diagnostic.is_empty() {
                "all checks passed".to_string()
            } else {
                diagnostic
            };
            Ok(GateReport::pass(diagnostic))
        } else {
            let diagnostic = if diagnostic.is_empty() {
                format!("gate exited with {}", output.status)
            } else {
                diagnostic
            };
            Ok(GateReport::fail(diagnostic))
        }
    }
}

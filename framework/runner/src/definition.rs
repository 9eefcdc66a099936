use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};

use crate::cli::NetemLabCli;
use crate::error::ConfigError;
use crate::scenario::{ImpairmentRule, Scenario};
use crate::supervisor::CommandSpec;
use crate::workspace::Workspace;

/// The fixed pauses of a run.
#[derive(Debug, Clone)]
pub struct RunTimings {
    /// Pause after starting the server so it can bind before the first client connects.
    pub settle: Duration,
    /// Gap between client launches so they don't all connect at the same moment.
    pub stagger: Duration,
    /// Pause after the drain so processes can finish writing their logs before plotting.
    pub flush: Duration,
    /// How long a process gets to exit after SIGTERM before it is killed.
    pub stop_grace: Duration,
    /// Interval of the liveness check, if enabled.
    pub watch_interval: Option<Duration>,
}

impl Default for RunTimings {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(1),
            stagger: Duration::from_millis(300),
            flush: Duration::from_secs(1),
            stop_grace: Duration::from_secs(3),
            watch_interval: None,
        }
    }
}

/// Everything needed to run one experiment, validated.
#[derive(Debug, Clone)]
pub struct RunDefinition {
    pub scenario: Scenario,
    pub duration: Duration,
    pub client_count: usize,
    pub interface: String,
    pub output_root: PathBuf,
    pub server_cmd: CommandSpec,
    pub client_cmd: CommandSpec,
    pub plot_cmd: CommandSpec,
    pub sudo: bool,
    pub no_progress: bool,
    pub timings: RunTimings,
}

impl RunDefinition {
    /// Validate the command line. Nothing on the host is touched.
    pub fn from_cli(cli: NetemLabCli) -> Result<Self, ConfigError> {
        let scenario: Scenario = cli.scenario.parse()?;
        if cli.duration == 0 {
            return Err(ConfigError::ZeroDuration);
        }
        if cli.clients == 0 {
            return Err(ConfigError::NoClients);
        }

        let timings = RunTimings {
            watch_interval: cli.watch.then(|| Duration::from_secs(1)),
            ..Default::default()
        };

        Ok(Self {
            scenario,
            duration: Duration::from_secs(cli.duration),
            client_count: cli.clients,
            interface: cli.interface,
            output_root: cli.output_root,
            server_cmd: CommandSpec::parse("server", &cli.server_cmd)?,
            client_cmd: CommandSpec::parse("client", &cli.client_cmd)?,
            plot_cmd: CommandSpec::parse("plotting", &cli.plot_cmd)?,
            sudo: cli.sudo,
            no_progress: cli.no_progress,
            timings,
        })
    }

    pub fn with_timings(mut self, timings: RunTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Fix the identity of a run started at `started_at`.
    pub fn describe(&self, started_at: DateTime<Local>) -> RunDescriptor {
        RunDescriptor {
            run_id: nanoid::nanoid!(),
            scenario: self.scenario,
            rules: self.scenario.rules(),
            duration: self.duration,
            client_count: self.client_count,
            interface: self.interface.clone(),
            workspace_path: self
                .output_root
                .join(Workspace::dir_name(self.scenario, &started_at)),
            started_at,
        }
    }
}

/// The identity and parameters of one run. Does not change once the run has started.
#[derive(Debug, Clone)]
pub struct RunDescriptor {
    run_id: String,
    scenario: Scenario,
    rules: Vec<ImpairmentRule>,
    duration: Duration,
    client_count: usize,
    interface: String,
    workspace_path: PathBuf,
    started_at: DateTime<Local>,
}

impl RunDescriptor {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn scenario(&self) -> Scenario {
        self.scenario
    }

    pub fn rules(&self) -> &[ImpairmentRule] {
        &self.rules
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn client_count(&self) -> usize {
        self.client_count
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Where the workspace for this run is created, relative to the configured output root.
    pub fn workspace_path(&self) -> &Path {
        &self.workspace_path
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }
}

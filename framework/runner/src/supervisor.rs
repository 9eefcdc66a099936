//! Launches the server and clients as background processes and stops them again.
//!
//! Processes are not watched while they run. A process that exits early is only noticed when it
//! is stopped, or by [ProcessSupervisor::poll_exited] if the caller asks.

use std::ffi::OsString;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::str::FromStr;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time::{timeout, Instant};

use crate::error::{CommandSpecError, ProcessStartError};
use crate::workspace::Workspace;

/// Environment variable pointing supervised processes at the run's `logs` directory.
pub const LOG_DIR_ENV: &str = "NETEM_LAB_LOG_DIR";
/// Environment variable pointing supervised processes at the run's `plots` directory.
pub const PLOTS_DIR_ENV: &str = "NETEM_LAB_PLOTS_DIR";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Server,
    /// Clients are numbered from 1.
    Client(usize),
}

impl Role {
    pub fn log_file_name(&self) -> String {
        match self {
            Role::Server => "server.log".to_string(),
            Role::Client(index) => format!("client_{index}.log"),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => write!(f, "server"),
            Role::Client(index) => write!(f, "client-{index}"),
        }
    }
}

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
}

impl CommandSpec {
    pub fn new(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a whitespace separated command line. There is no quoting, so build the spec with
    /// [CommandSpec::new] if an argument contains spaces.
    pub fn parse(name: &'static str, line: &str) -> Result<Self, CommandSpecError> {
        let mut parts = line.split_whitespace();
        let program = parts.next().ok_or(CommandSpecError { name })?;
        Ok(Self::new(program, parts))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Build a command that runs in `working_dir`.
    ///
    /// The program is looked up in `PATH`, and relative arguments that name existing files, such
    /// as a script, are made absolute first because they are relative to where the harness was
    /// started, not to `working_dir`.
    pub(crate) fn command(
        &self,
        role: &str,
        working_dir: &Path,
    ) -> Result<Command, ProcessStartError> {
        let program = which::which(&self.program).map_err(|source| ProcessStartError::NotFound {
            role: role.to_string(),
            program: self.program.clone(),
            source,
        })?;

        let mut command = Command::new(program);
        command.args(self.args.iter().map(|arg| absolute_if_exists(arg)));
        command.current_dir(working_dir);
        Ok(command)
    }
}

impl FromStr for CommandSpec {
    type Err = CommandSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse("command", s)
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

fn absolute_if_exists(arg: &str) -> OsString {
    let path = Path::new(arg);
    if path.is_relative() && path.exists() {
        if let Ok(absolute) = path.canonicalize() {
            return absolute.into_os_string();
        }
    }
    OsString::from(arg)
}

/// One supervised process.
#[derive(Debug)]
pub struct ManagedProcess {
    role: Role,
    child: Child,
    log_path: PathBuf,
    exited: Option<ExitStatus>,
}

impl ManagedProcess {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Ask the process to stop, escalating to a kill after `grace`.
    ///
    /// A process that has already exited is not an error.
    pub async fn stop(&mut self, grace: Duration) -> StopOutcome {
        if let Some(status) = self.exited {
            return StopOutcome::AlreadyExited(Some(status));
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exited = Some(status);
                return StopOutcome::AlreadyExited(Some(status));
            }
            Ok(None) => {}
            Err(e) => {
                log::debug!("Could not query {}: {e}", self.role);
                return StopOutcome::AlreadyExited(None);
            }
        }

        if !self.request_termination() {
            return StopOutcome::AlreadyExited(None);
        }

        match timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.exited = Some(status);
                StopOutcome::Terminated(status)
            }
            Ok(Err(e)) => {
                log::debug!("Lost track of {} while stopping it: {e}", self.role);
                StopOutcome::AlreadyExited(None)
            }
            Err(_) => {
                log::warn!(
                    "{} did not stop within {:?}, killing it",
                    self.role,
                    grace
                );
                if let Err(e) = self.child.kill().await {
                    log::debug!("Failed to kill {}: {e}", self.role);
                }
                StopOutcome::Killed
            }
        }
    }

    /// Returns `false` if the process was already gone.
    #[cfg(unix)]
    fn request_termination(&mut self) -> bool {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            return false;
        };
        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => true,
            Err(Errno::ESRCH) => false,
            Err(e) => {
                log::warn!("Failed to send SIGTERM to {} ({pid}): {e}", self.role);
                self.child.start_kill().is_ok()
            }
        }
    }

    #[cfg(not(unix))]
    fn request_termination(&mut self) -> bool {
        self.child.start_kill().is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Stopped after the termination request.
    Terminated(ExitStatus),
    /// Ignored the termination request and was killed.
    Killed,
    /// Had exited before the stop. The status is unknown if the process was reaped elsewhere.
    AlreadyExited(Option<ExitStatus>),
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopOutcome::Terminated(status) => write!(f, "terminated ({status})"),
            StopOutcome::Killed => write!(f, "killed"),
            StopOutcome::AlreadyExited(Some(status)) => write!(f, "already exited ({status})"),
            StopOutcome::AlreadyExited(None) => write!(f, "already exited"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StopRecord {
    pub role: Role,
    pub log_path: PathBuf,
    pub outcome: StopOutcome,
    pub requested_at: Instant,
    pub finished_at: Instant,
}

/// The result of stopping every supervised process.
///
/// Client records come first, in client order, followed by the server.
#[derive(Debug, Clone, Default)]
pub struct DrainReport {
    pub stopped: Vec<StopRecord>,
}

impl DrainReport {
    pub fn get(&self, role: Role) -> Option<&StopRecord> {
        self.stopped.iter().find(|r| r.role == role)
    }
}

/// Starts and stops the server and its clients.
#[derive(Debug)]
pub struct ProcessSupervisor {
    server_cmd: CommandSpec,
    client_cmd: CommandSpec,
    stop_grace: Duration,
    server: Option<ManagedProcess>,
    clients: Vec<ManagedProcess>,
}

impl ProcessSupervisor {
    pub fn new(server_cmd: CommandSpec, client_cmd: CommandSpec, stop_grace: Duration) -> Self {
        Self {
            server_cmd,
            client_cmd,
            stop_grace,
            server: None,
            clients: Vec::new(),
        }
    }

    /// Start the server with its output going to `server.log` in the workspace root.
    pub fn start_server(
        &mut self,
        workspace: &Workspace,
    ) -> Result<&ManagedProcess, ProcessStartError> {
        let process = spawn(Role::Server, &self.server_cmd, &[], workspace)?;
        Ok(&*self.server.insert(process))
    }

    /// Start client `index` for `duration`, with its output going to `client_<index>.log`.
    pub fn start_client(
        &mut self,
        index: usize,
        workspace: &Workspace,
        duration: Duration,
    ) -> Result<&ManagedProcess, ProcessStartError> {
        let extra = ["--duration".to_string(), duration.as_secs().to_string()];
        let process = spawn(Role::Client(index), &self.client_cmd, &extra, workspace)?;
        let position = self.clients.len();
        self.clients.push(process);
        Ok(&self.clients[position])
    }

    /// The server, if started, followed by the clients in start order.
    pub fn processes(&self) -> impl Iterator<Item = &ManagedProcess> {
        self.server.iter().chain(self.clients.iter())
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Processes that have exited since the previous call.
    pub fn poll_exited(&mut self) -> Vec<(Role, ExitStatus)> {
        let mut exited = Vec::new();
        for process in self.server.iter_mut().chain(self.clients.iter_mut()) {
            if process.exited.is_some() {
                continue;
            }
            if let Ok(Some(status)) = process.child.try_wait() {
                process.exited = Some(status);
                exited.push((process.role, status));
            }
        }
        exited
    }

    /// Stop all clients concurrently, then the server.
    pub async fn drain(&mut self) -> DrainReport {
        let grace = self.stop_grace;

        let client_stops = std::mem::take(&mut self.clients)
            .into_iter()
            .map(|mut process| async move {
                let record = stop_with_record(&mut process, grace).await;
                log::info!("Stopped {}: {}", record.role, record.outcome);
                record
            });
        let mut stopped = futures::future::join_all(client_stops).await;

        if let Some(mut server) = self.server.take() {
            let record = stop_with_record(&mut server, grace).await;
            log::info!("Stopped {}: {}", record.role, record.outcome);
            stopped.push(record);
        }

        DrainReport { stopped }
    }
}

async fn stop_with_record(process: &mut ManagedProcess, grace: Duration) -> StopRecord {
    let requested_at = Instant::now();
    let outcome = process.stop(grace).await;
    StopRecord {
        role: process.role,
        log_path: process.log_path.clone(),
        outcome,
        requested_at,
        finished_at: Instant::now(),
    }
}

fn spawn(
    role: Role,
    spec: &CommandSpec,
    extra_args: &[String],
    workspace: &Workspace,
) -> Result<ManagedProcess, ProcessStartError> {
    let log_path = workspace.root().join(role.log_file_name());
    let log_file_err = |source| ProcessStartError::LogFile {
        role: role.to_string(),
        path: log_path.clone(),
        source,
    };
    let stdout = File::create(&log_path).map_err(log_file_err)?;
    let stderr = stdout.try_clone().map_err(log_file_err)?;

    let mut command = spec.command(&role.to_string(), workspace.root())?;
    let child = command
        .args(extra_args)
        .env(LOG_DIR_ENV, workspace.logs_dir())
        .env(PLOTS_DIR_ENV, workspace.plots_dir())
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ProcessStartError::Spawn {
            role: role.to_string(),
            program: spec.program().to_string(),
            source,
        })?;

    log::info!(
        "Started {role} (pid {}) with output to '{}'",
        child
            .id()
            .map(|pid| pid.to_string())
            .unwrap_or_else(|| "?".to_string()),
        log_path.display()
    );

    Ok(ManagedProcess {
        role,
        child,
        log_path,
        exited: None,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace(temp: &TempDir) -> Workspace {
        Workspace::create(&temp.path().join("run")).unwrap()
    }

    fn sleeper() -> CommandSpec {
        // Trailing arguments, like the client's `--duration N`, land in `$1...` and are ignored.
        CommandSpec::new("sh", ["-c", "sleep 30", "sleeper"])
    }

    fn supervisor(server: CommandSpec, client: CommandSpec) -> ProcessSupervisor {
        ProcessSupervisor::new(server, client, Duration::from_secs(2))
    }

    #[test]
    fn parses_command_lines() {
        let spec = CommandSpec::parse("server", "  python3   server.py --port 5000 ").unwrap();
        assert_eq!("python3", spec.program());
        assert_eq!(vec!["server.py", "--port", "5000"], spec.args());
        assert_eq!("python3 server.py --port 5000", spec.to_string());

        assert!(CommandSpec::parse("server", "   ").is_err());
    }

    #[test]
    fn role_names_and_log_files() {
        assert_eq!("server", Role::Server.to_string());
        assert_eq!("client-3", Role::Client(3).to_string());
        assert_eq!("server.log", Role::Server.log_file_name());
        assert_eq!("client_3.log", Role::Client(3).log_file_name());
    }

    #[tokio::test]
    async fn starts_server_and_clients_with_distinct_logs() {
        let temp = TempDir::new().unwrap();
        let ws = workspace(&temp);
        let mut supervisor = supervisor(sleeper(), sleeper());

        supervisor.start_server(&ws).unwrap();
        for index in 1..=3 {
            supervisor
                .start_client(index, &ws, Duration::from_secs(5))
                .unwrap();
        }

        let logs: Vec<PathBuf> = supervisor
            .processes()
            .map(|p| p.log_path().to_path_buf())
            .collect();
        assert_eq!(
            vec![
                ws.root().join("server.log"),
                ws.root().join("client_1.log"),
                ws.root().join("client_2.log"),
                ws.root().join("client_3.log"),
            ],
            logs
        );
        assert!(logs.iter().all(|l| l.is_file()));
        assert_eq!(3, supervisor.client_count());

        let report = supervisor.drain().await;
        assert_eq!(4, report.stopped.len());
        assert!(report
            .stopped
            .iter()
            .all(|r| matches!(r.outcome, StopOutcome::Terminated(_))));
    }

    #[tokio::test]
    async fn clients_are_stopped_before_server() {
        let temp = TempDir::new().unwrap();
        let ws = workspace(&temp);
        let mut supervisor = supervisor(sleeper(), sleeper());

        supervisor.start_server(&ws).unwrap();
        supervisor.start_client(1, &ws, Duration::from_secs(5)).unwrap();
        supervisor.start_client(2, &ws, Duration::from_secs(5)).unwrap();

        let report = supervisor.drain().await;
        let roles: Vec<Role> = report.stopped.iter().map(|r| r.role).collect();
        assert_eq!(vec![Role::Client(1), Role::Client(2), Role::Server], roles);

        let server = report.get(Role::Server).unwrap();
        for client in report.stopped.iter().filter(|r| r.role != Role::Server) {
            assert!(client.finished_at <= server.requested_at);
        }
    }

    #[tokio::test]
    async fn early_exit_is_not_an_error() {
        let temp = TempDir::new().unwrap();
        let ws = workspace(&temp);
        let mut supervisor = supervisor(sleeper(), CommandSpec::new("true", Vec::<String>::new()));

        supervisor.start_server(&ws).unwrap();
        supervisor.start_client(1, &ws, Duration::from_secs(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let exited = supervisor.poll_exited();
        assert_eq!(1, exited.len());
        assert_eq!(Role::Client(1), exited[0].0);
        // Only reported once.
        assert!(supervisor.poll_exited().is_empty());

        let report = supervisor.drain().await;
        assert!(matches!(
            report.get(Role::Client(1)).unwrap().outcome,
            StopOutcome::AlreadyExited(_)
        ));
        assert!(matches!(
            report.get(Role::Server).unwrap().outcome,
            StopOutcome::Terminated(_)
        ));
    }

    #[tokio::test]
    async fn process_ignoring_sigterm_is_killed() {
        let temp = TempDir::new().unwrap();
        let ws = workspace(&temp);
        let stubborn = CommandSpec::new("sh", ["-c", "trap '' TERM; sleep 30"]);
        let mut supervisor =
            ProcessSupervisor::new(stubborn, sleeper(), Duration::from_millis(300));

        supervisor.start_server(&ws).unwrap();
        // Give the shell time to install the trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let report = supervisor.drain().await;
        assert_eq!(StopOutcome::Killed, report.get(Role::Server).unwrap().outcome);
    }

    #[tokio::test]
    async fn client_receives_duration_and_workspace_env() {
        let temp = TempDir::new().unwrap();
        let ws = workspace(&temp);
        let client = CommandSpec::new(
            "sh",
            ["-c", "echo \"$@\"; echo \"$NETEM_LAB_LOG_DIR\"; pwd", "client"],
        );
        let mut supervisor = supervisor(sleeper(), client);

        supervisor.start_client(1, &ws, Duration::from_secs(7)).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        supervisor.drain().await;

        let output = std::fs::read_to_string(ws.root().join("client_1.log")).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!("--duration 7", lines[0]);
        assert_eq!(ws.logs_dir().to_str().unwrap(), lines[1]);
        assert_eq!(ws.root().to_str().unwrap(), lines[2]);
    }

    #[test]
    fn missing_program_is_a_start_error() {
        let temp = TempDir::new().unwrap();
        let ws = workspace(&temp);
        let mut supervisor = supervisor(
            CommandSpec::new("netem-lab-no-such-server", Vec::<String>::new()),
            sleeper(),
        );

        let err = supervisor.start_server(&ws).unwrap_err();
        assert!(matches!(err, ProcessStartError::NotFound { .. }));
    }
}

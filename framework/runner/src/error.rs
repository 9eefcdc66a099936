use std::path::PathBuf;

/// The scenario identifier is not one of the known scenarios.
#[derive(Debug, thiserror::Error)]
#[error("Unknown scenario '{scenario}', expected one of: {expected}")]
pub struct UnknownScenarioError {
    pub scenario: String,
    pub expected: String,
}

/// A single `tc` invocation failed.
#[derive(Debug, thiserror::Error)]
pub enum TcCommandError {
    #[error("Failed to execute 'tc {command}': {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'tc {command}' exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
}

/// Installing the rules of a scenario failed part way through.
///
/// Rules before `rule_index` remain installed on the interface until the next clear.
#[derive(Debug, thiserror::Error)]
#[error("Failed to apply impairment rule {rule_index} on '{interface}'")]
pub struct ImpairmentApplyError {
    pub interface: String,
    pub rule_index: usize,
    #[source]
    pub source: TcCommandError,
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to create run workspace directory '{}'", path.display())]
pub struct WorkspaceCreateError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessStartError {
    #[error("Failed to open log file '{}' for {role}", path.display())]
    LogFile {
        role: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Program '{program}' for {role} could not be found")]
    NotFound {
        role: String,
        program: String,
        #[source]
        source: which::Error,
    },
    #[error("Failed to launch '{program}' for {role}")]
    Spawn {
        role: String,
        program: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
#[error("Command for {name} is empty")]
pub struct CommandSpecError {
    pub name: &'static str,
}

/// Problems with the configuration, detected before anything on the host is touched.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    UnknownScenario(#[from] UnknownScenarioError),
    #[error(transparent)]
    Command(#[from] CommandSpecError),
    #[error("Duration must be at least one second")]
    ZeroDuration,
    #[error("At least one client is required")]
    NoClients,
}

/// Errors that end a run before any shared host state was mutated.
///
/// Everything that can go wrong after this point is reported as a
/// [crate::run::RunOutcome] instead, because it always goes through teardown.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Workspace(#[from] WorkspaceCreateError),
}

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(about, long_about = None)]
pub struct NetemLabCli {
    /// The network impairment scenario to run.
    ///
    /// One of `baseline`, `loss5`, `delay100`, `delay_jitter` or `rate_limit`.
    #[arg(default_value = "baseline")]
    pub scenario: String,

    /// The number of seconds to run the workload for
    #[arg(long, env = "DURATION", default_value = "30")]
    pub duration: u64,

    /// The number of clients to start against the server
    #[arg(long, env = "CLIENTS", default_value = "2")]
    pub clients: usize,

    /// The network interface to apply the impairment to
    #[arg(long, env = "IFACE", default_value = "lo")]
    pub interface: String,

    /// The directory under which the run directory is created
    #[arg(long, env = "NETEM_LAB_OUTPUT_ROOT", default_value = ".")]
    pub output_root: PathBuf,

    /// The command that starts the server
    #[arg(long, env = "SERVER_CMD", default_value = "python3 server.py")]
    pub server_cmd: String,

    /// The command that starts a client. `--duration <seconds>` is appended to it.
    #[arg(long, env = "CLIENT_CMD", default_value = "python3 client.py")]
    pub client_cmd: String,

    /// The command that renders plots once the run is over. The logs and plots directories are
    /// appended to it.
    #[arg(long, env = "PLOT_CMD", default_value = "python3 plot_metrics.py")]
    pub plot_cmd: String,

    /// Run `tc` through `sudo`
    #[arg(long, env = "NETEM_LAB_SUDO", default_value = "false")]
    pub sudo: bool,

    /// Check for processes that exit before the end of the run window and log a warning.
    ///
    /// The run carries on either way, this only makes early exits visible while the run is in
    /// progress rather than at shutdown.
    #[arg(long, default_value = "false")]
    pub watch: bool,

    /// Do not show a progress bar on the CLI.
    ///
    /// This is recommended for CI/CD environments where the progress bar isn't being looked at by
    /// anyone and is just adding noise to the logs.
    #[arg(long, default_value = "false")]
    pub no_progress: bool,
}

/// The environment variables that configure a run, captured in the run summary when set.
pub const CONFIG_ENV_VARS: [&str; 8] = [
    "DURATION",
    "CLIENTS",
    "IFACE",
    "NETEM_LAB_OUTPUT_ROOT",
    "SERVER_CMD",
    "CLIENT_CMD",
    "PLOT_CMD",
    "NETEM_LAB_SUDO",
];

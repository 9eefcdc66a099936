mod cli;
mod definition;
mod error;
mod impairment;
mod init;
mod monitor;
mod plot;
mod progress;
mod run;
mod scenario;
mod shutdown;
mod supervisor;
mod types;
mod workspace;

pub mod test_util;

pub mod prelude {
    pub use crate::cli::{NetemLabCli, CONFIG_ENV_VARS};
    pub use crate::definition::{RunDefinition, RunDescriptor, RunTimings};
    pub use crate::error::{
        CommandSpecError, ConfigError, ImpairmentApplyError, ProcessStartError, RunError,
        TcCommandError, UnknownScenarioError, WorkspaceCreateError,
    };
    pub use crate::impairment::{
        ImpairmentController, ImpairmentGuard, SystemTrafficControl, TrafficControl,
    };
    pub use crate::init::init;
    pub use crate::plot::Plotter;
    pub use crate::run::{run, run_with, RunOutcome, RunReport, RunState};
    pub use crate::scenario::{
        resolve, ImpairmentRule, NetemParams, Qdisc, QdiscHandle, QdiscParent, Scenario,
        TbfParams,
    };
    pub use crate::shutdown::start_shutdown_listener;
    pub use crate::supervisor::{
        CommandSpec, DrainReport, ManagedProcess, ProcessSupervisor, Role, StopOutcome,
        StopRecord, LOG_DIR_ENV, PLOTS_DIR_ENV,
    };
    pub use crate::types::NetemLabResult;
    pub use crate::workspace::{Workspace, TIMESTAMP_FORMAT};

    pub use netem_lab_core::prelude::{ShutdownHandle, ShutdownReason};
}

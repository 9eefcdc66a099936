use std::fmt;
use std::time::Duration;

use anyhow::Context;
use chrono::Local;
use netem_lab_core::prelude::{ShutdownHandle, ShutdownReason, ShutdownSignalError};
use netem_lab_summary_model::{write_run_summary, ProcessSummary, RunStatus, RunSummary};

use crate::cli::CONFIG_ENV_VARS;
use crate::definition::{RunDefinition, RunDescriptor};
use crate::error::RunError;
use crate::impairment::{
    ImpairmentController, ImpairmentGuard, SystemTrafficControl, TrafficControl,
};
use crate::monitor::run_window;
use crate::plot::Plotter;
use crate::progress::RunProgress;
use crate::shutdown::start_shutdown_listener;
use crate::supervisor::{DrainReport, ProcessSupervisor};
use crate::types::NetemLabResult;
use crate::workspace::Workspace;

/// The stages a run moves through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    WorkspaceReady,
    ImpairmentApplied,
    ProcessesRunning,
    Draining,
    ReportGenerated,
    Cleaned,
}

/// How a run ended. Whatever the outcome, the processes were stopped and the interface cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Applying the impairment or starting a process failed.
    Aborted { reason: String },
    Interrupted { reason: ShutdownReason },
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::Aborted { reason } => write!(f, "aborted: {reason}"),
            RunOutcome::Interrupted { reason } => write!(f, "interrupted by {reason}"),
        }
    }
}

impl From<&RunOutcome> for RunStatus {
    fn from(outcome: &RunOutcome) -> Self {
        match outcome {
            RunOutcome::Completed => RunStatus::Completed,
            RunOutcome::Aborted { reason } => RunStatus::Aborted {
                reason: reason.clone(),
            },
            RunOutcome::Interrupted { reason } => RunStatus::Interrupted {
                reason: reason.to_string(),
            },
        }
    }
}

/// What happened during a run that got as far as creating its workspace.
#[derive(Debug)]
pub struct RunReport {
    pub descriptor: RunDescriptor,
    pub workspace: Workspace,
    pub outcome: RunOutcome,
    pub drain: DrainReport,
    /// Every state the run passed through, starting with [RunState::Idle].
    pub states: Vec<RunState>,
}

/// Run one experiment against the host's network stack.
///
/// Creates the runtime and turns SIGINT and SIGTERM into an interrupted run.
pub fn run(definition: RunDefinition) -> NetemLabResult<RunReport> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let shutdown_handle = start_shutdown_listener(&runtime)?;
    let controller = ImpairmentController::new(SystemTrafficControl::new(definition.sudo));

    let report = runtime.block_on(run_with(&definition, &controller, &shutdown_handle))?;
    Ok(report)
}

/// Run one experiment with the given traffic control backend.
///
/// Returns an error only if the run could not start, in which case nothing on the host was
/// changed. Once the workspace exists every failure becomes part of the [RunOutcome], and the
/// processes are stopped and the interface cleared before this returns.
pub async fn run_with<T: TrafficControl>(
    definition: &RunDefinition,
    controller: &ImpairmentController<T>,
    shutdown: &ShutdownHandle,
) -> Result<RunReport, RunError> {
    // Subscribe before anything else so an early signal is not missed.
    let mut shutdown_listener = shutdown.new_listener();
    let mut states = vec![RunState::Idle];

    let descriptor = definition.describe(Local::now());
    log::info!(
        "Running scenario '{}' on '{}' for {}s with {} clients",
        descriptor.scenario(),
        descriptor.interface(),
        descriptor.duration().as_secs(),
        descriptor.client_count()
    );

    let workspace = Workspace::create(descriptor.workspace_path())?;
    transition(&mut states, RunState::WorkspaceReady);

    let guard = controller.guard(descriptor.interface());
    let mut supervisor = ProcessSupervisor::new(
        definition.server_cmd.clone(),
        definition.client_cmd.clone(),
        definition.timings.stop_grace,
    );

    let outcome = tokio::select! {
        biased;

        reason = shutdown_listener.wait_for_shutdown() => {
            log::warn!("{}", ShutdownSignalError::new(reason));
            RunOutcome::Interrupted { reason }
        }
        result = start_and_wait(
            definition,
            &descriptor,
            &workspace,
            &guard,
            &mut supervisor,
            &mut states,
        ) => {
            match result {
                Ok(()) => RunOutcome::Completed,
                Err(reason) => {
                    log::error!("Run aborted: {reason}");
                    RunOutcome::Aborted { reason }
                }
            }
        }
    };

    transition(&mut states, RunState::Draining);
    let drain = supervisor.drain().await;

    // A signal during the drain is picked up here and skips plotting.
    let outcome = if outcome.is_completed() {
        let plotter = Plotter::new(definition.plot_cmd.clone());
        tokio::select! {
            biased;

            reason = shutdown_listener.wait_for_shutdown() => {
                log::warn!("{}, plotting cancelled", ShutdownSignalError::new(reason));
                RunOutcome::Interrupted { reason }
            }
            () = flush_and_plot(&plotter, &workspace, definition.timings.flush) => {
                RunOutcome::Completed
            }
        }
    } else {
        log::info!("Skipping plotting for a run that did not complete");
        outcome
    };

    let summary = summarize(&descriptor, &outcome, &drain);
    match write_run_summary(&summary, &workspace.summary_path()) {
        Ok(()) => log::info!(
            "Run summary written to '{}'",
            workspace.summary_path().display()
        ),
        Err(e) => log::error!("Failed to write run summary: {e:?}"),
    }
    transition(&mut states, RunState::ReportGenerated);

    guard.release();
    transition(&mut states, RunState::Cleaned);

    log::info!("Run '{}' {outcome}", workspace.root().display());

    Ok(RunReport {
        descriptor,
        workspace,
        outcome,
        drain,
        states,
    })
}

/// Everything from applying the impairment to the end of the run window.
///
/// Dropped part way through when the run is interrupted, so it must leave all cleanup to the
/// caller.
async fn start_and_wait<T: TrafficControl>(
    definition: &RunDefinition,
    descriptor: &RunDescriptor,
    workspace: &Workspace,
    guard: &ImpairmentGuard<'_, T>,
    supervisor: &mut ProcessSupervisor,
    states: &mut Vec<RunState>,
) -> Result<(), String> {
    let timings = &definition.timings;

    guard.apply(descriptor.rules()).map_err(abort_reason)?;
    transition(states, RunState::ImpairmentApplied);

    supervisor.start_server(workspace).map_err(abort_reason)?;
    // Give the server time to bind before the first client connects.
    tokio::time::sleep(timings.settle).await;

    for index in 1..=descriptor.client_count() {
        if index > 1 {
            tokio::time::sleep(timings.stagger).await;
        }
        supervisor
            .start_client(index, workspace, descriptor.duration())
            .map_err(abort_reason)?;
    }
    transition(states, RunState::ProcessesRunning);

    let progress = (!definition.no_progress).then(|| RunProgress::start(descriptor.duration()));
    run_window(
        supervisor,
        descriptor.duration(),
        timings.watch_interval,
        progress,
    )
    .await;

    Ok(())
}

/// Dropping this future kills the plotting process.
async fn flush_and_plot(plotter: &Plotter, workspace: &Workspace, flush: Duration) {
    tokio::time::sleep(flush).await;
    if let Err(e) = plotter.run(workspace).await {
        log::warn!("Plotting failed: {e:?}");
    }
}

fn abort_reason<E>(e: E) -> String
where
    E: std::error::Error + Send + Sync + 'static,
{
    format!("{:#}", anyhow::Error::from(e))
}

fn transition(states: &mut Vec<RunState>, next: RunState) {
    log::debug!(
        "Run state {:?} -> {next:?}",
        states.last().copied().unwrap_or(RunState::Idle)
    );
    states.push(next);
}

fn summarize(descriptor: &RunDescriptor, outcome: &RunOutcome, drain: &DrainReport) -> RunSummary {
    let mut summary = RunSummary::new(
        descriptor.run_id().to_string(),
        descriptor.scenario().to_string(),
        descriptor.started_at().timestamp(),
        descriptor.duration().as_secs(),
        descriptor.client_count(),
        descriptor.interface().to_string(),
        descriptor
            .rules()
            .iter()
            .map(|rule| rule.describe(descriptor.interface()))
            .collect(),
        env!("CARGO_PKG_VERSION").to_string(),
    );
    summary.set_outcome(outcome.into());

    for record in &drain.stopped {
        summary.add_process(ProcessSummary {
            role: record.role.to_string(),
            log_file: record
                .log_path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default(),
            stop: record.outcome.to_string(),
        });
    }

    for key in CONFIG_ENV_VARS {
        if let Ok(value) = std::env::var(key) {
            summary.add_env(key.to_string(), value);
        }
    }

    summary
}

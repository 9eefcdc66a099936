use std::time::Duration;

use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};

use crate::progress::RunProgress;
use crate::supervisor::ProcessSupervisor;

const PROGRESS_TICK: Duration = Duration::from_secs(1);

/// Wait out the run window.
///
/// The wait is unconditional. Processes that exit early are only reported, when `watch_interval`
/// is set, and never end the window.
pub(crate) async fn run_window(
    supervisor: &mut ProcessSupervisor,
    duration: Duration,
    watch_interval: Option<Duration>,
    progress: Option<RunProgress>,
) {
    let start = Instant::now();
    let deadline = start + duration;
    let tick_every = watch_interval.unwrap_or(PROGRESS_TICK);
    let mut ticker = interval_at(start + tick_every, tick_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = sleep_until(deadline) => break,
            _ = ticker.tick() => {
                if let Some(progress) = &progress {
                    progress.update(start.elapsed());
                }
                if watch_interval.is_some() {
                    report_early_exits(supervisor);
                }
            }
        }
    }

    if watch_interval.is_some() {
        report_early_exits(supervisor);
    }
}

fn report_early_exits(supervisor: &mut ProcessSupervisor) {
    for (role, status) in supervisor.poll_exited() {
        log::warn!("{role} exited before the end of the run window: {status}");
    }
}

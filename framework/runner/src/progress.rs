use std::cmp::min;
use std::fmt::Write;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressState, ProgressStyle};

/// Progress bar for the run window, so the user can see how long is left.
pub(crate) struct RunProgress {
    bar: ProgressBar,
    planned_runtime: Duration,
}

impl RunProgress {
    pub(crate) fn start(planned_runtime: Duration) -> Self {
        let bar = ProgressBar::new(planned_runtime.as_secs());

        let hours = planned_runtime.as_secs() / 3600;
        let minutes = (planned_runtime.as_secs() % 3600) / 60;
        let seconds = planned_runtime.as_secs() % 60;
        match ProgressStyle::with_template(
            "{spinner:.green} [{wide_bar:.cyan/blue}] [{elapsed_precise} / {planned_runtime}]",
        ) {
            Ok(style) => bar.set_style(
                style
                    .with_key(
                        "planned_runtime",
                        move |_state: &ProgressState, w: &mut dyn Write| {
                            write!(w, "{hours:02}:{minutes:02}:{seconds:02}")
                                .expect("Could not write planned_runtime")
                        },
                    )
                    .progress_chars("#>-"),
            ),
            Err(e) => log::debug!("Using the default progress style: {e}"),
        }

        Self {
            bar,
            planned_runtime,
        }
    }

    pub(crate) fn update(&self, elapsed: Duration) {
        self.bar
            .set_position(min(elapsed.as_secs(), self.planned_runtime.as_secs()));
    }
}

impl Drop for RunProgress {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}

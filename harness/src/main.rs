use std::process::ExitCode;

use netem_lab_runner::prelude::*;

fn main() -> ExitCode {
    let cli = init();

    let definition = match RunDefinition::from_cli(cli) {
        Ok(definition) => definition,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // Failed impairment, process start or plotting still count as a run, they are reported in the
    // logs and the run summary.
    match run(definition) {
        Ok(report) => {
            log::info!(
                "Outputs for run {} are in '{}'",
                report.descriptor.run_id(),
                report.workspace.root().display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

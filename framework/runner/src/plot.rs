use anyhow::Context;

use crate::supervisor::CommandSpec;
use crate::types::NetemLabResult;
use crate::workspace::Workspace;

/// The external plotting step, run once after the processes have been stopped.
#[derive(Debug, Clone)]
pub struct Plotter {
    command: CommandSpec,
}

impl Plotter {
    pub fn new(command: CommandSpec) -> Self {
        Self { command }
    }

    /// Run the plotting command with the workspace's logs and plots directories appended, and
    /// wait for it to finish.
    pub async fn run(&self, workspace: &Workspace) -> NetemLabResult<()> {
        let mut process = self
            .command
            .command("plotting", workspace.root())?
            .arg(workspace.logs_dir())
            .arg(workspace.plots_dir())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to launch plotting command '{}'", self.command))?;

        log::debug!("Running plotting with PID: {:?}", process.id());
        let status = process
            .wait()
            .await
            .context("Failed to wait for plotting command")?;
        log::debug!("Plotting process finished with status: {status}");

        if status.success() {
            log::info!("Plots written to '{}'", workspace.plots_dir().display());
            Ok(())
        } else {
            Err(anyhow::anyhow!("Plotting process failed with status: {status}"))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace(temp: &TempDir) -> Workspace {
        Workspace::create(&temp.path().join("run")).unwrap()
    }

    #[tokio::test]
    async fn writes_into_plots_dir() {
        let temp = TempDir::new().unwrap();
        let ws = workspace(&temp);
        let plotter = Plotter::new(CommandSpec::new(
            "sh",
            ["-c", "test -d \"$1\" && touch \"$2/plot.png\"", "plot"],
        ));

        plotter.run(&ws).await.unwrap();
        assert!(ws.plots_dir().join("plot.png").is_file());
    }

    #[tokio::test]
    async fn failing_command_is_an_error() {
        let temp = TempDir::new().unwrap();
        let ws = workspace(&temp);
        let plotter = Plotter::new(CommandSpec::new("false", Vec::<String>::new()));

        let err = plotter.run(&ws).await.unwrap_err();
        assert!(err.to_string().contains("failed with status"));
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let temp = TempDir::new().unwrap();
        let ws = workspace(&temp);
        let plotter = Plotter::new(CommandSpec::new(
            "netem-lab-no-such-plotter",
            Vec::<String>::new(),
        ));

        assert!(plotter.run(&ws).await.is_err());
    }
}

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};

use crate::error::WorkspaceCreateError;
use crate::scenario::Scenario;

/// Format of the timestamp in a run directory name, second resolution.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// The output directory tree of a single run.
///
/// - `root` holds the process logs and the run summary
/// - `logs` is where the server and clients write their structured data
/// - `plots` is where the plotting step writes its output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
    logs: PathBuf,
    plots: PathBuf,
}

impl Workspace {
    /// The directory name for a run of `scenario` started at `now`.
    pub fn dir_name<Tz: TimeZone>(scenario: Scenario, now: &DateTime<Tz>) -> String
    where
        Tz::Offset: std::fmt::Display,
    {
        format!("{scenario}_{}", now.format(TIMESTAMP_FORMAT))
    }

    /// Create the directory tree for a run at `root`.
    ///
    /// Missing parents of `root` are created. The run directory itself must not exist yet, so two
    /// runs of the same scenario in the same second fail here instead of sharing a directory.
    pub fn create(root: &Path) -> Result<Self, WorkspaceCreateError> {
        if let Some(output_root) = root.parent() {
            fs::create_dir_all(output_root).map_err(|source| WorkspaceCreateError {
                path: output_root.to_path_buf(),
                source,
            })?;
        }

        fs::create_dir(root).map_err(|source| WorkspaceCreateError {
            path: root.to_path_buf(),
            source,
        })?;
        // Processes run with the root as their working directory, so hand out absolute paths.
        let root = root.canonicalize().map_err(|source| WorkspaceCreateError {
            path: root.to_path_buf(),
            source,
        })?;

        let workspace = Self {
            logs: root.join("logs"),
            plots: root.join("plots"),
            root,
        };
        for dir in [&workspace.logs, &workspace.plots] {
            fs::create_dir(dir).map_err(|source| WorkspaceCreateError {
                path: dir.clone(),
                source,
            })?;
        }

        log::info!("Created run workspace '{}'", workspace.root.display());

        Ok(workspace)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs
    }

    pub fn plots_dir(&self) -> &Path {
        &self.plots
    }

    pub fn summary_path(&self) -> PathBuf {
        self.root.join("run_summary.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn create(
        output_root: &Path,
        scenario: Scenario,
        secs: i64,
    ) -> Result<Workspace, WorkspaceCreateError> {
        Workspace::create(&output_root.join(Workspace::dir_name(scenario, &at(secs))))
    }

    #[test]
    fn dir_name_uses_scenario_and_second_timestamp() {
        // 2023-11-14 22:13:20 UTC
        assert_eq!(
            "loss5_20231114_221320",
            Workspace::dir_name(Scenario::Loss5, &at(1_700_000_000))
        );
    }

    #[test]
    fn creates_root_logs_and_plots() {
        let temp = TempDir::new().unwrap();
        let ws = create(temp.path(), Scenario::RateLimit, 1_700_000_000).unwrap();

        assert_eq!(
            temp.path().canonicalize().unwrap().join("rate_limit_20231114_221320"),
            ws.root()
        );
        assert!(ws.root().is_dir());
        assert!(ws.logs_dir().is_dir());
        assert!(ws.plots_dir().is_dir());
        assert_eq!(ws.root().join("run_summary.json"), ws.summary_path());
    }

    #[test]
    fn creates_missing_output_root() {
        let temp = TempDir::new().unwrap();
        let output_root = temp.path().join("runs").join("nested");
        let ws = create(&output_root, Scenario::Baseline, 0).unwrap();
        assert!(ws.logs_dir().is_dir());
    }

    #[test]
    fn different_scenarios_in_same_second_do_not_collide() {
        let temp = TempDir::new().unwrap();
        let a = create(temp.path(), Scenario::Loss5, 10).unwrap();
        let b = create(temp.path(), Scenario::Delay100, 10).unwrap();
        assert_ne!(a.root(), b.root());
    }

    #[test]
    fn same_scenario_in_same_second_is_an_error() {
        let temp = TempDir::new().unwrap();
        create(temp.path(), Scenario::Loss5, 10).unwrap();
        let err = create(temp.path(), Scenario::Loss5, 10).unwrap_err();
        assert_eq!(std::io::ErrorKind::AlreadyExists, err.source.kind());
    }

    #[test]
    fn unusable_output_root_is_an_error() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("not_a_dir");
        std::fs::write(&file, "x").unwrap();

        let err = create(&file, Scenario::Baseline, 0).unwrap_err();
        assert_eq!(file, err.path);
    }
}

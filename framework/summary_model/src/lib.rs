use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sha3::Digest;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

/// How a run ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// The full run window elapsed and the processes were drained.
    Completed,
    /// Setup failed after the workspace existed, for example a `tc` command or a process launch.
    Aborted { reason: String },
    /// An operator signal cut the run short.
    Interrupted { reason: String },
}

/// How one supervised process was stopped during the drain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessSummary {
    /// `server` or `client-<index>`
    pub role: String,
    /// Log file name relative to the run directory
    pub log_file: String,
    /// Human readable stop outcome, e.g. `terminated (exit status: 0)` or `already exited`
    pub stop: String,
}

/// Summary of a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    /// The unique run id
    ///
    /// Chosen by the runner. Unique for each run, independent of the directory name.
    pub run_id: String,
    /// The name of the scenario that was run
    pub scenario_name: String,
    /// The time the run started
    ///
    /// This is a Unix timestamp in seconds.
    pub started_at: i64,
    /// The configured length of the run window, in seconds
    pub run_duration: u64,
    /// The number of clients started against the server
    pub client_count: usize,
    /// The network interface the impairment was applied to
    pub interface: String,
    /// The `tc` commands that make up the scenario, in application order
    pub impairment: Vec<String>,
    /// How the run ended
    pub outcome: RunStatus,
    /// One entry per supervised process, in the order they were stopped
    pub processes: Vec<ProcessSummary>,
    /// Environment variables set for the run
    ///
    /// Only the variables the harness reads for its configuration are captured.
    pub env: HashMap<String, String>,
    /// The version of netem-lab that produced this run
    pub netem_lab_version: String,
}

impl RunSummary {
    /// Create a new run summary for a run that has not finished yet.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_id: String,
        scenario_name: String,
        started_at: i64,
        run_duration: u64,
        client_count: usize,
        interface: String,
        impairment: Vec<String>,
        netem_lab_version: String,
    ) -> Self {
        Self {
            run_id,
            scenario_name,
            started_at,
            run_duration,
            client_count,
            interface,
            impairment,
            outcome: RunStatus::Completed,
            processes: Vec::new(),
            env: HashMap::with_capacity(0),
            netem_lab_version,
        }
    }

    pub fn set_outcome(&mut self, outcome: RunStatus) {
        self.outcome = outcome;
    }

    pub fn add_process(&mut self, process: ProcessSummary) {
        self.processes.push(process);
    }

    /// Add an environment variable
    pub fn add_env(&mut self, key: String, value: String) {
        self.env.insert(key, value);
    }

    /// Compute a fingerprint for this run summary
    ///
    /// The fingerprint identifies the configuration of the run, so two runs with the same
    /// fingerprint are directly comparable. It uses the
    ///     - Scenario name
    ///     - Run duration
    ///     - Client count
    ///     - Interface
    ///     - Impairment commands
    ///     - Selected environment variables
    ///     - netem-lab version
    ///
    /// The fingerprint is computed using [sha3::Sha3_256].
    pub fn fingerprint(&self) -> String {
        let mut hasher = sha3::Sha3_256::new();
        Digest::update(&mut hasher, self.scenario_name.as_bytes());
        Digest::update(&mut hasher, self.run_duration.to_le_bytes());
        Digest::update(&mut hasher, (self.client_count as u64).to_le_bytes());
        Digest::update(&mut hasher, self.interface.as_bytes());
        self.impairment.iter().for_each(|command| {
            Digest::update(&mut hasher, command.as_bytes());
        });
        self.env
            .iter()
            .sorted_by_key(|(k, _)| k.to_owned())
            .for_each(|(k, v)| {
                Digest::update(&mut hasher, k.as_bytes());
                Digest::update(&mut hasher, v.as_bytes());
            });
        Digest::update(&mut hasher, self.netem_lab_version.as_bytes());

        format!("{:x}", hasher.finalize())
    }
}

#[derive(Serialize)]
struct StoredSummary<'a> {
    #[serde(flatten)]
    summary: &'a RunSummary,
    fingerprint: String,
}

/// Write the run summary, with its fingerprint, to `path` as pretty printed JSON.
///
/// Any existing file at `path` is replaced.
pub fn write_run_summary(run_summary: &RunSummary, path: &Path) -> anyhow::Result<()> {
    let mut file = std::fs::File::create(path)?;
    store_run_summary(run_summary, &mut file)?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Serialize the run summary to a writer
pub fn store_run_summary<W: Write>(run_summary: &RunSummary, writer: &mut W) -> anyhow::Result<()> {
    let stored = StoredSummary {
        summary: run_summary,
        fingerprint: run_summary.fingerprint(),
    };
    serde_json::to_writer_pretty(writer, &stored)?;
    Ok(())
}

/// Load a run summary from a reader
///
/// The stored fingerprint is ignored, call [RunSummary::fingerprint] to recompute it.
pub fn load_run_summary<R: Read>(reader: R) -> anyhow::Result<RunSummary> {
    let reader = std::io::BufReader::new(reader);
    let run_summary: RunSummary = serde_json::from_reader(reader)?;
    Ok(run_summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> RunSummary {
        RunSummary::new(
            "abc".to_string(),
            "rate_limit".to_string(),
            1_700_000_000,
            30,
            2,
            "lo".to_string(),
            vec![
                "qdisc add dev lo root handle 1: tbf rate 2mbit burst 32k latency 400ms"
                    .to_string(),
                "qdisc add dev lo parent 1:1 handle 10: netem delay 50ms".to_string(),
            ],
            "0.1.0".to_string(),
        )
    }

    #[test]
    fn fingerprint_ignores_run_identity() {
        let a = sample();
        let mut b = sample();
        b.run_id = "other".to_string();
        b.started_at += 60;
        b.set_outcome(RunStatus::Interrupted {
            reason: "SIGINT".to_string(),
        });

        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_changes_with_configuration() {
        let a = sample();
        let mut b = sample();
        b.client_count = 3;
        assert_ne!(a.fingerprint(), b.fingerprint());

        let mut c = sample();
        c.add_env("IFACE".to_string(), "eth0".to_string());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn fingerprint_is_independent_of_env_insertion_order() {
        let mut a = sample();
        a.add_env("DURATION".to_string(), "5".to_string());
        a.add_env("CLIENTS".to_string(), "2".to_string());

        let mut b = sample();
        b.add_env("CLIENTS".to_string(), "2".to_string());
        b.add_env("DURATION".to_string(), "5".to_string());

        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn stored_summary_loads_back() {
        let mut summary = sample();
        summary.set_outcome(RunStatus::Aborted {
            reason: "tc failed".to_string(),
        });
        summary.add_process(ProcessSummary {
            role: "server".to_string(),
            log_file: "server.log".to_string(),
            stop: "already exited".to_string(),
        });

        let mut buf = Vec::new();
        store_run_summary(&summary, &mut buf).unwrap();

        let json: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(json["fingerprint"], summary.fingerprint());
        assert_eq!(json["outcome"]["status"], "aborted");

        let loaded = load_run_summary(buf.as_slice()).unwrap();
        assert_eq!(summary, loaded);
    }
}

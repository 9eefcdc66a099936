//! An in-memory stand-in for `tc`, so that impairment handling can be exercised without root.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::TcCommandError;
use crate::impairment::TrafficControl;

/// A qdisc as recorded by [QdiscTable].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledQdisc {
    /// `root` or the parent class, e.g. `1:1`
    pub parent: String,
    pub handle: Option<String>,
    pub kind: String,
    pub params: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    interfaces: HashMap<String, Vec<InstalledQdisc>>,
    commands: Vec<String>,
    fail_kinds: Vec<String>,
}

/// Models the qdisc tree of each interface the way the kernel reports conflicts.
///
/// Adding a second root qdisc fails with "File exists", deleting the root of a clean interface
/// fails, a child needs an installed parent, and deleting the root removes every child.
#[derive(Debug, Default)]
pub struct QdiscTable {
    state: Mutex<State>,
}

impl QdiscTable {
    /// Make every `qdisc add` of this kind fail.
    pub fn fail_on_kind(&self, kind: &str) {
        self.state.lock().fail_kinds.push(kind.to_string());
    }

    pub fn installed(&self, interface: &str) -> Vec<InstalledQdisc> {
        self.state
            .lock()
            .interfaces
            .get(interface)
            .cloned()
            .unwrap_or_default()
    }

    /// Every command received, successful or not, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }
}

fn failed(command: &str, stderr: &str) -> TcCommandError {
    TcCommandError::Failed {
        command: command.to_string(),
        status: "exit status: 2".to_string(),
        stderr: stderr.to_string(),
    }
}

impl TrafficControl for QdiscTable {
    fn exec(&self, args: &[String]) -> Result<(), TcCommandError> {
        let command = args.join(" ");
        let mut state = self.state.lock();
        state.commands.push(command.clone());

        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["qdisc", "del", "dev", interface, "root"] => {
                match state.interfaces.get_mut(*interface) {
                    Some(installed) if !installed.is_empty() => {
                        installed.clear();
                        Ok(())
                    }
                    _ => Err(failed(
                        &command,
                        "Error: Cannot delete qdisc with handle of zero.",
                    )),
                }
            }
            ["qdisc", "add", "dev", interface, rest @ ..] => {
                let (parent, rest) = match rest {
                    ["root", rest @ ..] => ("root".to_string(), rest),
                    ["parent", parent, rest @ ..] => (parent.to_string(), rest),
                    _ => return Err(failed(&command, "Error: missing parent")),
                };
                let (handle, rest) = match rest {
                    ["handle", handle, rest @ ..] => (Some(handle.to_string()), rest),
                    _ => (None, rest),
                };
                let (kind, params) = match rest {
                    [kind, params @ ..] => (kind.to_string(), params),
                    [] => return Err(failed(&command, "Error: missing qdisc kind")),
                };

                if state.fail_kinds.contains(&kind) {
                    return Err(failed(&command, "Error: Specified qdisc kind is unknown."));
                }

                let installed = state.interfaces.entry(interface.to_string()).or_default();
                if installed.iter().any(|q| q.parent == parent) {
                    return Err(failed(&command, "RTNETLINK answers: File exists"));
                }
                if parent != "root" {
                    let parent_major = parent.split(':').next().unwrap_or_default();
                    let has_parent = installed.iter().any(|q| {
                        q.handle
                            .as_deref()
                            .and_then(|h| h.split(':').next())
                            .is_some_and(|major| major == parent_major)
                    });
                    if !has_parent {
                        return Err(failed(&command, "Error: Failed to find specified qdisc."));
                    }
                }

                installed.push(InstalledQdisc {
                    parent,
                    handle,
                    kind,
                    params: params.iter().map(|p| p.to_string()).collect(),
                });
                Ok(())
            }
            _ => Err(failed(&command, "Error: unsupported command")),
        }
    }
}

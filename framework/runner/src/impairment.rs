//! Applies and removes `tc` qdisc rules on a network interface.
//!
//! This is the only part of the runner that mutates host-wide network state. Application always
//! starts from a clean interface so a run can follow an earlier run that was never torn down.

use std::process::Command;
use std::sync::Arc;

use crate::error::{ImpairmentApplyError, TcCommandError};
use crate::scenario::ImpairmentRule;

/// Executes a single `tc` invocation.
pub trait TrafficControl: Send + Sync {
    fn exec(&self, args: &[String]) -> Result<(), TcCommandError>;
}

impl<T: TrafficControl + ?Sized> TrafficControl for Arc<T> {
    fn exec(&self, args: &[String]) -> Result<(), TcCommandError> {
        (**self).exec(args)
    }
}

/// Runs the host's `tc` binary, optionally through `sudo`.
#[derive(Debug, Clone, Default)]
pub struct SystemTrafficControl {
    sudo: bool,
}

impl SystemTrafficControl {
    pub fn new(sudo: bool) -> Self {
        Self { sudo }
    }
}

impl TrafficControl for SystemTrafficControl {
    fn exec(&self, args: &[String]) -> Result<(), TcCommandError> {
        let command = args.join(" ");
        let mut cmd = if self.sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg("tc");
            cmd
        } else {
            Command::new("tc")
        };

        log::trace!("Running 'tc {command}'");
        let output = cmd.args(args).output().map_err(|source| TcCommandError::Io {
            command: command.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(TcCommandError::Failed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

/// Drives the qdisc configuration of one interface at a time.
#[derive(Debug, Clone)]
pub struct ImpairmentController<T: TrafficControl> {
    tc: T,
}

impl<T: TrafficControl> ImpairmentController<T> {
    pub fn new(tc: T) -> Self {
        Self { tc }
    }

    /// Clear the interface and then install `rules` in order.
    ///
    /// If a rule fails, the rules before it stay installed and the error is returned. Call
    /// [ImpairmentController::clear], or let an [ImpairmentGuard] do it, to remove them.
    pub fn apply(
        &self,
        interface: &str,
        rules: &[ImpairmentRule],
    ) -> Result<(), ImpairmentApplyError> {
        self.clear(interface);

        if rules.is_empty() {
            log::info!("No impairment rules to apply on '{interface}'");
            return Ok(());
        }

        for (rule_index, rule) in rules.iter().enumerate() {
            let args = rule.tc_args(interface);
            log::info!("Applying impairment: tc {}", args.join(" "));
            self.tc
                .exec(&args)
                .map_err(|source| ImpairmentApplyError {
                    interface: interface.to_string(),
                    rule_index,
                    source,
                })?;
        }

        Ok(())
    }

    /// Remove every rule from the interface by deleting its root qdisc.
    ///
    /// Never fails. Deleting from an interface that has no rules is reported by `tc` as an error,
    /// which is expected and only logged.
    pub fn clear(&self, interface: &str) {
        let args: Vec<String> = vec![
            "qdisc".into(),
            "del".into(),
            "dev".into(),
            interface.into(),
            "root".into(),
        ];
        match self.tc.exec(&args) {
            Ok(()) => log::info!("Cleared impairment on '{interface}'"),
            Err(e) => log::debug!("Nothing to clear on '{interface}': {e}"),
        }
    }

    /// Take responsibility for clearing `interface` once the returned guard is released or
    /// dropped.
    pub fn guard(&self, interface: impl Into<String>) -> ImpairmentGuard<'_, T> {
        ImpairmentGuard {
            controller: self,
            interface: interface.into(),
            released: false,
        }
    }
}

/// Clears the interface when released or dropped.
///
/// Create this before the first change to the interface. Dropping covers early returns, panics
/// and the cancellation of a future that owns or borrows the guard.
#[derive(Debug)]
pub struct ImpairmentGuard<'a, T: TrafficControl> {
    controller: &'a ImpairmentController<T>,
    interface: String,
    released: bool,
}

impl<T: TrafficControl> ImpairmentGuard<'_, T> {
    pub fn apply(&self, rules: &[ImpairmentRule]) -> Result<(), ImpairmentApplyError> {
        self.controller.apply(&self.interface, rules)
    }

    /// Clear the interface now.
    pub fn release(mut self) {
        self.clear_once();
    }

    fn clear_once(&mut self) {
        if !self.released {
            self.released = true;
            self.controller.clear(&self.interface);
        }
    }
}

impl<T: TrafficControl> Drop for ImpairmentGuard<'_, T> {
    fn drop(&mut self) {
        if !self.released {
            log::warn!(
                "Impairment guard for '{}' dropped without release, clearing",
                self.interface
            );
        }
        self.clear_once();
    }
}

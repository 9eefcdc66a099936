//! The fixed set of scenarios and the `tc` rules that implement each of them.

use std::{fmt, str::FromStr};

use crate::error::UnknownScenarioError;

/// A named network impairment profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scenario {
    Baseline,
    Loss5,
    Delay100,
    DelayJitter,
    RateLimit,
}

impl Scenario {
    pub const ALL: [Scenario; 5] = [
        Scenario::Baseline,
        Scenario::Loss5,
        Scenario::Delay100,
        Scenario::DelayJitter,
        Scenario::RateLimit,
    ];

    /// The rules to install for this scenario, parents before children.
    pub fn rules(&self) -> Vec<ImpairmentRule> {
        match self {
            Scenario::Baseline => Vec::new(),
            Scenario::Loss5 => vec![ImpairmentRule::root(Qdisc::Netem(NetemParams {
                loss_percent: Some(5.0),
                ..Default::default()
            }))],
            Scenario::Delay100 => vec![ImpairmentRule::root(Qdisc::Netem(NetemParams {
                delay_ms: Some(100),
                ..Default::default()
            }))],
            Scenario::DelayJitter => vec![ImpairmentRule::root(Qdisc::Netem(NetemParams {
                delay_ms: Some(100),
                jitter_ms: Some(10),
                ..Default::default()
            }))],
            Scenario::RateLimit => {
                let tbf_handle = QdiscHandle::new(1);
                vec![
                    ImpairmentRule::root(Qdisc::TokenBucket(TbfParams {
                        rate_kbit: 2_000,
                        burst_kb: 32,
                        latency_ms: 400,
                    }))
                    .with_handle(tbf_handle),
                    // Own handle so further children under 1:1 stay addressable.
                    ImpairmentRule::child_of(
                        tbf_handle.class(1),
                        Qdisc::Netem(NetemParams {
                            delay_ms: Some(50),
                            ..Default::default()
                        }),
                    )
                    .with_handle(QdiscHandle::new(10)),
                ]
            }
        }
    }
}

impl FromStr for Scenario {
    type Err = UnknownScenarioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "baseline" => Ok(Scenario::Baseline),
            "loss5" => Ok(Scenario::Loss5),
            "delay100" => Ok(Scenario::Delay100),
            "delay_jitter" => Ok(Scenario::DelayJitter),
            "rate_limit" => Ok(Scenario::RateLimit),
            _ => Err(UnknownScenarioError {
                scenario: s.to_string(),
                expected: Scenario::ALL
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scenario::Baseline => write!(f, "baseline"),
            Scenario::Loss5 => write!(f, "loss5"),
            Scenario::Delay100 => write!(f, "delay100"),
            Scenario::DelayJitter => write!(f, "delay_jitter"),
            Scenario::RateLimit => write!(f, "rate_limit"),
        }
    }
}

/// Look up the ordered rule list for a scenario identifier.
pub fn resolve(scenario_id: &str) -> Result<Vec<ImpairmentRule>, UnknownScenarioError> {
    Ok(scenario_id.parse::<Scenario>()?.rules())
}

/// A qdisc or class handle in `major:minor` form. A qdisc handle has no minor part (`1:`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QdiscHandle {
    pub major: u16,
    pub minor: Option<u16>,
}

impl QdiscHandle {
    pub fn new(major: u16) -> Self {
        Self { major, minor: None }
    }

    /// The class `major:minor` belonging to this qdisc.
    pub fn class(&self, minor: u16) -> Self {
        Self {
            major: self.major,
            minor: Some(minor),
        }
    }
}

impl fmt::Display for QdiscHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.minor {
            Some(minor) => write!(f, "{}:{}", self.major, minor),
            None => write!(f, "{}:", self.major),
        }
    }
}

/// Where a rule attaches in the qdisc tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QdiscParent {
    Root,
    Class(QdiscHandle),
}

/// Parameters for `tc ... netem`. Only the `Some` fields are passed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetemParams {
    pub delay_ms: Option<u32>,
    /// Only used together with `delay_ms`.
    pub jitter_ms: Option<u32>,
    pub loss_percent: Option<f32>,
}

/// Parameters for `tc ... tbf`.
#[derive(Debug, Clone, PartialEq)]
pub struct TbfParams {
    pub rate_kbit: u64,
    pub burst_kb: u32,
    pub latency_ms: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Qdisc {
    Netem(NetemParams),
    TokenBucket(TbfParams),
}

impl Qdisc {
    /// The qdisc kind as `tc` names it.
    pub fn kind(&self) -> &'static str {
        match self {
            Qdisc::Netem(_) => "netem",
            Qdisc::TokenBucket(_) => "tbf",
        }
    }

    fn append_params(&self, args: &mut Vec<String>) {
        match self {
            Qdisc::Netem(netem) => {
                if let Some(delay) = netem.delay_ms {
                    args.push("delay".into());
                    args.push(format!("{delay}ms"));
                    if let Some(jitter) = netem.jitter_ms.filter(|j| *j > 0) {
                        args.push(format!("{jitter}ms"));
                    }
                }
                if let Some(loss) = netem.loss_percent {
                    args.push("loss".into());
                    args.push(format!("{loss}%"));
                }
            }
            Qdisc::TokenBucket(tbf) => {
                args.push("rate".into());
                args.push(format_rate(tbf.rate_kbit));
                args.push("burst".into());
                args.push(format!("{}k", tbf.burst_kb));
                args.push("latency".into());
                args.push(format!("{}ms", tbf.latency_ms));
            }
        }
    }
}

fn format_rate(rate_kbit: u64) -> String {
    if rate_kbit >= 1_000 && rate_kbit % 1_000 == 0 {
        format!("{}mbit", rate_kbit / 1_000)
    } else {
        format!("{rate_kbit}kbit")
    }
}

/// One layer of a traffic shaping configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpairmentRule {
    pub parent: QdiscParent,
    pub handle: Option<QdiscHandle>,
    pub qdisc: Qdisc,
}

impl ImpairmentRule {
    pub fn root(qdisc: Qdisc) -> Self {
        Self {
            parent: QdiscParent::Root,
            handle: None,
            qdisc,
        }
    }

    pub fn child_of(parent: QdiscHandle, qdisc: Qdisc) -> Self {
        Self {
            parent: QdiscParent::Class(parent),
            handle: None,
            qdisc,
        }
    }

    pub fn with_handle(mut self, handle: QdiscHandle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// The arguments for `tc` that install this rule on `interface`.
    pub fn tc_args(&self, interface: &str) -> Vec<String> {
        let mut args: Vec<String> =
            vec!["qdisc".into(), "add".into(), "dev".into(), interface.into()];

        match self.parent {
            QdiscParent::Root => args.push("root".into()),
            QdiscParent::Class(parent) => {
                args.push("parent".into());
                args.push(parent.to_string());
            }
        }
        if let Some(handle) = self.handle {
            args.push("handle".into());
            args.push(handle.to_string());
        }

        args.push(self.qdisc.kind().into());
        self.qdisc.append_params(&mut args);

        args
    }

    /// The rule rendered as a single `tc` argument line, for logs and the run summary.
    pub fn describe(&self, interface: &str) -> String {
        self.tc_args(interface).join(" ")
    }
}

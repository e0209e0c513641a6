
use crate::trusted::Attribute;

use vmi_semantic::{ProcessRecord, Snapshot};

use std::fmt::{self, Display, Formatter};

use log::debug;

// init_task, which no per-process attribute tree lists
const SWAPPER_PID: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Explained by the two views being taken at slightly different times,
    /// or by one of them lacking the data.
    Benign,
    /// A process only one view knows about.
    Suspicious,
    /// A credential the trusted view reports but guest memory does not back.
    Escalation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    Attribute(Attribute),
    Presence,
}

/// What one view says about the subject of a discrepancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observed {
    Value(u32),
    /// The process is known but the value could not be read.
    Unavailable,
    /// The process is not known.
    Absent,
}

/// For `Subject::Presence` the view that holds the process observes its pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Discrepancy {
    pub pid: u32,
    pub subject: Subject,
    pub introspected: Observed,
    pub trusted: Observed,
    pub severity: Severity,
}

/// What to do with a pid only one of the snapshots has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresencePolicy {
    Report,
    Skip,
}

impl Default for PresencePolicy {
    fn default() -> Self {
        PresencePolicy::Report
    }
}

/// Compares the introspected snapshot against the trusted one.
///
/// Findings come in ascending pid order of `introspected`, with the
/// attributes of one pid in uid, gid, ppid order, followed by the pids only
/// `trusted` has, again ascending. The swapper is never reported as
/// missing from either view.
pub fn reconcile(
    introspected: &Snapshot,
    trusted: &Snapshot,
    presence: PresencePolicy,
) -> Vec<Discrepancy> {
    let mut findings = Vec::new();

    for i_rec in introspected.iter() {
        match trusted.get(i_rec.pid) {
            Some(t_rec) if t_rec == i_rec => (),
            Some(t_rec) => findings.extend(
                Attribute::ALL
                    .iter()
                    .filter_map(|attr| compare(*attr, i_rec, t_rec)),
            ),
            None if i_rec.pid == SWAPPER_PID => debug!("swapper is not in the trusted view"),
            None if presence == PresencePolicy::Report => {
                findings.push(unpaired(i_rec.pid, true));
            }
            None => debug!("pid {} is not in the trusted view", i_rec.pid),
        }
    }

    let trusted_only = trusted
        .iter()
        .filter(|r| r.pid != SWAPPER_PID && !introspected.contains(r.pid));
    for t_rec in trusted_only {
        match presence {
            PresencePolicy::Report => findings.push(unpaired(t_rec.pid, false)),
            PresencePolicy::Skip => debug!("pid {} is not in guest memory", t_rec.pid),
        }
    }

    findings
}

fn compare(attr: Attribute, i_rec: &ProcessRecord, t_rec: &ProcessRecord) -> Option<Discrepancy> {
    let pid = t_rec.pid;
    let t = match attr.of(t_rec) {
        Some(t) => t,
        None => {
            debug!("pid {}: no trusted {}, not compared", pid, attr);
            return None;
        }
    };
    let finding = |introspected, severity| Discrepancy {
        pid,
        subject: Subject::Attribute(attr),
        introspected,
        trusted: Observed::Value(t),
        severity,
    };

    let i = match attr.of(i_rec) {
        Some(i) => i,
        None => return Some(finding(Observed::Unavailable, Severity::Benign)),
    };
    let severity = match attr {
        // a process may be reparented between the two passes
        Attribute::Ppid if t > 0 && i > 0 && i != t => Severity::Benign,
        Attribute::Ppid => return None,
        // a trusted baseline of 0 is accepted whatever memory says
        Attribute::Uid | Attribute::Gid if t > 0 && i != t => Severity::Escalation,
        Attribute::Uid | Attribute::Gid => return None,
    };
    Some(finding(Observed::Value(i), severity))
}

fn unpaired(pid: u32, introspected: bool) -> Discrepancy {
    let (i, t) = if introspected {
        (Observed::Value(pid), Observed::Absent)
    } else {
        (Observed::Absent, Observed::Value(pid))
    };
    Discrepancy {
        pid,
        subject: Subject::Presence,
        introspected: i,
        trusted: t,
        severity: Severity::Suspicious,
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Benign => f.write_str("benign"),
            Severity::Suspicious => f.write_str("suspicious"),
            Severity::Escalation => f.write_str("ESCALATION"),
        }
    }
}

impl Display for Subject {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Attribute(attr) => write!(f, "{}", attr),
            Subject::Presence => f.write_str("presence"),
        }
    }
}

impl Display for Observed {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Observed::Value(v) => write!(f, "{}", v),
            Observed::Unavailable => f.write_str("unavailable"),
            Observed::Absent => f.write_str("absent"),
        }
    }
}

impl Display for Discrepancy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pid {}: {} introspected {}, trusted {}",
            self.pid, self.subject, self.introspected, self.trusted
        )
    }
}

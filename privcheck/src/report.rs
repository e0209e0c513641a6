#[cfg(test)]
mod tests;

use crate::reconcile::{Discrepancy, Severity};

use std::fmt::{self, Display, Formatter};
use std::io::{self, Write};

use log::warn;

/// Number of findings per severity.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub escalation: usize,
    pub suspicious: usize,
    pub benign: usize,
}

impl Summary {
    pub fn total(&self) -> usize {
        self.escalation + self.suspicious + self.benign
    }

    fn count(&mut self, severity: Severity) {
        match severity {
            Severity::Escalation => self.escalation += 1,
            Severity::Suspicious => self.suspicious += 1,
            Severity::Benign => self.benign += 1,
        }
    }
}

impl Display for Summary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} findings: {} escalation, {} suspicious, {} benign",
            self.total(),
            self.escalation,
            self.suspicious,
            self.benign
        )
    }
}

/// Writes one line per finding and a trailing summary line.
///
/// Escalations are logged as well.
pub fn render<W: Write>(out: &mut W, findings: &[Discrepancy]) -> io::Result<Summary> {
    let mut summary = Summary::default();
    for finding in findings {
        if finding.severity == Severity::Escalation {
            warn!("{}", finding);
        }
        writeln!(out, "{} {}", finding.severity, finding)?;
        summary.count(finding.severity);
    }
    writeln!(out, "{}", summary)?;
    out.flush()?;
    Ok(summary)
}

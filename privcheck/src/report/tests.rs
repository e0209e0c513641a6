use super::*;
use crate::reconcile::{Observed, Subject};
use crate::trusted::Attribute;

use pretty_assertions::assert_eq;

fn render_to_string(findings: &[Discrepancy]) -> (String, Summary) {
    let mut out = Vec::new();
    let summary = render(&mut out, findings).unwrap();
    (String::from_utf8(out).unwrap(), summary)
}

#[test]
fn render_nothing() {
    let (out, summary) = render_to_string(&[]);
    assert_eq!("0 findings: 0 escalation, 0 suspicious, 0 benign\n", out);
    assert_eq!(Summary::default(), summary);
}

#[test]
fn render_findings() {
    let findings = [
        Discrepancy {
            pid: 5,
            subject: Subject::Presence,
            introspected: Observed::Value(5),
            trusted: Observed::Absent,
            severity: Severity::Suspicious,
        },
        Discrepancy {
            pid: 300,
            subject: Subject::Attribute(Attribute::Uid),
            introspected: Observed::Value(0),
            trusted: Observed::Value(1000),
            severity: Severity::Escalation,
        },
        Discrepancy {
            pid: 300,
            subject: Subject::Attribute(Attribute::Ppid),
            introspected: Observed::Value(7),
            trusted: Observed::Value(5),
            severity: Severity::Benign,
        },
        Discrepancy {
            pid: 301,
            subject: Subject::Attribute(Attribute::Gid),
            introspected: Observed::Unavailable,
            trusted: Observed::Value(100),
            severity: Severity::Benign,
        },
    ];

    let (out, summary) = render_to_string(&findings);
    let expected = "\
suspicious pid 5: presence introspected 5, trusted absent
ESCALATION pid 300: uid introspected 0, trusted 1000
benign pid 300: ppid introspected 7, trusted 5
benign pid 301: gid introspected unavailable, trusted 100
4 findings: 1 escalation, 1 suspicious, 2 benign
";
    assert_eq!(expected, out);
    assert_eq!(
        Summary {
            escalation: 1,
            suspicious: 1,
            benign: 2,
        },
        summary
    );
}

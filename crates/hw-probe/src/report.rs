use crate::{CheckOutcome, CheckResult};
use serde::Serialize;
use std::fmt;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct ProbeReport {
    pub checks: Vec<CheckResult>,
    pub summary: Summary,
    pub exit_code: i32,
}

impl ProbeReport {
    pub fn new(checks: Vec<CheckResult>) -> Self {
        let mut summary = Summary::default();
        for c in &checks {
            match c.outcome {
                CheckOutcome::Pass => summary.passed += 1,
                CheckOutcome::Fail => summary.failed += 1,
                CheckOutcome::Skip => summary.skipped += 1,
            }
        }
        let live_passed = checks.iter().any(|c| c.live && c.passed());
        // 0: all good and proven on a stream, 1: something failed, 2: nothing live ran
        let exit_code = if summary.failed > 0 {
            1
        } else if live_passed {
            0
        } else {
            2
        };
        Self {
            checks,
            summary,
            exit_code,
        }
    }

    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in &self.checks {
            let mark = match c.outcome {
                CheckOutcome::Pass => "PASS",
                CheckOutcome::Fail => "FAIL",
                CheckOutcome::Skip => "SKIP",
            };
            writeln!(f, "[{mark}] {:<16} {}", c.name, c.detail)?;
        }
        let Summary {
            passed,
            failed,
            skipped,
        } = self.summary;
        writeln!(f, "{passed} passed, {failed} failed, {skipped} skipped")?;
        match self.exit_code {
            0 => write!(f, "hardware decoding is ready"),
            1 => write!(f, "some checks failed"),
            _ => write!(f, "no live stream test ran; pass a URL to verify decoding"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &'static str, outcome: CheckOutcome, live: bool) -> CheckResult {
        CheckResult {
            name,
            outcome,
            detail: String::new(),
            live,
        }
    }

    #[test]
    fn test_exit_code_zero_needs_live_pass() {
        let r = ProbeReport::new(vec![
            result("a", CheckOutcome::Pass, false),
            result("decode", CheckOutcome::Pass, true),
            result("stream", CheckOutcome::Skip, true),
        ]);
        assert_eq!(r.exit_code, 0);
        assert_eq!(
            r.summary,
            Summary {
                passed: 2,
                failed: 0,
                skipped: 1
            }
        );
    }

    #[test]
    fn test_any_failure_is_one() {
        let r = ProbeReport::new(vec![
            result("a", CheckOutcome::Fail, false),
            result("decode", CheckOutcome::Pass, true),
        ]);
        assert_eq!(r.exit_code, 1);
    }

    #[test]
    fn test_no_live_test_is_two() {
        let r = ProbeReport::new(vec![
            result("a", CheckOutcome::Pass, false),
            result("decode", CheckOutcome::Skip, true),
        ]);
        assert_eq!(r.exit_code, 2);
        assert!(r.to_string().contains("no live stream test ran"));
    }

    #[test]
    fn test_json_shape() {
        let r = ProbeReport::new(vec![result("decode", CheckOutcome::Skip, true)]);
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["checks"][0]["outcome"], "skip");
        assert_eq!(v["summary"]["skipped"], 1);
        assert_eq!(v["exit_code"], 2);
        assert!(r.check("decode").is_some());
    }
}

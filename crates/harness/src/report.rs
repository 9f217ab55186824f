//! SLO checks and percentile math for scenario reports.

use std::time::Duration;

/// Nearest-rank percentile over unsorted samples. `p` in (0, 100].
pub fn percentile(samples: &[Duration], p: f64) -> Duration {
    if samples.is_empty() {
        return Duration::ZERO;
    }
    let mut sorted: Vec<Duration> = samples.to_vec();
    sorted.sort();
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[derive(Debug, Clone)]
pub struct SloCheck {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub scenario: String,
    pub checks: Vec<SloCheck>,
    pub notes: Vec<String>,
}

impl ScenarioReport {
    pub fn new(scenario: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            checks: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn check(&mut self, name: impl Into<String>, passed: bool, detail: impl Into<String>) {
        self.checks.push(SloCheck {
            name: name.into(),
            passed,
            detail: detail.into(),
        });
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "scenario {}: {}\n",
            self.scenario,
            if self.passed() { "PASS" } else { "FAIL" }
        );
        for check in &self.checks {
            out.push_str(&format!(
                "  [{}] {} — {}\n",
                if check.passed { "ok" } else { "FAIL" },
                check.name,
                check.detail
            ));
        }
        for note in &self.notes {
            out.push_str(&format!("  note: {note}\n"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|v| Duration::from_millis(*v)).collect()
    }

    #[test]
    fn percentile_empty_is_zero() {
        assert_eq!(percentile(&[], 95.0), Duration::ZERO);
    }

    #[test]
    fn percentile_single_sample() {
        let samples = ms(&[42]);
        assert_eq!(percentile(&samples, 50.0), Duration::from_millis(42));
        assert_eq!(percentile(&samples, 99.0), Duration::from_millis(42));
    }

    #[test]
    fn percentile_nearest_rank() {
        // 10 samples: p95 is the 10th value by nearest rank, p50 the 5th.
        let samples = ms(&[10, 20, 30, 40, 50, 60, 70, 80, 90, 100]);
        assert_eq!(percentile(&samples, 50.0), Duration::from_millis(50));
        assert_eq!(percentile(&samples, 95.0), Duration::from_millis(100));
        assert_eq!(percentile(&samples, 100.0), Duration::from_millis(100));
    }

    #[test]
    fn percentile_unsorted_input() {
        let samples = ms(&[90, 10, 50, 30, 70]);
        assert_eq!(percentile(&samples, 100.0), Duration::from_millis(90));
        assert_eq!(percentile(&samples, 20.0), Duration::from_millis(10));
    }

    #[test]
    fn report_pass_fail() {
        let mut report = ScenarioReport::new("bursty");
        report.check("a", true, "fine");
        assert!(report.passed());
        report.check("b", false, "broke");
        assert!(!report.passed());

        let rendered = report.render();
        assert!(rendered.contains("scenario bursty: FAIL"));
        assert!(rendered.contains("[ok] a"));
        assert!(rendered.contains("[FAIL] b"));
    }
}

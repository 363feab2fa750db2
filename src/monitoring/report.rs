//! Metrics Report
//!
//! Renders per-step samples of a run as an ASCII bar chart.

use std::fmt;

use super::metrics::MetricsSample;

const BAR_WIDTH: f64 = 40.0;
const LABEL_WIDTH: usize = 16;

/// Summary of the samples recorded for one run.
#[derive(Debug, Clone)]
pub struct MetricsReport {
    run_id: String,
    samples: Vec<MetricsSample>,
}

impl MetricsReport {
    pub fn new(run_id: impl Into<String>, samples: Vec<MetricsSample>) -> Self {
        Self {
            run_id: run_id.into(),
            samples,
        }
    }

    pub fn samples(&self) -> &[MetricsSample] {
        &self.samples
    }

    /// Sum of step durations in seconds.
    pub fn total_duration_secs(&self) -> f64 {
        self.samples.iter().map(|s| s.duration_secs).sum()
    }

    /// Net memory change across all steps in megabytes.
    pub fn net_memory_mb(&self) -> f64 {
        self.samples.iter().map(|s| s.memory_delta_mb).sum()
    }

    /// The sample with the longest duration.
    pub fn slowest(&self) -> Option<&MetricsSample> {
        self.samples
            .iter()
            .max_by(|a, b| a.duration_secs.total_cmp(&b.duration_secs))
    }

    /// Generates the chart. Bars are scaled to the slowest step; every
    /// measured step gets at least one mark.
    pub fn render(&self) -> String {
        let mut output = format!("\nStep Metrics ({}):\n\n", self.run_id);

        if self.samples.is_empty() {
            output.push_str("  no steps recorded\n");
            return output;
        }

        let longest = self.slowest().map_or(0.0, |s| s.duration_secs);
        let scale = if longest > 0.0 { BAR_WIDTH / longest } else { 0.0 };

        for sample in &self.samples {
            let width = ((sample.duration_secs * scale).round() as usize).max(1);
            output.push_str(&format!(
                "{} |{:<bar$}| {:>8.3}s {:>+9.2} MB\n",
                truncate(&sample.step, LABEL_WIDTH),
                "#".repeat(width),
                sample.duration_secs,
                sample.memory_delta_mb,
                bar = BAR_WIDTH as usize
            ));
        }

        output.push_str(&format!(
            "\nTotal: {} steps, {:.3}s, {:+.2} MB\n",
            self.samples.len(),
            self.total_duration_secs(),
            self.net_memory_mb()
        ));
        output
    }
}

impl fmt::Display for MetricsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Pads or truncates a label to exactly `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample(step: &str, millis: u64, delta_mb: i64) -> MetricsSample {
        MetricsSample::new(step, "desc", Duration::from_millis(millis), delta_mb * 1024 * 1024)
    }

    #[test]
    fn test_empty_report() {
        let report = MetricsReport::new("r1", Vec::new());
        let chart = report.render();

        assert!(chart.contains("r1"));
        assert!(chart.contains("no steps recorded"));
        assert!(report.slowest().is_none());
    }

    #[test]
    fn test_totals() {
        let report = MetricsReport::new("r1", vec![sample("a", 500, 2), sample("b", 1500, -1)]);

        assert_eq!(report.total_duration_secs(), 2.0);
        assert_eq!(report.net_memory_mb(), 1.0);
        assert_eq!(report.slowest().map(|s| s.step.as_str()), Some("b"));
    }

    #[test]
    fn test_bars_scaled_to_slowest() {
        let report = MetricsReport::new("r1", vec![sample("fast", 100, 0), sample("slow", 400, 0)]);
        let chart = report.render();

        let bar_len = |label: &str| {
            chart
                .lines()
                .find(|l| l.starts_with(label))
                .map(|l| l.matches('#').count())
                .unwrap()
        };
        assert_eq!(bar_len("slow"), 40);
        assert_eq!(bar_len("fast"), 10);
        assert!(chart.contains("Total: 2 steps"));
    }

    #[test]
    fn test_zero_duration_steps_still_marked() {
        let report = MetricsReport::new("r1", vec![sample("instant", 0, 0)]);
        assert_eq!(report.render().matches('#').count(), 1);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 8), "short   ");
        assert_eq!(truncate("a_very_long_step_name", 8), "a_ver...");
        assert_eq!(truncate("ééééééééééé", 8).chars().count(), 8);
    }
}

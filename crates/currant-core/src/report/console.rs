use crate::metrics_api::Metric;
use crate::model::{PrioritizationResult, TestCase};
use std::sync::Arc;

const NAME_HEADER: &str = "Name of testcase";
const NAME_WIDTH: usize = 55;
const SEPARATOR: &str = " | ";

/// Width of a metric column: the larger of its declared minimum and its
/// header.
pub fn column_width(metric: &dyn Metric) -> usize {
    metric
        .min_display_width()
        .max(metric.display_name().chars().count())
}

/// One header line plus one right-aligned line per test case.
pub fn format_metrics_table(metrics: &[Arc<dyn Metric>], cases: &[TestCase]) -> String {
    let widths: Vec<usize> = metrics.iter().map(|m| column_width(m.as_ref())).collect();

    let mut out = String::new();
    let header: Vec<String> = metrics.iter().map(|m| m.display_name()).collect();
    push_row(&mut out, NAME_HEADER, &header, &widths);

    for tc in cases {
        let cells: Vec<String> = metrics
            .iter()
            .map(|m| match tc.value(m.column_name()) {
                Some(v) => m.format_for_display(v),
                None => "-".to_string(),
            })
            .collect();
        push_row(&mut out, tc.name(), &cells, &widths);
    }
    out
}

fn push_row(out: &mut String, name: &str, cells: &[String], widths: &[usize]) {
    out.push_str(&format!("{:>w$}", name, w = NAME_WIDTH));
    for (cell, w) in cells.iter().zip(widths) {
        out.push_str(SEPARATOR);
        out.push_str(&format!("{:>w$}", cell, w = *w));
    }
    out.push('\n');
}

/// `00001. testLogin (100.00 %)`, one line per entry.
pub fn format_prioritized(results: &[PrioritizationResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("{:05}. {} ({})\n", i + 1, r.name, r.format_percent()))
        .collect()
}

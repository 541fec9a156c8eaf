//! Text table rendering for aggregated summaries
//!
//! One row per aggregate record in the summary's sort order, with self and
//! total time per device category. The summary is rendered as-is; sorting
//! and grouping happen in [`aggregate`](opscope_shared::types::summary::aggregate).

use opscope_shared::types::summary::Summary;
use opscope_shared::utils::fmt::fmt_duration_ns;

/// Longest name column before keys are truncated with `...`
const NAME_WIDTH_CAP: usize = 64;

/// Render a summary as a fixed-width text table
///
/// `row_limit` keeps only the first N rows; the footer then says how many
/// rows were folded away. A dropped-event warning is appended when the
/// producing scope lost events.
pub fn render_table(summary: &Summary, row_limit: Option<usize>) -> String {
    let shown = match row_limit {
        Some(limit) => summary.records.len().min(limit),
        None => summary.records.len(),
    };

    let name_width = summary.records[..shown]
        .iter()
        .map(|r| r.key.chars().count().min(NAME_WIDTH_CAP))
        .chain(std::iter::once("Name".len()))
        .max()
        .unwrap_or(4);

    let mut out = String::new();
    out.push_str(&format!(
        "{:<name_width$}  {:>12}  {:>12}  {:>12}  {:>12}  {:>10}\n",
        "Name", "Self CPU", "CPU total", "Self Accel", "Accel total", "# Calls"
    ));
    out.push_str(&format!("{:-<width$}\n", "", width = name_width + 68));

    for record in &summary.records[..shown] {
        let key = truncated_key(&record.key);
        out.push_str(&format!(
            "{:<name_width$}  {:>12}  {:>12}  {:>12}  {:>12}  {:>10}\n",
            key,
            fmt_duration_ns(record.self_cpu_ns),
            fmt_duration_ns(record.total_cpu_ns),
            fmt_duration_ns(record.self_accel_ns),
            fmt_duration_ns(record.total_accel_ns),
            record.count,
        ));
    }

    out.push('\n');
    out.push_str(&format!(
        "Self CPU total: {} | Self Accel total: {} | span: {}\n",
        fmt_duration_ns(summary.total_cpu_ns),
        fmt_duration_ns(summary.total_accel_ns),
        fmt_duration_ns(summary.span_ns),
    ));
    if shown < summary.records.len() {
        out.push_str(&format!(
            "(showing {} of {} rows)\n",
            shown,
            summary.records.len()
        ));
    }
    if summary.dropped > 0 {
        out.push_str(&format!(
            "Warning: {} events dropped during capture\n",
            summary.dropped
        ));
    }
    out
}

/// Cap a key at [`NAME_WIDTH_CAP`] characters, marking the cut with `...`.
/// Keys are arbitrary UTF-8, so the cut counts characters rather than bytes.
fn truncated_key(key: &str) -> String {
    if key.chars().count() <= NAME_WIDTH_CAP {
        return key.to_string();
    }
    let mut out: String = key.chars().take(NAME_WIDTH_CAP - 3).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use opscope_shared::types::event::{DeviceKind, EventSet, OpEvent};
    use opscope_shared::types::summary::{aggregate, GroupBy, SortKey};

    const MS: u64 = 1_000_000;

    fn op(id: u64, name: &str, device: DeviceKind, start: u64, end: u64) -> OpEvent {
        OpEvent {
            id,
            parent: None,
            name: name.to_string(),
            device,
            start_ns: start,
            end_ns: end,
            lane: 0,
            stream: None,
            input_shapes: vec![],
            stack: vec![],
        }
    }

    fn sample_summary(dropped: u64) -> opscope_shared::types::summary::Summary {
        let events = EventSet {
            started_ns: 0,
            sealed_ns: 85 * MS,
            events: vec![
                op(0, "embed", DeviceKind::Cpu, 0, 10 * MS),
                op(1, "attn", DeviceKind::Cpu, 10 * MS, 30 * MS),
                op(2, "norm", DeviceKind::Cpu, 30 * MS, 35 * MS),
                op(3, "sgemm", DeviceKind::Accelerator, 35 * MS, 85 * MS),
            ],
            dropped,
        };
        aggregate(&events, GroupBy::default(), SortKey::default())
    }

    #[test]
    fn test_table_layout_and_order() {
        let table = render_table(&sample_summary(0), None);
        let lines: Vec<&str> = table.lines().collect();

        assert!(lines[0].contains("Name"));
        assert!(lines[0].contains("Self CPU"));
        assert!(lines[0].contains("Accel total"));
        assert!(lines[0].contains("# Calls"));
        assert!(lines[1].starts_with("---"));

        // rows are in the summary's descending accel-time order
        assert!(lines[2].starts_with("sgemm"));
        assert!(lines[2].contains("50.000ms"));
        assert!(lines[3].starts_with("embed"));

        assert!(table.contains("Self Accel total: 50.000ms"));
        assert!(table.contains("span: 85.000ms"));
        assert!(!table.contains("Warning"));
    }

    #[test]
    fn test_row_limit_reports_folded_rows() {
        let table = render_table(&sample_summary(0), Some(2));
        let rows: Vec<&str> = table
            .lines()
            .filter(|l| l.starts_with("sgemm") || l.starts_with("embed") || l.starts_with("attn"))
            .collect();
        assert_eq!(rows.len(), 2);
        assert!(table.contains("(showing 2 of 4 rows)"));
    }

    #[test]
    fn test_dropped_events_warning() {
        let table = render_table(&sample_summary(7), None);
        assert!(table.contains("Warning: 7 events dropped during capture"));
    }

    #[test]
    fn test_empty_summary_renders_header_and_footer() {
        let events = EventSet {
            started_ns: 0,
            sealed_ns: 0,
            events: vec![],
            dropped: 0,
        };
        let summary = aggregate(&events, GroupBy::default(), SortKey::default());
        let table = render_table(&summary, None);
        assert!(table.contains("Name"));
        assert!(table.contains("Self CPU total: 0ns"));
    }

    #[test]
    fn test_long_keys_are_truncated() {
        let long_name = "x".repeat(200);
        let events = EventSet {
            started_ns: 0,
            sealed_ns: MS,
            events: vec![op(0, &long_name, DeviceKind::Cpu, 0, MS)],
            dropped: 0,
        };
        let summary = aggregate(&events, GroupBy::default(), SortKey::default());
        let table = render_table(&summary, None);
        assert!(table.contains("..."));
        assert!(!table.contains(&long_name));
    }

    #[test]
    fn test_multibyte_keys_truncate_on_character_boundaries() {
        // 90 bytes but only 30 characters: fits the name column untouched
        let wide = "查".repeat(30);
        let events = EventSet {
            started_ns: 0,
            sealed_ns: MS,
            events: vec![op(0, &wide, DeviceKind::Cpu, 0, MS)],
            dropped: 0,
        };
        let summary = aggregate(&events, GroupBy::default(), SortKey::default());
        let table = render_table(&summary, None);
        assert!(table.contains(&wide));
        assert!(!table.contains("..."));

        // well past the cap: the cut lands between characters, never inside one
        let long = "查".repeat(80);
        let events = EventSet {
            started_ns: 0,
            sealed_ns: MS,
            events: vec![op(0, &long, DeviceKind::Cpu, 0, MS)],
            dropped: 0,
        };
        let summary = aggregate(&events, GroupBy::default(), SortKey::default());
        let table = render_table(&summary, None);
        assert!(table.contains(&"查".repeat(NAME_WIDTH_CAP - 3)));
        assert!(table.contains("..."));
        assert!(!table.contains(&long));
    }
}

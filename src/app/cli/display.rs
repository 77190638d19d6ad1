//! CLI display utilities for formatting output

use crate::core::styles::StyleRole;
use crate::queue::api::{JobState, JobStatus, QueueStatus};
use prettytable::{format, Cell, Row, Table};
use serde::Serialize;
use strum::IntoEnumIterator;

const NONE: &str = "-";

fn cell(text: &str, role: StyleRole, use_color: bool) -> Cell {
    let cell = Cell::new(text);
    match role.to_prettytable_spec() {
        Some(spec) if use_color => cell.style_spec(&spec),
        _ => cell,
    }
}

fn header<S: AsRef<str>>(titles: &[S], use_color: bool) -> Row {
    Row::new(
        titles
            .iter()
            .map(|t| cell(t.as_ref(), StyleRole::Header, use_color))
            .collect(),
    )
}

/// One row per queue with counts in lifecycle order
pub fn queue_status_table(statuses: &[QueueStatus], use_color: bool) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);

    let mut titles = vec!["Queue".to_string()];
    titles.extend(JobState::iter().map(|s| s.to_string()));
    titles.push("Paused".to_string());
    table.set_titles(header(&titles, use_color));

    for status in statuses {
        let mut cells = vec![cell(&status.name, StyleRole::Key, use_color)];
        if let Some(error) = &status.error {
            cells.push(cell(&format!("unavailable: {}", error), StyleRole::Error, use_color));
            table.add_row(Row::new(cells));
            continue;
        }
        for state in JobState::iter() {
            let count = status.counts.get(state);
            // zero counts stay plain so busy states stand out
            let role = if count > 0 {
                StyleRole::for_state(state)
            } else {
                StyleRole::Dim
            };
            cells.push(cell(&count.to_string(), role, use_color));
        }
        cells.push(if status.paused {
            cell("yes", StyleRole::Paused, use_color)
        } else {
            cell("no", StyleRole::Value, use_color)
        });
        table.add_row(Row::new(cells));
    }
    table
}

/// Two-column field/value view of a single job
pub fn job_status_table(job: &JobStatus, use_color: bool) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_CLEAN);

    let optional_time = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map(|t| t.to_rfc3339()).unwrap_or_else(|| NONE.to_string())
    };

    let rows: Vec<(&str, String, StyleRole)> = vec![
        ("id", job.id.to_string(), StyleRole::Value),
        ("queue", job.queue_name.clone(), StyleRole::Value),
        ("type", job.type_name.clone(), StyleRole::Value),
        ("state", job.state.to_string(), StyleRole::for_state(job.state)),
        ("progress", job.progress.to_string(), StyleRole::Value),
        (
            "attempts",
            format!("{}/{}", job.attempts_made, job.max_attempts),
            StyleRole::Value,
        ),
        ("delay", format!("{}ms", job.delay_ms), StyleRole::Value),
        ("created", job.created_at.to_rfc3339(), StyleRole::Value),
        ("processed", optional_time(job.processed_on), StyleRole::Value),
        ("finished", optional_time(job.finished_on), StyleRole::Value),
        ("payload", job.payload.to_string(), StyleRole::Value),
        (
            "result",
            job.result
                .as_ref()
                .map(|r| r.to_string())
                .unwrap_or_else(|| NONE.to_string()),
            StyleRole::Value,
        ),
        (
            "failure",
            job.failure_reason.clone().unwrap_or_else(|| NONE.to_string()),
            if job.failure_reason.is_some() {
                StyleRole::Failed
            } else {
                StyleRole::Value
            },
        ),
    ];

    for (field, value, role) in rows {
        table.add_row(Row::new(vec![
            cell(field, StyleRole::Key, use_color),
            cell(&value, role, use_color),
        ]));
    }
    for (i, frame) in job.stack_trace.iter().enumerate() {
        let label = if i == 0 { "stack" } else { "" };
        table.add_row(Row::new(vec![
            cell(label, StyleRole::Key, use_color),
            cell(frame, StyleRole::Dim, use_color),
        ]));
    }
    table
}

/// Pretty-printed JSON for `--json` output
pub fn to_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::api::{Job, JobOptions, QueueCounts};
    use chrono::Utc;
    use serde_json::json;

    fn status(name: &str, waiting: usize, paused: bool) -> QueueStatus {
        QueueStatus {
            name: name.to_string(),
            counts: QueueCounts {
                waiting,
                completed: 2,
                ..QueueCounts::default()
            },
            paused,
            error: None,
        }
    }

    #[test]
    fn test_queue_table_layout() {
        let table = queue_status_table(&[status("email", 3, false), status("data", 0, true)], false);
        assert_eq!(table.len(), 2);

        let rendered = table.to_string();
        assert!(rendered.contains("Queue"));
        assert!(rendered.contains("waiting"));
        assert!(rendered.contains("email"));

        let paused_row = table.get_row(1).unwrap();
        assert_eq!(paused_row.get_cell(0).unwrap().get_content(), "data");
        assert_eq!(paused_row.iter().last().unwrap().get_content(), "yes");
    }

    #[test]
    fn test_unavailable_queue_row() {
        let table = queue_status_table(&[QueueStatus::unavailable("broken", "store offline")], false);
        let row = table.get_row(0).unwrap();
        assert_eq!(row.len(), 2);
        assert!(row.get_cell(1).unwrap().get_content().contains("store offline"));
    }

    #[test]
    fn test_color_does_not_change_content() {
        let plain = queue_status_table(&[status("email", 1, true)], false);
        let colored = queue_status_table(&[status("email", 1, true)], true);
        for (a, b) in plain.row_iter().zip(colored.row_iter()) {
            let a: Vec<_> = a.iter().map(|c| c.get_content()).collect();
            let b: Vec<_> = b.iter().map(|c| c.get_content()).collect();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_job_table_shows_failure_and_stack() {
        let mut job = Job::new(7, "email", "send-email", json!({"to": "a@b.c"}), JobOptions::default(), Utc::now());
        job.state = JobState::Failed;
        job.failure_reason = Some("smtp down".to_string());
        job.stack_trace = vec!["connect".to_string(), "send".to_string()];

        let table = job_status_table(&job.status(), false);
        let rendered = table.to_string();
        assert!(rendered.contains("failed"));
        assert!(rendered.contains("smtp down"));
        assert!(rendered.contains("connect"));
        assert!(rendered.contains("send"));
        // 13 fields plus one row per stack frame
        assert_eq!(table.len(), 15);
    }

    #[test]
    fn test_json_output_uses_camel_case() {
        let text = to_json(&status("email", 1, false)).unwrap();
        assert!(text.contains("\"name\": \"email\""));
        assert!(text.contains("\"waiting\": 1"));
        assert!(!text.contains("error"));
    }
}

//! Output formatting utilities for the CLI.

use std::env;

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use serde::Serialize;

use crate::domain::models::{Run, RunStatus};

pub trait CommandOutput: Serialize {
    fn to_human(&self) -> String;
    fn to_json(&self) -> serde_json::Value;
}

pub fn output<T: CommandOutput>(result: &T, json_mode: bool) {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(&result.to_json()).unwrap_or_default());
    } else {
        println!("{}", result.to_human());
    }
}

/// First eight characters of an ID, as shown in tables.
pub fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// Format runs as a table.
pub fn format_run_table(runs: &[Run]) -> String {
    let use_colors = supports_color();
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("ID").add_attribute(Attribute::Bold),
        Cell::new("Pair").add_attribute(Attribute::Bold),
        Cell::new("Status").add_attribute(Attribute::Bold),
        Cell::new("Reuses").add_attribute(Attribute::Bold),
        Cell::new("Regenerates").add_attribute(Attribute::Bold),
        Cell::new("Created").add_attribute(Attribute::Bold),
    ]);

    for run in runs {
        let status = if use_colors {
            Cell::new(run.status).fg(status_color(run.status))
        } else {
            Cell::new(run.status)
        };
        let reuses = run
            .reused_from_run_id
            .as_ref()
            .map_or_else(|| "-".to_string(), short_id);
        let regenerates = if run.forced_categories.is_empty() {
            "-".to_string()
        } else {
            run.forced_categories
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",")
        };

        table.add_row(vec![
            Cell::new(short_id(&run.id)),
            Cell::new(run.pair),
            status,
            Cell::new(reuses),
            Cell::new(regenerates),
            Cell::new(run.created_at.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }

    table.to_string()
}

fn supports_color() -> bool {
    if env::var("NO_COLOR").is_ok() {
        return false;
    }
    !matches!(env::var("TERM").as_deref(), Ok("dumb"))
}

fn status_color(status: RunStatus) -> Color {
    match status {
        RunStatus::Pending => Color::White,
        RunStatus::Processing => Color::Cyan,
        RunStatus::Completed => Color::Green,
        RunStatus::Failed => Color::Red,
    }
}

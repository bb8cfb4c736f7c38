//! Group, grid and per-segment metric tables

use std::collections::BTreeMap;
use std::sync::Arc;

use comfy_table::{presets::UTF8_FULL_CONDENSED, Attribute, Cell, Color, Table};
use console::style;

use crate::engine::{Iteration, IterationOutput, Metric, RiskSegmentDetails, RiskSegmentGrid, SegmentMetric};

fn header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| Cell::new(label).add_attribute(Attribute::Bold))
        .collect()
}

fn print_section(icon: &str, title: &str) {
    println!();
    println!("    {} {}", style(icon).cyan(), style(title).white().bold());
    println!("    {}", style("─".repeat(50)).dim());
    println!();
}

fn print_indented(table: &Table) {
    for line in table.to_string().lines() {
        println!("    {}", line);
    }
}

/// One row per group: index, definition, whether it is selected and, for
/// single-variable iterations, the risk segment it maps to
pub fn groups_table(iteration: &Iteration, default: bool) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    let details = iteration.risk_segment_details();
    let mut labels = vec!["Group", iteration.variable.as_str(), "Active"];
    if details.is_some() {
        labels.push("Risk Segment");
    }
    table.set_header(header(&labels));

    for (index, group) in iteration.groups.view(default) {
        let active = iteration.groups.is_active(index);
        let mut row = vec![
            Cell::new(index),
            Cell::new(group.to_string()),
            Cell::new(if active { "yes" } else { "no" }).fg(if active { Color::Green } else { Color::DarkGrey }),
        ];
        if let Some(details) = details {
            row.push(Cell::new(details.name(index)));
        }
        table.add_row(row);
    }
    table
}

/// Rows are groups, columns are the parent's risk segments, cells name the
/// resulting segment
pub fn grid_table(grid: &RiskSegmentGrid, details: &RiskSegmentDetails) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    let mut labels = vec!["Group".to_string()];
    labels.extend(grid.columns().iter().map(|&c| details.name(c)));
    table.set_header(
        labels
            .iter()
            .map(|l| Cell::new(l).add_attribute(Attribute::Bold))
            .collect::<Vec<_>>(),
    );

    for (row, cells) in grid.rows().iter().zip(grid.cells()) {
        let mut line = vec![Cell::new(row)];
        line.extend(cells.iter().map(|&segment| Cell::new(details.name(segment))));
        table.add_row(line);
    }
    table
}

/// One row per risk segment, one column per metric
pub fn metrics_table(range: &[SegmentMetric], metrics: &BTreeMap<String, Arc<dyn Metric>>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    let mut labels = vec!["Risk Segment"];
    labels.extend(metrics.values().map(|m| m.label()));
    table.set_header(header(&labels));

    for segment in range {
        let mut row = vec![Cell::new(&segment.name)];
        for (id, metric) in metrics {
            let value = segment.values.get(id).copied().unwrap_or(f64::NAN);
            row.push(Cell::new(metric.format().format(value)));
        }
        table.add_row(row);
    }
    table
}

pub fn display_groups(iteration: &Iteration, default: bool) {
    print_section(
        "📋",
        &format!("GROUPS: {} ({} {})", iteration.name, iteration.variable_type, iteration.iteration_type()),
    );
    print_indented(&groups_table(iteration, default));
}

pub fn display_grid(grid: &RiskSegmentGrid, details: &RiskSegmentDetails) {
    print_section("🧮", "RISK SEGMENT GRID");
    print_indented(&grid_table(grid, details));
}

pub fn display_segment_metrics(range: &[SegmentMetric], metrics: &BTreeMap<String, Arc<dyn Metric>>) {
    print_section("📊", "RISK SEGMENT SUMMARY");
    print_indented(&metrics_table(range, metrics));
}

/// Print validation errors and warnings carried by a resolution
pub fn display_messages(output: &IterationOutput) {
    if output.errors.is_empty() && output.warnings.is_empty() {
        return;
    }
    println!();
    for error in &output.errors {
        println!("    {} {}", style("✗").red().bold(), style(error).red());
    }
    for warning in &output.warnings {
        println!("    {} {}", style("⚠").yellow(), style(warning).yellow());
    }
    let unmapped = output.unmapped_count();
    if unmapped > 0 {
        println!("      {} row(s) without a risk segment", style(unmapped).yellow().bold());
    }
}

//! Tabular output for `graph info` and `list`.

use super::theme::short_id;
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use rivet_core::DepsGraph;
use rivet_schema::{BinaryStatus, Context, RecipeReference};

fn status_cell(status: BinaryStatus) -> Cell {
    let color = match status {
        BinaryStatus::Cache | BinaryStatus::Skip => Color::Green,
        BinaryStatus::Download | BinaryStatus::Update | BinaryStatus::Build => Color::Blue,
        BinaryStatus::Missing | BinaryStatus::Invalid => Color::Red,
        _ => Color::DarkGrey,
    };
    Cell::new(status).fg(color)
}

fn base_table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.to_vec());
    table
}

/// One row per non-root node: reference, context, binary status, package id, origin.
pub fn graph_table(graph: &DepsGraph) -> Table {
    let mut table = base_table(&["reference", "context", "binary", "package id", "from"]);
    for node in graph.nodes().iter().filter(|n| !n.is_root()) {
        let context = match node.context {
            Context::Host => "host",
            Context::Build => "build",
        };
        let package_id = node
            .package_id
            .as_ref()
            .map_or_else(|| "-".to_string(), |p| short_id(p.as_str()).to_string());
        let mut reference = node.label();
        if node.private {
            reference.push_str(" (private)");
        }
        table.add_row(vec![
            Cell::new(reference).fg(Color::Cyan),
            Cell::new(context),
            status_cell(node.binary),
            Cell::new(package_id).fg(Color::DarkGrey),
            Cell::new(node.recipe_origin.as_deref().unwrap_or("-")),
        ]);
    }
    table
}

/// Recipe revisions found in a store, newest last.
pub fn recipes_table(rows: &[(String, RecipeReference)]) -> Table {
    let mut table = base_table(&["store", "reference", "revision", "created"]);
    for (store, rref) in rows {
        let created = rref
            .timestamp
            .and_then(|t| chrono::DateTime::from_timestamp(t, 0))
            .map_or_else(|| "-".to_string(), |dt| dt.format("%Y-%m-%d %H:%M").to_string());
        table.add_row(vec![
            Cell::new(store),
            Cell::new(rref.without_revision()).fg(Color::Cyan),
            Cell::new(rref.revision.as_deref().map_or("-", short_id)).fg(Color::DarkGrey),
            Cell::new(created),
        ]);
    }
    table
}

//! Terminal tables for the CLI.

use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};
use colored::*;

use crate::gguf::GGUFReader;
use crate::inference::{Classification, ModelDetails, ModelRole};

/// Longest array shown in full in the metadata table
const MAX_ARRAY_PREVIEW: usize = 8;

fn header(names: &[&str]) -> Vec<Cell> {
    names
        .iter()
        .map(|n| Cell::new(n).fg(Color::Cyan).add_attribute(Attribute::Bold))
        .collect()
}

fn new_table(columns: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .set_header(header(columns))
        .load_preset(comfy_table::presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// One-row table for a classification result
pub fn classification_table(file: &str, result: &Classification) -> Table {
    let mut table = new_table(&["Image", "Domain", "Domain #", "Class", "Class #"]);
    table.add_row(vec![
        Cell::new(file).fg(Color::White),
        Cell::new(result.domain.as_str()).fg(Color::Yellow),
        Cell::new(result.domain_index).set_alignment(CellAlignment::Right),
        Cell::new(&result.class_name).fg(Color::Green).add_attribute(Attribute::Bold),
        Cell::new(result.class_index).set_alignment(CellAlignment::Right),
    ]);
    table
}

/// Registry listing: router first, then the domain models
pub fn models_table(models: &[ModelDetails]) -> Table {
    let mut table = new_table(&["Role", "Domain", "Name", "Architecture", "Classes", "Tensors", "File", "Loaded"]);
    for model in models {
        let role = match model.role {
            ModelRole::Router => Cell::new("router").fg(Color::Magenta),
            ModelRole::Domain => Cell::new("domain").fg(Color::Blue),
        };
        let file = model
            .path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "-".to_string());

        table.add_row(vec![
            role,
            Cell::new(model.domain.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())).fg(Color::Yellow),
            Cell::new(&model.name).fg(Color::Green),
            Cell::new(&model.architecture).set_alignment(CellAlignment::Center),
            Cell::new(model.labels.join(", ")),
            Cell::new(model.tensor_count.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string()))
                .set_alignment(CellAlignment::Right),
            Cell::new(file).fg(Color::White),
            Cell::new(model.loaded_at.format("%Y-%m-%d %H:%M:%S").to_string()).fg(Color::DarkGrey),
        ]);
    }
    table
}

/// Metadata keys of an artifact with their types and values
pub fn metadata_table(reader: &GGUFReader) -> Table {
    let mut table = new_table(&["Key", "Type", "Value"]);
    for (key, (type_name, value)) in &reader.metadata {
        let rendered = match value.as_array() {
            Some(items) if items.len() > MAX_ARRAY_PREVIEW => format!("[{} items]", items.len()),
            _ => value.to_string(),
        };
        table.add_row(vec![
            Cell::new(key).fg(Color::Yellow),
            Cell::new(type_name).fg(Color::DarkGrey),
            Cell::new(rendered),
        ]);
    }
    table
}

/// Tensor directory of an artifact
pub fn tensors_table(reader: &GGUFReader) -> Table {
    let mut table = new_table(&["#", "Name", "Shape", "Type", "Bytes"]);
    for (i, tensor) in reader.tensors.iter().enumerate() {
        let shape = tensor
            .shape()
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(" x ");
        table.add_row(vec![
            Cell::new(i + 1).set_alignment(CellAlignment::Right),
            Cell::new(&tensor.name).fg(Color::Green),
            Cell::new(shape),
            Cell::new(tensor.data_type).set_alignment(CellAlignment::Center),
            Cell::new(tensor.byte_len().map(|n| n.to_string()).unwrap_or_else(|_| "-".to_string()))
                .set_alignment(CellAlignment::Right),
        ]);
    }
    table
}

pub fn print_classification(file: &str, result: &Classification) {
    println!("\n{}", classification_table(file, result));
    println!(
        "{}",
        format!("{} -> {}", result.domain, result.class_name).bright_green()
    );
}

pub fn print_models(models: &[ModelDetails]) {
    if models.is_empty() {
        println!("{}", "No models loaded".yellow());
        return;
    }
    println!("\n{}", models_table(models));
    println!("{}", "=".repeat(100).bright_black());
    println!("{}", format!("Total models: {}", models.len()).bright_green());
}

pub fn print_artifact(reader: &GGUFReader) {
    println!(
        "{}",
        format!("{} (GGUF v{})", reader.path.display(), reader.version).bold()
    );
    println!("\n{}", metadata_table(reader));
    println!("\n{}", tensors_table(reader));
    println!("{}", format!("Total tensors: {}", reader.tensors.len()).bright_green());
}

use owo_colors::OwoColorize;
use tabled::{builder::Builder, settings::Style, Table, Tabled};

use crate::command::{QueryOutput, SqlValue};
use crate::ui::theme;

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Field")]
    pub field: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

/// Two-column key/value table
#[derive(Default)]
pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_row(&mut self, label: &str, value: &str) {
        self.rows.push(TableRow {
            field: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }
        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}

/// Render the rows of a statement result, one column per result column.
///
/// Returns an empty string for statements that produced no columns.
pub fn result_table(output: &QueryOutput) -> String {
    if output.columns.is_empty() {
        return String::new();
    }

    let mut builder = Builder::default();
    builder.push_record(output.columns.iter().cloned());
    for row in &output.rows {
        builder.push_record(row.iter().map(cell));
    }
    builder.build().with(Style::rounded()).to_string()
}

fn cell(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".style(theme().null.clone()).to_string(),
        other => other.display(),
    }
}

use std::fmt;

use tabplan_expr::Value;
use tabplan_source::Field;

/// The in-memory result of running a table plan.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MaterializedTable {
    schema: Vec<Field>,
    rows: Vec<Vec<Value>>,
}

impl MaterializedTable {
    pub(crate) fn new(schema: Vec<Field>, rows: Vec<Vec<Value>>) -> Self {
        Self { schema, rows }
    }

    pub fn schema(&self) -> &[Field] {
        &self.schema
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.schema.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.schema.iter().position(|f| f.name == name)
    }

    /// Values of column `name`, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row(&self, idx: usize) -> Option<&[Value]> {
        self.rows.get(idx).map(Vec::as_slice)
    }

    /// Cell at `row` in column `name`.
    pub fn get(&self, row: usize, name: &str) -> Option<&Value> {
        let idx = self.column_index(name)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.schema.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.rows.truncate(len);
    }

    pub fn into_parts(self) -> (Vec<Field>, Vec<Vec<Value>>) {
        (self.schema, self.rows)
    }
}

const MAX_CELL_WIDTH: usize = 40;

fn cell_text(value: &Value) -> String {
    let text = value.to_string();
    if text.chars().count() <= MAX_CELL_WIDTH {
        return text;
    }
    let mut truncated: String = text.chars().take(MAX_CELL_WIDTH - 1).collect();
    truncated.push('…');
    truncated
}

fn write_line<'a>(
    f: &mut fmt::Formatter<'_>,
    widths: &[usize],
    items: impl Iterator<Item = &'a str>,
) -> fmt::Result {
    for (idx, (item, width)) in items.zip(widths.iter().copied()).enumerate() {
        if idx > 0 {
            f.write_str(" | ")?;
        }
        write!(f, "{item:<width$}")?;
    }
    writeln!(f)
}

impl fmt::Display for MaterializedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect();
        let mut widths: Vec<usize> = self.schema.iter().map(|c| c.name.chars().count()).collect();
        for row in &cells {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        write_line(f, &widths, self.schema.iter().map(|c| c.name.as_str()))?;
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        write_line(f, &widths, rule.iter().map(String::as_str))?;
        for row in &cells {
            write_line(f, &widths, row.iter().map(String::as_str))?;
        }
        write!(f, "({} rows)", self.rows.len())
    }
}

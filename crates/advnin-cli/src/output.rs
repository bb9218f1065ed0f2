//! Rendering of command reports.

use serde::Serialize;

use crate::OutputFormat;

/// One row of a report table.
#[derive(Debug, Clone, Serialize)]
pub struct Row {
    pub key: String,
    pub value: String,
}

impl Row {
    pub fn new(key: impl Into<String>, value: impl ToString) -> Self {
        Self {
            key: key.into(),
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub title: String,
    pub rows: Vec<Row>,
}

impl Report {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl ToString) {
        self.rows.push(Row::new(key, value));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.rows
            .iter()
            .find(|row| row.key == key)
            .map(|row| row.value.as_str())
    }

    pub fn render(&self, format: OutputFormat) -> anyhow::Result<String> {
        match format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            OutputFormat::Table => {
                let width = self.rows.iter().map(|r| r.key.len()).max().unwrap_or(0);
                let mut out = format!("{}\n", self.title);
                for row in &self.rows {
                    out.push_str(&format!("  {:<width$}  {}\n", row.key, row.value));
                }
                Ok(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_aligns_keys() {
        let mut report = Report::new("nin");
        report.push("parameters", 42);
        report.push("dtype", "F32");
        let table = report.render(OutputFormat::Table).unwrap();
        assert_eq!(table, "nin\n  parameters  42\n  dtype       F32\n");
    }

    #[test]
    fn json_keeps_row_order() {
        let mut report = Report::new("forward");
        report.push("b", 1);
        report.push("a", 2);
        let json: serde_json::Value =
            serde_json::from_str(&report.render(OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(json["title"], "forward");
        assert_eq!(json["rows"][0]["key"], "b");
        assert_eq!(json["rows"][1]["value"], "2");
        assert_eq!(report.get("a"), Some("2"));
    }
}

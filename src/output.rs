//! Output formatting for the CLI
//!
//! `human` draws ASCII tables with `tabled`, `script` and `csv` emit
//! `;`-separated lines (csv quotes every cell), `json` goes through serde.
//! Label/value tables are shown as two columns, `Label` and `Value`.

use crate::device::{Report, ReportValue};
use serde::Serialize;
use tabled::builder::Builder;
use tabled::settings::Style;

const SEPARATOR: &str = ";";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputStyle {
    #[default]
    Human,
    Script,
    Csv,
    Json,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Formatter {
    style: OutputStyle,
}

/// Header row plus data rows, all cells as text
struct Grid {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Grid {
    fn from_value(value: &ReportValue) -> Option<Self> {
        match value {
            ReportValue::Status(_) => None,
            ReportValue::Table(table) => Some(Self {
                headers: vec!["Label".to_string(), "Value".to_string()],
                rows: table
                    .iter()
                    .map(|(label, value)| vec![label.to_string(), value.to_string()])
                    .collect(),
            }),
            ReportValue::Rows(table) => {
                // columns of the first row; the device renders uniform rows
                let headers: Vec<String> = table
                    .rows
                    .first()
                    .map(|row| row.labels().map(str::to_string).collect())
                    .unwrap_or_default();
                let rows = table
                    .rows
                    .iter()
                    .map(|row| {
                        headers
                            .iter()
                            .map(|h| row.get(h).unwrap_or_default().to_string())
                            .collect()
                    })
                    .collect();
                Some(Self { headers, rows })
            }
        }
    }
}

impl Formatter {
    pub fn new(style: OutputStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> OutputStyle {
        self.style
    }

    /// Render one value, preceded by a `[ label ]` line when given
    pub fn format(&self, value: &ReportValue, label: Option<&str>) -> String {
        if self.style == OutputStyle::Json {
            return match label {
                Some(label) => render_json(&serde_json::json!({ label: value })),
                None => render_json(value),
            };
        }

        let body = match (value, Grid::from_value(value)) {
            (ReportValue::Status(status), _) => status.to_string(),
            (_, Some(grid)) => self.render_grid(&grid),
            (_, None) => String::new(),
        };
        match label {
            Some(label) => format!("[ {label} ]\n{body}"),
            None => body,
        }
    }

    /// Render every entry of a report; JSON output is a single object
    pub fn format_report(&self, report: &Report) -> String {
        if self.style == OutputStyle::Json {
            return render_json(report);
        }
        report
            .entries
            .iter()
            .map(|(key, value)| self.format(value, Some(key)))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn render_grid(&self, grid: &Grid) -> String {
        if grid.headers.is_empty() {
            return String::new();
        }
        match self.style {
            OutputStyle::Human => render_table(grid),
            OutputStyle::Script => render_delimited(grid, ""),
            OutputStyle::Csv => render_delimited(grid, "\""),
            OutputStyle::Json => unreachable!("json is rendered through serde"),
        }
    }
}

fn render_table(grid: &Grid) -> String {
    let mut builder = Builder::default();
    builder.push_record(grid.headers.iter().cloned());
    for row in &grid.rows {
        builder.push_record(row.iter().cloned());
    }
    builder.build().with(Style::ascii()).to_string()
}

fn render_delimited(grid: &Grid, enclosure: &str) -> String {
    let line = |cells: &[String]| {
        cells
            .iter()
            .map(|cell| {
                if enclosure.is_empty() {
                    cell.clone()
                } else {
                    let escaped = cell.replace(enclosure, &enclosure.repeat(2));
                    format!("{enclosure}{escaped}{enclosure}")
                }
            })
            .collect::<Vec<_>>()
            .join(SEPARATOR)
    };

    let mut lines = vec![line(&grid.headers)];
    lines.extend(grid.rows.iter().map(|row| line(row)));
    lines.join("\n")
}

pub(crate) fn render_json<T: Serialize + ?Sized>(data: &T) -> String {
    serde_json::to_string_pretty(data).expect("serialization should not fail")
}

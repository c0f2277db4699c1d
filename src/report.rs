use std::fmt::Write;

use chrono::NaiveDate;
use serde::ser::{Serialize, SerializeSeq, Serializer};
use serde_json::{Map, Number, Value};

use crate::aggregate::AggregateTable;
use crate::correlate::SegmentTable;
use crate::filters::Filter;
use crate::indicators::{
    metric, CorrelationSection, EnrollmentSection, OverviewSection, SummarySection,
    SupportSection, TeachingSection,
};
use crate::join::JoinStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Text,
    Markdown,
}

/// A rendered grid: key columns followed by metric columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub keys: usize,
    pub rows: Vec<(Vec<String>, Vec<Option<f64>>)>,
}

impl From<&AggregateTable> for Table {
    fn from(table: &AggregateTable) -> Self {
        Table {
            headers: table
                .dimensions
                .iter()
                .map(|dimension| dimension.column().to_string())
                .chain(table.metrics.iter().cloned())
                .collect(),
            keys: table.dimensions.len(),
            rows: table
                .rows
                .iter()
                .map(|row| (row.key.clone(), row.values.clone()))
                .collect(),
        }
    }
}

impl From<&SegmentTable> for Table {
    fn from(table: &SegmentTable) -> Self {
        Table {
            headers: table
                .dimensions
                .iter()
                .map(|dimension| dimension.column().to_string())
                .chain(table.columns.iter().cloned())
                .collect(),
            keys: table.dimensions.len(),
            rows: table
                .rows
                .iter()
                .map(|row| (row.key.clone(), row.values.clone()))
                .collect(),
        }
    }
}

impl Table {
    /// One JSON object per row, fields named by the headers.
    pub fn records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|(key, values)| {
                let mut record = Map::new();
                let cells = key
                    .iter()
                    .map(|part| Value::String(part.clone()))
                    .chain(values.iter().map(|value| {
                        value
                            .and_then(Number::from_f64)
                            .map(Value::Number)
                            .unwrap_or(Value::Null)
                    }));
                for (header, cell) in self.headers.iter().zip(cells) {
                    record.insert(header.clone(), cell);
                }
                record
            })
            .collect()
    }

    fn cells(&self) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|(key, values)| {
                key.iter()
                    .cloned()
                    .chain(values.iter().map(|value| format_number(*value)))
                    .collect()
            })
            .collect()
    }

    pub fn render(&self, style: Style) -> String {
        match style {
            Style::Text => self.render_text(),
            Style::Markdown => self.render_markdown(),
        }
    }

    fn render_text(&self) -> String {
        let cells = self.cells();
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &cells {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let mut output = String::new();
        let line = |output: &mut String, row: &[String]| {
            let mut parts = Vec::with_capacity(row.len());
            for (index, (cell, &width)) in row.iter().zip(&widths).enumerate() {
                if index < self.keys {
                    parts.push(format!("{cell:<width$}"));
                } else {
                    parts.push(format!("{cell:>width$}"));
                }
            }
            let _ = writeln!(output, "{}", parts.join("  ").trim_end());
        };

        line(&mut output, self.headers.as_slice());
        let rule: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
        line(&mut output, rule.as_slice());
        for row in &cells {
            line(&mut output, row.as_slice());
        }
        output
    }

    fn render_markdown(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "| {} |", self.headers.join(" | "));
        let align: Vec<&str> = (0..self.headers.len())
            .map(|index| if index < self.keys { "---" } else { "---:" })
            .collect();
        let _ = writeln!(output, "| {} |", align.join(" | "));
        for row in self.cells() {
            let escaped: Vec<String> = row.iter().map(|cell| cell.replace('|', "\\|")).collect();
            let _ = writeln!(output, "| {} |", escaped.join(" | "));
        }
        output
    }
}

impl Serialize for AggregateTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_records(&Table::from(self), serializer)
    }
}

impl Serialize for SegmentTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_records(&Table::from(self), serializer)
    }
}

fn serialize_records<S: Serializer>(table: &Table, serializer: S) -> Result<S::Ok, S::Error> {
    let records = table.records();
    let mut seq = serializer.serialize_seq(Some(records.len()))?;
    for record in &records {
        seq.serialize_element(record)?;
    }
    seq.end()
}

/// Whole numbers print without decimals; undefined values print as `n/a`.
pub fn format_number(value: Option<f64>) -> String {
    match value {
        None => "n/a".to_string(),
        Some(value) if value.fract() == 0.0 && value.abs() < 1e15 => format!("{value:.0}"),
        Some(value) => format!("{value:.2}"),
    }
}

fn format_rate(value: Option<f64>) -> String {
    match value {
        Some(value) => format!("{value:.1}%"),
        None => "n/a".to_string(),
    }
}

fn heading(output: &mut String, style: Style, title: &str) {
    let _ = writeln!(output);
    match style {
        Style::Markdown => {
            let _ = writeln!(output, "## {title}");
        }
        Style::Text => {
            let _ = writeln!(output, "{title}");
            let _ = writeln!(output, "{}", "=".repeat(title.chars().count()));
        }
    }
}

fn subheading(output: &mut String, style: Style, title: &str) {
    let _ = writeln!(output);
    match style {
        Style::Markdown => {
            let _ = writeln!(output, "### {title}");
        }
        Style::Text => {
            let _ = writeln!(output, "{title}:");
        }
    }
}

fn table_or_note(output: &mut String, style: Style, table: &Table, empty_note: &str) {
    if table.rows.is_empty() {
        let _ = writeln!(output, "{empty_note}");
    } else {
        let _ = write!(output, "{}", table.render(style));
    }
}

pub fn render_table_section(output: &mut String, style: Style, title: &str, table: &AggregateTable) {
    heading(output, style, title);
    table_or_note(output, style, &Table::from(table), "No rows match this selection.");
}

pub fn render_overview(output: &mut String, style: Style, section: &OverviewSection) {
    let kpis = &section.kpis;
    heading(output, style, "Overview");
    let _ = writeln!(output, "- Unique students: {}", kpis.unique_students);
    let _ = writeln!(output, "- Enrollments: {}", kpis.enrollments);
    let _ = writeln!(output, "- Programs: {}", kpis.programs);
    let _ = writeln!(
        output,
        "- Courses: {} taught by {} teachers",
        kpis.courses, kpis.teachers
    );
    let _ = writeln!(output, "- Support cases: {}", kpis.support_cases);
    let _ = writeln!(output, "- Dropout rate: {}", format_rate(kpis.dropout_rate));
    let _ = writeln!(output, "- Failure rate: {}", format_rate(kpis.failure_rate));
    let _ = writeln!(output, "- Mean final grade: {}", format_number(kpis.mean_grade));

    subheading(output, style, "Programs with the highest dropout + failure rate");
    table_or_note(
        output,
        style,
        &Table::from(&section.top_programs),
        "No enrollments match this selection.",
    );
}

pub fn render_enrollment(output: &mut String, style: Style, section: &EnrollmentSection) {
    heading(output, style, "Enrollment and performance");
    let _ = writeln!(output, "- Enrollments: {}", section.enrollments);
    let _ = writeln!(output, "- Dropout rate: {}", format_rate(section.dropout_rate));
    let _ = writeln!(output, "- Failure rate: {}", format_rate(section.failure_rate));
    let _ = writeln!(output, "- Mean final grade: {}", format_number(section.mean_grade));

    let empty = "No enrollments match this selection.";
    subheading(output, style, "Academic status by program");
    table_or_note(output, style, &Table::from(&section.status_by_program), empty);
    subheading(output, style, "Indicators by program");
    table_or_note(output, style, &Table::from(&section.programs), empty);
    subheading(output, style, "Courses with the highest dropout rate");
    table_or_note(
        output,
        style,
        &Table::from(&section.top_courses),
        "No enrollment matched a course row.",
    );
    subheading(output, style, "Dropout + failure by modality and sub-period");
    table_or_note(output, style, &Table::from(&section.modality_subperiod), empty);
}

pub fn render_teaching(output: &mut String, style: Style, section: &TeachingSection) {
    let kpis = &section.kpis;
    heading(output, style, "Teachers and courses");
    let _ = writeln!(output, "- Teachers: {}", kpis.teachers);
    let _ = writeln!(
        output,
        "- Mean group size: {}",
        format_number(kpis.mean_group_size)
    );
    let _ = writeln!(output, "- Mean course grade: {}", format_number(kpis.mean_grade));
    let _ = writeln!(
        output,
        "- Mean course failure rate: {}",
        format_rate(kpis.mean_failure_rate)
    );
    let _ = writeln!(
        output,
        "- Mean course dropout rate: {}",
        format_rate(kpis.mean_dropout_rate)
    );

    let empty = "No enrollment matched a course row.";
    subheading(output, style, "Group size and results by course");
    table_or_note(output, style, &Table::from(&section.course_teachers), empty);
    subheading(output, style, "Teachers with the highest failure rate");
    table_or_note(output, style, &Table::from(&section.top_teachers), empty);
}

pub fn render_support(output: &mut String, style: Style, section: &SupportSection) {
    let kpis = &section.kpis;
    heading(output, style, "Support and attention");
    let _ = writeln!(output, "- Support cases: {}", kpis.cases);
    let _ = writeln!(
        output,
        "- Mean response time (hours): {}",
        format_number(kpis.avg_response_hours)
    );
    let _ = writeln!(
        output,
        "- Mean satisfaction (1-5): {}",
        format_number(kpis.avg_satisfaction)
    );
    let _ = writeln!(
        output,
        "- Enrollment dropout rate: {}",
        format_rate(kpis.enrollment_dropout_rate)
    );

    let empty = "No support cases match this selection.";
    subheading(output, style, "Most frequent reasons");
    table_or_note(output, style, &Table::from(&section.reasons), empty);
    subheading(output, style, "Response time by attention type");
    table_or_note(output, style, &Table::from(&section.attention_types), empty);
    subheading(output, style, "Satisfaction by region");
    table_or_note(output, style, &Table::from(&section.regions), empty);
}

pub fn render_correlation(output: &mut String, style: Style, section: &CorrelationSection) {
    heading(output, style, "Response time and dropout by segment");
    if section.segments.is_empty() {
        let _ = writeln!(
            output,
            "No segment has both enrollments and support cases in this selection."
        );
        return;
    }

    let _ = writeln!(
        output,
        "- Segments compared: {}",
        section.segments.len()
    );
    let _ = writeln!(
        output,
        "- Correlation, response time vs dropout rate: {}",
        format_number(section.response_vs_dropout)
    );
    let _ = writeln!(
        output,
        "- Correlation, satisfaction vs dropout rate: {}",
        format_number(section.satisfaction_vs_dropout)
    );
    let _ = writeln!(output);
    let _ = write!(output, "{}", Table::from(&section.segments).render(style));
}

/// `first (12.5%), second (8.0%)` from the first key column of each row.
fn listing(table: &AggregateTable, metric: &str, format: fn(Option<f64>) -> String) -> String {
    if table.is_empty() {
        return "n/a".to_string();
    }
    table
        .rows
        .iter()
        .map(|row| format!("{} ({})", row.key[0], format(table.value(row, metric))))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn render_summary(output: &mut String, style: Style, section: &SummarySection) {
    heading(output, style, "Summary");
    let _ = writeln!(
        output,
        "- Highest dropout rate: {}",
        listing(&section.top_dropout_programs, metric::DROPOUT_RATE, format_rate)
    );
    let _ = writeln!(
        output,
        "- Most frequent support reasons: {}",
        listing(&section.top_reasons, metric::CASES, format_number)
    );
    let _ = writeln!(
        output,
        "- Support answers in {} hours on average, with satisfaction {} / 5",
        format_number(section.avg_response_hours),
        format_number(section.avg_satisfaction)
    );
}

pub struct ReportInput<'a> {
    pub generated_on: NaiveDate,
    pub filter: &'a Filter,
    pub join_stats: JoinStats,
    pub degraded_join: bool,
    pub overview: &'a OverviewSection,
    pub enrollment: &'a EnrollmentSection,
    pub teaching: &'a TeachingSection,
    pub support: &'a SupportSection,
    pub correlation: &'a CorrelationSection,
    pub summary: &'a SummarySection,
}

pub fn build_report(input: &ReportInput<'_>) -> String {
    let mut output = String::new();
    let style = Style::Markdown;

    let _ = writeln!(output, "# Virtual Education Unit Metrics Report");
    let _ = writeln!(
        output,
        "Generated on {} for {}",
        input.generated_on,
        input.filter.describe()
    );
    let _ = writeln!(
        output,
        "Enrollments matched to a course row: {} of {}",
        input.join_stats.matched, input.join_stats.rows
    );
    if input.degraded_join {
        let _ = writeln!(
            output,
            "\n> {} of enrollments have no course row; course and teacher tables are incomplete.",
            format_rate(input.join_stats.unmatched_share().map(|share| share * 100.0))
        );
    }

    render_overview(&mut output, style, input.overview);
    render_enrollment(&mut output, style, input.enrollment);
    render_teaching(&mut output, style, input.teaching);
    render_support(&mut output, style, input.support);
    render_correlation(&mut output, style, input.correlation);
    render_summary(&mut output, style, input.summary);

    output
}

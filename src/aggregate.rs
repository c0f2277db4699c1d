use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::models::{EnrichedEnrollment, SupportCase};

/// A column rows can be grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Semester,
    Faculty,
    Program,
    Modality,
    SubPeriod,
    AcademicStatus,
    CourseId,
    CourseName,
    TeacherId,
    TeacherSeniority,
    Region,
    Reason,
    AttentionType,
}

impl Dimension {
    pub fn column(self) -> &'static str {
        match self {
            Self::Semester => "semester",
            Self::Faculty => "faculty",
            Self::Program => "program",
            Self::Modality => "modality",
            Self::SubPeriod => "sub_period",
            Self::AcademicStatus => "academic_status",
            Self::CourseId => "course_id",
            Self::CourseName => "course_name",
            Self::TeacherId => "teacher_id",
            Self::TeacherSeniority => "teacher_seniority_semesters",
            Self::Region => "region",
            Self::Reason => "reason",
            Self::AttentionType => "attention_type",
        }
    }
}

/// A per-row value a reduction can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    StudentId,
    CourseId,
    FinalGrade,
    ResponseTimeHours,
    Satisfaction,
    Dropout,
    Failure,
    DropoutOrFailure,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a> {
    Missing,
    Text(Cow<'a, str>),
    Number(f64),
    Flag(bool),
}

impl Value<'_> {
    fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) if n.is_finite() => Some(*n),
            Value::Flag(flag) => Some(if *flag { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    fn distinct_key(&self) -> Option<String> {
        match self {
            Value::Missing => None,
            Value::Text(text) if text.is_empty() => None,
            Value::Text(text) => Some(text.to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Flag(flag) => Some(flag.to_string()),
        }
    }
}

/// Rows the aggregator can group and reduce.
pub trait Aggregatable {
    /// The row's value for a grouping dimension, `None` when null or not
    /// applicable to this kind of row.
    fn dimension(&self, dimension: Dimension) -> Option<Cow<'_, str>>;

    fn value(&self, field: Field) -> Value<'_>;
}

impl<T: Aggregatable + ?Sized> Aggregatable for &T {
    fn dimension(&self, dimension: Dimension) -> Option<Cow<'_, str>> {
        (**self).dimension(dimension)
    }

    fn value(&self, field: Field) -> Value<'_> {
        (**self).value(field)
    }
}

fn text(value: &str) -> Option<Cow<'_, str>> {
    if value.is_empty() {
        None
    } else {
        Some(Cow::Borrowed(value))
    }
}

fn text_value(value: &str) -> Value<'_> {
    if value.is_empty() {
        Value::Missing
    } else {
        Value::Text(Cow::Borrowed(value))
    }
}

fn number_value(value: Option<f64>) -> Value<'static> {
    value.map(Value::Number).unwrap_or(Value::Missing)
}

impl Aggregatable for EnrichedEnrollment<'_> {
    fn dimension(&self, dimension: Dimension) -> Option<Cow<'_, str>> {
        let enrollment = self.enrollment;
        match dimension {
            Dimension::Semester => text(&enrollment.semester),
            Dimension::Faculty => text(&enrollment.faculty),
            Dimension::Program => text(&enrollment.program),
            Dimension::Modality => text(&enrollment.modality),
            Dimension::SubPeriod => text(&enrollment.sub_period),
            Dimension::AcademicStatus => enrollment.academic_status.as_deref().and_then(text),
            Dimension::CourseId => text(&enrollment.course_id),
            Dimension::CourseName => self.course.and_then(|course| text(&course.course_name)),
            Dimension::TeacherId => self.course.and_then(|course| text(&course.teacher_id)),
            Dimension::TeacherSeniority => self
                .course
                .and_then(|course| course.teacher_seniority_semesters)
                .map(|seniority| Cow::Owned(seniority.to_string())),
            Dimension::Region | Dimension::Reason | Dimension::AttentionType => None,
        }
    }

    fn value(&self, field: Field) -> Value<'_> {
        match field {
            Field::StudentId => text_value(&self.enrollment.student_id),
            Field::CourseId => text_value(&self.enrollment.course_id),
            Field::FinalGrade => number_value(self.enrollment.final_grade),
            Field::Dropout => Value::Flag(self.flags.is_dropout),
            Field::Failure => Value::Flag(self.flags.is_failure),
            Field::DropoutOrFailure => Value::Flag(self.flags.is_dropout_or_failure),
            Field::ResponseTimeHours | Field::Satisfaction => Value::Missing,
        }
    }
}

impl Aggregatable for SupportCase {
    fn dimension(&self, dimension: Dimension) -> Option<Cow<'_, str>> {
        match dimension {
            Dimension::Semester => text(&self.semester),
            Dimension::Faculty => text(&self.faculty),
            Dimension::Program => text(&self.program),
            Dimension::Region => text(&self.region),
            Dimension::Reason => text(&self.reason),
            Dimension::AttentionType => text(&self.attention_type),
            _ => None,
        }
    }

    fn value(&self, field: Field) -> Value<'_> {
        match field {
            Field::ResponseTimeHours => number_value(self.response_time_hours),
            Field::Satisfaction => number_value(self.student_satisfaction),
            _ => Value::Missing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    /// Rows in the group.
    Count,
    /// Distinct non-null values of a field.
    DistinctCount(Field),
    /// Sum of non-null values; flags count as 0/1.
    Sum(Field),
    /// Mean of non-null values, undefined when there are none.
    Mean(Field),
}

/// Grouping dimensions, named reductions, and the percentage rates derived
/// from them.
#[derive(Debug, Clone, Default)]
pub struct AggregationSpec {
    pub group_by: Vec<Dimension>,
    pub reductions: Vec<(String, Reduction)>,
    /// `(rate name, numerator metric)`; the denominator is the group size.
    pub rates: Vec<(String, String)>,
}

impl AggregationSpec {
    pub fn new(group_by: impl IntoIterator<Item = Dimension>) -> Self {
        Self {
            group_by: group_by.into_iter().collect(),
            ..Self::default()
        }
    }

    /// A spec without grouping: the whole input reduces to a single row.
    pub fn ungrouped() -> Self {
        Self::default()
    }

    pub fn reduce(mut self, name: impl Into<String>, reduction: Reduction) -> Self {
        self.reductions.push((name.into(), reduction));
        self
    }

    pub fn rate(mut self, name: impl Into<String>, numerator: impl Into<String>) -> Self {
        self.rates.push((name.into(), numerator.into()));
        self
    }

    pub fn metric_names(&self) -> Vec<String> {
        self.reductions
            .iter()
            .map(|(name, _)| name.clone())
            .chain(self.rates.iter().map(|(name, _)| name.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateRow {
    pub key: Vec<String>,
    /// Number of input rows in the group, always at least one.
    pub size: usize,
    pub values: Vec<Option<f64>>,
}

/// Output of one aggregation: column names plus one row per group.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AggregateTable {
    pub dimensions: Vec<Dimension>,
    pub metrics: Vec<String>,
    pub rows: Vec<AggregateRow>,
}

impl AggregateTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn metric_index(&self, name: &str) -> Option<usize> {
        self.metrics.iter().position(|metric| metric == name)
    }

    pub fn value(&self, row: &AggregateRow, metric: &str) -> Option<f64> {
        self.metric_index(metric)
            .and_then(|index| row.values.get(index).copied().flatten())
    }

    pub fn column(&self, metric: &str) -> Vec<Option<f64>> {
        match self.metric_index(metric) {
            Some(index) => self.rows.iter().map(|row| row.values[index]).collect(),
            None => vec![None; self.rows.len()],
        }
    }

    /// Unweighted mean of a metric across groups.
    pub fn column_mean(&self, metric: &str) -> Option<f64> {
        let values: Vec<f64> = self.column(metric).into_iter().flatten().collect();
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    }

    #[cfg(test)]
    pub fn find(&self, key: &[&str]) -> Option<&AggregateRow> {
        self.rows
            .iter()
            .find(|row| row.key.iter().map(String::as_str).eq(key.iter().copied()))
    }
}

enum State {
    Count,
    Distinct(HashSet<String>),
    Sum(f64),
    Mean { total: f64, seen: usize },
}

impl State {
    fn new(reduction: Reduction) -> Self {
        match reduction {
            Reduction::Count => State::Count,
            Reduction::DistinctCount(_) => State::Distinct(HashSet::new()),
            Reduction::Sum(_) => State::Sum(0.0),
            Reduction::Mean(_) => State::Mean { total: 0.0, seen: 0 },
        }
    }

    fn push<R: Aggregatable>(&mut self, row: &R, reduction: Reduction) {
        match (self, reduction) {
            (State::Distinct(values), Reduction::DistinctCount(field)) => {
                if let Some(key) = row.value(field).distinct_key() {
                    values.insert(key);
                }
            }
            (State::Sum(total), Reduction::Sum(field)) => {
                if let Some(value) = row.value(field).as_number() {
                    *total += value;
                }
            }
            (State::Mean { total, seen }, Reduction::Mean(field)) => {
                if let Some(value) = row.value(field).as_number() {
                    *total += value;
                    *seen += 1;
                }
            }
            _ => {}
        }
    }

    fn finish(&self, size: usize) -> Option<f64> {
        match self {
            State::Count => Some(size as f64),
            State::Distinct(values) => Some(values.len() as f64),
            State::Sum(total) => Some(*total),
            State::Mean { seen: 0, .. } => None,
            State::Mean { total, seen } => Some(total / *seen as f64),
        }
    }
}

struct Group {
    size: usize,
    states: Vec<State>,
}

/// Groups `rows` by `spec.group_by` and reduces each group.
///
/// Only groups with at least one row are emitted, so every rate has a
/// non-zero denominator. Rows with a null value in any grouping dimension
/// are skipped. Output is sorted by key.
pub fn aggregate<R: Aggregatable>(rows: &[R], spec: &AggregationSpec) -> AggregateTable {
    let mut groups: BTreeMap<Vec<String>, Group> = BTreeMap::new();
    let mut skipped = 0usize;

    'rows: for row in rows {
        let mut key = Vec::with_capacity(spec.group_by.len());
        for dimension in &spec.group_by {
            match row.dimension(*dimension) {
                Some(value) => key.push(value.into_owned()),
                None => {
                    skipped += 1;
                    continue 'rows;
                }
            }
        }

        let group = groups.entry(key).or_insert_with(|| Group {
            size: 0,
            states: spec
                .reductions
                .iter()
                .map(|(_, reduction)| State::new(*reduction))
                .collect(),
        });
        group.size += 1;
        for (state, (_, reduction)) in group.states.iter_mut().zip(&spec.reductions) {
            state.push(row, *reduction);
        }
    }

    if skipped > 0 {
        tracing::debug!(skipped, group_by = ?spec.group_by, "rows with null grouping values skipped");
    }

    let reduction_names: Vec<&str> = spec.reductions.iter().map(|(name, _)| name.as_str()).collect();

    let rows = groups
        .into_iter()
        .map(|(key, group)| {
            let mut values: Vec<Option<f64>> = group
                .states
                .iter()
                .map(|state| state.finish(group.size))
                .collect();

            for (_, numerator) in &spec.rates {
                let rate = reduction_names
                    .iter()
                    .position(|name| *name == numerator.as_str())
                    .and_then(|index| values[index])
                    .and_then(|count| percentage(count, group.size));
                values.push(rate);
            }

            AggregateRow {
                key,
                size: group.size,
                values,
            }
        })
        .collect();

    AggregateTable {
        dimensions: spec.group_by.clone(),
        metrics: spec.metric_names(),
        rows,
    }
}

/// `count / denominator × 100`, undefined for an empty denominator.
pub fn percentage(count: f64, denominator: usize) -> Option<f64> {
    if denominator == 0 {
        None
    } else {
        Some(count / denominator as f64 * 100.0)
    }
}

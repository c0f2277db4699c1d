//! Named aggregations behind each analysis section, and the prepared view
//! of one snapshot they run against.

use std::collections::HashSet;

use serde::Serialize;

use crate::aggregate::{aggregate, AggregateTable, AggregationSpec, Dimension, Field, Reduction};
use crate::correlate::{correlate, pearson, SegmentTable};
use crate::filters::Filter;
use crate::join::{check_null_rate, join, JoinKeys, JoinStats};
use crate::models::{CourseRecord, Datasets, EnrichedEnrollment, SupportCase};
use crate::rank::{self, Direction};

pub mod metric {
    pub const ENROLLMENTS: &str = "enrollments";
    pub const STUDENTS: &str = "students";
    pub const COURSES: &str = "courses";
    pub const CASES: &str = "cases";
    pub const DROPOUTS: &str = "dropouts";
    pub const FAILURES: &str = "failures";
    pub const DROPOUTS_OR_FAILURES: &str = "dropouts_or_failures";
    pub const MEAN_GRADE: &str = "mean_grade";
    pub const DROPOUT_RATE: &str = "dropout_rate";
    pub const FAILURE_RATE: &str = "failure_rate";
    pub const DROPOUT_OR_FAILURE_RATE: &str = "dropout_or_failure_rate";
    pub const AVG_RESPONSE_HOURS: &str = "avg_response_hours";
    pub const AVG_SATISFACTION: &str = "avg_satisfaction";
}

pub const SEGMENT: [Dimension; 3] = [Dimension::Semester, Dimension::Faculty, Dimension::Program];

pub const TOP_PROGRAMS: usize = 3;
pub const TOP_REASONS: usize = 3;

fn with_outcomes(spec: AggregationSpec) -> AggregationSpec {
    spec.reduce(metric::DROPOUTS, Reduction::Sum(Field::Dropout))
        .reduce(metric::FAILURES, Reduction::Sum(Field::Failure))
        .reduce(metric::MEAN_GRADE, Reduction::Mean(Field::FinalGrade))
        .rate(metric::DROPOUT_RATE, metric::DROPOUTS)
        .rate(metric::FAILURE_RATE, metric::FAILURES)
}

pub fn overview_totals() -> AggregationSpec {
    with_outcomes(
        AggregationSpec::ungrouped()
            .reduce(metric::ENROLLMENTS, Reduction::Count)
            .reduce(metric::STUDENTS, Reduction::DistinctCount(Field::StudentId)),
    )
}

/// Program risk as used on the overview: dropouts and failures together.
pub fn program_risk() -> AggregationSpec {
    AggregationSpec::new([Dimension::Program])
        .reduce(metric::ENROLLMENTS, Reduction::Count)
        .reduce(metric::STUDENTS, Reduction::DistinctCount(Field::StudentId))
        .reduce(metric::DROPOUTS_OR_FAILURES, Reduction::Sum(Field::DropoutOrFailure))
        .reduce(metric::DROPOUTS, Reduction::Sum(Field::Dropout))
        .reduce(metric::FAILURES, Reduction::Sum(Field::Failure))
        .rate(metric::DROPOUT_OR_FAILURE_RATE, metric::DROPOUTS_OR_FAILURES)
}

pub fn status_by_program() -> AggregationSpec {
    AggregationSpec::new([Dimension::Program, Dimension::AcademicStatus])
        .reduce(metric::ENROLLMENTS, Reduction::Count)
}

pub fn program_indicators() -> AggregationSpec {
    with_outcomes(AggregationSpec::new([Dimension::Program]).reduce(metric::ENROLLMENTS, Reduction::Count))
}

pub fn course_indicators() -> AggregationSpec {
    with_outcomes(
        AggregationSpec::new([Dimension::CourseName]).reduce(metric::ENROLLMENTS, Reduction::Count),
    )
}

pub fn modality_subperiod_risk() -> AggregationSpec {
    AggregationSpec::new([Dimension::Modality, Dimension::SubPeriod])
        .reduce(metric::ENROLLMENTS, Reduction::Count)
        .reduce(metric::DROPOUTS_OR_FAILURES, Reduction::Sum(Field::DropoutOrFailure))
        .rate(metric::DROPOUT_OR_FAILURE_RATE, metric::DROPOUTS_OR_FAILURES)
}

pub fn course_teacher_indicators() -> AggregationSpec {
    with_outcomes(
        AggregationSpec::new([
            Dimension::CourseId,
            Dimension::CourseName,
            Dimension::TeacherId,
            Dimension::Faculty,
            Dimension::Program,
            Dimension::TeacherSeniority,
        ])
        .reduce(metric::STUDENTS, Reduction::DistinctCount(Field::StudentId)),
    )
}

pub fn teacher_indicators() -> AggregationSpec {
    with_outcomes(
        AggregationSpec::new([Dimension::TeacherId, Dimension::Faculty, Dimension::TeacherSeniority])
            .reduce(metric::COURSES, Reduction::DistinctCount(Field::CourseId))
            .reduce(metric::STUDENTS, Reduction::DistinctCount(Field::StudentId)),
    )
}

pub fn support_totals() -> AggregationSpec {
    AggregationSpec::ungrouped()
        .reduce(metric::CASES, Reduction::Count)
        .reduce(metric::AVG_RESPONSE_HOURS, Reduction::Mean(Field::ResponseTimeHours))
        .reduce(metric::AVG_SATISFACTION, Reduction::Mean(Field::Satisfaction))
}

pub fn support_by_reason() -> AggregationSpec {
    AggregationSpec::new([Dimension::Reason]).reduce(metric::CASES, Reduction::Count)
}

pub fn response_by_attention_type() -> AggregationSpec {
    AggregationSpec::new([Dimension::AttentionType])
        .reduce(metric::CASES, Reduction::Count)
        .reduce(metric::AVG_RESPONSE_HOURS, Reduction::Mean(Field::ResponseTimeHours))
}

pub fn satisfaction_by_region() -> AggregationSpec {
    AggregationSpec::new([Dimension::Region])
        .reduce(metric::CASES, Reduction::Count)
        .reduce(metric::AVG_SATISFACTION, Reduction::Mean(Field::Satisfaction))
}

pub fn enrollment_segments() -> AggregationSpec {
    AggregationSpec::new(SEGMENT)
        .reduce(metric::ENROLLMENTS, Reduction::Count)
        .reduce(metric::DROPOUTS, Reduction::Sum(Field::Dropout))
        .rate(metric::DROPOUT_RATE, metric::DROPOUTS)
}

pub fn support_segments() -> AggregationSpec {
    AggregationSpec::new(SEGMENT)
        .reduce(metric::CASES, Reduction::Count)
        .reduce(metric::AVG_RESPONSE_HOURS, Reduction::Mean(Field::ResponseTimeHours))
        .reduce(metric::AVG_SATISFACTION, Reduction::Mean(Field::Satisfaction))
}

#[derive(Debug, Clone, Serialize)]
pub struct OverviewKpis {
    pub unique_students: usize,
    pub enrollments: usize,
    pub programs: usize,
    pub courses: usize,
    pub teachers: usize,
    pub support_cases: usize,
    pub dropout_rate: Option<f64>,
    pub failure_rate: Option<f64>,
    pub mean_grade: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverviewSection {
    pub kpis: OverviewKpis,
    pub top_programs: AggregateTable,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrollmentSection {
    pub enrollments: usize,
    pub dropout_rate: Option<f64>,
    pub failure_rate: Option<f64>,
    pub mean_grade: Option<f64>,
    pub status_by_program: AggregateTable,
    pub programs: AggregateTable,
    pub top_courses: AggregateTable,
    pub modality_subperiod: AggregateTable,
}

#[derive(Debug, Clone, Serialize)]
pub struct TeachingKpis {
    pub mean_group_size: Option<f64>,
    pub mean_grade: Option<f64>,
    pub mean_failure_rate: Option<f64>,
    pub mean_dropout_rate: Option<f64>,
    pub teachers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TeachingSection {
    pub kpis: TeachingKpis,
    pub course_teachers: AggregateTable,
    pub top_teachers: AggregateTable,
}

#[derive(Debug, Clone, Serialize)]
pub struct SupportKpis {
    pub cases: usize,
    pub avg_response_hours: Option<f64>,
    pub avg_satisfaction: Option<f64>,
    pub enrollment_dropout_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SupportSection {
    pub kpis: SupportKpis,
    pub reasons: AggregateTable,
    pub attention_types: AggregateTable,
    pub regions: AggregateTable,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrelationSection {
    pub segments: SegmentTable,
    /// Response time vs dropout rate across segments.
    pub response_vs_dropout: Option<f64>,
    /// Satisfaction vs dropout rate across segments.
    pub satisfaction_vs_dropout: Option<f64>,
}

/// Headline findings across every section.
#[derive(Debug, Clone, Serialize)]
pub struct SummarySection {
    pub top_dropout_programs: AggregateTable,
    pub top_reasons: AggregateTable,
    pub avg_response_hours: Option<f64>,
    pub avg_satisfaction: Option<f64>,
}

pub const ENROLLMENT_LABEL: &str = "enrollment";
pub const SUPPORT_LABEL: &str = "support";

/// One snapshot joined and filtered, ready for any section.
#[derive(Debug, Clone)]
pub struct Pipeline<'a> {
    pub enrollments: Vec<EnrichedEnrollment<'a>>,
    pub support_cases: Vec<&'a SupportCase>,
    pub courses: Vec<&'a CourseRecord>,
    pub join_stats: JoinStats,
    pub degraded_join: bool,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        datasets: &'a Datasets,
        keys: JoinKeys,
        filter: &Filter,
        max_unmatched_share: f64,
    ) -> Self {
        let joined = join(&datasets.enrollments, &datasets.courses, keys);
        let degraded_join = check_null_rate(&joined.stats, max_unmatched_share);
        let enrollments = filter.enrollments(joined.rows);
        let support_cases = filter.support_cases(&datasets.support_cases);
        let courses = filter.courses(&datasets.courses);

        tracing::debug!(
            enrollments = enrollments.len(),
            support_cases = support_cases.len(),
            courses = courses.len(),
            "prepared pipeline"
        );

        Self {
            enrollments,
            support_cases,
            courses,
            join_stats: joined.stats,
            degraded_join,
        }
    }

    fn totals(&self) -> AggregateTable {
        aggregate(&self.enrollments, &overview_totals())
    }

    pub fn overview(&self) -> OverviewSection {
        let totals = self.totals();
        let total = |name: &str| {
            totals
                .rows
                .first()
                .and_then(|row| totals.value(row, name))
        };

        let programs: HashSet<&str> = self
            .enrollments
            .iter()
            .map(|row| row.enrollment.program.as_str())
            .filter(|program| !program.is_empty())
            .collect();
        let courses: HashSet<&str> = self.courses.iter().map(|c| c.course_id.as_str()).collect();
        let teachers: HashSet<&str> = self.courses.iter().map(|c| c.teacher_id.as_str()).collect();
        let cases: HashSet<&str> = self
            .support_cases
            .iter()
            .map(|case| case.case_id.as_str())
            .collect();

        let kpis = OverviewKpis {
            unique_students: total(metric::STUDENTS).unwrap_or(0.0) as usize,
            enrollments: self.enrollments.len(),
            programs: programs.len(),
            courses: courses.len(),
            teachers: teachers.len(),
            support_cases: cases.len(),
            dropout_rate: total(metric::DROPOUT_RATE),
            failure_rate: total(metric::FAILURE_RATE),
            mean_grade: total(metric::MEAN_GRADE),
        };

        let risk = aggregate(&self.enrollments, &program_risk());
        let top_programs = rank::top_n(
            &risk,
            metric::DROPOUT_OR_FAILURE_RATE,
            Direction::Descending,
            TOP_PROGRAMS,
        );

        OverviewSection { kpis, top_programs }
    }

    pub fn enrollment(&self, course_limit: usize) -> EnrollmentSection {
        let totals = self.totals();
        let total = |name: &str| {
            totals
                .rows
                .first()
                .and_then(|row| totals.value(row, name))
        };

        let programs = rank::sorted(
            &aggregate(&self.enrollments, &program_indicators()),
            metric::DROPOUT_RATE,
            Direction::Descending,
        );

        EnrollmentSection {
            enrollments: self.enrollments.len(),
            dropout_rate: total(metric::DROPOUT_RATE),
            failure_rate: total(metric::FAILURE_RATE),
            mean_grade: total(metric::MEAN_GRADE),
            status_by_program: aggregate(&self.enrollments, &status_by_program()),
            programs,
            top_courses: self.top_courses(course_limit, Direction::Descending),
            modality_subperiod: self.modality_subperiod(),
        }
    }

    pub fn top_courses(&self, limit: usize, direction: Direction) -> AggregateTable {
        rank::top_n(
            &aggregate(&self.enrollments, &course_indicators()),
            metric::DROPOUT_RATE,
            direction,
            limit,
        )
    }

    pub fn modality_subperiod(&self) -> AggregateTable {
        aggregate(&self.enrollments, &modality_subperiod_risk())
    }

    pub fn teaching(&self, teacher_limit: usize) -> TeachingSection {
        let course_teachers = aggregate(&self.enrollments, &course_teacher_indicators());
        let teachers: HashSet<&str> = course_teachers
            .rows
            .iter()
            .map(|row| row.key[2].as_str())
            .collect();

        let kpis = TeachingKpis {
            mean_group_size: course_teachers.column_mean(metric::STUDENTS),
            mean_grade: course_teachers.column_mean(metric::MEAN_GRADE),
            mean_failure_rate: course_teachers.column_mean(metric::FAILURE_RATE),
            mean_dropout_rate: course_teachers.column_mean(metric::DROPOUT_RATE),
            teachers: teachers.len(),
        };

        let top_teachers = rank::top_n(
            &aggregate(&self.enrollments, &teacher_indicators()),
            metric::FAILURE_RATE,
            Direction::Descending,
            teacher_limit,
        );

        TeachingSection {
            kpis,
            course_teachers,
            top_teachers,
        }
    }

    pub fn support(&self) -> SupportSection {
        let totals = aggregate(&self.support_cases, &support_totals());
        let total = |name: &str| {
            totals
                .rows
                .first()
                .and_then(|row| totals.value(row, name))
        };
        let enrollment_totals = self.totals();
        let enrollment_dropout_rate = enrollment_totals
            .rows
            .first()
            .and_then(|row| enrollment_totals.value(row, metric::DROPOUT_RATE));

        SupportSection {
            kpis: SupportKpis {
                cases: self.support_cases.len(),
                avg_response_hours: total(metric::AVG_RESPONSE_HOURS),
                avg_satisfaction: total(metric::AVG_SATISFACTION),
                enrollment_dropout_rate,
            },
            reasons: rank::sorted(
                &aggregate(&self.support_cases, &support_by_reason()),
                metric::CASES,
                Direction::Descending,
            ),
            attention_types: aggregate(&self.support_cases, &response_by_attention_type()),
            regions: aggregate(&self.support_cases, &satisfaction_by_region()),
        }
    }

    pub fn summary(&self) -> SummarySection {
        let support = aggregate(&self.support_cases, &support_totals());
        let support_total = |name: &str| {
            support
                .rows
                .first()
                .and_then(|row| support.value(row, name))
        };

        SummarySection {
            top_dropout_programs: rank::top_n(
                &aggregate(&self.enrollments, &program_indicators()),
                metric::DROPOUT_RATE,
                Direction::Descending,
                TOP_PROGRAMS,
            ),
            top_reasons: rank::top_n(
                &aggregate(&self.support_cases, &support_by_reason()),
                metric::CASES,
                Direction::Descending,
                TOP_REASONS,
            ),
            avg_response_hours: support_total(metric::AVG_RESPONSE_HOURS),
            avg_satisfaction: support_total(metric::AVG_SATISFACTION),
        }
    }

    pub fn correlation(&self) -> anyhow::Result<CorrelationSection> {
        let enrollment = aggregate(&self.enrollments, &enrollment_segments());
        let support = aggregate(&self.support_cases, &support_segments());
        let segments = correlate(&enrollment, ENROLLMENT_LABEL, &support, SUPPORT_LABEL)?;

        let dropout = format!("{ENROLLMENT_LABEL}.{}", metric::DROPOUT_RATE);
        let response = format!("{SUPPORT_LABEL}.{}", metric::AVG_RESPONSE_HOURS);
        let satisfaction = format!("{SUPPORT_LABEL}.{}", metric::AVG_SATISFACTION);

        Ok(CorrelationSection {
            response_vs_dropout: pearson(&segments, &response, &dropout),
            satisfaction_vs_dropout: pearson(&segments, &satisfaction, &dropout),
            segments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EnrollmentRecord;

    fn enrollment(student: &str, course: &str, program: &str, status: &str, grade: f64) -> EnrollmentRecord {
        EnrollmentRecord {
            student_id: student.to_string(),
            course_id: course.to_string(),
            program: program.to_string(),
            faculty: "F1".to_string(),
            modality: "AMV".to_string(),
            sub_period: "A".to_string(),
            semester: "S1".to_string(),
            academic_status: (!status.is_empty()).then(|| status.to_string()),
            final_grade: Some(grade),
        }
    }

    fn course(id: &str, name: &str, teacher: &str) -> CourseRecord {
        CourseRecord {
            course_id: id.to_string(),
            course_name: name.to_string(),
            teacher_id: teacher.to_string(),
            faculty: "F1".to_string(),
            program: "P1".to_string(),
            teacher_seniority_semesters: Some(3),
            semester: None,
        }
    }

    fn support_case(id: &str, program: &str, hours: f64) -> SupportCase {
        SupportCase {
            case_id: id.to_string(),
            semester: "S1".to_string(),
            faculty: "F1".to_string(),
            program: program.to_string(),
            region: "Norte".to_string(),
            reason: if hours > 10.0 { "Plataforma" } else { "Notas" }.to_string(),
            attention_type: "Ticket".to_string(),
            response_time_hours: Some(hours),
            student_satisfaction: Some(4.0),
        }
    }

    fn datasets() -> Datasets {
        Datasets {
            enrollments: vec![
                enrollment("E1", "C1", "P1", "Cancelado", 0.0),
                enrollment("E2", "C1", "P1", "Aprobado", 4.0),
                enrollment("E3", "C2", "P2", "Reprobado", 2.0),
                enrollment("E1", "C2", "P2", "Aprobado", 3.0),
            ],
            courses: vec![course("C1", "Algebra", "D1"), course("C2", "Calculo", "D2")],
            support_cases: vec![
                support_case("K1", "P1", 12.0),
                support_case("K2", "P1", 20.0),
                support_case("K3", "P3", 2.0),
            ],
        }
    }

    #[test]
    fn overview_counts_and_rates() {
        let data = datasets();
        let pipeline = Pipeline::new(&data, JoinKeys::Course, &Filter::default(), 0.5);
        let overview = pipeline.overview();

        assert_eq!(overview.kpis.unique_students, 3);
        assert_eq!(overview.kpis.enrollments, 4);
        assert_eq!(overview.kpis.programs, 2);
        assert_eq!(overview.kpis.teachers, 2);
        assert_eq!(overview.kpis.support_cases, 3);
        assert_eq!(overview.kpis.dropout_rate, Some(25.0));
        assert_eq!(overview.kpis.failure_rate, Some(25.0));
        assert_eq!(overview.top_programs.len(), 2);
        assert!(!pipeline.degraded_join);
    }

    #[test]
    fn courses_are_ranked_by_dropout_rate() {
        let data = datasets();
        let pipeline = Pipeline::new(&data, JoinKeys::Course, &Filter::default(), 0.5);
        let section = pipeline.enrollment(1);

        assert_eq!(section.top_courses.len(), 1);
        assert_eq!(section.top_courses.rows[0].key, vec!["Algebra"]);
        assert_eq!(
            section
                .status_by_program
                .find(&["P1", "Cancelado"])
                .map(|row| row.size),
            Some(1)
        );
    }

    #[test]
    fn ascending_order_lists_safest_courses_first() {
        let data = datasets();
        let pipeline = Pipeline::new(&data, JoinKeys::Course, &Filter::default(), 0.5);
        let courses = pipeline.top_courses(2, Direction::Ascending);

        assert_eq!(courses.rows[0].key, vec!["Calculo"]);
        assert_eq!(courses.rows[1].key, vec!["Algebra"]);
    }

    #[test]
    fn teaching_kpis_average_course_groups() {
        let data = datasets();
        let pipeline = Pipeline::new(&data, JoinKeys::Course, &Filter::default(), 0.5);
        let section = pipeline.teaching(10);

        assert_eq!(section.kpis.teachers, 2);
        assert_eq!(section.kpis.mean_group_size, Some(2.0));
        assert_eq!(section.kpis.mean_failure_rate, Some(25.0));
        assert_eq!(section.top_teachers.rows[0].key[0], "D2");
    }

    #[test]
    fn support_reasons_sorted_by_volume() {
        let data = datasets();
        let pipeline = Pipeline::new(&data, JoinKeys::Course, &Filter::default(), 0.5);
        let section = pipeline.support();

        assert_eq!(section.kpis.cases, 3);
        assert_eq!(section.reasons.rows[0].key, vec!["Plataforma"]);
        assert_eq!(section.kpis.avg_satisfaction, Some(4.0));
    }

    #[test]
    fn correlation_keeps_shared_segments() {
        let data = datasets();
        let pipeline = Pipeline::new(&data, JoinKeys::Course, &Filter::default(), 0.5);
        let section = pipeline.correlation().expect("same grouping");

        assert_eq!(section.segments.len(), 1);
        assert_eq!(section.segments.rows[0].key, vec!["S1", "F1", "P1"]);
        assert_eq!(section.response_vs_dropout, None);
    }

    #[test]
    fn summary_collects_headline_findings() {
        let data = datasets();
        let pipeline = Pipeline::new(&data, JoinKeys::Course, &Filter::default(), 0.5);
        let summary = pipeline.summary();

        assert_eq!(summary.top_dropout_programs.rows[0].key, vec!["P1"]);
        assert_eq!(
            summary
                .top_dropout_programs
                .value(&summary.top_dropout_programs.rows[0], metric::DROPOUT_RATE),
            Some(50.0)
        );
        assert_eq!(summary.top_reasons.rows[0].key, vec!["Plataforma"]);
        assert_eq!(summary.top_reasons.len(), 2);
        assert_eq!(summary.avg_response_hours, Some(34.0 / 3.0));
        assert_eq!(summary.avg_satisfaction, Some(4.0));
    }

    #[test]
    fn empty_selection_produces_empty_sections() {
        let data = datasets();
        let filter = Filter {
            programs: vec!["P9".to_string()],
            ..Filter::default()
        };
        let pipeline = Pipeline::new(&data, JoinKeys::Course, &filter, 0.5);

        let overview = pipeline.overview();
        assert_eq!(overview.kpis.enrollments, 0);
        assert_eq!(overview.kpis.dropout_rate, None);
        assert!(overview.top_programs.is_empty());
        assert!(pipeline.correlation().expect("same grouping").segments.is_empty());
    }

    #[test]
    fn total_course_mismatch_is_flagged() {
        let mut data = datasets();
        data.courses = vec![course("X1", "Otro", "D9")];
        let pipeline = Pipeline::new(&data, JoinKeys::Course, &Filter::default(), 0.5);
        assert!(pipeline.degraded_join);
        assert_eq!(pipeline.enrollments.len(), 4);
    }
}

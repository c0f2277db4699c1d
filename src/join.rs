use std::collections::HashMap;

use clap::ValueEnum;
use serde::Serialize;

use crate::classify::classify;
use crate::models::{CourseRecord, EnrichedEnrollment, EnrollmentRecord};

/// Columns used to match an enrollment with its course row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum JoinKeys {
    /// Course id only.
    #[default]
    Course,
    /// Course id, faculty and program.
    CourseFacultyProgram,
    /// Course id, semester, faculty and program.
    CourseSemesterFacultyProgram,
}

impl JoinKeys {
    fn uses_semester(self) -> bool {
        matches!(self, Self::CourseSemesterFacultyProgram)
    }

    fn uses_faculty_program(self) -> bool {
        !matches!(self, Self::Course)
    }
}

type Key<'a> = (&'a str, Option<&'a str>, Option<&'a str>, Option<&'a str>);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JoinStats {
    pub rows: usize,
    pub matched: usize,
}

impl JoinStats {
    pub fn unmatched(&self) -> usize {
        self.rows - self.matched
    }

    pub fn unmatched_share(&self) -> Option<f64> {
        if self.rows == 0 {
            None
        } else {
            Some(self.unmatched() as f64 / self.rows as f64)
        }
    }
}

#[derive(Debug, Clone)]
pub struct Joined<'a> {
    pub rows: Vec<EnrichedEnrollment<'a>>,
    pub stats: JoinStats,
}

/// Left-joins enrollments to courses. Output order and cardinality follow
/// `enrollments`; when several course rows share a key the first one wins.
pub fn join<'a>(
    enrollments: &'a [EnrollmentRecord],
    courses: &'a [CourseRecord],
    keys: JoinKeys,
) -> Joined<'a> {
    let mut index: HashMap<Key<'a>, &'a CourseRecord> = HashMap::with_capacity(courses.len());

    for course in courses {
        let semester = if keys.uses_semester() {
            match course.semester.as_deref() {
                Some(semester) => Some(semester),
                None => continue,
            }
        } else {
            None
        };
        let key = course_key(keys, &course.course_id, semester, &course.faculty, &course.program);
        index.entry(key).or_insert(course);
    }

    let mut stats = JoinStats {
        rows: enrollments.len(),
        matched: 0,
    };

    let rows = enrollments
        .iter()
        .map(|enrollment| {
            let semester = keys.uses_semester().then_some(enrollment.semester.as_str());
            let key = course_key(
                keys,
                &enrollment.course_id,
                semester,
                &enrollment.faculty,
                &enrollment.program,
            );
            let course = index.get(&key).copied();
            if course.is_some() {
                stats.matched += 1;
            }

            EnrichedEnrollment {
                enrollment,
                course,
                flags: classify(enrollment.status().as_ref()),
            }
        })
        .collect();

    tracing::debug!(
        rows = stats.rows,
        matched = stats.matched,
        ?keys,
        "joined enrollments with courses"
    );

    Joined { rows, stats }
}

fn course_key<'a>(
    keys: JoinKeys,
    course_id: &'a str,
    semester: Option<&'a str>,
    faculty: &'a str,
    program: &'a str,
) -> Key<'a> {
    if keys.uses_faculty_program() {
        (course_id, semester, Some(faculty), Some(program))
    } else {
        (course_id, semester, None, None)
    }
}

/// Warns when the join left too many enrollments without a course.
/// Returns `true` when the result looks degraded.
pub fn check_null_rate(stats: &JoinStats, max_unmatched_share: f64) -> bool {
    let Some(share) = stats.unmatched_share() else {
        return false;
    };

    if stats.matched == 0 {
        tracing::warn!(
            rows = stats.rows,
            "no enrollment matched a course row; check the join keys and the course file"
        );
        return true;
    }

    if share > max_unmatched_share {
        tracing::warn!(
            rows = stats.rows,
            unmatched = stats.unmatched(),
            share = %format!("{:.1}%", share * 100.0),
            "many enrollments have no matching course row"
        );
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn enrollment(course_id: &str, program: &str, status: &str) -> EnrollmentRecord {
        EnrollmentRecord {
            student_id: "S1".to_string(),
            course_id: course_id.to_string(),
            program: program.to_string(),
            faculty: "F1".to_string(),
            modality: "AMV".to_string(),
            sub_period: "A".to_string(),
            semester: "2024-1".to_string(),
            academic_status: (!status.is_empty()).then(|| status.to_string()),
            final_grade: Some(3.5),
        }
    }

    fn course(course_id: &str, name: &str, program: &str) -> CourseRecord {
        CourseRecord {
            course_id: course_id.to_string(),
            course_name: name.to_string(),
            teacher_id: "D1".to_string(),
            faculty: "F1".to_string(),
            program: program.to_string(),
            teacher_seniority_semesters: Some(4),
            semester: None,
        }
    }

    #[test]
    fn keeps_unmatched_rows_with_empty_course() {
        let enrollments = vec![enrollment("C1", "P1", "Passed"), enrollment("C9", "P1", "Failed")];
        let courses = vec![course("C1", "Algebra", "P1")];

        let joined = join(&enrollments, &courses, JoinKeys::Course);
        assert_eq!(joined.rows.len(), 2);
        assert_eq!(joined.rows[0].course.map(|c| c.course_name.as_str()), Some("Algebra"));
        assert!(joined.rows[1].course.is_none());
        assert!(joined.rows[1].flags.is_failure);
        assert_eq!(joined.stats.unmatched(), 1);
    }

    #[test]
    fn duplicate_course_rows_do_not_fan_out() {
        let enrollments = vec![enrollment("C1", "P1", "Passed")];
        let courses = vec![course("C1", "First", "P1"), course("C1", "Second", "P2")];

        let joined = join(&enrollments, &courses, JoinKeys::Course);
        assert_eq!(joined.rows.len(), 1);
        assert_eq!(joined.rows[0].course.map(|c| c.course_name.as_str()), Some("First"));
    }

    #[test]
    fn faculty_program_keys_require_matching_program() {
        let enrollments = vec![enrollment("C1", "P2", "Passed")];
        let courses = vec![course("C1", "First", "P1"), course("C1", "Second", "P2")];

        let joined = join(&enrollments, &courses, JoinKeys::CourseFacultyProgram);
        assert_eq!(joined.rows[0].course.map(|c| c.course_name.as_str()), Some("Second"));
    }

    #[test]
    fn semester_keys_skip_courses_without_semester() {
        let enrollments = vec![enrollment("C1", "P1", "Passed")];
        let mut dated = course("C1", "Dated", "P1");
        dated.semester = Some("2024-1".to_string());
        let courses = vec![course("C1", "Undated", "P1"), dated];

        let joined = join(&enrollments, &courses, JoinKeys::CourseSemesterFacultyProgram);
        assert_eq!(joined.rows[0].course.map(|c| c.course_name.as_str()), Some("Dated"));
    }

    #[test]
    fn null_rate_check_flags_total_mismatch() {
        let stats = JoinStats { rows: 4, matched: 0 };
        assert!(check_null_rate(&stats, 0.5));
        let stats = JoinStats { rows: 4, matched: 3 };
        assert!(!check_null_rate(&stats, 0.5));
        assert!(!check_null_rate(&JoinStats::default(), 0.5));
    }

    #[test]
    fn null_rate_check_warns_above_threshold() {
        assert!(check_null_rate(&JoinStats { rows: 4, matched: 1 }, 0.5));
        assert!(check_null_rate(&JoinStats { rows: 10, matched: 8 }, 0.1));
    }

    #[test]
    fn null_rate_at_threshold_is_accepted() {
        assert!(!check_null_rate(&JoinStats { rows: 4, matched: 2 }, 0.5));
        assert!(!check_null_rate(&JoinStats { rows: 4, matched: 3 }, 0.25));
    }

    proptest! {
        #[test]
        fn join_preserves_enrollment_cardinality(
            enrolled in prop::collection::vec(0u8..6, 0..40),
            offered in prop::collection::vec(0u8..6, 0..12),
        ) {
            let enrollments: Vec<_> = enrolled
                .iter()
                .map(|id| enrollment(&format!("C{id}"), "P1", "Passed"))
                .collect();
            let courses: Vec<_> = offered
                .iter()
                .map(|id| course(&format!("C{id}"), "Course", "P1"))
                .collect();

            for keys in [JoinKeys::Course, JoinKeys::CourseFacultyProgram] {
                let joined = join(&enrollments, &courses, keys);
                prop_assert_eq!(joined.rows.len(), enrollments.len());
                prop_assert!(joined.stats.matched <= joined.stats.rows);
            }
        }
    }
}

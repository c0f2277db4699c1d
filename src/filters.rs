use serde::Serialize;

use crate::models::{CourseRecord, EnrichedEnrollment, SupportCase};

/// Restricts the datasets to selected values. An empty selection keeps
/// every value, matching a multiselect with everything ticked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Filter {
    pub semesters: Vec<String>,
    pub faculties: Vec<String>,
    pub programs: Vec<String>,
    pub modalities: Vec<String>,
    pub regions: Vec<String>,
}

fn allows(selection: &[String], value: &str) -> bool {
    selection.is_empty() || selection.iter().any(|selected| selected == value)
}

impl Filter {
    pub fn is_unrestricted(&self) -> bool {
        self.semesters.is_empty()
            && self.faculties.is_empty()
            && self.programs.is_empty()
            && self.modalities.is_empty()
            && self.regions.is_empty()
    }

    /// Regions do not apply to enrollments.
    pub fn allows_enrollment(&self, row: &EnrichedEnrollment<'_>) -> bool {
        let enrollment = row.enrollment;
        allows(&self.semesters, &enrollment.semester)
            && allows(&self.faculties, &enrollment.faculty)
            && allows(&self.programs, &enrollment.program)
            && allows(&self.modalities, &enrollment.modality)
    }

    /// Modalities do not apply to support cases.
    pub fn allows_support_case(&self, case: &SupportCase) -> bool {
        allows(&self.semesters, &case.semester)
            && allows(&self.faculties, &case.faculty)
            && allows(&self.programs, &case.program)
            && allows(&self.regions, &case.region)
    }

    /// Courses without a semester pass any semester selection.
    pub fn allows_course(&self, course: &CourseRecord) -> bool {
        course
            .semester
            .as_deref()
            .map_or(true, |semester| allows(&self.semesters, semester))
            && allows(&self.faculties, &course.faculty)
            && allows(&self.programs, &course.program)
    }

    pub fn enrollments<'a>(&self, rows: Vec<EnrichedEnrollment<'a>>) -> Vec<EnrichedEnrollment<'a>> {
        rows.into_iter()
            .filter(|row| self.allows_enrollment(row))
            .collect()
    }

    pub fn support_cases<'a>(&self, cases: &'a [SupportCase]) -> Vec<&'a SupportCase> {
        cases
            .iter()
            .filter(|case| self.allows_support_case(case))
            .collect()
    }

    pub fn courses<'a>(&self, courses: &'a [CourseRecord]) -> Vec<&'a CourseRecord> {
        courses
            .iter()
            .filter(|course| self.allows_course(course))
            .collect()
    }

    /// Human-readable summary for report headers.
    pub fn describe(&self) -> String {
        if self.is_unrestricted() {
            return "all records".to_string();
        }

        let parts: Vec<String> = [
            ("semester", &self.semesters),
            ("faculty", &self.faculties),
            ("program", &self.programs),
            ("modality", &self.modalities),
            ("region", &self.regions),
        ]
        .into_iter()
        .filter(|(_, selection)| !selection.is_empty())
        .map(|(name, selection)| format!("{name} in [{}]", selection.join(", ")))
        .collect();

        parts.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::models::EnrollmentRecord;

    fn enrollment(semester: &str, modality: &str) -> EnrollmentRecord {
        EnrollmentRecord {
            student_id: "S1".to_string(),
            course_id: "C1".to_string(),
            program: "P1".to_string(),
            faculty: "F1".to_string(),
            modality: modality.to_string(),
            sub_period: "A".to_string(),
            semester: semester.to_string(),
            academic_status: Some("Aprobado".to_string()),
            final_grade: None,
        }
    }

    fn support_case(semester: &str, region: &str) -> SupportCase {
        SupportCase {
            case_id: "K1".to_string(),
            semester: semester.to_string(),
            faculty: "F1".to_string(),
            program: "P1".to_string(),
            region: region.to_string(),
            reason: "Acceso".to_string(),
            attention_type: "Correo".to_string(),
            response_time_hours: Some(2.0),
            student_satisfaction: Some(5.0),
        }
    }

    #[test]
    fn empty_filter_keeps_everything() {
        let filter = Filter::default();
        let cases = vec![support_case("2024-1", "Norte"), support_case("2024-2", "Sur")];
        assert_eq!(filter.support_cases(&cases).len(), 2);
        assert_eq!(filter.describe(), "all records");
    }

    #[test]
    fn semester_selection_applies_to_every_dataset() {
        let filter = Filter {
            semesters: vec!["2024-2".to_string()],
            ..Filter::default()
        };
        let records = vec![enrollment("2024-1", "AMV"), enrollment("2024-2", "APV")];
        let rows = records
            .iter()
            .map(|enrollment| EnrichedEnrollment {
                enrollment,
                course: None,
                flags: classify(enrollment.status().as_ref()),
            })
            .collect();
        let kept = filter.enrollments(rows);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].enrollment.semester, "2024-2");

        let cases = vec![support_case("2024-1", "Norte"), support_case("2024-2", "Sur")];
        assert_eq!(filter.support_cases(&cases).len(), 1);
        assert_eq!(filter.describe(), "semester in [2024-2]");
    }

    #[test]
    fn region_does_not_restrict_enrollments() {
        let filter = Filter {
            regions: vec!["Norte".to_string()],
            ..Filter::default()
        };
        let record = enrollment("2024-1", "AMV");
        let row = EnrichedEnrollment {
            enrollment: &record,
            course: None,
            flags: classify(record.status().as_ref()),
        };
        assert!(filter.allows_enrollment(&row));
        assert!(!filter.allows_support_case(&support_case("2024-1", "Sur")));
    }
}

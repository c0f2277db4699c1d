use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

/// Academic status of a single enrollment.
///
/// Labels are matched exactly. The unit's cleaned exports use Spanish labels,
/// so both vocabularies map onto the same variants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum AcademicStatus {
    Enrolled,
    Passed,
    Failed,
    Cancelled,
    Other(String),
}

impl AcademicStatus {
    /// Parses a status label. An empty label is a missing status.
    pub fn from_label(label: &str) -> Option<Self> {
        let status = match label {
            "" => return None,
            "Enrolled" | "Matriculado" => Self::Enrolled,
            "Passed" | "Aprobado" => Self::Passed,
            "Failed" | "Reprobado" => Self::Failed,
            "Cancelled" | "Cancelado" => Self::Cancelled,
            other => Self::Other(other.to_string()),
        };
        Some(status)
    }
}

fn non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|label| !label.is_empty()))
}

/// Accepts `6` as well as the `6.0` that float-typed exports write.
fn whole_number<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(value) = Option::<f64>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if value.fract() != 0.0 || value < f64::from(i32::MIN) || value > f64::from(i32::MAX) {
        return Err(D::Error::custom(format!("expected a whole number, found {value}")));
    }
    Ok(Some(value as i32))
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EnrollmentRecord {
    #[serde(rename = "id_estudiante", alias = "student_id")]
    pub student_id: String,
    #[serde(rename = "id_curso", alias = "course_id")]
    pub course_id: String,
    #[serde(rename = "programa", alias = "program")]
    pub program: String,
    #[serde(rename = "facultad", alias = "faculty")]
    pub faculty: String,
    #[serde(rename = "modalidad", alias = "modality")]
    pub modality: String,
    #[serde(rename = "subperiodo", alias = "sub_period")]
    pub sub_period: String,
    #[serde(rename = "semestre", alias = "semester")]
    pub semester: String,
    /// Status label as written in the source data.
    #[serde(
        rename = "estado_academico",
        alias = "academic_status",
        default,
        deserialize_with = "non_empty"
    )]
    pub academic_status: Option<String>,
    #[serde(rename = "nota_final", alias = "final_grade", default)]
    pub final_grade: Option<f64>,
}

impl EnrollmentRecord {
    pub fn status(&self) -> Option<AcademicStatus> {
        self.academic_status.as_deref().and_then(AcademicStatus::from_label)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CourseRecord {
    #[serde(rename = "id_curso", alias = "course_id")]
    pub course_id: String,
    #[serde(rename = "nombre_curso", alias = "course_name")]
    pub course_name: String,
    #[serde(rename = "id_docente", alias = "teacher_id")]
    pub teacher_id: String,
    #[serde(rename = "facultad", alias = "faculty")]
    pub faculty: String,
    #[serde(rename = "programa", alias = "program")]
    pub program: String,
    #[serde(
        rename = "antiguedad_docente_semestres",
        alias = "teacher_seniority_semesters",
        default,
        deserialize_with = "whole_number"
    )]
    pub teacher_seniority_semesters: Option<i32>,
    #[serde(rename = "semestre", alias = "semester", default)]
    pub semester: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SupportCase {
    #[serde(rename = "id_caso", alias = "case_id")]
    pub case_id: String,
    #[serde(rename = "semestre", alias = "semester")]
    pub semester: String,
    #[serde(rename = "facultad", alias = "faculty")]
    pub faculty: String,
    #[serde(rename = "programa", alias = "program")]
    pub program: String,
    pub region: String,
    #[serde(rename = "motivo", alias = "reason")]
    pub reason: String,
    #[serde(rename = "tipo_atencion", alias = "attention_type")]
    pub attention_type: String,
    #[serde(rename = "tiempo_respuesta_horas", alias = "response_time_hours", default)]
    pub response_time_hours: Option<f64>,
    #[serde(rename = "satisfaccion_estudiante", alias = "student_satisfaction", default)]
    pub student_satisfaction: Option<f64>,
}

/// Derived outcome flags for one enrollment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusFlags {
    pub is_dropout: bool,
    pub is_failure: bool,
    pub is_dropout_or_failure: bool,
}

/// An enrollment joined with its course row, borrowing from the loaded snapshot.
#[derive(Debug, Clone, Copy)]
pub struct EnrichedEnrollment<'a> {
    pub enrollment: &'a EnrollmentRecord,
    pub course: Option<&'a CourseRecord>,
    pub flags: StatusFlags,
}

/// The three datasets of one snapshot. Read-only once loaded.
#[derive(Debug, Clone, Default)]
pub struct Datasets {
    pub enrollments: Vec<EnrollmentRecord>,
    pub courses: Vec<CourseRecord>,
    pub support_cases: Vec<SupportCase>,
}

impl Datasets {
    pub fn is_empty(&self) -> bool {
        self.enrollments.is_empty() && self.courses.is_empty() && self.support_cases.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_label_vocabularies() {
        assert_eq!(
            AcademicStatus::from_label("Cancelado"),
            Some(AcademicStatus::Cancelled)
        );
        assert_eq!(
            AcademicStatus::from_label("Cancelled"),
            Some(AcademicStatus::Cancelled)
        );
        assert_eq!(
            AcademicStatus::from_label("Reprobado"),
            Some(AcademicStatus::Failed)
        );
        assert_eq!(AcademicStatus::from_label(""), None);
    }

    #[test]
    fn label_match_is_exact() {
        assert_eq!(
            AcademicStatus::from_label("cancelado"),
            Some(AcademicStatus::Other("cancelado".to_string()))
        );
    }
    #[test]
    fn record_keeps_source_label_and_parses_status() {
        let record = EnrollmentRecord {
            student_id: "E1".to_string(),
            course_id: "C1".to_string(),
            program: "P1".to_string(),
            faculty: "F1".to_string(),
            modality: "AMV".to_string(),
            sub_period: "A".to_string(),
            semester: "2024-1".to_string(),
            academic_status: Some("Cancelado".to_string()),
            final_grade: None,
        };
        assert_eq!(record.academic_status.as_deref(), Some("Cancelado"));
        assert_eq!(record.status(), Some(AcademicStatus::Cancelled));
    }
}

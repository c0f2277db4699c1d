use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::de::DeserializeOwned;

use crate::models::{CourseRecord, Datasets, EnrollmentRecord, SupportCase};

pub const ENROLLMENTS_FILE: &str = "matriculaslimpias.csv";
pub const COURSES_FILE: &str = "docenteslimpios.csv";
pub const SUPPORT_FILE: &str = "soporte_atenciones_focus.csv";

/// Locations of the three CSV exports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFiles {
    pub enrollments: PathBuf,
    pub courses: PathBuf,
    pub support_cases: PathBuf,
}

impl DataFiles {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            enrollments: dir.join(ENROLLMENTS_FILE),
            courses: dir.join(COURSES_FILE),
            support_cases: dir.join(SUPPORT_FILE),
        }
    }
}

fn read_rows<T: DeserializeOwned, R: Read>(reader: R) -> anyhow::Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut rows = Vec::new();

    for (index, result) in reader.deserialize::<T>().enumerate() {
        let row = result.with_context(|| format!("invalid data row {}", index + 1))?;
        rows.push(row);
    }

    Ok(rows)
}

pub fn read_enrollments<R: Read>(reader: R) -> anyhow::Result<Vec<EnrollmentRecord>> {
    read_rows(reader)
}

pub fn read_courses<R: Read>(reader: R) -> anyhow::Result<Vec<CourseRecord>> {
    read_rows(reader)
}

pub fn read_support_cases<R: Read>(reader: R) -> anyhow::Result<Vec<SupportCase>> {
    let cases: Vec<SupportCase> = read_rows(reader)?;

    for (index, case) in cases.iter().enumerate() {
        if let Some(satisfaction) = case.student_satisfaction {
            if !(1.0..=5.0).contains(&satisfaction) {
                bail!(
                    "data row {}: satisfaction {satisfaction} is outside 1-5 (case {})",
                    index + 1,
                    case.case_id
                );
            }
        }
        if let Some(hours) = case.response_time_hours {
            if hours < 0.0 || !hours.is_finite() {
                bail!(
                    "data row {}: response time {hours} is not a valid number of hours (case {})",
                    index + 1,
                    case.case_id
                );
            }
        }
    }

    Ok(cases)
}

fn open(path: &Path) -> anyhow::Result<std::fs::File> {
    std::fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))
}

pub fn load_files(files: &DataFiles) -> anyhow::Result<Datasets> {
    let enrollments = read_enrollments(open(&files.enrollments)?)
        .with_context(|| format!("failed to read {}", files.enrollments.display()))?;
    let courses = read_courses(open(&files.courses)?)
        .with_context(|| format!("failed to read {}", files.courses.display()))?;
    let support_cases = read_support_cases(open(&files.support_cases)?)
        .with_context(|| format!("failed to read {}", files.support_cases.display()))?;

    tracing::info!(
        enrollments = enrollments.len(),
        courses = courses.len(),
        support_cases = support_cases.len(),
        "loaded CSV datasets"
    );

    Ok(Datasets {
        enrollments,
        courses,
        support_cases,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AcademicStatus;

    #[test]
    fn reads_unit_export_headers() {
        let data = "\
id_estudiante,id_curso,programa,facultad,modalidad,subperiodo,semestre,estado_academico,nota_final
E1,C1,Sistemas,Ingenierias,AMV,A,2024-1,Cancelado,
E2,C1,Sistemas,Ingenierias,AMV,A,2024-1,Aprobado,4.2
";
        let rows = read_enrollments(data.as_bytes()).expect("valid csv");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].academic_status.as_deref(), Some("Cancelado"));
        assert_eq!(rows[0].status(), Some(AcademicStatus::Cancelled));
        assert_eq!(rows[0].final_grade, None);
        assert_eq!(rows[1].final_grade, Some(4.2));
    }

    #[test]
    fn reads_english_headers_and_missing_status() {
        let data = "\
student_id,course_id,program,faculty,modality,sub_period,semester,academic_status,final_grade
E1,C1,P1,F1,APV,B,2024-2,,3.0
";
        let rows = read_enrollments(data.as_bytes()).expect("valid csv");
        assert_eq!(rows[0].academic_status, None);
        assert_eq!(rows[0].sub_period, "B");
    }

    #[test]
    fn course_semester_column_is_optional() {
        let data = "\
id_curso,nombre_curso,id_docente,facultad,programa,antiguedad_docente_semestres
C1,Algebra,D1,Ingenierias,Sistemas,6
";
        let rows = read_courses(data.as_bytes()).expect("valid csv");
        assert_eq!(rows[0].teacher_seniority_semesters, Some(6));
        assert_eq!(rows[0].semester, None);
    }

    #[test]
    fn seniority_accepts_float_formatted_whole_numbers() {
        let data = "\
id_curso,nombre_curso,id_docente,facultad,programa,antiguedad_docente_semestres
C1,Algebra,D1,Ingenierias,Sistemas,6.0
C2,Calculo,D2,Ingenierias,Sistemas,
";
        let rows = read_courses(data.as_bytes()).expect("valid csv");
        assert_eq!(rows[0].teacher_seniority_semesters, Some(6));
        assert_eq!(rows[1].teacher_seniority_semesters, None);

        let fractional = "\
id_curso,nombre_curso,id_docente,facultad,programa,antiguedad_docente_semestres
C1,Algebra,D1,Ingenierias,Sistemas,6.5
";
        assert!(read_courses(fractional.as_bytes()).is_err());
    }

    #[test]
    fn rejects_out_of_range_satisfaction() {
        let data = "\
id_caso,semestre,facultad,programa,region,motivo,tipo_atencion,tiempo_respuesta_horas,satisfaccion_estudiante
K1,2024-1,F1,P1,Norte,Acceso,Ticket,4.5,4
K2,2024-1,F1,P1,Norte,Acceso,Ticket,2,9
";
        let err = read_support_cases(data.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("data row 2"));
    }

    #[test]
    fn missing_column_is_an_error() {
        let data = "id_curso,nombre_curso\nC1,Algebra\n";
        assert!(read_courses(data.as_bytes()).is_err());
    }

    #[test]
    fn data_files_default_to_export_names() {
        let files = DataFiles::in_dir(Path::new("/data"));
        assert_eq!(files.courses, Path::new("/data/docenteslimpios.csv"));
    }
}

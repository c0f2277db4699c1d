use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{CourseRecord, Datasets, EnrollmentRecord, SupportCase};

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub id: Uuid,
    pub imported_at: DateTime<Utc>,
    pub enrollments: i64,
    pub courses: i64,
    pub support_cases: i64,
}

pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Copies the three datasets into a new snapshot and returns its id.
pub async fn import_snapshot(pool: &PgPool, datasets: &Datasets) -> anyhow::Result<Uuid> {
    let snapshot_id = Uuid::new_v4();
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO uev_metrics.snapshots (id, imported_at)
        VALUES ($1, $2)
        "#,
    )
    .bind(snapshot_id)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?;

    for (position, row) in datasets.enrollments.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO uev_metrics.enrollments
            (snapshot_id, position, student_id, course_id, program, faculty, modality,
             sub_period, semester, academic_status, final_grade)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(snapshot_id)
        .bind(position as i64)
        .bind(&row.student_id)
        .bind(&row.course_id)
        .bind(&row.program)
        .bind(&row.faculty)
        .bind(&row.modality)
        .bind(&row.sub_period)
        .bind(&row.semester)
        .bind(&row.academic_status)
        .bind(row.final_grade)
        .execute(&mut *tx)
        .await?;
    }

    for (position, row) in datasets.courses.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO uev_metrics.courses
            (snapshot_id, position, course_id, course_name, teacher_id, faculty, program,
             teacher_seniority_semesters, semester)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(snapshot_id)
        .bind(position as i64)
        .bind(&row.course_id)
        .bind(&row.course_name)
        .bind(&row.teacher_id)
        .bind(&row.faculty)
        .bind(&row.program)
        .bind(row.teacher_seniority_semesters)
        .bind(&row.semester)
        .execute(&mut *tx)
        .await?;
    }

    for (position, row) in datasets.support_cases.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO uev_metrics.support_cases
            (snapshot_id, position, case_id, semester, faculty, program, region, reason,
             attention_type, response_time_hours, student_satisfaction)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(snapshot_id)
        .bind(position as i64)
        .bind(&row.case_id)
        .bind(&row.semester)
        .bind(&row.faculty)
        .bind(&row.program)
        .bind(&row.region)
        .bind(&row.reason)
        .bind(&row.attention_type)
        .bind(row.response_time_hours)
        .bind(row.student_satisfaction)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    tracing::info!(%snapshot_id, "imported snapshot");

    Ok(snapshot_id)
}

pub async fn list_snapshots(pool: &PgPool) -> anyhow::Result<Vec<Snapshot>> {
    let rows = sqlx::query(
        r#"
        SELECT s.id, s.imported_at,
               (SELECT COUNT(*) FROM uev_metrics.enrollments e WHERE e.snapshot_id = s.id) AS enrollments,
               (SELECT COUNT(*) FROM uev_metrics.courses c WHERE c.snapshot_id = s.id) AS courses,
               (SELECT COUNT(*) FROM uev_metrics.support_cases k WHERE k.snapshot_id = s.id) AS support_cases
        FROM uev_metrics.snapshots s
        ORDER BY s.imported_at DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut snapshots = Vec::new();
    for row in rows {
        snapshots.push(Snapshot {
            id: row.get("id"),
            imported_at: row.get("imported_at"),
            enrollments: row.get("enrollments"),
            courses: row.get("courses"),
            support_cases: row.get("support_cases"),
        });
    }

    Ok(snapshots)
}

pub async fn latest_snapshot(pool: &PgPool) -> anyhow::Result<Option<Uuid>> {
    let row = sqlx::query(
        "SELECT id FROM uev_metrics.snapshots ORDER BY imported_at DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| row.get("id")))
}

pub async fn fetch_datasets(pool: &PgPool, snapshot_id: Uuid) -> anyhow::Result<Datasets> {
    let enrollment_rows = sqlx::query(
        r#"
        SELECT student_id, course_id, program, faculty, modality, sub_period, semester,
               academic_status, final_grade
        FROM uev_metrics.enrollments
        WHERE snapshot_id = $1
        ORDER BY position
        "#,
    )
    .bind(snapshot_id)
    .fetch_all(pool)
    .await?;

    let mut enrollments = Vec::with_capacity(enrollment_rows.len());
    for row in enrollment_rows {
        enrollments.push(EnrollmentRecord {
            student_id: row.get("student_id"),
            course_id: row.get("course_id"),
            program: row.get("program"),
            faculty: row.get("faculty"),
            modality: row.get("modality"),
            sub_period: row.get("sub_period"),
            semester: row.get("semester"),
            academic_status: row.get("academic_status"),
            final_grade: row.get("final_grade"),
        });
    }

    let course_rows = sqlx::query(
        r#"
        SELECT course_id, course_name, teacher_id, faculty, program,
               teacher_seniority_semesters, semester
        FROM uev_metrics.courses
        WHERE snapshot_id = $1
        ORDER BY position
        "#,
    )
    .bind(snapshot_id)
    .fetch_all(pool)
    .await?;

    let mut courses = Vec::with_capacity(course_rows.len());
    for row in course_rows {
        courses.push(CourseRecord {
            course_id: row.get("course_id"),
            course_name: row.get("course_name"),
            teacher_id: row.get("teacher_id"),
            faculty: row.get("faculty"),
            program: row.get("program"),
            teacher_seniority_semesters: row.get("teacher_seniority_semesters"),
            semester: row.get("semester"),
        });
    }

    let case_rows = sqlx::query(
        r#"
        SELECT case_id, semester, faculty, program, region, reason, attention_type,
               response_time_hours, student_satisfaction
        FROM uev_metrics.support_cases
        WHERE snapshot_id = $1
        ORDER BY position
        "#,
    )
    .bind(snapshot_id)
    .fetch_all(pool)
    .await?;

    let mut support_cases = Vec::with_capacity(case_rows.len());
    for row in case_rows {
        support_cases.push(SupportCase {
            case_id: row.get("case_id"),
            semester: row.get("semester"),
            faculty: row.get("faculty"),
            program: row.get("program"),
            region: row.get("region"),
            reason: row.get("reason"),
            attention_type: row.get("attention_type"),
            response_time_hours: row.get("response_time_hours"),
            student_satisfaction: row.get("student_satisfaction"),
        });
    }

    tracing::info!(
        %snapshot_id,
        enrollments = enrollments.len(),
        courses = courses.len(),
        support_cases = support_cases.len(),
        "loaded snapshot from Postgres"
    );

    Ok(Datasets {
        enrollments,
        courses,
        support_cases,
    })
}

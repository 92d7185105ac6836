use chrono::{NaiveDate, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use crate::aggregate;
use crate::error::GradeError;
use crate::models::{Enrollment, EnrollmentStatus, EntryRow, EntryType, GradeEntryDto, NodeKind};
use crate::tree::{self, GradeTree};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let data_structures = Uuid::parse_str("7f1c3f40-4c1e-4a9b-9a57-02b85a1d6a11")?;
    let calculus = Uuid::parse_str("2a9456c8-6a1d-47d8-9a6e-5a0fb4c9e2b3")?;
    let physics = Uuid::parse_str("b3d1a7e2-8f04-4d11-bb1a-9c6f2e8d5a44")?;

    let enrollments = vec![
        (data_structures, "CS210", "Data Structures", 4, EnrollmentStatus::InProgress, None, None),
        (
            calculus,
            "MA105",
            "Calculus I",
            3,
            EnrollmentStatus::Completed,
            Some(8.0),
            NaiveDate::from_ymd_opt(2026, 1, 15),
        ),
        (
            physics,
            "PH101",
            "Physics I",
            4,
            EnrollmentStatus::Completed,
            Some(6.0),
            NaiveDate::from_ymd_opt(2026, 1, 20),
        ),
    ];

    for (id, code, name, credits, status, final_score, completed_at) in enrollments {
        sqlx::query(
            r#"
            INSERT INTO grade_tracker.enrollments
            (id, course_code, course_name, credits, status, final_score, gpa_value, letter_grade, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (course_code) DO UPDATE
            SET course_name = EXCLUDED.course_name, credits = EXCLUDED.credits
            "#,
        )
        .bind(id)
        .bind(code)
        .bind(name)
        .bind(credits)
        .bind(status.as_str())
        .bind(final_score)
        .bind(final_score.map(aggregate::to_scale4))
        .bind(final_score.map(|score| aggregate::letter_grade(score).to_string()))
        .bind(completed_at)
        .execute(pool)
        .await?;
    }

    // a small forest for the in-progress course: 40% process work, 60% final
    let process = Uuid::parse_str("5e2f8c10-93ab-4f64-8a01-7d2c4b6e9f55")?;
    let quiz1 = Uuid::parse_str("9c4d2e66-1b7f-4a38-b2d5-e80f6a3c7d21")?;
    let quiz2 = Uuid::parse_str("417aa9b3-5c2d-48e6-9f10-b36d8e2a4c77")?;
    let final_exam = Uuid::parse_str("d82b5f19-7e43-4c0a-a6b8-1f59c3d7e633")?;

    let entries = vec![
        (process, data_structures, None, "Process Assessment", 0.4, None, Some(8.0), 0),
        (quiz1, data_structures, Some(process), "Quiz 1", 0.5, Some(9.0), None, 0),
        (quiz2, data_structures, Some(process), "Quiz 2", 0.5, Some(7.0), None, 1),
        (final_exam, data_structures, None, "Final Exam", 0.6, Some(6.0), None, 1),
    ];

    for (id, enrollment_id, parent_id, name, weight, score, calculated, position) in entries {
        sqlx::query(
            r#"
            INSERT INTO grade_tracker.grade_entries
            (id, enrollment_id, parent_id, name, weight, score, calculated_score, entry_type, position)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(enrollment_id)
        .bind(parent_id)
        .bind(name)
        .bind(weight)
        .bind(score)
        .bind(calculated)
        .bind(EntryType::Component.as_str())
        .bind(position)
        .execute(pool)
        .await?;
    }

    Ok(())
}

fn enrollment_from_row(row: &sqlx::postgres::PgRow) -> Result<Enrollment, GradeError> {
    let status_raw: String = row.get("status");
    let status = EnrollmentStatus::parse(&status_raw).ok_or_else(|| {
        GradeError::Validation(format!("unknown enrollment status {status_raw:?}"))
    })?;
    Ok(Enrollment {
        id: row.get("id"),
        course_code: row.get("course_code"),
        course_name: row.get("course_name"),
        credits: row.get("credits"),
        status,
        final_score: row.get("final_score"),
        gpa_value: row.get("gpa_value"),
        letter_grade: row.get("letter_grade"),
        completed_at: row.get("completed_at"),
    })
}

const ENROLLMENT_COLUMNS: &str =
    "id, course_code, course_name, credits, status, final_score, gpa_value, letter_grade, completed_at";

pub async fn fetch_enrollment(pool: &PgPool, id: Uuid) -> Result<Enrollment, GradeError> {
    let query = format!(
        "SELECT {ENROLLMENT_COLUMNS} FROM grade_tracker.enrollments WHERE id = $1"
    );
    let row = sqlx::query(&query).bind(id).fetch_optional(pool).await?;
    let row = row.ok_or(GradeError::NotFound {
        kind: "enrollment",
        id,
    })?;
    enrollment_from_row(&row)
}

pub async fn fetch_enrollments(pool: &PgPool) -> Result<Vec<Enrollment>, GradeError> {
    let query = format!(
        "SELECT {ENROLLMENT_COLUMNS} FROM grade_tracker.enrollments ORDER BY course_code"
    );
    let rows = sqlx::query(&query).fetch_all(pool).await?;
    let mut enrollments = Vec::with_capacity(rows.len());
    for row in rows {
        enrollments.push(enrollment_from_row(&row)?);
    }
    Ok(enrollments)
}

// An enrollment with no entries yet is a valid empty forest; only a missing
// enrollment is an error.
pub async fn load_tree(pool: &PgPool, enrollment_id: Uuid) -> Result<GradeTree, GradeError> {
    let exists = sqlx::query("SELECT id FROM grade_tracker.enrollments WHERE id = $1")
        .bind(enrollment_id)
        .fetch_optional(pool)
        .await?;
    if exists.is_none() {
        return Err(GradeError::NotFound {
            kind: "enrollment",
            id: enrollment_id,
        });
    }

    let rows = sqlx::query(
        "SELECT id, parent_id, name, weight, score, calculated_score, entry_type \
         FROM grade_tracker.grade_entries \
         WHERE enrollment_id = $1 \
         ORDER BY position, id",
    )
    .bind(enrollment_id)
    .fetch_all(pool)
    .await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let entry_type_raw: String = row.get("entry_type");
        let entry_type = EntryType::parse(&entry_type_raw).ok_or_else(|| {
            GradeError::Validation(format!("unknown entry type {entry_type_raw:?}"))
        })?;
        entries.push(EntryRow {
            id: row.get("id"),
            parent_id: row.get("parent_id"),
            name: row.get("name"),
            weight: row.get("weight"),
            score: row.get("score"),
            calculated_score: row.get("calculated_score"),
            entry_type,
        });
    }

    debug!(%enrollment_id, entries = entries.len(), "loaded grade forest");
    Ok(GradeTree::from_rows(enrollment_id, entries))
}

pub async fn add_root(
    pool: &PgPool,
    enrollment_id: Uuid,
    name: &str,
    weight: Option<f64>,
) -> Result<GradeEntryDto, GradeError> {
    let mut tree = load_tree(pool, enrollment_id).await?;
    let weight = resolve_weight(&tree, None, weight)?;
    let id = tree.add_root(name, weight)?;

    let mut tx = pool.begin().await?;
    insert_entry(&mut tx, &tree, id).await?;
    tx.commit().await?;

    info!(%enrollment_id, component = %id, "added root component");
    tree.dto(id).ok_or(GradeError::NotFound {
        kind: "grade entry",
        id,
    })
}

pub async fn add_child(
    pool: &PgPool,
    parent_id: Uuid,
    name: &str,
    weight: Option<f64>,
) -> Result<GradeEntryDto, GradeError> {
    let enrollment_id = entry_enrollment(pool, parent_id).await?;
    let mut tree = load_tree(pool, enrollment_id).await?;
    let weight = resolve_weight(&tree, Some(parent_id), weight)?;
    let (child_id, dirty) = tree.add_child(parent_id, name, weight)?;

    let mut tx = pool.begin().await?;
    insert_entry(&mut tx, &tree, child_id).await?;
    persist_recomputed(&mut tx, &tree, &dirty).await?;
    tx.commit().await?;

    info!(parent = %parent_id, component = %child_id, "added child component");
    tree.dto(child_id).ok_or(GradeError::NotFound {
        kind: "grade entry",
        id: child_id,
    })
}

pub async fn set_leaf_score(
    pool: &PgPool,
    node_id: Uuid,
    score: f64,
) -> Result<GradeEntryDto, GradeError> {
    let enrollment_id = entry_enrollment(pool, node_id).await?;
    let mut tree = load_tree(pool, enrollment_id).await?;
    let dirty = tree.set_leaf_score(node_id, score)?;

    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE grade_tracker.grade_entries SET score = $2 WHERE id = $1")
        .bind(node_id)
        .bind(score)
        .execute(&mut *tx)
        .await?;
    persist_recomputed(&mut tx, &tree, &dirty).await?;
    tx.commit().await?;

    info!(component = %node_id, score, "entered leaf score");
    tree.dto(node_id).ok_or(GradeError::NotFound {
        kind: "grade entry",
        id: node_id,
    })
}

pub async fn delete_node(pool: &PgPool, node_id: Uuid) -> Result<(), GradeError> {
    let enrollment_id = entry_enrollment(pool, node_id).await?;
    let mut tree = load_tree(pool, enrollment_id).await?;
    let removal = tree.remove_subtree(node_id)?;

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM grade_tracker.grade_entries WHERE id = ANY($1)")
        .bind(&removal.ids)
        .execute(&mut *tx)
        .await?;
    if let Some(parent_id) = removal.reverted_parent {
        sqlx::query(
            "UPDATE grade_tracker.grade_entries SET score = NULL, calculated_score = NULL WHERE id = $1",
        )
        .bind(parent_id)
        .execute(&mut *tx)
        .await?;
    }
    persist_recomputed(&mut tx, &tree, &removal.dirty).await?;
    tx.commit().await?;

    info!(component = %node_id, removed = removal.ids.len(), "deleted component subtree");
    Ok(())
}

// The completion workflow is the only writer of the authoritative final
// score. It freezes the current estimate; nothing else ever copies the
// estimate into the enrollment.
pub async fn complete_enrollment(
    pool: &PgPool,
    enrollment_id: Uuid,
) -> Result<Enrollment, GradeError> {
    let enrollment = fetch_enrollment(pool, enrollment_id).await?;
    match enrollment.status {
        EnrollmentStatus::Completed => {
            return Err(GradeError::InvalidOperation(format!(
                "enrollment {enrollment_id} is already completed"
            )))
        }
        EnrollmentStatus::Withdrawn => {
            return Err(GradeError::InvalidOperation(format!(
                "enrollment {enrollment_id} was withdrawn"
            )))
        }
        EnrollmentStatus::InProgress => {}
    }

    let tree = load_tree(pool, enrollment_id).await?;
    let nothing_scored = tree
        .roots()
        .iter()
        .all(|&root| aggregate::compute_score(&tree, root).is_none());
    if nothing_scored {
        return Err(GradeError::InvalidOperation(format!(
            "enrollment {enrollment_id} has no scored components to finalize"
        )));
    }

    let final_score = aggregate::estimate_final_grade(&tree);
    let gpa_value = aggregate::to_scale4(final_score);
    let letter = aggregate::letter_grade(final_score);

    sqlx::query(
        "UPDATE grade_tracker.enrollments \
         SET status = $2, final_score = $3, gpa_value = $4, letter_grade = $5, completed_at = $6 \
         WHERE id = $1",
    )
    .bind(enrollment_id)
    .bind(EnrollmentStatus::Completed.as_str())
    .bind(final_score)
    .bind(gpa_value)
    .bind(letter)
    .bind(Utc::now().date_naive())
    .execute(pool)
    .await?;

    info!(%enrollment_id, final_score, letter, "completed enrollment");
    fetch_enrollment(pool, enrollment_id).await
}

pub async fn import_enrollments(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        course_code: String,
        course_name: String,
        credits: i32,
        status: Option<String>,
        final_score: Option<f64>,
        completed_at: Option<NaiveDate>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut upserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let status = match row.status.as_deref() {
            None | Some("") => EnrollmentStatus::InProgress,
            Some(raw) => EnrollmentStatus::parse(raw)
                .ok_or_else(|| anyhow::anyhow!("unknown status {raw:?} for {}", row.course_code))?,
        };
        if let Some(score) = row.final_score {
            tree::validate_score(score)?;
        }

        sqlx::query(
            r#"
            INSERT INTO grade_tracker.enrollments
            (id, course_code, course_name, credits, status, final_score, gpa_value, letter_grade, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (course_code) DO UPDATE
            SET course_name = EXCLUDED.course_name,
                credits = EXCLUDED.credits,
                status = EXCLUDED.status,
                final_score = EXCLUDED.final_score,
                gpa_value = EXCLUDED.gpa_value,
                letter_grade = EXCLUDED.letter_grade,
                completed_at = EXCLUDED.completed_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.course_code)
        .bind(&row.course_name)
        .bind(row.credits)
        .bind(status.as_str())
        .bind(row.final_score)
        .bind(row.final_score.map(aggregate::to_scale4))
        .bind(row.final_score.map(|score| aggregate::letter_grade(score).to_string()))
        .bind(row.completed_at)
        .execute(pool)
        .await?;

        upserted += 1;
    }

    Ok(upserted)
}

async fn entry_enrollment(pool: &PgPool, id: Uuid) -> Result<Uuid, GradeError> {
    let row = sqlx::query("SELECT enrollment_id FROM grade_tracker.grade_entries WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    let row = row.ok_or(GradeError::NotFound {
        kind: "grade entry",
        id,
    })?;
    Ok(row.get("enrollment_id"))
}

fn resolve_weight(
    tree: &GradeTree,
    parent: Option<Uuid>,
    weight: Option<f64>,
) -> Result<f64, GradeError> {
    match weight {
        Some(weight) => Ok(weight),
        // default to the unassigned share in this context
        None => {
            let remaining = tree.remaining_weight(parent)?;
            if remaining <= 0.0 {
                return Err(GradeError::Validation(
                    "sibling weights already total 1; pass a weight explicitly".to_string(),
                ));
            }
            Ok(remaining)
        }
    }
}

async fn insert_entry(
    tx: &mut Transaction<'_, Postgres>,
    tree: &GradeTree,
    id: Uuid,
) -> Result<(), GradeError> {
    let node = tree.get(id).ok_or(GradeError::NotFound {
        kind: "grade entry",
        id,
    })?;
    let score = match &node.kind {
        NodeKind::Leaf { score } => *score,
        NodeKind::Internal { .. } => None,
    };
    sqlx::query(
        r#"
        INSERT INTO grade_tracker.grade_entries
        (id, enrollment_id, parent_id, name, weight, score, entry_type, position)
        VALUES ($1, $2, $3, $4, $5, $6, $7,
            (SELECT COALESCE(MAX(position) + 1, 0)
             FROM grade_tracker.grade_entries
             WHERE enrollment_id = $2 AND parent_id IS NOT DISTINCT FROM $3))
        "#,
    )
    .bind(node.id)
    .bind(node.enrollment_id)
    .bind(node.parent_id)
    .bind(&node.name)
    .bind(node.weight)
    .bind(score)
    .bind(node.entry_type.as_str())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// Dirty ids are always internal nodes; nulling score here is what retires a
// stale entered score when a leaf gains its first child.
async fn persist_recomputed(
    tx: &mut Transaction<'_, Postgres>,
    tree: &GradeTree,
    dirty: &[Uuid],
) -> Result<(), GradeError> {
    for &id in dirty {
        let node = tree.get(id).ok_or(GradeError::NotFound {
            kind: "grade entry",
            id,
        })?;
        let calculated = match &node.kind {
            NodeKind::Internal { calculated, .. } => *calculated,
            NodeKind::Leaf { .. } => None,
        };
        sqlx::query(
            "UPDATE grade_tracker.grade_entries SET score = NULL, calculated_score = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(calculated)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

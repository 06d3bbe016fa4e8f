use sqlx::sqlite::SqliteRow;
use sqlx::types::Json;
use sqlx::{Row, SqlitePool};

use crate::models::record::{Fields, ReceiptRecord, RecordStatus};

/// Insert a validated receipt record
pub async fn insert_record(pool: &SqlitePool, record: &ReceiptRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO receipt_records (id, status, created_at, source_image_ref, fields)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(&record.id)
    .bind(record.status.to_string())
    .bind(record.created_at)
    .bind(record.source_image_ref.as_deref())
    .bind(Json(&record.fields))
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a record by ID
pub async fn get_record(pool: &SqlitePool, id: &str) -> Result<Option<ReceiptRecord>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, status, created_at, source_image_ref, fields
        FROM receipt_records
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(record_from_row).transpose()
}

/// List all records, oldest first
pub async fn list_records(pool: &SqlitePool) -> Result<Vec<ReceiptRecord>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT id, status, created_at, source_image_ref, fields
        FROM receipt_records
        ORDER BY created_at ASC, saved_at ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(record_from_row).collect()
}

/// Count stored records
pub async fn count_records(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let row = sqlx::query("SELECT COUNT(*) AS total FROM receipt_records")
        .fetch_one(pool)
        .await?;
    row.try_get("total")
}

fn record_from_row(row: &SqliteRow) -> Result<ReceiptRecord, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<RecordStatus>()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    let fields: Json<Fields> = row.try_get("fields")?;

    Ok(ReceiptRecord {
        id: row.try_get("id")?,
        status,
        created_at: row.try_get("created_at")?,
        source_image_ref: row.try_get("source_image_ref")?,
        fields: fields.0,
    })
}

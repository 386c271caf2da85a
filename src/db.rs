use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::stream::{self, StreamExt};
use sqlx::postgres::{PgListener, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::StoreError;
use crate::mapping::parse_timestamp;
use crate::models::{CareStatus, EvaluationRecord, NewEvaluation, RawEvaluation, RawTimestamp};
use crate::store::{ChangeFeed, RecordStore, SnapshotQuery};

/// Notification channel raised by the trigger on every statement touching
/// the evaluations table.
pub const CHANGE_CHANNEL: &str = "care_compliance_evaluations";

const SELECT_EVALUATIONS: &str = "SELECT id, assessor, bone_protection, \
     incontinence_care, notes, assessment_date, created_at, created_by \
     FROM care_compliance.evaluations \
     ORDER BY created_at DESC, seq DESC";

const SELECT_LATEST_EVALUATIONS: &str = "SELECT id, assessor, bone_protection, \
     incontinence_care, notes, assessment_date, created_at, created_by \
     FROM care_compliance.evaluations \
     ORDER BY created_at DESC, seq DESC \
     LIMIT $1";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// The shared evaluation collection in Postgres.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Inserts a validated payload. With a `source_key` the insert is skipped
    /// when that key already exists, and `None` is returned.
    async fn insert_document(
        &self,
        payload: &NewEvaluation,
        source_key: Option<&str>,
    ) -> Result<Option<String>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO care_compliance.evaluations
            (id, assessor, bone_protection, incontinence_care, notes,
             assessment_date, created_by, source_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (source_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&payload.assessor)
        .bind(payload.bone_protection.as_str())
        .bind(payload.incontinence_care.as_str())
        .bind(&payload.notes)
        .bind(payload.assessment_date)
        .bind(payload.created_by.as_deref())
        .bind(source_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| row.get("id")))
    }
}

fn document_from_row(row: &PgRow) -> Result<(String, RawEvaluation), sqlx::Error> {
    let assessment_date: Option<DateTime<Utc>> = row.try_get("assessment_date")?;
    let created_at: Option<DateTime<Utc>> = row.try_get("created_at")?;

    Ok((
        row.try_get("id")?,
        RawEvaluation {
            assessor: row.try_get("assessor")?,
            bone_protection: row.try_get("bone_protection")?,
            incontinence_care: row.try_get("incontinence_care")?,
            notes: row.try_get("notes")?,
            assessment_date: assessment_date.map(RawTimestamp::Timestamp),
            created_at: created_at.map(RawTimestamp::Timestamp),
            created_by: row.try_get("created_by")?,
        },
    ))
}

/// Turns one listener receive into a change-feed item. A lost connection is
/// reported as a change: notifications raised while it was down are gone, so
/// the subscriber has to refetch once the listener reconnects.
fn change_from(received: Result<Option<String>, sqlx::Error>) -> Result<(), StoreError> {
    match received {
        Ok(Some(operation)) => {
            tracing::trace!(%operation, "evaluations changed");
            Ok(())
        }
        Ok(None) => {
            tracing::warn!(
                channel = CHANGE_CHANNEL,
                "change listener lost its connection, reconnecting and refetching"
            );
            Ok(())
        }
        Err(err) => Err(StoreError::read(err)),
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn fetch(&self, query: SnapshotQuery) -> Result<Vec<EvaluationRecord>, StoreError> {
        let rows = match query {
            SnapshotQuery::All => sqlx::query(SELECT_EVALUATIONS).fetch_all(&self.pool).await,
            SnapshotQuery::Latest(limit) => {
                sqlx::query(SELECT_LATEST_EVALUATIONS)
                    .bind(i64::try_from(limit).unwrap_or(i64::MAX))
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(StoreError::read)?;

        let now = Utc::now();
        rows.iter()
            .map(|row| -> Result<EvaluationRecord, StoreError> {
                let (id, doc) = document_from_row(row).map_err(StoreError::read)?;
                Ok(EvaluationRecord::from_raw(id, &doc, now))
            })
            .collect()
    }

    async fn changes(&self) -> Result<ChangeFeed, StoreError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(StoreError::read)?;
        listener
            .listen(CHANGE_CHANNEL)
            .await
            .map_err(StoreError::read)?;
        tracing::debug!(channel = CHANGE_CHANNEL, "listening for evaluation changes");

        let feed = stream::unfold(listener, |mut listener| async move {
            let received = listener
                .try_recv()
                .await
                .map(|notification| notification.map(|n| n.payload().to_string()));
            Some((change_from(received), listener))
        });
        Ok(feed.boxed())
    }

    async fn insert(&self, payload: NewEvaluation) -> Result<String, StoreError> {
        let id = self
            .insert_document(&payload, None)
            .await
            .map_err(StoreError::write)?
            .ok_or_else(|| StoreError::write("insert returned no id"))?;
        tracing::info!(%id, assessor = %payload.assessor, "evaluation recorded");
        Ok(id)
    }

    async fn remove(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM care_compliance.evaluations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::write)?;

        if result.rows_affected() == 0 {
            tracing::debug!(%id, "delete of unknown evaluation treated as done");
        } else {
            tracing::info!(%id, "evaluation deleted");
        }
        Ok(())
    }
}

pub async fn seed(store: &PgStore) -> anyhow::Result<usize> {
    let evaluations = vec![
        (
            "seed-001",
            "Haruka Sato",
            CareStatus::Done,
            CareStatus::NotDone,
            "Heel protectors on, pad change overdue",
            (2025, 11, 4),
        ),
        (
            "seed-002",
            "Ken Ito",
            CareStatus::Na,
            CareStatus::Na,
            "Ambulatory, continent",
            (2025, 11, 18),
        ),
        (
            "seed-003",
            "Haruka Sato",
            CareStatus::Done,
            CareStatus::Done,
            "",
            (2025, 12, 2),
        ),
        (
            "seed-004",
            "Mina Kobayashi",
            CareStatus::NotDone,
            CareStatus::Done,
            "Air mattress requested",
            (2025, 12, 15),
        ),
        (
            "seed-005",
            "Ken Ito",
            CareStatus::Done,
            CareStatus::Done,
            "Repositioned every 2h",
            (2026, 1, 7),
        ),
    ];

    let mut inserted = 0usize;
    for (source_key, assessor, bone, incontinence, notes, (y, m, d)) in evaluations {
        let payload = NewEvaluation {
            assessor: assessor.to_string(),
            bone_protection: bone,
            incontinence_care: incontinence,
            notes: notes.to_string(),
            assessment_date: Utc
                .with_ymd_and_hms(y, m, d, 9, 0, 0)
                .single()
                .context("invalid seed date")?,
            created_by: Some("seed".to_string()),
        }
        .validated()?;

        if store.insert_document(&payload, Some(source_key)).await?.is_some() {
            inserted += 1;
        }
    }

    Ok(inserted)
}

pub async fn import_csv(store: &PgStore, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        assessor: String,
        bone_protection: String,
        incontinence_care: String,
        #[serde(default)]
        notes: Option<String>,
        assessment_date: String,
        #[serde(default)]
        created_by: Option<String>,
        #[serde(default)]
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let line = index + 2;
        let row = result.with_context(|| format!("malformed row at line {line}"))?;
        let assessment_date = parse_timestamp(&row.assessment_date)
            .with_context(|| format!("unreadable assessment_date at line {line}"))?;

        let payload = NewEvaluation {
            assessor: row.assessor,
            bone_protection: CareStatus::from_stored(Some(&row.bone_protection)),
            incontinence_care: CareStatus::from_stored(Some(&row.incontinence_care)),
            notes: row.notes.unwrap_or_default(),
            assessment_date,
            created_by: row.created_by,
        }
        .validated()
        .with_context(|| format!("invalid evaluation at line {line}"))?;

        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        if store
            .insert_document(&payload, Some(&source_key))
            .await?
            .is_some()
        {
            inserted += 1;
        }
    }

    tracing::info!(inserted, path = %csv_path.display(), "csv import finished");
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifications_are_changes() {
        assert_eq!(change_from(Ok(Some("INSERT".to_string()))), Ok(()));
        assert_eq!(change_from(Ok(Some("DELETE".to_string()))), Ok(()));
    }

    #[test]
    fn lost_connection_forces_a_refetch() {
        assert_eq!(change_from(Ok(None)), Ok(()));
    }

    #[test]
    fn ties_on_created_at_fall_back_to_insertion_order() {
        for query in [SELECT_EVALUATIONS, SELECT_LATEST_EVALUATIONS] {
            assert!(query.contains("ORDER BY created_at DESC, seq DESC"));
        }
        let migration = include_str!("../migrations/0001_evaluations.sql");
        assert!(migration.contains("seq BIGSERIAL NOT NULL"));
    }

    #[test]
    fn listener_errors_end_the_feed() {
        assert!(matches!(
            change_from(Err(sqlx::Error::PoolClosed)),
            Err(StoreError::Subscription(_))
        ));
    }
}

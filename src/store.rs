use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{PgPool, SqlitePool};
use thiserror::Error;
use tracing::info;

use crate::models::{
    ComplaintRecord, HealthRow, InspectionRecord, PermitRecord, PropertyHealth, Signal,
    StationRecord, ViolationRecord,
};

/// Store-layer errors. Detector and pipeline code wraps these with anyhow
/// context; `SchemaMissing` is only surfaced on the Postgres backend where
/// the schema is externally managed.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("output table {0} is missing; provision the schema or run init-db")]
    SchemaMissing(&'static str),

    #[error("unsupported database url (expected postgres:// or sqlite://): {0}")]
    UnsupportedUrl(String),

    #[error("{0} is only available on the sqlite dev backend")]
    DevBackendOnly(&'static str),

    #[error("failed to serialize signals for audit column: {0}")]
    Json(#[from] serde_json::Error),
}

const OUTPUT_TABLES: [&str; 3] = ["permit_signals", "property_signals", "property_health"];

/// Rewrite Postgres-style `$N` placeholders to SQLite's `?N` form.
///
/// Every statement in this module is authored with `$N`, and dollar signs
/// never appear in our SQL outside placeholders, so a plain character
/// substitution is sufficient. This is the only place dialect translation
/// happens; call sites never branch on backend.
fn sqlite_placeholders(sql: &str) -> String {
    sql.replace('$', "?")
}

/// One live connection pool to either backend. The pipeline holds the store
/// exclusively for the duration of a run; it neither opens nor closes the
/// pool it is given beyond `connect`.
pub enum Store {
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Store, StoreError> {
        if database_url.starts_with("postgres") {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?;
            Ok(Store::Postgres(pool))
        } else if database_url.starts_with("sqlite") {
            let options = SqliteConnectOptions::from_str(database_url)?
                .create_if_missing(true)
                .foreign_keys(true);
            // The pipeline is strictly sequential, and in-memory SQLite
            // databases are per-connection, so one connection is the pool.
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(options)
                .await?;
            Ok(Store::Sqlite(pool))
        } else {
            Err(StoreError::UnsupportedUrl(database_url.to_string()))
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Store::Postgres(_) => "postgres",
            Store::Sqlite(_) => "sqlite",
        }
    }

    async fn fetch_rows<T>(&self, sql: &str) -> Result<Vec<T>, StoreError>
    where
        T: Send
            + Unpin
            + for<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow>
            + for<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow>,
    {
        match self {
            Store::Postgres(pool) => Ok(sqlx::query_as::<_, T>(sql).fetch_all(pool).await?),
            Store::Sqlite(pool) => {
                let sql = sqlite_placeholders(sql);
                Ok(sqlx::query_as::<_, T>(&sql).fetch_all(pool).await?)
            }
        }
    }

    /// Ensure the three output tables exist. SQLite creates them with
    /// idempotent DDL; Postgres schema is externally managed, so each table
    /// is probed with a cheap select instead and a miss is an error.
    pub async fn ensure_output_tables(&self) -> Result<(), StoreError> {
        match self {
            Store::Postgres(pool) => {
                for table in OUTPUT_TABLES {
                    let probe = format!("SELECT 1 FROM {table} LIMIT 1");
                    if sqlx::query(&probe).fetch_optional(pool).await.is_err() {
                        return Err(StoreError::SchemaMissing(table));
                    }
                }
                Ok(())
            }
            Store::Sqlite(pool) => {
                for ddl in OUTPUT_DDL {
                    sqlx::query(ddl).execute(pool).await?;
                }
                Ok(())
            }
        }
    }

    /// Create the full dev schema (source tables included) on SQLite. On
    /// Postgres this only verifies the externally managed output tables.
    pub async fn init_db(&self) -> Result<(), StoreError> {
        if let Store::Sqlite(pool) = self {
            for ddl in SOURCE_DDL {
                sqlx::query(ddl).execute(pool).await?;
            }
            info!("created source tables");
        }
        self.ensure_output_tables().await
    }

    /// All addenda rows joined with their permit's parcel. Date-window and
    /// result filtering happens in the detectors so the SQL stays portable.
    pub async fn station_records(&self) -> Result<Vec<StationRecord>, StoreError> {
        self.fetch_rows(
            "SELECT CAST(a.id AS BIGINT) AS id, a.application_number AS permit_number, \
             a.station, a.review_results, a.start_date, a.finish_date, p.block, p.lot \
             FROM addenda a \
             JOIN permits p ON p.permit_number = a.application_number",
        )
        .await
    }

    pub async fn violations(&self) -> Result<Vec<ViolationRecord>, StoreError> {
        self.fetch_rows(
            "SELECT block, lot, status, nov_category_description FROM violations",
        )
        .await
    }

    pub async fn complaints(&self) -> Result<Vec<ComplaintRecord>, StoreError> {
        self.fetch_rows("SELECT block, lot, status, complaint_description FROM complaints")
            .await
    }

    pub async fn permits_by_status(&self, status: &str) -> Result<Vec<PermitRecord>, StoreError> {
        let sql = "SELECT permit_number, status, permit_type, block, lot, issued_date \
                   FROM permits WHERE LOWER(status) = LOWER($1)";
        match self {
            Store::Postgres(pool) => Ok(sqlx::query_as::<_, PermitRecord>(sql)
                .bind(status)
                .fetch_all(pool)
                .await?),
            Store::Sqlite(pool) => {
                let sql = sqlite_placeholders(sql);
                Ok(sqlx::query_as::<_, PermitRecord>(&sql)
                    .bind(status)
                    .fetch_all(pool)
                    .await?)
            }
        }
    }

    pub async fn inspections(&self) -> Result<Vec<InspectionRecord>, StoreError> {
        self.fetch_rows(
            "SELECT reference_number, result, inspection_description, scheduled_date \
             FROM inspections",
        )
        .await
    }

    pub async fn fetch_health(&self, block_lot: &str) -> Result<Option<HealthRow>, StoreError> {
        let sql = "SELECT block_lot, tier, signal_count, at_risk_count, signals_json, \
                   computed_at FROM property_health WHERE block_lot = $1";
        match self {
            Store::Postgres(pool) => Ok(sqlx::query_as::<_, HealthRow>(sql)
                .bind(block_lot)
                .fetch_optional(pool)
                .await?),
            Store::Sqlite(pool) => {
                let sql = sqlite_placeholders(sql);
                Ok(sqlx::query_as::<_, HealthRow>(&sql)
                    .bind(block_lot)
                    .fetch_optional(pool)
                    .await?)
            }
        }
    }

    /// Open the single write transaction for a pipeline run. Everything from
    /// truncate through the health upserts commits atomically, so a mid-run
    /// crash leaves the previous run's output intact.
    pub async fn begin(&self) -> Result<WriteBatch, StoreError> {
        match self {
            Store::Postgres(pool) => Ok(WriteBatch::Postgres(pool.begin().await?)),
            Store::Sqlite(pool) => Ok(WriteBatch::Sqlite(pool.begin().await?)),
        }
    }

    /// Load fixed sample source data for local development. Replaces any
    /// existing sample rows so reseeding stays deterministic.
    pub async fn seed(&self) -> Result<(), StoreError> {
        let pool = match self {
            Store::Sqlite(pool) => pool,
            Store::Postgres(_) => return Err(StoreError::DevBackendOnly("seed")),
        };

        for table in ["permits", "addenda", "violations", "complaints", "inspections"] {
            sqlx::query(&format!("DELETE FROM {table}")).execute(pool).await?;
        }

        let today = Utc::now().date_naive();
        let years_ago = |y: i64| today - chrono::Duration::days(365 * y);

        let permits: Vec<(&str, &str, &str, &str, &str, Option<NaiveDate>)> = vec![
            // Parcel 0001/001: plan review stuck on issued comments.
            ("202301010001", "filed", "3", "0001", "001", None),
            // Parcel 3512/001: expired with real inspections but no final.
            ("201904150310", "expired", "3", "3512", "001", Some(years_ago(6))),
            // Parcel 0450/022: issued long ago, no inspection activity.
            ("202001220045", "issued", "2", "0450", "022", Some(years_ago(5))),
            // Parcel 0788/014: expired OTC permit, never inspected.
            ("202206140188", "expired", "8", "0788", "014", Some(years_ago(3))),
        ];
        for (number, status, permit_type, block, lot, issued) in permits {
            sqlx::query(&sqlite_placeholders(
                "INSERT INTO permits (permit_number, status, permit_type, block, lot, issued_date) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            ))
            .bind(number)
            .bind(status)
            .bind(permit_type)
            .bind(block)
            .bind(lot)
            .bind(issued)
            .execute(pool)
            .await?;
        }

        let addenda: Vec<(&str, &str, Option<&str>, Option<NaiveDate>, Option<NaiveDate>)> = vec![
            (
                "202301010001",
                "CPC",
                Some("Issued Comments"),
                Some(today - chrono::Duration::days(120)),
                Some(today - chrono::Duration::days(90)),
            ),
            ("202301010001", "BLDG", None, Some(today - chrono::Duration::days(60)), None),
            ("201904150310", "PPC", None, Some(years_ago(2)), None),
        ];
        for (application, station, result, start, finish) in addenda {
            sqlx::query(&sqlite_placeholders(
                "INSERT INTO addenda (application_number, station, review_results, start_date, finish_date) \
                 VALUES ($1, $2, $3, $4, $5)",
            ))
            .bind(application)
            .bind(station)
            .bind(result)
            .bind(start)
            .bind(finish)
            .execute(pool)
            .await?;
        }

        let violations = vec![
            ("0001", "001", "open", "Building without permit"),
            ("0450", "022", "closed", "Work beyond scope of permit"),
            ("2177", "008", "active", "Order of abatement hearing scheduled"),
        ];
        for (block, lot, status, category) in violations {
            sqlx::query(&sqlite_placeholders(
                "INSERT INTO violations (block, lot, status, nov_category_description) \
                 VALUES ($1, $2, $3, $4)",
            ))
            .bind(block)
            .bind(lot)
            .bind(status)
            .bind(category)
            .execute(pool)
            .await?;
        }

        let complaints = vec![
            ("2200", "015A", "open", "Construction noise before permitted hours"),
            ("0001", "001", "open", "Debris blocking sidewalk"),
        ];
        for (block, lot, status, description) in complaints {
            sqlx::query(&sqlite_placeholders(
                "INSERT INTO complaints (block, lot, status, complaint_description) \
                 VALUES ($1, $2, $3, $4)",
            ))
            .bind(block)
            .bind(lot)
            .bind(status)
            .bind(description)
            .execute(pool)
            .await?;
        }

        let inspections = vec![
            ("201904150310", "PASSED", "Foundation", years_ago(6)),
            ("201904150310", "PASSED", "Framing", years_ago(6) + chrono::Duration::days(40)),
            ("201904150310", "FAILED", "Rough electrical", years_ago(5)),
            ("201904150310", "PASSED", "Rough electrical reinspection", years_ago(5) + chrono::Duration::days(14)),
        ];
        for (reference, result, description, scheduled) in inspections {
            sqlx::query(&sqlite_placeholders(
                "INSERT INTO inspections (reference_number, result, inspection_description, scheduled_date) \
                 VALUES ($1, $2, $3, $4)",
            ))
            .bind(reference)
            .bind(result)
            .bind(description)
            .bind(scheduled)
            .execute(pool)
            .await?;
        }

        info!("seed data inserted");
        Ok(())
    }
}

/// The per-run write transaction. Dropped without commit on any failure,
/// rolling the run back.
pub enum WriteBatch {
    Postgres(sqlx::Transaction<'static, sqlx::Postgres>),
    Sqlite(sqlx::Transaction<'static, sqlx::Sqlite>),
}

const INSERT_PERMIT_SIGNAL: &str =
    "INSERT INTO permit_signals (permit_number, signal_type, severity, detail, detected_at) \
     VALUES ($1, $2, $3, $4, $5)";

const INSERT_PROPERTY_SIGNAL: &str =
    "INSERT INTO property_signals (block_lot, signal_type, severity, detail, source_permit, detected_at) \
     VALUES ($1, $2, $3, $4, $5, $6)";

const UPSERT_PROPERTY_HEALTH: &str =
    "INSERT INTO property_health (block_lot, tier, signal_count, at_risk_count, signals_json, computed_at) \
     VALUES ($1, $2, $3, $4, $5, $6) \
     ON CONFLICT (block_lot) DO UPDATE SET \
     tier = excluded.tier, signal_count = excluded.signal_count, \
     at_risk_count = excluded.at_risk_count, signals_json = excluded.signals_json, \
     computed_at = excluded.computed_at";

impl WriteBatch {
    /// Full rebuild: every run starts by clearing all three output tables.
    pub async fn truncate_outputs(&mut self) -> Result<(), StoreError> {
        for table in OUTPUT_TABLES {
            let sql = format!("DELETE FROM {table}");
            match self {
                WriteBatch::Postgres(tx) => {
                    sqlx::query(&sql).execute(&mut **tx).await?;
                }
                WriteBatch::Sqlite(tx) => {
                    sqlx::query(&sql).execute(&mut **tx).await?;
                }
            }
        }
        Ok(())
    }

    pub async fn insert_permit_signal(
        &mut self,
        signal: &Signal,
        permit_number: &str,
        detected_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        match self {
            WriteBatch::Postgres(tx) => {
                sqlx::query(INSERT_PERMIT_SIGNAL)
                    .bind(permit_number)
                    .bind(signal.signal_type.as_str())
                    .bind(signal.severity.as_str())
                    .bind(&signal.detail)
                    .bind(detected_at)
                    .execute(&mut **tx)
                    .await?;
            }
            WriteBatch::Sqlite(tx) => {
                let sql = sqlite_placeholders(INSERT_PERMIT_SIGNAL);
                sqlx::query(&sql)
                    .bind(permit_number)
                    .bind(signal.signal_type.as_str())
                    .bind(signal.severity.as_str())
                    .bind(&signal.detail)
                    .bind(detected_at)
                    .execute(&mut **tx)
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn insert_property_signal(
        &mut self,
        signal: &Signal,
        detected_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        match self {
            WriteBatch::Postgres(tx) => {
                sqlx::query(INSERT_PROPERTY_SIGNAL)
                    .bind(&signal.block_lot)
                    .bind(signal.signal_type.as_str())
                    .bind(signal.severity.as_str())
                    .bind(&signal.detail)
                    .bind(signal.permit_number.as_deref())
                    .bind(detected_at)
                    .execute(&mut **tx)
                    .await?;
            }
            WriteBatch::Sqlite(tx) => {
                let sql = sqlite_placeholders(INSERT_PROPERTY_SIGNAL);
                sqlx::query(&sql)
                    .bind(&signal.block_lot)
                    .bind(signal.signal_type.as_str())
                    .bind(signal.severity.as_str())
                    .bind(&signal.detail)
                    .bind(signal.permit_number.as_deref())
                    .bind(detected_at)
                    .execute(&mut **tx)
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn upsert_property_health(
        &mut self,
        health: &PropertyHealth,
        computed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let signals_json = serde_json::to_string(&health.signals)?;
        match self {
            WriteBatch::Postgres(tx) => {
                sqlx::query(UPSERT_PROPERTY_HEALTH)
                    .bind(&health.block_lot)
                    .bind(health.tier.as_str())
                    .bind(health.signal_count as i64)
                    .bind(health.at_risk_count as i64)
                    .bind(&signals_json)
                    .bind(computed_at)
                    .execute(&mut **tx)
                    .await?;
            }
            WriteBatch::Sqlite(tx) => {
                let sql = sqlite_placeholders(UPSERT_PROPERTY_HEALTH);
                sqlx::query(&sql)
                    .bind(&health.block_lot)
                    .bind(health.tier.as_str())
                    .bind(health.signal_count as i64)
                    .bind(health.at_risk_count as i64)
                    .bind(&signals_json)
                    .bind(computed_at)
                    .execute(&mut **tx)
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        match self {
            WriteBatch::Postgres(tx) => tx.commit().await?,
            WriteBatch::Sqlite(tx) => tx.commit().await?,
        }
        Ok(())
    }
}

const SOURCE_DDL: [&str; 5] = [
    "CREATE TABLE IF NOT EXISTS permits (\
     permit_number TEXT PRIMARY KEY, \
     status TEXT, \
     permit_type TEXT, \
     block TEXT, \
     lot TEXT, \
     filed_date DATE, \
     issued_date DATE, \
     status_date DATE, \
     estimated_cost REAL)",
    "CREATE TABLE IF NOT EXISTS addenda (\
     id INTEGER PRIMARY KEY AUTOINCREMENT, \
     application_number TEXT NOT NULL, \
     station TEXT, \
     review_results TEXT, \
     start_date DATE, \
     finish_date DATE)",
    "CREATE TABLE IF NOT EXISTS violations (\
     block TEXT, \
     lot TEXT, \
     status TEXT, \
     nov_category_description TEXT)",
    "CREATE TABLE IF NOT EXISTS complaints (\
     block TEXT, \
     lot TEXT, \
     status TEXT, \
     complaint_description TEXT)",
    "CREATE TABLE IF NOT EXISTS inspections (\
     reference_number TEXT, \
     result TEXT, \
     inspection_description TEXT, \
     scheduled_date DATE)",
];

const OUTPUT_DDL: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS permit_signals (\
     permit_number TEXT NOT NULL, \
     signal_type TEXT NOT NULL, \
     severity TEXT NOT NULL, \
     detail TEXT NOT NULL, \
     detected_at TEXT NOT NULL)",
    "CREATE TABLE IF NOT EXISTS property_signals (\
     block_lot TEXT NOT NULL, \
     signal_type TEXT NOT NULL, \
     severity TEXT NOT NULL, \
     detail TEXT NOT NULL, \
     source_permit TEXT, \
     detected_at TEXT NOT NULL)",
    "CREATE TABLE IF NOT EXISTS property_health (\
     block_lot TEXT PRIMARY KEY, \
     tier TEXT NOT NULL, \
     signal_count INTEGER NOT NULL, \
     at_risk_count INTEGER NOT NULL, \
     signals_json TEXT NOT NULL, \
     computed_at TEXT NOT NULL)",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_rewrite_targets_every_marker() {
        assert_eq!(
            sqlite_placeholders("SELECT * FROM t WHERE a = $1 AND b = $2"),
            "SELECT * FROM t WHERE a = ?1 AND b = ?2"
        );
        assert_eq!(sqlite_placeholders("DELETE FROM t"), "DELETE FROM t");
    }

    #[tokio::test]
    async fn sqlite_schema_and_seed_round_trip() {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        store.init_db().await.unwrap();
        // Idempotent DDL: a second init must succeed.
        store.init_db().await.unwrap();
        store.seed().await.unwrap();

        let stations = store.station_records().await.unwrap();
        assert!(!stations.is_empty());
        assert!(stations.iter().any(|s| s.station.as_deref() == Some("CPC")));

        let violations = store.violations().await.unwrap();
        assert_eq!(violations.len(), 3);

        let expired = store.permits_by_status("expired").await.unwrap();
        assert_eq!(expired.len(), 2);
    }

    #[tokio::test]
    async fn connect_rejects_unknown_url_scheme() {
        let err = Store::connect("mysql://localhost/sf").await.err().unwrap();
        assert!(matches!(err, StoreError::UnsupportedUrl(_)));
    }
}

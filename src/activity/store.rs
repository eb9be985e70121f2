//! SQLite-backed activity log store.
//!
//! Durable, queryable record of everything the system did: filterable
//! queries with pagination, grouped statistics with an hourly trend, and
//! retention cleanup.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use tracing::info;

use crate::sqlite_persistence::USER_VERSION_BASE;

use super::models::{
    ActivityEntry, ActivityFilter, ActivityPage, ActivityStatistics, CountBucket, PageInfo,
    Severity, SeverityFilter, TrendBucket,
};
use super::schema::ACTIVITY_LOG_VERSIONED_SCHEMAS;

/// Store contract for the activity log.
pub trait ActivityStore: Send + Sync {
    /// Persist an entry. Returns the entry with its assigned id.
    fn create(&self, entry: ActivityEntry) -> Result<ActivityEntry>;

    /// Run a filtered, paginated query.
    fn query(&self, filter: &ActivityFilter) -> Result<ActivityPage>;

    /// Aggregate counts by type, service, and severity, plus an hourly
    /// trend, over the entries matching the filter.
    fn statistics(&self, filter: &ActivityFilter) -> Result<ActivityStatistics>;

    /// Delete entries whose timestamp is older than the cutoff. Returns the
    /// number of entries deleted.
    fn cleanup_older_than(&self, cutoff: i64) -> Result<usize>;
}

/// SQLite-backed activity store.
pub struct SqliteActivityStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteActivityStore {
    /// Create a new SqliteActivityStore.
    ///
    /// Opens an existing database or creates a new one with the current
    /// schema, then validates and migrates as needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = if db_path.as_ref().exists() {
            Connection::open_with_flags(
                &db_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_URI
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        } else {
            let conn = Connection::open(&db_path)?;
            ACTIVITY_LOG_VERSIONED_SCHEMAS
                .last()
                .context("No schemas defined")?
                .create(&conn)?;
            info!("Created new activity database at {:?}", db_path.as_ref());
            conn
        };

        // Read the database version
        let db_version = conn
            .query_row("PRAGMA user_version;", [], |row| row.get::<usize, i64>(0))
            .context("Failed to read database version")?
            - USER_VERSION_BASE as i64;

        if db_version < 0 {
            bail!(
                "Activity database version {} is too old, does not contain base db version {}",
                db_version,
                USER_VERSION_BASE
            );
        }
        let version = db_version as usize;

        let schema_count = ACTIVITY_LOG_VERSIONED_SCHEMAS.len();
        if version >= schema_count {
            bail!(
                "Activity database version {} is too new (max supported: {})",
                version,
                schema_count - 1
            );
        }

        // Validate schema matches expected structure
        ACTIVITY_LOG_VERSIONED_SCHEMAS
            .get(version)
            .context("Failed to get schema")?
            .validate(&conn)?;

        Self::migrate_if_needed(&conn, version)?;

        Ok(SqliteActivityStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store for testing.
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        ACTIVITY_LOG_VERSIONED_SCHEMAS
            .last()
            .context("No schemas defined")?
            .create(&conn)?;

        Ok(SqliteActivityStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run any pending migrations.
    fn migrate_if_needed(conn: &Connection, current_version: usize) -> Result<()> {
        let target_version = ACTIVITY_LOG_VERSIONED_SCHEMAS.len() - 1;

        if current_version >= target_version {
            return Ok(());
        }

        info!(
            "Migrating activity database from version {} to {}",
            current_version, target_version
        );

        for schema in ACTIVITY_LOG_VERSIONED_SCHEMAS
            .iter()
            .skip(current_version + 1)
        {
            if let Some(migration_fn) = schema.migration {
                info!("Running activity migration to version {}", schema.version);
                migration_fn(conn)?;
            }
        }

        conn.execute(
            &format!(
                "PRAGMA user_version = {}",
                USER_VERSION_BASE + target_version
            ),
            [],
        )?;

        Ok(())
    }

    /// Helper to convert a database row to an ActivityEntry.
    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<ActivityEntry> {
        Ok(ActivityEntry {
            id: row.get("id")?,
            service: row.get("service")?,
            activity_type: row.get("activity_type")?,
            severity: Severity::from_str(&row.get::<_, String>("severity")?)
                .unwrap_or(Severity::Info),
            message: row.get("message")?,
            correlation_id: row.get("correlation_id")?,
            metadata: row
                .get::<_, Option<String>>("metadata")?
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_else(|| serde_json::json!({})),
            timestamp: row.get("timestamp")?,
            created_at: row.get("created_at")?,
        })
    }

    /// Build the WHERE clause and its parameters for a filter. Returns an
    /// empty string when the filter constrains nothing.
    fn build_where(filter: &ActivityFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if !filter.services.is_empty() {
            let placeholders = vec!["?"; filter.services.len()].join(", ");
            clauses.push(format!("service IN ({})", placeholders));
            for service in &filter.services {
                params.push(Box::new(service.clone()));
            }
        }

        if !filter.activity_types.is_empty() {
            let placeholders = vec!["?"; filter.activity_types.len()].join(", ");
            clauses.push(format!("activity_type IN ({})", placeholders));
            for activity_type in &filter.activity_types {
                params.push(Box::new(activity_type.clone()));
            }
        }

        match filter.severity {
            Some(SeverityFilter::Exact(severity)) => {
                clauses.push("severity = ?".to_string());
                params.push(Box::new(severity.as_str().to_string()));
            }
            Some(SeverityFilter::AtLeast(severity)) => {
                let matching = severity.and_above();
                let placeholders = vec!["?"; matching.len()].join(", ");
                clauses.push(format!("severity IN ({})", placeholders));
                for severity in matching {
                    params.push(Box::new(severity.as_str().to_string()));
                }
            }
            None => {}
        }

        if let Some(from_timestamp) = filter.from_timestamp {
            clauses.push("timestamp >= ?".to_string());
            params.push(Box::new(from_timestamp));
        }

        if let Some(until_timestamp) = filter.until_timestamp {
            clauses.push("timestamp <= ?".to_string());
            params.push(Box::new(until_timestamp));
        }

        if let Some(correlation_id) = &filter.correlation_id {
            clauses.push("correlation_id = ?".to_string());
            params.push(Box::new(correlation_id.clone()));
        }

        if let Some(search) = &filter.search {
            clauses.push("(message LIKE ? OR metadata LIKE ?)".to_string());
            let pattern = format!("%{}%", search);
            params.push(Box::new(pattern.clone()));
            params.push(Box::new(pattern));
        }

        if clauses.is_empty() {
            (String::new(), params)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), params)
        }
    }
}

impl ActivityStore for SqliteActivityStore {
    fn create(&self, mut entry: ActivityEntry) -> Result<ActivityEntry> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"INSERT INTO activity_log (
                service, activity_type, severity, message, correlation_id,
                metadata, timestamp, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            rusqlite::params![
                entry.service,
                entry.activity_type,
                entry.severity.as_str(),
                entry.message,
                entry.correlation_id,
                entry.metadata.to_string(),
                entry.timestamp,
                entry.created_at,
            ],
        )?;
        entry.id = Some(conn.last_insert_rowid());
        Ok(entry)
    }

    fn query(&self, filter: &ActivityFilter) -> Result<ActivityPage> {
        if filter.page == 0 {
            bail!("page numbers start at 1");
        }
        if filter.page_size == 0 {
            bail!("page_size must be at least 1");
        }

        let conn = self.conn.lock().unwrap();
        let (where_sql, params) = Self::build_where(filter);
        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let total_items: u64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM activity_log{}", where_sql),
            params_refs.as_slice(),
            |row| row.get::<_, i64>(0),
        )? as u64;

        // Newest first; the monotonic id breaks timestamp ties so pages stay
        // stable under concurrent writes
        let page_sql = format!(
            "SELECT * FROM activity_log{} ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
            where_sql
        );
        let limit = filter.page_size as i64;
        let offset = (filter.page as i64 - 1) * filter.page_size as i64;

        let mut page_params = params_refs.clone();
        page_params.push(&limit);
        page_params.push(&offset);

        let mut stmt = conn.prepare(&page_sql)?;
        let entries = stmt
            .query_map(page_params.as_slice(), Self::row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let total_pages = total_items.div_ceil(filter.page_size as u64) as u32;

        Ok(ActivityPage {
            entries,
            page_info: PageInfo {
                total_items,
                total_pages,
                page: filter.page,
                page_size: filter.page_size,
                has_next: filter.page < total_pages,
                has_previous: filter.page > 1 && total_items > 0,
            },
        })
    }

    fn statistics(&self, filter: &ActivityFilter) -> Result<ActivityStatistics> {
        let conn = self.conn.lock().unwrap();
        let (where_sql, params) = Self::build_where(filter);
        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let total: u64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM activity_log{}", where_sql),
            params_refs.as_slice(),
            |row| row.get::<_, i64>(0),
        )? as u64;

        let group_counts = |column: &str| -> Result<Vec<CountBucket>> {
            let sql = format!(
                "SELECT {}, COUNT(*) AS n FROM activity_log{} GROUP BY {} ORDER BY n DESC, {} ASC",
                column, where_sql, column, column
            );
            let mut stmt = conn.prepare(&sql)?;
            let buckets = stmt
                .query_map(params_refs.as_slice(), |row| {
                    Ok(CountBucket {
                        key: row.get(0)?,
                        count: row.get::<_, i64>(1)? as u64,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(buckets)
        };

        let by_type = group_counts("activity_type")?;
        let by_service = group_counts("service")?;
        let by_severity = group_counts("severity")?;

        let trend_sql = format!(
            "SELECT (timestamp / 3600) * 3600 AS bucket_start, COUNT(*) AS n \
             FROM activity_log{} GROUP BY timestamp / 3600 ORDER BY bucket_start ASC",
            where_sql
        );
        let mut stmt = conn.prepare(&trend_sql)?;
        let trend = stmt
            .query_map(params_refs.as_slice(), |row| {
                Ok(TrendBucket {
                    bucket_start: row.get(0)?,
                    count: row.get::<_, i64>(1)? as u64,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(ActivityStatistics {
            total,
            by_type,
            by_service,
            by_severity,
            trend,
        })
    }

    fn cleanup_older_than(&self, cutoff: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM activity_log WHERE timestamp < ?1",
            rusqlite::params![cutoff],
        )?;
        Ok(deleted)
    }
}
